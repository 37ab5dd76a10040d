mod schema;
mod sqlite;

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::types::*;

/// Optional filters for listing a branch's indexes. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexFilter {
    pub id: Option<String>,
    pub commit_ref: Option<String>,
    pub value: Option<u32>,
    /// Calendar day (UTC) the index was created on.
    pub date: Option<NaiveDate>,
    /// Created strictly before this instant.
    pub before: Option<DateTime<Utc>>,
    /// Created strictly after this instant.
    pub after: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreStats {
    pub users: i64,
    pub access_keys: i64,
    pub modules: i64,
    pub branches: i64,
    pub indexes: i64,
    pub grants: i64,
}

/// Operations available inside one allocation transaction.
///
/// A handle is only ever obtained through [`Store::with_index_transaction`],
/// which commits when the closure returns `Ok` and rolls back otherwise.
pub trait IndexTransaction {
    fn find_branch(&self, module_name: &str, branch_name: &str) -> Result<Option<Branch>>;

    /// Value of `index_id`, provided it belongs to `branch_id`.
    fn index_value(&self, branch_id: &str, index_id: &str) -> Result<Option<u32>>;

    /// Fails with [`crate::error::Error::AllocationConflict`] if the branch
    /// already holds an index with the same value.
    fn insert_index(&self, index: &Index) -> Result<()>;

    /// Points the branch at `index_id`. Returns false if no branch row matched.
    fn set_latest_index(&self, module_id: &str, branch_id: &str, index_id: &str) -> Result<bool>;
}

/// Store defines the database interface.
pub trait Store: Send + Sync {
    fn initialize(&self) -> Result<()>;

    // Module operations
    fn create_module(&self, module: &Module) -> Result<()>;
    fn get_module_by_name(&self, name: &str) -> Result<Option<Module>>;
    fn list_modules(&self) -> Result<Vec<Module>>;

    // Branch operations
    fn create_branch(&self, branch: &Branch) -> Result<()>;
    fn get_branch(&self, module_name: &str, branch_name: &str) -> Result<Option<Branch>>;
    fn list_branches(&self, module_name: &str) -> Result<Vec<Branch>>;

    // Index operations
    fn with_index_transaction(
        &self,
        f: &mut dyn FnMut(&dyn IndexTransaction) -> Result<Allocation>,
    ) -> Result<Allocation>;
    /// `Ok(None)` if the branch exists but was never allocated,
    /// `Err(NoMatchingBranch)` if it does not exist.
    fn get_latest_index(&self, module_name: &str, branch_name: &str) -> Result<Option<Index>>;
    /// `Ok(None)` if the branch has no index with `value`,
    /// `Err(NoMatchingBranch)` if the branch does not exist.
    fn get_index(&self, module_name: &str, branch_name: &str, value: u32) -> Result<Option<Index>>;
    fn list_indexes(
        &self,
        module_name: &str,
        branch_name: &str,
        filter: &IndexFilter,
    ) -> Result<Vec<Index>>;

    // User operations
    fn create_user(&self, user: &User) -> Result<()>;
    fn get_user(&self, id: &str) -> Result<Option<User>>;
    fn get_user_by_username(&self, username: &str) -> Result<Option<User>>;
    /// Every user, ordered by username.
    fn list_users(&self) -> Result<Vec<User>>;
    fn set_user_password(&self, id: &str, password_hash: Option<&str>) -> Result<()>;
    fn delete_user(&self, id: &str) -> Result<bool>;

    // Access key operations
    /// Fails with [`crate::error::Error::KeyLookupCollision`] if the lookup is taken.
    fn create_access_key(&self, key: &AccessKey) -> Result<()>;
    fn get_access_key(&self, id: &str) -> Result<Option<AccessKey>>;
    fn get_access_key_by_lookup(&self, lookup: &str) -> Result<Option<AccessKey>>;
    /// Keys of `user_id`, or of every user, newest first.
    fn list_access_keys(&self, user_id: Option<&str>) -> Result<Vec<AccessKey>>;
    fn delete_access_key(&self, id: &str) -> Result<bool>;
    fn record_access_key_use(&self, id: &str) -> Result<()>;

    // Permission grant operations
    /// Persists every scope or none. Returns how many were newly added.
    fn grant_scopes(&self, user_id: &str, scopes: &BTreeSet<String>) -> Result<usize>;
    /// Removes every listed scope in one transaction. Returns how many existed.
    fn revoke_scopes(&self, user_id: &str, scopes: &BTreeSet<String>) -> Result<usize>;
    /// Exact membership test: true if the user holds at least one of `scopes`.
    fn has_any_scope(&self, user_id: &str, scopes: &[String]) -> Result<bool>;
    fn list_user_grants(&self, user_id: &str) -> Result<Vec<PermissionGrant>>;
    fn list_grants(&self) -> Result<Vec<PermissionGrant>>;

    fn stats(&self) -> Result<StoreStats>;
}

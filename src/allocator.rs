//! Gap-free build index allocation.
//!
//! Each call to [`IndexAllocator::allocate_next`] runs the read-compute-write
//! sequence inside one store transaction. The store serializes writers and
//! reports a lost race as [`Error::AllocationConflict`], in which case the
//! whole sequence is repeated from the branch lookup.

use chrono::{SubsecRound, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::store::{IndexTransaction, Store};
use crate::types::{Allocation, Index};

pub const COMMIT_REF_LEN: usize = 40;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 64;

/// Rejects anything that is not a 40 character hex commit hash.
pub fn validate_commit_ref(commit_ref: &str) -> Result<()> {
    if !commit_ref.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(Error::validation(
            "commit ref must contain only hexadecimal characters",
        ));
    }
    // All ASCII from here, so bytes and characters agree.
    if commit_ref.len() != COMMIT_REF_LEN {
        return Err(Error::validation(format!(
            "commit ref must be exactly {} characters, got {}",
            COMMIT_REF_LEN,
            commit_ref.len()
        )));
    }
    Ok(())
}

pub struct IndexAllocator<'a> {
    store: &'a dyn Store,
    max_attempts: u32,
}

impl<'a> IndexAllocator<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Allocates the next index on `module_name`/`branch_name` for `commit_ref`.
    ///
    /// Fails with [`Error::Validation`] for a malformed commit ref and
    /// [`Error::NoMatchingBranch`] for an unknown branch; neither writes anything.
    pub fn allocate_next(
        &self,
        module_name: &str,
        branch_name: &str,
        commit_ref: &str,
    ) -> Result<Allocation> {
        validate_commit_ref(commit_ref)?;
        let commit_ref = commit_ref.to_ascii_lowercase();

        for attempt in 1..=self.max_attempts {
            debug!(module = module_name, branch = branch_name, attempt, "allocating index");

            let result = self.store.with_index_transaction(&mut |tx| {
                allocate_in(tx, module_name, branch_name, &commit_ref)
            });

            match result {
                Ok(allocation) => {
                    info!(
                        module = module_name,
                        branch = branch_name,
                        value = allocation.new_index.value,
                        commit_ref = %allocation.new_index.commit_ref,
                        "allocated build index"
                    );
                    return Ok(allocation);
                }
                Err(e) if e.is_conflict() => {
                    warn!(
                        module = module_name,
                        branch = branch_name,
                        attempt,
                        "allocation conflict, retrying: {}",
                        e
                    );
                    std::thread::yield_now();
                }
                Err(e) => return Err(e),
            }
        }

        Err(Error::AllocationExhausted(self.max_attempts))
    }
}

/// One allocation attempt against an open transaction.
fn allocate_in(
    tx: &dyn IndexTransaction,
    module_name: &str,
    branch_name: &str,
    commit_ref: &str,
) -> Result<Allocation> {
    let branch = tx
        .find_branch(module_name, branch_name)?
        .ok_or(Error::NoMatchingBranch)?;

    let previous_value = match &branch.latest_index_id {
        Some(latest_id) => {
            let value = tx.index_value(&branch.id, latest_id)?.ok_or_else(|| {
                Error::Inconsistent(format!(
                    "branch {} points at missing index {}",
                    branch.id, latest_id
                ))
            })?;
            Some(value)
        }
        None => None,
    };

    let value = previous_value
        .unwrap_or(0)
        .checked_add(1)
        .ok_or_else(|| Error::validation("index value space exhausted"))?;

    let index = Index {
        id: Uuid::new_v4().to_string(),
        branch_id: branch.id.clone(),
        commit_ref: commit_ref.to_string(),
        value,
        created_at: Utc::now().trunc_subsecs(6),
    };
    tx.insert_index(&index)?;

    if !tx.set_latest_index(&branch.module_id, &branch.id, &index.id)? {
        return Err(Error::NoMatchingBranch);
    }

    Ok(Allocation {
        module_id: branch.module_id,
        branch_id: branch.id,
        previous_index_id: branch.latest_index_id,
        previous_index_value: previous_value,
        new_index: index,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::store::{IndexFilter, SqliteStore, StoreStats};
    use crate::types::{AccessKey, Branch, Module, PermissionGrant, User};
    use tempfile::TempDir;

    const SHA_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const SHA_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    fn setup() -> (TempDir, SqliteStore) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();

        let module = Module {
            id: Uuid::new_v4().to_string(),
            name: "test".to_string(),
            created_at: Utc::now(),
        };
        store.create_module(&module).unwrap();
        store
            .create_branch(&Branch {
                id: Uuid::new_v4().to_string(),
                module_id: module.id.clone(),
                module_name: module.name.clone(),
                name: "dev".to_string(),
                latest_index_id: None,
                created_at: Utc::now(),
            })
            .unwrap();

        (temp, store)
    }

    #[test]
    fn test_validate_commit_ref() {
        assert!(validate_commit_ref(SHA_A).is_ok());
        assert!(validate_commit_ref("0123456789abcdefABCDEF0123456789abcdef01").is_ok());

        assert!(matches!(validate_commit_ref(""), Err(Error::Validation(_))));
        assert!(matches!(
            validate_commit_ref(&"a".repeat(39)),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            validate_commit_ref(&"a".repeat(41)),
            Err(Error::Validation(_))
        ));
        assert!(matches!(
            validate_commit_ref(&"z".repeat(40)),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_validate_commit_ref_messages() {
        let Err(Error::Validation(msg)) = validate_commit_ref(&"\u{e9}".repeat(40)) else {
            panic!("multibyte commit ref must be rejected");
        };
        assert_eq!(msg, "commit ref must contain only hexadecimal characters");

        let Err(Error::Validation(msg)) = validate_commit_ref(&"a".repeat(41)) else {
            panic!("long commit ref must be rejected");
        };
        assert_eq!(msg, "commit ref must be exactly 40 characters, got 41");
    }

    #[test]
    fn test_first_and_second_allocation() {
        let (_temp, store) = setup();
        let allocator = IndexAllocator::new(&store);

        let first = allocator.allocate_next("test", "dev", SHA_A).unwrap();
        assert_eq!(first.previous_index_id, None);
        assert_eq!(first.previous_index_value, None);
        assert_eq!(first.new_index.value, 1);
        assert_eq!(first.new_index.commit_ref, SHA_A);

        let second = allocator.allocate_next("test", "dev", SHA_B).unwrap();
        assert_eq!(second.previous_index_id.as_deref(), Some(first.new_index.id.as_str()));
        assert_eq!(second.previous_index_value, Some(1));
        assert_eq!(second.new_index.value, 2);
        assert_eq!(second.branch_id, first.branch_id);
    }

    #[test]
    fn test_latest_follows_allocation() {
        let (_temp, store) = setup();
        let allocator = IndexAllocator::new(&store);

        for _ in 0..3 {
            let allocation = allocator.allocate_next("test", "dev", SHA_A).unwrap();
            let latest = store.get_latest_index("test", "dev").unwrap().unwrap();
            assert_eq!(latest, allocation.new_index);
            assert_eq!(store.get_latest_index("test", "dev").unwrap().unwrap(), latest);
        }
    }

    #[test]
    fn test_unknown_branch_writes_nothing() {
        let (_temp, store) = setup();
        let allocator = IndexAllocator::new(&store);

        assert!(matches!(
            allocator.allocate_next("test", "prod", SHA_A),
            Err(Error::NoMatchingBranch)
        ));
        assert!(matches!(
            allocator.allocate_next("other", "dev", SHA_A),
            Err(Error::NoMatchingBranch)
        ));
        assert_eq!(store.stats().unwrap().indexes, 0);
    }

    #[test]
    fn test_invalid_commit_ref_writes_nothing() {
        let (_temp, store) = setup();
        let allocator = IndexAllocator::new(&store);

        assert!(matches!(
            allocator.allocate_next("test", "dev", "abc"),
            Err(Error::Validation(_))
        ));
        assert!(store.get_latest_index("test", "dev").unwrap().is_none());
    }

    #[test]
    fn test_commit_ref_is_normalized_to_lowercase() {
        let (_temp, store) = setup();
        let allocation = IndexAllocator::new(&store)
            .allocate_next("test", "dev", &"A".repeat(40))
            .unwrap();
        assert_eq!(allocation.new_index.commit_ref, SHA_A);
    }

    /// Store wrapper whose first `conflicts` transactions report a lost race.
    struct FlakyStore {
        inner: SqliteStore,
        conflicts: AtomicU32,
    }

    impl FlakyStore {
        fn take_conflict(&self) -> bool {
            self.conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        }
    }

    macro_rules! delegate {
        ($($name:ident(&self $(, $arg:ident: $ty:ty)*) -> $ret:ty;)*) => {
            $(fn $name(&self $(, $arg: $ty)*) -> $ret { self.inner.$name($($arg),*) })*
        };
    }

    impl Store for FlakyStore {
        fn with_index_transaction(
            &self,
            f: &mut dyn FnMut(&dyn IndexTransaction) -> Result<Allocation>,
        ) -> Result<Allocation> {
            if self.take_conflict() {
                return Err(Error::AllocationConflict);
            }
            self.inner.with_index_transaction(f)
        }

        delegate! {
            initialize(&self) -> Result<()>;
            create_module(&self, module: &Module) -> Result<()>;
            get_module_by_name(&self, name: &str) -> Result<Option<Module>>;
            list_modules(&self) -> Result<Vec<Module>>;
            create_branch(&self, branch: &Branch) -> Result<()>;
            get_branch(&self, module_name: &str, branch_name: &str) -> Result<Option<Branch>>;
            list_branches(&self, module_name: &str) -> Result<Vec<Branch>>;
            get_latest_index(&self, module_name: &str, branch_name: &str)
                -> Result<Option<Index>>;
            get_index(&self, module_name: &str, branch_name: &str, value: u32)
                -> Result<Option<Index>>;
            list_indexes(&self, module_name: &str, branch_name: &str, filter: &IndexFilter)
                -> Result<Vec<Index>>;
            create_user(&self, user: &User) -> Result<()>;
            get_user(&self, id: &str) -> Result<Option<User>>;
            get_user_by_username(&self, username: &str) -> Result<Option<User>>;
            list_users(&self) -> Result<Vec<User>>;
            set_user_password(&self, id: &str, password_hash: Option<&str>) -> Result<()>;
            delete_user(&self, id: &str) -> Result<bool>;
            create_access_key(&self, key: &AccessKey) -> Result<()>;
            get_access_key(&self, id: &str) -> Result<Option<AccessKey>>;
            get_access_key_by_lookup(&self, lookup: &str) -> Result<Option<AccessKey>>;
            list_access_keys(&self, user_id: Option<&str>) -> Result<Vec<AccessKey>>;
            delete_access_key(&self, id: &str) -> Result<bool>;
            record_access_key_use(&self, id: &str) -> Result<()>;
            grant_scopes(&self, user_id: &str, scopes: &BTreeSet<String>) -> Result<usize>;
            revoke_scopes(&self, user_id: &str, scopes: &BTreeSet<String>) -> Result<usize>;
            has_any_scope(&self, user_id: &str, scopes: &[String]) -> Result<bool>;
            list_user_grants(&self, user_id: &str) -> Result<Vec<PermissionGrant>>;
            list_grants(&self) -> Result<Vec<PermissionGrant>>;
            stats(&self) -> Result<StoreStats>;
        }
    }

    #[test]
    fn test_conflicts_are_retried() {
        let (_temp, inner) = setup();
        let store = FlakyStore {
            inner,
            conflicts: AtomicU32::new(3),
        };

        let allocation = IndexAllocator::new(&store)
            .allocate_next("test", "dev", SHA_A)
            .unwrap();
        assert_eq!(allocation.new_index.value, 1);
    }

    #[test]
    fn test_retries_are_bounded() {
        let (_temp, inner) = setup();
        let store = FlakyStore {
            inner,
            conflicts: AtomicU32::new(10),
        };

        let result = IndexAllocator::new(&store)
            .with_max_attempts(4)
            .allocate_next("test", "dev", SHA_A);
        assert!(matches!(result, Err(Error::AllocationExhausted(4))));
        assert!(store.inner.get_latest_index("test", "dev").unwrap().is_none());
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Branch {
    pub id: String,
    pub module_id: String,
    pub module_name: String,
    pub name: String,
    /// Points at the index holding the branch's highest value; `None` until
    /// the first allocation.
    pub latest_index_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// One allocated build index. Immutable once written.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Index {
    pub id: String,
    pub branch_id: String,
    pub commit_ref: String,
    pub value: u32,
    pub created_at: DateTime<Utc>,
}

/// Outcome of an allocate-next call: the branch's previous latest index (both
/// fields `None` on the first allocation) and the index that was just created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    pub module_id: String,
    pub branch_id: String,
    pub previous_index_id: Option<String>,
    pub previous_index_value: Option<u32>,
    pub new_index: Index,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub username: String,
    #[serde(skip)]
    pub password_hash: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A credential a CI client presents instead of its owner's password.
///
/// With `scope` set, the key can do only what both that grant expression and
/// the owner's grants allow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessKey {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Public half of the presented key.
    #[serde(skip)]
    pub lookup: String,
    #[serde(skip)]
    pub secret_hash: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_used_at: Option<DateTime<Utc>>,
}

impl AccessKey {
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

/// A user holds exactly this literal, leaf-resolved scope string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionGrant {
    pub user_id: String,
    pub scope: String,
    pub created_at: DateTime<Utc>,
}

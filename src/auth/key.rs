//! Access keys for CI clients.
//!
//! A key is presented as `bidx_<lookup>_<secret>`, both halves lowercase hex.
//! The lookup half is stored in clear to find the row; the secret half is only
//! kept as an argon2id hash.

use std::fmt;
use std::str::FromStr;

use chrono::{Duration, SubsecRound, Utc};
use rand::RngCore;
use uuid::Uuid;

use super::secret::SecretHasher;
use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{AccessKey, GrantExpression, User};

pub const KEY_PREFIX: &str = "bidx";
const LOOKUP_BYTES: usize = 6;
const SECRET_BYTES: usize = 20;
const MAX_LABEL_LEN: usize = 64;
const ISSUE_ATTEMPTS: u32 = 3;

/// The string a client sends. Only exists in memory between issuing and
/// printing, or between parsing a header and verifying it.
#[derive(Clone, PartialEq, Eq)]
pub struct RawKey {
    lookup: String,
    secret: String,
}

fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn is_lower_hex(part: &str, bytes: usize) -> bool {
    part.len() == bytes * 2 && part.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl RawKey {
    #[must_use]
    pub fn generate() -> Self {
        Self {
            lookup: random_hex(LOOKUP_BYTES),
            secret: random_hex(SECRET_BYTES),
        }
    }

    #[must_use]
    pub fn lookup(&self) -> &str {
        &self.lookup
    }

    #[must_use]
    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Display for RawKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{KEY_PREFIX}_{}_{}", self.lookup, self.secret)
    }
}

// Keeps the secret out of logs.
impl fmt::Debug for RawKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{KEY_PREFIX}_{}_...", self.lookup)
    }
}

impl FromStr for RawKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (lookup, secret) = s
            .strip_prefix(KEY_PREFIX)
            .and_then(|rest| rest.strip_prefix('_'))
            .and_then(|rest| rest.split_once('_'))
            .ok_or(Error::MalformedAccessKey)?;

        if !is_lower_hex(lookup, LOOKUP_BYTES) || !is_lower_hex(secret, SECRET_BYTES) {
            return Err(Error::MalformedAccessKey);
        }

        Ok(Self {
            lookup: lookup.to_string(),
            secret: secret.to_string(),
        })
    }
}

/// What a new key is for.
#[derive(Debug, Clone, Default)]
pub struct KeySpec {
    pub label: Option<String>,
    /// Narrows the key to this expression's leaf scopes.
    pub scope: Option<GrantExpression>,
    pub expires_in: Option<Duration>,
}

/// Creates and persists a key for `user`. The returned [`RawKey`] is the only
/// copy of the secret.
pub fn issue_access_key(
    store: &dyn Store,
    hasher: &SecretHasher,
    user: &User,
    spec: &KeySpec,
) -> Result<(AccessKey, RawKey)> {
    if let Some(label) = &spec.label {
        if label.is_empty() || label.len() > MAX_LABEL_LEN {
            return Err(Error::validation(format!(
                "key label must be 1 to {MAX_LABEL_LEN} characters"
            )));
        }
    }
    if let Some(scope) = &spec.scope {
        scope.scopes()?;
    }

    let created_at = Utc::now().trunc_subsecs(6);

    for _ in 0..ISSUE_ATTEMPTS {
        let raw = RawKey::generate();
        let key = AccessKey {
            id: Uuid::new_v4().to_string(),
            user_id: user.id.clone(),
            label: spec.label.clone(),
            lookup: raw.lookup.clone(),
            secret_hash: hasher.hash(&raw.secret)?,
            scope: spec.scope.as_ref().map(ToString::to_string),
            created_at,
            expires_at: spec.expires_in.map(|d| created_at + d),
            last_used_at: None,
        };

        match store.create_access_key(&key) {
            Ok(()) => {
                tracing::info!(user = %user.username, key_id = %key.id, "issued access key");
                return Ok((key, raw));
            }
            Err(Error::KeyLookupCollision) => continue,
            Err(e) => return Err(e),
        }
    }

    Err(Error::KeyLookupCollision)
}

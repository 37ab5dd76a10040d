//! Turning an Authorization header into a verified principal.
//!
//! Accepted forms:
//!
//! ```text
//! Authorization: Bearer bidx_<lookup>_<secret>
//! Authorization: Basic base64(x-access-key:bidx_<lookup>_<secret>)
//! Authorization: Basic base64(<username>:<password>)
//! ```

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use chrono::Utc;
use tracing::{error, warn};

use super::key::RawKey;
use super::secret::SecretHasher;
use crate::store::Store;
use crate::types::names::ACCESS_KEY_USERNAME;
use crate::types::{AccessKey, User};

#[derive(Debug, PartialEq, Eq)]
pub enum CredentialError {
    UnsupportedScheme,
    Rejected,
    Expired,
    Unavailable,
}

/// Credentials as presented, not yet verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    AccessKey(String),
    Password { username: String, password: String },
}

/// A verified caller. `key` is `None` for password logins.
#[derive(Debug, Clone)]
pub struct Principal {
    pub user: User,
    pub key: Option<AccessKey>,
}

fn unavailable(context: &str, e: impl std::fmt::Display) -> CredentialError {
    error!("{context}: {e}");
    CredentialError::Unavailable
}

impl Credential {
    /// `Ok(None)` when no header was sent.
    pub fn from_header(header: Option<&str>) -> Result<Option<Self>, CredentialError> {
        let Some(header) = header else {
            return Ok(None);
        };
        let (scheme, payload) = header
            .split_once(' ')
            .ok_or(CredentialError::UnsupportedScheme)?;

        match scheme {
            "Bearer" => Ok(Some(Credential::AccessKey(payload.trim().to_string()))),
            "Basic" => Self::from_basic(payload.trim())
                .map(Some)
                .ok_or(CredentialError::Rejected),
            _ => Err(CredentialError::UnsupportedScheme),
        }
    }

    fn from_basic(encoded: &str) -> Option<Self> {
        let decoded = String::from_utf8(STANDARD.decode(encoded).ok()?).ok()?;
        let (username, password) = decoded.split_once(':')?;

        Some(if username.eq_ignore_ascii_case(ACCESS_KEY_USERNAME) {
            Credential::AccessKey(password.to_string())
        } else {
            Credential::Password {
                username: username.to_string(),
                password: password.to_string(),
            }
        })
    }

    pub fn verify(&self, store: &dyn Store) -> Result<Principal, CredentialError> {
        match self {
            Credential::AccessKey(presented) => verify_access_key(store, presented),
            Credential::Password { username, password } => {
                verify_password(store, username, password)
            }
        }
    }
}

fn verify_access_key(store: &dyn Store, presented: &str) -> Result<Principal, CredentialError> {
    let raw: RawKey = presented.parse().map_err(|_| CredentialError::Rejected)?;

    let key = store
        .get_access_key_by_lookup(raw.lookup())
        .map_err(|e| unavailable("access key lookup failed", e))?
        .ok_or(CredentialError::Rejected)?;

    let matches = SecretHasher::new()
        .verify(raw.secret(), &key.secret_hash)
        .map_err(|e| unavailable("access key hash check failed", e))?;
    if !matches {
        return Err(CredentialError::Rejected);
    }
    if key.is_expired_at(Utc::now()) {
        return Err(CredentialError::Expired);
    }

    let user = store
        .get_user(&key.user_id)
        .map_err(|e| unavailable("access key owner lookup failed", e))?
        .ok_or(CredentialError::Rejected)?;

    if let Err(e) = store.record_access_key_use(&key.id) {
        warn!(key_id = %key.id, "failed to record access key use: {e}");
    }

    Ok(Principal {
        user,
        key: Some(key),
    })
}

/// Users without a password can only present access keys.
fn verify_password(
    store: &dyn Store,
    username: &str,
    password: &str,
) -> Result<Principal, CredentialError> {
    let user = store
        .get_user_by_username(username)
        .map_err(|e| unavailable("user lookup failed", e))?
        .ok_or(CredentialError::Rejected)?;

    let phc = user
        .password_hash
        .as_deref()
        .ok_or(CredentialError::Rejected)?;

    let matches = SecretHasher::new()
        .verify(password, phc)
        .map_err(|e| unavailable("password hash check failed", e))?;
    if !matches {
        return Err(CredentialError::Rejected);
    }

    Ok(Principal { user, key: None })
}

mod access;
mod helpers;
mod key;
mod middleware;
mod secret;

pub use access::{AuthorizationChecker, Decision};
pub use helpers::{Credential, CredentialError, Principal};
pub use key::{KEY_PREFIX, KeySpec, RawKey, issue_access_key};
pub use middleware::{AuthError, RequireUser};
pub use secret::SecretHasher;

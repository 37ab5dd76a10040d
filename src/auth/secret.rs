//! Argon2id hashing shared by user passwords and access key secrets.

use argon2::Argon2;
use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{self, PasswordHash, PasswordHasher, PasswordVerifier, SaltString};

use crate::error::{Error, Result};

/// Produces and checks PHC strings. Uses the crate's argon2id defaults.
#[derive(Default)]
pub struct SecretHasher {
    argon2: Argon2<'static>,
}

impl SecretHasher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn hash(&self, secret: &str) -> Result<String> {
        let salt = SaltString::generate(&mut OsRng);
        self.argon2
            .hash_password(secret.as_bytes(), &salt)
            .map(|phc| phc.to_string())
            .map_err(|e| Error::Hash(e.to_string()))
    }

    /// `Ok(false)` on a mismatch; `Err` only when `phc` is not a usable hash.
    pub fn verify(&self, secret: &str, phc: &str) -> Result<bool> {
        let stored = PasswordHash::new(phc)
            .map_err(|e| Error::Hash(format!("stored hash is not a PHC string: {e}")))?;

        match self.argon2.verify_password(secret.as_bytes(), &stored) {
            Ok(()) => Ok(true),
            Err(password_hash::Error::Password) => Ok(false),
            Err(e) => Err(Error::Hash(e.to_string())),
        }
    }
}

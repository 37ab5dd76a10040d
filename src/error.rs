use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("invalid module and/or branch")]
    NoMatchingBranch,

    #[error("permission denied, required scope: '{0}'")]
    PermissionDenied(String),

    /// A concurrent allocation on the same branch committed first.
    #[error("allocation conflict")]
    AllocationConflict,

    #[error("gave up allocating after {0} conflicting attempts")]
    AllocationExhausted(u32),

    #[error("inconsistent data: {0}")]
    Inconsistent(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("invalid scope: {0}")]
    InvalidScope(String),

    #[error("access key lookup collision")]
    KeyLookupCollision,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("hashing failed: {0}")]
    Hash(String),

    #[error("malformed access key")]
    MalformedAccessKey,
}

impl Error {
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Returns true for errors the allocator recovers from by retrying.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::AllocationConflict => true,
            Error::Database(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseBusy
                    | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_conflict() {
        assert!(Error::AllocationConflict.is_conflict());

        let busy = rusqlite::Error::SqliteFailure(
            rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_BUSY),
            None,
        );
        assert!(Error::from(busy).is_conflict());

        assert!(!Error::NoMatchingBranch.is_conflict());
        assert!(!Error::AllocationExhausted(3).is_conflict());
        assert!(!Error::validation("bad").is_conflict());
    }
}

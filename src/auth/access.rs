//! Scope checks against persisted grants.
//!
//! A requirement is always composed from concrete names. A grant matches when
//! it equals that string or one of its variants with the module and/or branch
//! segment replaced by `*`, so at most four literal strings are looked up.
//!
//! A scoped access key adds a second, independent check: one of the same
//! candidates must also be in the leaf set of the key's grant expression.

use std::collections::BTreeSet;

use tracing::debug;

use crate::error::{Error, Result};
use crate::store::Store;
use crate::types::{
    AccessKey, CapabilityToken, GrantExpression, ScopePath, compose_requirement,
    compose_requirement_candidates,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allowed,
    Denied,
}

pub struct AuthorizationChecker<'a> {
    store: &'a dyn Store,
    key_scopes: Option<BTreeSet<String>>,
}

impl<'a> AuthorizationChecker<'a> {
    pub fn new(store: &'a dyn Store) -> Self {
        Self {
            store,
            key_scopes: None,
        }
    }

    /// Narrows every check to the scope of `key`, if it has one.
    pub fn with_key(mut self, key: Option<&AccessKey>) -> Result<Self> {
        let Some((id, expression)) = key.and_then(|k| Some((&k.id, k.scope.as_deref()?))) else {
            return Ok(self);
        };

        let scopes = expression
            .parse::<GrantExpression>()
            .and_then(|e| e.scopes())
            .map_err(|e| {
                Error::Inconsistent(format!("access key {id} has scope '{expression}': {e}"))
            })?;
        self.key_scopes = Some(scopes);
        Ok(self)
    }

    /// Decides whether `user_id` holds `token` at `path`.
    ///
    /// Does not check that the module or branch exists.
    pub fn authorize(
        &self,
        user_id: &str,
        token: CapabilityToken,
        path: &ScopePath,
    ) -> Result<Decision> {
        let candidates = compose_requirement_candidates(path, token)?;

        if let Some(key_scopes) = &self.key_scopes {
            if !candidates.iter().any(|c| key_scopes.contains(c)) {
                debug!(user_id, scope = %candidates[0], "outside access key scope");
                return Ok(Decision::Denied);
            }
        }

        if self.store.has_any_scope(user_id, &candidates)? {
            Ok(Decision::Allowed)
        } else {
            debug!(user_id, scope = %candidates[0], "permission denied");
            Ok(Decision::Denied)
        }
    }

    /// Like [`authorize`](Self::authorize), but turns a denial into
    /// [`Error::PermissionDenied`] carrying the required scope.
    pub fn require(&self, user_id: &str, token: CapabilityToken, path: &ScopePath) -> Result<()> {
        match self.authorize(user_id, token, path)? {
            Decision::Allowed => Ok(()),
            Decision::Denied => Err(Error::PermissionDenied(compose_requirement(path, token)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use tempfile::TempDir;

    use crate::store::SqliteStore;
    use crate::types::User;

    fn setup() -> (TempDir, SqliteStore, User) {
        let temp = TempDir::new().unwrap();
        let store = SqliteStore::new(temp.path().join("test.db")).unwrap();
        store.initialize().unwrap();

        let now = Utc::now();
        let user = User {
            id: "user-1".to_string(),
            username: "ci".to_string(),
            password_hash: None,
            created_at: now,
            updated_at: now,
        };
        store.create_user(&user).unwrap();

        (temp, store, user)
    }

    fn grant(store: &SqliteStore, user: &User, expression: &str) {
        let scopes = expression
            .parse::<GrantExpression>()
            .unwrap()
            .scopes()
            .unwrap();
        store.grant_scopes(&user.id, &scopes).unwrap();
    }

    #[test]
    fn test_exact_grant_allows_only_its_path() {
        let (_temp, store, user) = setup();
        grant(&store, &user, "test.dev.index-next");
        let checker = AuthorizationChecker::new(&store);

        let dev = ScopePath::branch("test", "dev");
        let prod = ScopePath::branch("test", "prod");

        assert_eq!(
            checker.authorize(&user.id, CapabilityToken::IndexNext, &dev).unwrap(),
            Decision::Allowed
        );
        assert_eq!(
            checker.authorize(&user.id, CapabilityToken::IndexNext, &prod).unwrap(),
            Decision::Denied
        );
        assert_eq!(
            checker.authorize(&user.id, CapabilityToken::IndexList, &dev).unwrap(),
            Decision::Denied
        );
    }

    #[test]
    fn test_composite_grant_covers_every_leaf() {
        let (_temp, store, user) = setup();
        grant(&store, &user, "test.dev.index");
        let checker = AuthorizationChecker::new(&store);

        let dev = ScopePath::branch("test", "dev");
        for token in [
            CapabilityToken::IndexList,
            CapabilityToken::IndexLatest,
            CapabilityToken::IndexNext,
            CapabilityToken::IndexDelete,
        ] {
            assert!(checker.require(&user.id, token, &dev).is_ok(), "{token}");
            assert!(
                checker
                    .require(&user.id, token, &ScopePath::branch("test", "prod"))
                    .is_err()
            );
            assert!(
                checker
                    .require(&user.id, token, &ScopePath::branch("other", "dev"))
                    .is_err()
            );
        }
    }

    #[test]
    fn test_wildcard_grants_match_any_name() {
        let (_temp, store, user) = setup();
        grant(&store, &user, "test.*.index-read");
        grant(&store, &user, "*.branch-list");
        let checker = AuthorizationChecker::new(&store);

        assert!(
            checker
                .require(
                    &user.id,
                    CapabilityToken::IndexLatest,
                    &ScopePath::branch("test", "anything")
                )
                .is_ok()
        );
        assert!(
            checker
                .require(&user.id, CapabilityToken::IndexLatest, &ScopePath::branch("other", "dev"))
                .is_err()
        );
        assert!(
            checker
                .require(&user.id, CapabilityToken::BranchList, &ScopePath::module("whatever"))
                .is_ok()
        );
        assert!(
            checker
                .require(&user.id, CapabilityToken::BranchCreate, &ScopePath::module("whatever"))
                .is_err()
        );
    }

    #[test]
    fn test_denial_reports_required_scope() {
        let (_temp, store, user) = setup();
        let checker = AuthorizationChecker::new(&store);

        let err = checker
            .require(&user.id, CapabilityToken::IndexNext, &ScopePath::branch("test", "dev"))
            .unwrap_err();
        match err {
            Error::PermissionDenied(scope) => assert_eq!(scope, "test.dev.index-next"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_requirement_must_be_single_leaf_at_matching_level() {
        let (_temp, store, user) = setup();
        let checker = AuthorizationChecker::new(&store);

        assert!(matches!(
            checker.authorize(&user.id, CapabilityToken::Index, &ScopePath::branch("test", "dev")),
            Err(Error::InvalidScope(_))
        ));
        assert!(matches!(
            checker.authorize(&user.id, CapabilityToken::IndexNext, &ScopePath::module("test")),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_module_level_grant() {
        let (_temp, store, user) = setup();
        grant(&store, &user, "module");
        let checker = AuthorizationChecker::new(&store);

        assert!(
            checker
                .require(&user.id, CapabilityToken::ModuleCreate, &ScopePath::Root)
                .is_ok()
        );
        assert!(
            checker
                .require(&user.id, CapabilityToken::BranchCreate, &ScopePath::module("test"))
                .is_err()
        );
    }

    fn scoped_key(user: &User, scope: &str) -> AccessKey {
        AccessKey {
            id: "key-1".to_string(),
            user_id: user.id.clone(),
            label: None,
            lookup: "0123456789ab".to_string(),
            secret_hash: String::new(),
            scope: Some(scope.to_string()),
            created_at: Utc::now(),
            expires_at: None,
            last_used_at: None,
        }
    }

    #[test]
    fn test_scoped_key_needs_both_key_and_grant() {
        let (_temp, store, user) = setup();
        grant(&store, &user, "test.dev.index");
        let key = scoped_key(&user, "test.*.index-read");
        let checker = AuthorizationChecker::new(&store)
            .with_key(Some(&key))
            .unwrap();

        let dev = ScopePath::branch("test", "dev");
        assert!(checker.require(&user.id, CapabilityToken::IndexLatest, &dev).is_ok());
        // Granted to the user, but outside the key
        assert!(checker.require(&user.id, CapabilityToken::IndexNext, &dev).is_err());
        // Inside the key, but not granted to the user
        assert!(
            checker
                .require(
                    &user.id,
                    CapabilityToken::IndexLatest,
                    &ScopePath::branch("test", "prod")
                )
                .is_err()
        );
    }

    #[test]
    fn test_unscoped_key_uses_owner_grants() {
        let (_temp, store, user) = setup();
        grant(&store, &user, "test.dev.index-next");
        let mut key = scoped_key(&user, "");
        key.scope = None;

        let checker = AuthorizationChecker::new(&store)
            .with_key(Some(&key))
            .unwrap();
        assert!(
            checker
                .require(&user.id, CapabilityToken::IndexNext, &ScopePath::branch("test", "dev"))
                .is_ok()
        );
    }

    #[test]
    fn test_unparsable_key_scope_is_inconsistent() {
        let (_temp, store, user) = setup();
        let key = scoped_key(&user, "test.dev.bogus");
        assert!(matches!(
            AuthorizationChecker::new(&store).with_key(Some(&key)),
            Err(Error::Inconsistent(_))
        ));
    }
}

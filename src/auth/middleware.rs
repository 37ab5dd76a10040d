use std::sync::Arc;

use axum::{
    Json,
    extract::FromRequestParts,
    http::{HeaderValue, StatusCode, header, request::Parts},
    response::{IntoResponse, Response},
};
use serde_json::json;

use super::access::AuthorizationChecker;
use super::helpers::{Credential, CredentialError, Principal};
use crate::error::Result;
use crate::server::AppState;
use crate::store::Store;
use crate::types::{AccessKey, CapabilityToken, ScopePath, User};

/// Extractor for any authenticated caller, by access key or password.
pub struct RequireUser {
    pub user: User,
    /// The key the caller presented; `None` for a password login.
    pub key: Option<AccessKey>,
}

impl RequireUser {
    /// Checks `token` at `path` against the caller's grants, narrowed to the
    /// key's scope when the caller used a scoped key.
    pub fn require(
        &self,
        store: &dyn Store,
        token: CapabilityToken,
        path: &ScopePath,
    ) -> Result<()> {
        AuthorizationChecker::new(store)
            .with_key(self.key.as_ref())?
            .require(&self.user.id, token, path)
    }
}

/// 401 rejection; always carries a Basic challenge.
#[derive(Debug)]
pub enum AuthError {
    Missing,
    Credential(CredentialError),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::Missing => (StatusCode::UNAUTHORIZED, "Authentication required"),
            AuthError::Credential(CredentialError::UnsupportedScheme) => {
                (StatusCode::UNAUTHORIZED, "Unsupported authorization scheme")
            }
            AuthError::Credential(CredentialError::Rejected) => {
                (StatusCode::UNAUTHORIZED, "Invalid credentials")
            }
            AuthError::Credential(CredentialError::Expired) => {
                (StatusCode::UNAUTHORIZED, "Access key expired")
            }
            AuthError::Credential(CredentialError::Unavailable) => {
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
            }
        };

        let body = json!({ "data": null, "error": message });
        let mut response = (status, Json(body)).into_response();
        if status == StatusCode::UNAUTHORIZED {
            response.headers_mut().insert(
                header::WWW_AUTHENTICATE,
                HeaderValue::from_static("Basic realm=\"buildindex\""),
            );
        }
        response
    }
}

impl From<CredentialError> for AuthError {
    fn from(e: CredentialError) -> Self {
        AuthError::Credential(e)
    }
}

impl FromRequestParts<Arc<AppState>> for RequireUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> std::result::Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|h| h.to_str().ok());

        let credential = Credential::from_header(header)?.ok_or(AuthError::Missing)?;
        let Principal { user, key } = credential.verify(state.store.as_ref())?;

        Ok(RequireUser { user, key })
    }
}

use std::sync::Arc;

use axum::{Json, extract::State, response::IntoResponse};

use crate::auth::RequireUser;
use crate::server::AppState;
use crate::server::dto::WhoamiResponse;
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};

pub async fn whoami(auth: RequireUser, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let scopes = state
        .store
        .list_user_grants(&auth.user.id)
        .api_err("Failed to list grants")?
        .into_iter()
        .map(|g| g.scope)
        .collect();

    Ok::<_, ApiError>(Json(ApiResponse::success(WhoamiResponse {
        user: auth.user,
        scopes,
        access_key: auth.key,
    })))
}

use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::allocator::IndexAllocator;
use crate::auth::RequireUser;
use crate::server::AppState;
use crate::server::dto::{IndexQueryParams, NextIndexParams};
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt};
use crate::server::validation::{require_branch_name, require_module_name};
use crate::types::{CapabilityToken, ScopePath};

#[derive(Deserialize)]
pub struct BranchPath {
    module: String,
    branch: String,
}

#[derive(Deserialize)]
pub struct IndexPath {
    module: String,
    branch: String,
    value: String,
}

/// Validates the path names, then checks `token` at module.branch.
fn authorize_branch(
    state: &AppState,
    auth: &RequireUser,
    module: &str,
    branch: &str,
    token: CapabilityToken,
) -> Result<(), ApiError> {
    require_module_name(module)?;
    require_branch_name(branch)?;

    auth.require(state.store.as_ref(), token, &ScopePath::branch(module, branch))?;
    Ok(())
}

pub async fn list_indexes(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(path): Path<BranchPath>,
    Query(params): Query<IndexQueryParams>,
) -> impl IntoResponse {
    authorize_branch(&state, &auth, &path.module, &path.branch, CapabilityToken::IndexList)?;

    let filter = params.into_filter()?;
    let indexes = state
        .store
        .list_indexes(&path.module, &path.branch, &filter)?;

    Ok::<_, ApiError>(Json(ApiResponse::success(indexes)))
}

pub async fn latest_index(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(path): Path<BranchPath>,
) -> Result<Response, ApiError> {
    authorize_branch(&state, &auth, &path.module, &path.branch, CapabilityToken::IndexLatest)?;

    match state.store.get_latest_index(&path.module, &path.branch)? {
        Some(index) => Ok(Json(ApiResponse::success(index)).into_response()),
        None => Ok(StatusCode::NO_CONTENT.into_response()),
    }
}

pub async fn next_index(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(path): Path<BranchPath>,
    Query(params): Query<NextIndexParams>,
) -> impl IntoResponse {
    authorize_branch(&state, &auth, &path.module, &path.branch, CapabilityToken::IndexNext)?;

    let commit_ref = params
        .commit_ref
        .ok_or_else(|| ApiError::bad_request("commit_ref is required"))?;

    // Allocation may wait on the database write lock
    let task_state = Arc::clone(&state);
    let allocation = tokio::task::spawn_blocking(move || {
        IndexAllocator::new(task_state.store.as_ref())
            .with_max_attempts(task_state.max_allocation_attempts)
            .allocate_next(&path.module, &path.branch, &commit_ref)
    })
    .await
    .map_err(|e| {
        tracing::error!("allocation task failed: {e}");
        ApiError::internal("Failed to allocate index")
    })??;

    Ok::<_, ApiError>(Json(ApiResponse::success(allocation)))
}

pub async fn get_index(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(path): Path<IndexPath>,
) -> impl IntoResponse {
    authorize_branch(&state, &auth, &path.module, &path.branch, CapabilityToken::IndexList)?;

    let value: u32 = path
        .value
        .parse()
        .map_err(|_| ApiError::bad_request(format!("Invalid index value '{}'", path.value)))?;

    let index = state
        .store
        .get_index(&path.module, &path.branch, value)?
        .or_not_found("Index not found")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(index)))
}

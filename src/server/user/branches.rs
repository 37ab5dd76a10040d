use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{SubsecRound, Utc};
use serde::Deserialize;
use uuid::Uuid;

use crate::auth::RequireUser;
use crate::error::Error;
use crate::server::AppState;
use crate::server::response::{ApiError, ApiResponse, StoreOptionExt, StoreResultExt};
use crate::server::validation::{require_branch_name, require_module_name};
use crate::types::{Branch, CapabilityToken, ScopePath};

#[derive(Deserialize)]
pub struct BranchPath {
    module: String,
    branch: String,
}

pub async fn list_branches(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(module_name): Path<String>,
) -> impl IntoResponse {
    let store = state.store.as_ref();

    require_module_name(&module_name)?;
    auth.require(store, CapabilityToken::BranchList, &ScopePath::module(module_name.as_str()))?;

    store
        .get_module_by_name(&module_name)
        .api_err("Failed to get module")?
        .or_not_found("Module not found")?;

    let branches = store
        .list_branches(&module_name)
        .api_err("Failed to list branches")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(branches)))
}

pub async fn create_branch(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(path): Path<BranchPath>,
) -> impl IntoResponse {
    let store = state.store.as_ref();

    require_module_name(&path.module)?;
    require_branch_name(&path.branch)?;
    auth.require(store, CapabilityToken::BranchCreate, &ScopePath::module(path.module.as_str()))?;

    let module = store
        .get_module_by_name(&path.module)
        .api_err("Failed to get module")?
        .or_not_found("Module not found")?;

    let branch = Branch {
        id: Uuid::new_v4().to_string(),
        module_id: module.id,
        module_name: module.name,
        name: path.branch,
        latest_index_id: None,
        created_at: Utc::now().trunc_subsecs(6),
    };

    match store.create_branch(&branch) {
        Ok(()) => {}
        Err(Error::AlreadyExists) => return Err(ApiError::conflict("Branch already exists")),
        Err(e) => return Err(ApiError::from(e)),
    }

    tracing::info!(
        module = %branch.module_name,
        branch = %branch.name,
        user = %auth.user.username,
        "created branch"
    );

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(branch))))
}

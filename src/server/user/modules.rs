use std::sync::Arc;

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use chrono::{SubsecRound, Utc};
use uuid::Uuid;

use crate::auth::RequireUser;
use crate::error::Error;
use crate::server::AppState;
use crate::server::response::{ApiError, ApiResponse, StoreResultExt};
use crate::server::validation::require_module_name;
use crate::types::{CapabilityToken, Module, ScopePath};

pub async fn list_modules(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let store = state.store.as_ref();

    auth.require(store, CapabilityToken::ModuleList, &ScopePath::Root)?;

    let modules = store.list_modules().api_err("Failed to list modules")?;

    Ok::<_, ApiError>(Json(ApiResponse::success(modules)))
}

pub async fn create_module(
    auth: RequireUser,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> impl IntoResponse {
    let store = state.store.as_ref();

    require_module_name(&name)?;
    auth.require(store, CapabilityToken::ModuleCreate, &ScopePath::Root)?;

    let module = Module {
        id: Uuid::new_v4().to_string(),
        name,
        created_at: Utc::now().trunc_subsecs(6),
    };

    match store.create_module(&module) {
        Ok(()) => {}
        Err(Error::AlreadyExists) => return Err(ApiError::conflict("Module already exists")),
        Err(e) => return Err(ApiError::from(e)),
    }

    tracing::info!(module = %module.name, user = %auth.user.username, "created module");

    Ok::<_, ApiError>((StatusCode::CREATED, Json(ApiResponse::success(module))))
}

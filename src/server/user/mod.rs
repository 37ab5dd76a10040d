mod branches;
mod indexes;
mod modules;
mod whoami;

use std::sync::Arc;

use axum::{
    Router,
    routing::{get, post, put},
};

use crate::server::AppState;

pub fn user_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/whoami", get(whoami::whoami))
        // Modules
        .route("/modules", get(modules::list_modules))
        .route("/modules/{module}", put(modules::create_module))
        // Branches
        .route("/modules/{module}/branches", get(branches::list_branches))
        .route(
            "/modules/{module}/branches/{branch}",
            put(branches::create_branch),
        )
        // Indexes
        .route(
            "/modules/{module}/branches/{branch}/indexes",
            get(indexes::list_indexes),
        )
        .route(
            "/modules/{module}/branches/{branch}/indexes/latest",
            get(indexes::latest_index),
        )
        .route(
            "/modules/{module}/branches/{branch}/indexes/next",
            post(indexes::next_index),
        )
        .route(
            "/modules/{module}/branches/{branch}/indexes/{value}",
            get(indexes::get_index),
        )
}

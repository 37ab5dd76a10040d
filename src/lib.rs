//! # buildindex
//!
//! Hands out gap-free, strictly increasing build indexes per module branch,
//! guarded by hierarchical dotted permission scopes. Usable as a standalone
//! binary or as a library.
//!
//! ## Library Usage
//!
//! ```toml
//! [dependencies]
//! buildindex = { version = "0.1", default-features = false }
//! ```
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use std::path::PathBuf;
//! use buildindex::server::{AppState, create_router};
//! use buildindex::store::{SqliteStore, Store};
//!
//! let store = SqliteStore::new("./data/buildindex.db").unwrap();
//! store.initialize().unwrap();
//!
//! let state = Arc::new(AppState::new(Arc::new(store), PathBuf::from("./data")));
//! let router = create_router(state);
//! // Serve with axum...
//! ```
//!
//! ## Feature Flags
//!
//! - `cli` (default): Includes the CLI module. Disable with `default-features = false`.

pub mod allocator;
pub mod auth;
#[cfg(feature = "cli")]
pub mod cli;
pub mod config;
pub mod error;
pub mod server;
pub mod store;
pub mod types;

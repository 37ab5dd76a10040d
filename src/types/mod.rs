mod models;
pub mod names;
pub mod permission;
pub mod scope;

pub use models::*;
pub use permission::{CapabilityToken, ScopeLevel};
pub use scope::{
    GrantExpression, ScopePath, compose_grant_set, compose_requirement,
    compose_requirement_candidates,
};

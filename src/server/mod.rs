pub mod dto;
pub mod response;
mod router;
mod user;
pub mod validation;

pub use router::{AppState, create_router};
pub use user::user_router;

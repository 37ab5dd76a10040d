//! Path-parameter checks that reject with 400 before any authorization.

use crate::server::response::ApiError;
use crate::types::names::{validate_branch_name, validate_module_name};

pub fn require_module_name(name: &str) -> Result<(), ApiError> {
    validate_module_name(name).map_err(ApiError::bad_request)
}

pub fn require_branch_name(name: &str) -> Result<(), ApiError> {
    validate_branch_name(name).map_err(ApiError::bad_request)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_rejects_scope_syntax() {
        assert!(require_module_name("mirai-core").is_ok());
        assert!(require_module_name("mirai.core").is_err());
        assert!(require_branch_name("release/1-x").is_ok());
        assert!(require_branch_name("*").is_err());
    }
}

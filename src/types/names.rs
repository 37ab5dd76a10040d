//! Syntax rules for module, branch and user names.
//!
//! Names become segments of dotted scope strings, so none of them may
//! contain `.` or `*`.

const MAX_MODULE_NAME_LEN: usize = 64;
const MAX_BRANCH_NAME_LEN: usize = 64;
const MAX_USERNAME_LEN: usize = 64;

/// Basic auth username that marks the password field as an access key.
pub const ACCESS_KEY_USERNAME: &str = "x-access-key";

fn is_valid_name_char(c: char, allow_slash: bool) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || (allow_slash && c == '/')
}

fn validate_name(
    name: &str,
    entity: &str,
    max_len: usize,
    allow_slash: bool,
    forbid_leading_special: bool,
) -> Result<(), String> {
    if name.is_empty() {
        return Err(format!("{entity} name cannot be empty"));
    }
    if name.len() > max_len {
        return Err(format!("{entity} name cannot exceed {max_len} characters"));
    }
    if !name.chars().all(|c| is_valid_name_char(c, allow_slash)) {
        let mut allowed = "alphanumeric characters, hyphens, and underscores".to_string();
        if allow_slash {
            allowed.push_str(", and slashes");
        }
        return Err(format!("{entity} name can only contain {allowed}"));
    }
    if forbid_leading_special && (name.starts_with('-') || name.starts_with('_')) {
        return Err(format!(
            "{entity} name cannot start with a hyphen or underscore"
        ));
    }
    Ok(())
}

pub fn validate_module_name(name: &str) -> Result<(), String> {
    validate_name(name, "Module", MAX_MODULE_NAME_LEN, false, true)
}

/// Branch names may contain slashes (`release/1-x`) but never periods,
/// which separate scope segments.
pub fn validate_branch_name(name: &str) -> Result<(), String> {
    validate_name(name, "Branch", MAX_BRANCH_NAME_LEN, true, false)?;
    if name.starts_with('/') || name.ends_with('/') {
        return Err("Branch name cannot start or end with a slash".to_string());
    }
    Ok(())
}

pub fn validate_username(name: &str) -> Result<(), String> {
    validate_name(name, "User", MAX_USERNAME_LEN, false, true)?;
    if name.eq_ignore_ascii_case(ACCESS_KEY_USERNAME) {
        return Err(format!("User name '{ACCESS_KEY_USERNAME}' is reserved"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_module_names() {
        assert!(validate_module_name("mirai-core").is_ok());
        assert!(validate_module_name("").is_err());
        assert!(validate_module_name("-leading").is_err());
        assert!(validate_module_name("dotted.name").is_err());
        assert!(validate_module_name("*").is_err());
        assert!(validate_module_name(&"a".repeat(65)).is_err());
    }

    #[test]
    fn test_branch_names() {
        assert!(validate_branch_name("dev").is_ok());
        assert!(validate_branch_name("release/2-x").is_ok());
        assert!(validate_branch_name("_wip").is_ok());
        assert!(validate_branch_name("v1.0").is_err());
        assert!(validate_branch_name("/dev").is_err());
        assert!(validate_branch_name("dev/").is_err());
    }

    #[test]
    fn test_usernames() {
        assert!(validate_username("ci-runner").is_ok());
        assert!(validate_username("ci.runner").is_err());
        assert!(validate_username("_ci").is_err());
    }

    #[test]
    fn test_access_key_username_is_reserved() {
        let err = validate_username("x-access-key").unwrap_err();
        assert!(err.contains("reserved"), "{err}");
        assert!(validate_username("X-Access-Key").is_err());
        assert!(validate_username("x-access-keys").is_ok());
    }
}

use std::fmt;

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use inquire::{InquireError, Password, PasswordDisplayMode, Select};

use crate::auth::KEY_PREFIX;
use crate::store::Store;
use crate::types::names::validate_username;
use crate::types::{AccessKey, User};

/// User wrapper for picker display
pub struct UserDisplay(pub User);

impl fmt::Display for UserDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short_id = self.0.id.get(..8).unwrap_or(&self.0.id);
        write!(f, "{} ({}...)", self.0.username, short_id)
    }
}

/// Access key with its owner's name for display
pub struct KeyDisplay {
    pub key: AccessKey,
    pub username: String,
}

impl fmt::Display for KeyDisplay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key = &self.key;
        write!(f, "{KEY_PREFIX}_{}_...  {}", key.lookup, self.username)?;
        if let Some(label) = &key.label {
            write!(f, "  \"{label}\"")?;
        }
        write!(f, "  {}", key.scope.as_deref().unwrap_or("all grants"))?;
        write!(f, "  created {}", format_relative_time(&key.created_at))?;
        match &key.last_used_at {
            Some(dt) => write!(f, "  used {}", format_relative_time(dt)),
            None => write!(f, "  never used"),
        }
    }
}

/// Key expiration option for picker
pub struct ExpirationOption {
    pub label: &'static str,
    pub days: Option<i64>,
}

impl fmt::Display for ExpirationOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label)
    }
}

/// Format a datetime as relative time (e.g., "2 days ago")
#[must_use]
pub fn format_relative_time(dt: &DateTime<Utc>) -> String {
    let diff = Utc::now().signed_duration_since(*dt);

    let plural = |n: i64, unit: &str| {
        if n == 1 {
            format!("1 {unit} ago")
        } else {
            format!("{n} {unit}s ago")
        }
    };

    if diff.num_seconds() < 0 {
        "in the future".to_string()
    } else if diff.num_seconds() < 60 {
        "just now".to_string()
    } else if diff.num_minutes() < 60 {
        plural(diff.num_minutes(), "minute")
    } else if diff.num_hours() < 24 {
        plural(diff.num_hours(), "hour")
    } else if diff.num_days() < 30 {
        plural(diff.num_days(), "day")
    } else if diff.num_days() < 365 {
        plural(diff.num_days() / 30, "month")
    } else {
        plural(diff.num_days() / 365, "year")
    }
}

/// Load access keys with their owners' names, optionally for one user only
pub fn list_keys(store: &impl Store, owner: Option<&User>) -> anyhow::Result<Vec<KeyDisplay>> {
    let usernames: HashMap<String, String> = match owner {
        Some(user) => HashMap::from([(user.id.clone(), user.username.clone())]),
        None => store
            .list_users()?
            .into_iter()
            .map(|u| (u.id, u.username))
            .collect(),
    };

    let keys = store.list_access_keys(owner.map(|u| u.id.as_str()))?;
    keys.into_iter()
        .map(|key| {
            let username = usernames
                .get(&key.user_id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("Access key {} has no owner", key.id))?;
            Ok(KeyDisplay { key, username })
        })
        .collect()
}

/// Pick a user from the list
pub fn pick_user(store: &impl Store) -> anyhow::Result<Option<User>> {
    let users: Vec<UserDisplay> = store.list_users()?.into_iter().map(UserDisplay).collect();

    if users.is_empty() {
        println!("No users found.");
        return Ok(None);
    }

    let selection = Select::new("Select user:", users)
        .with_page_size(15)
        .with_help_message("Type to filter, Enter to select")
        .with_vim_mode(true)
        .prompt();

    match selection {
        Ok(display) => Ok(Some(display.0)),
        Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Pick an access key from the list
pub fn pick_key(store: &impl Store) -> anyhow::Result<Option<KeyDisplay>> {
    let keys = list_keys(store, None)?;

    if keys.is_empty() {
        println!("No access keys found.");
        return Ok(None);
    }

    let selection = Select::new("Select access key:", keys)
        .with_page_size(15)
        .with_help_message("Type to filter, Enter to select")
        .with_vim_mode(true)
        .prompt();

    match selection {
        Ok(display) => Ok(Some(display)),
        Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Pick key expiration
pub fn pick_expiration() -> anyhow::Result<Option<Option<Duration>>> {
    let options = vec![
        ExpirationOption {
            label: "30 days",
            days: Some(30),
        },
        ExpirationOption {
            label: "90 days",
            days: Some(90),
        },
        ExpirationOption {
            label: "1 year",
            days: Some(365),
        },
        ExpirationOption {
            label: "Never",
            days: None,
        },
    ];

    let selection = Select::new("Key expiration:", options)
        .with_page_size(4)
        .with_vim_mode(true)
        .prompt();

    match selection {
        Ok(opt) => Ok(Some(opt.days.map(Duration::days))),
        Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Prompt for a new password with confirmation. Returns None if cancelled.
pub fn prompt_new_password() -> anyhow::Result<Option<String>> {
    let result = Password::new("Password:")
        .with_display_mode(PasswordDisplayMode::Masked)
        .with_custom_confirmation_message("Confirm password:")
        .with_validator(|input: &str| {
            if input.is_empty() {
                Ok(inquire::validator::Validation::Invalid(
                    "Password cannot be empty".into(),
                ))
            } else {
                Ok(inquire::validator::Validation::Valid)
            }
        })
        .prompt();

    match result {
        Ok(password) => Ok(Some(password)),
        Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Get a user by username or interactively pick one
pub fn get_or_pick_user(
    store: &impl Store,
    username: Option<String>,
    non_interactive: bool,
) -> anyhow::Result<Option<User>> {
    if let Some(name) = username {
        validate_username(&name).map_err(anyhow::Error::msg)?;
        let user = store
            .get_user_by_username(&name)?
            .ok_or_else(|| anyhow::anyhow!("User not found: {}", name))?;
        Ok(Some(user))
    } else if non_interactive {
        anyhow::bail!("--username is required in non-interactive mode");
    } else {
        pick_user(store)
    }
}

/// Request confirmation for a destructive operation
pub fn confirm_action(message: &str, yes: bool, non_interactive: bool) -> anyhow::Result<bool> {
    if yes {
        Ok(true)
    } else if non_interactive {
        anyhow::bail!("--yes is required for destructive operations in non-interactive mode");
    } else {
        Ok(inquire::Confirm::new(message)
            .with_default(false)
            .prompt()?)
    }
}

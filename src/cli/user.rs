use chrono::{DateTime, SubsecRound, Utc};
use inquire::{Confirm, Text};
use serde::Serialize;
use uuid::Uuid;

use crate::auth::{KeySpec, SecretHasher, issue_access_key};
use crate::store::Store;
use crate::types::User;
use crate::types::names::validate_username;

use super::init_store;
use super::pickers::{
    confirm_action, format_relative_time, get_or_pick_user, pick_expiration, prompt_new_password,
};

#[derive(Serialize)]
struct UserOutput {
    id: String,
    username: String,
    has_password: bool,
    access_keys: usize,
    grants: usize,
    created_at: DateTime<Utc>,
}

pub fn run_user_add(
    data_dir: String,
    username: Option<String>,
    password: Option<String>,
    create_key: bool,
    non_interactive: bool,
) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;

    let username = if let Some(name) = username {
        validate_username(&name).map_err(anyhow::Error::msg)?;
        name
    } else if non_interactive {
        anyhow::bail!("--username is required in non-interactive mode");
    } else {
        Text::new("Username:")
            .with_validator(|input: &str| {
                Ok(validate_username(input)
                    .map(|()| inquire::validator::Validation::Valid)
                    .unwrap_or_else(|e| inquire::validator::Validation::Invalid(e.into())))
            })
            .prompt()?
    };

    if store.get_user_by_username(&username)?.is_some() {
        anyhow::bail!("User '{}' already exists", username);
    }

    let password = match password {
        Some(p) if p.is_empty() => anyhow::bail!("--password cannot be empty"),
        Some(p) => Some(p),
        None if non_interactive => None,
        None => {
            if Confirm::new("Set a password for basic authentication?")
                .with_default(false)
                .prompt()?
            {
                prompt_new_password()?
            } else {
                None
            }
        }
    };

    let hasher = SecretHasher::new();
    let password_hash = password.map(|p| hasher.hash(&p)).transpose()?;

    let now = Utc::now().trunc_subsecs(6);
    let user = User {
        id: Uuid::new_v4().to_string(),
        username: username.clone(),
        password_hash,
        created_at: now,
        updated_at: now,
    };
    store.create_user(&user)?;

    println!();
    println!("Created user \"{}\"", username);

    let should_create_key = if create_key {
        true
    } else if non_interactive {
        false
    } else {
        Confirm::new("Issue an access key?")
            .with_default(true)
            .prompt()?
    };

    if should_create_key {
        let expires_in = if non_interactive {
            None
        } else {
            match pick_expiration()? {
                Some(exp) => exp,
                None => {
                    println!("Access key not issued.");
                    return Ok(());
                }
            }
        };

        let spec = KeySpec {
            expires_in,
            ..KeySpec::default()
        };
        let (_, raw) = issue_access_key(&store, &hasher, &user, &spec)?;

        println!();
        println!("Access key created: {raw}");
        println!("  Save this now - it cannot be retrieved later.");
    }

    println!();

    Ok(())
}

pub fn run_user_remove(
    data_dir: String,
    username: Option<String>,
    non_interactive: bool,
    yes: bool,
) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;

    let Some(user) = get_or_pick_user(&store, username, non_interactive)? else {
        return Ok(());
    };

    let confirmed = confirm_action(
        &format!(
            "Delete user '{}'? This will also delete their access keys and grants.",
            user.username
        ),
        yes,
        non_interactive,
    )?;

    if !confirmed {
        println!("Cancelled.");
        return Ok(());
    }

    // Keys and grants cascade with the user row
    store.delete_user(&user.id)?;

    println!();
    println!("Deleted user '{}'", user.username);
    println!();

    Ok(())
}

pub fn run_user_set_password(
    data_dir: String,
    username: Option<String>,
    password: Option<String>,
    clear: bool,
    non_interactive: bool,
) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;

    let Some(user) = get_or_pick_user(&store, username, non_interactive)? else {
        return Ok(());
    };

    let password_hash = if clear {
        None
    } else {
        let password = match password {
            Some(p) if p.is_empty() => anyhow::bail!("--password cannot be empty"),
            Some(p) => p,
            None if non_interactive => {
                anyhow::bail!("--password or --clear is required in non-interactive mode")
            }
            None => match prompt_new_password()? {
                Some(p) => p,
                None => {
                    println!("Cancelled.");
                    return Ok(());
                }
            },
        };
        Some(SecretHasher::new().hash(&password)?)
    };

    store.set_user_password(&user.id, password_hash.as_deref())?;

    println!();
    if clear {
        println!("Cleared password for '{}'", user.username);
    } else {
        println!("Updated password for '{}'", user.username);
    }
    println!();

    Ok(())
}

pub fn run_user_list(data_dir: String, json: bool) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;

    let mut outputs = Vec::new();
    for user in store.list_users()? {
        outputs.push(UserOutput {
            access_keys: store.list_access_keys(Some(&user.id))?.len(),
            grants: store.list_user_grants(&user.id)?.len(),
            has_password: user.password_hash.is_some(),
            created_at: user.created_at,
            id: user.id,
            username: user.username,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
        return Ok(());
    }

    if outputs.is_empty() {
        println!("No users found.");
        return Ok(());
    }

    println!();
    for user in &outputs {
        println!(
            "  {:<24} {} key(s)  {} grant(s)  {}  created {}",
            user.username,
            user.access_keys,
            user.grants,
            if user.has_password { "password" } else { "key-only" },
            format_relative_time(&user.created_at)
        );
    }
    println!();

    Ok(())
}

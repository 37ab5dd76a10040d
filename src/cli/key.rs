use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::auth::{KEY_PREFIX, KeySpec, SecretHasher, issue_access_key};
use crate::store::Store;
use crate::types::GrantExpression;

use super::init_store;
use super::pickers::{
    KeyDisplay, confirm_action, get_or_pick_user, list_keys, pick_expiration, pick_key,
};

#[derive(Serialize)]
struct KeyOutput {
    id: String,
    lookup: String,
    username: String,
    label: Option<String>,
    scope: Option<String>,
    created_at: DateTime<Utc>,
    expires_at: Option<DateTime<Utc>>,
    last_used_at: Option<DateTime<Utc>>,
}

impl From<KeyDisplay> for KeyOutput {
    fn from(display: KeyDisplay) -> Self {
        let key = display.key;
        Self {
            id: key.id,
            lookup: key.lookup,
            username: display.username,
            label: key.label,
            scope: key.scope,
            created_at: key.created_at,
            expires_at: key.expires_at,
            last_used_at: key.last_used_at,
        }
    }
}

pub fn run_key_list(data_dir: String, username: Option<String>, json: bool) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;

    let owner = match username {
        Some(name) => get_or_pick_user(&store, Some(name), true)?,
        None => None,
    };
    let keys = list_keys(&store, owner.as_ref())?;

    if json {
        let output: Vec<KeyOutput> = keys.into_iter().map(KeyOutput::from).collect();
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if keys.is_empty() {
        println!("No access keys found.");
        return Ok(());
    }
    println!();
    for key in &keys {
        println!("  {}  {}", key, key.key.id);
    }
    println!();

    Ok(())
}

pub fn run_key_create(
    data_dir: String,
    username: Option<String>,
    label: Option<String>,
    scope: Option<String>,
    expires_days: Option<u32>,
    non_interactive: bool,
) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;

    // Reject a bad expression before any prompt runs.
    let scope = scope
        .map(|s| s.parse::<GrantExpression>())
        .transpose()
        .map_err(anyhow::Error::msg)?;

    let Some(user) = get_or_pick_user(&store, username, non_interactive)? else {
        return Ok(());
    };

    let expires_in = if let Some(days) = expires_days {
        Some(Duration::days(i64::from(days)))
    } else if non_interactive {
        None
    } else {
        match pick_expiration()? {
            Some(exp) => exp,
            None => {
                println!("Cancelled.");
                return Ok(());
            }
        }
    };

    let spec = KeySpec {
        label,
        scope,
        expires_in,
    };
    let (key, raw) = issue_access_key(&store, &SecretHasher::new(), &user, &spec)?;

    println!();
    println!("Access key created for '{}': {raw}", user.username);
    if let Some(scope) = &key.scope {
        println!("  Limited to: {scope}");
    }
    println!("  Save this now - it cannot be retrieved later.");
    println!();

    Ok(())
}

pub fn run_key_revoke(
    data_dir: String,
    key_id: Option<String>,
    non_interactive: bool,
    yes: bool,
) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;

    let (key, username) = if let Some(id) = key_id {
        let key = store
            .get_access_key(&id)?
            .ok_or_else(|| anyhow::anyhow!("Access key not found: {}", id))?;
        let owner = store
            .get_user(&key.user_id)?
            .ok_or_else(|| anyhow::anyhow!("Access key {} has no owner", key.id))?;
        (key, owner.username)
    } else if non_interactive {
        anyhow::bail!("--id is required in non-interactive mode");
    } else {
        match pick_key(&store)? {
            Some(display) => (display.key, display.username),
            None => return Ok(()),
        }
    };

    let confirmed = confirm_action(
        &format!(
            "Revoke access key {KEY_PREFIX}_{}_... of user '{}'?",
            key.lookup, username
        ),
        yes,
        non_interactive,
    )?;

    if !confirmed {
        println!("Cancelled.");
        return Ok(());
    }

    store.delete_access_key(&key.id)?;

    println!();
    println!("Access key revoked.");
    println!();

    Ok(())
}

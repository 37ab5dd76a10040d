use inquire::Text;
use serde::Serialize;

use crate::store::Store;
use crate::types::GrantExpression;

use super::init_store;
use super::pickers::{confirm_action, get_or_pick_user};

#[derive(Serialize)]
struct GrantOutput {
    username: String,
    user_id: String,
    scopes: Vec<String>,
}

/// Parse `--scope` or prompt for it, validating the expression as it is typed.
fn get_or_prompt_expression(
    scope: Option<String>,
    non_interactive: bool,
) -> anyhow::Result<GrantExpression> {
    if let Some(raw) = scope {
        return Ok(raw.parse()?);
    }
    if non_interactive {
        anyhow::bail!("--scope is required in non-interactive mode");
    }

    let raw = Text::new("Scope:")
        .with_help_message("[module[.branch].]token, e.g. mirai-core.dev.index or *.*.index-read")
        .with_validator(|input: &str| {
            Ok(match input.parse::<GrantExpression>() {
                Ok(_) => inquire::validator::Validation::Valid,
                Err(e) => inquire::validator::Validation::Invalid(e.to_string().into()),
            })
        })
        .prompt()?;

    Ok(raw.parse()?)
}

pub fn run_permission_grant(
    data_dir: String,
    username: Option<String>,
    scope: Option<String>,
    non_interactive: bool,
) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;

    let Some(user) = get_or_pick_user(&store, username, non_interactive)? else {
        return Ok(());
    };

    let expression = get_or_prompt_expression(scope, non_interactive)?;
    let scopes = expression.scopes()?;
    let added = store.grant_scopes(&user.id, &scopes)?;

    println!();
    println!(
        "Granted '{}' to {} ({} new scope(s)):",
        expression, user.username, added
    );
    for scope in &scopes {
        println!("  {scope}");
    }
    println!();

    Ok(())
}

pub fn run_permission_revoke(
    data_dir: String,
    username: Option<String>,
    scope: Option<String>,
    non_interactive: bool,
    yes: bool,
) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;

    let Some(user) = get_or_pick_user(&store, username, non_interactive)? else {
        return Ok(());
    };

    let expression = get_or_prompt_expression(scope, non_interactive)?;
    let scopes = expression.scopes()?;

    let confirmed = confirm_action(
        &format!("Revoke '{}' from {}?", expression, user.username),
        yes,
        non_interactive,
    )?;

    if !confirmed {
        println!("Cancelled.");
        return Ok(());
    }

    let removed = store.revoke_scopes(&user.id, &scopes)?;

    println!();
    println!(
        "Revoked '{}' from {} ({} scope(s) removed)",
        expression, user.username, removed
    );
    println!();

    Ok(())
}

pub fn run_permission_list(
    data_dir: String,
    username: Option<String>,
    json: bool,
) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;

    let users = match username {
        Some(name) => vec![
            get_or_pick_user(&store, Some(name), true)?
                .ok_or_else(|| anyhow::anyhow!("User not found"))?,
        ],
        None => store.list_users()?,
    };

    let mut outputs = Vec::with_capacity(users.len());
    for user in users {
        let scopes: Vec<String> = store
            .list_user_grants(&user.id)?
            .into_iter()
            .map(|g| g.scope)
            .collect();
        if scopes.is_empty() {
            continue;
        }
        outputs.push(GrantOutput {
            username: user.username,
            user_id: user.id,
            scopes,
        });
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&outputs)?);
        return Ok(());
    }

    if outputs.is_empty() {
        println!("No grants found.");
        return Ok(());
    }

    println!();
    for output in &outputs {
        println!("  {}", output.username);
        for scope in &output.scopes {
            println!("    {scope}");
        }
    }
    println!();

    Ok(())
}

use std::fs;
use std::sync::Arc;

use anyhow::bail;
use chrono::{SubsecRound, Utc};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use buildindex::auth::{KeySpec, SecretHasher, issue_access_key};
use buildindex::cli::{
    AdminCommands, BranchCommands, IndexCommands, KeyCommands, ModuleCommands, PermissionCommands,
    UserCommands, pickers::prompt_new_password, run_branch_add, run_index_latest, run_index_next,
    run_info, run_key_create, run_key_list, run_key_revoke, run_module_add, run_module_list,
    run_permission_grant, run_permission_list, run_permission_revoke, run_user_add,
    run_user_list, run_user_remove, run_user_set_password,
};
use buildindex::config::ServerConfig;
use buildindex::server::{AppState, create_router};
use buildindex::store::{SqliteStore, Store};
use buildindex::types::User;
use buildindex::types::names::validate_username;

#[cfg(unix)]
fn set_restrictive_permissions(path: &std::path::Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = fs::set_permissions(path, fs::Permissions::from_mode(0o600)) {
        tracing::warn!("Failed to set permissions on {}: {e}", path.display());
    }
}

#[derive(Parser)]
#[command(name = "buildindex")]
#[command(about = "Gap-free build index allocation per module branch", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Administrative commands
    Admin {
        #[command(subcommand)]
        command: AdminCommands,
    },

    /// Allocate or query build indexes on a running server
    Index {
        #[command(subcommand)]
        command: IndexCommands,
    },

    /// Start the server
    Serve {
        /// Host to bind to (overrides the config file)
        #[arg(long)]
        host: Option<String>,

        /// Port to bind to (overrides the config file)
        #[arg(long, short)]
        port: Option<u16>,

        /// Data directory for the database and config file
        #[arg(long, default_value = "./data")]
        data_dir: String,
    },
}

fn run_init(data_dir: String, non_interactive: bool) -> anyhow::Result<()> {
    let config = ServerConfig::load(data_dir, None, None)?;
    let db_path = config.db_path();

    if db_path.exists() {
        bail!("Server already initialized. Database exists at: {}", db_path.display());
    }

    fs::create_dir_all(&config.data_dir)?;
    let store = SqliteStore::with_busy_timeout(&db_path, config.busy_timeout())?;
    store.initialize()?;

    #[cfg(unix)]
    set_restrictive_permissions(&db_path);

    println!();
    println!("Initialized database at {}", db_path.display());
    println!("Add users with 'buildindex admin user add'.");
    println!();

    if !non_interactive {
        create_default_user_prompt(&store)?;
    }

    Ok(())
}

fn create_default_user_prompt(store: &SqliteStore) -> anyhow::Result<()> {
    let create_user = inquire::Confirm::new("Would you like to create a default user?")
        .with_default(false)
        .prompt()?;

    if !create_user {
        return Ok(());
    }

    let username = inquire::Text::new("Username:")
        .with_validator(|input: &str| {
            Ok(match validate_username(input) {
                Ok(()) => inquire::validator::Validation::Valid,
                Err(e) => inquire::validator::Validation::Invalid(e.into()),
            })
        })
        .prompt()?;

    let hasher = SecretHasher::new();
    let password_hash = if inquire::Confirm::new("Set a password for basic authentication?")
        .with_default(false)
        .prompt()?
    {
        prompt_new_password()?
            .map(|p| hasher.hash(&p))
            .transpose()?
    } else {
        None
    };

    let now = Utc::now().trunc_subsecs(6);
    let user = User {
        id: Uuid::new_v4().to_string(),
        username: username.clone(),
        password_hash,
        created_at: now,
        updated_at: now,
    };
    store.create_user(&user)?;

    let (_, raw) = issue_access_key(store, &hasher, &user, &KeySpec::default())?;

    println!();
    println!("========================================");
    println!("Created user '{username}' with access key:");
    println!();
    println!("  {raw}");
    println!();
    println!("Grant scopes with 'buildindex admin permission grant'.");
    println!("========================================");
    println!();

    Ok(())
}

fn run_admin(command: AdminCommands) -> anyhow::Result<()> {
    match command {
        AdminCommands::Init {
            data_dir,
            non_interactive,
        } => run_init(data_dir, non_interactive),
        AdminCommands::User { command } => match command {
            UserCommands::Add {
                data_dir,
                username,
                password,
                create_key,
                non_interactive,
            } => run_user_add(data_dir, username, password, create_key, non_interactive),
            UserCommands::Remove {
                data_dir,
                username,
                non_interactive,
                yes,
            } => run_user_remove(data_dir, username, non_interactive, yes),
            UserCommands::SetPassword {
                data_dir,
                username,
                password,
                clear,
                non_interactive,
            } => run_user_set_password(data_dir, username, password, clear, non_interactive),
            UserCommands::List { data_dir, json } => run_user_list(data_dir, json),
        },
        AdminCommands::Key { command } => match command {
            KeyCommands::Create {
                data_dir,
                username,
                label,
                scope,
                expires_days,
                non_interactive,
            } => run_key_create(data_dir, username, label, scope, expires_days, non_interactive),
            KeyCommands::Revoke {
                data_dir,
                id,
                non_interactive,
                yes,
            } => run_key_revoke(data_dir, id, non_interactive, yes),
            KeyCommands::List {
                data_dir,
                username,
                json,
            } => run_key_list(data_dir, username, json),
        },
        AdminCommands::Permission { command } => match command {
            PermissionCommands::Grant {
                data_dir,
                username,
                scope,
                non_interactive,
            } => run_permission_grant(data_dir, username, scope, non_interactive),
            PermissionCommands::Revoke {
                data_dir,
                username,
                scope,
                non_interactive,
                yes,
            } => run_permission_revoke(data_dir, username, scope, non_interactive, yes),
            PermissionCommands::List {
                data_dir,
                username,
                json,
            } => run_permission_list(data_dir, username, json),
        },
        AdminCommands::Module { command } => match command {
            ModuleCommands::Add { data_dir, name } => run_module_add(data_dir, name),
            ModuleCommands::List { data_dir, json } => run_module_list(data_dir, json),
        },
        AdminCommands::Branch { command } => match command {
            BranchCommands::Add {
                data_dir,
                module,
                name,
            } => run_branch_add(data_dir, module, name),
        },
        AdminCommands::Info { data_dir, json } => run_info(data_dir, json),
    }
}

async fn serve(host: Option<String>, port: Option<u16>, data_dir: String) -> anyhow::Result<()> {
    let config = ServerConfig::load(data_dir, host, port)?;

    if !config.db_path().exists() {
        bail!("Server not initialized. Run 'buildindex admin init' first.");
    }

    let store = SqliteStore::with_busy_timeout(config.db_path(), config.busy_timeout())?;
    store.initialize()?;

    let state = Arc::new(
        AppState::new(Arc::new(store), config.data_dir.clone())
            .with_max_allocation_attempts(config.max_allocation_attempts),
    );

    let app = create_router(state);
    let addr = config.socket_addr()?;

    info!(
        busy_timeout_ms = config.busy_timeout_ms,
        max_allocation_attempts = config.max_allocation_attempts,
        "Starting server on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("buildindex=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Admin { command } => run_admin(command)?,
        Commands::Index { command } => match command {
            IndexCommands::Next { target, commit_ref } => run_index_next(target, commit_ref)?,
            IndexCommands::Latest { target } => run_index_latest(target)?,
        },
        Commands::Serve {
            host,
            port,
            data_dir,
        } => {
            // reqwest::blocking must not run inside a runtime
            tokio::runtime::Runtime::new()?.block_on(serve(host, port, data_dir))?;
        }
    }

    Ok(())
}

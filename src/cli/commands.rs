use clap::Subcommand;

#[derive(Subcommand)]
pub enum AdminCommands {
    /// Initialize the data directory and its database
    Init {
        /// Data directory for the database and config file
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Skip interactive prompts
        #[arg(long)]
        non_interactive: bool,
    },

    /// Manage users
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// Manage access keys for CI clients
    Key {
        #[command(subcommand)]
        command: KeyCommands,
    },

    /// Manage permission grants
    Permission {
        #[command(subcommand)]
        command: PermissionCommands,
    },

    /// Manage modules
    Module {
        #[command(subcommand)]
        command: ModuleCommands,
    },

    /// Manage branches
    Branch {
        #[command(subcommand)]
        command: BranchCommands,
    },

    /// Show server status information
    Info {
        /// Data directory for the database and config file
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum UserCommands {
    /// Add a new user with an optional password and access key
    Add {
        /// Data directory for the database and config file
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Username for the new user
        #[arg(long)]
        username: Option<String>,

        /// Password for basic authentication (omit for a key-only user)
        #[arg(long)]
        password: Option<String>,

        /// Issue an unscoped access key for the new user
        #[arg(long)]
        create_key: bool,

        /// Skip interactive prompts (requires --username)
        #[arg(long)]
        non_interactive: bool,
    },

    /// Remove a user along with their access keys and grants
    Remove {
        /// Data directory for the database and config file
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Username to remove
        #[arg(long)]
        username: Option<String>,

        /// Skip interactive prompts (requires --username)
        #[arg(long)]
        non_interactive: bool,

        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Set or clear a user's password
    SetPassword {
        /// Data directory for the database and config file
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Username to update
        #[arg(long)]
        username: Option<String>,

        /// New password
        #[arg(long, conflicts_with = "clear")]
        password: Option<String>,

        /// Remove the password so the user can only authenticate with access keys
        #[arg(long)]
        clear: bool,

        /// Skip interactive prompts (requires --username and --password or --clear)
        #[arg(long)]
        non_interactive: bool,
    },

    /// List users
    List {
        /// Data directory for the database and config file
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum KeyCommands {
    /// Issue an access key for a CI client
    Create {
        /// Data directory for the database and config file
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Owner of the key
        #[arg(long)]
        username: Option<String>,

        /// Label shown in listings, such as the CI job name
        #[arg(long)]
        label: Option<String>,

        /// Narrow the key to one grant expression, e.g. `mirai-core.*.index-next`
        #[arg(long)]
        scope: Option<String>,

        /// Expire the key after this many days (omit for no expiration)
        #[arg(long, value_parser = clap::value_parser!(u32).range(1..))]
        expires_days: Option<u32>,

        /// Skip interactive prompts (requires --username)
        #[arg(long)]
        non_interactive: bool,
    },

    /// Revoke an access key
    Revoke {
        /// Data directory for the database and config file
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// ID of the key to revoke
        #[arg(long)]
        id: Option<String>,

        /// Skip interactive prompts (requires --id)
        #[arg(long)]
        non_interactive: bool,

        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// List access keys
    List {
        /// Data directory for the database and config file
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Only show keys owned by this user
        #[arg(long)]
        username: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum PermissionCommands {
    /// Grant a scope expression such as `mirai-core.dev.index`
    Grant {
        /// Data directory for the database and config file
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// User to grant to
        #[arg(long)]
        username: Option<String>,

        /// Grant expression: [module[.branch].]token
        #[arg(long)]
        scope: Option<String>,

        /// Skip interactive prompts (requires --username and --scope)
        #[arg(long)]
        non_interactive: bool,
    },

    /// Revoke every leaf scope a grant expression resolves to
    Revoke {
        /// Data directory for the database and config file
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// User to revoke from
        #[arg(long)]
        username: Option<String>,

        /// Grant expression: [module[.branch].]token
        #[arg(long)]
        scope: Option<String>,

        /// Skip interactive prompts (requires --username and --scope)
        #[arg(long)]
        non_interactive: bool,

        /// Skip confirmation prompt
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// List granted scopes
    List {
        /// Data directory for the database and config file
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Only show grants for this user
        #[arg(long)]
        username: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum ModuleCommands {
    /// Add a module
    Add {
        /// Data directory for the database and config file
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Module name
        #[arg(long)]
        name: String,
    },

    /// List modules
    List {
        /// Data directory for the database and config file
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum BranchCommands {
    /// Add a branch to an existing module
    Add {
        /// Data directory for the database and config file
        #[arg(long, default_value = "./data")]
        data_dir: String,

        /// Owning module
        #[arg(long)]
        module: String,

        /// Branch name
        #[arg(long)]
        name: String,
    },
}

#[derive(Subcommand)]
pub enum IndexCommands {
    /// Allocate the next build index for a commit
    Next {
        #[command(flatten)]
        target: IndexTarget,

        /// 40 character commit hash
        #[arg(long)]
        commit_ref: String,
    },

    /// Show the latest build index
    Latest {
        #[command(flatten)]
        target: IndexTarget,
    },
}

#[derive(clap::Args)]
pub struct IndexTarget {
    /// Server base URL
    #[arg(long, env = "BUILDINDEX_SERVER", default_value = "http://127.0.0.1:5932")]
    pub server: String,

    /// Access key issued with `buildindex admin key create`
    #[arg(long = "key", env = "BUILDINDEX_KEY", hide_env_values = true)]
    pub access_key: String,

    /// Module name
    #[arg(long)]
    pub module: String,

    /// Branch name
    #[arg(long)]
    pub branch: String,
}

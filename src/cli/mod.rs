mod commands;
pub mod http_client;
mod index;
mod info;
mod key;
mod module;
mod permission;
pub mod pickers;
mod user;

pub use commands::{
    AdminCommands, BranchCommands, IndexCommands, IndexTarget, KeyCommands, ModuleCommands,
    PermissionCommands, UserCommands,
};
pub use index::{run_index_latest, run_index_next};
pub use info::run_info;
pub use key::{run_key_create, run_key_list, run_key_revoke};
pub use module::{run_branch_add, run_module_add, run_module_list};
pub use permission::{run_permission_grant, run_permission_list, run_permission_revoke};
pub use user::{run_user_add, run_user_list, run_user_remove, run_user_set_password};

use crate::config::ServerConfig;
use crate::store::SqliteStore;

/// Open the store in an initialized data directory
pub fn init_store(data_dir: &str) -> anyhow::Result<SqliteStore> {
    let config = ServerConfig::load(data_dir, None, None)?;
    let db_path = config.db_path();

    if !db_path.exists() {
        anyhow::bail!(
            "Database not found at {}. Run 'buildindex admin init' first.",
            db_path.display()
        );
    }

    SqliteStore::with_busy_timeout(&db_path, config.busy_timeout()).map_err(Into::into)
}

use serde::Serialize;

use crate::store::{Store, StoreStats};

use super::init_store;

#[derive(Serialize)]
struct ServerInfo {
    data_dir: String,
    #[serde(flatten)]
    stats: StoreStats,
}

pub fn run_info(data_dir: String, json: bool) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;

    let info = ServerInfo {
        stats: store.stats()?,
        data_dir,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&info)?);
        return Ok(());
    }

    let stats = &info.stats;
    println!();
    println!("Data directory: {}", info.data_dir);
    println!();
    println!("  Users:        {}", stats.users);
    println!("  Access keys:  {}", stats.access_keys);
    println!("  Grants:       {}", stats.grants);
    println!("  Modules:      {}", stats.modules);
    println!("  Branches:     {}", stats.branches);
    println!("  Indexes:      {}", stats.indexes);
    println!();

    Ok(())
}

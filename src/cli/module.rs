use chrono::{SubsecRound, Utc};
use uuid::Uuid;

use crate::error::Error;
use crate::store::Store;
use crate::types::names::{validate_branch_name, validate_module_name};
use crate::types::{Branch, Module};

use super::init_store;
use super::pickers::format_relative_time;

pub fn run_module_add(data_dir: String, name: String) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;
    validate_module_name(&name).map_err(anyhow::Error::msg)?;

    let module = Module {
        id: Uuid::new_v4().to_string(),
        name,
        created_at: Utc::now().trunc_subsecs(6),
    };

    match store.create_module(&module) {
        Ok(()) => {}
        Err(Error::AlreadyExists) => anyhow::bail!("Module '{}' already exists", module.name),
        Err(e) => return Err(e.into()),
    }

    println!();
    println!("Created module \"{}\"", module.name);
    println!();

    Ok(())
}

pub fn run_module_list(data_dir: String, json: bool) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;
    let modules = store.list_modules()?;

    if json {
        println!("{}", serde_json::to_string_pretty(&modules)?);
        return Ok(());
    }

    if modules.is_empty() {
        println!("No modules found.");
        return Ok(());
    }

    println!();
    for module in &modules {
        let branches = store.list_branches(&module.name)?;
        println!(
            "  {:<32} {} branch(es)  created {}",
            module.name,
            branches.len(),
            format_relative_time(&module.created_at)
        );
        for branch in &branches {
            println!("    {}", branch.name);
        }
    }
    println!();

    Ok(())
}

pub fn run_branch_add(data_dir: String, module_name: String, name: String) -> anyhow::Result<()> {
    let store = init_store(&data_dir)?;
    validate_module_name(&module_name).map_err(anyhow::Error::msg)?;
    validate_branch_name(&name).map_err(anyhow::Error::msg)?;

    let module = store
        .get_module_by_name(&module_name)?
        .ok_or_else(|| anyhow::anyhow!("Module not found: {}", module_name))?;

    let branch = Branch {
        id: Uuid::new_v4().to_string(),
        module_id: module.id,
        module_name: module.name,
        name,
        latest_index_id: None,
        created_at: Utc::now().trunc_subsecs(6),
    };

    match store.create_branch(&branch) {
        Ok(()) => {}
        Err(Error::AlreadyExists) => anyhow::bail!(
            "Branch '{}' already exists in module '{}'",
            branch.name,
            branch.module_name
        ),
        Err(e) => return Err(e.into()),
    }

    println!();
    println!("Created branch \"{}.{}\"", branch.module_name, branch.name);
    println!();

    Ok(())
}

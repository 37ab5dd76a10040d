use crate::allocator::validate_commit_ref;
use crate::types::{Allocation, Index};

use super::commands::IndexTarget;
use super::http_client::ApiClient;

fn branch_url(
    client: &ApiClient,
    target: &IndexTarget,
    last: &str,
) -> anyhow::Result<reqwest::Url> {
    client.url(&[
        "modules",
        &target.module,
        "branches",
        &target.branch,
        "indexes",
        last,
    ])
}

/// Allocates the next index for `commit_ref` and prints the allocation as JSON.
pub fn run_index_next(target: IndexTarget, commit_ref: String) -> anyhow::Result<()> {
    validate_commit_ref(&commit_ref)?;

    let client = ApiClient::new(&target.server, &target.access_key)?;
    let mut url = branch_url(&client, &target, "next")?;
    url.query_pairs_mut().append_pair("commit_ref", &commit_ref);

    let allocation: Allocation = client.post(url)?;
    println!("{}", serde_json::to_string_pretty(&allocation)?);

    Ok(())
}

/// Prints the latest index as JSON, or `null` if the branch has none yet.
pub fn run_index_latest(target: IndexTarget) -> anyhow::Result<()> {
    let client = ApiClient::new(&target.server, &target.access_key)?;
    let url = branch_url(&client, &target, "latest")?;

    let latest: Option<Index> = client.get_optional(url)?;
    println!("{}", serde_json::to_string_pretty(&latest)?);

    Ok(())
}

//! CLI integration tests for buildindex admin and index commands.
//!
//! Each test uses an isolated temp directory for the database, ensuring tests
//! can run in parallel safely.

#![allow(deprecated)] // Command::cargo_bin deprecation only affects custom build dirs

use std::path::Path;
use std::sync::Arc;

use assert_cmd::Command;
use assert_fs::TempDir;
use assert_fs::prelude::*;
use buildindex::server::{AppState, create_router};
use buildindex::store::{SqliteStore, Store};
use predicates::prelude::*;
use serde_json::Value;

struct TestContext {
    temp_dir: TempDir,
}

impl TestContext {
    fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("failed to create temp dir"),
        }
    }

    fn data_dir(&self) -> &Path {
        self.temp_dir.path()
    }

    fn data_dir_str(&self) -> String {
        self.data_dir().to_string_lossy().to_string()
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::cargo_bin("buildindex").expect("failed to find binary");
        cmd.env("NO_COLOR", "1");
        cmd.env_remove("BUILDINDEX_SERVER");
        cmd.env_remove("BUILDINDEX_KEY");
        cmd
    }

    /// Runs `buildindex admin <args> --data-dir <dir>`.
    fn admin(&self, args: &[&str]) -> assert_cmd::assert::Assert {
        self.cmd()
            .arg("admin")
            .args(args)
            .args(["--data-dir", &self.data_dir_str()])
            .assert()
    }

    fn init(&self) -> assert_cmd::assert::Assert {
        self.admin(&["init", "--non-interactive"])
    }

    fn admin_json(&self, args: &[&str]) -> Value {
        let output = self
            .cmd()
            .arg("admin")
            .args(args)
            .args(["--data-dir", &self.data_dir_str(), "--json"])
            .output()
            .expect("failed to run command");
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
        serde_json::from_slice(&output.stdout).expect("failed to parse JSON")
    }

    fn add_user_with_key(&self, username: &str) -> String {
        let output = self
            .cmd()
            .args(["admin", "user", "add", "--data-dir", &self.data_dir_str()])
            .args(["--username", username, "--create-key", "--non-interactive"])
            .output()
            .expect("failed to run command");
        assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

        String::from_utf8_lossy(&output.stdout)
            .lines()
            .find_map(|line| line.strip_prefix("Access key created: "))
            .map(|k| k.trim().to_string())
            .expect("access key in output")
    }

    /// Serves the data directory from a background thread; returns the base URL.
    fn start_server(&self) -> String {
        let store = SqliteStore::new(self.data_dir().join("buildindex.db")).expect("open store");
        let state = Arc::new(AppState::new(Arc::new(store), self.data_dir().to_path_buf()));
        let app = create_router(state);

        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        listener.set_nonblocking(true).expect("nonblocking");
        let addr = listener.local_addr().expect("local addr");

        std::thread::spawn(move || {
            let runtime = tokio::runtime::Runtime::new().expect("runtime");
            runtime.block_on(async move {
                let listener = tokio::net::TcpListener::from_std(listener).expect("listener");
                axum::serve(listener, app).await.expect("serve");
            });
        });

        format!("http://{addr}")
    }
}

#[test]
fn test_init_creates_private_database() {
    let ctx = TestContext::new();

    ctx.init()
        .success()
        .stdout(predicate::str::contains("Initialized database"));

    ctx.temp_dir.child("buildindex.db").assert(predicate::path::exists());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(ctx.data_dir().join("buildindex.db"))
            .unwrap()
            .permissions()
            .mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

#[test]
fn test_init_twice_fails() {
    let ctx = TestContext::new();
    ctx.init().success();
    ctx.init()
        .failure()
        .stderr(predicate::str::contains("already initialized"));
}

#[test]
fn test_commands_require_init() {
    let ctx = TestContext::new();
    ctx.admin(&["user", "list"])
        .failure()
        .stderr(predicate::str::contains("buildindex admin init"));
}

#[test]
fn test_unknown_config_key_is_rejected() {
    let ctx = TestContext::new();
    ctx.init().success();
    ctx.temp_dir
        .child("buildindex.toml")
        .write_str("colour = \"blue\"\n")
        .unwrap();

    ctx.admin(&["info"])
        .failure()
        .stderr(predicate::str::contains("colour"));
}

#[test]
fn test_user_lifecycle() {
    let ctx = TestContext::new();
    ctx.init().success();

    ctx.admin(&[
        "user",
        "add",
        "--username",
        "alice",
        "--password",
        "s3cret",
        "--non-interactive",
    ])
    .success()
    .stdout(predicate::str::contains("Created user \"alice\""));

    ctx.admin(&["user", "add", "--username", "alice", "--non-interactive"])
        .failure()
        .stderr(predicate::str::contains("already exists"));

    ctx.admin(&["user", "add", "--username", "bad name", "--non-interactive"])
        .failure();

    ctx.admin(&["user", "add", "--username", "X-Access-Key", "--non-interactive"])
        .failure()
        .stderr(predicate::str::contains("reserved"));

    let users = ctx.admin_json(&["user", "list"]);
    assert_eq!(users.as_array().unwrap().len(), 1);
    assert_eq!(users[0]["username"], "alice");
    assert_eq!(users[0]["has_password"], true);

    ctx.admin(&[
        "user",
        "set-password",
        "--username",
        "alice",
        "--clear",
        "--non-interactive",
    ])
    .success();
    let users = ctx.admin_json(&["user", "list"]);
    assert_eq!(users[0]["has_password"], false);

    ctx.admin(&["user", "remove", "--username", "alice", "--non-interactive"])
        .failure()
        .stderr(predicate::str::contains("--yes"));

    ctx.admin(&[
        "user",
        "remove",
        "--username",
        "alice",
        "--non-interactive",
        "--yes",
    ])
    .success();

    let users = ctx.admin_json(&["user", "list"]);
    assert!(users.as_array().unwrap().is_empty());
}

#[test]
fn test_keys_are_listed_and_revoked() {
    let ctx = TestContext::new();
    ctx.init().success();
    let raw = ctx.add_user_with_key("ci");
    assert!(raw.starts_with("bidx_"));
    ctx.add_user_with_key("deploy");

    ctx.admin(&[
        "key",
        "create",
        "--username",
        "ci",
        "--label",
        "nightly",
        "--expires-days",
        "30",
        "--non-interactive",
    ])
    .success()
    .stdout(predicate::str::contains("Access key created for 'ci': bidx_"));

    let keys = ctx.admin_json(&["key", "list"]);
    assert_eq!(keys.as_array().unwrap().len(), 3);

    let keys = ctx.admin_json(&["key", "list", "--username", "ci"]);
    let keys = keys.as_array().unwrap();
    assert_eq!(keys.len(), 2);
    assert!(keys.iter().all(|k| k["username"] == "ci"));
    assert!(keys.iter().all(|k| k.get("secret_hash").is_none()));
    assert_eq!(
        keys.iter().filter(|k| k["expires_at"].is_string()).count(),
        1
    );

    let expiring = keys.iter().find(|k| k["label"] == "nightly").unwrap();
    assert!(expiring["expires_at"].is_string());
    let expiring = expiring["id"].as_str().unwrap().to_string();

    ctx.admin(&["key", "revoke", "--id", &expiring, "--non-interactive"])
        .failure()
        .stderr(predicate::str::contains("--yes"));

    ctx.admin(&[
        "key",
        "revoke",
        "--id",
        &expiring,
        "--non-interactive",
        "--yes",
    ])
    .success()
    .stdout(predicate::str::contains("Access key revoked"));

    let keys = ctx.admin_json(&["key", "list", "--username", "ci"]);
    assert_eq!(keys.as_array().unwrap().len(), 1);

    let users = ctx.admin_json(&["user", "list"]);
    let ci = users
        .as_array()
        .unwrap()
        .iter()
        .find(|u| u["username"] == "ci")
        .unwrap();
    assert_eq!(ci["access_keys"], 1);
}

#[test]
fn test_scoped_key_create() {
    let ctx = TestContext::new();
    ctx.init().success();
    ctx.add_user_with_key("ci");

    ctx.admin(&[
        "key",
        "create",
        "--username",
        "ci",
        "--scope",
        "test.*.index-next",
        "--non-interactive",
    ])
    .success()
    .stdout(predicate::str::contains("Limited to: test.*.index-next"));

    ctx.admin(&[
        "key",
        "create",
        "--username",
        "ci",
        "--scope",
        "test.index-next",
        "--non-interactive",
    ])
    .failure();

    ctx.admin(&[
        "key",
        "create",
        "--username",
        "ci",
        "--expires-days",
        "0",
        "--non-interactive",
    ])
    .failure();

    let keys = ctx.admin_json(&["key", "list"]);
    let scopes: Vec<&Value> = keys.as_array().unwrap().iter().map(|k| &k["scope"]).collect();
    assert_eq!(scopes.len(), 2);
    assert!(scopes.contains(&&Value::from("test.*.index-next")));
    assert!(scopes.contains(&&Value::Null));
}

#[test]
fn test_permission_grant_list_revoke() {
    let ctx = TestContext::new();
    ctx.init().success();
    ctx.add_user_with_key("ci");

    ctx.admin(&[
        "permission",
        "grant",
        "--username",
        "ci",
        "--scope",
        "test.dev.index",
        "--non-interactive",
    ])
    .success()
    .stdout(predicate::str::contains("test.dev.index-next"));

    ctx.admin(&[
        "permission",
        "grant",
        "--username",
        "ci",
        "--scope",
        "test.index-next",
        "--non-interactive",
    ])
    .failure();

    let grants = ctx.admin_json(&["permission", "list", "--username", "ci"]);
    assert_eq!(
        grants[0]["scopes"],
        serde_json::json!([
            "test.dev.index-delete",
            "test.dev.index-latest",
            "test.dev.index-list",
            "test.dev.index-next"
        ])
    );

    ctx.admin(&[
        "permission",
        "revoke",
        "--username",
        "ci",
        "--scope",
        "test.dev.index-write",
        "--non-interactive",
        "--yes",
    ])
    .success()
    .stdout(predicate::str::contains("2 scope(s) removed"));

    let grants = ctx.admin_json(&["permission", "list"]);
    assert_eq!(grants[0]["scopes"].as_array().unwrap().len(), 2);
}

#[test]
fn test_modules_branches_and_info() {
    let ctx = TestContext::new();
    ctx.init().success();

    ctx.admin(&["module", "add", "--name", "test"]).success();
    ctx.admin(&["module", "add", "--name", "test"])
        .failure()
        .stderr(predicate::str::contains("already exists"));
    ctx.admin(&["branch", "add", "--module", "test", "--name", "dev"])
        .success()
        .stdout(predicate::str::contains("test.dev"));
    ctx.admin(&["branch", "add", "--module", "ghost", "--name", "dev"])
        .failure()
        .stderr(predicate::str::contains("Module not found"));

    let modules = ctx.admin_json(&["module", "list"]);
    assert_eq!(modules[0]["name"], "test");

    let info = ctx.admin_json(&["info"]);
    assert_eq!(info["modules"], 1);
    assert_eq!(info["branches"], 1);
    assert_eq!(info["indexes"], 0);
    assert_eq!(info["users"], 0);
    assert_eq!(info["access_keys"], 0);
}

#[test]
fn test_index_next_and_latest_over_http() {
    let ctx = TestContext::new();
    ctx.init().success();
    let key = ctx.add_user_with_key("ci");
    ctx.admin(&["module", "add", "--name", "test"]).success();
    ctx.admin(&["branch", "add", "--module", "test", "--name", "release/1-x"])
        .success();
    ctx.admin(&[
        "permission",
        "grant",
        "--username",
        "ci",
        "--scope",
        "test.*.index",
        "--non-interactive",
    ])
    .success();

    let server = ctx.start_server();
    let index = |sub: &str| {
        let mut cmd = ctx.cmd();
        cmd.args(["index", sub, "--module", "test", "--branch", "release/1-x"])
            .env("BUILDINDEX_SERVER", &server)
            .env("BUILDINDEX_KEY", &key);
        cmd
    };

    let output = index("latest").output().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    assert_eq!(String::from_utf8_lossy(&output.stdout).trim(), "null");

    let commit = "A".repeat(40);
    let output = index("next")
        .args(["--commit-ref", &commit])
        .output()
        .unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let allocation: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(allocation["new_index"]["value"], 1);
    assert_eq!(allocation["new_index"]["commit_ref"], "a".repeat(40));
    assert_eq!(allocation["previous_index_value"], Value::Null);

    let output = index("latest").output().unwrap();
    let latest: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(latest, allocation["new_index"]);

    index("next")
        .args(["--commit-ref", "abc"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("40 characters"));

    let mut other = ctx.cmd();
    other
        .args(["index", "next", "--module", "other", "--branch", "dev"])
        .args(["--commit-ref", &"b".repeat(40)])
        .env("BUILDINDEX_SERVER", &server)
        .env("BUILDINDEX_KEY", &key)
        .assert()
        .failure()
        .stderr(predicate::str::contains("other.dev.index-next"));

    let store = SqliteStore::new(ctx.data_dir().join("buildindex.db")).unwrap();
    assert_eq!(store.stats().unwrap().indexes, 1);
}

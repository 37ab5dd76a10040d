//! Concurrent allocation against one database file.
//!
//! Every thread allocates through its own connection, like separate server
//! processes sharing a data directory would.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Barrier;
use std::thread;

use chrono::Utc;
use tempfile::TempDir;

use buildindex::allocator::IndexAllocator;
use buildindex::store::{IndexFilter, SqliteStore, Store};
use buildindex::types::{Branch, Module};

const THREADS: usize = 50;
const CONNECTIONS: usize = 5;

fn setup(path: &Path, branches: &[&str]) {
    let store = SqliteStore::new(path).expect("open store");
    store.initialize().expect("initialize store");

    let module = Module {
        id: "m-test".to_string(),
        name: "test".to_string(),
        created_at: Utc::now(),
    };
    store.create_module(&module).expect("create module");

    for name in branches {
        store
            .create_branch(&Branch {
                id: format!("b-{name}"),
                module_id: module.id.clone(),
                module_name: module.name.clone(),
                name: (*name).to_string(),
                latest_index_id: None,
                created_at: Utc::now(),
            })
            .expect("create branch");
    }
}

fn commit_ref(n: usize) -> String {
    format!("{n:040x}")
}

#[test]
fn test_concurrent_allocations_are_gap_free() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("buildindex.db");
    setup(&db, &["dev"]);

    let stores: Vec<SqliteStore> = (0..CONNECTIONS)
        .map(|_| SqliteStore::new(&db).unwrap())
        .collect();
    let barrier = Barrier::new(THREADS);

    let results: Vec<(String, u32)> = thread::scope(|s| {
        let handles: Vec<_> = (0..THREADS)
            .map(|n| {
                let store = &stores[n % CONNECTIONS];
                let barrier = &barrier;
                s.spawn(move || {
                    barrier.wait();
                    let allocation = IndexAllocator::new(store)
                        .allocate_next("test", "dev", &commit_ref(n))
                        .expect("allocation succeeds");
                    (allocation.new_index.commit_ref, allocation.new_index.value)
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    let values: BTreeSet<u32> = results.iter().map(|(_, v)| *v).collect();
    let expected: BTreeSet<u32> = (1..=THREADS as u32).collect();
    assert_eq!(values, expected);

    let by_commit: BTreeMap<&str, u32> = results.iter().map(|(c, v)| (c.as_str(), *v)).collect();
    assert_eq!(by_commit.len(), THREADS);

    let reader = SqliteStore::new(&db).unwrap();
    let persisted = reader
        .list_indexes("test", "dev", &IndexFilter::default())
        .unwrap();
    let persisted_values: Vec<u32> = persisted.iter().map(|i| i.value).collect();
    assert_eq!(persisted_values, (1..=THREADS as u32).collect::<Vec<_>>());
    for index in &persisted {
        assert_eq!(by_commit[index.commit_ref.as_str()], index.value);
    }

    let latest = reader.get_latest_index("test", "dev").unwrap().unwrap();
    assert_eq!(latest.value, THREADS as u32);
}

#[test]
fn test_branches_are_numbered_independently() {
    let temp = TempDir::new().unwrap();
    let db = temp.path().join("buildindex.db");
    setup(&db, &["dev", "prod"]);

    let stores: Vec<SqliteStore> = (0..CONNECTIONS)
        .map(|_| SqliteStore::new(&db).unwrap())
        .collect();

    thread::scope(|s| {
        for n in 0..20 {
            let store = &stores[n % CONNECTIONS];
            let branch = if n % 2 == 0 { "dev" } else { "prod" };
            s.spawn(move || {
                IndexAllocator::new(store)
                    .allocate_next("test", branch, &commit_ref(n))
                    .expect("allocation succeeds");
            });
        }
    });

    let reader = &stores[0];
    for branch in ["dev", "prod"] {
        let values: Vec<u32> = reader
            .list_indexes("test", branch, &IndexFilter::default())
            .unwrap()
            .iter()
            .map(|i| i.value)
            .collect();
        assert_eq!(values, (1..=10).collect::<Vec<_>>(), "{branch}");
    }
}

//! Transaction durability tests
//!
//! A crash is simulated by forgetting an open store: nothing is flushed or
//! closed, so the WAL holds exactly what reached the file. The crashed
//! handle is opened with NO_LOCK so the reopen is not blocked by its
//! leaked lock.

use cellar_core::{ErrorCode, OpenMode};
use cellar_engine::Store;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

fn crashable(path: &str) -> Store {
    let store = Store::new();
    store
        .open(path, OpenMode::default() | OpenMode::NO_LOCK)
        .unwrap();
    store
}

fn reopen(path: &str) -> Store {
    let store = Store::new();
    store.open(path, OpenMode::default()).unwrap();
    store
}

#[test]
fn test_uncommitted_transaction_absent_after_crash() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("db");
    let path = path.to_str().unwrap();

    {
        let store = crashable(path);
        store.set("before", "1").unwrap();
        store.begin_transaction(false).unwrap();
        store.set("inside", "2").unwrap();
        store.remove("before").unwrap();
        // Push everything to the file, then crash without commit
        store.synchronize(true, None).unwrap();
        std::mem::forget(store);
    }

    let store = reopen(path);
    assert_eq!(store.get("before").unwrap(), b"1");
    assert_eq!(
        store.get("inside").unwrap_err().code(),
        Some(ErrorCode::RecordNotFound)
    );

    // Writes after the dangling frame are autocommit again
    store.set("after", "3").unwrap();
    store.close().unwrap();
    let store = reopen(path);
    assert_eq!(store.get("after").unwrap(), b"3");
    assert!(store.get("inside").is_err());
}

#[test]
fn test_hard_commit_survives_crash() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("db");
    let path = path.to_str().unwrap();

    {
        let store = crashable(path);
        store
            .transaction(true, |store| {
                store.set("x", "1")?;
                store.set("y", "2")?;
                Ok(true)
            })
            .unwrap();
        std::mem::forget(store);
    }

    let store = reopen(path);
    assert_eq!(store.get("x").unwrap(), b"1");
    assert_eq!(store.get("y").unwrap(), b"2");
}

#[test]
fn test_close_rolls_back_active_transaction() {
    init_tracing();
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("db");
    let path = path.to_str().unwrap();

    {
        let store = reopen(path);
        store.set("k", "old").unwrap();
        store.begin_transaction(false).unwrap();
        store.set("k", "new").unwrap();
        store.close().unwrap();
    }

    let store = reopen(path);
    assert_eq!(store.get("k").unwrap(), b"old");
    assert_eq!(store.status().unwrap()["transaction"], "false");
}

#[test]
fn test_abort_on_disk_restores_and_logs() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("db");
    let path = path.to_str().unwrap();

    {
        let store = reopen(path);
        store.set_bulk(vec![("a", "1"), ("b", "2")], true).unwrap();
        store.begin_transaction(false).unwrap();
        store.clear().unwrap();
        store.set("c", "3").unwrap();
        store.end_transaction(false).unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    let store = reopen(path);
    assert_eq!(store.count().unwrap(), 2);
    assert!(store.get("c").is_err());
}

#[test]
fn test_checkpoint_deferred_during_transaction() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("db");
    let path = path.to_str().unwrap();

    let store = reopen(path);
    store.set("a", "1").unwrap();
    store.begin_transaction(false).unwrap();
    store.set("b", "2").unwrap();
    store.synchronize(false, None).unwrap();
    let wal_size: u64 = store.status().unwrap()["wal_size"].parse().unwrap();
    assert!(wal_size > 0);

    store.end_transaction(true).unwrap();
    store.synchronize(false, None).unwrap();
    assert_eq!(store.status().unwrap()["wal_size"], "0");
    store.close().unwrap();

    let store = reopen(path);
    assert_eq!(store.count().unwrap(), 2);
}

#[test]
fn test_other_threads_write_into_active_transaction() {
    let store = Arc::new(Store::new());
    store.open("-", OpenMode::default()).unwrap();

    store.begin_transaction(false).unwrap();
    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || store.set("from-thread", "1").unwrap())
    };
    writer.join().unwrap();
    store.end_transaction(false).unwrap();

    assert!(store.get("from-thread").is_err());
}

//! Cursor traversal tests
//!
//! Key-based positions let a cursor keep walking while other threads write
//! to the store; these tests check ordering in both directions and the
//! behaviour around concurrent mutation and store close.

use cellar_core::{ErrorCode, OpenMode};
use cellar_engine::Store;
use proptest::prelude::*;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::thread;
use tempfile::TempDir;

fn collect_forward(store: &Store) -> Vec<Vec<u8>> {
    let mut cursor = store.cursor().unwrap();
    let mut keys = Vec::new();
    if cursor.jump().is_err() {
        return keys;
    }
    while let Ok(key) = cursor.get_key(true) {
        keys.push(key);
    }
    keys
}

fn collect_backward(store: &Store) -> Vec<Vec<u8>> {
    let mut cursor = store.cursor().unwrap();
    let mut keys = Vec::new();
    if cursor.jump_back().is_err() {
        return keys;
    }
    loop {
        keys.push(cursor.get_key(false).unwrap());
        if cursor.step_back().is_err() {
            break;
        }
    }
    keys
}

proptest! {
    #[test]
    fn prop_traversal_matches_sorted_keys(keys in prop::collection::btree_set(prop::collection::vec(any::<u8>(), 0..6), 0..40)) {
        let store = Store::new();
        store.open("-", OpenMode::default()).unwrap();
        for key in &keys {
            store.set(key, b"v").unwrap();
        }

        let expected: Vec<Vec<u8>> = keys.iter().cloned().collect();
        prop_assert_eq!(collect_forward(&store), expected.clone());

        let mut reversed = expected;
        reversed.reverse();
        prop_assert_eq!(collect_backward(&store), reversed);
    }
}

#[test]
fn test_disk_cursor_updates_persist() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("db");
    let path = path.to_str().unwrap();

    {
        let store = Store::new();
        store.open(path, OpenMode::default()).unwrap();
        for key in ["a", "b", "c", "d"] {
            store.set(key, "0").unwrap();
        }
        let mut cursor = store.cursor().unwrap();
        cursor.jump().unwrap();
        cursor.set_value("1", true).unwrap();
        cursor.remove().unwrap();
        cursor.seize().unwrap();
        assert_eq!(cursor.get_key(false).unwrap(), b"d");
    }

    let store = Store::new();
    store.open(path, OpenMode::default()).unwrap();
    assert_eq!(collect_forward(&store), vec![b"a".to_vec(), b"d".to_vec()]);
    assert_eq!(store.get("a").unwrap(), b"1");
}

#[test]
fn test_cursor_walk_during_concurrent_writes() {
    let store = Arc::new(Store::new());
    store.open("-", OpenMode::default()).unwrap();
    for i in 0..200u32 {
        store.set(format!("k{:04}", i * 2), "v").unwrap();
    }

    let writer = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            for i in 0..200u32 {
                store.set(format!("k{:04}", i * 2 + 1), "w").unwrap();
            }
        })
    };

    let seen = collect_forward(&store);
    writer.join().unwrap();

    let even: BTreeSet<Vec<u8>> = (0..200u32)
        .map(|i| format!("k{:04}", i * 2).into_bytes())
        .collect();
    let seen_set: BTreeSet<Vec<u8>> = seen.iter().cloned().collect();
    assert!(even.is_subset(&seen_set));
    assert!(seen.windows(2).all(|pair| pair[0] < pair[1]));
}

#[test]
fn test_cursor_moved_to_thread_outlives_close() {
    let store = Store::new();
    store.open("-", OpenMode::default()).unwrap();
    store.set("a", "1").unwrap();
    let mut cursor = store.cursor().unwrap();
    cursor.jump().unwrap();

    let mut cursor = thread::spawn(move || {
        assert_eq!(cursor.get_value(false).unwrap(), b"1");
        cursor
    })
    .join()
    .unwrap();

    store.close().unwrap();
    let err = cursor.get_value(false).unwrap_err();
    assert_eq!(err.code(), Some(ErrorCode::LogicError));
    assert_eq!(cursor.error().code, ErrorCode::LogicError);
}

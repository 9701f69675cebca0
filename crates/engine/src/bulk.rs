//! Bulk record operations
//!
//! With `atomic = true` the whole call runs under one exclusive lock
//! acquisition and is logged as a single frame, so a crash either keeps
//! every change or none. Otherwise each record is handled on its own and
//! other operations may interleave.

use crate::database::Change;
use crate::Store;
use cellar_core::Result;
use cellar_storage::RecordMap;
use std::collections::{BTreeMap, BTreeSet};

impl Store {
    /// Store several records, returning how many were stored
    pub fn set_bulk<I, K, V>(&self, records: I, atomic: bool) -> Result<usize>
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<[u8]>,
        V: AsRef<[u8]>,
    {
        let changes: Vec<Change> = records
            .into_iter()
            .map(|(k, v)| Change::Put(k.as_ref().to_vec(), v.as_ref().to_vec()))
            .collect();
        let stored = changes.len();
        self.with_open("set_bulk", |open| {
            open.check_writable()?;
            if atomic {
                let mut records = open.records.write();
                open.write_batch(&mut records, changes)?;
            } else {
                for change in changes {
                    if let Change::Put(key, value) = change {
                        let mut records = open.records.write();
                        open.write(&mut records, &key, Some(value))?;
                    }
                }
            }
            Ok(stored)
        })
    }

    /// Remove several records, returning how many existed
    ///
    /// Absent keys are skipped rather than reported as errors.
    pub fn remove_bulk<K: AsRef<[u8]>>(&self, keys: &[K], atomic: bool) -> Result<usize> {
        self.with_open("remove_bulk", |open| {
            open.check_writable()?;
            if atomic {
                let mut records = open.records.write();
                let mut seen = BTreeSet::new();
                let mut changes = Vec::new();
                for key in keys {
                    let key: &[u8] = key.as_ref();
                    if records.contains(key) && seen.insert(key) {
                        changes.push(Change::Remove(key.to_vec()));
                    }
                }
                let removed = changes.len();
                open.write_batch(&mut records, changes)?;
                Ok(removed)
            } else {
                let mut removed = 0;
                for key in keys {
                    let mut records = open.records.write();
                    if open.write(&mut records, key.as_ref(), None)?.is_some() {
                        removed += 1;
                    }
                }
                Ok(removed)
            }
        })
    }

    /// Values of several records; absent keys are left out of the result
    pub fn get_bulk<K: AsRef<[u8]>>(
        &self,
        keys: &[K],
        atomic: bool,
    ) -> Result<BTreeMap<Vec<u8>, Vec<u8>>> {
        self.with_open("get_bulk", |open| {
            let mut found = BTreeMap::new();
            if atomic {
                let records = open.records.read();
                for key in keys {
                    collect(&mut found, &records, key.as_ref());
                }
            } else {
                for key in keys {
                    collect(&mut found, &open.records.read(), key.as_ref());
                }
            }
            Ok(found)
        })
    }
}

fn collect(found: &mut BTreeMap<Vec<u8>, Vec<u8>>, records: &RecordMap, key: &[u8]) {
    if let Some(value) = records.get(key) {
        found.insert(key.to_vec(), value.to_vec());
    }
}

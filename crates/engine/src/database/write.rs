//! Mutation path shared by every write operation
//!
//! Every mutation runs with the record map write-locked and goes through
//! three steps: journal the prior image (inside a transaction), log the
//! resulting value to the WAL (disk stores), apply it to the map.
//! A failed WAL append leaves the map untouched.

use super::OpenStore;
use cellar_core::{Action, Error, OpenMode, Result};
use cellar_durability::WalEntry;
use cellar_storage::RecordMap;

/// One element of an atomic batch
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Change {
    Put(Vec<u8>, Vec<u8>),
    Remove(Vec<u8>),
    Clear,
}

impl Change {
    fn to_entry(&self) -> WalEntry {
        match self {
            Change::Put(key, value) => WalEntry::Put {
                key: key.clone(),
                value: value.clone(),
            },
            Change::Remove(key) => WalEntry::Remove { key: key.clone() },
            Change::Clear => WalEntry::Clear,
        }
    }
}

impl OpenStore {
    /// `NOPERM` unless opened as a writer
    pub(crate) fn check_writable(&self) -> Result<()> {
        if self.mode.is_writer() {
            Ok(())
        } else {
            Err(Error::no_permission("store is opened as a reader"))
        }
    }

    fn hard_sync(&self) -> bool {
        self.mode.contains(OpenMode::AUTO_SYNC)
    }

    /// Store `Some(value)` or remove on `None`, returning the prior value
    pub(crate) fn write(
        &self,
        records: &mut RecordMap,
        key: &[u8],
        value: Option<Vec<u8>>,
    ) -> Result<Option<Vec<u8>>> {
        let prior = records.get(key);
        if value.is_none() && prior.is_none() {
            return Ok(None);
        }
        self.txn.record(key, prior);
        if let Some(disk) = &self.disk {
            let entry = match &value {
                Some(v) => WalEntry::Put {
                    key: key.to_vec(),
                    value: v.clone(),
                },
                None => WalEntry::Remove { key: key.to_vec() },
            };
            disk.log(&[entry])?;
        }
        Ok(records.apply(key, value))
    }

    /// Remove every record
    pub(crate) fn clear_records(&self, records: &mut RecordMap) -> Result<()> {
        self.txn.record_all(records);
        if let Some(disk) = &self.disk {
            disk.log(&[WalEntry::Clear])?;
        }
        records.clear();
        Ok(())
    }

    /// Carry out a visitor's answer for `key`
    pub(crate) fn apply_action(
        &self,
        records: &mut RecordMap,
        key: &[u8],
        action: Action,
    ) -> Result<()> {
        match action {
            Action::Keep => Ok(()),
            Action::Remove => self.write(records, key, None).map(|_| ()),
            Action::Replace(value) => self.write(records, key, Some(value)).map(|_| ()),
        }
    }

    /// Apply `changes` all-or-nothing
    ///
    /// Outside a transaction the batch is logged as one frame
    /// (Begin, entries, Commit) before any of it reaches the map. Inside a
    /// transaction the changes simply join it.
    pub(crate) fn write_batch(&self, records: &mut RecordMap, changes: Vec<Change>) -> Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let disk = match &self.disk {
            Some(disk) if !self.txn.is_active() => disk,
            _ => {
                for change in changes {
                    match change {
                        Change::Put(key, value) => {
                            self.write(records, &key, Some(value))?;
                        }
                        Change::Remove(key) => {
                            self.write(records, &key, None)?;
                        }
                        Change::Clear => self.clear_records(records)?,
                    }
                }
                return Ok(());
            }
        };

        let txn_id = self.txn.allocate_txn_id();
        let mut entries = Vec::with_capacity(changes.len() + 2);
        entries.push(WalEntry::BeginTxn {
            txn_id,
            hard: self.hard_sync(),
        });
        entries.extend(changes.iter().map(Change::to_entry));
        entries.push(WalEntry::CommitTxn { txn_id });
        disk.log_commit(&entries, self.hard_sync())?;

        for change in changes {
            match change {
                Change::Put(key, value) => {
                    records.put(key, value);
                }
                Change::Remove(key) => {
                    records.remove(&key);
                }
                Change::Clear => records.clear(),
            }
        }
        Ok(())
    }
}

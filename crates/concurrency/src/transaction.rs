//! Store-scoped transaction state
//!
//! A transaction applies its mutations directly to the live record map.
//! The undo journal keeps the first prior image of every key it touches,
//! which is all rollback needs to restore the state at begin.

use cellar_durability::WalEntry;
use cellar_storage::RecordMap;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

/// First prior image of every key touched since begin
///
/// `None` images mean the key had no record at begin.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UndoJournal {
    images: BTreeMap<Vec<u8>, Option<Vec<u8>>>,
}

impl UndoJournal {
    /// Create an empty journal
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember `prior` unless the key already has an image
    pub fn record(&mut self, key: &[u8], prior: Option<&[u8]>) {
        if !self.images.contains_key(key) {
            self.images.insert(key.to_vec(), prior.map(<[u8]>::to_vec));
        }
    }

    /// True when the key already has an image
    pub fn contains(&self, key: &[u8]) -> bool {
        self.images.contains_key(key)
    }

    /// Number of keys touched
    pub fn len(&self) -> usize {
        self.images.len()
    }

    /// True when nothing was touched
    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    /// Restore every image into `records`, returning the number restored
    pub fn rollback(self, records: &mut RecordMap) -> usize {
        let restored = self.images.len();
        for (key, image) in self.images {
            match image {
                Some(value) => {
                    records.put(key, value);
                }
                None => {
                    records.remove(&key);
                }
            }
        }
        restored
    }
}

/// The active transaction of a store
#[derive(Debug)]
pub struct Transaction {
    txn_id: u64,
    hard: bool,
    journal: UndoJournal,
    started: Instant,
}

impl Transaction {
    /// Start a transaction
    pub fn new(txn_id: u64, hard: bool) -> Self {
        Transaction {
            txn_id,
            hard,
            journal: UndoJournal::new(),
            started: Instant::now(),
        }
    }

    /// Transaction identifier used in WAL frames
    pub fn txn_id(&self) -> u64 {
        self.txn_id
    }

    /// Whether commit fsyncs the WAL
    pub fn is_hard(&self) -> bool {
        self.hard
    }

    /// Time since begin
    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    /// Undo journal
    pub fn journal(&self) -> &UndoJournal {
        &self.journal
    }

    /// Remember the prior image of a key about to change
    pub fn record(&mut self, key: &[u8], prior: Option<&[u8]>) {
        self.journal.record(key, prior);
    }

    /// Remember every record about to be cleared
    pub fn record_all(&mut self, records: &RecordMap) {
        for (key, value) in records.iter() {
            self.journal.record(key, Some(value));
        }
    }

    /// WAL entry opening the frame
    pub fn begin_entry(&self) -> WalEntry {
        WalEntry::BeginTxn {
            txn_id: self.txn_id,
            hard: self.hard,
        }
    }

    /// WAL entry closing the frame
    pub fn end_entry(&self, commit: bool) -> WalEntry {
        if commit {
            WalEntry::CommitTxn {
                txn_id: self.txn_id,
            }
        } else {
            WalEntry::AbortTxn {
                txn_id: self.txn_id,
            }
        }
    }

    /// Undo every mutation since begin
    pub fn rollback(self, records: &mut RecordMap) -> usize {
        self.journal.rollback(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(pairs: &[(&str, &str)]) -> RecordMap {
        pairs
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_journal_keeps_first_image() {
        let mut journal = UndoJournal::new();
        journal.record(b"k", Some(b"v0"));
        journal.record(b"k", Some(b"v1"));
        journal.record(b"new", None);
        assert_eq!(journal.len(), 2);

        let mut records = map(&[("k", "v2"), ("new", "x")]);
        assert_eq!(journal.rollback(&mut records), 2);
        assert_eq!(records, map(&[("k", "v0")]));
    }

    #[test]
    fn test_rollback_after_clear() {
        let mut records = map(&[("a", "1"), ("b", "2")]);
        let mut txn = Transaction::new(1, false);
        txn.record(b"a", Some(b"1"));
        records.put(b"a".to_vec(), b"changed".to_vec());
        txn.record_all(&records);
        records.clear();
        txn.record(b"c", None);
        records.put(b"c".to_vec(), b"3".to_vec());

        txn.rollback(&mut records);
        assert_eq!(records, map(&[("a", "1"), ("b", "2")]));
    }

    #[test]
    fn test_frame_entries() {
        let txn = Transaction::new(42, true);
        assert_eq!(txn.begin_entry(), WalEntry::BeginTxn { txn_id: 42, hard: true });
        assert_eq!(txn.end_entry(true), WalEntry::CommitTxn { txn_id: 42 });
        assert_eq!(txn.end_entry(false), WalEntry::AbortTxn { txn_id: 42 });
    }
}

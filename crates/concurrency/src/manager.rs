//! Transaction manager: at most one active transaction per store
//!
//! ## Lifecycle
//!
//! ```text
//! begin(hard)  -> Active (second begin: LOGIC_ERROR)
//! record(...)  -> journal first prior image of each touched key
//! finish()     -> hands the Transaction back for commit or rollback
//!                 (no active transaction: LOGIC_ERROR)
//! ```
//!
//! Transaction ids are shared with atomic bulk frames, so every frame in
//! the WAL has a unique id.

use crate::transaction::Transaction;
use cellar_core::{Error, Result};
use cellar_storage::RecordMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::debug;

/// Coordinates the active transaction of one store
pub struct TransactionManager {
    active: Mutex<Option<Transaction>>,

    /// Next frame identifier
    ///
    /// Starts past the highest id found in the WAL during recovery.
    next_txn_id: AtomicU64,
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active", &self.active_id())
            .field("next_txn_id", &self.next_txn_id.load(Ordering::SeqCst))
            .finish()
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        Self::new(1)
    }
}

impl TransactionManager {
    /// Create a manager whose first frame gets `next_txn_id`
    pub fn new(next_txn_id: u64) -> Self {
        TransactionManager {
            active: Mutex::new(None),
            next_txn_id: AtomicU64::new(next_txn_id.max(1)),
        }
    }

    /// Allocate a frame identifier
    pub fn allocate_txn_id(&self) -> u64 {
        self.next_txn_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Start the store's transaction
    pub fn begin(&self, hard: bool) -> Result<u64> {
        let mut active = self.active.lock();
        if let Some(txn) = active.as_ref() {
            return Err(Error::logic(format!(
                "transaction {} already in progress",
                txn.txn_id()
            )));
        }
        let txn_id = self.allocate_txn_id();
        *active = Some(Transaction::new(txn_id, hard));
        debug!(target: "cellar::txn", txn_id, hard, "Transaction started");
        Ok(txn_id)
    }

    /// True while a transaction is active
    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Identifier of the active transaction
    pub fn active_id(&self) -> Option<u64> {
        self.active.lock().as_ref().map(Transaction::txn_id)
    }

    /// Run `f` against the active transaction, if any
    pub fn with_active<R>(&self, f: impl FnOnce(&mut Transaction) -> R) -> Option<R> {
        self.active.lock().as_mut().map(f)
    }

    /// Journal the prior image of a key about to change
    ///
    /// Returns the active transaction id, or `None` in autocommit mode.
    pub fn record(&self, key: &[u8], prior: Option<&[u8]>) -> Option<u64> {
        self.with_active(|txn| {
            txn.record(key, prior);
            txn.txn_id()
        })
    }

    /// Journal every record about to be cleared
    pub fn record_all(&self, records: &RecordMap) -> Option<u64> {
        self.with_active(|txn| {
            txn.record_all(records);
            txn.txn_id()
        })
    }

    /// End the active transaction, handing it back to the caller
    pub fn finish(&self) -> Result<Transaction> {
        let txn = self
            .active
            .lock()
            .take()
            .ok_or_else(|| Error::logic("no transaction in progress"))?;
        debug!(
            target: "cellar::txn",
            txn_id = txn.txn_id(),
            touched = txn.journal().len(),
            elapsed_us = txn.elapsed().as_micros() as u64,
            "Transaction finished"
        );
        Ok(txn)
    }

    /// Drop the active transaction without touching records
    pub fn discard(&self) -> Option<Transaction> {
        self.active.lock().take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cellar_core::ErrorCode;

    #[test]
    fn test_single_active_transaction() {
        let manager = TransactionManager::new(5);
        assert!(!manager.is_active());
        assert_eq!(manager.begin(true).unwrap(), 5);
        assert!(manager.is_active());
        assert_eq!(manager.active_id(), Some(5));

        let err = manager.begin(false).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::LogicError));
        assert_eq!(manager.active_id(), Some(5));

        let txn = manager.finish().unwrap();
        assert!(txn.is_hard());
        assert!(!manager.is_active());
    }

    #[test]
    fn test_finish_without_begin_is_logic_error() {
        let manager = TransactionManager::default();
        let err = manager.finish().unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::LogicError));
    }

    #[test]
    fn test_record_only_while_active() {
        let manager = TransactionManager::default();
        assert_eq!(manager.record(b"k", None), None);

        let id = manager.begin(false).unwrap();
        assert_eq!(manager.record(b"k", Some(b"v")), Some(id));
        assert_eq!(manager.record(b"k", None), Some(id));

        let txn = manager.finish().unwrap();
        let mut records = RecordMap::new();
        records.put(b"k".to_vec(), b"later".to_vec());
        txn.rollback(&mut records);
        assert_eq!(records.get(b"k"), Some(&b"v"[..]));
    }

    #[test]
    fn test_ids_are_unique_across_frames() {
        let manager = TransactionManager::new(1);
        let bulk = manager.allocate_txn_id();
        let txn = manager.begin(false).unwrap();
        assert_ne!(bulk, txn);
        manager.discard();
        assert!(manager.begin(false).unwrap() > txn);
    }
}

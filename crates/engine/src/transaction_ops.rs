//! Store transactions
//!
//! At most one transaction is active per store. While it runs, every
//! mutation (from any thread) lands in the live record map and its prior
//! image goes to the undo journal; the WAL carries the mutations framed by
//! Begin and Commit/Abort entries.
//!
//! ## Usage
//!
//! ```
//! use cellar_core::OpenMode;
//! use cellar_engine::Store;
//!
//! let store = Store::new();
//! store.open("-", OpenMode::default())?;
//! let committed = store.transaction(false, |store| {
//!     store.set("a", "1")?;
//!     store.set("b", "2")?;
//!     Ok(true)
//! })?;
//! assert!(committed);
//! assert_eq!(store.count()?, 2);
//! # Ok::<(), cellar_core::Error>(())
//! ```

use crate::database::OpenStore;
use crate::Store;
use cellar_core::{Error, OpenMode, Result};
use tracing::{debug, warn};

impl OpenStore {
    fn begin(&self, hard: bool) -> Result<u64> {
        self.check_writable()?;
        // Record lock first: no mutation may interleave with the Begin entry
        let _records = self.records.write();
        let txn_id = self.txn.begin(hard)?;
        if let Some(disk) = &self.disk {
            let begin = self
                .txn
                .with_active(|txn| txn.begin_entry())
                .ok_or_else(|| Error::logic("transaction vanished"))?;
            if let Err(e) = disk.log(&[begin]) {
                self.txn.discard();
                return Err(e);
            }
        }
        Ok(txn_id)
    }

    fn end(&self, commit: bool) -> Result<()> {
        let mut records = self.records.write();
        let txn = self.txn.finish()?;
        let txn_id = txn.txn_id();

        if commit {
            let Some(disk) = &self.disk else {
                debug!(target: "cellar::txn", txn_id, "Transaction committed");
                return Ok(());
            };
            let hard = txn.is_hard() || self.mode.contains(OpenMode::AUTO_SYNC);
            match disk.log_commit(&[txn.end_entry(true)], hard) {
                Ok(()) => {
                    debug!(target: "cellar::txn", txn_id, hard, "Transaction committed");
                    Ok(())
                }
                Err(e) => {
                    warn!(
                        target: "cellar::txn",
                        txn_id,
                        error = %e,
                        "Commit could not be logged; rolling back"
                    );
                    txn.rollback(&mut records);
                    disk.mark_unterminated(txn_id);
                    Err(e)
                }
            }
        } else {
            let abort = txn.end_entry(false);
            let restored = txn.rollback(&mut records);
            debug!(target: "cellar::txn", txn_id, restored, "Transaction aborted");
            match &self.disk {
                Some(disk) => disk.log(&[abort]).map_err(|e| {
                    disk.mark_unterminated(txn_id);
                    e
                }),
                None => Ok(()),
            }
        }
    }
}

impl Store {
    /// Begin the store's transaction
    ///
    /// `hard` asks for an fsync at commit.
    ///
    /// # Errors
    ///
    /// - `LOGIC` when a transaction is already active
    /// - `NOPERM` on a reader
    pub fn begin_transaction(&self, hard: bool) -> Result<()> {
        self.with_open("begin_transaction", |open| open.begin(hard).map(|_| ()))
    }

    /// Commit (`true`) or abort (`false`) the active transaction
    ///
    /// Abort restores every record to its state at `begin_transaction`.
    ///
    /// # Errors
    ///
    /// `LOGIC` when no transaction is active.
    pub fn end_transaction(&self, commit: bool) -> Result<()> {
        self.with_open("end_transaction", |open| open.end(commit))
    }

    /// Run `body` inside a transaction
    ///
    /// `Ok(true)` commits, `Ok(false)` aborts; the returned flag tells
    /// whether the transaction committed. An error from `body` aborts the
    /// transaction and is returned unchanged.
    pub fn transaction<F>(&self, hard: bool, body: F) -> Result<bool>
    where
        F: FnOnce(&Store) -> Result<bool>,
    {
        self.begin_transaction(hard)?;
        match body(self) {
            Ok(commit) => {
                self.end_transaction(commit)?;
                Ok(commit)
            }
            Err(e) => {
                if let Err(abort_err) = self.end_transaction(false) {
                    warn!(
                        target: "cellar::txn",
                        error = %abort_err,
                        "Abort after failed transaction body also failed"
                    );
                }
                self.shared.track("transaction", Err(e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::Store;
    use cellar_core::{ErrorCode, OpenMode};

    fn memory_store() -> Store {
        let store = Store::new();
        store.open("-", OpenMode::default()).unwrap();
        store
    }

    #[test]
    fn test_abort_restores_prior_images() {
        let store = memory_store();
        store.set("keep", "old").unwrap();
        store.set("gone", "x").unwrap();

        store.begin_transaction(false).unwrap();
        store.set("keep", "new").unwrap();
        store.remove("gone").unwrap();
        store.set("fresh", "y").unwrap();
        store.clear().unwrap();
        store.end_transaction(false).unwrap();

        assert_eq!(store.get("keep").unwrap(), b"old");
        assert_eq!(store.get("gone").unwrap(), b"x");
        assert!(store.get("fresh").is_err());
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_nesting_is_logic_error() {
        let store = memory_store();
        store.begin_transaction(false).unwrap();
        assert_eq!(
            store.begin_transaction(false).unwrap_err().code(),
            Some(ErrorCode::LogicError)
        );
        store.end_transaction(true).unwrap();
        assert_eq!(
            store.end_transaction(true).unwrap_err().code(),
            Some(ErrorCode::LogicError)
        );
    }

    #[test]
    fn test_closure_error_aborts() {
        let store = memory_store();
        let err = store
            .transaction(false, |store| {
                store.set("a", "1")?;
                store.get("missing")?;
                Ok(true)
            })
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::RecordNotFound));
        assert_eq!(store.error().code, ErrorCode::RecordNotFound);
        assert_eq!(store.count().unwrap(), 0);
        assert_eq!(store.status().unwrap()["transaction"], "false");
    }

    #[test]
    fn test_closure_false_aborts() {
        let store = memory_store();
        let committed = store
            .transaction(false, |store| {
                store.set("a", "1")?;
                Ok(false)
            })
            .unwrap();
        assert!(!committed);
        assert_eq!(store.count().unwrap(), 0);
    }

    /// Synced on every append and never closed, so the WAL holds exactly
    /// what the store wrote before it was forgotten
    fn crashable_disk_store(path: &std::path::Path) -> Store {
        let store = Store::new();
        store
            .open(
                path.to_str().unwrap(),
                OpenMode::default() | OpenMode::AUTO_SYNC | OpenMode::NO_LOCK,
            )
            .unwrap();
        store
    }

    fn fail_wal_appends(store: &Store, fail: bool) {
        store
            .with_open("fail_appends", |open| {
                open.disk.as_ref().unwrap().fail_appends(fail);
                Ok(())
            })
            .unwrap();
    }

    #[test]
    fn test_failed_commit_does_not_swallow_later_writes() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("db");

        let store = crashable_disk_store(&path);
        store.begin_transaction(false).unwrap();
        store.set("in_txn", "1").unwrap();
        fail_wal_appends(&store, true);
        assert!(store.end_transaction(true).is_err());
        fail_wal_appends(&store, false);
        assert!(store.get("in_txn").is_err());

        store.set("after", "2").unwrap();
        std::mem::forget(store);

        let store = Store::new();
        store.open(path.to_str().unwrap(), OpenMode::default()).unwrap();
        assert_eq!(store.get("after").unwrap(), b"2");
        assert!(store.get("in_txn").is_err());
    }

    #[test]
    fn test_failed_abort_does_not_swallow_later_writes() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let path = temp_dir.path().join("db");

        let store = crashable_disk_store(&path);
        store.set("base", "0").unwrap();
        store.begin_transaction(false).unwrap();
        store.remove("base").unwrap();
        fail_wal_appends(&store, true);
        assert!(store.end_transaction(false).is_err());
        fail_wal_appends(&store, false);
        assert_eq!(store.get("base").unwrap(), b"0");

        store.set("after", "2").unwrap();
        std::mem::forget(store);

        let store = Store::new();
        store.open(path.to_str().unwrap(), OpenMode::default()).unwrap();
        assert_eq!(store.get("base").unwrap(), b"0");
        assert_eq!(store.get("after").unwrap(), b"2");
    }
}

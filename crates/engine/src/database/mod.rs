//! Store struct and open/close logic
//!
//! This module provides the main Store handle that orchestrates:
//! - Opening a volatile (in-memory) or disk store
//! - Lock acquisition and recovery for disk stores
//! - Retained error state and the exceptional-error policy
//! - Cursor registry and close-time invalidation
//!
//! ## Locking
//!
//! Locks are always taken in this order:
//!
//! ```text
//! open state (RwLock<Option<OpenStore>>)
//!   -> record map (RwLock<RecordMap>)
//!     -> transaction manager (Mutex)
//!       -> WAL (Mutex)
//! ```
//!
//! Every operation holds the open state for reading; `open` and `close`
//! hold it for writing, so they wait for in-flight operations.

pub mod config;
pub(crate) mod files;
mod write;

pub use config::{CellarConfig, CONFIG_FILE_NAME};
pub use files::{LOCK_FILE_NAME, SNAPSHOT_FILE_NAME, WAL_FILE_NAME};
pub(crate) use write::Change;

use crate::cursor::CursorSlot;
use cellar_concurrency::TransactionManager;
use cellar_core::{Error, ErrorMask, OpenMode, Result, StoreError};
use cellar_storage::RecordMap;
use files::{is_memory_path, DiskFiles};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

// ============================================================================
// Options
// ============================================================================

/// Handle-level options fixed at construction
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOptions {
    /// Report the exceptional error set as raisable
    /// (see [`ErrorMask::EXCEPTIONAL`])
    pub exceptional: bool,
}

// ============================================================================
// Shared State
// ============================================================================

/// State of an opened store
pub(crate) struct OpenStore {
    pub(crate) path: String,
    pub(crate) mode: OpenMode,
    pub(crate) records: RwLock<RecordMap>,
    pub(crate) txn: TransactionManager,
    pub(crate) disk: Option<DiskFiles>,
}

/// State shared by a Store and its cursors
pub(crate) struct StoreShared {
    pub(crate) state: RwLock<Option<OpenStore>>,
    last_error: Mutex<StoreError>,
    cursors: Mutex<Vec<Weak<CursorSlot>>>,
    mask: AtomicU32,
    options: StoreOptions,
}

impl StoreShared {
    fn mask(&self) -> ErrorMask {
        ErrorMask::from_bits_truncate(self.mask.load(Ordering::Relaxed))
    }

    /// Record the outcome of an operation in the retained error slot
    pub(crate) fn track<T>(&self, op: &'static str, result: Result<T>) -> Result<T> {
        match &result {
            Ok(_) => *self.last_error.lock() = StoreError::success(),
            Err(e) => {
                self.log_failure(op, e);
                if let Some(code) = e.code() {
                    *self.last_error.lock() = StoreError {
                        code,
                        message: e.message(),
                    };
                }
            }
        }
        result
    }

    pub(crate) fn log_failure(&self, op: &'static str, e: &Error) {
        match e.code() {
            Some(code) if self.mask().covers(code) => {
                error!(target: "cellar::store", op, code = code.name(), error = %e, "Operation failed");
            }
            _ => debug!(target: "cellar::store", op, error = %e, "Operation failed"),
        }
    }

    pub(crate) fn raises(&self, e: &Error) -> bool {
        match e.code() {
            None => true,
            Some(code) => self.mask().covers(code),
        }
    }

    /// Register a cursor slot, sweeping slots of dropped cursors
    pub(crate) fn register_cursor(&self, slot: &Arc<CursorSlot>) {
        let mut cursors = self.cursors.lock();
        cursors.retain(|weak| weak.strong_count() > 0);
        cursors.push(Arc::downgrade(slot));
    }

    fn live_cursors(&self) -> usize {
        self.cursors
            .lock()
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|slot| !slot.is_invalidated())
            .count()
    }

    /// Invalidate every live cursor and empty the registry
    fn invalidate_cursors(&self) -> usize {
        let mut cursors = self.cursors.lock();
        let mut invalidated = 0;
        for slot in cursors.drain(..).filter_map(|weak| weak.upgrade()) {
            slot.invalidate();
            invalidated += 1;
        }
        invalidated
    }
}

// ============================================================================
// Store
// ============================================================================

/// Embedded key-value store handle
///
/// A Store starts closed; `open` makes it usable and `close` (or drop)
/// releases it. A closed handle may be opened again. Share between threads
/// with `Arc<Store>`.
///
/// # Example
///
/// ```
/// use cellar_engine::Store;
/// use cellar_core::OpenMode;
///
/// let store = Store::new();
/// store.open("-", OpenMode::WRITER | OpenMode::CREATE)?;
/// store.set("key", "value")?;
/// assert_eq!(store.get("key")?, b"value");
/// store.close()?;
/// # Ok::<(), cellar_core::Error>(())
/// ```
pub struct Store {
    pub(crate) shared: Arc<StoreShared>,
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.shared.state.read();
        f.debug_struct("Store")
            .field("path", &state.as_ref().map(|open| open.path.as_str()))
            .field("options", &self.shared.options)
            .finish()
    }
}

impl Store {
    /// Create a closed store handle
    pub fn new() -> Self {
        Self::with_options(StoreOptions::default())
    }

    /// Create a closed store handle with options
    pub fn with_options(options: StoreOptions) -> Self {
        let mask = if options.exceptional {
            ErrorMask::EXCEPTIONAL
        } else {
            ErrorMask::empty()
        };
        Store {
            shared: Arc::new(StoreShared {
                state: RwLock::new(None),
                last_error: Mutex::new(StoreError::success()),
                cursors: Mutex::new(Vec::new()),
                mask: AtomicU32::new(mask.bits()),
                options,
            }),
        }
    }

    /// Open the store
    ///
    /// `path` is a directory for a disk store, or one of `-`, `+`, `:`,
    /// `*`, `%` (or empty) for a volatile in-memory store.
    ///
    /// # Errors
    ///
    /// - `INVALID` when already open or `mode` is inconsistent
    /// - `NOREPOS` when the directory is missing and `CREATE` is not given,
    ///   or the path is not a directory
    /// - `NOPERM` when the lock is held elsewhere under `TRY_LOCK`
    /// - `BROKEN` when recovery finds damaged data it may not repair
    pub fn open(&self, path: &str, mode: OpenMode) -> Result<()> {
        let result = self.open_inner(path, mode, None);
        self.shared.track("open", result)
    }

    /// Open a disk store with an explicit configuration
    ///
    /// The configuration is written to `cellar.toml` so later `open` calls
    /// pick up the same settings.
    pub fn open_with_config(&self, path: &str, mode: OpenMode, config: CellarConfig) -> Result<()> {
        let result = self.open_inner(path, mode, Some(config));
        self.shared.track("open", result)
    }

    fn open_inner(&self, path: &str, mode: OpenMode, config: Option<CellarConfig>) -> Result<()> {
        let mut state = self.shared.state.write();
        if state.is_some() {
            return Err(Error::invalid("already opened"));
        }
        mode.validate()?;

        let mut mask = if self.shared.options.exceptional {
            ErrorMask::EXCEPTIONAL
        } else {
            ErrorMask::empty()
        };

        let open = if is_memory_path(path) {
            OpenStore {
                path: path.to_string(),
                mode,
                records: RwLock::new(RecordMap::new()),
                txn: TransactionManager::default(),
                disk: None,
            }
        } else {
            let (disk, records, next_txn_id) = DiskFiles::open(Path::new(path), mode, config)?;
            mask |= disk.config().error_mask();
            OpenStore {
                path: path.to_string(),
                mode,
                records: RwLock::new(records),
                txn: TransactionManager::new(next_txn_id),
                disk: Some(disk),
            }
        };

        info!(
            target: "cellar::store",
            path,
            kind = open.kind(),
            records = open.records.read().len(),
            writer = mode.is_writer(),
            "Store opened"
        );
        self.shared.mask.store(mask.bits(), Ordering::Relaxed);
        *state = Some(open);
        Ok(())
    }

    /// Close the store
    ///
    /// Rolls back an active transaction, invalidates every cursor, flushes
    /// the WAL and releases the file lock.
    ///
    /// # Errors
    ///
    /// `LOGIC` when the store is not open.
    pub fn close(&self) -> Result<()> {
        let result = self.close_inner();
        self.shared.track("close", result)
    }

    fn close_inner(&self) -> Result<()> {
        let mut state = self.shared.state.write();
        let open = state.take().ok_or_else(|| Error::logic("not opened"))?;
        let invalidated = self.shared.invalidate_cursors();

        let OpenStore {
            path,
            records,
            txn,
            disk,
            ..
        } = open;
        let mut records = records.into_inner();

        let mut result = Ok(());
        if let Some(active) = txn.discard() {
            warn!(
                target: "cellar::store",
                path = %path,
                txn_id = active.txn_id(),
                "Rolling back transaction left open at close"
            );
            let txn_id = active.txn_id();
            let abort = active.end_entry(false);
            active.rollback(&mut records);
            if let Some(disk) = &disk {
                result = disk.log(&[abort]);
                if result.is_err() {
                    disk.mark_unterminated(txn_id);
                }
            }
        }
        if let Some(disk) = disk {
            result = result.and(disk.close());
        }

        info!(
            target: "cellar::store",
            path = %path,
            records = records.len(),
            cursors_invalidated = invalidated,
            "Store closed"
        );
        result
    }

    /// True while the store is open
    pub fn is_open(&self) -> bool {
        self.shared.state.read().is_some()
    }

    /// Outcome of the last operation on this store
    pub fn error(&self) -> StoreError {
        self.shared.last_error.lock().clone()
    }

    /// Whether a binding should raise `err` as an exception
    ///
    /// Callback faults always propagate; coded errors are raised when the
    /// exceptional mask (from [`StoreOptions`] or `cellar.toml`) covers them.
    pub fn raises(&self, err: &Error) -> bool {
        self.shared.raises(err)
    }

    /// Run `f` against the open state, tracking the outcome
    pub(crate) fn with_open<T>(
        &self,
        op: &'static str,
        f: impl FnOnce(&OpenStore) -> Result<T>,
    ) -> Result<T> {
        let result = self.peek(f);
        self.shared.track(op, result)
    }

    /// Run `f` against the open state, leaving the retained error alone
    pub(crate) fn peek<T>(&self, f: impl FnOnce(&OpenStore) -> Result<T>) -> Result<T> {
        let state = self.shared.state.read();
        match state.as_ref() {
            Some(open) => f(open),
            None => Err(Error::invalid("not opened")),
        }
    }

    /// Number of records
    pub fn count(&self) -> Result<u64> {
        self.with_open("count", |open| Ok(open.records.read().len() as u64))
    }

    /// Approximate size in bytes
    ///
    /// Disk stores report checkpoint plus WAL file sizes; in-memory stores
    /// report key and value bytes plus per-record overhead.
    pub fn size(&self) -> Result<u64> {
        self.with_open("size", |open| Ok(open.size()))
    }

    /// Location passed to `open`
    pub fn path(&self) -> Result<String> {
        self.with_open("path", |open| Ok(open.path.clone()))
    }

    /// Miscellaneous status information
    pub fn status(&self) -> Result<BTreeMap<String, String>> {
        let cursors = self.shared.live_cursors();
        self.with_open("status", |open| {
            let mut status = BTreeMap::new();
            status.insert("type".to_string(), open.kind().to_string());
            status.insert("path".to_string(), open.path.clone());
            status.insert("count".to_string(), open.records.read().len().to_string());
            status.insert("size".to_string(), open.size().to_string());
            status.insert("transaction".to_string(), open.txn.is_active().to_string());
            status.insert("cursors".to_string(), cursors.to_string());
            status.insert("writer".to_string(), open.mode.is_writer().to_string());
            match &open.disk {
                Some(disk) => {
                    status.insert("durability".to_string(), disk.durability_name().to_string());
                    status.insert("wal_size".to_string(), disk.wal_size().to_string());
                    status.insert("directory".to_string(), disk.dir().display().to_string());
                }
                None => {
                    status.insert("durability".to_string(), "volatile".to_string());
                }
            }
            Ok(status)
        })
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        if self.is_open() {
            if let Err(e) = self.close_inner() {
                warn!(target: "cellar::store", error = %e, "Close on drop failed");
            }
        }
    }
}

impl OpenStore {
    pub(crate) fn kind(&self) -> &'static str {
        if self.disk.is_some() {
            "disk"
        } else {
            "memory"
        }
    }

    pub(crate) fn size(&self) -> u64 {
        self.size_of(&self.records.read())
    }

    /// Size computed against an already locked record map
    pub(crate) fn size_of(&self, records: &RecordMap) -> u64 {
        match &self.disk {
            Some(disk) => disk.file_size(),
            None => records.byte_size(),
        }
    }
}

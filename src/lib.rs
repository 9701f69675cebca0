//! cellardb - embedded ordered key-value store
//!
//! A store keeps byte-string keys in byte-wise order and supports point
//! operations, a visitor protocol, cursors, bulk operations, transactions,
//! snapshot images and N-way merge. Disk stores log every mutation to a
//! write-ahead log and recover from it on open; in-memory stores use the
//! same API with nothing on disk.
//!
//! # Quick Start
//!
//! ```
//! use cellardb::{OpenMode, Store};
//!
//! // Any of "-", "+", ":", "*", "%" opens a volatile in-memory store
//! let store = Store::new();
//! store.open("-", OpenMode::WRITER | OpenMode::CREATE)?;
//!
//! store.set("user:123", "Alice")?;
//! assert_eq!(store.get("user:123")?, b"Alice");
//!
//! let mut cursor = store.cursor()?;
//! cursor.jump()?;
//! assert_eq!(cursor.get_key(false)?, b"user:123");
//! # Ok::<(), cellardb::Error>(())
//! ```
//!
//! # Architecture
//!
//! - `cellar-core`: error taxonomy, open modes, visitor protocol
//! - `cellar-storage`: the ordered record map and key matching
//! - `cellar-concurrency`: transaction manager and undo journal
//! - `cellar-durability`: WAL, snapshot images, recovery
//! - `cellar-engine`: the `Store` handle tying them together

pub use cellar_core::{
    levdist, processor_fn, visitor_fn, Action, Error, ErrorCode, ErrorMask, FileProcessor,
    MergeMode, OpenMode, Result, StoreError, VisitResult, Visitor,
};
pub use cellar_durability::SnapshotInfo;
pub use cellar_engine::{
    CellarConfig, Cursor, Emitter, MapReduce, MapReduceJob, MapReduceOptions, Store, StoreOptions,
    ValueIter,
};

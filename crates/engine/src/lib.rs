//! Storage engine for cellardb
//!
//! This crate puts the lower layers together behind one handle:
//! - Store: open/close lifecycle, point operations, key matching
//! - Visitor protocol: `accept`, `accept_bulk`, `iterate`
//! - Bulk operations with optional atomicity
//! - Cursor: key-ordered traversal and positional updates
//! - Transactions with undo journal and WAL framing
//! - Snapshot images, checkpoints, copy and merge
//! - MapReduce over the records
//!
//! Recovery and the WAL live in `cellar-durability`; the record map in
//! `cellar-storage`; the transaction journal in `cellar-concurrency`.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bulk;
mod cursor;
pub mod database;
pub mod mapreduce;
mod merge;
mod records;
mod snapshot_ops;
mod transaction_ops;
mod visit;

pub use cursor::Cursor;
pub use database::{CellarConfig, Store, StoreOptions};
pub use mapreduce::{Emitter, MapReduce, MapReduceJob, MapReduceOptions, ValueIter};

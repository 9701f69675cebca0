//! Concurrency layer for cellardb
//!
//! This crate implements store-scoped transactions:
//! - TransactionManager: single active transaction, frame id allocation
//! - Transaction: WAL frame boundaries and undo journal
//! - UndoJournal: first prior image per key, restored on rollback
//!
//! Mutations inside a transaction go straight to the live record map under
//! the store's write lock; there is no isolation between the transaction
//! and other callers of the same store.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod manager;
pub mod transaction;

pub use manager::TransactionManager;
pub use transaction::{Transaction, UndoJournal};

//! Storage layer for cellardb
//!
//! This crate implements the in-memory record set behind every store:
//! - RecordMap: BTreeMap-based ordered record storage with byte accounting
//! - matching: prefix, regex and edit-distance key matching
//!
//! Durability (WAL, snapshot images, recovery) lives in `cellar-durability`;
//! locking lives in the engine.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod matching;
pub mod records;

pub use matching::{match_prefix, match_regex, match_similar};
pub use records::{RecordMap, RecordRef, RECORD_OVERHEAD};

//! Core types and traits for cellardb
//!
//! This crate defines the foundational types used throughout the system:
//! - Error: closed error-code taxonomy, engine error, retained error state
//! - OpenMode / MergeMode / ErrorMask: flag and policy types
//! - Visitor / Action / FileProcessor: callback protocols
//! - number: integer and decimal record encodings
//! - distance: Levenshtein distance for fuzzy key matching

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod distance;
pub mod error;
pub mod number;
pub mod types;
pub mod visitor;

pub use distance::levdist;
pub use error::{Error, ErrorCode, Result, StoreError};
pub use types::{ErrorMask, MergeMode, OpenMode};
pub use visitor::{processor_fn, visitor_fn, Action, FileProcessor, VisitResult, Visitor};

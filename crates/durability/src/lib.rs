//! Durability layer for cellardb
//!
//! This crate handles everything that touches disk:
//!
//! - WAL: single append-only log of autocommit entries and transaction frames
//! - Durability modes: Always, Standard (default)
//! - Snapshot images: checkpoint and dump/load format with CRC32
//! - Recovery: snapshot load + WAL replay with tail repair

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod encoding;
pub mod recovery;
pub mod snapshot;
pub mod wal;

pub use encoding::{decode_entry, encode_entries, encode_entry};
pub use recovery::{
    recover, replay_entries, RecoveryError, RecoveryOptions, RecoveryResult, ReplayStats,
};
pub use snapshot::{
    read_snapshot, read_snapshot_file, write_records, write_snapshot, write_snapshot_file,
    SnapshotInfo, SNAPSHOT_MAGIC, SNAPSHOT_VERSION,
};
pub use wal::{DurabilityMode, Wal, WalEntry, WalScan};

use cellar_core::Error;

/// WAL failures
#[derive(Debug, thiserror::Error)]
pub enum WalError {
    /// I/O failure on the log file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Entry could not be serialized
    #[error("encode error: {0}")]
    Encode(String),

    /// Log ends inside an entry
    #[error("incomplete entry at offset {offset}: have {have} bytes, need {needed}")]
    Incomplete {
        /// File offset of the entry
        offset: u64,
        /// Bytes available
        have: usize,
        /// Bytes required
        needed: usize,
    },

    /// Entry failed validation
    #[error("corrupt entry at offset {offset}: {reason}")]
    Corrupt {
        /// File offset of the entry
        offset: u64,
        /// What failed
        reason: String,
    },
}

/// Snapshot image failures
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Image does not start with `CELLSNAP`
    #[error("invalid snapshot magic")]
    InvalidMagic,

    /// Unknown format version
    #[error("unsupported snapshot version {0}")]
    UnsupportedVersion(u32),

    /// Image ends early
    #[error("snapshot truncated")]
    Truncated,

    /// Bytes after the checksum
    #[error("trailing data after snapshot checksum")]
    TrailingData,

    /// CRC32 mismatch
    #[error("snapshot checksum mismatch: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        /// Stored checksum
        expected: u32,
        /// Computed checksum
        actual: u32,
    },

    /// Writer yielded a different number of records than announced
    #[error("record count mismatch: header says {expected}, wrote {actual}")]
    CountMismatch {
        /// Announced count
        expected: u64,
        /// Records written
        actual: u64,
    },

    /// Key or value longer than `u32::MAX`
    #[error("record of {0} bytes exceeds the image format limit")]
    RecordTooLarge(usize),
}

impl From<WalError> for Error {
    fn from(e: WalError) -> Self {
        match e {
            WalError::Io(io) => Error::from(io),
            WalError::Encode(msg) => Error::system(format!("WAL encode: {}", msg)),
            damaged => Error::broken(format!("WAL: {}", damaged)),
        }
    }
}

impl From<SnapshotError> for Error {
    fn from(e: SnapshotError) -> Self {
        match e {
            SnapshotError::Io(io) if io.kind() != std::io::ErrorKind::UnexpectedEof => {
                Error::from(io)
            }
            SnapshotError::RecordTooLarge(len) => {
                Error::invalid(format!("record of {} bytes is too large", len))
            }
            other => Error::broken(format!("snapshot: {}", other)),
        }
    }
}

impl From<RecoveryError> for Error {
    fn from(e: RecoveryError) -> Self {
        match e {
            RecoveryError::Snapshot(s) => s.into(),
            RecoveryError::Wal(w) => w.into(),
        }
    }
}

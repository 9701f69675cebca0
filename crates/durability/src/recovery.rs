//! Crash recovery: snapshot load + WAL replay
//!
//! ## Replay Process
//!
//! 1. Load the last checkpoint image (`data.snap`), if any
//! 2. Scan `wal.log` up to its first undecodable entry
//! 3. Repair a damaged tail by truncating it, or fail under `NO_REPAIR`
//! 4. Apply autocommit entries immediately
//! 5. Buffer transaction frames, applying them only on `CommitTxn`
//! 6. Discard aborted frames and a trailing frame without `CommitTxn`
//!
//! Entries carry resulting values, so replay never consults prior state.

use crate::snapshot::read_snapshot_file;
use crate::wal::{Wal, WalEntry};
use crate::{SnapshotError, WalError};
use cellar_storage::RecordMap;
use std::path::Path;
use tracing::{info, warn};

/// Statistics from WAL replay
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReplayStats {
    /// Records loaded from the checkpoint image
    pub snapshot_records: usize,
    /// Autocommit entries applied
    pub autocommit_applied: usize,
    /// Committed frames applied
    pub txns_applied: usize,
    /// Mutations applied from committed frames
    pub txn_entries_applied: usize,
    /// Frames discarded because they never committed
    pub incomplete_txns: usize,
    /// Frames discarded because they aborted
    pub aborted_txns: usize,
    /// Boundaries with no matching open frame
    pub orphaned_entries: usize,
    /// Bytes cut from a damaged WAL tail
    pub truncated_bytes: u64,
}

/// Options for recovery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecoveryOptions {
    /// Truncate a damaged WAL tail instead of failing
    pub repair: bool,
    /// Allowed to modify files on disk
    pub writable: bool,
}

impl Default for RecoveryOptions {
    fn default() -> Self {
        RecoveryOptions {
            repair: true,
            writable: true,
        }
    }
}

/// Recovered store state
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Records after replay
    pub records: RecordMap,
    /// Replay statistics
    pub stats: ReplayStats,
    /// Next unused transaction id
    pub next_txn_id: u64,
    /// Frame left open at the end of the log
    ///
    /// The caller must log an `AbortTxn` for it before appending, or later
    /// autocommit entries would be read back as part of that frame.
    pub open_txn: Option<u64>,
    /// WAL size after any repair
    pub wal_len: u64,
}

/// Errors raised during recovery
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// Checkpoint image unreadable
    #[error("snapshot: {0}")]
    Snapshot(#[from] SnapshotError),
    /// WAL unreadable or damaged under `NO_REPAIR`
    #[error("wal: {0}")]
    Wal(#[from] WalError),
}

struct OpenFrame {
    txn_id: u64,
    entries: Vec<WalEntry>,
}

/// Apply a WAL entry sequence on top of `records`
///
/// Returns the still-open frame id (if the sequence ends inside one) and
/// the highest transaction id seen.
pub fn replay_entries(
    records: &mut RecordMap,
    entries: Vec<WalEntry>,
    stats: &mut ReplayStats,
) -> (Option<u64>, u64) {
    let mut open: Option<OpenFrame> = None;
    let mut max_txn_id = 0u64;

    for entry in entries {
        if let Some(id) = entry.txn_id() {
            max_txn_id = max_txn_id.max(id);
        }
        match entry {
            WalEntry::BeginTxn { txn_id, .. } => {
                if open.is_some() {
                    stats.incomplete_txns += 1;
                }
                open = Some(OpenFrame {
                    txn_id,
                    entries: Vec::new(),
                });
            }
            WalEntry::CommitTxn { txn_id } => match open.take() {
                Some(frame) if frame.txn_id == txn_id => {
                    stats.txn_entries_applied += frame.entries.len();
                    for e in frame.entries {
                        apply(records, e);
                    }
                    stats.txns_applied += 1;
                }
                other => {
                    open = other;
                    stats.orphaned_entries += 1;
                }
            },
            WalEntry::AbortTxn { txn_id } => match open.take() {
                Some(frame) if frame.txn_id == txn_id => stats.aborted_txns += 1,
                other => {
                    open = other;
                    stats.orphaned_entries += 1;
                }
            },
            mutation => match open.as_mut() {
                Some(frame) => frame.entries.push(mutation),
                None => {
                    apply(records, mutation);
                    stats.autocommit_applied += 1;
                }
            },
        }
    }

    let open_txn = open.map(|frame| {
        stats.incomplete_txns += 1;
        frame.txn_id
    });
    (open_txn, max_txn_id)
}

fn apply(records: &mut RecordMap, entry: WalEntry) {
    match entry {
        WalEntry::Put { key, value } => {
            records.put(key, value);
        }
        WalEntry::Remove { key } => {
            records.remove(&key);
        }
        WalEntry::Clear => records.clear(),
        _ => {}
    }
}

/// Rebuild a store's records from its checkpoint image and WAL
pub fn recover(
    snapshot_path: &Path,
    wal_path: &Path,
    options: RecoveryOptions,
) -> Result<RecoveryResult, RecoveryError> {
    let mut stats = ReplayStats::default();

    let mut records = if snapshot_path.exists() {
        read_snapshot_file(snapshot_path)?
    } else {
        RecordMap::new()
    };
    stats.snapshot_records = records.len();

    let scan = Wal::scan(wal_path)?;
    let mut wal_len = scan.file_len;
    if let Some(damage) = scan.damage {
        if !options.repair {
            return Err(RecoveryError::Wal(damage));
        }
        stats.truncated_bytes = scan.file_len - scan.valid_len;
        warn!(
            target: "cellar::wal",
            path = %wal_path.display(),
            valid_len = scan.valid_len,
            truncated_bytes = stats.truncated_bytes,
            reason = %damage,
            "Truncating damaged WAL tail"
        );
        if options.writable {
            Wal::truncate(wal_path, scan.valid_len)?;
            wal_len = scan.valid_len;
        }
    }

    let (open_txn, max_txn_id) = replay_entries(&mut records, scan.entries, &mut stats);

    info!(
        target: "cellar::wal",
        records = records.len(),
        snapshot_records = stats.snapshot_records,
        autocommit = stats.autocommit_applied,
        txns = stats.txns_applied,
        incomplete = stats.incomplete_txns,
        aborted = stats.aborted_txns,
        "Recovery complete"
    );

    Ok(RecoveryResult {
        records,
        stats,
        next_txn_id: max_txn_id + 1,
        open_txn,
        wal_len,
    })
}

//! Write-Ahead Log (WAL) entry types and file operations
//!
//! The WAL is a single append-only file (`wal.log`) of encoded entries
//! (see [`crate::encoding`]). Autocommit mutations are logged as bare
//! `Put`/`Remove`/`Clear` entries; transactions and atomic batches are
//! framed by `BeginTxn` ... `CommitTxn`/`AbortTxn`.
//!
//! Values are logged physically (the value the record holds after the
//! mutation), so replaying any suffix of the log twice is harmless.

use crate::encoding::{decode_entry, encode_entries};
use crate::WalError;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

// ============================================================================
// WAL Entry Types
// ============================================================================

/// One logged mutation or transaction boundary
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WalEntry {
    /// Record now holds `value`
    Put {
        /// Record key
        key: Vec<u8>,
        /// Resulting value
        value: Vec<u8>,
    },
    /// Record removed
    Remove {
        /// Record key
        key: Vec<u8>,
    },
    /// Every record removed
    Clear,
    /// Start of a transaction frame
    BeginTxn {
        /// Transaction identifier
        txn_id: u64,
        /// Whether the commit is fsynced
        hard: bool,
    },
    /// Frame committed; its entries take effect
    CommitTxn {
        /// Transaction identifier
        txn_id: u64,
    },
    /// Frame rolled back; its entries are discarded
    AbortTxn {
        /// Transaction identifier
        txn_id: u64,
    },
}

impl WalEntry {
    /// True for entries that change records
    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            WalEntry::Put { .. } | WalEntry::Remove { .. } | WalEntry::Clear
        )
    }

    /// Transaction id of a frame boundary
    pub fn txn_id(&self) -> Option<u64> {
        match self {
            WalEntry::BeginTxn { txn_id, .. }
            | WalEntry::CommitTxn { txn_id }
            | WalEntry::AbortTxn { txn_id } => Some(*txn_id),
            _ => None,
        }
    }
}

// ============================================================================
// Durability Modes
// ============================================================================

/// When appended entries reach stable storage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DurabilityMode {
    /// fsync after every append
    Always,

    /// fsync every `batch_size` appends OR every `interval_ms` milliseconds
    ///
    /// Entries in between sit in the process buffer; a crash may lose up to
    /// one batch.
    Standard {
        /// Maximum time between fsyncs in milliseconds
        interval_ms: u64,
        /// Maximum appends between fsyncs
        batch_size: usize,
    },
}

impl DurabilityMode {
    /// Name used in configuration files and `status()`
    pub fn name(&self) -> &'static str {
        match self {
            DurabilityMode::Always => "always",
            DurabilityMode::Standard { .. } => "standard",
        }
    }
}

impl Default for DurabilityMode {
    fn default() -> Self {
        DurabilityMode::Standard {
            interval_ms: 100,
            batch_size: 1000,
        }
    }
}

// ============================================================================
// WAL File Operations
// ============================================================================

/// Result of scanning a WAL file
#[derive(Debug, Default)]
pub struct WalScan {
    /// Entries decoded from the valid prefix, in log order
    pub entries: Vec<WalEntry>,
    /// Length in bytes of the valid prefix
    pub valid_len: u64,
    /// Total file length
    pub file_len: u64,
    /// Why decoding stopped before the end of the file, if it did
    pub damage: Option<WalError>,
}

impl WalScan {
    /// True when the file ends in a torn or corrupt region
    pub fn is_damaged(&self) -> bool {
        self.damage.is_some()
    }
}

/// Append-only WAL file with a durability policy
///
/// Not internally synchronized; the engine keeps it behind a mutex.
pub struct Wal {
    path: PathBuf,
    writer: BufWriter<File>,
    /// Bytes in the file, including still-buffered bytes
    size: u64,
    mode: DurabilityMode,
    last_sync: Instant,
    appends_since_sync: usize,
}

impl std::fmt::Debug for Wal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Wal")
            .field("path", &self.path)
            .field("size", &self.size)
            .field("mode", &self.mode)
            .finish()
    }
}

impl Wal {
    /// Open (creating if missing) a WAL file for appending
    pub fn open(path: impl AsRef<Path>, mode: DurabilityMode) -> Result<Self, WalError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let size = file.metadata()?.len();
        debug!(target: "cellar::wal", path = %path.display(), size, mode = mode.name(), "WAL opened");
        Ok(Wal {
            path,
            writer: BufWriter::new(file),
            size,
            mode,
            last_sync: Instant::now(),
            appends_since_sync: 0,
        })
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current size in bytes, buffered bytes included
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Durability policy
    pub fn mode(&self) -> DurabilityMode {
        self.mode
    }

    /// Append entries and apply the durability policy
    pub fn append(&mut self, entries: &[WalEntry]) -> Result<(), WalError> {
        self.write_entries(entries)?;
        self.apply_policy()
    }

    /// Append entries that close a transaction frame
    ///
    /// `hard` forces an fsync; otherwise the buffer is at least handed to
    /// the OS before returning.
    pub fn append_commit(&mut self, entries: &[WalEntry], hard: bool) -> Result<(), WalError> {
        self.write_entries(entries)?;
        if hard || self.mode == DurabilityMode::Always {
            self.sync()
        } else {
            self.flush()?;
            self.apply_policy()
        }
    }

    /// Hand buffered bytes to the OS
    pub fn flush(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        Ok(())
    }

    /// Flush and fsync
    pub fn sync(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_data()?;
        self.last_sync = Instant::now();
        self.appends_since_sync = 0;
        trace!(target: "cellar::wal", size = self.size, "WAL synced");
        Ok(())
    }

    /// Discard every entry (after a checkpoint captured them)
    pub fn reset(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        let file = self.writer.get_ref();
        file.set_len(0)?;
        file.sync_all()?;
        self.size = 0;
        self.appends_since_sync = 0;
        self.last_sync = Instant::now();
        debug!(target: "cellar::wal", path = %self.path.display(), "WAL reset");
        Ok(())
    }

    fn write_entries(&mut self, entries: &[WalEntry]) -> Result<(), WalError> {
        if entries.is_empty() {
            return Ok(());
        }
        let buf = encode_entries(entries)?;
        self.writer.write_all(&buf)?;
        self.size += buf.len() as u64;
        self.appends_since_sync += entries.len();
        Ok(())
    }

    fn apply_policy(&mut self) -> Result<(), WalError> {
        match self.mode {
            DurabilityMode::Always => self.sync(),
            DurabilityMode::Standard {
                interval_ms,
                batch_size,
            } => {
                let overdue = self.last_sync.elapsed() >= Duration::from_millis(interval_ms);
                if self.appends_since_sync >= batch_size.max(1) || overdue {
                    self.sync()
                } else {
                    Ok(())
                }
            }
        }
    }

    /// Decode a WAL file up to its first undecodable entry
    ///
    /// A missing file scans as empty.
    pub fn scan(path: impl AsRef<Path>) -> Result<WalScan, WalError> {
        let path = path.as_ref();
        let mut buf = Vec::new();
        match File::open(path) {
            Ok(mut file) => {
                file.read_to_end(&mut buf)?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(WalScan::default()),
            Err(e) => return Err(e.into()),
        }

        let mut scan = WalScan {
            file_len: buf.len() as u64,
            ..WalScan::default()
        };
        let mut offset = 0usize;
        while offset < buf.len() {
            match decode_entry(&buf[offset..], offset as u64) {
                Ok((entry, used)) => {
                    scan.entries.push(entry);
                    offset += used;
                }
                Err(e) => {
                    scan.damage = Some(e);
                    break;
                }
            }
        }
        scan.valid_len = offset as u64;
        Ok(scan)
    }

    /// Cut a WAL file back to `len` bytes
    pub fn truncate(path: impl AsRef<Path>, len: u64) -> Result<(), WalError> {
        let file = OpenOptions::new().write(true).open(path.as_ref())?;
        file.set_len(len)?;
        file.sync_all()?;
        Ok(())
    }
}

impl Drop for Wal {
    fn drop(&mut self) {
        let _ = self.writer.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn put(k: &str, v: &str) -> WalEntry {
        WalEntry::Put {
            key: k.as_bytes().to_vec(),
            value: v.as_bytes().to_vec(),
        }
    }

    #[test]
    fn test_append_and_scan() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut wal = Wal::open(&path, DurabilityMode::Always).unwrap();
            wal.append(&[put("a", "1"), put("b", "2")]).unwrap();
            wal.append(&[WalEntry::Remove { key: b"a".to_vec() }]).unwrap();
            assert!(wal.size() > 0);
        }
        let scan = Wal::scan(&path).unwrap();
        assert!(!scan.is_damaged());
        assert_eq!(scan.entries.len(), 3);
        assert_eq!(scan.valid_len, scan.file_len);
    }

    #[test]
    fn test_scan_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let scan = Wal::scan(dir.path().join("absent.log")).unwrap();
        assert!(scan.entries.is_empty());
        assert_eq!(scan.valid_len, 0);
    }

    #[test]
    fn test_torn_tail_detected_and_truncated() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut wal = Wal::open(&path, DurabilityMode::Always).unwrap();
            wal.append(&[put("a", "1"), put("b", "2")]).unwrap();
        }
        let full = std::fs::metadata(&path).unwrap().len();
        Wal::truncate(&path, full - 3).unwrap();

        let scan = Wal::scan(&path).unwrap();
        assert!(scan.is_damaged());
        assert_eq!(scan.entries, vec![put("a", "1")]);

        Wal::truncate(&path, scan.valid_len).unwrap();
        let rescan = Wal::scan(&path).unwrap();
        assert!(!rescan.is_damaged());
        assert_eq!(rescan.entries.len(), 1);
    }

    #[test]
    fn test_reset_empties_log() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");
        let mut wal = Wal::open(&path, DurabilityMode::default()).unwrap();
        wal.append(&[put("a", "1")]).unwrap();
        wal.reset().unwrap();
        assert_eq!(wal.size(), 0);
        wal.append_commit(&[put("b", "2")], false).unwrap();
        drop(wal);
        assert_eq!(Wal::scan(&path).unwrap().entries, vec![put("b", "2")]);
    }

    #[test]
    fn test_reopen_appends_after_existing_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("wal.log");
        {
            let mut wal = Wal::open(&path, DurabilityMode::default()).unwrap();
            wal.append(&[put("a", "1")]).unwrap();
        }
        {
            let mut wal = Wal::open(&path, DurabilityMode::default()).unwrap();
            wal.append(&[put("b", "2")]).unwrap();
        }
        assert_eq!(Wal::scan(&path).unwrap().entries.len(), 2);
    }

    #[test]
    fn test_entry_helpers() {
        assert!(put("a", "1").is_mutation());
        assert!(WalEntry::Clear.is_mutation());
        assert!(!WalEntry::CommitTxn { txn_id: 3 }.is_mutation());
        assert_eq!(WalEntry::AbortTxn { txn_id: 3 }.txn_id(), Some(3));
        assert_eq!(put("a", "1").txn_id(), None);
        assert_eq!(DurabilityMode::Always.name(), "always");
        assert_eq!(DurabilityMode::default().name(), "standard");
    }
}

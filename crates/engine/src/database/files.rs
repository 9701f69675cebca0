//! Files of a disk store
//!
//! ```text
//! <dir>/.lock        advisory lock (fs2)
//! <dir>/cellar.toml  configuration
//! <dir>/data.snap    last checkpoint image
//! <dir>/wal.log      mutations since the checkpoint
//! ```

use super::config::{CellarConfig, CONFIG_FILE_NAME};
use cellar_core::{Error, OpenMode, Result};
use cellar_durability::{
    recover, write_snapshot_file, DurabilityMode, RecoveryOptions, RecoveryResult, Wal, WalEntry,
};
use cellar_storage::RecordMap;
use fs2::FileExt;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
#[cfg(test)]
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{info, warn};

/// Lock file name
pub const LOCK_FILE_NAME: &str = ".lock";
/// Checkpoint image file name
pub const SNAPSHOT_FILE_NAME: &str = "data.snap";
/// WAL file name
pub const WAL_FILE_NAME: &str = "wal.log";

/// Paths selecting a volatile in-memory store
pub(crate) fn is_memory_path(path: &str) -> bool {
    matches!(path, "" | "-" | "+" | ":" | "*" | "%")
}

/// The open WAL and a frame left without its Commit/Abort entry
struct WalState {
    wal: Wal,
    unterminated: Option<u64>,
}

impl WalState {
    /// Close a dangling frame before anything else reaches the log
    fn terminate(&mut self) -> Result<()> {
        if let Some(txn_id) = self.unterminated {
            self.wal.append(&[WalEntry::AbortTxn { txn_id }])?;
            self.unterminated = None;
            warn!(target: "cellar::wal", txn_id, "Dangling transaction frame aborted");
        }
        Ok(())
    }
}

pub(crate) struct DiskFiles {
    dir: PathBuf,
    config: CellarConfig,
    /// Absent for readers
    wal: Option<Mutex<WalState>>,
    /// Absent under NO_LOCK
    lock: Option<File>,
    #[cfg(test)]
    fail_appends: AtomicBool,
}

impl DiskFiles {
    /// Lock, configure and recover a store directory
    pub(crate) fn open(
        dir: &Path,
        mode: OpenMode,
        explicit: Option<CellarConfig>,
    ) -> Result<(DiskFiles, RecordMap, u64)> {
        let writer = mode.is_writer();
        if !dir.exists() {
            if writer && mode.contains(OpenMode::CREATE) {
                std::fs::create_dir_all(dir)?;
            } else {
                return Err(Error::no_repository(format!(
                    "no store at '{}'",
                    dir.display()
                )));
            }
        }
        if !dir.is_dir() {
            return Err(Error::no_repository(format!(
                "'{}' is not a directory",
                dir.display()
            )));
        }

        let lock = if mode.contains(OpenMode::NO_LOCK) {
            None
        } else {
            Some(acquire_lock(dir, mode)?)
        };

        let config_path = dir.join(CONFIG_FILE_NAME);
        let config = match explicit {
            Some(cfg) => {
                cfg.durability_mode()?;
                if writer {
                    cfg.write_to_file(&config_path)?;
                }
                cfg
            }
            None => {
                if writer {
                    CellarConfig::write_default_if_missing(&config_path)?;
                }
                if config_path.exists() {
                    CellarConfig::from_file(&config_path)?
                } else {
                    CellarConfig::default()
                }
            }
        };

        let snapshot_path = dir.join(SNAPSHOT_FILE_NAME);
        let wal_path = dir.join(WAL_FILE_NAME);
        if writer && mode.contains(OpenMode::TRUNCATE) {
            remove_if_exists(&snapshot_path)?;
            remove_if_exists(&wal_path)?;
        }

        let RecoveryResult {
            records,
            stats,
            next_txn_id,
            open_txn,
            wal_len,
        } = recover(
            &snapshot_path,
            &wal_path,
            RecoveryOptions {
                repair: !mode.contains(OpenMode::NO_REPAIR),
                writable: writer,
            },
        )?;
        if stats.truncated_bytes > 0 && !writer {
            warn!(
                target: "cellar::store",
                path = %dir.display(),
                "Damaged WAL tail ignored; reopen as writer to repair it"
            );
        }

        let wal = if writer {
            let durability = if mode.contains(OpenMode::AUTO_SYNC) {
                DurabilityMode::Always
            } else {
                config.durability_mode()?
            };
            let mut wal = Wal::open(&wal_path, durability)?;
            if let Some(txn_id) = open_txn {
                wal.append_commit(&[WalEntry::AbortTxn { txn_id }], true)?;
            }
            Some(Mutex::new(WalState {
                wal,
                unterminated: None,
            }))
        } else {
            None
        };

        let files = DiskFiles {
            dir: dir.to_path_buf(),
            config,
            wal,
            lock,
            #[cfg(test)]
            fail_appends: AtomicBool::new(false),
        };
        if writer && wal_len > files.config.checkpoint_wal_bytes {
            info!(target: "cellar::store", wal_len, "WAL over checkpoint threshold");
            files.checkpoint(&records)?;
        }
        Ok((files, records, next_txn_id))
    }

    pub(crate) fn dir(&self) -> &Path {
        &self.dir
    }

    pub(crate) fn config(&self) -> &CellarConfig {
        &self.config
    }

    fn wal(&self) -> Result<&Mutex<WalState>> {
        self.wal
            .as_ref()
            .ok_or_else(|| Error::no_permission("store is opened as a reader"))
    }

    #[cfg(test)]
    pub(crate) fn fail_appends(&self, fail: bool) {
        self.fail_appends.store(fail, Ordering::SeqCst);
    }

    #[cfg(test)]
    fn injected_failure(&self) -> Result<()> {
        if self.fail_appends.load(Ordering::SeqCst) {
            return Err(Error::system("injected WAL failure"));
        }
        Ok(())
    }

    #[cfg(not(test))]
    fn injected_failure(&self) -> Result<()> {
        Ok(())
    }

    /// Append entries under the durability policy
    pub(crate) fn log(&self, entries: &[WalEntry]) -> Result<()> {
        let mut state = self.wal()?.lock();
        self.injected_failure()?;
        state.terminate()?;
        state.wal.append(entries)?;
        Ok(())
    }

    /// Append entries closing a frame; `hard` forces an fsync
    pub(crate) fn log_commit(&self, entries: &[WalEntry], hard: bool) -> Result<()> {
        let mut state = self.wal()?.lock();
        self.injected_failure()?;
        state.terminate()?;
        state.wal.append_commit(entries, hard)?;
        Ok(())
    }

    /// Remember a frame whose Commit/Abort entry never reached the log
    ///
    /// The next append writes its Abort first, so later autocommit
    /// entries are not swallowed by the open frame during recovery.
    pub(crate) fn mark_unterminated(&self, txn_id: u64) {
        if let Some(wal) = &self.wal {
            wal.lock().unterminated = Some(txn_id);
        }
    }

    /// Flush the WAL, fsyncing when `hard`
    pub(crate) fn sync(&self, hard: bool) -> Result<()> {
        if let Some(wal) = &self.wal {
            let mut state = wal.lock();
            if hard {
                state.wal.sync()?;
            } else {
                state.wal.flush()?;
            }
        }
        Ok(())
    }

    /// Write `records` as the checkpoint image and empty the WAL
    ///
    /// The caller holds the record write lock, so no entry can slip in
    /// between the image and the reset.
    pub(crate) fn checkpoint(&self, records: &RecordMap) -> Result<()> {
        let mut state = self.wal()?.lock();
        state.wal.flush()?;
        let info = write_snapshot_file(&self.dir.join(SNAPSHOT_FILE_NAME), records)?;
        state.wal.reset()?;
        state.unterminated = None;
        info!(
            target: "cellar::store",
            path = %self.dir.display(),
            records = info.records,
            size_bytes = info.size_bytes,
            "Checkpoint written"
        );
        Ok(())
    }

    /// Current WAL size in bytes
    pub(crate) fn wal_size(&self) -> u64 {
        match &self.wal {
            Some(wal) => wal.lock().wal.size(),
            None => file_len(&self.dir.join(WAL_FILE_NAME)),
        }
    }

    /// Checkpoint image plus WAL size
    pub(crate) fn file_size(&self) -> u64 {
        file_len(&self.dir.join(SNAPSHOT_FILE_NAME)) + self.wal_size()
    }

    /// Name of the effective durability mode
    pub(crate) fn durability_name(&self) -> &'static str {
        match &self.wal {
            Some(wal) => wal.lock().wal.mode().name(),
            None => "read-only",
        }
    }

    /// Flush and fsync the WAL, then release the lock
    pub(crate) fn close(self) -> Result<()> {
        let synced = match &self.wal {
            Some(wal) => {
                let mut state = wal.lock();
                state
                    .terminate()
                    .and_then(|()| state.wal.sync().map_err(Error::from))
            }
            None => Ok(()),
        };
        if let Some(lock) = &self.lock {
            if let Err(e) = FileExt::unlock(lock) {
                warn!(target: "cellar::store", error = %e, "Failed to release store lock");
            }
        }
        synced
    }
}

fn acquire_lock(dir: &Path, mode: OpenMode) -> Result<File> {
    let lock_path = dir.join(LOCK_FILE_NAME);
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(&lock_path)?;

    let busy = |_| {
        Error::no_permission(format!(
            "store at '{}' is locked by another process",
            dir.display()
        ))
    };
    match (mode.is_writer(), mode.contains(OpenMode::TRY_LOCK)) {
        (true, true) => FileExt::try_lock_exclusive(&file).map_err(busy)?,
        (true, false) => FileExt::lock_exclusive(&file)?,
        (false, true) => FileExt::try_lock_shared(&file).map_err(busy)?,
        (false, false) => FileExt::lock_shared(&file)?,
    }
    Ok(file)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn file_len(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_paths() {
        for path in ["", "-", "+", ":", "*", "%"] {
            assert!(is_memory_path(path), "{:?}", path);
        }
        assert!(!is_memory_path("data"));
        assert!(!is_memory_path("./-"));
    }
}

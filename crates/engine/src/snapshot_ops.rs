//! Snapshot images, checkpoints and whole-store processing
//!
//! ## Operations
//!
//! - `dump_snapshot` / `dump_snapshot_to`: write the current records as a
//!   snapshot image (shared lock)
//! - `load_snapshot` / `load_snapshot_from`: validate an image completely,
//!   then replace the content with it as one atomic batch
//! - `synchronize`: checkpoint (disk writer) or flush, then run a file
//!   processor with the store quiesced
//! - `occupy`: run a file processor under the whole-store lock
//! - `copy`: write a point-in-time store directory elsewhere

use crate::database::{Change, OpenStore, SNAPSHOT_FILE_NAME, WAL_FILE_NAME};
use crate::Store;
use cellar_core::{Error, FileProcessor, Result};
use cellar_durability::{
    read_snapshot, read_snapshot_file, write_records, write_snapshot_file, SnapshotInfo,
};
use cellar_storage::RecordMap;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use tracing::info;

fn run_processor(
    processor: Option<&mut dyn FileProcessor>,
    open: &OpenStore,
    records: &RecordMap,
) -> Result<()> {
    let Some(processor) = processor else {
        return Ok(());
    };
    let keep_going = processor
        .process(&open.path, records.len() as u64, open.size_of(records))
        .map_err(Error::Callback)?;
    if keep_going {
        Ok(())
    } else {
        Err(Error::logic("file processor aborted the operation"))
    }
}

impl OpenStore {
    fn load(&self, loaded: RecordMap) -> Result<u64> {
        let count = loaded.len() as u64;
        let mut changes = Vec::with_capacity(loaded.len() + 1);
        changes.push(Change::Clear);
        changes.extend(
            loaded
                .to_records()
                .into_iter()
                .map(|(key, value)| Change::Put(key, value)),
        );
        let mut records = self.records.write();
        self.write_batch(&mut records, changes)?;
        Ok(count)
    }
}

impl Store {
    /// Write the current records as a snapshot image file
    ///
    /// The file is written next to `path` and renamed into place.
    pub fn dump_snapshot(&self, path: impl AsRef<Path>) -> Result<SnapshotInfo> {
        let path = path.as_ref();
        self.with_open("dump_snapshot", |open| {
            let info = write_snapshot_file(path, &open.records.read())?;
            info!(
                target: "cellar::store",
                path = %path.display(),
                records = info.records,
                "Snapshot dumped"
            );
            Ok(info)
        })
    }

    /// Write the current records as a snapshot image to `writer`
    pub fn dump_snapshot_to<W: Write>(&self, writer: W) -> Result<SnapshotInfo> {
        self.with_open("dump_snapshot", |open| {
            let mut writer = BufWriter::new(writer);
            let info = write_records(&mut writer, &open.records.read())?;
            writer.flush()?;
            Ok(info)
        })
    }

    /// Replace the content with a snapshot image file
    ///
    /// Returns the number of records loaded.
    ///
    /// # Errors
    ///
    /// `BROKEN` when the image fails validation; the content is unchanged.
    pub fn load_snapshot(&self, path: impl AsRef<Path>) -> Result<u64> {
        let path = path.as_ref();
        self.with_open("load_snapshot", |open| {
            open.check_writable()?;
            let loaded = read_snapshot_file(path)?;
            let count = open.load(loaded)?;
            info!(
                target: "cellar::store",
                path = %path.display(),
                records = count,
                "Snapshot loaded"
            );
            Ok(count)
        })
    }

    /// Replace the content with a snapshot image read from `reader`
    pub fn load_snapshot_from<R: Read>(&self, reader: R) -> Result<u64> {
        self.with_open("load_snapshot", |open| {
            open.check_writable()?;
            let loaded = read_snapshot(BufReader::new(reader))?;
            open.load(loaded)
        })
    }

    /// Make the store durable, then run `processor` on the quiesced store
    ///
    /// A disk writer writes a checkpoint (image plus WAL reset) unless a
    /// transaction is active, in which case the WAL is only flushed, with
    /// an fsync when `hard`.
    ///
    /// # Errors
    ///
    /// `LOGIC` when the processor returns `Ok(false)`; `Error::Callback`
    /// when it fails.
    pub fn synchronize(&self, hard: bool, processor: Option<&mut dyn FileProcessor>) -> Result<()> {
        self.with_open("synchronize", |open| {
            let records = open.records.write();
            if let Some(disk) = &open.disk {
                if open.mode.is_writer() && !open.txn.is_active() {
                    disk.checkpoint(&records)?;
                } else {
                    disk.sync(hard)?;
                }
            }
            run_processor(processor, open, &records)
        })
    }

    /// Run `processor` under the whole-store lock without flushing
    ///
    /// `writable` takes the exclusive lock, otherwise the shared one.
    pub fn occupy(&self, writable: bool, processor: Option<&mut dyn FileProcessor>) -> Result<()> {
        self.with_open("occupy", |open| {
            if writable {
                run_processor(processor, open, &open.records.write())
            } else {
                run_processor(processor, open, &open.records.read())
            }
        })
    }

    /// Write a point-in-time copy of the store as a store directory
    ///
    /// The copy holds a checkpoint image and no WAL, and can be opened
    /// like any disk store.
    pub fn copy(&self, destination: impl AsRef<Path>) -> Result<()> {
        let destination = destination.as_ref();
        self.with_open("copy", |open| {
            if let Some(disk) = &open.disk {
                let same = match (disk.dir().canonicalize(), destination.canonicalize()) {
                    (Ok(ours), Ok(theirs)) => ours == theirs,
                    _ => false,
                };
                if same {
                    return Err(Error::invalid("cannot copy a store onto itself"));
                }
            }
            std::fs::create_dir_all(destination)?;
            let records = open.records.read();
            let info = write_snapshot_file(&destination.join(SNAPSHOT_FILE_NAME), &records)?;
            match std::fs::remove_file(destination.join(WAL_FILE_NAME)) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            info!(
                target: "cellar::store",
                destination = %destination.display(),
                records = info.records,
                "Store copied"
            );
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::Store;
    use cellar_core::{processor_fn, ErrorCode, OpenMode};

    fn memory_store() -> Store {
        let store = Store::new();
        store.open("-", OpenMode::default()).unwrap();
        store
    }

    #[test]
    fn test_dump_clear_load_in_memory() {
        let store = memory_store();
        store.set_bulk(vec![("a", "1"), ("b", "2")], false).unwrap();
        let mut image = Vec::new();
        let info = store.dump_snapshot_to(&mut image).unwrap();
        assert_eq!(info.records, 2);

        store.clear().unwrap();
        store.set("stale", "x").unwrap();
        assert_eq!(store.load_snapshot_from(image.as_slice()).unwrap(), 2);
        assert_eq!(store.get("a").unwrap(), b"1");
        assert!(store.get("stale").is_err());
    }

    #[test]
    fn test_damaged_image_leaves_content() {
        let store = memory_store();
        store.set("a", "1").unwrap();
        let mut image = Vec::new();
        store.dump_snapshot_to(&mut image).unwrap();
        let last = image.len() - 1;
        image[last] ^= 0xFF;

        store.set("b", "2").unwrap();
        let err = store.load_snapshot_from(image.as_slice()).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::BrokenData));
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_processor_sees_quiesced_store() {
        let store = memory_store();
        store.set("a", "1").unwrap();

        let mut seen = None;
        let mut processor = processor_fn(|path, count, size| {
            seen = Some((path.to_string(), count, size));
            Ok(true)
        });
        store.synchronize(false, Some(&mut processor)).unwrap();
        drop(processor);
        let (path, count, size) = seen.unwrap();
        assert_eq!(path, "-");
        assert_eq!(count, 1);
        assert!(size >= 2);

        let err = store
            .occupy(false, Some(&mut processor_fn(|_, _, _| Ok(false))))
            .unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::LogicError));

        let err = store
            .occupy(true, Some(&mut processor_fn(|_, _, _| Err(anyhow::anyhow!("disk full")))))
            .unwrap_err();
        assert!(err.is_callback());
    }
}

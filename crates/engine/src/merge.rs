//! N-way merge of source stores into a destination store

use crate::database::Change;
use crate::Store;
use cellar_core::{Error, MergeMode, Result};
use cellar_storage::RecordMap;
use std::collections::BTreeMap;
use tracing::info;

/// Pending destination values, layered over the locked record map
struct Overlay<'a> {
    base: &'a RecordMap,
    pending: BTreeMap<Vec<u8>, Vec<u8>>,
}

impl<'a> Overlay<'a> {
    fn current(&self, key: &[u8]) -> Option<&[u8]> {
        match self.pending.get(key) {
            Some(value) => Some(value.as_slice()),
            None => self.base.get(key),
        }
    }

    fn merge(&mut self, key: Vec<u8>, value: Vec<u8>, mode: MergeMode) -> Result<()> {
        let current = self.current(&key);
        let merged = match mode {
            MergeMode::Overwrite => Some(value),
            MergeMode::KeepExisting => current.is_none().then_some(value),
            MergeMode::Replace => current.is_some().then_some(value),
            MergeMode::Append => Some(match current {
                Some(existing) => [existing, value.as_slice()].concat(),
                None => value,
            }),
            MergeMode::FailOnConflict => {
                if current.is_some() {
                    return Err(Error::duplicate(format!(
                        "merge conflict on key {:?}",
                        String::from_utf8_lossy(&key)
                    )));
                }
                Some(value)
            }
        };
        if let Some(merged) = merged {
            self.pending.insert(key, merged);
        }
        Ok(())
    }
}

impl Store {
    /// Merge the records of `sources`, in order, into this store
    ///
    /// The sources are read first; the merged result is then applied as a
    /// single atomic batch. Returns the number of records written.
    ///
    /// # Errors
    ///
    /// - `DUPREC` under [`MergeMode::FailOnConflict`] when any key is
    ///   already present; nothing is applied
    /// - `INVALID` when a source is not open
    pub fn merge(&self, sources: &[&Store], mode: MergeMode) -> Result<usize> {
        let images: Result<Vec<_>> = sources
            .iter()
            .map(|source| {
                source
                    .peek(|open| Ok(open.records.read().to_records()))
                    .map_err(|e| Error::invalid(format!("merge source unusable: {}", e.message())))
            })
            .collect();
        let images = match images {
            Ok(images) => images,
            Err(e) => return self.shared.track("merge", Err(e)),
        };

        self.with_open("merge", |open| {
            open.check_writable()?;
            let mut records = open.records.write();
            let mut overlay = Overlay {
                base: &records,
                pending: BTreeMap::new(),
            };
            for (key, value) in images.into_iter().flatten() {
                overlay.merge(key, value, mode)?;
            }
            let changes: Vec<Change> = overlay
                .pending
                .into_iter()
                .map(|(key, value)| Change::Put(key, value))
                .collect();
            let written = changes.len();
            open.write_batch(&mut records, changes)?;
            info!(
                target: "cellar::store",
                sources = sources.len(),
                %mode,
                written,
                "Stores merged"
            );
            Ok(written)
        })
    }
}

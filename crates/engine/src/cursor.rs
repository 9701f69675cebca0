//! Cursor: positioned reference into the key ordering
//!
//! A cursor remembers the key it sits on, not a position inside the map,
//! so it stays usable while other threads mutate the store. Each operation
//! takes the store's record lock once.
//!
//! ```text
//! Unpositioned --jump*--> Positioned(key) --step*--> Positioned(key')
//!      any --disable / store close--> Invalidated
//! ```
//!
//! Every cursor owns a [`CursorSlot`] registered (weakly) with its store.
//! Closing the store flips the slot, after which every operation fails
//! with `LOGIC`.

use crate::database::{OpenStore, StoreShared};
use crate::visit::{read_only, visit};
use crate::Store;
use cellar_core::{Action, Error, Result, StoreError, Visitor};
use cellar_storage::RecordMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Registry entry shared between a cursor and its store
#[derive(Debug, Default)]
pub(crate) struct CursorSlot {
    invalidated: AtomicBool,
}

impl CursorSlot {
    pub(crate) fn is_invalidated(&self) -> bool {
        self.invalidated.load(Ordering::Acquire)
    }

    pub(crate) fn invalidate(&self) {
        self.invalidated.store(true, Ordering::Release);
    }
}

fn no_record() -> Error {
    Error::no_record("no record")
}

/// Key of the record after `key`, or `None` at the end
fn next_key(records: &RecordMap, key: &[u8]) -> Option<Vec<u8>> {
    records.successor(key).map(|(k, _)| k.to_vec())
}

/// Cursor over a store's records
///
/// Created by [`Store::cursor`]. Operations take `&mut self`; move the
/// cursor to another thread rather than sharing it.
pub struct Cursor {
    shared: Arc<StoreShared>,
    slot: Arc<CursorSlot>,
    position: Option<Vec<u8>>,
    error: StoreError,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("position", &self.position.as_ref().map(|k| String::from_utf8_lossy(k)))
            .field("invalidated", &self.slot.is_invalidated())
            .finish()
    }
}

impl Store {
    /// Create an unpositioned cursor
    pub fn cursor(&self) -> Result<Cursor> {
        self.with_open("cursor", |_| {
            let slot = Arc::new(CursorSlot::default());
            self.shared.register_cursor(&slot);
            Ok(Cursor {
                shared: Arc::clone(&self.shared),
                slot,
                position: None,
                error: StoreError::success(),
            })
        })
    }

    /// Run `f` with a fresh cursor, disabling it afterwards
    ///
    /// ```
    /// use cellar_core::OpenMode;
    /// use cellar_engine::Store;
    ///
    /// let store = Store::new();
    /// store.open("-", OpenMode::default())?;
    /// store.set("a", "1")?;
    /// let first = store.with_cursor(|cursor| {
    ///     cursor.jump()?;
    ///     cursor.get_key(false)
    /// })?;
    /// assert_eq!(first, b"a");
    /// # Ok::<(), cellar_core::Error>(())
    /// ```
    pub fn with_cursor<T>(&self, f: impl FnOnce(&mut Cursor) -> Result<T>) -> Result<T> {
        let mut cursor = self.cursor()?;
        let result = f(&mut cursor);
        cursor.disable();
        result
    }
}

impl Cursor {
    /// Run `f` with the store open and the cursor usable
    fn run<T>(
        &mut self,
        op: &'static str,
        f: impl FnOnce(&OpenStore, &mut Option<Vec<u8>>) -> Result<T>,
    ) -> Result<T> {
        let result = {
            let state = self.shared.state.read();
            match state.as_ref() {
                Some(open) if !self.slot.is_invalidated() => f(open, &mut self.position),
                _ => Err(Error::logic("cursor is disabled")),
            }
        };
        match &result {
            Ok(_) => self.error = StoreError::success(),
            Err(e) => {
                self.shared.log_failure(op, e);
                if let Some(code) = e.code() {
                    self.error = StoreError {
                        code,
                        message: e.message(),
                    };
                }
            }
        }
        result
    }

    /// Position on `found`, or unposition and fail `NOREC`
    fn settle(position: &mut Option<Vec<u8>>, found: Option<Vec<u8>>) -> Result<()> {
        *position = found;
        match position {
            Some(_) => Ok(()),
            None => Err(no_record()),
        }
    }

    // ========================================================================
    // Movement
    // ========================================================================

    /// Move to the first record
    pub fn jump(&mut self) -> Result<()> {
        self.run("cursor.jump", |open, position| {
            let found = open.records.read().first().map(|(k, _)| k.to_vec());
            Self::settle(position, found)
        })
    }

    /// Move to the first record whose key is `>= key`
    pub fn jump_to(&mut self, key: impl AsRef<[u8]>) -> Result<()> {
        let key = key.as_ref();
        self.run("cursor.jump_to", |open, position| {
            let found = open.records.read().ceiling(key).map(|(k, _)| k.to_vec());
            Self::settle(position, found)
        })
    }

    /// Move to the last record
    pub fn jump_back(&mut self) -> Result<()> {
        self.run("cursor.jump_back", |open, position| {
            let found = open.records.read().last().map(|(k, _)| k.to_vec());
            Self::settle(position, found)
        })
    }

    /// Move to the last record whose key is `<= key`
    pub fn jump_back_to(&mut self, key: impl AsRef<[u8]>) -> Result<()> {
        let key = key.as_ref();
        self.run("cursor.jump_back_to", |open, position| {
            let found = open.records.read().floor(key).map(|(k, _)| k.to_vec());
            Self::settle(position, found)
        })
    }

    /// Move to the next record
    pub fn step(&mut self) -> Result<()> {
        self.run("cursor.step", |open, position| {
            let current = position.take().ok_or_else(no_record)?;
            let found = next_key(&open.records.read(), &current);
            Self::settle(position, found)
        })
    }

    /// Move to the previous record
    pub fn step_back(&mut self) -> Result<()> {
        self.run("cursor.step_back", |open, position| {
            let current = position.take().ok_or_else(no_record)?;
            let found = open
                .records
                .read()
                .predecessor(&current)
                .map(|(k, _)| k.to_vec());
            Self::settle(position, found)
        })
    }

    // ========================================================================
    // Reads
    // ========================================================================

    /// Read the current record, then advance when `step`
    fn read_current<T>(
        &mut self,
        op: &'static str,
        step: bool,
        pick: impl FnOnce(&[u8], &[u8]) -> T,
    ) -> Result<T> {
        self.run(op, |open, position| {
            let records = open.records.read();
            let key = position.as_deref().ok_or_else(no_record)?;
            let value = records.get(key).ok_or_else(no_record)?;
            let picked = pick(key, value);
            if step {
                *position = next_key(&records, key);
            }
            Ok(picked)
        })
    }

    /// Key of the current record
    pub fn get_key(&mut self, step: bool) -> Result<Vec<u8>> {
        self.read_current("cursor.get_key", step, |k, _| k.to_vec())
    }

    /// Value of the current record
    pub fn get_value(&mut self, step: bool) -> Result<Vec<u8>> {
        self.read_current("cursor.get_value", step, |_, v| v.to_vec())
    }

    /// Key and value of the current record
    pub fn get(&mut self, step: bool) -> Result<(Vec<u8>, Vec<u8>)> {
        self.read_current("cursor.get", step, |k, v| (k.to_vec(), v.to_vec()))
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Overwrite the current record's value, then advance when `step`
    pub fn set_value(&mut self, value: impl AsRef<[u8]>, step: bool) -> Result<()> {
        let value = value.as_ref();
        self.run("cursor.set_value", |open, position| {
            open.check_writable()?;
            let mut records = open.records.write();
            let key = position.clone().ok_or_else(no_record)?;
            if !records.contains(&key) {
                return Err(no_record());
            }
            open.write(&mut records, &key, Some(value.to_vec()))?;
            if step {
                *position = next_key(&records, &key);
            }
            Ok(())
        })
    }

    /// Remove the current record and move to the next one
    pub fn remove(&mut self) -> Result<()> {
        self.run("cursor.remove", |open, position| {
            open.check_writable()?;
            let mut records = open.records.write();
            let key = position.clone().ok_or_else(no_record)?;
            if open.write(&mut records, &key, None)?.is_none() {
                return Err(no_record());
            }
            *position = next_key(&records, &key);
            Ok(())
        })
    }

    /// Remove the current record returning its key and value, then advance
    pub fn seize(&mut self) -> Result<(Vec<u8>, Vec<u8>)> {
        self.run("cursor.seize", |open, position| {
            open.check_writable()?;
            let mut records = open.records.write();
            let key = position.clone().ok_or_else(no_record)?;
            let value = open.write(&mut records, &key, None)?.ok_or_else(no_record)?;
            *position = next_key(&records, &key);
            Ok((key, value))
        })
    }

    /// Run the visitor protocol on the current record
    ///
    /// A `Remove` answer moves the cursor to the next record; otherwise it
    /// advances only when `step`.
    pub fn accept<V: Visitor + ?Sized>(
        &mut self,
        visitor: &mut V,
        writable: bool,
        step: bool,
    ) -> Result<()> {
        self.run("cursor.accept", |open, position| {
            let key = position.clone().ok_or_else(no_record)?;
            if writable {
                open.check_writable()?;
                let mut records = open.records.write();
                let value = records.get(&key).ok_or_else(no_record)?;
                let action = visit(visitor, &key, Some(value))?;
                let removed = action == Action::Remove;
                open.apply_action(&mut records, &key, action)?;
                if removed || step {
                    *position = next_key(&records, &key);
                }
            } else {
                let records = open.records.read();
                let value = records.get(&key).ok_or_else(no_record)?;
                read_only(visit(visitor, &key, Some(value))?)?;
                if step {
                    *position = next_key(&records, &key);
                }
            }
            Ok(())
        })
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Invalidate the cursor; later operations fail with `LOGIC`
    pub fn disable(&mut self) {
        self.slot.invalidate();
        self.position = None;
    }

    /// Location of the store this cursor walks
    pub fn store_path(&mut self) -> Result<String> {
        self.run("store_path", |open, _| Ok(open.path.clone()))
    }

    /// True while the cursor can still be used
    pub fn is_enabled(&self) -> bool {
        !self.slot.is_invalidated()
    }

    /// Outcome of the last operation on this cursor
    pub fn error(&self) -> StoreError {
        self.error.clone()
    }
}

//! Visitor protocol over the store
//!
//! - `accept`: one key, under one lock acquisition
//! - `accept_bulk`: several keys in order, one lock acquisition each;
//!   a failure stops the sequence but keeps what earlier keys did
//! - `iterate`: every record in ascending key order, one lock acquisition
//!   per record, so other threads can interleave between records
//!
//! A non-writable access takes the shared lock. A visitor answering with a
//! mutation there aborts the operation with `Error::ReadOnlyViolation`
//! before anything changes.

use crate::database::OpenStore;
use crate::Store;
use cellar_core::{Action, Error, Result, Visitor};
use cellar_storage::RecordMap;

/// Hand one record (or its absence) to a visitor
pub(crate) fn visit<V: Visitor + ?Sized>(
    visitor: &mut V,
    key: &[u8],
    value: Option<&[u8]>,
) -> Result<Action> {
    let answer = match value {
        Some(value) => visitor.visit_full(key, value),
        None => visitor.visit_empty(key),
    };
    answer.map_err(Error::Callback)
}

pub(crate) fn read_only(action: Action) -> Result<()> {
    if action.is_mutation() {
        Err(Error::ReadOnlyViolation)
    } else {
        Ok(())
    }
}

impl OpenStore {
    pub(crate) fn accept_one<V: Visitor + ?Sized>(
        &self,
        key: &[u8],
        visitor: &mut V,
        writable: bool,
    ) -> Result<()> {
        if writable {
            self.check_writable()?;
            let mut records = self.records.write();
            let action = visit(visitor, key, records.get(key))?;
            self.apply_action(&mut records, key, action)
        } else {
            let records = self.records.read();
            read_only(visit(visitor, key, records.get(key))?)
        }
    }

    /// Visit the first record after `after` (or the first record)
    ///
    /// Returns the visited key, or `None` past the last record.
    fn visit_next<V: Visitor + ?Sized>(
        &self,
        after: Option<&[u8]>,
        visitor: &mut V,
        writable: bool,
    ) -> Result<Option<Vec<u8>>> {
        fn next<'a>(records: &'a RecordMap, after: Option<&[u8]>) -> Option<(&'a [u8], &'a [u8])> {
            match after {
                Some(key) => records.successor(key),
                None => records.first(),
            }
        }

        if writable {
            let mut records = self.records.write();
            let (key, action) = match next(&records, after) {
                Some((key, value)) => (key.to_vec(), visit(visitor, key, Some(value))?),
                None => return Ok(None),
            };
            self.apply_action(&mut records, &key, action)?;
            Ok(Some(key))
        } else {
            let records = self.records.read();
            match next(&records, after) {
                Some((key, value)) => {
                    read_only(visit(visitor, key, Some(value))?)?;
                    Ok(Some(key.to_vec()))
                }
                None => Ok(None),
            }
        }
    }
}

impl Store {
    /// Visit one record (or its absence) and apply the visitor's answer
    ///
    /// ```
    /// use cellar_core::{visitor_fn, Action, OpenMode};
    /// use cellar_engine::Store;
    ///
    /// let store = Store::new();
    /// store.open("-", OpenMode::default())?;
    /// store.set("k", "v")?;
    /// store.accept("k", &mut visitor_fn(|_, v| {
    ///     Ok(Action::Replace([v.unwrap_or_default(), b"!"].concat()))
    /// }), true)?;
    /// assert_eq!(store.get("k")?, b"v!");
    /// # Ok::<(), cellar_core::Error>(())
    /// ```
    pub fn accept<V: Visitor + ?Sized>(
        &self,
        key: impl AsRef<[u8]>,
        visitor: &mut V,
        writable: bool,
    ) -> Result<()> {
        let key = key.as_ref();
        self.with_open("accept", |open| open.accept_one(key, visitor, writable))
    }

    /// Visit several keys in order
    ///
    /// Not atomic: each key is visited under its own lock acquisition and
    /// the first failure stops the sequence.
    pub fn accept_bulk<K, V>(&self, keys: &[K], visitor: &mut V, writable: bool) -> Result<()>
    where
        K: AsRef<[u8]>,
        V: Visitor + ?Sized,
    {
        self.with_open("accept_bulk", |open| {
            for key in keys {
                open.accept_one(key.as_ref(), visitor, writable)?;
            }
            Ok(())
        })
    }

    /// Visit every record in ascending key order
    ///
    /// Returns the number of records visited.
    pub fn iterate<V: Visitor + ?Sized>(&self, visitor: &mut V, writable: bool) -> Result<u64> {
        self.with_open("iterate", |open| {
            if writable {
                open.check_writable()?;
            }
            let mut visited = 0;
            let mut position: Option<Vec<u8>> = None;
            while let Some(key) = open.visit_next(position.as_deref(), visitor, writable)? {
                visited += 1;
                position = Some(key);
            }
            Ok(visited)
        })
    }
}

//! Point operations and key matching
//!
//! Reads take the record map's shared lock; writes take it exclusively for
//! the whole read-modify-write, so `increment`, `cas` and `seize` are
//! atomic with respect to every other operation on the store.

use crate::Store;
use cellar_core::number::{decode_decimal, decode_int, encode_decimal, encode_int};
use cellar_core::{Error, Result};
use cellar_storage::{match_prefix, match_regex, match_similar};
use regex::bytes::Regex;

fn no_record() -> Error {
    Error::no_record("no record")
}

impl Store {
    /// Value of a record
    ///
    /// # Errors
    ///
    /// `NOREC` when the key has no record.
    pub fn get(&self, key: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let key = key.as_ref();
        self.with_open("get", |open| {
            open.records
                .read()
                .get(key)
                .map(<[u8]>::to_vec)
                .ok_or_else(no_record)
        })
    }

    /// Store a record, overwriting any existing value
    pub fn set(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let (key, value) = (key.as_ref(), value.as_ref());
        self.with_open("set", |open| {
            open.check_writable()?;
            let mut records = open.records.write();
            open.write(&mut records, key, Some(value.to_vec()))?;
            Ok(())
        })
    }

    /// Store a new record
    ///
    /// # Errors
    ///
    /// `DUPREC` when the key already has a record; the record is unchanged.
    pub fn add(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let (key, value) = (key.as_ref(), value.as_ref());
        self.with_open("add", |open| {
            open.check_writable()?;
            let mut records = open.records.write();
            if records.contains(key) {
                return Err(Error::duplicate("record duplication"));
            }
            open.write(&mut records, key, Some(value.to_vec()))?;
            Ok(())
        })
    }

    /// Overwrite an existing record
    ///
    /// # Errors
    ///
    /// `NOREC` when the key has no record.
    pub fn replace(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let (key, value) = (key.as_ref(), value.as_ref());
        self.with_open("replace", |open| {
            open.check_writable()?;
            let mut records = open.records.write();
            if !records.contains(key) {
                return Err(no_record());
            }
            open.write(&mut records, key, Some(value.to_vec()))?;
            Ok(())
        })
    }

    /// Append bytes to a record, creating it if absent
    pub fn append(&self, key: impl AsRef<[u8]>, value: impl AsRef<[u8]>) -> Result<()> {
        let (key, value) = (key.as_ref(), value.as_ref());
        self.with_open("append", |open| {
            open.check_writable()?;
            let mut records = open.records.write();
            let mut joined = records.get(key).map(<[u8]>::to_vec).unwrap_or_default();
            joined.extend_from_slice(value);
            open.write(&mut records, key, Some(joined))?;
            Ok(())
        })
    }

    /// Add `delta` to an integer record, returning the new value
    ///
    /// The record holds an 8-byte big-endian signed integer. An absent
    /// record starts at `origin`.
    ///
    /// # Errors
    ///
    /// `LOGIC` when the record is not 8 bytes wide or the sum overflows;
    /// the record is unchanged.
    pub fn increment(&self, key: impl AsRef<[u8]>, delta: i64, origin: i64) -> Result<i64> {
        let key = key.as_ref();
        self.with_open("increment", |open| {
            open.check_writable()?;
            let mut records = open.records.write();
            let current = match records.get(key) {
                Some(value) => decode_int(value)?,
                None => origin,
            };
            let next = current
                .checked_add(delta)
                .ok_or_else(|| Error::logic("integer overflow"))?;
            open.write(&mut records, key, Some(encode_int(next).to_vec()))?;
            Ok(next)
        })
    }

    /// Add `delta` to a decimal record, returning the new value
    ///
    /// The record holds a 16-byte decimal (integral part, then fractional
    /// part in units of 10^-15, both 8-byte big-endian). An absent record
    /// starts at `origin`.
    ///
    /// # Errors
    ///
    /// `LOGIC` on a wrong-width record, a non-finite input or a result the
    /// encoding cannot hold.
    pub fn increment_double(&self, key: impl AsRef<[u8]>, delta: f64, origin: f64) -> Result<f64> {
        let key = key.as_ref();
        self.with_open("increment_double", |open| {
            open.check_writable()?;
            if !delta.is_finite() || !origin.is_finite() {
                return Err(Error::logic("not a finite number"));
            }
            let mut records = open.records.write();
            let current = match records.get(key) {
                Some(value) => decode_decimal(value)?,
                None => origin,
            };
            let encoded = encode_decimal(current + delta)?;
            open.write(&mut records, key, Some(encoded.to_vec()))?;
            decode_decimal(&encoded)
        })
    }

    /// Compare-and-swap
    ///
    /// `old = None` expects no record; `new = None` removes the record.
    ///
    /// # Errors
    ///
    /// `LOGIC` when the current state differs from `old`; nothing changes.
    pub fn cas(
        &self,
        key: impl AsRef<[u8]>,
        old: Option<&[u8]>,
        new: Option<&[u8]>,
    ) -> Result<()> {
        let key = key.as_ref();
        self.with_open("cas", |open| {
            open.check_writable()?;
            let mut records = open.records.write();
            if records.get(key) != old {
                return Err(Error::logic("status conflict"));
            }
            open.write(&mut records, key, new.map(<[u8]>::to_vec))?;
            Ok(())
        })
    }

    /// Remove a record
    ///
    /// # Errors
    ///
    /// `NOREC` when the key has no record.
    pub fn remove(&self, key: impl AsRef<[u8]>) -> Result<()> {
        let key = key.as_ref();
        self.with_open("remove", |open| {
            open.check_writable()?;
            let mut records = open.records.write();
            match open.write(&mut records, key, None)? {
                Some(_) => Ok(()),
                None => Err(no_record()),
            }
        })
    }

    /// Length of a record's value
    pub fn check(&self, key: impl AsRef<[u8]>) -> Result<usize> {
        let key = key.as_ref();
        self.with_open("check", |open| {
            open.records.read().get(key).map(<[u8]>::len).ok_or_else(no_record)
        })
    }

    /// Remove a record and return its value, atomically
    pub fn seize(&self, key: impl AsRef<[u8]>) -> Result<Vec<u8>> {
        let key = key.as_ref();
        self.with_open("seize", |open| {
            open.check_writable()?;
            let mut records = open.records.write();
            open.write(&mut records, key, None)?.ok_or_else(no_record)
        })
    }

    /// Remove every record
    pub fn clear(&self) -> Result<()> {
        self.with_open("clear", |open| {
            open.check_writable()?;
            let mut records = open.records.write();
            open.clear_records(&mut records)
        })
    }

    /// Keys starting with `prefix`, ascending; `limit == 0` is unlimited
    pub fn match_prefix(&self, prefix: impl AsRef<[u8]>, limit: usize) -> Result<Vec<Vec<u8>>> {
        let prefix = prefix.as_ref();
        self.with_open("match_prefix", |open| {
            Ok(match_prefix(&open.records.read(), prefix, limit))
        })
    }

    /// Keys matched by a regular expression over raw key bytes, ascending
    ///
    /// # Errors
    ///
    /// `INVALID` when the pattern does not compile.
    pub fn match_regex(&self, pattern: &str, limit: usize) -> Result<Vec<Vec<u8>>> {
        self.with_open("match_regex", |open| {
            let regex = Regex::new(pattern)
                .map_err(|e| Error::invalid(format!("invalid regular expression: {}", e)))?;
            Ok(match_regex(&open.records.read(), &regex, limit))
        })
    }

    /// Keys within `max_distance` edits of `origin`, nearest first
    ///
    /// Distance counts code points when `utf8` (lossy decode), bytes
    /// otherwise. Ties are broken by key order.
    pub fn match_similar(
        &self,
        origin: impl AsRef<[u8]>,
        max_distance: usize,
        utf8: bool,
        limit: usize,
    ) -> Result<Vec<Vec<u8>>> {
        let origin = origin.as_ref();
        self.with_open("match_similar", |open| {
            Ok(match_similar(
                &open.records.read(),
                origin,
                max_distance,
                utf8,
                limit,
            ))
        })
    }
}

#[cfg(test)]
mod tests {
    use crate::Store;
    use cellar_core::{ErrorCode, OpenMode};

    fn memory_store() -> Store {
        let store = Store::new();
        store.open("-", OpenMode::default()).unwrap();
        store
    }

    #[test]
    fn test_set_get_remove() {
        let store = memory_store();
        store.set("k", "v").unwrap();
        assert_eq!(store.get("k").unwrap(), b"v");
        assert_eq!(store.check("k").unwrap(), 1);
        store.remove("k").unwrap();
        assert_eq!(store.get("k").unwrap_err().code(), Some(ErrorCode::RecordNotFound));
        assert_eq!(store.error().code, ErrorCode::RecordNotFound);
        assert_eq!(store.remove("k").unwrap_err().code(), Some(ErrorCode::RecordNotFound));
    }

    #[test]
    fn test_cas() {
        let store = memory_store();
        store.cas("k", None, Some(b"v1".as_slice())).unwrap();
        assert_eq!(store.get("k").unwrap(), b"v1");

        let err = store.cas("k", Some(b"other".as_slice()), Some(b"v2".as_slice())).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::LogicError));
        assert_eq!(store.error().code, ErrorCode::LogicError);
        assert_eq!(store.get("k").unwrap(), b"v1");

        let err = store.cas("k", None, Some(b"v2".as_slice())).unwrap_err();
        assert_eq!(err.code(), Some(ErrorCode::LogicError));
        assert_eq!(store.get("k").unwrap(), b"v1");

        store.cas("k", Some(b"v1".as_slice()), Some(b"v2".as_slice())).unwrap();
        assert_eq!(store.get("k").unwrap(), b"v2");

        store.cas("k", Some(b"v2".as_slice()), None).unwrap();
        assert_eq!(store.get("k").unwrap_err().code(), Some(ErrorCode::RecordNotFound));

        store.cas("absent", None, None).unwrap();
        assert_eq!(store.error().code, ErrorCode::Success);
        assert_eq!(store.count().unwrap(), 0);
    }

    #[test]
    fn test_add_and_replace() {
        let store = memory_store();
        store.add("k", "v1").unwrap();
        assert_eq!(store.add("k", "v2").unwrap_err().code(), Some(ErrorCode::DuplicateRecord));
        assert_eq!(store.get("k").unwrap(), b"v1");
        assert_eq!(
            store.replace("other", "x").unwrap_err().code(),
            Some(ErrorCode::RecordNotFound)
        );
        store.replace("k", "v3").unwrap();
        assert_eq!(store.get("k").unwrap(), b"v3");
    }

    #[test]
    fn test_increment_wrong_width_is_logic_error() {
        let store = memory_store();
        store.set("n", "abc").unwrap();
        assert_eq!(store.increment("n", 1, 0).unwrap_err().code(), Some(ErrorCode::LogicError));
        assert_eq!(store.get("n").unwrap(), b"abc");

        store.set("max", i64::MAX.to_be_bytes()).unwrap();
        assert_eq!(store.increment("max", 1, 0).unwrap_err().code(), Some(ErrorCode::LogicError));
    }

    #[test]
    fn test_increment_double() {
        let store = memory_store();
        assert_eq!(store.increment_double("d", 1.5, 0.25).unwrap(), 1.75);
        assert_eq!(store.increment_double("d", -0.75, 0.0).unwrap(), 1.0);
        assert_eq!(store.check("d").unwrap(), 16);
        assert_eq!(
            store.increment_double("d", f64::NAN, 0.0).unwrap_err().code(),
            Some(ErrorCode::LogicError)
        );
    }

    #[test]
    fn test_regex_errors() {
        let store = memory_store();
        assert_eq!(
            store.match_regex("(", 0).unwrap_err().code(),
            Some(ErrorCode::InvalidArgument)
        );
    }
}

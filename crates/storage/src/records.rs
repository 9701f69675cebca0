//! RecordMap: ordered in-memory record set
//!
//! This module implements the record set owned by a store:
//! - `BTreeMap<Vec<u8>, Vec<u8>>` for byte-wise ordered keys
//! - byte accounting for `size()` and `status()`
//! - neighbour lookups used by cursors (ceiling, floor, successor,
//!   predecessor)
//!
//! # Design Notes
//!
//! - **No locking here**: the engine wraps the map in a
//!   `parking_lot::RwLock`, so every method takes `&self` / `&mut self`.
//! - **No version history**: each key stores only its latest value.

use std::collections::BTreeMap;
use std::ops::Bound;

/// Accounting overhead charged per record on top of key and value bytes
pub const RECORD_OVERHEAD: u64 = 32;

/// Borrowed view of a record
pub type RecordRef<'a> = (&'a [u8], &'a [u8]);

/// Ordered map from key bytes to value bytes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordMap {
    map: BTreeMap<Vec<u8>, Vec<u8>>,
    /// Sum of key and value lengths
    payload_bytes: u64,
}

impl RecordMap {
    /// Create an empty map
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// True when there are no records
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Approximate memory footprint in bytes
    pub fn byte_size(&self) -> u64 {
        self.payload_bytes + RECORD_OVERHEAD * self.map.len() as u64
    }

    /// Value of a key
    pub fn get(&self, key: &[u8]) -> Option<&[u8]> {
        self.map.get(key).map(Vec::as_slice)
    }

    /// True when the key has a record
    pub fn contains(&self, key: &[u8]) -> bool {
        self.map.contains_key(key)
    }

    /// Insert or overwrite a record, returning the previous value
    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) -> Option<Vec<u8>> {
        let added = (key.len() + value.len()) as u64;
        let key_len = key.len() as u64;
        let previous = self.map.insert(key, value);
        self.payload_bytes += added;
        if let Some(old) = &previous {
            self.payload_bytes -= key_len + old.len() as u64;
        }
        previous
    }

    /// Remove a record, returning its value
    pub fn remove(&mut self, key: &[u8]) -> Option<Vec<u8>> {
        let removed = self.map.remove(key);
        if let Some(old) = &removed {
            self.payload_bytes -= (key.len() + old.len()) as u64;
        }
        removed
    }

    /// Put `Some(value)` or remove on `None`, returning the previous value
    pub fn apply(&mut self, key: &[u8], value: Option<Vec<u8>>) -> Option<Vec<u8>> {
        match value {
            Some(value) => self.put(key.to_vec(), value),
            None => self.remove(key),
        }
    }

    /// Remove every record
    pub fn clear(&mut self) {
        self.map.clear();
        self.payload_bytes = 0;
    }

    /// First record in key order
    pub fn first(&self) -> Option<RecordRef<'_>> {
        self.map.iter().next().map(as_record)
    }

    /// Last record in key order
    pub fn last(&self) -> Option<RecordRef<'_>> {
        self.map.iter().next_back().map(as_record)
    }

    /// First record whose key is `>= key`
    pub fn ceiling(&self, key: &[u8]) -> Option<RecordRef<'_>> {
        self.map
            .range::<[u8], _>((Bound::Included(key), Bound::Unbounded))
            .next()
            .map(as_record)
    }

    /// Last record whose key is `<= key`
    pub fn floor(&self, key: &[u8]) -> Option<RecordRef<'_>> {
        self.map
            .range::<[u8], _>((Bound::Unbounded, Bound::Included(key)))
            .next_back()
            .map(as_record)
    }

    /// First record whose key is `> key`
    pub fn successor(&self, key: &[u8]) -> Option<RecordRef<'_>> {
        self.map
            .range::<[u8], _>((Bound::Excluded(key), Bound::Unbounded))
            .next()
            .map(as_record)
    }

    /// Last record whose key is `< key`
    pub fn predecessor(&self, key: &[u8]) -> Option<RecordRef<'_>> {
        self.map
            .range::<[u8], _>((Bound::Unbounded, Bound::Excluded(key)))
            .next_back()
            .map(as_record)
    }

    /// Records in ascending key order
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = RecordRef<'_>> + '_ {
        self.map.iter().map(as_record)
    }

    /// Records with keys `>= start`, ascending
    pub fn range_from<'a>(&'a self, start: &'a [u8]) -> impl Iterator<Item = RecordRef<'a>> + 'a {
        self.map
            .range::<[u8], _>((Bound::Included(start), Bound::Unbounded))
            .map(as_record)
    }

    /// Owned copy of every record, ascending
    pub fn to_records(&self) -> Vec<(Vec<u8>, Vec<u8>)> {
        self.map
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

impl FromIterator<(Vec<u8>, Vec<u8>)> for RecordMap {
    fn from_iter<I: IntoIterator<Item = (Vec<u8>, Vec<u8>)>>(iter: I) -> Self {
        let mut map = RecordMap::new();
        for (key, value) in iter {
            map.put(key, value);
        }
        map
    }
}

fn as_record<'a>((k, v): (&'a Vec<u8>, &'a Vec<u8>)) -> RecordRef<'a> {
    (k.as_slice(), v.as_slice())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn sample() -> RecordMap {
        [("b", "2"), ("d", "4"), ("f", "6")]
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect()
    }

    #[test]
    fn test_put_get_remove() {
        let mut map = RecordMap::new();
        assert!(map.put(b"k".to_vec(), b"v1".to_vec()).is_none());
        assert_eq!(map.put(b"k".to_vec(), b"v2".to_vec()), Some(b"v1".to_vec()));
        assert_eq!(map.get(b"k"), Some(&b"v2"[..]));
        assert_eq!(map.remove(b"k"), Some(b"v2".to_vec()));
        assert!(map.get(b"k").is_none());
        assert!(map.remove(b"k").is_none());
    }

    #[test]
    fn test_byte_accounting() {
        let mut map = RecordMap::new();
        map.put(b"key".to_vec(), b"value".to_vec());
        assert_eq!(map.byte_size(), 8 + RECORD_OVERHEAD);
        map.put(b"key".to_vec(), b"v".to_vec());
        assert_eq!(map.byte_size(), 4 + RECORD_OVERHEAD);
        map.remove(b"key");
        assert_eq!(map.byte_size(), 0);
        map.put(b"a".to_vec(), b"b".to_vec());
        map.clear();
        assert_eq!(map.byte_size(), 0);
        assert!(map.is_empty());
    }

    #[test]
    fn test_neighbours() {
        let map = sample();
        assert_eq!(map.first().unwrap().0, b"b");
        assert_eq!(map.last().unwrap().0, b"f");
        assert_eq!(map.ceiling(b"c").unwrap().0, b"d");
        assert_eq!(map.ceiling(b"d").unwrap().0, b"d");
        assert!(map.ceiling(b"g").is_none());
        assert_eq!(map.floor(b"e").unwrap().0, b"d");
        assert_eq!(map.floor(b"d").unwrap().0, b"d");
        assert!(map.floor(b"a").is_none());
        assert_eq!(map.successor(b"d").unwrap().0, b"f");
        assert!(map.successor(b"f").is_none());
        assert_eq!(map.predecessor(b"d").unwrap().0, b"b");
        assert!(map.predecessor(b"b").is_none());
    }

    #[test]
    fn test_binary_keys_order_bytewise() {
        let mut map = RecordMap::new();
        map.put(vec![0xFF], b"high".to_vec());
        map.put(vec![0x00], b"null".to_vec());
        map.put(vec![0x00, 0x01], b"pair".to_vec());
        let keys: Vec<&[u8]> = map.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec![&[0x00][..], &[0x00, 0x01][..], &[0xFF][..]]);
    }

    proptest! {
        #[test]
        fn prop_successor_walk_visits_sorted_keys(keys in proptest::collection::btree_set(
            proptest::collection::vec(any::<u8>(), 0..6), 0..40)) {
            let map: RecordMap = keys.iter().map(|k| (k.clone(), Vec::new())).collect();
            let mut walked = Vec::new();
            let mut cur = map.first().map(|(k, _)| k.to_vec());
            while let Some(key) = cur {
                cur = map.successor(&key).map(|(k, _)| k.to_vec());
                walked.push(key);
            }
            let expected: Vec<Vec<u8>> = keys.into_iter().collect();
            prop_assert_eq!(walked, expected);
        }

        #[test]
        fn prop_byte_size_matches_contents(entries in proptest::collection::vec(
            (proptest::collection::vec(any::<u8>(), 0..8), proptest::collection::vec(any::<u8>(), 0..8)), 0..40)) {
            let mut map = RecordMap::new();
            for (k, v) in &entries {
                map.put(k.clone(), v.clone());
            }
            let expected: u64 = map
                .iter()
                .map(|(k, v)| (k.len() + v.len()) as u64 + RECORD_OVERHEAD)
                .sum();
            prop_assert_eq!(map.byte_size(), expected);
        }
    }
}

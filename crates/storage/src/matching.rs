//! Key matching over a RecordMap
//!
//! - prefix: range scan starting at the prefix, stops at the first
//!   non-matching key
//! - regex: full scan, pattern applied to raw key bytes
//! - similar: full scan, keys within an edit distance of an origin,
//!   ordered by (distance, key)
//!
//! A `limit` of zero means unlimited.

use crate::records::RecordMap;
use cellar_core::levdist;
use regex::bytes::Regex;

fn cap(limit: usize) -> usize {
    if limit == 0 {
        usize::MAX
    } else {
        limit
    }
}

/// Keys starting with `prefix`, ascending
pub fn match_prefix(map: &RecordMap, prefix: &[u8], limit: usize) -> Vec<Vec<u8>> {
    map.range_from(prefix)
        .take_while(|(k, _)| k.starts_with(prefix))
        .take(cap(limit))
        .map(|(k, _)| k.to_vec())
        .collect()
}

/// Keys matched by `regex`, ascending
pub fn match_regex(map: &RecordMap, regex: &Regex, limit: usize) -> Vec<Vec<u8>> {
    map.iter()
        .filter(|(k, _)| regex.is_match(k))
        .take(cap(limit))
        .map(|(k, _)| k.to_vec())
        .collect()
}

/// Keys within `max_distance` edits of `origin`, nearest first
pub fn match_similar(
    map: &RecordMap,
    origin: &[u8],
    max_distance: usize,
    utf8: bool,
    limit: usize,
) -> Vec<Vec<u8>> {
    let mut hits: Vec<(usize, &[u8])> = map
        .iter()
        .filter_map(|(k, _)| {
            // Length difference is a lower bound on the distance
            if k.len().abs_diff(origin.len()) > max_distance && !utf8 {
                return None;
            }
            let d = levdist(origin, k, utf8);
            (d <= max_distance).then_some((d, k))
        })
        .collect();
    hits.sort();
    hits.into_iter()
        .take(cap(limit))
        .map(|(_, k)| k.to_vec())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map_of(keys: &[&str]) -> RecordMap {
        keys.iter()
            .map(|k| (k.as_bytes().to_vec(), b"v".to_vec()))
            .collect()
    }

    fn strings(keys: Vec<Vec<u8>>) -> Vec<String> {
        keys.into_iter()
            .map(|k| String::from_utf8(k).unwrap())
            .collect()
    }

    #[test]
    fn test_prefix() {
        let map = map_of(&["a", "ab", "abc", "b", "ba"]);
        assert_eq!(strings(match_prefix(&map, b"a", 0)), vec!["a", "ab", "abc"]);
        assert_eq!(strings(match_prefix(&map, b"a", 2)), vec!["a", "ab"]);
        assert_eq!(strings(match_prefix(&map, b"", 0)).len(), 5);
        assert!(match_prefix(&map, b"z", 0).is_empty());
    }

    #[test]
    fn test_regex() {
        let map = map_of(&["user:1", "user:22", "order:1", "user:x"]);
        let re = Regex::new(r"^user:\d+$").unwrap();
        assert_eq!(strings(match_regex(&map, &re, 0)), vec!["user:1", "user:22"]);
        assert_eq!(strings(match_regex(&map, &re, 1)), vec!["user:1"]);
    }

    #[test]
    fn test_similar_orders_by_distance_then_key() {
        let map = map_of(&["apple", "apply", "ample", "maple", "banana"]);
        let hits = strings(match_similar(&map, b"apple", 1, false, 0));
        assert_eq!(hits, vec!["apple", "ample", "apply"]);

        let hits = strings(match_similar(&map, b"apple", 2, false, 2));
        assert_eq!(hits, vec!["apple", "ample"]);
    }
}

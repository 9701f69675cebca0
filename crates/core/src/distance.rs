//! Levenshtein edit distance
//!
//! Used by `match_similar`. Distance is computed either over raw bytes or
//! over Unicode scalar values of a lossy UTF-8 decoding.

/// Edit distance between two byte strings
///
/// With `utf8` set, both sides are decoded (invalid sequences become
/// U+FFFD) and the distance counts code points instead of bytes.
pub fn levdist(a: &[u8], b: &[u8], utf8: bool) -> usize {
    if utf8 {
        let a: Vec<char> = String::from_utf8_lossy(a).chars().collect();
        let b: Vec<char> = String::from_utf8_lossy(b).chars().collect();
        edit_distance(&a, &b)
    } else {
        edit_distance(a, b)
    }
}

fn edit_distance<T: PartialEq>(a: &[T], b: &[T]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }
    // Single rolling row
    let mut row: Vec<usize> = (0..=b.len()).collect();
    for (i, ca) in a.iter().enumerate() {
        let mut diagonal = row[0];
        row[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let above = row[j + 1];
            let cost = if ca == cb { 0 } else { 1 };
            row[j + 1] = (above + 1).min(row[j] + 1).min(diagonal + cost);
            diagonal = above;
        }
    }
    row[b.len()]
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_known_distances() {
        assert_eq!(levdist(b"kitten", b"sitting", false), 3);
        assert_eq!(levdist(b"", b"abc", false), 3);
        assert_eq!(levdist(b"abc", b"abc", false), 0);
        assert_eq!(levdist(b"flaw", b"lawn", false), 2);
    }

    #[test]
    fn test_utf8_counts_code_points() {
        let a = "héllo".as_bytes();
        let b = "hello".as_bytes();
        // 'é' is two bytes: a substitution plus an insertion at byte level
        assert_eq!(levdist(a, b, false), 2);
        assert_eq!(levdist(a, b, true), 1);
    }

    proptest! {
        #[test]
        fn prop_distance_is_symmetric(a in proptest::collection::vec(any::<u8>(), 0..24),
                                      b in proptest::collection::vec(any::<u8>(), 0..24)) {
            prop_assert_eq!(levdist(&a, &b, false), levdist(&b, &a, false));
        }

        #[test]
        fn prop_distance_bounded_by_longer_len(a in proptest::collection::vec(any::<u8>(), 0..24),
                                               b in proptest::collection::vec(any::<u8>(), 0..24)) {
            let d = levdist(&a, &b, false);
            prop_assert!(d <= a.len().max(b.len()));
            prop_assert!(d >= a.len().abs_diff(b.len()));
        }
    }
}

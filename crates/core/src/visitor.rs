//! Callback protocols: record visitors and file processors
//!
//! A [`Visitor`] is handed every record an operation touches and answers
//! with an [`Action`]. The same protocol drives single-key `accept`,
//! `accept_bulk`, whole-store `iterate` and `Cursor::accept`.
//!
//! Callbacks report their own faults as `anyhow::Error`; the engine aborts
//! the enclosing operation and hands the fault back unchanged inside
//! `Error::Callback`.

use std::fmt;

/// Result of a single visitor invocation
pub type VisitResult = std::result::Result<Action, anyhow::Error>;

/// What a visitor wants done with the visited record
#[derive(Clone, PartialEq, Eq, Default)]
pub enum Action {
    /// Leave the record as it is (or absent, for an empty visit)
    #[default]
    Keep,
    /// Remove the record
    Remove,
    /// Store this value, creating the record if needed
    Replace(Vec<u8>),
}

impl Action {
    /// Convenience constructor for [`Action::Replace`]
    pub fn replace(value: impl Into<Vec<u8>>) -> Self {
        Action::Replace(value.into())
    }

    /// True when the action would modify the store
    pub fn is_mutation(&self) -> bool {
        !matches!(self, Action::Keep)
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Action::Keep => f.write_str("Keep"),
            Action::Remove => f.write_str("Remove"),
            Action::Replace(v) => write!(f, "Replace({} bytes)", v.len()),
        }
    }
}

/// Record visitor
///
/// `visit_full` is called for a present record, `visit_empty` for a key
/// with no record. Visitors run while the store holds its record lock and
/// must not call back into the same store.
pub trait Visitor {
    /// Visit an existing record
    fn visit_full(&mut self, key: &[u8], value: &[u8]) -> VisitResult;

    /// Visit a key that has no record
    fn visit_empty(&mut self, _key: &[u8]) -> VisitResult {
        Ok(Action::Keep)
    }
}

/// Closures see `Some(value)` for a present record and `None` otherwise.
impl<F> Visitor for F
where
    F: FnMut(&[u8], Option<&[u8]>) -> VisitResult,
{
    fn visit_full(&mut self, key: &[u8], value: &[u8]) -> VisitResult {
        self(key, Some(value))
    }

    fn visit_empty(&mut self, key: &[u8]) -> VisitResult {
        self(key, None)
    }
}

/// Pin a closure to the visitor signature so its argument types are inferred
///
/// ```
/// use cellar_core::{visitor_fn, Action};
///
/// let mut upper = visitor_fn(|_key, value| {
///     Ok(match value {
///         Some(v) => Action::Replace(v.to_ascii_uppercase()),
///         None => Action::Keep,
///     })
/// });
/// # let _ = &mut upper;
/// ```
pub fn visitor_fn<F>(f: F) -> F
where
    F: FnMut(&[u8], Option<&[u8]>) -> VisitResult,
{
    f
}

/// Whole-store processor used by `synchronize` and `occupy`
///
/// Receives the store path, record count and size while the store is
/// quiesced. Returning `Ok(false)` aborts the operation.
pub trait FileProcessor {
    /// Process the quiesced store
    fn process(&mut self, path: &str, count: u64, size: u64) -> anyhow::Result<bool>;
}

impl<F> FileProcessor for F
where
    F: FnMut(&str, u64, u64) -> anyhow::Result<bool>,
{
    fn process(&mut self, path: &str, count: u64, size: u64) -> anyhow::Result<bool> {
        self(path, count, size)
    }
}

/// Pin a closure to the file processor signature
pub fn processor_fn<F>(f: F) -> F
where
    F: FnMut(&str, u64, u64) -> anyhow::Result<bool>,
{
    f
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_visitor_sees_presence() {
        let mut seen = Vec::new();
        let mut visitor = |key: &[u8], value: Option<&[u8]>| -> VisitResult {
            seen.push((key.to_vec(), value.map(|v| v.to_vec())));
            Ok(Action::Keep)
        };
        visitor.visit_full(b"a", b"1").unwrap();
        visitor.visit_empty(b"b").unwrap();
        assert_eq!(
            seen,
            vec![(b"a".to_vec(), Some(b"1".to_vec())), (b"b".to_vec(), None)]
        );
    }

    #[test]
    fn test_action_mutation_flag() {
        assert!(!Action::Keep.is_mutation());
        assert!(Action::Remove.is_mutation());
        assert!(Action::replace("x").is_mutation());
        assert_eq!(format!("{:?}", Action::replace("abc")), "Replace(3 bytes)");
    }

    struct Counter(u64);

    impl FileProcessor for Counter {
        fn process(&mut self, _path: &str, count: u64, _size: u64) -> anyhow::Result<bool> {
            self.0 = count;
            Ok(true)
        }
    }

    #[test]
    fn test_file_processor_impls() {
        let mut counter = Counter(0);
        assert!(counter.process("db", 7, 0).unwrap());
        assert_eq!(counter.0, 7);

        let mut stop = |_: &str, _: u64, _: u64| -> anyhow::Result<bool> { Ok(false) };
        assert!(!stop.process("db", 0, 0).unwrap());

        let mut seen = 0;
        let mut pinned = processor_fn(|_path, count, _size| {
            seen = count;
            Ok(true)
        });
        assert!(pinned.process("db", 3, 0).unwrap());
        drop(pinned);
        assert_eq!(seen, 3);
    }
}

//! Error types for cellardb
//!
//! Every store and cursor operation returns [`Result`]. Engine-level
//! failures carry an [`ErrorCode`] from a closed taxonomy plus a message.
//! Two outcomes are deliberately kept apart from that taxonomy:
//!
//! - [`Error::ReadOnlyViolation`]: a visitor asked for a mutation while the
//!   operation was running with `writable = false`
//! - [`Error::Callback`]: a caller-supplied callback (visitor, file
//!   processor, MapReduce stage) faulted; the original fault is carried
//!   through untouched
//!
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for cellardb operations
pub type Result<T> = std::result::Result<T, Error>;

/// Closed enumeration of engine error codes
///
/// The numeric values are stable and are used as bit positions in
/// [`ErrorMask`](crate::ErrorMask).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum ErrorCode {
    /// The last operation succeeded
    Success = 0,
    /// Operation not implemented by this store
    NotImplemented = 1,
    /// Invalid argument or invalid store state
    InvalidArgument = 2,
    /// The store location does not exist or is unusable
    RepositoryNotFound = 3,
    /// Access denied (read-only store, OS permission, lock held)
    PermissionDenied = 4,
    /// Persistent data failed validation
    BrokenData = 5,
    /// A record already exists
    DuplicateRecord = 6,
    /// No record exists
    RecordNotFound = 7,
    /// Logical inconsistency (bad nesting, value type mismatch, cas conflict)
    LogicError = 8,
    /// Operating system failure
    SystemError = 9,
    /// Anything else
    Miscellaneous = 15,
}

impl ErrorCode {
    /// Every code, in numeric order
    pub const ALL: [ErrorCode; 11] = [
        ErrorCode::Success,
        ErrorCode::NotImplemented,
        ErrorCode::InvalidArgument,
        ErrorCode::RepositoryNotFound,
        ErrorCode::PermissionDenied,
        ErrorCode::BrokenData,
        ErrorCode::DuplicateRecord,
        ErrorCode::RecordNotFound,
        ErrorCode::LogicError,
        ErrorCode::SystemError,
        ErrorCode::Miscellaneous,
    ];

    /// Short upper-case name of the code
    pub fn name(self) -> &'static str {
        match self {
            ErrorCode::Success => "SUCCESS",
            ErrorCode::NotImplemented => "NOIMPL",
            ErrorCode::InvalidArgument => "INVALID",
            ErrorCode::RepositoryNotFound => "NOREPOS",
            ErrorCode::PermissionDenied => "NOPERM",
            ErrorCode::BrokenData => "BROKEN",
            ErrorCode::DuplicateRecord => "DUPREC",
            ErrorCode::RecordNotFound => "NOREC",
            ErrorCode::LogicError => "LOGIC",
            ErrorCode::SystemError => "SYSTEM",
            ErrorCode::Miscellaneous => "MISC",
        }
    }

    /// Numeric value of the code
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Look a code up by its numeric value
    pub fn from_u8(value: u8) -> Option<ErrorCode> {
        ErrorCode::ALL.iter().copied().find(|c| c.as_u8() == value)
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Error types for cellardb
#[derive(Debug, Error)]
pub enum Error {
    /// Engine-level failure with a taxonomy code
    #[error("{code}: {message}")]
    Engine {
        /// Taxonomy code
        code: ErrorCode,
        /// Human-readable message
        message: String,
    },

    /// A visitor requested a mutation under a read-only access
    #[error("visitor requested a mutation under a read-only access")]
    ReadOnlyViolation,

    /// A caller-supplied callback faulted; the original fault is preserved
    #[error("callback failed: {0}")]
    Callback(anyhow::Error),
}

impl Error {
    /// Build an engine error from a code and message
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Error::Engine {
            code,
            message: message.into(),
        }
    }

    /// `NOIMPL` error
    pub fn not_implemented(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotImplemented, message)
    }

    /// `INVALID` error
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidArgument, message)
    }

    /// `NOREPOS` error
    pub fn no_repository(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RepositoryNotFound, message)
    }

    /// `NOPERM` error
    pub fn no_permission(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::PermissionDenied, message)
    }

    /// `BROKEN` error
    pub fn broken(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BrokenData, message)
    }

    /// `DUPREC` error
    pub fn duplicate(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DuplicateRecord, message)
    }

    /// `NOREC` error
    pub fn no_record(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::RecordNotFound, message)
    }

    /// `LOGIC` error
    pub fn logic(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::LogicError, message)
    }

    /// `SYSTEM` error
    pub fn system(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SystemError, message)
    }

    /// `MISC` error
    pub fn misc(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Miscellaneous, message)
    }

    /// Wrap a callback fault
    pub fn callback(fault: impl Into<anyhow::Error>) -> Self {
        Error::Callback(fault.into())
    }

    /// The taxonomy code of this error
    ///
    /// Callback faults are not attributed to any code and return `None`.
    /// Read-only violations are reported as `LOGIC`.
    pub fn code(&self) -> Option<ErrorCode> {
        match self {
            Error::Engine { code, .. } => Some(*code),
            Error::ReadOnlyViolation => Some(ErrorCode::LogicError),
            Error::Callback(_) => None,
        }
    }

    /// True when this error carries the given code
    pub fn is(&self, code: ErrorCode) -> bool {
        self.code() == Some(code)
    }

    /// True for `NOREC`
    pub fn is_not_found(&self) -> bool {
        self.is(ErrorCode::RecordNotFound)
    }

    /// True for callback faults
    pub fn is_callback(&self) -> bool {
        matches!(self, Error::Callback(_))
    }

    /// Extract the original callback fault, if this is one
    pub fn into_callback(self) -> Option<anyhow::Error> {
        match self {
            Error::Callback(fault) => Some(fault),
            _ => None,
        }
    }

    /// Message part of the error
    pub fn message(&self) -> String {
        match self {
            Error::Engine { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        let code = match e.kind() {
            io::ErrorKind::NotFound => ErrorCode::RepositoryNotFound,
            io::ErrorKind::PermissionDenied => ErrorCode::PermissionDenied,
            io::ErrorKind::InvalidData | io::ErrorKind::UnexpectedEof => ErrorCode::BrokenData,
            _ => ErrorCode::SystemError,
        };
        Error::new(code, format!("I/O error: {}", e))
    }
}

impl From<bincode::Error> for Error {
    fn from(e: bincode::Error) -> Self {
        Error::broken(format!("serialization error: {}", e))
    }
}

/// Error state retained on a store or cursor
///
/// Overwritten by every operation: a success resets it to
/// [`ErrorCode::Success`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreError {
    /// Code of the last operation
    pub code: ErrorCode,
    /// Message of the last operation
    pub message: String,
}

impl StoreError {
    /// The "no error" state
    pub fn success() -> Self {
        Self {
            code: ErrorCode::Success,
            message: "no error".to_string(),
        }
    }

    /// True when the last operation succeeded
    pub fn is_success(&self) -> bool {
        self.code == ErrorCode::Success
    }
}

impl Default for StoreError {
    fn default() -> Self {
        Self::success()
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_engine() {
        let err = Error::no_record("no record");
        let msg = err.to_string();
        assert!(msg.contains("NOREC"));
        assert!(msg.contains("no record"));
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::duplicate("x").code(), Some(ErrorCode::DuplicateRecord));
        assert_eq!(Error::ReadOnlyViolation.code(), Some(ErrorCode::LogicError));
        assert_eq!(Error::callback(anyhow::anyhow!("boom")).code(), None);
    }

    #[test]
    fn test_error_from_io() {
        let err: Error = io::Error::new(io::ErrorKind::NotFound, "gone").into();
        assert!(err.is(ErrorCode::RepositoryNotFound));

        let err: Error = io::Error::new(io::ErrorKind::PermissionDenied, "denied").into();
        assert!(err.is(ErrorCode::PermissionDenied));

        let err: Error = io::Error::new(io::ErrorKind::Other, "disk on fire").into();
        assert!(err.is(ErrorCode::SystemError));
    }

    #[test]
    fn test_error_from_bincode() {
        let invalid_data = vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF];
        let result: Result<String> = bincode::deserialize(&invalid_data).map_err(|e| e.into());
        assert!(matches!(result, Err(ref e) if e.is(ErrorCode::BrokenData)));
    }

    #[test]
    fn test_callback_fault_is_preserved() {
        let err = Error::callback(anyhow::anyhow!("visitor exploded"));
        assert!(err.is_callback());
        let fault = err.into_callback().unwrap();
        assert_eq!(fault.to_string(), "visitor exploded");
    }

    #[test]
    fn test_code_round_trip_through_u8() {
        for code in ErrorCode::ALL {
            assert_eq!(ErrorCode::from_u8(code.as_u8()), Some(code));
        }
        assert_eq!(ErrorCode::from_u8(12), None);
    }

    #[test]
    fn test_store_error_default_is_success() {
        let state = StoreError::default();
        assert!(state.is_success());
        assert_eq!(state.to_string(), "SUCCESS: no error");
    }
}

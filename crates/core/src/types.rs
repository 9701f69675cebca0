//! Core value types shared by every crate
//!
//! - [`OpenMode`]: bitmask passed to `Store::open`
//! - [`MergeMode`]: conflict policy of `Store::merge`
//! - [`ErrorMask`]: set of error codes a binding raises as exceptions

use crate::error::{Error, ErrorCode};
use bitflags::bitflags;
use std::fmt;

bitflags! {
    /// Open mode of a store
    ///
    /// `READER` and `WRITER` select the access; `CREATE` and `TRUNCATE`
    /// only apply together with `WRITER`.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct OpenMode: u32 {
        /// Open for reading only; mutations fail with `NOPERM`
        const READER = 1 << 0;
        /// Open for reading and writing
        const WRITER = 1 << 1;
        /// Create the store when it does not exist
        const CREATE = 1 << 2;
        /// Discard any existing content
        const TRUNCATE = 1 << 3;
        /// Fsync after every update
        const AUTO_SYNC = 1 << 5;
        /// Do not take the advisory file lock
        const NO_LOCK = 1 << 6;
        /// Fail instead of blocking when the file lock is held
        const TRY_LOCK = 1 << 7;
        /// Fail on a damaged WAL tail instead of truncating it
        const NO_REPAIR = 1 << 8;
    }
}

impl OpenMode {
    /// True when the mode permits mutations
    pub fn is_writer(self) -> bool {
        self.contains(OpenMode::WRITER)
    }

    /// Validate the combination of flags
    pub fn validate(self) -> Result<(), Error> {
        let reader = self.contains(OpenMode::READER);
        let writer = self.contains(OpenMode::WRITER);
        if reader == writer {
            return Err(Error::invalid(
                "open mode must contain exactly one of READER or WRITER",
            ));
        }
        if reader && self.intersects(OpenMode::CREATE | OpenMode::TRUNCATE) {
            return Err(Error::invalid("CREATE and TRUNCATE require WRITER"));
        }
        Ok(())
    }
}

impl Default for OpenMode {
    fn default() -> Self {
        OpenMode::WRITER | OpenMode::CREATE
    }
}

/// Conflict policy applied when merging source stores into a destination
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum MergeMode {
    /// Source value overwrites the destination value
    #[default]
    Overwrite,
    /// Existing destination value is kept; only new keys are added
    KeepExisting,
    /// Only keys already present in the destination are updated
    Replace,
    /// Source value is appended to the destination value
    Append,
    /// Any key already present fails the whole merge with `DUPREC`
    FailOnConflict,
}

impl fmt::Display for MergeMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MergeMode::Overwrite => "overwrite",
            MergeMode::KeepExisting => "keep-existing",
            MergeMode::Replace => "replace",
            MergeMode::Append => "append",
            MergeMode::FailOnConflict => "fail-on-conflict",
        };
        f.write_str(name)
    }
}

bitflags! {
    /// Set of error codes, one bit per [`ErrorCode`] value
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ErrorMask: u32 {
        /// `NOIMPL`
        const NOT_IMPLEMENTED = 1 << 1;
        /// `INVALID`
        const INVALID_ARGUMENT = 1 << 2;
        /// `NOREPOS`
        const REPOSITORY_NOT_FOUND = 1 << 3;
        /// `NOPERM`
        const PERMISSION_DENIED = 1 << 4;
        /// `BROKEN`
        const BROKEN_DATA = 1 << 5;
        /// `DUPREC`
        const DUPLICATE_RECORD = 1 << 6;
        /// `NOREC`
        const RECORD_NOT_FOUND = 1 << 7;
        /// `LOGIC`
        const LOGIC_ERROR = 1 << 8;
        /// `SYSTEM`
        const SYSTEM_ERROR = 1 << 9;
        /// `MISC`
        const MISCELLANEOUS = 1 << 15;

        /// Codes raised in exceptional mode. Record-level outcomes
        /// (`DUPREC`, `NOREC`, `LOGIC`) stay ordinary control flow.
        const EXCEPTIONAL = Self::NOT_IMPLEMENTED.bits()
            | Self::INVALID_ARGUMENT.bits()
            | Self::REPOSITORY_NOT_FOUND.bits()
            | Self::PERMISSION_DENIED.bits()
            | Self::BROKEN_DATA.bits()
            | Self::SYSTEM_ERROR.bits()
            | Self::MISCELLANEOUS.bits();
    }
}

impl ErrorMask {
    /// True when the mask holds the code
    pub fn covers(self, code: ErrorCode) -> bool {
        code != ErrorCode::Success && self.bits() & (1u32 << code.as_u8()) != 0
    }
}

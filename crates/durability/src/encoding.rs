//! WAL entry encoding and decoding
//!
//! This module provides encoding/decoding for WAL entries with CRC32 checksums
//! for corruption detection.
//!
//! ## Entry Format
//!
//! ```text
//! [length: u32][type: u8][payload: bytes][crc32: u32]
//! ```
//!
//! - **length**: Total size of type + payload + crc (NOT including length itself)
//! - **type**: Entry type tag (1=Put, 2=Remove, 3=Clear, 4=BeginTxn, 5=CommitTxn, 6=AbortTxn)
//! - **payload**: bincode-serialized WalEntry
//! - **crc32**: CRC32 checksum over \[type\]\[payload\]
//!
//! All integers are little-endian.

use crate::wal::WalEntry;
use crate::WalError;
use crc32fast::Hasher;

const TYPE_PUT: u8 = 1;
const TYPE_REMOVE: u8 = 2;
const TYPE_CLEAR: u8 = 3;
const TYPE_BEGIN_TXN: u8 = 4;
const TYPE_COMMIT_TXN: u8 = 5;
const TYPE_ABORT_TXN: u8 = 6;

/// Smallest valid value of the length field: type(1) + crc(4)
const MIN_ENTRY_LEN: usize = 5;

fn type_tag(entry: &WalEntry) -> u8 {
    match entry {
        WalEntry::Put { .. } => TYPE_PUT,
        WalEntry::Remove { .. } => TYPE_REMOVE,
        WalEntry::Clear => TYPE_CLEAR,
        WalEntry::BeginTxn { .. } => TYPE_BEGIN_TXN,
        WalEntry::CommitTxn { .. } => TYPE_COMMIT_TXN,
        WalEntry::AbortTxn { .. } => TYPE_ABORT_TXN,
    }
}

/// Encode WAL entry to bytes
///
/// Format: `[length: u32][type: u8][payload: bytes][crc32: u32]`
pub fn encode_entry(entry: &WalEntry) -> Result<Vec<u8>, WalError> {
    let tag = type_tag(entry);
    let payload = bincode::serialize(entry).map_err(|e| WalError::Encode(e.to_string()))?;

    let total_len = 1 + payload.len() + 4;
    let mut buf = Vec::with_capacity(4 + total_len);
    buf.extend_from_slice(&(total_len as u32).to_le_bytes());
    buf.push(tag);
    buf.extend_from_slice(&payload);

    let mut hasher = Hasher::new();
    hasher.update(&[tag]);
    hasher.update(&payload);
    buf.extend_from_slice(&hasher.finalize().to_le_bytes());

    Ok(buf)
}

/// Encode several entries into one contiguous buffer
pub fn encode_entries(entries: &[WalEntry]) -> Result<Vec<u8>, WalError> {
    let mut buf = Vec::new();
    for entry in entries {
        buf.extend_from_slice(&encode_entry(entry)?);
    }
    Ok(buf)
}

/// Decode WAL entry from bytes with CRC validation
///
/// Returns the decoded entry and the number of bytes consumed.
/// `offset` is the file offset of `buf[0]`, used for error reporting.
///
/// # Errors
///
/// - `WalError::Incomplete` when the buffer ends inside the entry (a torn
///   write at the tail of the log)
/// - `WalError::Corrupt` on an impossible length, CRC mismatch, type tag
///   mismatch or undecodable payload
pub fn decode_entry(buf: &[u8], offset: u64) -> Result<(WalEntry, usize), WalError> {
    if buf.len() < 4 {
        return Err(WalError::Incomplete {
            offset,
            have: buf.len(),
            needed: 4,
        });
    }
    let mut len_buf = [0u8; 4];
    len_buf.copy_from_slice(&buf[..4]);
    let total_len = u32::from_le_bytes(len_buf) as usize;

    if total_len < MIN_ENTRY_LEN {
        return Err(WalError::Corrupt {
            offset,
            reason: format!("invalid entry length {}", total_len),
        });
    }
    if buf.len() < 4 + total_len {
        return Err(WalError::Incomplete {
            offset,
            have: buf.len(),
            needed: 4 + total_len,
        });
    }

    let tag = buf[4];
    let payload = &buf[5..4 + total_len - 4];
    let mut crc_buf = [0u8; 4];
    crc_buf.copy_from_slice(&buf[4 + total_len - 4..4 + total_len]);
    let expected_crc = u32::from_le_bytes(crc_buf);

    let mut hasher = Hasher::new();
    hasher.update(&[tag]);
    hasher.update(payload);
    let actual_crc = hasher.finalize();
    if actual_crc != expected_crc {
        return Err(WalError::Corrupt {
            offset,
            reason: format!(
                "CRC mismatch: expected {:08x}, got {:08x}",
                expected_crc, actual_crc
            ),
        });
    }

    let entry: WalEntry = bincode::deserialize(payload).map_err(|e| WalError::Corrupt {
        offset,
        reason: format!("deserialization failed: {}", e),
    })?;

    if type_tag(&entry) != tag {
        return Err(WalError::Corrupt {
            offset,
            reason: format!("type tag {} does not match payload", tag),
        });
    }

    Ok((entry, 4 + total_len))
}

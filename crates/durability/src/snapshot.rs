//! Snapshot image reading and writing
//!
//! A snapshot is the physical record set at one point in time:
//!
//! ```text
//! "CELLSNAP" | version: u32 | count: u64 | count x ([klen: u32][vlen: u32][key][value]) | crc32: u32
//! ```
//!
//! Integers are big-endian. The CRC32 covers every byte before it.
//! Readers validate the whole image before handing back any record.

use crate::SnapshotError;
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use cellar_storage::{RecordMap, RecordRef};
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Magic bytes at the start of every image
pub const SNAPSHOT_MAGIC: &[u8; 8] = b"CELLSNAP";

/// Current image format version
pub const SNAPSHOT_VERSION: u32 = 1;

/// Summary of a written snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    /// Final path, when written to a file
    pub path: Option<PathBuf>,
    /// Records written
    pub records: u64,
    /// Image size in bytes
    pub size_bytes: u64,
}

struct HashingWriter<W> {
    inner: W,
    hasher: crc32fast::Hasher,
    written: u64,
}

impl<W: Write> Write for HashingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

struct HashingReader<R> {
    inner: R,
    hasher: crc32fast::Hasher,
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        Ok(n)
    }
}

/// Write an image of `records` to `writer`
///
/// `count` must equal the number of items `records` yields.
pub fn write_snapshot<'a, W, I>(
    writer: W,
    count: u64,
    records: I,
) -> Result<SnapshotInfo, SnapshotError>
where
    W: Write,
    I: IntoIterator<Item = RecordRef<'a>>,
{
    let mut out = HashingWriter {
        inner: writer,
        hasher: crc32fast::Hasher::new(),
        written: 0,
    };
    out.write_all(SNAPSHOT_MAGIC)?;
    out.write_u32::<BigEndian>(SNAPSHOT_VERSION)?;
    out.write_u64::<BigEndian>(count)?;

    let mut written = 0u64;
    for (key, value) in records {
        out.write_u32::<BigEndian>(len_u32(key.len())?)?;
        out.write_u32::<BigEndian>(len_u32(value.len())?)?;
        out.write_all(key)?;
        out.write_all(value)?;
        written += 1;
    }
    if written != count {
        return Err(SnapshotError::CountMismatch {
            expected: count,
            actual: written,
        });
    }

    let checksum = out.hasher.clone().finalize();
    let size_bytes = out.written + 4;
    let mut inner = out.inner;
    inner.write_u32::<BigEndian>(checksum)?;
    inner.flush()?;

    Ok(SnapshotInfo {
        path: None,
        records: count,
        size_bytes,
    })
}

/// Write an image of a whole record map
pub fn write_records<W: Write>(writer: W, map: &RecordMap) -> Result<SnapshotInfo, SnapshotError> {
    write_snapshot(writer, map.len() as u64, map.iter())
}

fn len_u32(len: usize) -> Result<u32, SnapshotError> {
    u32::try_from(len).map_err(|_| SnapshotError::RecordTooLarge(len))
}

/// Read and fully validate an image
pub fn read_snapshot<R: Read>(reader: R) -> Result<RecordMap, SnapshotError> {
    let mut input = HashingReader {
        inner: reader,
        hasher: crc32fast::Hasher::new(),
    };

    let mut magic = [0u8; 8];
    input.read_exact(&mut magic).map_err(truncated)?;
    if &magic != SNAPSHOT_MAGIC {
        return Err(SnapshotError::InvalidMagic);
    }
    let version = input.read_u32::<BigEndian>().map_err(truncated)?;
    if version != SNAPSHOT_VERSION {
        return Err(SnapshotError::UnsupportedVersion(version));
    }
    let count = input.read_u64::<BigEndian>().map_err(truncated)?;

    let mut map = RecordMap::new();
    for _ in 0..count {
        let klen = input.read_u32::<BigEndian>().map_err(truncated)?;
        let vlen = input.read_u32::<BigEndian>().map_err(truncated)?;
        let key = read_exact_vec(&mut input, klen)?;
        let value = read_exact_vec(&mut input, vlen)?;
        map.put(key, value);
    }

    let actual = input.hasher.clone().finalize();
    let mut inner = input.inner;
    let expected = inner.read_u32::<BigEndian>().map_err(truncated)?;
    if expected != actual {
        return Err(SnapshotError::ChecksumMismatch { expected, actual });
    }
    let mut trailing = [0u8; 1];
    if inner.read(&mut trailing)? != 0 {
        return Err(SnapshotError::TrailingData);
    }
    Ok(map)
}

// Grows with the data actually present instead of trusting the length field.
fn read_exact_vec<R: Read>(input: &mut R, len: u32) -> Result<Vec<u8>, SnapshotError> {
    let mut buf = Vec::new();
    input.by_ref().take(len as u64).read_to_end(&mut buf)?;
    if buf.len() != len as usize {
        return Err(SnapshotError::Truncated);
    }
    Ok(buf)
}

fn truncated(e: io::Error) -> SnapshotError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        SnapshotError::Truncated
    } else {
        SnapshotError::Io(e)
    }
}

/// Read and validate an image file
pub fn read_snapshot_file(path: &Path) -> Result<RecordMap, SnapshotError> {
    let file = File::open(path)?;
    let map = read_snapshot(BufReader::new(file))?;
    debug!(target: "cellar::snapshot", path = %path.display(), records = map.len(), "Snapshot loaded");
    Ok(map)
}

/// Write an image file atomically
///
/// Uses temp file + rename:
/// 1. Write to `<path>.tmp`
/// 2. fsync the temp file
/// 3. Rename over `path`
///
/// If any step fails the temp file is removed and `path` is untouched.
pub fn write_snapshot_file(path: &Path, map: &RecordMap) -> Result<SnapshotInfo, SnapshotError> {
    let temp_path = temp_path_for(path);

    if temp_path.exists() {
        warn!(target: "cellar::snapshot", path = %temp_path.display(), "Removing stale temp file");
        let _ = std::fs::remove_file(&temp_path);
    }

    let result = write_temp(&temp_path, map).and_then(|info| {
        std::fs::rename(&temp_path, path)?;
        Ok(info)
    });

    match result {
        Ok(info) => {
            info!(
                target: "cellar::snapshot",
                path = %path.display(),
                records = info.records,
                size_bytes = info.size_bytes,
                "Snapshot written"
            );
            Ok(SnapshotInfo {
                path: Some(path.to_path_buf()),
                ..info
            })
        }
        Err(e) => {
            warn!(
                target: "cellar::snapshot",
                temp_path = %temp_path.display(),
                error = %e,
                "Snapshot write failed, cleaning up temp file"
            );
            let _ = std::fs::remove_file(&temp_path);
            Err(e)
        }
    }
}

fn write_temp(temp_path: &Path, map: &RecordMap) -> Result<SnapshotInfo, SnapshotError> {
    let file = File::create(temp_path)?;
    let mut writer = BufWriter::new(file);
    let info = write_records(&mut writer, map)?;
    let file = writer
        .into_inner()
        .map_err(|e| SnapshotError::Io(e.into_error()))?;
    file.sync_all()?;
    Ok(info)
}

fn temp_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

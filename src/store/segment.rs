//! Segment files
//!
//! One segment is a bounded, append-only file of records. Only the last
//! segment of a store is active; every other one is sealed.
//!
//! ## File Format
//! ```text
//! ┌─────────────────────────────────────────────────────────┐
//! │ Header (16 bytes)                                       │
//! │   Magic: "AWAL" (4) | Version: u16 (2) | Reserved (2)   │
//! │   Segment id: u64 (8)                                   │
//! ├─────────────────────────────────────────────────────────┤
//! │ Records (variable)                                      │
//! │   [Len: u32][CRC32: u32][Payload]                       │
//! │   ... repeated; LSN = segment id << 32 | record offset  │
//! └─────────────────────────────────────────────────────────┘
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::error::{Result, WalError};
use crate::wal::{LogEntry, Lsn, RECORD_HEADER_SIZE, SEGMENT_HEADER_SIZE};

/// Magic bytes identifying an AtlasWAL segment file
pub(crate) const MAGIC: &[u8; 4] = b"AWAL";

/// Current segment format version
pub(crate) const VERSION: u16 = 1;

/// Outcome of reading at an offset
#[derive(Debug)]
pub enum SegmentRead {
    /// A complete, checksummed record
    Entry(LogEntry),

    /// Nothing has been written at this offset (yet)
    Unwritten,
}

/// A single segment file
///
/// ## Concurrency:
/// - `len`: committed length, published after each record is written
/// - `file`: one handle shared by the appender and readers (seek + read)
/// - `refs`: number of live [`SegmentRef`] guards
pub struct Segment {
    id: u32,
    path: PathBuf,
    file: Mutex<File>,
    len: AtomicU64,
    sealed: AtomicBool,
    refs: AtomicUsize,
}

impl Segment {
    /// Create a new, empty segment file in `dir`
    pub(crate) fn create(dir: &Path, id: u32) -> Result<Self> {
        let path = segment_path(dir, id);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mut header = [0u8; SEGMENT_HEADER_SIZE as usize];
        header[0..4].copy_from_slice(MAGIC);
        header[4..6].copy_from_slice(&VERSION.to_le_bytes());
        header[8..16].copy_from_slice(&(id as u64).to_le_bytes());
        file.write_all(&header)?;
        file.sync_all()?;

        Ok(Self {
            id,
            path,
            file: Mutex::new(file),
            len: AtomicU64::new(SEGMENT_HEADER_SIZE),
            sealed: AtomicBool::new(false),
            refs: AtomicUsize::new(0),
        })
    }

    /// Open an existing segment file and validate its header
    pub(crate) fn open(path: &Path, sealed: bool) -> Result<Self> {
        let mut file = OpenOptions::new().read(true).write(true).open(path)?;

        let mut header = [0u8; SEGMENT_HEADER_SIZE as usize];
        file.read_exact(&mut header).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => {
                WalError::WalCorruption(format!("segment header truncated: {}", path.display()))
            }
            _ => WalError::Io(e),
        })?;

        if &header[0..4] != MAGIC {
            return Err(WalError::WalCorruption(format!(
                "invalid segment magic: {}",
                path.display()
            )));
        }
        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(WalError::WalCorruption(format!(
                "unsupported segment version {}: {}",
                version,
                path.display()
            )));
        }
        let mut id_bytes = [0u8; 8];
        id_bytes.copy_from_slice(&header[8..16]);
        let id = u32::try_from(u64::from_le_bytes(id_bytes)).map_err(|_| {
            WalError::WalCorruption(format!("segment id out of range: {}", path.display()))
        })?;

        let len = file.metadata()?.len();

        Ok(Self {
            id,
            path: path.to_path_buf(),
            file: Mutex::new(file),
            len: AtomicU64::new(len),
            sealed: AtomicBool::new(sealed),
            refs: AtomicUsize::new(0),
        })
    }

    /// Append one record at the end of the segment, returning its offset
    ///
    /// Callers serialize appends; readers may run concurrently.
    pub(crate) fn append(&self, payload: &[u8]) -> Result<u32> {
        let offset = self.len.load(Ordering::Acquire);
        let offset32 = u32::try_from(offset)
            .map_err(|_| WalError::InvalidArgument(format!("segment {} is full", self.id)))?;
        let payload_len = u32::try_from(payload.len())
            .map_err(|_| WalError::InvalidArgument("payload too large".to_string()))?;

        let mut record = Vec::with_capacity(RECORD_HEADER_SIZE as usize + payload.len());
        record.extend_from_slice(&payload_len.to_le_bytes());
        record.extend_from_slice(&crc32fast::hash(payload).to_le_bytes());
        record.extend_from_slice(payload);

        {
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(offset))?;
            file.write_all(&record)?;
        }

        self.len.store(offset + record.len() as u64, Ordering::Release);
        Ok(offset32)
    }

    /// Read the record starting at `offset`
    pub fn read_at(&self, offset: u32) -> Result<SegmentRead> {
        let lsn = Lsn::new(self.id, offset);
        let offset = offset as u64;
        if offset < SEGMENT_HEADER_SIZE {
            return Err(WalError::InvalidLsn(lsn));
        }

        let len = self.len.load(Ordering::Acquire);
        if offset >= len {
            return Ok(SegmentRead::Unwritten);
        }
        if offset + RECORD_HEADER_SIZE > len {
            return Err(WalError::WalCorruption(format!(
                "record header at {} runs past segment end {}",
                lsn, len
            )));
        }

        let mut file = self.file.lock();
        file.seek(SeekFrom::Start(offset))?;

        let mut header = [0u8; RECORD_HEADER_SIZE as usize];
        file.read_exact(&mut header)?;
        let payload_len = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as u64;
        let stored_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        if offset + RECORD_HEADER_SIZE + payload_len > len {
            return Err(WalError::WalCorruption(format!(
                "record at {} claims {} bytes past segment end {}",
                lsn, payload_len, len
            )));
        }

        let mut payload = vec![0u8; payload_len as usize];
        file.read_exact(&mut payload)?;
        drop(file);

        let computed_crc = crc32fast::hash(&payload);
        if stored_crc != computed_crc {
            return Err(WalError::WalCorruption(format!(
                "checksum mismatch at {}: stored {:08x}, computed {:08x}",
                lsn, stored_crc, computed_crc
            )));
        }

        Ok(SegmentRead::Entry(LogEntry::new(lsn, Bytes::from(payload))))
    }

    /// Cut the file back to `len` bytes (drops a torn tail)
    pub(crate) fn truncate(&self, len: u64) -> Result<()> {
        let file = self.file.lock();
        file.set_len(len)?;
        file.sync_all()?;
        self.len.store(len, Ordering::Release);
        Ok(())
    }

    /// Force written records to disk
    pub(crate) fn sync(&self) -> Result<()> {
        self.file.lock().sync_data()?;
        Ok(())
    }

    /// Sync and mark as sealed (no more writes)
    pub(crate) fn seal(&self) -> Result<()> {
        self.sync()?;
        self.sealed.store(true, Ordering::Release);
        Ok(())
    }

    /// Segment id (high half of its LSNs)
    pub fn id(&self) -> u32 {
        self.id
    }

    /// File path
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Committed length in bytes (header included)
    pub fn len(&self) -> u64 {
        self.len.load(Ordering::Acquire)
    }

    /// Whether no record has been written
    pub fn is_empty(&self) -> bool {
        self.len() <= SEGMENT_HEADER_SIZE
    }

    /// Whether the segment is sealed
    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::Acquire)
    }

    /// Number of live references
    pub fn refs(&self) -> usize {
        self.refs.load(Ordering::Acquire)
    }
}

/// A counted reference to a segment, released on drop
pub struct SegmentRef {
    segment: Arc<Segment>,
}

impl SegmentRef {
    pub(crate) fn acquire(segment: Arc<Segment>) -> Self {
        segment.refs.fetch_add(1, Ordering::AcqRel);
        Self { segment }
    }
}

impl Deref for SegmentRef {
    type Target = Segment;

    fn deref(&self) -> &Segment {
        &self.segment
    }
}

impl Drop for SegmentRef {
    fn drop(&mut self) {
        self.segment.refs.fetch_sub(1, Ordering::AcqRel);
    }
}

// =============================================================================
// Path Helpers
// =============================================================================

/// Generate the file path for a segment with given id
pub(crate) fn segment_path(dir: &Path, id: u32) -> PathBuf {
    dir.join(format!("segment_{:08}.wal", id))
}

/// Parse segment id from filename
/// "segment_00000042.wal" → Some(42)
pub(crate) fn parse_segment_id(path: &Path) -> Option<u32> {
    if path.extension()? != "wal" {
        return None;
    }
    let name = path.file_stem()?.to_string_lossy();
    let id_str = name.strip_prefix("segment_")?;
    id_str.parse().ok()
}

/// List segment files in a directory, ordered by id
pub(crate) fn list_segments(dir: &Path) -> Result<Vec<(u32, PathBuf)>> {
    let mut segments = Vec::new();

    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            if let Some(id) = parse_segment_id(&path) {
                segments.push((id, path));
            }
        }
    }

    segments.sort_by_key(|(id, _)| *id);
    Ok(segments)
}

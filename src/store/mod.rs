//! Log Store Module
//!
//! Durable, append-only log partitioned into segment files.
//!
//! ## Responsibilities
//! - Append records to the active segment, rolling over when it is full
//! - Serve point reads and successor reads by LSN
//! - Wake blocked tail readers when entries are appended
//! - Recover a torn tail on open
//! - Hand out counted segment references to scanning iterators
//!
//! ## Concurrency:
//! - `writer`: one Mutex serializes appends, rollover and close; the
//!   `appended` Condvar is paired with it for blocking reads
//! - `segments`: RwLock over the id → segment map (written on rollover only)
//! - reads never take the writer lock, except blocking waits

mod cache;
mod recovery;
mod segment;

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::{Condvar, Mutex, MutexGuard, RwLock};

use crate::config::{Config, WalSyncStrategy};
use crate::error::{Result, WalError};
use crate::wal::{LogEntry, Lsn, Wal, WalIterator, RECORD_HEADER_SIZE, SEGMENT_HEADER_SIZE};

use cache::TailCache;

pub use recovery::RecoveryResult;
pub use segment::{Segment, SegmentRead, SegmentRef};

/// A segmented log on local disk
///
/// Cheap to clone: clones share the same underlying store.
#[derive(Clone)]
pub struct LogStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    config: Config,
    segments: RwLock<BTreeMap<u32, Arc<Segment>>>,
    writer: Mutex<WriterState>,
    appended: Condvar,
    cache: Mutex<TailCache>,
    open: AtomicBool,
}

/// State owned by the appender
struct WriterState {
    active: Arc<Segment>,
    next_lsn: Lsn,
    last: Option<LogEntry>,
    unsynced: usize,
}

impl LogStore {
    /// Open or create a store in `config.data_dir`
    ///
    /// On startup:
    /// 1. Create the directory if it doesn't exist
    /// 2. Discover segment files and validate their headers
    /// 3. Recover the active (last) segment, truncating a torn tail
    /// 4. Create segment 0 for an empty directory
    pub fn open(config: Config) -> Result<Self> {
        let min_size = SEGMENT_HEADER_SIZE + RECORD_HEADER_SIZE;
        if (config.segment_size as u64) <= min_size {
            return Err(WalError::Config(format!(
                "segment size {} must exceed {} bytes",
                config.segment_size, min_size
            )));
        }

        let dir = config.data_dir.clone();
        fs::create_dir_all(&dir)?;

        let found = segment::list_segments(&dir)?;
        let count = found.len();
        let mut segments = BTreeMap::new();
        let mut expected_id = found.first().map(|(id, _)| *id).unwrap_or(0);
        for (i, (id, path)) in found.iter().enumerate() {
            if *id != expected_id {
                return Err(WalError::WalCorruption(format!(
                    "missing segment {} before {}",
                    expected_id,
                    path.display()
                )));
            }
            let segment = Segment::open(path, i + 1 < count)?;
            if segment.id() != *id {
                return Err(WalError::WalCorruption(format!(
                    "segment header id {} does not match {}",
                    segment.id(),
                    path.display()
                )));
            }
            segments.insert(*id, Arc::new(segment));
            expected_id = id + 1;
        }

        let mut cache = TailCache::new(config.fetch_size);
        let warm = config.fetch_last && config.fetch_size > 0;

        let (active, last) = match segments.values().next_back().cloned() {
            Some(active) => {
                let result = recovery::recover_segment(&active, true, |entry| {
                    if warm {
                        cache.push(entry.clone());
                    }
                })?;
                tracing::info!(
                    "Recovered segment {}: {} entries, truncated={}",
                    active.id(),
                    result.entries_recovered,
                    result.was_truncated
                );

                let mut last = result.last;
                if last.is_none() {
                    if let Some(previous) = segments.range(..active.id()).next_back().map(|(_, s)| s) {
                        last = recovery::recover_segment(previous, false, |_| {})?.last;
                    }
                }
                (active, last)
            }
            None => {
                let active = Arc::new(Segment::create(&dir, 0)?);
                segments.insert(0, Arc::clone(&active));
                (active, None)
            }
        };

        let next_lsn = Lsn::new(active.id(), active.len() as u32);
        tracing::debug!(
            "Opened log store at {} ({} segments, next lsn {})",
            dir.display(),
            segments.len(),
            next_lsn
        );

        Ok(Self {
            inner: Arc::new(StoreInner {
                config,
                segments: RwLock::new(segments),
                writer: Mutex::new(WriterState {
                    active,
                    next_lsn,
                    last,
                    unsynced: 0,
                }),
                appended: Condvar::new(),
                cache: Mutex::new(cache),
                open: AtomicBool::new(true),
            }),
        })
    }

    /// Open with a path (convenience method)
    ///
    /// Uses default config with the specified data directory
    pub fn open_path(path: &Path) -> Result<Self> {
        Self::open(Config::builder().data_dir(path).build())
    }

    /// Write an entry taken from another log verbatim at its LSN
    ///
    /// Used by replication only. The LSN must be this store's next position,
    /// or the first record of the next segment (the source rolled over);
    /// anything else would leave a gap or overwrite history.
    pub fn append_entry(&self, entry: &LogEntry) -> Result<()> {
        let mut writer = self.inner.writer.lock();
        self.ensure_open()?;

        if entry.lsn != writer.next_lsn {
            let rolled = entry.lsn.is_segment_start()
                && entry.lsn.segment() == writer.next_lsn.segment().wrapping_add(1);
            if !rolled {
                return Err(WalError::Protocol(format!(
                    "out of order append: expected {}, got {}",
                    writer.next_lsn, entry.lsn
                )));
            }
            self.roll(&mut writer)?;
        }

        self.write_entry(&mut writer, LogEntry::new(entry.lsn, entry.payload.clone()))
    }

    /// Acquire a counted reference to the segment containing `lsn`
    pub fn acquire_segment(&self, lsn: Lsn) -> Result<Option<SegmentRef>> {
        self.ensure_open()?;
        Ok(self.segment(lsn.segment()).map(SegmentRef::acquire))
    }

    /// Live references held on a segment (0 if it doesn't exist)
    pub fn segment_refs(&self, id: u32) -> usize {
        self.segment(id).map(|s| s.refs()).unwrap_or(0)
    }

    /// Number of segment files
    pub fn segment_count(&self) -> usize {
        self.inner.segments.read().len()
    }

    /// Number of entries held by the tail cache
    pub fn cached_entries(&self) -> usize {
        self.inner.cache.lock().len()
    }

    /// Entries appended since the last fsync
    pub fn unsynced_entries(&self) -> usize {
        self.inner.writer.lock().unsynced
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.inner.config.data_dir
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Entry at `pos`, or the first entry of the next segment when `pos`
    /// is the end of a sealed segment
    ///
    /// `pos` is normally the `next_lsn()` of an entry already read.
    pub fn read_from(&self, pos: Lsn) -> Result<Option<LogEntry>> {
        self.ensure_open()?;
        if !pos.is_valid() {
            return Err(WalError::InvalidLsn(pos));
        }
        if let Some(entry) = self.inner.cache.lock().get(pos) {
            return Ok(Some(entry));
        }

        let segment = match self.segment(pos.segment()) {
            Some(segment) => segment,
            None => return Ok(None),
        };

        match segment.read_at(pos.offset())? {
            SegmentRead::Entry(entry) => Ok(Some(entry)),
            SegmentRead::Unwritten if segment.is_sealed() && pos.offset() as u64 == segment.len() => {
                let next = pos.next_segment();
                match self.segment(next.segment()) {
                    Some(segment) => match segment.read_at(next.offset())? {
                        SegmentRead::Entry(entry) => Ok(Some(entry)),
                        SegmentRead::Unwritten => Ok(None),
                    },
                    None => Ok(None),
                }
            }
            SegmentRead::Unwritten => Ok(None),
        }
    }

    /// Blocking form of [`LogStore::read_from`]
    pub fn read_from_wait(&self, pos: Lsn, timeout: Duration) -> Result<LogEntry> {
        self.wait_for(timeout, || self.read_from(pos))
    }

    // =========================================================================
    // Private Helpers
    // =========================================================================

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(WalError::NotOpen(format!(
                "log store {} closed",
                self.inner.config.data_dir.display()
            )))
        }
    }

    fn segment(&self, id: u32) -> Option<Arc<Segment>> {
        self.inner.segments.read().get(&id).cloned()
    }

    /// Seal the active segment and start the next one (writer lock held)
    fn roll(&self, writer: &mut MutexGuard<'_, WriterState>) -> Result<()> {
        writer.active.seal()?;
        let id = writer
            .active
            .id()
            .checked_add(1)
            .ok_or_else(|| WalError::InvalidArgument("segment id space exhausted".to_string()))?;

        let segment = Arc::new(Segment::create(&self.inner.config.data_dir, id)?);
        self.inner.segments.write().insert(id, Arc::clone(&segment));

        writer.active = segment;
        writer.next_lsn = Lsn::segment_start(id);
        writer.unsynced = 0;
        tracing::debug!("Rolled over to segment {}", id);
        Ok(())
    }

    /// Write a record for `entry` at the writer position (writer lock held)
    fn write_entry(&self, writer: &mut MutexGuard<'_, WriterState>, entry: LogEntry) -> Result<()> {
        let next_lsn = entry.lsn.after_record(entry.len()).ok_or_else(|| {
            WalError::InvalidArgument(format!("record at {} exceeds the segment offset space", entry.lsn))
        })?;

        writer.active.append(&entry.payload)?;
        writer.next_lsn = next_lsn;
        writer.unsynced += 1;

        match self.inner.config.wal_sync_strategy {
            WalSyncStrategy::EveryWrite => {
                writer.active.sync()?;
                writer.unsynced = 0;
            }
            WalSyncStrategy::EveryNEntries { count } if writer.unsynced >= count => {
                writer.active.sync()?;
                writer.unsynced = 0;
            }
            _ => {}
        }

        self.inner.cache.lock().push(entry.clone());
        writer.last = Some(entry);
        self.inner.appended.notify_all();
        Ok(())
    }

    /// Block until `lookup` yields an entry, giving up on timeout or close
    fn wait_for<F>(&self, timeout: Duration, mut lookup: F) -> Result<LogEntry>
    where
        F: FnMut() -> Result<Option<LogEntry>>,
    {
        let deadline = Instant::now() + timeout;
        let mut writer = self.inner.writer.lock();

        loop {
            self.ensure_open()?;
            if let Some(entry) = lookup()? {
                return Ok(entry);
            }
            if self.inner.appended.wait_until(&mut writer, deadline).timed_out() {
                return lookup()?.ok_or(WalError::Timeout);
            }
        }
    }
}

impl Wal for LogStore {
    fn append(&self, payload: &[u8]) -> Result<LogEntry> {
        let capacity = self.inner.config.segment_size as u64 - SEGMENT_HEADER_SIZE - RECORD_HEADER_SIZE;
        if payload.len() as u64 > capacity {
            return Err(WalError::InvalidArgument(format!(
                "payload of {} bytes exceeds segment capacity of {} bytes",
                payload.len(),
                capacity
            )));
        }

        let mut writer = self.inner.writer.lock();
        self.ensure_open()?;

        let record_end = writer.next_lsn.offset() as u64 + RECORD_HEADER_SIZE + payload.len() as u64;
        if record_end > self.inner.config.segment_size as u64 {
            self.roll(&mut writer)?;
        }

        let entry = LogEntry::new(writer.next_lsn, Bytes::copy_from_slice(payload));
        self.write_entry(&mut writer, entry.clone())?;
        Ok(entry)
    }

    fn first(&self) -> Result<Option<LogEntry>> {
        self.ensure_open()?;
        let segments: Vec<Arc<Segment>> = self.inner.segments.read().values().cloned().collect();

        for segment in segments {
            match segment.read_at(SEGMENT_HEADER_SIZE as u32)? {
                SegmentRead::Entry(entry) => return Ok(Some(entry)),
                SegmentRead::Unwritten if segment.is_sealed() => continue,
                SegmentRead::Unwritten => return Ok(None),
            }
        }
        Ok(None)
    }

    fn first_wait(&self, timeout: Duration) -> Result<LogEntry> {
        self.wait_for(timeout, || self.first())
    }

    fn last(&self) -> Result<Option<LogEntry>> {
        self.ensure_open()?;
        Ok(self.inner.writer.lock().last.clone())
    }

    fn get(&self, lsn: Lsn) -> Result<Option<LogEntry>> {
        self.ensure_open()?;
        if !lsn.is_valid() {
            return Err(WalError::InvalidLsn(lsn));
        }
        if let Some(entry) = self.inner.cache.lock().get(lsn) {
            return Ok(Some(entry));
        }

        match self.segment(lsn.segment()) {
            Some(segment) => match segment.read_at(lsn.offset())? {
                SegmentRead::Entry(entry) => Ok(Some(entry)),
                SegmentRead::Unwritten => Ok(None),
            },
            None => Ok(None),
        }
    }

    fn next(&self, entry: &LogEntry) -> Result<Option<LogEntry>> {
        self.ensure_open()?;
        if let Some(next) = self.inner.cache.lock().successor(entry.lsn) {
            return Ok(Some(next));
        }
        self.read_from(entry.next_lsn())
    }

    fn next_wait(&self, entry: &LogEntry, timeout: Duration) -> Result<LogEntry> {
        self.wait_for(timeout, || self.next(entry))
    }

    fn iterator(&self, start: Option<Lsn>, timeout: Option<Duration>) -> Result<WalIterator> {
        self.ensure_open()?;
        if let Some(lsn) = start {
            if !lsn.is_valid() {
                return Err(WalError::InvalidLsn(lsn));
            }
        }

        Ok(match timeout {
            Some(timeout) => WalIterator::over_log(Arc::new(self.clone()), start, Some(timeout)),
            None => WalIterator::over_segments(self.clone(), start),
        })
    }

    fn sync(&self) -> Result<()> {
        let mut writer = self.inner.writer.lock();
        self.ensure_open()?;
        writer.active.sync()?;
        writer.unsynced = 0;
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        let mut writer = self.inner.writer.lock();
        if !self.inner.open.swap(false, Ordering::AcqRel) {
            return;
        }
        if writer.unsynced > 0 {
            if let Err(e) = writer.active.sync() {
                tracing::warn!("Failed to sync segment {} on close: {}", writer.active.id(), e);
            }
            writer.unsynced = 0;
        }
        self.inner.appended.notify_all();
        tracing::debug!("Closed log store at {}", self.inner.config.data_dir.display());
    }
}

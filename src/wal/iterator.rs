//! WAL Iterator
//!
//! Sequential cursor over a log, in LSN order.
//!
//! Two modes, selected by whether a timeout is supplied:
//! - **Tailing** (timeout given): every `has_next()` asks the source for the
//!   entry after the last one returned, waiting up to the timeout. When
//!   nothing arrives `WalError::Timeout` is returned and the iterator stays
//!   usable, so the caller simply retries.
//! - **Scan** (no timeout): reads what is written and ends cleanly at the
//!   first unwritten position of the active segment. Over a local store the
//!   scan walks segment files directly, holding at most one segment at a time.

use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, WalError};
use crate::store::{LogStore, SegmentRead, SegmentRef};

use super::{LogEntry, Lsn, Wal};

/// Where entries come from
enum Source {
    /// Segment files of a local store
    Segments {
        store: LogStore,
        held: Option<SegmentRef>,
    },

    /// Any log, stepped with first/get/next calls
    Log {
        log: Arc<dyn Wal>,
        timeout: Option<Duration>,
    },
}

/// Sequential, single-consumer cursor over a log
///
/// `has_next()` must be called before every `next()`. The iterator is
/// closed on exhaustion, on a hard error, by `close()` or on drop; closing
/// releases any held segment.
pub struct WalIterator {
    source: Source,
    /// Position to read at next (None until resolved)
    lsn: Option<Lsn>,
    /// Entry fetched by `has_next()` and not yet returned
    pending: Option<LogEntry>,
    /// Entry most recently returned by `next()`
    last: Option<LogEntry>,
    has_next_called: bool,
    exhausted: bool,
    open: bool,
}

impl WalIterator {
    /// Scan the segment files of a local store from `start`
    pub(crate) fn over_segments(store: LogStore, start: Option<Lsn>) -> Self {
        Self::with_source(Source::Segments { store, held: None }, start)
    }

    /// Iterate any log through its read calls
    ///
    /// With a timeout this is the tailing mode used against remote sources.
    pub fn over_log(log: Arc<dyn Wal>, start: Option<Lsn>, timeout: Option<Duration>) -> Self {
        Self::with_source(Source::Log { log, timeout }, start)
    }

    fn with_source(source: Source, start: Option<Lsn>) -> Self {
        Self {
            source,
            lsn: start,
            pending: None,
            last: None,
            has_next_called: false,
            exhausted: false,
            open: true,
        }
    }

    /// Whether another entry is available
    ///
    /// Repeated calls without `next()` return the same answer without
    /// touching the source again.
    pub fn has_next(&mut self) -> Result<bool> {
        self.has_next_called = true;
        if self.exhausted {
            return Ok(false);
        }
        if self.pending.is_some() {
            return Ok(true);
        }

        let fetched = match &mut self.source {
            Source::Segments { store, held } => scan(store, held, self.lsn),
            Source::Log { log, timeout } => step(log.as_ref(), *timeout, self.last.as_ref(), self.lsn),
        };

        match fetched {
            Ok(Some(entry)) => {
                self.lsn = Some(entry.next_lsn());
                self.pending = Some(entry);
                Ok(true)
            }
            Ok(None) => {
                self.close();
                Ok(false)
            }
            Err(e) if e.is_timeout() => Err(e),
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Return the entry found by the preceding `has_next()`
    pub fn next(&mut self) -> Result<LogEntry> {
        if !self.has_next_called {
            return Err(WalError::IllegalState("has_next() not called".to_string()));
        }
        self.has_next_called = false;
        if self.exhausted {
            return Err(WalError::NoSuchElement);
        }

        match self.pending.take() {
            Some(entry) => {
                self.last = Some(entry.clone());
                Ok(entry)
            }
            None => Err(WalError::IllegalState("no entry pending".to_string())),
        }
    }

    /// Whether the iterator can still produce entries
    pub fn is_open(&self) -> bool {
        self.open
    }

    /// LSN of the entry most recently returned
    pub fn last_lsn(&self) -> Option<Lsn> {
        self.last.as_ref().map(|e| e.lsn)
    }

    /// Close the iterator and release any held segment; idempotent
    pub fn close(&mut self) {
        if let Source::Segments { held, .. } = &mut self.source {
            held.take();
        }
        self.pending = None;
        self.exhausted = true;
        self.open = false;
    }

    /// Adapt into a std iterator of `Result<LogEntry>`
    ///
    /// In tailing mode a timeout is yielded as `Some(Err(WalError::Timeout))`
    /// and iteration may continue afterwards.
    pub fn entries(self) -> Entries {
        Entries { inner: self }
    }
}

impl Drop for WalIterator {
    fn drop(&mut self) {
        self.close();
    }
}

/// Read the next entry straight from segment files
fn scan(store: &LogStore, held: &mut Option<SegmentRef>, lsn: Option<Lsn>) -> Result<Option<LogEntry>> {
    let pos = match lsn {
        Some(pos) => pos,
        None => match store.first()? {
            Some(first) => {
                *held = store.acquire_segment(first.lsn)?;
                return Ok(held.as_ref().map(|_| first));
            }
            None => return Ok(None),
        },
    };

    if held.as_ref().map_or(true, |s| s.id() != pos.segment()) {
        // Release before acquiring: one segment at a time.
        *held = None;
        *held = store.acquire_segment(pos)?;
    }
    let segment = match held.as_ref() {
        Some(segment) => segment,
        None => return Ok(None),
    };

    match segment.read_at(pos.offset())? {
        SegmentRead::Entry(entry) => Ok(Some(entry)),
        SegmentRead::Unwritten if !segment.is_sealed() => {
            tracing::trace!("Reached end of active segment {} at {}", segment.id(), pos);
            Ok(None)
        }
        SegmentRead::Unwritten => {
            let next = pos.next_segment();
            *held = None;
            *held = store.acquire_segment(next)?;
            match held.as_ref() {
                Some(segment) => match segment.read_at(next.offset())? {
                    SegmentRead::Entry(entry) => Ok(Some(entry)),
                    SegmentRead::Unwritten => Ok(None),
                },
                None => Ok(None),
            }
        }
    }
}

/// Read the next entry through the log's own read calls
fn step(
    log: &dyn Wal,
    timeout: Option<Duration>,
    last: Option<&LogEntry>,
    lsn: Option<Lsn>,
) -> Result<Option<LogEntry>> {
    match (last, lsn, timeout) {
        (Some(last), _, Some(timeout)) => log.next_wait(last, timeout).map(Some),
        (Some(last), _, None) => log.next(last),
        (None, Some(lsn), _) => log.get(lsn),
        (None, None, Some(timeout)) => log.first_wait(timeout).map(Some),
        (None, None, None) => log.first(),
    }
}

/// Std iterator adapter returned by [`WalIterator::entries`]
pub struct Entries {
    inner: WalIterator,
}

impl Entries {
    /// Borrow the underlying cursor
    pub fn cursor(&self) -> &WalIterator {
        &self.inner
    }
}

impl Iterator for Entries {
    type Item = Result<LogEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.inner.has_next() {
            Ok(true) => Some(self.inner.next()),
            Ok(false) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

//! Tail cache
//!
//! Keeps the most recent entries in memory so tailing readers (replicas
//! above all) are served without touching segment files.

use std::collections::VecDeque;

use crate::wal::{LogEntry, Lsn};

/// Bounded window over the newest, contiguous entries of a store
pub(crate) struct TailCache {
    capacity: usize,
    entries: VecDeque<LogEntry>,
}

impl TailCache {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity.min(1024)),
        }
    }

    /// Record a newly appended entry
    ///
    /// Entries must arrive in log order; anything else resets the window so
    /// it never holds a gap.
    pub(crate) fn push(&mut self, entry: LogEntry) {
        if self.capacity == 0 {
            return;
        }
        if let Some(back) = self.entries.back() {
            if entry.lsn <= back.lsn {
                self.entries.clear();
            }
        }
        self.entries.push_back(entry);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    /// Entry stored at exactly `lsn`
    pub(crate) fn get(&self, lsn: Lsn) -> Option<LogEntry> {
        let index = self.entries.binary_search_by_key(&lsn, |e| e.lsn).ok()?;
        self.entries.get(index).cloned()
    }

    /// Entry following the one at `lsn`
    pub(crate) fn successor(&self, lsn: Lsn) -> Option<LogEntry> {
        let index = self.entries.binary_search_by_key(&lsn, |e| e.lsn).ok()?;
        self.entries.get(index + 1).cloned()
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

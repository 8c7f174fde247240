//! Write-Ahead Log (WAL) Module
//!
//! The read/append contract shared by every log in the crate, and the
//! iterator used to consume it.
//!
//! ## Responsibilities
//! - Log Sequence Numbers (LSN) for ordering
//! - Immutable entries handed out by value
//! - One `Wal` trait for local stores, remote endpoints and slave façades
//! - Sequential (optionally blocking) iteration
//!
//! ## Record Format
//! ```text
//! ┌─────────────────────────────────────────┐
//! │ Segment header (16)                     │
//! ├─────────────────────────────────────────┤
//! │ Entry 1                                 │
//! │ ┌─────────┬─────────┬─────────────────┐ │
//! │ │ Len (4) │ CRC (4) │ Payload         │ │
//! │ └─────────┴─────────┴─────────────────┘ │
//! ├─────────────────────────────────────────┤
//! │ Entry 2  (LSN = segment id | offset)    │
//! └─────────────────────────────────────────┘
//! ```

mod entry;
mod iterator;
mod lsn;

use std::time::Duration;

use crate::error::Result;

pub use entry::LogEntry;
pub use iterator::{Entries, WalIterator};
pub use lsn::Lsn;

/// Segment header size: Magic (4) + Version (2) + Reserved (2) + Segment id (8)
pub const SEGMENT_HEADER_SIZE: u64 = 16;

/// Record header size: Len (4) + CRC (4)
pub const RECORD_HEADER_SIZE: u64 = 8;

/// A readable (and possibly appendable) log
///
/// Implemented by the local segment store, the TCP client for a remote
/// store and the read-only slave façade, so replication can be written
/// against one abstraction regardless of where the source lives.
pub trait Wal: Send + Sync {
    /// Append a payload, returning the stored entry
    fn append(&self, payload: &[u8]) -> Result<LogEntry>;

    /// Append UTF-8 text
    fn append_str(&self, text: &str) -> Result<LogEntry> {
        self.append(text.as_bytes())
    }

    /// First entry of the log, if any
    fn first(&self) -> Result<Option<LogEntry>>;

    /// First entry of the log, waiting up to `timeout` for one to appear
    ///
    /// Fails with `WalError::Timeout` if the log stays empty.
    fn first_wait(&self, timeout: Duration) -> Result<LogEntry>;

    /// Last entry of the log, if any
    fn last(&self) -> Result<Option<LogEntry>>;

    /// Entry stored at exactly `lsn`, if written
    fn get(&self, lsn: Lsn) -> Result<Option<LogEntry>>;

    /// Entry following `entry`, if written
    fn next(&self, entry: &LogEntry) -> Result<Option<LogEntry>>;

    /// Entry following `entry`, waiting up to `timeout` for it
    ///
    /// Fails with `WalError::Timeout` if nothing is appended in time.
    fn next_wait(&self, entry: &LogEntry, timeout: Duration) -> Result<LogEntry>;

    /// Open an iterator at `start` (or the first entry)
    ///
    /// With a timeout the iterator tails the log, reporting
    /// `WalError::Timeout` when no entry arrives; without one it scans what
    /// is written and then ends.
    fn iterator(&self, start: Option<Lsn>, timeout: Option<Duration>) -> Result<WalIterator>;

    /// Make appended entries durable
    fn sync(&self) -> Result<()>;

    /// Whether the log is usable
    fn is_open(&self) -> bool;

    /// Close the log; idempotent
    fn close(&self);
}

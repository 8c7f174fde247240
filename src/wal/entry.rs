//! Log entry definitions
//!
//! Defines the immutable record handed out by every log reader.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::Lsn;

/// A single entry of the log
///
/// The payload is a shared, immutable buffer: cloning an entry never copies
/// the bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Position of the entry - strictly increasing along the log
    pub lsn: Lsn,

    /// The bytes that were appended
    pub payload: Bytes,

    /// Last LSN of the source log when this entry was handed out, if known
    pub tail_hint: Option<Lsn>,
}

impl LogEntry {
    /// Create an entry without a tail hint
    pub fn new(lsn: Lsn, payload: impl Into<Bytes>) -> Self {
        Self {
            lsn,
            payload: payload.into(),
            tail_hint: None,
        }
    }

    /// Attach the source tail at emission time
    pub fn with_tail_hint(mut self, tail: Option<Lsn>) -> Self {
        self.tail_hint = tail;
        self
    }

    /// Position directly after this entry's record in the same segment
    pub fn next_lsn(&self) -> Lsn {
        // Records never cross the 32-bit offset space; the store rejects them.
        self.lsn
            .after_record(self.payload.len())
            .unwrap_or_else(|| self.lsn.next_segment())
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    /// Payload as UTF-8 text, if it is valid
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.payload).ok()
    }
}

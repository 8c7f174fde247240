//! Log Sequence Numbers
//!
//! An LSN is the position of a record in the log: the high 32 bits hold the
//! segment id, the low 32 bits the byte offset of the record inside that
//! segment file. LSNs therefore order totally and grow strictly along the log.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::{RECORD_HEADER_SIZE, SEGMENT_HEADER_SIZE};
use crate::error::WalError;

/// Position of a record in the log
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Lsn(u64);

impl Lsn {
    /// Build an LSN from a segment id and a byte offset
    pub const fn new(segment: u32, offset: u32) -> Self {
        Self(((segment as u64) << 32) | offset as u64)
    }

    /// LSN of the first record in a segment
    pub const fn segment_start(segment: u32) -> Self {
        Self::new(segment, SEGMENT_HEADER_SIZE as u32)
    }

    /// Reinterpret a raw value (as stored on the wire)
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw 64-bit value
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Segment id part
    pub const fn segment(self) -> u32 {
        (self.0 >> 32) as u32
    }

    /// Byte offset part
    pub const fn offset(self) -> u32 {
        self.0 as u32
    }

    /// Whether this LSN can address a record (offset past the segment header)
    pub const fn is_valid(self) -> bool {
        self.offset() as u64 >= SEGMENT_HEADER_SIZE
    }

    /// Whether this LSN addresses the first record of its segment
    pub const fn is_segment_start(self) -> bool {
        self.offset() as u64 == SEGMENT_HEADER_SIZE
    }

    /// First record position of the following segment
    pub const fn next_segment(self) -> Self {
        Self::segment_start(self.segment().wrapping_add(1))
    }

    /// Position right after a record of `payload_len` bytes stored here
    ///
    /// Returns None when the record would run past the 32-bit offset space.
    pub fn after_record(self, payload_len: usize) -> Option<Self> {
        let end = self.offset() as u64 + RECORD_HEADER_SIZE + payload_len as u64;
        let end = u32::try_from(end).ok()?;
        Some(Self::new(self.segment(), end))
    }
}

impl fmt::Display for Lsn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.segment(), self.offset())
    }
}

impl FromStr for Lsn {
    type Err = WalError;

    /// Accepts either `segment/offset` or a raw 64-bit number
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || WalError::InvalidArgument(format!("invalid lsn: {}", s));
        match s.split_once('/') {
            Some((segment, offset)) => {
                let segment = segment.trim().parse::<u32>().map_err(|_| bad())?;
                let offset = offset.trim().parse::<u32>().map_err(|_| bad())?;
                Ok(Lsn::new(segment, offset))
            }
            None => s.trim().parse::<u64>().map(Lsn::from_raw).map_err(|_| bad()),
        }
    }
}

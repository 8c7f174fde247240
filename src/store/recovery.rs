//! Segment Recovery
//!
//! Handles crash recovery of the active segment on open.

use crate::error::{Result, WalError};
use crate::wal::{LogEntry, SEGMENT_HEADER_SIZE};

use super::segment::{Segment, SegmentRead};

/// Result of a recovery operation
#[derive(Debug, Default)]
pub struct RecoveryResult {
    /// Number of entries successfully recovered
    pub entries_recovered: u64,

    /// Last valid entry
    pub last: Option<LogEntry>,

    /// Whether the segment was truncated (torn or corrupt tail removed)
    pub was_truncated: bool,
}

/// Recover entries from a segment
///
/// This will:
/// 1. Read all valid records in order
/// 2. Stop at the first torn or corrupted record
/// 3. Truncate the file there when `truncate` is set
/// 4. Hand every valid entry to `on_entry`
pub(crate) fn recover_segment<F>(segment: &Segment, truncate: bool, mut on_entry: F) -> Result<RecoveryResult>
where
    F: FnMut(&LogEntry),
{
    let mut result = RecoveryResult::default();
    let mut offset = SEGMENT_HEADER_SIZE;

    loop {
        let offset32 = match u32::try_from(offset) {
            Ok(offset) => offset,
            Err(_) => break,
        };

        match segment.read_at(offset32) {
            Ok(SegmentRead::Entry(entry)) => {
                offset = entry.next_lsn().offset() as u64;
                result.entries_recovered += 1;
                on_entry(&entry);
                result.last = Some(entry);
            }
            Ok(SegmentRead::Unwritten) => break,
            Err(WalError::WalCorruption(reason)) => {
                tracing::warn!(
                    "Segment {} damaged at offset {}: {}",
                    segment.path().display(),
                    offset,
                    reason
                );
                if truncate {
                    segment.truncate(offset)?;
                    result.was_truncated = true;
                }
                break;
            }
            Err(e) => return Err(e),
        }
    }

    Ok(result)
}

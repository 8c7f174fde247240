//! Request definitions
//!
//! Represents the calls a remote reader can make on a served log.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::wal::Lsn;

/// A request from a client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Request {
    /// Health check
    Ping,

    /// Append a payload to the served log
    Append { payload: Bytes },

    /// First entry, waiting up to `wait_ms` when given
    First { wait_ms: Option<u64> },

    /// Last entry
    Last,

    /// Entry stored at `lsn`
    Get { lsn: Lsn },

    /// Entry at or after `from`, the position following a previous entry,
    /// waiting up to `wait_ms` when given
    Next { from: Lsn, wait_ms: Option<u64> },

    /// Force the served log to disk
    Sync,
}

impl Request {
    /// Short name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            Request::Ping => "PING",
            Request::Append { .. } => "APPEND",
            Request::First { .. } => "FIRST",
            Request::Last => "LAST",
            Request::Get { .. } => "GET",
            Request::Next { .. } => "NEXT",
            Request::Sync => "SYNC",
        }
    }

    /// Longest time the server may block on this request
    pub fn wait_ms(&self) -> Option<u64> {
        match self {
            Request::First { wait_ms } | Request::Next { wait_ms, .. } => *wait_ms,
            _ => None,
        }
    }
}

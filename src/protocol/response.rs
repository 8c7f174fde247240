//! Response definitions
//!
//! Represents responses to clients, and the mapping between error responses
//! and [`WalError`].

use serde::{Deserialize, Serialize};

use crate::error::WalError;
use crate::wal::{LogEntry, Lsn};

/// Error classes carried over the wire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Nothing arrived within the requested wait
    Timeout,

    /// Write on a read-only log
    ReadOnly,

    /// The served log is closed
    NotOpen,

    /// The requested LSN can never hold an entry
    InvalidLsn(Lsn),

    /// Any other failure of the served log
    Application,
}

/// A response to send to client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    /// Answer to `Ping`
    Pong,

    /// An entry, or none when there is nothing at the requested position
    Entry(Option<LogEntry>),

    /// Request completed with no data to return
    Done,

    /// Request failed
    Error { kind: ErrorKind, message: String },
}

impl Response {
    /// Create an ERROR response describing `error`
    pub fn error(error: &WalError) -> Self {
        let kind = match error {
            WalError::Timeout => ErrorKind::Timeout,
            WalError::ReadOnly => ErrorKind::ReadOnly,
            WalError::NotOpen(_) => ErrorKind::NotOpen,
            WalError::InvalidLsn(lsn) => ErrorKind::InvalidLsn(*lsn),
            _ => ErrorKind::Application,
        };
        Response::Error {
            kind,
            message: error.to_string(),
        }
    }

    /// Convert an ERROR response back into the error it describes
    ///
    /// Failures of the remote log are never retryable: only the transport
    /// decides that.
    pub fn into_error(kind: ErrorKind, message: String) -> WalError {
        match kind {
            ErrorKind::Timeout => WalError::Timeout,
            ErrorKind::ReadOnly => WalError::ReadOnly,
            ErrorKind::NotOpen => WalError::NotOpen(message),
            ErrorKind::InvalidLsn(lsn) => WalError::InvalidLsn(lsn),
            ErrorKind::Application => WalError::Remote(message),
        }
    }
}

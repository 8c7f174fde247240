//! Error types for AtlasWAL
//!
//! Provides a unified error type for all operations.
//!
//! Errors crossing the remote boundary are classified once, where the call
//! is made: transport failures become [`WalError::Network`] (retryable),
//! errors reported by the remote log keep their own kind.

use thiserror::Error;

use crate::wal::Lsn;

/// Result type alias using WalError
pub type Result<T> = std::result::Result<T, WalError>;

/// Unified error type for AtlasWAL operations
#[derive(Debug, Error)]
pub enum WalError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Log Errors
    // -------------------------------------------------------------------------
    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    #[error("Invalid lsn: {0}")]
    InvalidLsn(Lsn),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Slave is read only")]
    ReadOnly,

    #[error("Not open: {0}")]
    NotOpen(String),

    // -------------------------------------------------------------------------
    // Iteration Errors
    // -------------------------------------------------------------------------
    #[error("Wait timeout")]
    Timeout,

    #[error("Illegal state: {0}")]
    IllegalState(String),

    #[error("No such element")]
    NoSuchElement,

    // -------------------------------------------------------------------------
    // Network / Replication Errors
    // -------------------------------------------------------------------------
    #[error("Network error: {0}")]
    Network(String),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Interrupted: {0}")]
    Interrupted(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl WalError {
    /// Check if this error is a transient transport failure
    ///
    /// Retryable errors drive the replica into reconnect instead of
    /// terminating its worker.
    pub fn is_retryable(&self) -> bool {
        matches!(self, WalError::Network(_))
    }

    /// Check if this error is a wait timeout (no data yet, not a failure)
    pub fn is_timeout(&self) -> bool {
        matches!(self, WalError::Timeout)
    }
}

impl From<bincode::Error> for WalError {
    fn from(e: bincode::Error) -> Self {
        WalError::Serialization(e.to_string())
    }
}

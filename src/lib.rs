//! # AtlasWAL
//!
//! A segmented write-ahead log with master→slave replication:
//! - Append-only segment files with CRC-checked records
//! - Crash recovery with torn tail truncation
//! - Blocking tail iterators over local and remote logs
//! - TCP log server and client
//! - Slaves that mirror a master log verbatim and survive disconnects
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────┐            ┌──────────────────────────┐
//! │        Master node       │            │        Slave node        │
//! │                          │    TCP     │                          │
//! │  LogStore ◄── Server ◄───┼────────────┼── RemoteLog              │
//! │  (segments)              │            │      ▲                   │
//! └──────────────────────────┘            │      │ tailing iterator  │
//!                                         │  replicator thread       │
//!                                         │      │ append_entry      │
//!                                         │      ▼                   │
//!                                         │  LogStore ◄── SlaveLog   │
//!                                         │  (local copy) (read-only)│
//!                                         └──────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod config;
pub mod error;

pub mod network;
pub mod protocol;
pub mod replication;
pub mod store;
pub mod wal;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use config::{Config, WalSyncStrategy};
pub use error::{Result, WalError};
pub use network::{RemoteLog, Server};
pub use replication::{Connector, ReplicationState, ReplicationStatus, SlaveLog, TcpConnector};
pub use store::LogStore;
pub use wal::{LogEntry, Lsn, Wal, WalIterator};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of AtlasWAL
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

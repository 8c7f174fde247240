//! Master resolution
//!
//! A [`Connector`] turns a master address into a live log endpoint. The
//! replication worker calls it again after every connection loss.

use std::sync::Arc;

use crate::config::Config;
use crate::error::Result;
use crate::network::RemoteLog;
use crate::wal::Wal;

/// Resolves a master address to a live endpoint
///
/// Transport failures must be reported as retryable
/// ([`WalError::Network`](crate::WalError::Network)); any other error stops
/// replication.
pub trait Connector: Send + Sync {
    fn connect(&self, address: &str) -> Result<Arc<dyn Wal>>;
}

/// Connects to masters served by [`Server`](crate::network::Server)
pub struct TcpConnector {
    config: Config,
}

impl TcpConnector {
    /// Use the timeouts of `config` for every connection
    pub fn new(config: Config) -> Self {
        Self { config }
    }
}

impl Connector for TcpConnector {
    fn connect(&self, address: &str) -> Result<Arc<dyn Wal>> {
        Ok(Arc::new(RemoteLog::connect(address, &self.config)?))
    }
}

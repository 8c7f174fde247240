//! TCP Server
//!
//! Accepts connections and serves each one on its own thread.

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::config::Config;
use crate::error::Result;
use crate::store::LogStore;

use super::Connection;

/// Poll interval of the non-blocking accept loop
const ACCEPT_POLL: Duration = Duration::from_millis(20);

/// TCP server exposing a [`LogStore`] to remote readers
///
/// A master serves its log read-write; a slave may serve its local copy
/// read-only.
pub struct Server {
    config: Config,
    store: LogStore,
    read_only: bool,
    listener: TcpListener,
    shutdown: Arc<AtomicBool>,
    active: Arc<AtomicUsize>,
}

impl Server {
    /// Bind `config.listen_addr`
    pub fn bind(config: Config, store: LogStore, read_only: bool) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)?;
        listener.set_nonblocking(true)?;

        tracing::info!(
            "Log server bound to {} (read_only={})",
            listener.local_addr()?,
            read_only
        );

        Ok(Self {
            config,
            store,
            read_only,
            listener,
            shutdown: Arc::new(AtomicBool::new(false)),
            active: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// Address actually bound (resolves port 0)
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Number of connections being served
    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Accept connections until [`Server::shutdown`] is called (blocking)
    pub fn run(&self) -> Result<()> {
        while !self.shutdown.load(Ordering::Acquire) {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    if self.active.load(Ordering::Acquire) >= self.config.max_connections {
                        tracing::warn!(
                            "Rejecting connection from {}: {} connections open",
                            addr,
                            self.config.max_connections
                        );
                        continue;
                    }
                    if let Err(e) = self.spawn_connection(stream, addr) {
                        tracing::warn!("Failed to serve connection from {}: {}", addr, e);
                    }
                }
                Err(ref e) if e.kind() == ErrorKind::WouldBlock => {
                    thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    tracing::warn!("Accept error: {}", e);
                }
            }
        }

        tracing::info!("Log server stopped");
        Ok(())
    }

    /// Signal the server to shutdown gracefully
    ///
    /// `run()` returns within one poll interval; open connections close once
    /// their current request completes or their read times out.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
    }

    fn spawn_connection(&self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        // Accepted sockets may inherit the listener's non-blocking mode
        stream.set_nonblocking(false)?;
        let mut connection = Connection::new(
            stream,
            self.store.clone(),
            self.read_only,
            Arc::clone(&self.shutdown),
        )?;
        connection.set_timeouts(self.config.read_timeout_ms, self.config.write_timeout_ms)?;

        let active = Arc::clone(&self.active);
        active.fetch_add(1, Ordering::AcqRel);

        let spawned = thread::Builder::new()
            .name(format!("conn-{}", addr))
            .spawn(move || {
                if let Err(e) = connection.handle() {
                    tracing::debug!("Connection {} ended: {}", connection.peer_addr(), e);
                }
                active.fetch_sub(1, Ordering::AcqRel);
            });

        if let Err(e) = spawned {
            self.active.fetch_sub(1, Ordering::AcqRel);
            return Err(e.into());
        }
        Ok(())
    }
}

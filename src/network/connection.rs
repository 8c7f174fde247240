//! Connection Handler
//!
//! Handles individual client connections.

use std::io::{BufRead, BufReader, BufWriter, ErrorKind};
use std::net::TcpStream;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, WalError};
use crate::protocol::{read_request, write_response, Request, Response};
use crate::store::LogStore;
use crate::wal::{LogEntry, Wal};

/// Handles a single client connection
pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    /// The served log
    store: LogStore,

    /// Reject appends
    read_only: bool,

    /// Set when the owning server shuts down
    shutdown: Arc<AtomicBool>,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Create a new connection handler
    ///
    /// Sets up buffered I/O
    pub fn new(stream: TcpStream, store: LogStore, read_only: bool, shutdown: Arc<AtomicBool>) -> Result<Self> {
        // Get peer address for logging before we split the stream
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        // Clone stream for separate read/write handles
        let read_stream = stream.try_clone()?;
        let write_stream = stream;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(write_stream),
            store,
            read_only,
            shutdown,
            peer_addr,
        })
    }

    /// Configure connection timeouts
    ///
    /// The read timeout also bounds how long an idle connection takes to
    /// notice a server shutdown.
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        let read_stream = self.reader.get_ref();
        let write_stream = self.writer.get_ref();

        if read_ms > 0 {
            read_stream.set_read_timeout(Some(Duration::from_millis(read_ms)))?;
        }
        if write_ms > 0 {
            write_stream.set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }

        Ok(())
    }

    /// Handle the connection (blocking until closed)
    ///
    /// Reads requests in a loop and sends responses.
    /// Returns when the client disconnects, the server shuts down or an
    /// error occurs.
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!("Connection established from {}", self.peer_addr);

        loop {
            if self.shutdown.load(Ordering::Acquire) {
                tracing::debug!("Closing connection from {}: server shutting down", self.peer_addr);
                return Ok(());
            }

            // Wait for the first byte of the next frame; a timeout here is idle
            match self.reader.fill_buf() {
                Ok(buf) if buf.is_empty() => {
                    tracing::debug!("Client {} disconnected", self.peer_addr);
                    return Ok(());
                }
                Ok(_) => {}
                Err(ref e) if is_idle(e.kind()) => continue,
                Err(ref e) if is_disconnect(e.kind()) => {
                    tracing::debug!("Client {} disconnected", self.peer_addr);
                    return Ok(());
                }
                Err(e) => return Err(e.into()),
            }

            // Read next request
            let request = match read_request(&mut self.reader) {
                Ok(request) => request,
                Err(WalError::Io(ref e)) if is_disconnect(e.kind()) => {
                    tracing::debug!("Client {} disconnected mid-frame", self.peer_addr);
                    return Ok(());
                }
                Err(WalError::Io(e)) if is_idle(e.kind()) => {
                    // Part of the frame is consumed: the stream can't be resynced
                    tracing::warn!("Timed out reading a frame from {}", self.peer_addr);
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::warn!("Error reading from {}: {}", self.peer_addr, e);
                    // Send error response if possible
                    let _ = write_response(&mut self.writer, &Response::error(&e));
                    return Err(e);
                }
            };

            tracing::trace!("Received {} from {}", request.name(), self.peer_addr);

            let response = match self.execute(request) {
                Some(response) => response,
                None => {
                    tracing::debug!("Closing connection from {}: log closed", self.peer_addr);
                    return Ok(());
                }
            };

            if let Err(e) = write_response(&mut self.writer, &response) {
                // If the client disconnected before we could send the response
                // log and exit gracefully rather than treating it as a server error.
                if let WalError::Io(ref io_err) = e {
                    if is_disconnect(io_err.kind()) {
                        tracing::debug!(
                            "Client {} disconnected before response could be sent: {}",
                            self.peer_addr,
                            e
                        );
                        return Ok(());
                    }
                }
                tracing::warn!("Error writing to {}: {}", self.peer_addr, e);
                return Err(e);
            }
        }
    }

    /// Execute a request against the served log
    ///
    /// Returns `None` when the served log is closed or the server is
    /// stopping: the client sees the connection drop, as it would for a
    /// dead server, and reconnects later.
    fn execute(&self, request: Request) -> Option<Response> {
        let is_sync = matches!(request, Request::Sync);
        let result = match request {
            Request::Ping => return Some(Response::Pong),
            Request::Append { .. } if self.read_only => Err(WalError::ReadOnly),
            Request::Append { payload } => self.store.append(&payload).map(Some),
            Request::First { wait_ms: Some(ms) } => self.store.first_wait(Duration::from_millis(ms)).map(Some),
            Request::First { wait_ms: None } => self.store.first(),
            Request::Last => self.store.last(),
            Request::Get { lsn } => self.store.get(lsn),
            Request::Next { from, wait_ms: Some(ms) } => {
                self.store.read_from_wait(from, Duration::from_millis(ms)).map(Some)
            }
            Request::Next { from, wait_ms: None } => self.store.read_from(from),
            Request::Sync => self.store.sync().map(|()| None),
        };

        let result = result.and_then(|entry| self.with_tail(entry));
        if matches!(result, Err(WalError::NotOpen(_))) || self.shutdown.load(Ordering::Acquire) {
            return None;
        }

        Some(match result {
            Ok(_) if is_sync => Response::Done,
            Ok(entry) => Response::Entry(entry),
            Err(e) => {
                if !e.is_timeout() {
                    tracing::debug!("Request from {} failed: {}", self.peer_addr, e);
                }
                Response::error(&e)
            }
        })
    }

    /// Stamp an outgoing entry with the current tail of the log
    fn with_tail(&self, entry: Option<LogEntry>) -> Result<Option<LogEntry>> {
        match entry {
            Some(entry) => {
                let tail = self.store.last()?.map(|last| last.lsn);
                Ok(Some(entry.with_tail_hint(tail)))
            }
            None => Ok(None),
        }
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

fn is_disconnect(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted | ErrorKind::BrokenPipe
    )
}

fn is_idle(kind: ErrorKind) -> bool {
    matches!(kind, ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

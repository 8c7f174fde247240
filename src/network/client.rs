//! Remote log client
//!
//! [`RemoteLog`] speaks the wire protocol to a [`Server`](super::Server)
//! and exposes the served log through the same [`Wal`] contract as a local
//! store.
//!
//! Failures are classified here, once: anything that goes wrong on the
//! socket or in framing becomes [`WalError::Network`] and closes the
//! endpoint; error responses keep the kind the server reported.

use std::io::{BufReader, BufWriter};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;

use crate::config::Config;
use crate::error::{Result, WalError};
use crate::protocol::{read_response, write_request, Request, Response};
use crate::wal::{LogEntry, Lsn, Wal, WalIterator};

/// Client handle on a log served over TCP
///
/// Cheap to clone: clones share one connection, and calls on it are
/// serialized.
#[derive(Clone)]
pub struct RemoteLog {
    inner: Arc<RemoteInner>,
}

struct RemoteInner {
    address: String,
    read_timeout_ms: u64,
    channel: Mutex<Channel>,
    /// Handle used to shut the socket down without taking `channel`
    control: TcpStream,
    open: AtomicBool,
}

struct Channel {
    reader: BufReader<TcpStream>,
    writer: BufWriter<TcpStream>,
}

impl RemoteLog {
    /// Connect to the log server at `address`
    pub fn connect(address: &str, config: &Config) -> Result<Self> {
        let stream = TcpStream::connect(address)
            .map_err(|e| WalError::Network(format!("connect {}: {}", address, e)))?;

        let setup = || -> std::io::Result<(TcpStream, TcpStream, TcpStream)> {
            stream.set_nodelay(true)?;
            if config.write_timeout_ms > 0 {
                stream.set_write_timeout(Some(Duration::from_millis(config.write_timeout_ms)))?;
            }
            Ok((stream.try_clone()?, stream.try_clone()?, stream.try_clone()?))
        };
        let (read_stream, write_stream, control) =
            setup().map_err(|e| WalError::Network(format!("connect {}: {}", address, e)))?;

        tracing::debug!("Connected to log server {}", address);

        Ok(Self {
            inner: Arc::new(RemoteInner {
                address: address.to_string(),
                read_timeout_ms: config.read_timeout_ms,
                channel: Mutex::new(Channel {
                    reader: BufReader::new(read_stream),
                    writer: BufWriter::new(write_stream),
                }),
                control,
                open: AtomicBool::new(true),
            }),
        })
    }

    /// Server address this client is connected to
    pub fn address(&self) -> &str {
        &self.inner.address
    }

    /// Round-trip a health check
    pub fn ping(&self) -> Result<()> {
        match self.call(&Request::Ping)? {
            Response::Pong => Ok(()),
            other => Err(self.unexpected(&Request::Ping, other)),
        }
    }

    /// Send one request and read its response
    fn call(&self, request: &Request) -> Result<Response> {
        if !self.is_open() {
            return Err(WalError::NotOpen(format!("remote log {} closed", self.inner.address)));
        }

        let mut channel = self.inner.channel.lock();
        let result = self.exchange(&mut channel, request);

        match result {
            Ok(Response::Error { kind, message }) => Err(Response::into_error(kind, message)),
            Ok(response) => Ok(response),
            Err(e) => {
                self.close();
                Err(WalError::Network(format!(
                    "{} {}: {}",
                    request.name(),
                    self.inner.address,
                    e
                )))
            }
        }
    }

    fn exchange(&self, channel: &mut Channel, request: &Request) -> Result<Response> {
        // Blocking requests may legitimately take their whole wait
        let wait_ms = request.wait_ms().unwrap_or(0);
        let read_ms = self.inner.read_timeout_ms.saturating_add(wait_ms);
        let read_timeout = if read_ms > 0 {
            Some(Duration::from_millis(read_ms))
        } else {
            None
        };
        channel.reader.get_ref().set_read_timeout(read_timeout)?;

        write_request(&mut channel.writer, request)?;
        read_response(&mut channel.reader)
    }

    /// Entry carried by an ENTRY response
    fn entry(&self, request: Request) -> Result<Option<LogEntry>> {
        match self.call(&request)? {
            Response::Entry(entry) => Ok(entry),
            other => Err(self.unexpected(&request, other)),
        }
    }

    /// Entry of a blocking request; an empty answer means the wait expired
    fn entry_wait(&self, request: Request) -> Result<LogEntry> {
        self.entry(request)?.ok_or(WalError::Timeout)
    }

    /// The stream is out of step with the requests: drop it
    fn unexpected(&self, request: &Request, response: Response) -> WalError {
        self.close();
        WalError::Network(format!(
            "{} {}: unexpected response {:?}",
            request.name(),
            self.inner.address,
            response
        ))
    }
}

fn millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX)
}

impl Wal for RemoteLog {
    fn append(&self, payload: &[u8]) -> Result<LogEntry> {
        let request = Request::Append {
            payload: Bytes::copy_from_slice(payload),
        };
        match self.entry(request.clone())? {
            Some(entry) => Ok(entry),
            None => Err(self.unexpected(&request, Response::Entry(None))),
        }
    }

    fn first(&self) -> Result<Option<LogEntry>> {
        self.entry(Request::First { wait_ms: None })
    }

    fn first_wait(&self, timeout: Duration) -> Result<LogEntry> {
        self.entry_wait(Request::First {
            wait_ms: Some(millis(timeout)),
        })
    }

    fn last(&self) -> Result<Option<LogEntry>> {
        self.entry(Request::Last)
    }

    fn get(&self, lsn: Lsn) -> Result<Option<LogEntry>> {
        self.entry(Request::Get { lsn })
    }

    fn next(&self, entry: &LogEntry) -> Result<Option<LogEntry>> {
        self.entry(Request::Next {
            from: entry.next_lsn(),
            wait_ms: None,
        })
    }

    fn next_wait(&self, entry: &LogEntry, timeout: Duration) -> Result<LogEntry> {
        self.entry_wait(Request::Next {
            from: entry.next_lsn(),
            wait_ms: Some(millis(timeout)),
        })
    }

    fn iterator(&self, start: Option<Lsn>, timeout: Option<Duration>) -> Result<WalIterator> {
        if !self.is_open() {
            return Err(WalError::NotOpen(format!("remote log {} closed", self.inner.address)));
        }
        if let Some(lsn) = start {
            if !lsn.is_valid() {
                return Err(WalError::InvalidLsn(lsn));
            }
        }
        Ok(WalIterator::over_log(Arc::new(self.clone()), start, timeout))
    }

    fn sync(&self) -> Result<()> {
        match self.call(&Request::Sync)? {
            Response::Done => Ok(()),
            other => Err(self.unexpected(&Request::Sync, other)),
        }
    }

    fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        if self.inner.open.swap(false, Ordering::AcqRel) {
            // Unblocks a call waiting on the socket in another thread
            let _ = self.inner.control.shutdown(Shutdown::Both);
            tracing::debug!("Closed connection to {}", self.inner.address);
        }
    }
}

//! Tests for the log server and the remote log client
//!
//! These tests verify:
//! - The remote log honors the same read contract as a local store
//! - Entries carry the master tail as a hint
//! - Blocking requests time out without breaking the connection
//! - Read-only serving
//! - Transport failures surface as retryable network errors
//! - A frame left half-sent past the read timeout drops the connection

use std::io::Write;
use std::net::TcpStream;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use atlaswal::network::Server;
use atlaswal::protocol::{encode_request, read_response, write_request, Request, Response};
use atlaswal::{Config, LogStore, Lsn, RemoteLog, Wal, WalError};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

struct TestServer {
    _temp: TempDir,
    store: LogStore,
    server: Arc<Server>,
    handle: Option<JoinHandle<()>>,
    addr: String,
}

impl TestServer {
    fn start(read_only: bool) -> Self {
        let temp = TempDir::new().unwrap();
        let config = Config::builder()
            .data_dir(temp.path())
            .listen_addr("127.0.0.1:0")
            .read_timeout_ms(200)
            .build();
        let store = LogStore::open(config.clone()).unwrap();
        let server = Arc::new(Server::bind(config, store.clone(), read_only).unwrap());
        let addr = server.local_addr().unwrap().to_string();

        let runner = Arc::clone(&server);
        let handle = thread::spawn(move || runner.run().unwrap());

        Self {
            _temp: temp,
            store,
            server,
            handle: Some(handle),
            addr,
        }
    }

    fn client(&self) -> RemoteLog {
        let config = Config::builder().read_timeout_ms(2000).build();
        RemoteLog::connect(&self.addr, &config).unwrap()
    }

    fn stop(&mut self) {
        self.server.shutdown();
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap();
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.stop();
    }
}

// =============================================================================
// Read Contract Tests
// =============================================================================

#[test]
fn test_ping() {
    let server = TestServer::start(false);
    let client = server.client();
    client.ping().unwrap();
}

#[test]
fn test_remote_append_and_reads() {
    let server = TestServer::start(false);
    let client = server.client();

    let a = client.append_str("a").unwrap();
    let b = client.append_str("b").unwrap();

    assert_eq!(server.store.last().unwrap().unwrap().lsn, b.lsn);
    assert_eq!(client.first().unwrap().unwrap().payload, a.payload);
    assert_eq!(client.get(b.lsn).unwrap().unwrap().as_str(), Some("b"));
    assert_eq!(client.next(&a).unwrap().unwrap().lsn, b.lsn);
    assert_eq!(client.next(&b).unwrap(), None);
    assert_eq!(client.get(Lsn::new(0, 5000)).unwrap(), None);
}

#[test]
fn test_entries_carry_tail_hint() {
    let server = TestServer::start(false);
    let a = server.store.append_str("a").unwrap();
    let b = server.store.append_str("b").unwrap();

    let client = server.client();
    let first = client.get(a.lsn).unwrap().unwrap();
    assert_eq!(first.tail_hint, Some(b.lsn));
    assert_eq!(client.last().unwrap().unwrap().tail_hint, Some(b.lsn));
}

#[test]
fn test_remote_invalid_lsn() {
    let server = TestServer::start(false);
    let client = server.client();

    assert!(matches!(client.get(Lsn::new(0, 1)), Err(WalError::InvalidLsn(_))));
    // Application errors leave the connection usable
    assert!(client.is_open());
    client.ping().unwrap();
}

#[test]
fn test_remote_sync() {
    let server = TestServer::start(false);
    let client = server.client();
    client.append_str("x").unwrap();
    client.sync().unwrap();
}

// =============================================================================
// Blocking Tests
// =============================================================================

#[test]
fn test_remote_first_wait_timeout() {
    let server = TestServer::start(false);
    let client = server.client();

    let start = Instant::now();
    let result = client.first_wait(Duration::from_millis(100));
    assert!(matches!(result, Err(WalError::Timeout)));
    assert!(start.elapsed() >= Duration::from_millis(80));

    // Timeouts leave the connection usable
    assert!(client.is_open());
    client.ping().unwrap();
}

#[test]
fn test_remote_tail_iterator() {
    let server = TestServer::start(false);
    let client = server.client();
    server.store.append_str("one").unwrap();

    let store = server.store.clone();
    let writer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        store.append_str("two").unwrap();
    });

    let mut it = client.iterator(None, Some(Duration::from_secs(2))).unwrap();
    assert!(it.has_next().unwrap());
    assert_eq!(it.next().unwrap().as_str(), Some("one"));
    assert!(it.has_next().unwrap());
    assert_eq!(it.next().unwrap().as_str(), Some("two"));

    writer.join().unwrap();
}

#[test]
fn test_remote_scan_iterator() {
    let server = TestServer::start(false);
    for i in 0..4 {
        server.store.append_str(&format!("e{}", i)).unwrap();
    }

    let client = server.client();
    let payloads: Vec<String> = client
        .iterator(None, None)
        .unwrap()
        .entries()
        .map(|e| e.unwrap().as_str().unwrap().to_string())
        .collect();
    assert_eq!(payloads, vec!["e0", "e1", "e2", "e3"]);
}

// =============================================================================
// Read-Only Tests
// =============================================================================

#[test]
fn test_read_only_server_rejects_append() {
    let server = TestServer::start(true);
    server.store.append_str("local").unwrap();
    let client = server.client();

    assert!(matches!(client.append_str("x"), Err(WalError::ReadOnly)));
    assert_eq!(client.first().unwrap().unwrap().as_str(), Some("local"));
}

// =============================================================================
// Failure Tests
// =============================================================================

#[test]
fn test_connect_refused_is_retryable() {
    let server = TestServer::start(false);
    let addr = server.addr.clone();
    drop(server);

    let result = RemoteLog::connect(&addr, &Config::default());
    match result {
        Err(e) => assert!(e.is_retryable()),
        Ok(_) => panic!("connected to a stopped server"),
    }
}

#[test]
fn test_server_shutdown_is_network_error() {
    let mut server = TestServer::start(false);
    let client = server.client();
    client.ping().unwrap();

    server.stop();
    // The connection thread notices the shutdown within its read timeout
    thread::sleep(Duration::from_millis(400));

    let error = client.last().unwrap_err();
    assert!(error.is_retryable(), "unexpected error: {}", error);
    assert!(!client.is_open());
}

#[test]
fn test_closed_store_is_network_error() {
    let server = TestServer::start(false);
    let client = server.client();

    let store = server.store.clone();
    let closer = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        store.close();
    });

    // A served log going away looks like a dead server, not an application error
    let error = client.first_wait(Duration::from_secs(5)).unwrap_err();
    assert!(error.is_retryable(), "unexpected error: {}", error);
    assert!(!client.is_open());

    closer.join().unwrap();
}

#[test]
fn test_close_unblocks_waiting_call() {
    let server = TestServer::start(false);
    let client = server.client();

    let closer = client.clone();
    let handle = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        closer.close();
    });

    let start = Instant::now();
    let result = client.first_wait(Duration::from_secs(10));
    assert!(result.is_err());
    assert!(start.elapsed() < Duration::from_secs(5));
    assert!(!client.is_open());
    assert!(matches!(client.ping(), Err(WalError::NotOpen(_))));

    handle.join().unwrap();
}

#[test]
fn test_idle_connection_stays_usable() {
    let server = TestServer::start(false);
    let mut stream = TcpStream::connect(&server.addr).unwrap();

    // Several server read timeouts pass between requests
    thread::sleep(Duration::from_millis(500));
    write_request(&mut stream, &Request::Ping).unwrap();
    assert_eq!(read_response(&mut stream).unwrap(), Response::Pong);
}

#[test]
fn test_stalled_frame_closes_connection() {
    let server = TestServer::start(false);
    let mut stream = TcpStream::connect(&server.addr).unwrap();
    stream.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    // Send the first bytes of a frame, then stall past the server read timeout
    let frame = encode_request(&Request::Last).unwrap();
    stream.write_all(&frame[..3]).unwrap();
    thread::sleep(Duration::from_millis(500));
    let _ = stream.write_all(&frame[3..]);

    // The server hangs up instead of parsing the tail as a new frame
    assert!(read_response(&mut stream).is_err());
}

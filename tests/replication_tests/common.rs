//! Shared fixtures for replication tests
//!
//! `FlakyMaster` serves a local store through the `Wal` contract with a
//! switchable "network link"; `TestConnector` hands out new endpoints while
//! the link is up and records every attempt.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use atlaswal::wal::WalIterator;
use atlaswal::{Config, Connector, LogEntry, LogStore, Lsn, Result, Wal, WalError};
use parking_lot::Mutex;
use tempfile::TempDir;

pub const MASTER_ADDRESS: &str = "test://master";

/// Simulated network between slave and master
pub struct Link {
    up: AtomicBool,
}

impl Link {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            up: AtomicBool::new(true),
        })
    }

    pub fn set_up(&self, up: bool) {
        self.up.store(up, Ordering::Release);
    }

    fn is_up(&self) -> bool {
        self.up.load(Ordering::Acquire)
    }
}

/// Endpoint on a master store that fails like a network client when the
/// link is down
#[derive(Clone)]
pub struct FlakyMaster {
    store: LogStore,
    link: Arc<Link>,
    open: Arc<AtomicBool>,
}

impl FlakyMaster {
    pub fn new(store: LogStore, link: Arc<Link>) -> Self {
        Self {
            store,
            link,
            open: Arc::new(AtomicBool::new(true)),
        }
    }

    fn check(&self) -> Result<()> {
        if !self.open.load(Ordering::Acquire) {
            return Err(WalError::NotOpen("endpoint closed".to_string()));
        }
        if !self.link.is_up() {
            self.open.store(false, Ordering::Release);
            return Err(WalError::Network("link down".to_string()));
        }
        Ok(())
    }
}

impl Wal for FlakyMaster {
    fn append(&self, payload: &[u8]) -> Result<LogEntry> {
        self.check()?;
        self.store.append(payload)
    }

    fn first(&self) -> Result<Option<LogEntry>> {
        self.check()?;
        self.store.first()
    }

    fn first_wait(&self, timeout: Duration) -> Result<LogEntry> {
        self.check()?;
        self.store.first_wait(timeout)
    }

    fn last(&self) -> Result<Option<LogEntry>> {
        self.check()?;
        self.store.last()
    }

    fn get(&self, lsn: Lsn) -> Result<Option<LogEntry>> {
        self.check()?;
        self.store.get(lsn)
    }

    fn next(&self, entry: &LogEntry) -> Result<Option<LogEntry>> {
        self.check()?;
        self.store.next(entry)
    }

    fn next_wait(&self, entry: &LogEntry, timeout: Duration) -> Result<LogEntry> {
        self.check()?;
        self.store.next_wait(entry, timeout)
    }

    fn iterator(&self, start: Option<Lsn>, timeout: Option<Duration>) -> Result<WalIterator> {
        self.check()?;
        Ok(WalIterator::over_log(Arc::new(self.clone()), start, timeout))
    }

    fn sync(&self) -> Result<()> {
        self.check()?;
        self.store.sync()
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

/// Endpoint that answers every point lookup with the first entry of the
/// log, whatever LSN was asked for
#[derive(Clone)]
pub struct MisplacedMaster {
    store: LogStore,
}

impl MisplacedMaster {
    pub fn new(store: LogStore) -> Self {
        Self { store }
    }
}

impl Wal for MisplacedMaster {
    fn append(&self, payload: &[u8]) -> Result<LogEntry> {
        self.store.append(payload)
    }

    fn first(&self) -> Result<Option<LogEntry>> {
        self.store.first()
    }

    fn first_wait(&self, timeout: Duration) -> Result<LogEntry> {
        self.store.first_wait(timeout)
    }

    fn last(&self) -> Result<Option<LogEntry>> {
        self.store.last()
    }

    fn get(&self, _lsn: Lsn) -> Result<Option<LogEntry>> {
        self.store.first()
    }

    fn next(&self, entry: &LogEntry) -> Result<Option<LogEntry>> {
        self.store.next(entry)
    }

    fn next_wait(&self, entry: &LogEntry, timeout: Duration) -> Result<LogEntry> {
        self.store.next_wait(entry, timeout)
    }

    fn iterator(&self, start: Option<Lsn>, timeout: Option<Duration>) -> Result<WalIterator> {
        Ok(WalIterator::over_log(Arc::new(self.clone()), start, timeout))
    }

    fn sync(&self) -> Result<()> {
        self.store.sync()
    }

    fn is_open(&self) -> bool {
        self.store.is_open()
    }

    fn close(&self) {}
}

/// Connector producing `FlakyMaster` endpoints
pub struct TestConnector {
    store: LogStore,
    link: Arc<Link>,
    attempts: Mutex<Vec<Instant>>,
    fatal: AtomicBool,
}

impl TestConnector {
    pub fn new(store: LogStore, link: Arc<Link>) -> Arc<Self> {
        Arc::new(Self {
            store,
            link,
            attempts: Mutex::new(Vec::new()),
            fatal: AtomicBool::new(false),
        })
    }

    /// Make every further attempt fail with a non-retryable error
    pub fn fail_fatally(&self) {
        self.fatal.store(true, Ordering::Release);
    }

    pub fn attempts(&self) -> Vec<Instant> {
        self.attempts.lock().clone()
    }

    pub fn attempt_count(&self) -> usize {
        self.attempts.lock().len()
    }
}

impl Connector for TestConnector {
    fn connect(&self, address: &str) -> Result<Arc<dyn Wal>> {
        assert_eq!(address, MASTER_ADDRESS);
        self.attempts.lock().push(Instant::now());

        if self.fatal.load(Ordering::Acquire) {
            return Err(WalError::Remote("no driver for master url".to_string()));
        }
        if !self.link.is_up() {
            return Err(WalError::Network("connection refused".to_string()));
        }
        Ok(Arc::new(FlakyMaster::new(self.store.clone(), Arc::clone(&self.link))))
    }
}

// =============================================================================
// Helper Functions
// =============================================================================

pub fn setup_master() -> (TempDir, LogStore) {
    let temp_dir = TempDir::new().unwrap();
    let store = LogStore::open_path(temp_dir.path()).unwrap();
    (temp_dir, store)
}

pub fn slave_config(temp_dir: &TempDir) -> Config {
    Config::builder()
        .data_dir(temp_dir.path())
        .wait_timeout_ms(50)
        .reconnect_period_ms(20)
        .flush_period_ms(0)
        .build()
}

pub fn append_n(store: &LogStore, prefix: &str, count: usize) -> Vec<LogEntry> {
    (0..count)
        .map(|i| store.append_str(&format!("{}{}", prefix, i)).unwrap())
        .collect()
}

/// Every entry of a log, in order
pub fn read_all(log: &dyn Wal) -> Vec<LogEntry> {
    log.iterator(None, None)
        .unwrap()
        .entries()
        .map(|e| e.unwrap())
        .collect()
}

/// Poll `condition` until it holds or `timeout` passes
pub fn wait_until<F: FnMut() -> bool>(timeout: Duration, mut condition: F) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(5));
    }
}

/// Entries compared by position and content (tail hints differ by source)
pub fn same_entries(a: &[LogEntry], b: &[LogEntry]) -> bool {
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|(x, y)| x.lsn == y.lsn && x.payload == y.payload)
}

//! Replication Module
//!
//! A slave keeps a local [`LogStore`] as an exact, gap-free copy of a master
//! log. [`SlaveLog`] is the read-only handle applications use; a background
//! replicator thread pulls entries from the master and appends them locally,
//! reconnecting through a [`Connector`] when the master goes away.
//!
//! ## State Machine
//! ```text
//! INIT --open()--> WAIT <--> APPENDING
//! WAIT/APPENDING --error--> FAILED --> CONNECTING --connected--> WAIT
//! any --close()--> CLOSED
//! ```

mod connector;
mod worker;

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam::channel::{self, Sender};
use parking_lot::{Condvar, Mutex, RwLock};

use crate::config::{Config, WalSyncStrategy};
use crate::error::{Result, WalError};
use crate::store::LogStore;
use crate::wal::{LogEntry, Lsn, Wal, WalIterator};

pub use connector::{Connector, TcpConnector};

/// Source of replicator thread names
static REPLICATOR_ID: AtomicUsize = AtomicUsize::new(0);

/// Lifecycle of a slave
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ReplicationState {
    /// Created, not opened
    Init = 0x00,

    /// Waiting for the next entry from the master
    Wait = 0x01,

    /// Writing a pulled entry locally
    Appending = 0x02,

    /// Replication failed; either reconnecting or stopped for good
    Failed = 0x04,

    /// Closed
    Closed = 0x08,

    /// Reconnecting to the master
    Connecting = 0x10,
}

impl ReplicationState {
    fn from_u8(value: u8) -> Self {
        match value {
            0x01 => ReplicationState::Wait,
            0x02 => ReplicationState::Appending,
            0x04 => ReplicationState::Failed,
            0x08 => ReplicationState::Closed,
            0x10 => ReplicationState::Connecting,
            _ => ReplicationState::Init,
        }
    }
}

impl fmt::Display for ReplicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ReplicationState::Init => "INIT",
            ReplicationState::Wait => "WAIT",
            ReplicationState::Appending => "APPENDING",
            ReplicationState::Failed => "FAILED",
            ReplicationState::Closed => "CLOSED",
            ReplicationState::Connecting => "CONNECTING",
        };
        f.write_str(name)
    }
}

/// Point-in-time view of a slave
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicationStatus {
    pub state: ReplicationState,
    /// Last entry applied locally
    pub applied: Option<Lsn>,
    /// Latest known tail of the master
    pub tail: Option<Lsn>,
    /// `tail - applied`, or -1 while either is unknown
    pub bytes_behind_master: i64,
    pub master_address: String,
}

/// State shared between a [`SlaveLog`] and its replicator thread
///
/// `state`, `applied` and `tail` are written by the replicator only,
/// except INIT → WAIT on open and INIT → CLOSED when an unopened slave is
/// closed. The replicator leaves the state at CLOSED or FAILED when it
/// exits. LSN 0 is never valid and encodes "none".
pub(crate) struct Shared {
    config: Config,
    address: String,
    connector: Arc<dyn Connector>,
    master: RwLock<Arc<dyn Wal>>,
    local: RwLock<Option<LogStore>>,
    state: AtomicU8,
    applied: AtomicU64,
    tail: AtomicU64,
    /// Signalled whenever `applied` advances
    progress: Mutex<()>,
    progressed: Condvar,
}

impl Shared {
    pub(crate) fn state(&self) -> ReplicationState {
        ReplicationState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: ReplicationState) {
        self.state.store(state as u8, Ordering::Release);
    }

    pub(crate) fn master(&self) -> Arc<dyn Wal> {
        Arc::clone(&self.master.read())
    }

    pub(crate) fn replace_master(&self, master: Arc<dyn Wal>) {
        *self.master.write() = master;
    }

    pub(crate) fn set_applied(&self, lsn: Lsn) {
        self.applied.store(lsn.as_u64(), Ordering::Release);
        let _guard = self.progress.lock();
        self.progressed.notify_all();
    }

    pub(crate) fn set_tail(&self, tail: Option<Lsn>) {
        self.tail.store(tail.map_or(0, Lsn::as_u64), Ordering::Release);
    }

    fn applied(&self) -> Option<Lsn> {
        lsn_or_none(self.applied.load(Ordering::Acquire))
    }

    fn tail(&self) -> Option<Lsn> {
        lsn_or_none(self.tail.load(Ordering::Acquire))
    }

    pub(crate) fn bytes_behind_master(&self) -> i64 {
        match (self.applied(), self.tail()) {
            (Some(applied), Some(tail)) => {
                let behind = tail.as_u64().saturating_sub(applied.as_u64());
                i64::try_from(behind).unwrap_or(i64::MAX)
            }
            _ => -1,
        }
    }
}

fn lsn_or_none(raw: u64) -> Option<Lsn> {
    if raw == 0 {
        None
    } else {
        Some(Lsn::from_raw(raw))
    }
}

/// Read-only replica of a master log
///
/// Reads are served from the local store. Writes fail with
/// [`WalError::ReadOnly`].
pub struct SlaveLog {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    cancel: Mutex<Option<Sender<()>>>,
}

impl SlaveLog {
    /// Create a slave of the master at `address`
    ///
    /// `master` is the initial endpoint; after a connection loss a new one
    /// is obtained from `connector`. Nothing is opened until [`SlaveLog::open`].
    pub fn new(
        config: Config,
        master: Arc<dyn Wal>,
        address: impl Into<String>,
        connector: Arc<dyn Connector>,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                config,
                address: address.into(),
                connector,
                master: RwLock::new(master),
                local: RwLock::new(None),
                state: AtomicU8::new(ReplicationState::Init as u8),
                applied: AtomicU64::new(0),
                tail: AtomicU64::new(0),
                progress: Mutex::new(()),
                progressed: Condvar::new(),
            }),
            worker: Mutex::new(None),
            cancel: Mutex::new(None),
        }
    }

    /// Create a slave of a master served over TCP
    pub fn connect(config: Config, address: &str) -> Result<Self> {
        let connector = Arc::new(TcpConnector::new(config.clone()));
        let master = connector.connect(address)?;
        Ok(Self::new(config, master, address, connector))
    }

    /// Open the local store and start replicating
    ///
    /// The local store syncs only when the replicator flushes.
    pub fn open(&self) -> Result<()> {
        let mut slot = self.shared.local.write();
        if slot.is_some() {
            return Err(WalError::IllegalState("slave log already opened".to_string()));
        }
        if self.shared.state() == ReplicationState::Closed {
            return Err(WalError::IllegalState("slave log closed".to_string()));
        }

        let mut config = self.shared.config.clone();
        config.wal_sync_strategy = WalSyncStrategy::Manual;
        let local = LogStore::open(config)?;

        let last = local.last()?;
        tracing::debug!("Slave last entry: {:?}", last.as_ref().map(|e| e.lsn));
        if let Some(entry) = &last {
            self.shared.set_applied(entry.lsn);
        }
        *slot = Some(local.clone());
        self.shared.set_state(ReplicationState::Wait);
        drop(slot);

        let (cancel_tx, cancel_rx) = channel::bounded(0);
        let shared = Arc::clone(&self.shared);
        let worker_local = local.clone();
        let spawned = thread::Builder::new()
            .name(format!("replicator-{}", REPLICATOR_ID.fetch_add(1, Ordering::Relaxed)))
            .spawn(move || worker::run(shared, worker_local, last, cancel_rx));

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                *self.cancel.lock() = Some(cancel_tx);
                tracing::info!("Replicating {} into {}", self.shared.address, local.data_dir().display());
                Ok(())
            }
            Err(e) => {
                local.close();
                self.shared.set_state(ReplicationState::Failed);
                Err(e.into())
            }
        }
    }

    /// Current replication state
    pub fn state(&self) -> ReplicationState {
        self.shared.state()
    }

    /// Distance between the master tail and the last applied entry
    ///
    /// -1 until both are known.
    pub fn bytes_behind_master(&self) -> i64 {
        self.shared.bytes_behind_master()
    }

    /// Snapshot of the replication progress
    pub fn status(&self) -> ReplicationStatus {
        ReplicationStatus {
            state: self.shared.state(),
            applied: self.shared.applied(),
            tail: self.shared.tail(),
            bytes_behind_master: self.shared.bytes_behind_master(),
            master_address: self.shared.address.clone(),
        }
    }

    /// Current master endpoint
    pub fn master(&self) -> Arc<dyn Wal> {
        self.shared.master()
    }

    /// Address of the master
    pub fn master_address(&self) -> &str {
        &self.shared.address
    }

    /// The local store, once opened
    pub fn local(&self) -> Option<LogStore> {
        self.shared.local.read().clone()
    }

    /// Block until the local copy reaches `lsn` or the timeout expires
    ///
    /// Returns whether `lsn` was reached.
    pub fn wait_applied(&self, lsn: Lsn, timeout: Duration) -> bool {
        let reached = || self.shared.applied().map_or(false, |applied| applied >= lsn);
        let deadline = Instant::now() + timeout;
        let mut guard = self.shared.progress.lock();

        loop {
            if reached() {
                return true;
            }
            if self.shared.progressed.wait_until(&mut guard, deadline).timed_out() {
                return reached();
            }
        }
    }

    fn ensure_open(&self) -> Result<LogStore> {
        match self.local() {
            Some(local) if local.is_open() => Ok(local),
            _ => Err(WalError::NotOpen("slave log not open".to_string())),
        }
    }
}

impl Wal for SlaveLog {
    fn append(&self, _payload: &[u8]) -> Result<LogEntry> {
        Err(WalError::ReadOnly)
    }

    fn first(&self) -> Result<Option<LogEntry>> {
        self.ensure_open()?.first()
    }

    fn first_wait(&self, timeout: Duration) -> Result<LogEntry> {
        self.ensure_open()?.first_wait(timeout)
    }

    fn last(&self) -> Result<Option<LogEntry>> {
        self.ensure_open()?.last()
    }

    fn get(&self, lsn: Lsn) -> Result<Option<LogEntry>> {
        self.ensure_open()?.get(lsn)
    }

    fn next(&self, entry: &LogEntry) -> Result<Option<LogEntry>> {
        self.ensure_open()?.next(entry)
    }

    fn next_wait(&self, entry: &LogEntry, timeout: Duration) -> Result<LogEntry> {
        self.ensure_open()?.next_wait(entry, timeout)
    }

    fn iterator(&self, start: Option<Lsn>, timeout: Option<Duration>) -> Result<WalIterator> {
        self.ensure_open()?.iterator(start, timeout)
    }

    fn sync(&self) -> Result<()> {
        self.ensure_open()?.sync()
    }

    fn is_open(&self) -> bool {
        self.local().map_or(false, |local| local.is_open())
    }

    /// Stop replicating and close the local store
    ///
    /// Returns once the replicator thread has exited.
    fn close(&self) {
        if let Some(local) = self.local() {
            local.close();
        }
        self.shared.master().close();
        // Disconnecting the channel cancels a reconnect backoff
        self.cancel.lock().take();

        let handle = self.worker.lock().take();
        if let Some(handle) = handle {
            if handle.thread().id() == thread::current().id() {
                return;
            }
            if handle.join().is_err() {
                tracing::error!("Replicator for {} panicked", self.shared.address);
                self.shared.set_state(ReplicationState::Failed);
            }
        } else {
            // Never started: nothing else will move the state
            let _slot = self.shared.local.write();
            let _ = self.shared.state.compare_exchange(
                ReplicationState::Init as u8,
                ReplicationState::Closed as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            );
        }
    }
}

impl Drop for SlaveLog {
    fn drop(&mut self) {
        self.close();
    }
}

//! Replicator thread
//!
//! Pulls entries from the master through a tailing iterator and appends
//! them verbatim to the local store. Network failures never end the thread:
//! the iterator is dropped, the endpoint closed and replaced through the
//! connector, and pulling resumes at the last applied entry, which the
//! master must hand back first (and identical) before anything new is
//! appended.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel::{Receiver, RecvTimeoutError};

use crate::error::{Result, WalError};
use crate::store::LogStore;
use crate::wal::{LogEntry, Wal};

use super::{ReplicationState, Shared};

/// Thread entry point
pub(crate) fn run(shared: Arc<Shared>, local: LogStore, applied: Option<LogEntry>, cancel: Receiver<()>) {
    let mut replicator = Replicator {
        wait: shared.config.wait_timeout(),
        shared,
        local,
        cancel,
        applied,
        dirty: false,
        synced_at: None,
    };

    match replicator.replicate() {
        Ok(()) => replicator.shared.set_state(ReplicationState::Closed),
        Err(e) if !replicator.is_open() => {
            tracing::debug!("Replicator stopped while closing: {}", e);
            replicator.shared.set_state(ReplicationState::Closed);
        }
        Err(e) => {
            tracing::error!("Replication from {} failed: {}", replicator.shared.address, e);
            replicator.shared.set_state(ReplicationState::Failed);
        }
    }

    if !replicator.is_open() {
        // A reconnect may have raced with close()
        replicator.shared.master().close();
    }
    tracing::debug!("Replicator for {} exited", replicator.shared.address);
}

struct Replicator {
    shared: Arc<Shared>,
    local: LogStore,
    cancel: Receiver<()>,
    wait: Duration,
    /// Last entry applied locally
    applied: Option<LogEntry>,
    /// Appended but not yet synced
    dirty: bool,
    synced_at: Option<Instant>,
}

impl Replicator {
    /// Whether the slave is still open
    fn is_open(&self) -> bool {
        self.local.is_open()
    }

    /// Replicate until the slave closes, reconnecting on connection loss
    ///
    /// Returns `Ok` when the slave was closed, `Err` on a fatal failure.
    fn replicate(&mut self) -> Result<()> {
        loop {
            let e = match self.pull() {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            if !self.is_open() {
                return Ok(());
            }

            let master = self.shared.master();
            if master.is_open() && !e.is_retryable() {
                return Err(e);
            }

            tracing::warn!("Lost master {}: {}", self.shared.address, e);
            self.shared.set_state(ReplicationState::Failed);
            master.close();
            self.shared.set_state(ReplicationState::Connecting);

            if !self.reconnect()? {
                return Ok(());
            }
        }
    }

    /// One session against the current master
    fn pull(&mut self) -> Result<()> {
        let master = self.shared.master();

        // Resume point: the last applied entry, or the first entry of the
        // master once it has one
        let mut resume = self.applied.clone();
        let mut it = loop {
            if !self.is_open() {
                return Ok(());
            }
            match &resume {
                Some(entry) => {
                    let it = master.iterator(Some(entry.lsn), Some(self.wait))?;
                    self.shared.set_tail(master.last()?.map(|last| last.lsn));
                    break it;
                }
                None => match master.first_wait(self.wait) {
                    Ok(first) => resume = Some(first),
                    Err(e) if e.is_timeout() => self.log_timeout(),
                    Err(e) => return Err(e),
                },
            }
        };

        while self.is_open() {
            self.shared.set_state(ReplicationState::Wait);
            match it.has_next() {
                Ok(true) => {
                    let entry = it.next()?;
                    if let Some(expected) = resume.take() {
                        check_resume(&expected, &entry)?;
                    }
                    self.apply(master.as_ref(), entry)?;
                }
                Ok(false) => {
                    // Only the initial lookup of the resume entry can come up empty
                    let missing = resume.as_ref().map(|e| e.lsn.to_string()).unwrap_or_default();
                    return Err(WalError::Protocol(format!(
                        "entry {} not found on master {}",
                        missing, self.shared.address
                    )));
                }
                Err(e) if e.is_timeout() => {
                    self.log_timeout();
                    self.try_flush()?;
                }
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// Write a pulled entry locally unless it is the one already applied
    fn apply(&mut self, master: &dyn Wal, entry: LogEntry) -> Result<()> {
        let is_new = self.applied.as_ref().map_or(true, |applied| applied.lsn != entry.lsn);
        if is_new {
            self.shared.set_state(ReplicationState::Appending);
            self.local.append_entry(&entry)?;
            self.dirty = true;
            self.try_flush()?;
        }
        self.shared.set_state(ReplicationState::Wait);

        self.shared.set_applied(entry.lsn);
        let tail = match entry.tail_hint {
            Some(tail) => Some(tail),
            None => master.last()?.map(|last| last.lsn),
        };
        self.shared.set_tail(tail);
        self.applied = Some(entry);
        Ok(())
    }

    /// Sync the local store when there is unsynced data and a flush is due
    fn try_flush(&mut self) -> Result<()> {
        if !(self.dirty && self.shared.config.auto_flush) {
            return Ok(());
        }

        let period = self.shared.config.flush_period_ms;
        let due = period <= 0
            || self
                .synced_at
                .map_or(true, |at| at.elapsed() >= Duration::from_millis(period as u64));
        if due {
            self.local.sync()?;
            self.dirty = false;
            self.synced_at = Some(Instant::now());
        }
        Ok(())
    }

    /// Report a wait timeout, only while known to lag behind
    fn log_timeout(&self) {
        let lag = self.shared.bytes_behind_master();
        if lag != -1 && lag != 0 {
            let what = if self.shared.state() == ReplicationState::Wait {
                "wait timeout"
            } else {
                "replicate timeout"
            };
            tracing::warn!("{}: {} bytes behind master {}", what, lag, self.shared.address);
        }
    }

    /// Obtain a new master endpoint
    ///
    /// Returns `Ok(false)` when the slave closed while retrying.
    fn reconnect(&mut self) -> Result<bool> {
        while self.is_open() {
            match self.shared.connector.connect(&self.shared.address) {
                Ok(master) => {
                    self.shared.replace_master(master);
                    tracing::info!("Reconnected to master {}", self.shared.address);
                    self.shared.set_state(ReplicationState::Wait);
                    return Ok(self.is_open());
                }
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) => {
                    tracing::debug!("Reconnect to {} failed: {}", self.shared.address, e);
                    self.backoff()?;
                }
            }
        }
        Ok(false)
    }

    /// Sleep between reconnect attempts; cancelled by close()
    fn backoff(&self) -> Result<()> {
        match self.shared.config.reconnect_period() {
            Some(period) => match self.cancel.recv_timeout(period) {
                Err(RecvTimeoutError::Timeout) => Ok(()),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => Err(WalError::Interrupted(format!(
                    "reconnect to {} cancelled",
                    self.shared.address
                ))),
            },
            None => {
                thread::yield_now();
                Ok(())
            }
        }
    }
}

/// The first entry of a session must be the resume entry itself
fn check_resume(expected: &LogEntry, entry: &LogEntry) -> Result<()> {
    if entry.lsn != expected.lsn {
        return Err(WalError::Protocol(format!(
            "first entry from master {} does not match resume point {}",
            entry.lsn, expected.lsn
        )));
    }
    if entry.payload != expected.payload {
        return Err(WalError::Protocol(format!(
            "entry {} differs between master and slave",
            entry.lsn
        )));
    }
    Ok(())
}

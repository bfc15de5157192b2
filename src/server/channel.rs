//! Replication channels
//!
//! A channel is a named replication stream whose apply worker claims GTIDs
//! through the same `GtidState` as client sessions. Code working with a
//! channel holds a `ChannelGuard`; a channel cannot be removed while any
//! guard is alive.

use std::collections::HashMap;
use std::ops::Deref;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::gtid::{
    AcquireOutcome, Gtid, GtidError, GtidState, KillHandle, NextGtid, OwnerId,
    SessionGtidContext,
};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Replication channel '{0}' does not exist")]
    NotFound(String),

    #[error("Replication channel '{0}' already exists")]
    AlreadyExists(String),

    #[error("Replication channel '{name}' is in use by {users} holder(s)")]
    InUse { name: String, users: usize },
}

pub type ChannelResult<T> = Result<T, ChannelError>;

/// A named replication channel and its apply worker's GTID context
#[derive(Debug)]
pub struct Channel {
    name: String,
    owner_id: OwnerId,
    worker: Mutex<SessionGtidContext>,
    kill: KillHandle,
    applied: AtomicU64,
    skipped: AtomicU64,
}

impl Channel {
    fn new(name: String, owner_id: OwnerId) -> Self {
        let worker = SessionGtidContext::new(owner_id);
        let kill = worker.kill_handle();
        Self {
            name,
            owner_id,
            worker: Mutex::new(worker),
            kill,
            applied: AtomicU64::new(0),
            skipped: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// GTID owner id of the apply worker
    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    /// Stop handle for the apply worker (`STOP REPLICA`)
    pub fn kill_handle(&self) -> KillHandle {
        self.kill.clone()
    }

    pub fn applied_count(&self) -> u64 {
        self.applied.load(Ordering::Relaxed)
    }

    pub fn skipped_count(&self) -> u64 {
        self.skipped.load(Ordering::Relaxed)
    }

    /// Apply one replicated transaction identified by `gtid`.
    ///
    /// Waits while a client session owns the GTID, skips it when it is
    /// already logged, otherwise runs `body` and flushes and commits the
    /// GTID, or rolls it back when `body` fails.
    pub fn apply<F, E>(&self, state: &GtidState, gtid: Gtid, body: F) -> Result<AcquireOutcome, E>
    where
        F: FnOnce() -> Result<(), E>,
        E: From<GtidError>,
    {
        let mut worker = self.worker.lock();
        worker.set_next_gtid(NextGtid::Explicit(gtid));

        if state.acquire_ownership_single(&mut worker, gtid)? == AcquireOutcome::AlreadyLogged {
            state.update_on_commit(&mut worker)?;
            self.skipped.fetch_add(1, Ordering::Relaxed);
            debug!(channel = %self.name, %gtid, "Skipped already applied transaction");
            return Ok(AcquireOutcome::AlreadyLogged);
        }

        if let Err(e) = body() {
            state.update_on_rollback(&mut worker)?;
            return Err(e);
        }
        log_applied(state, &mut worker)?;
        self.applied.fetch_add(1, Ordering::Relaxed);
        Ok(AcquireOutcome::Acquired)
    }
}

/// Flush and commit the worker's GTID; a failed flush rolls it back
fn log_applied(state: &GtidState, worker: &mut SessionGtidContext) -> Result<(), GtidError> {
    if let Err(e) = state.update_on_flush(worker) {
        warn!(owner_id = worker.owner_id(), error = %e, "Flush failed, rolling back applied GTID");
        state.update_on_rollback(worker)?;
        return Err(e);
    }
    state.update_on_commit(worker)
}

/// Scoped handle on a registered channel
#[derive(Debug)]
pub struct ChannelGuard {
    channel: Arc<Channel>,
}

impl Deref for ChannelGuard {
    type Target = Channel;

    fn deref(&self) -> &Channel {
        &self.channel
    }
}

/// Registry of replication channels by name
#[derive(Debug, Default)]
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<Channel>>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a channel whose worker claims GTIDs as `owner_id`
    pub fn create(&self, name: &str, owner_id: OwnerId) -> ChannelResult<ChannelGuard> {
        let mut channels = self.channels.write();
        if channels.contains_key(name) {
            return Err(ChannelError::AlreadyExists(name.to_string()));
        }
        let channel = Arc::new(Channel::new(name.to_string(), owner_id));
        channels.insert(name.to_string(), Arc::clone(&channel));
        info!(channel = name, owner_id, "Replication channel created");
        Ok(ChannelGuard { channel })
    }

    pub fn acquire(&self, name: &str) -> ChannelResult<ChannelGuard> {
        let channels = self.channels.read();
        let channel = channels
            .get(name)
            .ok_or_else(|| ChannelError::NotFound(name.to_string()))?;
        Ok(ChannelGuard {
            channel: Arc::clone(channel),
        })
    }

    /// Unregister `name`; refused while guards are alive
    pub fn remove(&self, name: &str) -> ChannelResult<()> {
        let mut channels = self.channels.write();
        let channel = channels
            .get(name)
            .ok_or_else(|| ChannelError::NotFound(name.to_string()))?;
        // The registry holds one reference itself
        let users = Arc::strong_count(channel) - 1;
        if users > 0 {
            return Err(ChannelError::InUse {
                name: name.to_string(),
                users,
            });
        }
        channels.remove(name);
        info!(channel = name, "Replication channel removed");
        Ok(())
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.channels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.channels.read().is_empty()
    }

    /// Stop every apply worker
    pub fn kill_all(&self) {
        for channel in self.channels.read().values() {
            channel.kill.kill();
        }
    }
}

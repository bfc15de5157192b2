//! Server module for RooDB GTID tracking
//!
//! `ServerContext` is the one process-wide object: it owns the `GtidState`,
//! the replication channel registry and the connection id counter. It is
//! created once at startup and passed around by `Arc`.

pub mod channel;
pub mod handler;
pub mod session;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::config::GtidConfig;
use crate::gtid::{GtidResult, GtidState, OwnerId};

pub use channel::{Channel, ChannelError, ChannelGuard, ChannelRegistry, ChannelResult};
pub use handler::{StatementError, StatementResult};
pub use session::Session;

/// Process-wide server state
pub struct ServerContext {
    gtid_state: Arc<GtidState>,
    channels: ChannelRegistry,
    /// Shared by connections and channel workers so owner ids never collide
    next_owner_id: AtomicU32,
}

impl ServerContext {
    pub fn init(config: &GtidConfig) -> GtidResult<Self> {
        let gtid_state = Arc::new(GtidState::new(config)?);
        info!(server_uuid = %gtid_state.server_sid(), "Server context initialized");
        Ok(Self {
            gtid_state,
            channels: ChannelRegistry::new(),
            next_owner_id: AtomicU32::new(1),
        })
    }

    pub fn gtid_state(&self) -> &Arc<GtidState> {
        &self.gtid_state
    }

    pub fn channels(&self) -> &ChannelRegistry {
        &self.channels
    }

    /// Allocate a connection/worker id (0 is never handed out)
    pub fn next_owner_id(&self) -> OwnerId {
        loop {
            let id = self.next_owner_id.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }

    pub fn new_session(&self) -> Session {
        Session::new(self.next_owner_id())
    }

    pub fn create_channel(&self, name: &str) -> ChannelResult<ChannelGuard> {
        self.channels.create(name, self.next_owner_id())
    }

    /// Stop channel workers and wake everything waiting on GTID ownership
    pub fn shutdown(&self) {
        self.channels.kill_all();
        self.gtid_state.shutdown();
    }
}

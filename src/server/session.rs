//! Session state for RooDB connections

use crate::gtid::{KillHandle, OwnerId, SessionGtidContext};

/// Per-connection session state
#[derive(Debug)]
pub struct Session {
    /// Unique connection identifier (also the GTID owner id)
    pub connection_id: OwnerId,
    /// Whether a transaction is open between `before_statement` and commit/rollback
    in_transaction: bool,
    /// GTID directive and ownership of this connection
    gtid: SessionGtidContext,
}

impl Session {
    /// Create a new session with default state
    pub fn new(connection_id: OwnerId) -> Self {
        Self {
            connection_id,
            in_transaction: false,
            gtid: SessionGtidContext::new(connection_id),
        }
    }

    /// Check if we're in an explicit transaction
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    /// Start an explicit transaction
    pub fn begin_transaction(&mut self) {
        self.in_transaction = true;
    }

    /// End the current transaction
    pub fn end_transaction(&mut self) {
        self.in_transaction = false;
    }

    pub fn gtid(&self) -> &SessionGtidContext {
        &self.gtid
    }

    pub fn gtid_mut(&mut self) -> &mut SessionGtidContext {
        &mut self.gtid
    }

    /// Handle another thread can use to `KILL` this connection
    pub fn kill_handle(&self) -> KillHandle {
        self.gtid.kill_handle()
    }
}

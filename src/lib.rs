//! RooDB GTID - global transaction identifier tracking for RooDB
//!
//! Features:
//! - Interval-compressed GTID sets with the canonical text format
//! - Per-source ownership of in-flight GTIDs with blocking hand-off
//! - Flush/commit/rollback bookkeeping for sessions and replication channels

pub mod config;
pub mod gtid;
pub mod server;
pub mod signal;

pub use config::{GtidConfig, GtidMode};
pub use gtid::{GtidError, GtidResult, GtidSet, GtidState};
pub use server::ServerContext;

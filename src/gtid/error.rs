//! GTID error types

use std::collections::TryReserveError;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

use super::{Gno, Gtid, OwnerId, Sidno};

/// Why an ownership wait was abandoned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// The waiting connection was killed
    Killed,
    /// The server is shutting down
    Shutdown,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Killed => f.write_str("connection killed"),
            Self::Shutdown => f.write_str("server shutting down"),
        }
    }
}

/// GTID operation errors
#[derive(Error, Debug)]
pub enum GtidError {
    /// Growing an internal array or interval list failed
    #[error("Out of memory while growing {what}")]
    OutOfMemory { what: &'static str },

    /// No free sequence number is left for automatic allocation
    #[error("No free GNO left for sidno {sidno}")]
    GnoExhausted { sidno: Sidno },

    /// Malformed GTID or GTID set text
    #[error("Malformed GTID text '{text}': {reason}")]
    Parse { text: String, reason: String },

    /// Interval outside `1..=MAX_GNO` or empty
    #[error("Invalid GNO interval [{start}, {end})")]
    InvalidInterval { start: Gno, end: Gno },

    /// GTID with sidno 0 or a GNO outside `1..MAX_GNO`
    #[error("Invalid GTID {0}")]
    InvalidGtid(Gtid),

    /// GTID set with more members than one session may own
    #[error("GTID set has {count} members, at most {limit} can be owned at once")]
    SetTooLarge { count: u64, limit: u64 },

    /// Purged history can only be defined while nothing is logged or owned
    #[error("Cannot change purged GTIDs: executed or owned GTIDs are not empty")]
    HistoryNotEmpty,

    /// Purging GTIDs that were never logged
    #[error("Cannot purge GTIDs that were never logged")]
    NotLogged,

    /// GTID claimed twice; the per-sidno lock makes this unreachable for correct callers
    #[error("GTID {gtid} is already owned by connection {owner}")]
    AlreadyOwned { gtid: Gtid, owner: OwnerId },

    /// Sidno not registered in the sid map
    #[error("Unknown sidno {0}")]
    UnknownSidno(Sidno),

    /// Ownership wait abandoned
    #[error("Operation cancelled: {0}")]
    Cancelled(CancelReason),

    /// Ownership wait exceeded the configured timeout
    #[error("Timed out after {waited:?} waiting for GTID {gtid}")]
    WaitTimeout { gtid: Gtid, waited: Duration },

    /// Invalid configuration value
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type for GTID operations
pub type GtidResult<T> = Result<T, GtidError>;

/// Map an allocation failure onto `GtidError::OutOfMemory`
pub(crate) fn oom(what: &'static str) -> impl FnOnce(TryReserveError) -> GtidError {
    move |_| GtidError::OutOfMemory { what }
}

pub(crate) fn parse_error(text: &str, reason: impl Into<String>) -> GtidError {
    GtidError::Parse {
        text: text.to_string(),
        reason: reason.into(),
    }
}

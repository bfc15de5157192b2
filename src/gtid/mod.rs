//! GTID ownership and state tracking
//!
//! Tracks which global transaction identifiers have been executed, which are
//! in flight (owned by a session or replication worker) and coordinates
//! waits between sessions that want the same identifier:
//! - `GtidSet`: interval-compressed per-source sets of sequence numbers
//! - `SidMap`: source UUID <-> dense sidno mapping
//! - `SidLocks`: one mutex + condition variable per sidno
//! - `OwnedGtids`: in-flight identifier -> owning connection
//! - `GtidState`: logged/lost/owned bookkeeping and the acquire/flush/commit/rollback paths
//!
//! # Locking
//!
//! The global sid lock (a reader/writer lock inside `GtidState`) is always
//! taken before any per-sidno mutex. Multiple sidnos are locked in increasing
//! sidno order. A thread never parks on a sidno condition variable while
//! holding the global lock.

mod error;
mod gtid_set;
mod next_gtid;
mod owned;
mod session;
mod sid;
mod sid_locks;
mod sid_map;
mod snapshot;
mod state;

use std::fmt;

use serde::Serialize;

pub use error::{CancelReason, GtidError, GtidResult};
pub use gtid_set::{GtidSet, Interval, IntervalList};
pub use next_gtid::NextGtid;
pub use owned::{OwnedGnos, OwnedGtids};
pub use session::{KillHandle, OwnedGtid, SessionGtidContext};
pub use sid::Sid;
pub use sid_locks::{CondWaker, SidLock, SidLocks};
pub use sid_map::SidMap;
pub use snapshot::{GtidStateSnapshot, OwnedGtidRow, SessionGtidRow};
pub use state::{
    check_claim_size, AcquireOutcome, Completion, GtidState, RejectReason, StatementVerdict,
    MAX_CLAIM_GTIDS,
};

/// Dense index assigned to a source identity (1-based)
pub type Sidno = u32;

/// Transaction sequence number within one sidno (valid range `1..MAX_GNO`)
pub type Gno = i64;

/// Connection or worker id owning an in-flight GTID (never 0)
pub type OwnerId = u32;

/// Exclusive upper bound for sequence numbers
pub const MAX_GNO: Gno = i64::MAX;

/// A global transaction identifier: (sidno, gno)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct Gtid {
    pub sidno: Sidno,
    pub gno: Gno,
}

impl Gtid {
    pub const fn new(sidno: Sidno, gno: Gno) -> Self {
        Self { sidno, gno }
    }

    /// Whether sidno and gno are both inside their valid ranges
    pub fn is_valid(&self) -> bool {
        self.sidno > 0 && is_valid_gno(self.gno)
    }
}

impl fmt::Display for Gtid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sidno, self.gno)
    }
}

/// Whether `gno` can name a transaction
#[inline]
pub fn is_valid_gno(gno: Gno) -> bool {
    gno > 0 && gno < MAX_GNO
}

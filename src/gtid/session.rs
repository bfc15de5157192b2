//! Per-session GTID bookkeeping
//!
//! A `SessionGtidContext` lives inside the connection that owns it and is
//! only touched by that connection's thread and by `GtidState` while the
//! relevant sidno locks are held. The `KillHandle` is the one piece shared
//! with other threads.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{CondWaker, GtidSet, NextGtid, OwnerId};

/// What a session currently owns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OwnedGtid {
    #[default]
    Nothing,
    Single(super::Gtid),
    /// The owned GTIDs are in `SessionGtidContext::owned_gtid_set`
    Set,
}

/// Cross-thread kill switch for a session
///
/// `kill` sets the flag and, if the session is parked in an ownership wait,
/// wakes the condition variable it registered through `enter_cond`.
#[derive(Clone, Default)]
pub struct KillHandle {
    inner: Arc<KillInner>,
}

#[derive(Default)]
struct KillInner {
    killed: AtomicBool,
    waiting_on: Mutex<Option<Arc<dyn CondWaker>>>,
}

impl KillHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kill(&self) {
        self.inner.killed.store(true, Ordering::SeqCst);
        // Clone out so the registration mutex is not held while taking the sidno mutex
        let target = self.inner.waiting_on.lock().clone();
        if let Some(waker) = target {
            waker.wake_all();
        }
    }

    pub fn is_killed(&self) -> bool {
        self.inner.killed.load(Ordering::SeqCst)
    }

    /// Clear the flag once the killed statement has been aborted
    pub fn reset(&self) {
        self.inner.killed.store(false, Ordering::SeqCst);
    }

    /// Register the condition variable this session is about to park on.
    /// Called with the matching sidno mutex held.
    pub fn enter_cond(&self, waker: Arc<dyn CondWaker>) {
        *self.inner.waiting_on.lock() = Some(waker);
    }

    pub fn exit_cond(&self) {
        *self.inner.waiting_on.lock() = None;
    }
}

impl fmt::Debug for KillHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KillHandle")
            .field("killed", &self.is_killed())
            .field("waiting", &self.inner.waiting_on.lock().is_some())
            .finish()
    }
}

/// GTID state of one session or replication worker
#[derive(Debug)]
pub struct SessionGtidContext {
    owner_id: OwnerId,
    owned: OwnedGtid,
    owned_set: GtidSet,
    next_gtid: NextGtid,
    /// Explicit set the next transaction must cover (`GTID_NEXT_LIST`)
    next_gtid_set: Option<GtidSet>,
    kill: KillHandle,
}

impl SessionGtidContext {
    pub fn new(owner_id: OwnerId) -> Self {
        debug_assert!(owner_id != 0, "owner id 0 is reserved");
        Self {
            owner_id,
            owned: OwnedGtid::Nothing,
            owned_set: GtidSet::new(),
            next_gtid: NextGtid::default(),
            next_gtid_set: None,
            kill: KillHandle::new(),
        }
    }

    pub fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    pub fn owned_gtid(&self) -> OwnedGtid {
        self.owned
    }

    /// Owned GTIDs when `owned_gtid()` is `OwnedGtid::Set`
    pub fn owned_gtid_set(&self) -> &GtidSet {
        &self.owned_set
    }

    pub fn owns_gtids(&self) -> bool {
        self.owned != OwnedGtid::Nothing
    }

    pub fn next_gtid(&self) -> NextGtid {
        self.next_gtid
    }

    pub fn set_next_gtid(&mut self, next: NextGtid) {
        self.next_gtid = next;
    }

    pub fn next_gtid_set(&self) -> Option<&GtidSet> {
        self.next_gtid_set.as_ref()
    }

    pub fn set_next_gtid_set(&mut self, set: Option<GtidSet>) {
        self.next_gtid_set = set;
    }

    pub fn kill_handle(&self) -> KillHandle {
        self.kill.clone()
    }

    pub fn is_killed(&self) -> bool {
        self.kill.is_killed()
    }

    pub(crate) fn kill(&self) -> &KillHandle {
        &self.kill
    }

    pub(crate) fn set_owned_single(&mut self, gtid: super::Gtid) {
        self.owned = OwnedGtid::Single(gtid);
        self.owned_set.clear();
    }

    pub(crate) fn set_owned_set(&mut self, set: GtidSet) {
        self.owned = OwnedGtid::Set;
        self.owned_set = set;
    }

    pub(crate) fn clear_owned(&mut self) {
        self.owned = OwnedGtid::Nothing;
        self.owned_set.clear();
    }

    /// After the transaction is flushed an explicit directive is used up
    pub(crate) fn consume_explicit_directive(&mut self) {
        if self.next_gtid.is_explicit() || self.next_gtid_set.is_some() {
            self.next_gtid = NextGtid::Undefined;
            self.next_gtid_set = None;
        }
    }
}

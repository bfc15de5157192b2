//! GTID state coordinator
//!
//! Holds the logged (executed), lost (purged) and owned GTIDs of the server
//! and implements the life cycle of a GTID as seen by one session:
//!
//! ```text
//! UNCLAIMED --acquire--> OWNED(session) --flush--> LOGGED
//!                            |
//!                            +--rollback--> UNCLAIMED
//! ```
//!
//! # Locking
//!
//! `global_sid_lock` guards the shape of everything: the sid map and the
//! per-sidno lock table. Sessions acquiring or releasing GTIDs hold it in read
//! mode, so different sidnos never serialize against each other. Registering a
//! new source, redefining purged history and `reset` take it in write mode.
//!
//! The data of one sidno lives behind that sidno's mutex and is only touched
//! with the global lock held. Several sidnos are always locked in increasing
//! sidno order. A thread that has to wait for a GTID drops the global lock
//! first and then parks on the sidno condition variable, which releases the
//! sidno mutex.

use std::ops::DerefMut;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{MutexGuard, RwLock};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::error::{CancelReason, GtidError, GtidResult};
use super::gtid_set::{parse_entries, Interval};
use super::next_gtid::{gtid_to_text, parse_gtid_text};
use super::{
    Gno, Gtid, GtidSet, IntervalList, NextGtid, OwnedGnos, OwnedGtid, OwnedGtids, OwnerId,
    SessionGtidContext, Sid, SidLock, SidLocks, SidMap, Sidno, MAX_GNO,
};
use crate::config::{GtidConfig, GtidMode};
use crate::signal::AbortSignal;

/// Why a statement must not run with the session's current directive
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    #[error("@@SESSION.GTID_NEXT is UNDEFINED; set it before the next statement")]
    UndefinedNextGtid,
    #[error("@@SESSION.GTID_NEXT cannot be AUTOMATIC when @@SESSION.GTID_NEXT_LIST is set")]
    AutomaticWithSet,
    #[error("@@SESSION.GTID_NEXT is not contained in @@SESSION.GTID_NEXT_LIST")]
    GtidNotInSet,
    #[error("ANONYMOUS transactions are not allowed when GTID_MODE = ON")]
    AnonymousWhenGtidModeOn,
    #[error("Explicit GTIDs are not allowed when GTID_MODE = OFF")]
    ExplicitWhenGtidModeOff,
}

/// Decision handed back to the statement executor
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementVerdict {
    /// Run the statement normally
    Execute,
    /// The GTID is already logged: skip execution but still run commit bookkeeping
    Skip,
    /// Abort the statement with a user-visible error
    Cancel(RejectReason),
}

/// Result of an ownership acquisition
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireOutcome {
    /// The session now owns the GTID(s)
    Acquired,
    /// Everything requested is already logged
    AlreadyLogged,
}

/// How a transaction ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Commit,
    Rollback,
}

/// Logged, lost and owned GTIDs of one sidno
#[derive(Debug)]
pub(crate) struct SidnoState {
    /// Executed GTIDs; always a superset of `lost`
    logged: IntervalList,
    lost: IntervalList,
    owned: OwnedGnos,
}

impl SidnoState {
    fn new(sidno: Sidno) -> Self {
        Self {
            logged: IntervalList::new(),
            lost: IntervalList::new(),
            owned: OwnedGnos::new(sidno),
        }
    }

    /// Smallest GNO that is neither logged (which covers lost) nor owned
    fn automatic_gno(&self) -> GtidResult<Gno> {
        let mut candidate: Gno = 1;
        for iv in self.logged.iter() {
            while candidate < iv.start {
                if !self.owned.is_owned(candidate) {
                    return Ok(candidate);
                }
                candidate += 1;
            }
            candidate = candidate.max(iv.end);
        }
        // Terminates after at most owned.len() + 1 steps
        while candidate < MAX_GNO {
            if !self.owned.is_owned(candidate) {
                return Ok(candidate);
            }
            candidate += 1;
        }
        Err(GtidError::GnoExhausted {
            sidno: self.owned.sidno(),
        })
    }

    /// Release `gno` if `owner` holds it
    fn release(&mut self, gno: Gno, owner: OwnerId) -> bool {
        if self.owned.owner(gno) == Some(owner) {
            self.owned.remove(gno);
            true
        } else {
            false
        }
    }
}

type SidnoLock = SidLock<SidnoState>;

/// Structures whose shape is guarded by the global sid lock
#[derive(Debug, Default)]
struct SidTable {
    sid_map: SidMap,
    locks: SidLocks<SidnoState>,
}

impl SidTable {
    fn add_sid(&mut self, sid: Sid) -> GtidResult<Sidno> {
        if let Some(sidno) = self.sid_map.sid_to_sidno(&sid) {
            return Ok(sidno);
        }
        // Grow the lock table first; a spare entry is harmless, a missing one is not
        self.locks
            .ensure_index(self.sid_map.max_sidno() + 1, SidnoState::new)?;
        self.sid_map.add(sid)
    }

    fn handle(&self, sidno: Sidno) -> GtidResult<Arc<SidnoLock>> {
        self.locks
            .get(sidno)
            .cloned()
            .ok_or(GtidError::UnknownSidno(sidno))
    }

    /// Handles for `sidnos` (already in increasing order)
    fn handles(&self, sidnos: &[Sidno]) -> GtidResult<Vec<Arc<SidnoLock>>> {
        sidnos.iter().map(|&sidno| self.handle(sidno)).collect()
    }

    fn all_handles(&self) -> (Vec<Sidno>, Vec<Arc<SidnoLock>>) {
        self.locks
            .iter()
            .map(|(sidno, lock)| (sidno, Arc::clone(lock)))
            .unzip()
    }

    /// Build a set from parsed entries; `None` when a source is not registered yet
    fn resolve(&self, entries: &[(Sid, Vec<Interval>)]) -> GtidResult<Option<GtidSet>> {
        let mut set = GtidSet::new();
        for (sid, intervals) in entries {
            let Some(sidno) = self.sid_map.sid_to_sidno(sid) else {
                return Ok(None);
            };
            for iv in intervals {
                set.add_interval(sidno, iv.start, iv.end)?;
            }
        }
        Ok(Some(set))
    }
}

/// Lock every handle in order (handles are sorted by sidno)
fn lock_all(locks: &[Arc<SidnoLock>]) -> Vec<MutexGuard<'_, SidnoState>> {
    locks.iter().map(|lock| lock.lock()).collect()
}

/// Server-wide GTID state
///
/// Constructed once per server (see `ServerContext`) and shared by reference.
pub struct GtidState {
    global_sid_lock: RwLock<SidTable>,
    server_sid: Sid,
    server_sidno: Sidno,
    mode: GtidMode,
    wait_poll_interval: Duration,
    ownership_wait_timeout: Duration,
    abort: AbortSignal,
}

impl GtidState {
    /// Create the state, register the server's own source identity and load
    /// the configured purged/executed sets.
    pub fn new(config: &GtidConfig) -> GtidResult<Self> {
        config.validate()?;

        let server_sid = config.server_uuid.unwrap_or_else(Sid::generate);
        let mut table = SidTable::default();
        let server_sidno = table.add_sid(server_sid)?;

        let state = Self {
            global_sid_lock: RwLock::new(table),
            server_sid,
            server_sidno,
            mode: config.gtid_mode,
            wait_poll_interval: config.wait_poll_interval,
            ownership_wait_timeout: config.ownership_wait_timeout,
            abort: AbortSignal::new(),
        };

        if let Some(text) = config.gtid_purged.as_deref() {
            let purged = state.parse_gtid_set(text)?;
            state.set_lost(&purged)?;
        }
        if let Some(text) = config.gtid_executed.as_deref() {
            let executed = state.parse_gtid_set(text)?;
            state.add_logged(&executed)?;
        }

        info!(
            server_uuid = %server_sid,
            server_sidno,
            gtid_mode = %state.mode,
            "GTID state initialized"
        );
        Ok(state)
    }

    pub fn server_sid(&self) -> Sid {
        self.server_sid
    }

    pub fn server_sidno(&self) -> Sidno {
        self.server_sidno
    }

    pub fn gtid_mode(&self) -> GtidMode {
        self.mode
    }

    pub fn abort_signal(&self) -> &AbortSignal {
        &self.abort
    }

    // ============ Source identities ============

    /// Sidno for `sid`, registering it when new. Known sids only need the
    /// global lock in read mode.
    pub fn add_sid(&self, sid: Sid) -> GtidResult<Sidno> {
        if let Some(sidno) = self.global_sid_lock.read().sid_map.sid_to_sidno(&sid) {
            return Ok(sidno);
        }
        self.global_sid_lock.write().add_sid(sid)
    }

    pub fn sid_to_sidno(&self, sid: &Sid) -> Option<Sidno> {
        self.global_sid_lock.read().sid_map.sid_to_sidno(sid)
    }

    pub fn sidno_to_sid(&self, sidno: Sidno) -> Option<Sid> {
        self.global_sid_lock.read().sid_map.sidno_to_sid(sidno).copied()
    }

    pub fn max_sidno(&self) -> Sidno {
        self.global_sid_lock.read().sid_map.max_sidno()
    }

    /// Parse GTID set text, registering new sources
    pub fn parse_gtid_set(&self, text: &str) -> GtidResult<GtidSet> {
        let entries = parse_entries(text)?;
        if let Some(set) = self.global_sid_lock.read().resolve(&entries)? {
            return Ok(set);
        }

        let mut table = self.global_sid_lock.write();
        let mut set = GtidSet::new();
        for (sid, intervals) in &entries {
            let sidno = table.add_sid(*sid)?;
            for iv in intervals {
                set.add_interval(sidno, iv.start, iv.end)?;
            }
        }
        Ok(set)
    }

    /// Parse a `GTID_NEXT` value, registering a new source if needed
    pub fn parse_next_gtid(&self, text: &str) -> GtidResult<NextGtid> {
        let trimmed = text.trim();
        if trimmed.eq_ignore_ascii_case("AUTOMATIC") {
            return Ok(NextGtid::Automatic);
        }
        if trimmed.eq_ignore_ascii_case("ANONYMOUS") {
            return Ok(NextGtid::Anonymous);
        }
        let (sid, gno) = parse_gtid_text(trimmed)?;
        Ok(NextGtid::Explicit(Gtid::new(self.add_sid(sid)?, gno)))
    }

    pub fn gtid_set_to_text(&self, set: &GtidSet) -> String {
        set.to_text(&self.global_sid_lock.read().sid_map)
    }

    pub fn gtid_to_text(&self, gtid: Gtid) -> String {
        gtid_to_text(gtid, &self.global_sid_lock.read().sid_map)
    }

    pub fn next_gtid_to_text(&self, next: NextGtid) -> String {
        next.to_text(&self.global_sid_lock.read().sid_map)
    }

    // ============ Statement entry point ============

    /// Decide whether the session's next statement executes, is skipped or
    /// is rejected, acquiring GTID ownership as its directive requires.
    pub fn before_statement(&self, ctx: &mut SessionGtidContext) -> GtidResult<StatementVerdict> {
        // Later statements of a transaction that already owns its GTID(s)
        if ctx.owns_gtids() {
            return Ok(StatementVerdict::Execute);
        }

        let next = ctx.next_gtid();
        let pending_set = ctx.next_gtid_set().cloned();

        if let Some(reason) = self.reject_reason(next, pending_set.as_ref()) {
            debug!(owner = ctx.owner_id(), %reason, "Statement rejected");
            return Ok(StatementVerdict::Cancel(reason));
        }

        let outcome = match (next, pending_set) {
            (NextGtid::Anonymous, _) => return Ok(StatementVerdict::Execute),
            (NextGtid::Automatic, _) if self.mode == GtidMode::Off => {
                return Ok(StatementVerdict::Execute)
            }
            (NextGtid::Automatic, _) => {
                self.acquire_automatic(ctx)?;
                AcquireOutcome::Acquired
            }
            (_, Some(set)) => self.acquire_ownership_multiple(ctx, &set)?,
            (NextGtid::Explicit(gtid), None) => self.acquire_ownership_single(ctx, gtid)?,
            (NextGtid::Undefined, None) => {
                return Ok(StatementVerdict::Cancel(RejectReason::UndefinedNextGtid))
            }
        };

        Ok(match outcome {
            AcquireOutcome::Acquired => StatementVerdict::Execute,
            AcquireOutcome::AlreadyLogged => StatementVerdict::Skip,
        })
    }

    fn reject_reason(&self, next: NextGtid, pending_set: Option<&GtidSet>) -> Option<RejectReason> {
        match next {
            NextGtid::Undefined => return Some(RejectReason::UndefinedNextGtid),
            NextGtid::Automatic if pending_set.is_some() => {
                return Some(RejectReason::AutomaticWithSet)
            }
            NextGtid::Anonymous if self.mode == GtidMode::On => {
                return Some(RejectReason::AnonymousWhenGtidModeOn)
            }
            _ => {}
        }
        if self.mode == GtidMode::Off && (next.is_explicit() || pending_set.is_some()) {
            return Some(RejectReason::ExplicitWhenGtidModeOff);
        }
        if let (NextGtid::Explicit(gtid), Some(set)) = (next, pending_set) {
            if !set.contains_gtid(gtid) {
                return Some(RejectReason::GtidNotInSet);
            }
        }
        None
    }

    // ============ Ownership acquisition ============

    /// Claim `gtid` for the session, waiting while another session owns it
    pub fn acquire_ownership_single(
        &self,
        ctx: &mut SessionGtidContext,
        gtid: Gtid,
    ) -> GtidResult<AcquireOutcome> {
        if !gtid.is_valid() {
            return Err(GtidError::InvalidGtid(gtid));
        }
        let owner = ctx.owner_id();
        let started = Instant::now();

        loop {
            let table = self.global_sid_lock.read();
            let lock = table.handle(gtid.sidno)?;
            let mut state = lock.lock();

            if state.logged.contains(gtid.gno) {
                debug!(%gtid, owner, "GTID already logged, skipping");
                return Ok(AcquireOutcome::AlreadyLogged);
            }

            match state.owned.owner(gtid.gno) {
                None => {
                    state.owned.add_owner(gtid.gno, owner)?;
                    ctx.set_owned_single(gtid);
                    debug!(%gtid, owner, "Acquired GTID ownership");
                    return Ok(AcquireOutcome::Acquired);
                }
                Some(current) if current == owner => {
                    ctx.set_owned_single(gtid);
                    return Ok(AcquireOutcome::Acquired);
                }
                Some(current) => {
                    debug!(%gtid, owner, current, "GTID owned by another connection, waiting");
                    drop(table);
                    self.wait_for_gtid(ctx, &lock, state, gtid, started)?;
                }
            }
        }
    }

    /// Claim every unlogged member of `set` for the session
    ///
    /// All touched sidnos are locked in increasing order. When a member is
    /// owned by someone else, every lock except that sidno's is released, the
    /// session waits on it and then rescans from the lowest sidno. Claims are
    /// all-or-nothing.
    pub fn acquire_ownership_multiple(
        &self,
        ctx: &mut SessionGtidContext,
        set: &GtidSet,
    ) -> GtidResult<AcquireOutcome> {
        check_claim_size(set)?;
        let owner = ctx.owner_id();
        let started = Instant::now();
        let sidnos: Vec<Sidno> = set.sidnos().collect();

        'scan: loop {
            let table = self.global_sid_lock.read();
            let locks = table.handles(&sidnos)?;

            let mut guards = Vec::with_capacity(locks.len());
            for (lock, &sidno) in locks.iter().zip(&sidnos) {
                let state = lock.lock();
                let blocker = state
                    .owned
                    .iter()
                    .filter(|&(gno, current)| current != owner && set.contains(sidno, gno))
                    .map(|(gno, _)| gno)
                    .min();

                if let Some(gno) = blocker {
                    let gtid = Gtid::new(sidno, gno);
                    debug!(%gtid, owner, "GTID in requested set owned elsewhere, waiting");
                    drop(guards);
                    drop(table);
                    self.wait_for_gtid(ctx, lock, state, gtid, started)?;
                    continue 'scan;
                }
                guards.push(state);
            }

            // Every touched sidno is locked and nothing is blocked; work out
            // what is still unlogged before touching the owned tables
            let mut wanted = GtidSet::new();
            for (state, &sidno) in guards.iter().zip(&sidnos) {
                let Some(list) = set.interval_list(sidno) else {
                    continue;
                };
                let mut unlogged = list.try_clone()?;
                unlogged.remove_list(&state.logged)?;
                wanted.set_interval_list(sidno, unlogged)?;
            }

            if wanted.is_empty() {
                debug!(owner, "Every GTID in requested set already logged, skipping");
                return Ok(AcquireOutcome::AlreadyLogged);
            }

            claim_set(guards.as_mut_slice(), &sidnos, &wanted, owner)?;
            debug!(owner, count = wanted.count(), "Acquired GTID set ownership");
            ctx.set_owned_set(wanted);
            return Ok(AcquireOutcome::Acquired);
        }
    }

    /// Allocate the next free GNO of the server's sidno and claim it
    pub fn acquire_automatic(&self, ctx: &mut SessionGtidContext) -> GtidResult<Gtid> {
        let owner = ctx.owner_id();
        let table = self.global_sid_lock.read();
        let lock = table.handle(self.server_sidno)?;
        let mut state = lock.lock();

        let gno = state.automatic_gno()?;
        state.owned.add_owner(gno, owner)?;
        let gtid = Gtid::new(self.server_sidno, gno);
        ctx.set_owned_single(gtid);
        debug!(%gtid, owner, "Acquired automatic GTID");
        Ok(gtid)
    }

    /// First GNO of `sidno` that is neither logged, lost nor owned
    pub fn get_automatic_gno(&self, sidno: Sidno) -> GtidResult<Gno> {
        let table = self.global_sid_lock.read();
        let lock = table.handle(sidno)?;
        let state = lock.lock();
        state.automatic_gno()
    }

    /// Park on `lock` until its sidno changes, the session is killed, the
    /// server shuts down or the wait times out.
    ///
    /// The caller has dropped the global sid lock and hands over the sidno
    /// guard. Between the two only the sidno mutex is held; no broadcast can
    /// be lost in that window because every broadcaster takes the sidno mutex
    /// before notifying. Returns with the sidno mutex released.
    fn wait_for_gtid(
        &self,
        ctx: &SessionGtidContext,
        lock: &Arc<SidnoLock>,
        mut guard: MutexGuard<'_, SidnoState>,
        gtid: Gtid,
        started: Instant,
    ) -> GtidResult<()> {
        let kill = ctx.kill();
        kill.enter_cond(lock.clone());

        let outcome = match self.cancel_reason(ctx) {
            Some(reason) => Err(GtidError::Cancelled(reason)),
            None => match self.wait_budget(started) {
                Some(timeout) => {
                    lock.wait(&mut guard, timeout);
                    Ok(())
                }
                None => Err(GtidError::WaitTimeout {
                    gtid,
                    waited: started.elapsed(),
                }),
            },
        };

        kill.exit_cond();
        drop(guard);

        if let Err(err) = outcome {
            warn!(%gtid, owner = ctx.owner_id(), error = %err, "Abandoned wait for GTID");
            return Err(err);
        }
        if let Some(reason) = self.cancel_reason(ctx) {
            warn!(%gtid, owner = ctx.owner_id(), %reason, "Abandoned wait for GTID");
            return Err(GtidError::Cancelled(reason));
        }
        Ok(())
    }

    /// How long the next park may last; `None` once the wait timeout is spent
    fn wait_budget(&self, started: Instant) -> Option<Duration> {
        if self.ownership_wait_timeout.is_zero() {
            return Some(self.wait_poll_interval);
        }
        let remaining = self.ownership_wait_timeout.checked_sub(started.elapsed())?;
        if remaining.is_zero() {
            return None;
        }
        Some(remaining.min(self.wait_poll_interval))
    }

    fn cancel_reason(&self, ctx: &SessionGtidContext) -> Option<CancelReason> {
        if ctx.is_killed() {
            Some(CancelReason::Killed)
        } else if self.abort.is_raised() {
            Some(CancelReason::Shutdown)
        } else {
            None
        }
    }

    // ============ Transaction boundaries ============

    /// The session's transaction has been written to the binary log: move
    /// what it owns into the logged set and wake waiters. An explicit
    /// directive is used up and becomes `Undefined`.
    pub fn update_on_flush(&self, ctx: &mut SessionGtidContext) -> GtidResult<()> {
        let owner = ctx.owner_id();
        match ctx.owned_gtid() {
            OwnedGtid::Nothing => {}
            OwnedGtid::Single(gtid) => {
                let table = self.global_sid_lock.read();
                let lock = table.handle(gtid.sidno)?;
                let mut state = lock.lock();
                state.logged.add(gtid.gno)?;
                state.owned.remove(gtid.gno);
                lock.broadcast(&state);
                debug!(%gtid, owner, "Logged GTID");
            }
            OwnedGtid::Set => {
                let set = ctx.owned_gtid_set();
                let sidnos: Vec<Sidno> = set.sidnos().collect();
                let table = self.global_sid_lock.read();
                let locks = table.handles(&sidnos)?;
                let mut guards = lock_all(&locks);

                // Merge into copies first so an allocation failure changes nothing
                let mut merged = Vec::with_capacity(guards.len());
                for (state, &sidno) in guards.iter().zip(&sidnos) {
                    let mut logged = state.logged.try_clone()?;
                    if let Some(list) = set.interval_list(sidno) {
                        logged.add_list(list)?;
                    }
                    merged.push(logged);
                }

                for (((state, lock), &sidno), logged) in
                    guards.iter_mut().zip(&locks).zip(&sidnos).zip(merged)
                {
                    state.logged = logged;
                    for gno in set.intervals(sidno).iter().flat_map(|iv| iv.start..iv.end) {
                        state.owned.remove(gno);
                    }
                    lock.broadcast(state);
                }
                debug!(owner, count = set.count(), "Logged GTID set");
            }
        }
        ctx.consume_explicit_directive();
        Ok(())
    }

    pub fn update_on_commit(&self, ctx: &mut SessionGtidContext) -> GtidResult<()> {
        self.update_owned_gtids(ctx, Completion::Commit)
    }

    pub fn update_on_rollback(&self, ctx: &mut SessionGtidContext) -> GtidResult<()> {
        self.update_owned_gtids(ctx, Completion::Rollback)
    }

    /// Release whatever the session still owns and clear its bookkeeping.
    ///
    /// After a flush nothing is left to release and waiters were already
    /// woken. A rollback always broadcasts; a commit broadcasts only when it
    /// actually released something (commit without flush).
    pub fn update_owned_gtids(
        &self,
        ctx: &mut SessionGtidContext,
        completion: Completion,
    ) -> GtidResult<()> {
        let result = self.release_owned(ctx, completion);
        ctx.clear_owned();
        result
    }

    fn release_owned(&self, ctx: &SessionGtidContext, completion: Completion) -> GtidResult<()> {
        let owner = ctx.owner_id();
        let rollback = completion == Completion::Rollback;

        match ctx.owned_gtid() {
            OwnedGtid::Nothing => {}
            OwnedGtid::Single(gtid) => {
                let table = self.global_sid_lock.read();
                let lock = table.handle(gtid.sidno)?;
                let mut state = lock.lock();
                let released = state.release(gtid.gno, owner);
                if rollback || released {
                    lock.broadcast(&state);
                }
                debug!(%gtid, owner, ?completion, released, "Released GTID ownership");
            }
            OwnedGtid::Set => {
                let set = ctx.owned_gtid_set();
                let sidnos: Vec<Sidno> = set.sidnos().collect();
                let table = self.global_sid_lock.read();
                let locks = table.handles(&sidnos)?;
                let mut guards = lock_all(&locks);

                for ((state, lock), &sidno) in guards.iter_mut().zip(&locks).zip(&sidnos) {
                    let mut released = false;
                    for gno in set.intervals(sidno).iter().flat_map(|iv| iv.start..iv.end) {
                        released |= state.release(gno, owner);
                    }
                    if rollback || released {
                        lock.broadcast(state);
                    }
                }
                debug!(owner, ?completion, "Released GTID set ownership");
            }
        }
        Ok(())
    }

    // ============ Executed / purged history ============

    /// Define the purged GTIDs (`SET GLOBAL gtid_purged`). Only allowed while
    /// nothing is logged or owned; the purged GTIDs also become logged.
    pub fn set_lost(&self, set: &GtidSet) -> GtidResult<()> {
        let table = self.global_sid_lock.write();
        for sidno in set.sidnos() {
            table.handle(sidno)?;
        }
        let (sidnos, locks) = table.all_handles();
        let mut guards = lock_all(&locks);

        if guards
            .iter()
            .any(|state| !state.logged.is_empty() || !state.owned.is_empty())
        {
            warn!("Refusing to set purged GTIDs: history is not empty");
            return Err(GtidError::HistoryNotEmpty);
        }

        let mut staged = Vec::with_capacity(guards.len());
        for &sidno in &sidnos {
            let lost = match set.interval_list(sidno) {
                Some(list) => list.try_clone()?,
                None => IntervalList::new(),
            };
            staged.push((lost.try_clone()?, lost));
        }
        for ((state, lock), (logged, lost)) in guards.iter_mut().zip(&locks).zip(staged) {
            state.logged = logged;
            state.lost = lost;
            lock.broadcast(state);
        }

        info!(purged = %set.to_text(&table.sid_map), "Purged GTIDs set");
        Ok(())
    }

    /// Parse `text` and `set_lost` it
    pub fn set_lost_from_text(&self, text: &str) -> GtidResult<()> {
        let set = self.parse_gtid_set(text)?;
        self.set_lost(&set)
    }

    /// Add already-executed GTIDs to the logged set (startup recovery).
    /// Fails without changes if any of them is currently owned.
    pub fn add_logged(&self, set: &GtidSet) -> GtidResult<()> {
        let table = self.global_sid_lock.write();
        let sidnos: Vec<Sidno> = set.sidnos().collect();
        let locks = table.handles(&sidnos)?;
        let mut guards = lock_all(&locks);

        let mut merged = Vec::with_capacity(guards.len());
        for (state, &sidno) in guards.iter().zip(&sidnos) {
            if let Some((gno, owner)) = state
                .owned
                .iter()
                .find(|&(gno, _)| set.contains(sidno, gno))
            {
                return Err(GtidError::AlreadyOwned {
                    gtid: Gtid::new(sidno, gno),
                    owner,
                });
            }
            let mut logged = state.logged.try_clone()?;
            if let Some(list) = set.interval_list(sidno) {
                logged.add_list(list)?;
            }
            merged.push(logged);
        }
        for ((state, lock), logged) in guards.iter_mut().zip(&locks).zip(merged) {
            state.logged = logged;
            lock.broadcast(state);
        }

        info!(executed = %set.to_text(&table.sid_map), "Added executed GTIDs");
        Ok(())
    }

    /// Record that binary logs containing `set` were purged. Every member
    /// must already be logged.
    pub fn add_purged(&self, set: &GtidSet) -> GtidResult<()> {
        let table = self.global_sid_lock.write();
        let sidnos: Vec<Sidno> = set.sidnos().collect();
        let locks = table.handles(&sidnos)?;
        let mut guards = lock_all(&locks);

        let mut merged = Vec::with_capacity(guards.len());
        for (state, &sidno) in guards.iter().zip(&sidnos) {
            let mut lost = state.lost.try_clone()?;
            if let Some(list) = set.interval_list(sidno) {
                if !list.is_subset(&state.logged) {
                    warn!(sidno, "Refusing to purge GTIDs that were never logged");
                    return Err(GtidError::NotLogged);
                }
                lost.add_list(list)?;
            }
            merged.push(lost);
        }
        for (state, lost) in guards.iter_mut().zip(merged) {
            state.lost = lost;
        }

        info!(purged = %set.to_text(&table.sid_map), "Extended purged GTIDs");
        Ok(())
    }

    /// Forget all executed and purged GTIDs (`RESET MASTER`). Refused while
    /// any GTID is owned.
    pub fn reset(&self) -> GtidResult<()> {
        let table = self.global_sid_lock.write();
        let (_, locks) = table.all_handles();
        let mut guards = lock_all(&locks);

        if guards.iter().any(|state| !state.owned.is_empty()) {
            warn!("Refusing to reset GTID state while GTIDs are owned");
            return Err(GtidError::HistoryNotEmpty);
        }
        for (state, lock) in guards.iter_mut().zip(&locks) {
            state.logged.clear();
            state.lost.clear();
            lock.broadcast(state);
        }
        info!("GTID state reset");
        Ok(())
    }

    // ============ Read-only accessors ============

    pub fn is_logged(&self, gtid: Gtid) -> bool {
        self.with_sidno(gtid.sidno, |state| state.logged.contains(gtid.gno))
            .unwrap_or(false)
    }

    pub fn is_lost(&self, gtid: Gtid) -> bool {
        self.with_sidno(gtid.sidno, |state| state.lost.contains(gtid.gno))
            .unwrap_or(false)
    }

    pub fn get_owner(&self, gtid: Gtid) -> Option<OwnerId> {
        self.with_sidno(gtid.sidno, |state| state.owned.owner(gtid.gno))
            .flatten()
    }

    fn with_sidno<R>(&self, sidno: Sidno, f: impl FnOnce(&SidnoState) -> R) -> Option<R> {
        let table = self.global_sid_lock.read();
        let lock = table.locks.get(sidno)?;
        let state = lock.lock();
        Some(f(&state))
    }

    /// Copy of the logged (executed) set
    pub fn logged_gtids(&self) -> GtidResult<GtidSet> {
        self.collect_lists(|state| &state.logged)
    }

    /// Copy of the lost (purged) set
    pub fn lost_gtids(&self) -> GtidResult<GtidSet> {
        self.collect_lists(|state| &state.lost)
    }

    fn collect_lists(&self, pick: impl Fn(&SidnoState) -> &IntervalList) -> GtidResult<GtidSet> {
        let table = self.global_sid_lock.read();
        let mut set = GtidSet::new();
        set.ensure_sidno(table.locks.max_index())?;
        for (sidno, lock) in table.locks.iter() {
            let state = lock.lock();
            set.set_interval_list(sidno, pick(&state).try_clone()?)?;
        }
        Ok(set)
    }

    /// Copy of the owned table
    pub fn owned_gtids(&self) -> GtidResult<OwnedGtids> {
        let table = self.global_sid_lock.read();
        let mut owned = OwnedGtids::new();
        owned.ensure_sidno(table.locks.max_index())?;
        for (_, lock) in table.locks.iter() {
            let state = lock.lock();
            owned.set_gnos(state.owned.clone())?;
        }
        Ok(owned)
    }

    // ============ Shutdown ============

    /// Raise the abort signal and wake every waiter so it can bail out
    pub fn shutdown(&self) {
        if self.abort.raise() {
            info!("GTID state shutting down, waking ownership waiters");
        }
        let table = self.global_sid_lock.read();
        for sidno in 1..=table.locks.max_index() {
            table.locks.broadcast(sidno);
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.abort.is_raised()
    }
}

/// Largest GTID set one session may claim at once. Claim, flush and release
/// touch every member individually while holding the sidno mutexes.
pub const MAX_CLAIM_GTIDS: u64 = 1 << 20;

/// Reject sets too large to claim member by member
pub fn check_claim_size(set: &GtidSet) -> GtidResult<()> {
    let count = set.count();
    if count > MAX_CLAIM_GTIDS {
        return Err(GtidError::SetTooLarge {
            count,
            limit: MAX_CLAIM_GTIDS,
        });
    }
    Ok(())
}

/// Record `owner` for every member of `wanted` in the locked sidno states.
///
/// On failure every entry added here is removed again before returning.
fn claim_set<S>(
    states: &mut [S],
    sidnos: &[Sidno],
    wanted: &GtidSet,
    owner: OwnerId,
) -> GtidResult<()>
where
    S: DerefMut<Target = SidnoState>,
{
    let mut added: Vec<Gtid> = Vec::new();
    let mut failure = None;
    'claim: for (state, &sidno) in states.iter_mut().zip(sidnos) {
        for gno in wanted.intervals(sidno).iter().flat_map(|iv| iv.start..iv.end) {
            if state.owned.owner(gno) == Some(owner) {
                continue;
            }
            if let Err(e) = state.owned.add_owner(gno, owner) {
                failure = Some(e);
                break 'claim;
            }
            added.push(Gtid::new(sidno, gno));
        }
    }

    let Some(err) = failure else {
        return Ok(());
    };
    for (state, &sidno) in states.iter_mut().zip(sidnos) {
        for gtid in added.iter().filter(|g| g.sidno == sidno) {
            state.owned.remove(gtid.gno);
        }
    }
    warn!(owner, error = %err, "Rolled back partial GTID set claim");
    Err(err)
}

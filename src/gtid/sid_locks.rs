//! Per-sidno mutex and condition variable table
//!
//! Each sidno gets its own `SidLock`, so a session waiting for a GTID of one
//! source never blocks sessions working on another. Entries are reference
//! counted: a waiter keeps its `Arc<SidLock>` after letting go of the global
//! sid lock, and the table only ever grows.
//!
//! Unlocking is dropping the guard returned by `SidLock::lock`.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Condvar, Mutex, MutexGuard};

use super::error::{oom, GtidResult};
use super::Sidno;

/// Something a killer can poke to wake a thread parked in an ownership wait
pub trait CondWaker: Send + Sync {
    /// Wake every waiter. Takes the associated mutex first so a waiter that
    /// registered but has not parked yet cannot miss the signal.
    fn wake_all(&self);
}

/// Mutex-protected per-sidno data plus the condition variable waiters sleep on
#[derive(Debug, Default)]
pub struct SidLock<T> {
    data: Mutex<T>,
    cond: Condvar,
}

impl<T> SidLock<T> {
    pub fn new(data: T) -> Self {
        Self {
            data: Mutex::new(data),
            cond: Condvar::new(),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.data.lock()
    }

    /// Park until broadcast or `timeout`. Must be called with this sidno's
    /// mutex held through `guard`; returns with it re-acquired. Returns
    /// `true` when the timeout elapsed.
    pub fn wait(&self, guard: &mut MutexGuard<'_, T>, timeout: Duration) -> bool {
        self.cond.wait_for(guard, timeout).timed_out()
    }

    /// Wake all waiters. Callers hold the mutex so the wakeup cannot race
    /// with a waiter that has checked its condition but not parked yet.
    pub fn broadcast(&self, _guard: &MutexGuard<'_, T>) {
        self.cond.notify_all();
    }
}

impl<T: Send> CondWaker for SidLock<T> {
    fn wake_all(&self) {
        let guard = self.data.lock();
        self.broadcast(&guard);
    }
}

/// Growable table of `SidLock`s indexed by sidno
#[derive(Debug)]
pub struct SidLocks<T> {
    /// Index `sidno - 1`
    locks: Vec<Arc<SidLock<T>>>,
}

impl<T> Default for SidLocks<T> {
    fn default() -> Self {
        Self { locks: Vec::new() }
    }
}

impl<T> SidLocks<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Grow the table so `sidno` is covered, creating new entries with `make`
    pub fn ensure_index(&mut self, sidno: Sidno, mut make: impl FnMut(Sidno) -> T) -> GtidResult<()> {
        let len = self.locks.len();
        let wanted = sidno as usize;
        if wanted > len {
            self.locks
                .try_reserve(wanted - len)
                .map_err(oom("sid locks"))?;
            for s in len + 1..=wanted {
                self.locks.push(Arc::new(SidLock::new(make(s as Sidno))));
            }
        }
        Ok(())
    }

    pub fn max_index(&self) -> Sidno {
        self.locks.len() as Sidno
    }

    pub fn get(&self, sidno: Sidno) -> Option<&Arc<SidLock<T>>> {
        let index = sidno.checked_sub(1)? as usize;
        self.locks.get(index)
    }

    /// Lock and broadcast `sidno`
    pub fn broadcast(&self, sidno: Sidno) {
        if let Some(lock) = self.get(sidno) {
            let guard = lock.lock();
            lock.broadcast(&guard);
        }
    }

    /// `(sidno, lock)` pairs in increasing sidno order
    pub fn iter(&self) -> impl Iterator<Item = (Sidno, &Arc<SidLock<T>>)> {
        self.locks
            .iter()
            .enumerate()
            .map(|(index, lock)| (index as Sidno + 1, lock))
    }
}

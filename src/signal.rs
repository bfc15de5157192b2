//! Process-wide abort signal
//!
//! Raised once when the server shuts down. Threads parked in a GTID ownership
//! wait check it every time they wake; `GtidState::shutdown` raises it and
//! then broadcasts every sidno so nobody sleeps through it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cloneable shutdown flag shared by every `GtidState` user
#[derive(Debug, Clone, Default)]
pub struct AbortSignal {
    flag: Arc<AtomicBool>,
}

impl AbortSignal {
    /// Create a new signal in the non-raised state
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal (idempotent). Returns `true` on the first call.
    pub fn raise(&self) -> bool {
        !self.flag.swap(true, Ordering::SeqCst)
    }

    /// Check whether shutdown has been requested (non-blocking)
    pub fn is_raised(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

//! Wake signal for the loop thread
//!
//! An auto-reset event: `signal` latches a flag and wakes at most one waiter.
//! If nobody is waiting the flag stays set, so the next wait returns at once
//! instead of losing the wake-up.

use parking_lot::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// Latched cross-thread wake-up primitive
pub struct WakeSignal {
    /// Set by `signal`, consumed by the waiter
    signaled: Mutex<bool>,
    /// Wakes the blocked waiter
    cond: Condvar,
}

impl WakeSignal {
    /// Create an unsignaled event
    pub fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            cond: Condvar::new(),
        }
    }

    /// Signal the event from any thread
    pub fn signal(&self) {
        let mut signaled = self.signaled.lock();
        *signaled = true;
        self.cond.notify_one();
    }

    /// Block until signaled, consuming the signal
    pub fn wait(&self) {
        let mut signaled = self.signaled.lock();
        while !*signaled {
            self.cond.wait(&mut signaled);
        }
        *signaled = false;
    }

    /// Block until signaled or until `timeout` elapses.
    ///
    /// Returns `true` if the wait ended because of a signal. Callers must not
    /// pass a zero timeout.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        debug_assert!(!timeout.is_zero(), "wait_timeout requires a positive timeout");
        let deadline = Instant::now() + timeout;
        let mut signaled = self.signaled.lock();
        while !*signaled {
            if self.cond.wait_until(&mut signaled, deadline).timed_out() {
                break;
            }
        }
        std::mem::replace(&mut *signaled, false)
    }

    /// Whether a signal is latched and not yet consumed
    pub fn is_signaled(&self) -> bool {
        *self.signaled.lock()
    }
}

impl Default for WakeSignal {
    fn default() -> Self {
        Self::new()
    }
}

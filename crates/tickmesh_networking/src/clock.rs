//! # Session Clock
//!
//! The only notion of time the protocol needs is "sleep for a bit".
//!
//! Every wait in the session is a bounded poll: try the socket, sleep the
//! retry interval, repeat until the budget is spent. Routing that sleep
//! through [`Clock`] lets tests run the whole failure path in virtual time.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Source of delays for polling loops and the exit delay.
pub trait Clock {
    /// Blocks the calling thread for `duration`, or pretends to.
    fn sleep(&self, duration: Duration);
}

/// Real wall-clock sleeping.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    #[inline]
    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            std::thread::sleep(duration);
        }
    }
}

/// Virtual clock for deterministic tests.
///
/// `sleep` returns immediately and only advances the recorded time, so a
/// one-second wait budget expires in a handful of loop iterations.
#[derive(Debug, Default)]
pub struct ManualClock {
    /// Total virtual time slept, in microseconds.
    elapsed_us: AtomicU64,
    /// Number of sleep calls.
    sleeps: AtomicU64,
}

impl ManualClock {
    /// Creates a clock at virtual time zero.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            elapsed_us: AtomicU64::new(0),
            sleeps: AtomicU64::new(0),
        }
    }

    /// Total virtual time slept so far.
    #[must_use]
    pub fn elapsed(&self) -> Duration {
        Duration::from_micros(self.elapsed_us.load(Ordering::Relaxed))
    }

    /// Number of times `sleep` was called.
    #[must_use]
    pub fn sleep_count(&self) -> u64 {
        self.sleeps.load(Ordering::Relaxed)
    }
}

impl Clock for ManualClock {
    fn sleep(&self, duration: Duration) {
        let micros = u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);
        self.elapsed_us.fetch_add(micros, Ordering::Relaxed);
        self.sleeps.fetch_add(1, Ordering::Relaxed);
    }
}

impl<C: Clock + ?Sized> Clock for &C {
    #[inline]
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }
}

impl<C: Clock + ?Sized> Clock for std::sync::Arc<C> {
    #[inline]
    fn sleep(&self, duration: Duration) {
        (**self).sleep(duration);
    }
}

//! Monotonic time source used throughout the core.
//!
//! Every component reads "now" through this trait instead of calling
//! `Instant::now()` directly, so tests can drive multi-second schedules
//! (blink intervals, idle timeouts, eased moves) without a real sleep.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A source of monotonic seconds since some unspecified epoch.
///
/// Only deltas between two `now()` calls are meaningful.
pub trait Clock: Send + Sync {
    fn now(&self) -> f64;
}

/// Production clock: wraps `Instant`, seeded at construction.
pub struct SystemClock {
    epoch: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        self.epoch.elapsed().as_secs_f64()
    }
}

/// Test clock: advances only when told to. Shareable via `Arc` so a test
/// can hold a handle while the component under test holds the trait object.
///
/// Backed by an `AtomicU64` holding the bit pattern of the current time,
/// the same lock-free-scalar idiom [`crate::servo`] uses for `angle`/
/// `target` — a background worker thread can read `now()` while the test
/// thread advances it from outside without tearing.
pub struct ManualClock {
    now_bits: AtomicU64,
}

impl ManualClock {
    pub fn new(start: f64) -> Arc<Self> {
        Arc::new(Self {
            now_bits: AtomicU64::new(start.to_bits()),
        })
    }

    pub fn advance(&self, dt: f64) {
        let next = f64::from_bits(self.now_bits.load(Ordering::Acquire)) + dt;
        self.now_bits.store(next.to_bits(), Ordering::Release);
    }

    pub fn set(&self, t: f64) {
        self.now_bits.store(t.to_bits(), Ordering::Release);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        f64::from_bits(self.now_bits.load(Ordering::Acquire))
    }
}

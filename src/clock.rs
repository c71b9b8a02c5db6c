//! Monotonic millisecond clock.
//!
//! Internal arithmetic uses `u64` milliseconds-since-start, favoring a
//! 64-bit representation (the maintenance-reboot window
//! can reach 30 days, which is well past where `u32` milliseconds wrap).
//! [`wrapping_elapsed_u32`] is kept alongside purely to verify the
//! wrap-tolerance property required of the original 32-bit representation
//! this daemon replaces.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// A source of monotonic milliseconds since some fixed epoch.
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> u64;
}

/// Production clock, backed by [`std::time::Instant`].
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// A settable clock for tests. Shared via `Arc` so a test can advance time
/// while the daemon under test holds its own handle.
#[derive(Clone)]
pub struct TestClock {
    millis: Arc<AtomicU64>,
}

impl TestClock {
    pub fn new(start_ms: u64) -> Self {
        Self { millis: Arc::new(AtomicU64::new(start_ms)) }
    }

    pub fn advance(&self, delta_ms: u64) {
        self.millis.fetch_add(delta_ms, Ordering::SeqCst);
    }

    pub fn set(&self, ms: u64) {
        self.millis.store(ms, Ordering::SeqCst);
    }
}

impl Clock for TestClock {
    fn now_ms(&self) -> u64 {
        self.millis.load(Ordering::SeqCst)
    }
}

/// Elapsed milliseconds between two `u32` timestamps, tolerant of a single
/// wrap of the 32-bit counter. This is not on the daemon's main arithmetic
/// path (which stays in `u64`); it documents and tests the wrap-safety
/// property any wrap-tolerant scheduler depends on.
pub fn wrapping_elapsed_u32(now: u32, earlier: u32) -> u32 {
    now.wrapping_sub(earlier)
}

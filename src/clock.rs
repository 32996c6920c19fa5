//! Monotonic millisecond time source
//!
//! Everything in the core that compares times does so with wrapping
//! subtraction (`now.wrapping_sub(then) >= delta`), so the u32 millisecond
//! counter rolling over after ~49 days is handled by construction.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic millisecond counter. The only time reference the core reads.
pub trait Clock: Send + Sync {
    /// Milliseconds since some fixed origin (typically clock creation).
    fn now_ms(&self) -> u32;
}

/// Wall clock backed by [`Instant`], counting from construction.
pub struct SystemClock {
    start: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        self.start.elapsed().as_millis() as u32
    }
}

/// Manually stepped clock for deterministic control-loop testing.
///
/// Clones share the same counter, so a test can hold one handle while the
/// controller owns another.
#[derive(Clone)]
pub struct ManualClock {
    now: Arc<AtomicU32>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self {
            now: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Advance the clock by `ms` milliseconds.
    pub fn advance(&self, ms: u32) {
        self.now.fetch_add(ms, Ordering::Relaxed);
    }

    /// Set the clock to an absolute value.
    pub fn set(&self, ms: u32) {
        self.now.store(ms, Ordering::Relaxed);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u32 {
        self.now.load(Ordering::Relaxed)
    }
}

//! Wheel encoder trait and the shared pulse counter
//!
//! The pulse counter is the only data crossing from interrupt context into
//! the core. A platform integration clones a [`PulseHandle`] out of a
//! [`CountingEncoder`] and calls [`PulseHandle::pulse`] from its edge
//! interrupt; the core reads the counter through [`Encoder::read`], which
//! snapshots (and optionally zeroes) it with a single atomic exchange.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use crate::clock::Clock;
use crate::error::Result;

/// Snapshot returned by [`Encoder::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderReading {
    /// Milliseconds since the previous reset.
    pub elapsed_ms: u32,
    /// Pulses accumulated since the previous reset.
    ///
    /// Wraps silently past 65535; at design pulse rates a wrap within one
    /// control period does not occur.
    pub pulses: u16,
}

/// Single-wheel pulse feedback.
pub trait Encoder: Send {
    /// Bind the encoder to its pulse source.
    ///
    /// Returns an error if the platform cannot deliver pulses (e.g. the
    /// configured pin has no interrupt capability). A wheel whose encoder
    /// failed to begin produces no feedback and its PID output will peg at
    /// the upper limit.
    fn begin(&mut self) -> Result<()>;

    /// Zero the pulse counter and restart the elapsed-time interval.
    fn reset(&mut self);

    /// Snapshot the counter and the interval it accumulated over.
    ///
    /// With `reset` true the counter and interval restart atomically with
    /// the snapshot.
    fn read(&mut self, reset: bool) -> EncoderReading;

    /// Convenience for the common read-and-restart pattern.
    fn read_and_reset(&mut self) -> EncoderReading {
        self.read(true)
    }
}

/// Cloneable handle for feeding pulses into a [`CountingEncoder`] from an
/// interrupt service routine or a background thread.
#[derive(Clone)]
pub struct PulseHandle {
    counter: Arc<AtomicU32>,
}

impl PulseHandle {
    /// Record one encoder edge.
    #[inline]
    pub fn pulse(&self) {
        self.counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Encoder backed by an atomic pulse counter and a [`Clock`].
///
/// This is the generic in-process implementation: the platform wires
/// [`PulseHandle::pulse`] to its interrupt source and the counting, timing
/// and atomic read-and-zero all happen here.
pub struct CountingEncoder {
    counter: Arc<AtomicU32>,
    clock: Arc<dyn Clock>,
    last_reset_ms: u32,
}

impl CountingEncoder {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        let last_reset_ms = clock.now_ms();
        Self {
            counter: Arc::new(AtomicU32::new(0)),
            clock,
            last_reset_ms,
        }
    }

    /// Handle for the interrupt side of the counter.
    pub fn pulse_handle(&self) -> PulseHandle {
        PulseHandle {
            counter: Arc::clone(&self.counter),
        }
    }
}

impl Encoder for CountingEncoder {
    fn begin(&mut self) -> Result<()> {
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.counter.store(0, Ordering::Relaxed);
        self.last_reset_ms = self.clock.now_ms();
    }

    fn read(&mut self, reset: bool) -> EncoderReading {
        let now = self.clock.now_ms();
        let raw = if reset {
            self.counter.swap(0, Ordering::Relaxed)
        } else {
            self.counter.load(Ordering::Relaxed)
        };
        let elapsed_ms = now.wrapping_sub(self.last_reset_ms);
        if reset {
            self.last_reset_ms = now;
        }

        EncoderReading {
            elapsed_ms,
            pulses: raw as u16,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    #[test]
    fn test_read_without_reset_keeps_count() {
        let clock = ManualClock::new();
        let mut enc = CountingEncoder::new(Arc::new(clock.clone()));
        let handle = enc.pulse_handle();

        for _ in 0..5 {
            handle.pulse();
        }
        clock.advance(100);

        let r = enc.read(false);
        assert_eq!(r.pulses, 5);
        assert_eq!(r.elapsed_ms, 100);

        // still there
        let r = enc.read(false);
        assert_eq!(r.pulses, 5);
    }

    #[test]
    fn test_read_and_reset_zeroes() {
        let clock = ManualClock::new();
        let mut enc = CountingEncoder::new(Arc::new(clock.clone()));
        let handle = enc.pulse_handle();

        for _ in 0..7 {
            handle.pulse();
        }
        clock.advance(250);

        let r = enc.read_and_reset();
        assert_eq!(r.pulses, 7);
        assert_eq!(r.elapsed_ms, 250);

        clock.advance(250);
        let r = enc.read_and_reset();
        assert_eq!(r.pulses, 0);
        assert_eq!(r.elapsed_ms, 250);
    }

    #[test]
    fn test_pulses_from_other_thread() {
        let clock = ManualClock::new();
        let mut enc = CountingEncoder::new(Arc::new(clock));
        let handle = enc.pulse_handle();

        let t = std::thread::spawn(move || {
            for _ in 0..1000 {
                handle.pulse();
            }
        });
        t.join().unwrap();

        assert_eq!(enc.read_and_reset().pulses, 1000);
    }

    #[test]
    fn test_counter_wraps_past_u16() {
        let clock = ManualClock::new();
        let mut enc = CountingEncoder::new(Arc::new(clock));
        let handle = enc.pulse_handle();

        for _ in 0..65540 {
            handle.pulse();
        }

        // overflow drifts, never panics
        assert_eq!(enc.read_and_reset().pulses, 4);
    }
}

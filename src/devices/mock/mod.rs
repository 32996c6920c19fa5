//! Mock devices for hardware-free testing
//!
//! [`MockActuator`] records every command and exposes a cloneable probe for
//! assertions. [`SimEncoder`] closes the loop: it generates pulses at a rate
//! proportional to the magnitude its paired actuator is currently
//! commanding, so drive and move programs run end-to-end against a
//! [`crate::clock::ManualClock`]. [`MemoryStorage`] is a RAM stand-in for
//! the persistent tuning store.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::clock::Clock;
use crate::drivers::{Actuator, ConfigStorage, Direction, Encoder, EncoderReading};
use crate::error::{Error, Result};

// ============================================================================
// Actuator
// ============================================================================

struct ActuatorState {
    direction: Direction,
    magnitude: u8,
    history: Vec<(Direction, u8)>,
}

/// Read-side handle into a [`MockActuator`], cloneable into tests and into
/// a [`SimEncoder`].
#[derive(Clone)]
pub struct ActuatorProbe {
    state: Arc<Mutex<ActuatorState>>,
}

impl ActuatorProbe {
    pub fn magnitude(&self) -> u8 {
        self.state.lock().magnitude
    }

    pub fn direction(&self) -> Direction {
        self.state.lock().direction
    }

    /// Every `(direction, magnitude)` pair commanded so far.
    pub fn history(&self) -> Vec<(Direction, u8)> {
        self.state.lock().history.clone()
    }
}

/// Actuator that records commands instead of driving hardware.
pub struct MockActuator {
    state: Arc<Mutex<ActuatorState>>,
}

impl MockActuator {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ActuatorState {
                direction: Direction::Forward,
                magnitude: 0,
                history: Vec::new(),
            })),
        }
    }

    pub fn probe(&self) -> ActuatorProbe {
        ActuatorProbe {
            state: Arc::clone(&self.state),
        }
    }
}

impl Default for MockActuator {
    fn default() -> Self {
        Self::new()
    }
}

impl Actuator for MockActuator {
    fn begin(&mut self) {}

    fn run(&mut self, direction: Direction, magnitude: u8) {
        let mut state = self.state.lock();
        state.direction = direction;
        state.magnitude = magnitude;
        state.history.push((direction, magnitude));
    }

    fn set_magnitude(&mut self, magnitude: u8) {
        let mut state = self.state.lock();
        state.magnitude = magnitude;
        let direction = state.direction;
        state.history.push((direction, magnitude));
    }

    fn magnitude(&self) -> u8 {
        self.state.lock().magnitude
    }

    fn direction(&self) -> Direction {
        self.state.lock().direction
    }
}

// ============================================================================
// Encoder
// ============================================================================

/// Encoder that simulates a wheel responding to its actuator.
///
/// Pulse generation is lazy: every access first accrues
/// `pps_at_full * magnitude / 255` pulses over the clock time elapsed since
/// the previous access, carrying the fractional remainder. Setting the
/// stall flag freezes the count, which is how watchdog scenarios are
/// produced.
pub struct SimEncoder {
    clock: Arc<dyn Clock>,
    actuator: ActuatorProbe,
    /// Pulses per second when the actuator magnitude is 255.
    pps_at_full: f32,
    stalled: Arc<AtomicBool>,

    count: u32,
    fraction: f32,
    last_sync_ms: u32,
    last_reset_ms: u32,
}

impl SimEncoder {
    pub fn new(clock: Arc<dyn Clock>, actuator: ActuatorProbe, pps_at_full: f32) -> Self {
        let now = clock.now_ms();
        Self {
            clock,
            actuator,
            pps_at_full,
            stalled: Arc::new(AtomicBool::new(false)),
            count: 0,
            fraction: 0.0,
            last_sync_ms: now,
            last_reset_ms: now,
        }
    }

    /// Shared flag that freezes pulse generation while set.
    pub fn stall_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stalled)
    }

    fn sync(&mut self) {
        let now = self.clock.now_ms();
        let dt_ms = now.wrapping_sub(self.last_sync_ms);
        self.last_sync_ms = now;

        if self.stalled.load(Ordering::Relaxed) {
            return;
        }

        let rate = self.pps_at_full * self.actuator.magnitude() as f32 / 255.0;
        self.fraction += rate * dt_ms as f32 / 1000.0;
        let whole = self.fraction.floor();
        self.count += whole as u32;
        self.fraction -= whole;
    }
}

impl Encoder for SimEncoder {
    fn begin(&mut self) -> Result<()> {
        self.reset();
        Ok(())
    }

    fn reset(&mut self) {
        self.sync();
        self.count = 0;
        self.fraction = 0.0;
        self.last_reset_ms = self.last_sync_ms;
    }

    fn read(&mut self, reset: bool) -> EncoderReading {
        self.sync();
        let reading = EncoderReading {
            elapsed_ms: self.last_sync_ms.wrapping_sub(self.last_reset_ms),
            pulses: self.count as u16,
        };
        if reset {
            self.count = 0;
            self.last_reset_ms = self.last_sync_ms;
        }
        reading
    }
}

// ============================================================================
// Storage
// ============================================================================

/// In-memory [`ConfigStorage`].
pub struct MemoryStorage {
    data: Vec<u8>,
    fail_reads: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            data: vec![0; 64],
            fail_reads: false,
        }
    }

    /// Overwrite the whole store with `byte`, invalidating any signature.
    pub fn fill(&mut self, byte: u8) {
        self.data.fill(byte);
    }

    /// Make subsequent reads fail, as a detached or worn-out part would.
    pub fn set_fail_reads(&mut self, fail: bool) {
        self.fail_reads = fail;
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStorage for MemoryStorage {
    fn read_into(&mut self, blob: &mut [u8]) -> Result<()> {
        if self.fail_reads {
            return Err(Error::Storage("simulated read failure".to_string()));
        }
        if blob.len() > self.data.len() {
            return Err(Error::Storage(format!(
                "blob of {} bytes exceeds store of {}",
                blob.len(),
                self.data.len()
            )));
        }
        blob.copy_from_slice(&self.data[..blob.len()]);
        Ok(())
    }

    fn write(&mut self, blob: &[u8]) -> Result<()> {
        if blob.len() > self.data.len() {
            return Err(Error::Storage(format!(
                "blob of {} bytes exceeds store of {}",
                blob.len(),
                self.data.len()
            )));
        }
        self.data[..blob.len()].copy_from_slice(blob);
        Ok(())
    }
}

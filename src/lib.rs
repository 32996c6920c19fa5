//! ratha-core - motion-control core for a two-wheel differential-drive rover
//!
//! The crate turns high-level motion commands into per-wheel actuator
//! output, closing the loop around quadrature-style encoder pulses:
//!
//! - **drive**: closed-loop velocity in the unicycle model (linear speed
//!   plus turn rate), decomposed into per-wheel pulse-rate setpoints held
//!   by one PID loop per wheel.
//! - **move / spin**: open-loop, pulse-counted precision motions for
//!   close-quarters maneuvering and turning in place.
//! - **sequences**: scripted lists of drive/move/spin/pause/stop actions
//!   executed in the background.
//!
//! Everything runs cooperatively from [`RathaCore::tick`], called by the
//! application's main loop; nothing inside blocks. Hardware sits behind
//! the [`drivers`] traits, with mock implementations under
//! [`devices::mock`] for hardware-free testing.

pub mod clock;
pub mod config;
pub mod devices;
pub mod drivers;
pub mod error;
pub mod events;
pub mod kinematics;
pub mod motion;
pub mod pid;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{Config, TuningConfig, VehicleParams, WHEEL_COUNT};
pub use drivers::{Actuator, ConfigStorage, CountingEncoder, Direction, Encoder, EncoderReading, PulseHandle};
pub use error::{Error, Result};
pub use events::MotionEvent;
pub use motion::{ActionItem, MotionState, RathaCore, WheelAssembly, WheelId, PID_PERIOD_MS};
pub use pid::{Pid, PidMode, PidSense};

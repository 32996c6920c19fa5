//! Driver traits - the seams between the motion core and the platform.
//!
//! The core never touches pins, interrupts or persistent memory directly.
//! A platform supplies one [`Actuator`] and one [`Encoder`] per wheel plus a
//! [`ConfigStorage`] for the tuning blob, and the core drives them from its
//! tick loop. See [`crate::devices::mock`] for in-process implementations
//! used by the test rig.

mod actuator;
mod encoder;
mod storage;

pub use actuator::{Actuator, Direction};
pub use encoder::{CountingEncoder, Encoder, EncoderReading, PulseHandle};
pub use storage::ConfigStorage;

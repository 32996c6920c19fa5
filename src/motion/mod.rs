//! Motion control: per-wheel state machines, the core controller and the
//! action-sequence interpreter.

mod controller;
mod sequence;
mod wheel;

pub use controller::{RathaCore, WheelAssembly, PID_PERIOD_MS};
pub use sequence::ActionItem;
pub use wheel::{MotionState, WheelId};

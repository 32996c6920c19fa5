//! Device implementations.
//!
//! Real platforms implement the [`crate::drivers`] traits against their own
//! hardware; this module carries the in-process devices the crate ships
//! with: the mock rig used for hardware-free testing.

pub mod mock;

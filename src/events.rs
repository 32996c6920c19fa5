//! Motion state-change events
//!
//! The tick path performs state transitions and nothing else; anything that
//! wants to watch the machines (telemetry, tracing, tests) subscribes here
//! and reads transitions off its own channel. Publishing never blocks and a
//! dropped receiver is simply skipped.

use crossbeam_channel::{unbounded, Receiver, Sender};

use crate::motion::{MotionState, WheelId};

/// One state transition of a wheel's motion machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MotionEvent {
    pub wheel: WheelId,
    pub from: MotionState,
    pub to: MotionState,
    /// Core clock reading at the transition.
    pub at_ms: u32,
}

/// Fan-out of [`MotionEvent`]s to any number of subscribers.
#[derive(Default)]
pub struct EventBus {
    senders: Vec<Sender<MotionEvent>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new subscription. Events published after this call are
    /// delivered to the returned receiver.
    pub fn subscribe(&mut self) -> Receiver<MotionEvent> {
        let (tx, rx) = unbounded();
        self.senders.push(tx);
        rx
    }

    /// Deliver an event to all live subscribers.
    pub fn publish(&self, event: MotionEvent) {
        for sender in &self.senders {
            // a closed channel just means that observer went away
            let _ = sender.send(event);
        }
    }
}

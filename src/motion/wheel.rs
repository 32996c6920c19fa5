//! Per-wheel motion state machine
//!
//! Each wheel runs one of two motion programs:
//!
//! ```text
//! drive:  Idle -> DriveInit -> DriveKicker -> DrivePidReset -> DriveRun
//! move:   Idle -> MoveInit -> MoveRun -> Idle
//! ```
//!
//! Drive is closed-loop: after an optional open-loop kick to break static
//! friction, the PID holds the wheel at its pulse-rate setpoint until a new
//! command arrives. Move is open-loop: a fixed magnitude runs until the
//! pulse target is met, with a watchdog that bails out if the wheel stops
//! producing pulses.

use crate::config::TuningConfig;
use crate::drivers::{Actuator, Direction, Encoder};
use crate::events::{EventBus, MotionEvent};
use crate::pid::{Pid, PidMode};

/// Kicker active time in milliseconds.
pub(crate) const KICKER_ACTIVE_MS: u32 = 100;

/// Move watchdog: force Idle after this long without pulse progress.
pub(crate) const MOVE_TIMEOUT_MS: u32 = 2000;

/// Wheel identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WheelId {
    Left = 0,
    Right = 1,
}

impl WheelId {
    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Motion machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MotionState {
    /// No motion program active.
    Idle,
    /// Drive accepted; decide whether a kick is needed.
    DriveInit,
    /// Open-loop kick magnitude applied, waiting out the kick time.
    DriveKicker,
    /// Arm the PID and zero the feedback path.
    DrivePidReset,
    /// Closed-loop speed hold, one PID step per period.
    DriveRun,
    /// Precision move accepted; zero the counter and start the wheel.
    MoveInit,
    /// Counting pulses toward the move target.
    MoveRun,
}

/// Runtime state for one wheel.
pub(crate) struct WheelRuntime {
    pub id: WheelId,
    pub state: MotionState,
    pub direction: Direction,
    /// PID pulse-rate target in drive mode; PWM magnitude in move mode.
    pub setpoint: i32,
    /// Pulses remaining target for a precision move.
    pub target_pulses: u32,
    /// Clock reading of the last state event (kick start, PID step, or
    /// last observed move progress).
    pub t_last_ms: u32,
    /// Highest pulse count seen during the current move.
    last_count: u16,
}

impl WheelRuntime {
    pub fn new(id: WheelId) -> Self {
        Self {
            id,
            state: MotionState::Idle,
            direction: Direction::Forward,
            setpoint: 0,
            target_pulses: 0,
            t_last_ms: 0,
            last_count: 0,
        }
    }

    /// Enter `state`, publishing the transition.
    pub fn enter(&mut self, state: MotionState, now_ms: u32, events: &EventBus) {
        if self.state != state {
            log::debug!("Wheel {:?}: {:?} -> {:?}", self.id, self.state, state);
            events.publish(MotionEvent {
                wheel: self.id,
                from: self.state,
                to: state,
                at_ms: now_ms,
            });
            self.state = state;
        }
    }

    /// Run one evaluation of the state machine. Never blocks; time-gated
    /// transitions poll `now_ms` against the last event time.
    pub fn step(
        &mut self,
        now_ms: u32,
        actuator: &mut dyn Actuator,
        encoder: &mut dyn Encoder,
        pid: &mut Pid,
        tuning: &TuningConfig,
        events: &EventBus,
    ) {
        match self.state {
            MotionState::Idle => {}

            MotionState::DriveInit => {
                if self.setpoint < tuning.pwm_kicker as i32 {
                    // low target: break static friction open-loop first
                    actuator.run(self.direction, tuning.pwm_kicker);
                    self.t_last_ms = now_ms;
                    self.enter(MotionState::DriveKicker, now_ms, events);
                } else {
                    self.t_last_ms = now_ms.wrapping_sub(pid.period_ms());
                    self.enter(MotionState::DrivePidReset, now_ms, events);
                }
            }

            MotionState::DriveKicker => {
                if now_ms.wrapping_sub(self.t_last_ms) >= KICKER_ACTIVE_MS {
                    self.t_last_ms = now_ms.wrapping_sub(pid.period_ms());
                    self.enter(MotionState::DrivePidReset, now_ms, events);
                }
            }

            MotionState::DrivePidReset => {
                pid.set_mode(PidMode::User, now_ms);
                pid.reset(now_ms);
                encoder.reset();
                self.t_last_ms = now_ms;
                self.enter(MotionState::DriveRun, now_ms, events);
            }

            MotionState::DriveRun => {
                if now_ms.wrapping_sub(self.t_last_ms) >= pid.period_ms() {
                    let reading = encoder.read_and_reset();
                    pid.set_setpoint(self.setpoint);
                    pid.set_input(reading.pulses as i32);
                    pid.compute(now_ms);
                    actuator.run(self.direction, pid.output().clamp(0, 255) as u8);
                    self.t_last_ms = now_ms;
                }
            }

            MotionState::MoveInit => {}

            MotionState::MoveRun => {}
        }

        // Precision moves: MoveInit falls straight through to the first
        // MoveRun check, so a zero-pulse target completes within one step.
        if self.state == MotionState::MoveInit {
            encoder.reset();
            actuator.run(self.direction, self.setpoint.clamp(0, 255) as u8);
            self.last_count = 0;
            self.t_last_ms = now_ms;
            self.enter(MotionState::MoveRun, now_ms, events);
        }

        if self.state == MotionState::MoveRun {
            let reading = encoder.read(false);

            // watchdog re-arms on progress, not on a non-zero total, so a
            // wheel stalling partway through still times out
            if reading.pulses > self.last_count {
                self.last_count = reading.pulses;
                self.t_last_ms = now_ms;
            }

            let done = reading.pulses as u32 >= self.target_pulses;
            let stalled = now_ms.wrapping_sub(self.t_last_ms) >= MOVE_TIMEOUT_MS;

            if done || stalled {
                if stalled && !done {
                    log::warn!(
                        "Wheel {:?}: Move watchdog expired at {}/{} pulses",
                        self.id,
                        reading.pulses,
                        self.target_pulses
                    );
                }
                actuator.set_magnitude(0);
                self.enter(MotionState::Idle, now_ms, events);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::devices::mock::MockActuator;
    use crate::drivers::CountingEncoder;
    use std::sync::Arc;

    struct Rig {
        clock: ManualClock,
        wheel: WheelRuntime,
        actuator: MockActuator,
        encoder: CountingEncoder,
        pid: Pid,
        tuning: TuningConfig,
        events: EventBus,
    }

    fn rig() -> Rig {
        let clock = ManualClock::new();
        let encoder = CountingEncoder::new(Arc::new(clock.clone()));
        let mut pid = Pid::new(1.5, 0.0, 0.15, clock.now_ms());
        pid.set_period(250);
        pid.set_limits(40, 255);

        Rig {
            wheel: WheelRuntime::new(WheelId::Left),
            actuator: MockActuator::new(),
            encoder,
            pid,
            tuning: TuningConfig::default(),
            events: EventBus::new(),
            clock,
        }
    }

    impl Rig {
        fn step(&mut self) {
            self.wheel.step(
                self.clock.now_ms(),
                &mut self.actuator,
                &mut self.encoder,
                &mut self.pid,
                &self.tuning,
                &self.events,
            );
        }
    }

    #[test]
    fn test_drive_passes_through_kicker() {
        let mut r = rig();
        r.wheel.direction = Direction::Forward;
        r.wheel.setpoint = 15; // below the kicker level
        r.wheel.state = MotionState::DriveInit;

        r.step();
        assert_eq!(r.wheel.state, MotionState::DriveKicker);
        assert_eq!(r.actuator.probe().magnitude(), 60);

        // kick holds until its time expires
        r.clock.advance(50);
        r.step();
        assert_eq!(r.wheel.state, MotionState::DriveKicker);

        r.clock.advance(50);
        r.step();
        assert_eq!(r.wheel.state, MotionState::DrivePidReset);

        r.step();
        assert_eq!(r.wheel.state, MotionState::DriveRun);
    }

    #[test]
    fn test_drive_high_setpoint_skips_kicker() {
        let mut r = rig();
        r.wheel.setpoint = 100; // above the kicker level
        r.wheel.state = MotionState::DriveInit;

        r.step();
        assert_eq!(r.wheel.state, MotionState::DrivePidReset);
    }

    #[test]
    fn test_drive_run_steps_on_period() {
        let mut r = rig();
        let pulses = r.encoder.pulse_handle();
        r.wheel.setpoint = 15;
        r.wheel.state = MotionState::DrivePidReset;
        r.step();
        assert_eq!(r.wheel.state, MotionState::DriveRun);

        // inside the period: no PID step, output untouched
        r.clock.advance(100);
        r.step();
        assert_eq!(r.actuator.probe().magnitude(), 0);

        for _ in 0..4 {
            pulses.pulse();
        }
        r.clock.advance(150);
        r.step();

        // full period elapsed: PID stepped and drove the actuator
        let magnitude = r.actuator.probe().magnitude();
        assert!(magnitude >= 40, "magnitude {} below floor", magnitude);
        assert_eq!(r.pid.error(), 11);
    }

    #[test]
    fn test_move_completes_on_pulse_target() {
        let mut r = rig();
        let pulses = r.encoder.pulse_handle();
        r.wheel.setpoint = r.tuning.pwm_move as i32;
        r.wheel.target_pulses = 5;
        r.wheel.state = MotionState::MoveInit;

        r.step();
        assert_eq!(r.wheel.state, MotionState::MoveRun);
        assert_eq!(r.actuator.probe().magnitude(), 40);

        for _ in 0..4 {
            pulses.pulse();
        }
        r.clock.advance(100);
        r.step();
        assert_eq!(r.wheel.state, MotionState::MoveRun);

        pulses.pulse();
        r.clock.advance(100);
        r.step();
        assert_eq!(r.wheel.state, MotionState::Idle);
        assert_eq!(r.actuator.probe().magnitude(), 0);
    }

    #[test]
    fn test_move_zero_target_is_immediate() {
        let mut r = rig();
        r.wheel.setpoint = r.tuning.pwm_move as i32;
        r.wheel.target_pulses = 0;
        r.wheel.state = MotionState::MoveInit;

        r.step();
        assert_eq!(r.wheel.state, MotionState::Idle);
        assert_eq!(r.actuator.probe().magnitude(), 0);
    }

    #[test]
    fn test_move_watchdog_fires_on_silent_encoder() {
        let mut r = rig();
        r.wheel.setpoint = r.tuning.pwm_move as i32;
        r.wheel.target_pulses = 50;
        r.wheel.state = MotionState::MoveInit;
        r.step();

        for _ in 0..19 {
            r.clock.advance(100);
            r.step();
            assert_eq!(r.wheel.state, MotionState::MoveRun);
        }

        r.clock.advance(100);
        r.step();
        assert_eq!(r.wheel.state, MotionState::Idle);
        assert_eq!(r.actuator.probe().magnitude(), 0);
    }

    #[test]
    fn test_move_watchdog_fires_on_mid_move_stall() {
        let mut r = rig();
        let pulses = r.encoder.pulse_handle();
        r.wheel.setpoint = r.tuning.pwm_move as i32;
        r.wheel.target_pulses = 50;
        r.wheel.state = MotionState::MoveInit;
        r.step();

        // healthy progress for a while
        for _ in 0..10 {
            pulses.pulse();
            r.clock.advance(100);
            r.step();
            assert_eq!(r.wheel.state, MotionState::MoveRun);
        }

        // then the wheel jams with the count frozen above zero
        for _ in 0..19 {
            r.clock.advance(100);
            r.step();
            assert_eq!(r.wheel.state, MotionState::MoveRun);
        }
        r.clock.advance(100);
        r.step();
        assert_eq!(r.wheel.state, MotionState::Idle);
    }

    #[test]
    fn test_transitions_are_published() {
        let mut r = rig();
        let rx = r.events.subscribe();
        r.wheel.setpoint = r.tuning.pwm_move as i32;
        r.wheel.target_pulses = 0;
        r.wheel.state = MotionState::MoveInit;
        r.step();

        let first = rx.try_recv().unwrap();
        assert_eq!(first.from, MotionState::MoveInit);
        assert_eq!(first.to, MotionState::MoveRun);

        let second = rx.try_recv().unwrap();
        assert_eq!(second.from, MotionState::MoveRun);
        assert_eq!(second.to, MotionState::Idle);
    }
}

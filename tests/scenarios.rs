//! End-to-end scenarios for the motion core running against the mock rig.
//!
//! Geometry used throughout: ppr=40, pps_max=120, wheel diameter 65 mm,
//! base length 110 mm, PID period 250 ms (4 Hz). With those numbers a 50%
//! drive decomposes to 15 pulses per period per wheel, and a quarter-turn
//! spin at unity adjust needs 17 pulses per wheel.

use std::f32::consts::PI;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ratha_core::devices::mock::{ActuatorProbe, MemoryStorage, MockActuator, SimEncoder};
use ratha_core::{
    ActionItem, Clock, CountingEncoder, Direction, Encoder, Error, ManualClock, MotionState,
    PulseHandle, RathaCore, Result, VehicleParams, WheelAssembly, WheelId,
};

const TICK_MS: u32 = 10;

fn params() -> VehicleParams {
    VehicleParams::new(40, 120, 65.0, 110.0)
}

/// Rig with simulated wheels: encoders generate pulses in proportion to
/// the magnitude their actuator is commanding.
struct SimRig {
    core: RathaCore,
    clock: ManualClock,
    left: ActuatorProbe,
    right: ActuatorProbe,
    stall_left: Arc<AtomicBool>,
    stall_right: Arc<AtomicBool>,
}

impl SimRig {
    fn new() -> Self {
        let clock = ManualClock::new();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());

        let left_actuator = MockActuator::new();
        let right_actuator = MockActuator::new();
        let left = left_actuator.probe();
        let right = right_actuator.probe();

        let left_encoder = SimEncoder::new(Arc::clone(&shared), left.clone(), 120.0);
        let right_encoder = SimEncoder::new(Arc::clone(&shared), right.clone(), 120.0);
        let stall_left = left_encoder.stall_flag();
        let stall_right = right_encoder.stall_flag();

        let mut core = RathaCore::new(
            WheelAssembly {
                actuator: Box::new(left_actuator),
                encoder: Box::new(left_encoder),
            },
            WheelAssembly {
                actuator: Box::new(right_actuator),
                encoder: Box::new(right_encoder),
            },
            shared,
            Box::new(MemoryStorage::new()),
            params(),
        );
        core.begin().unwrap();

        Self {
            core,
            clock,
            left,
            right,
            stall_left,
            stall_right,
        }
    }

    fn run_for(&mut self, ms: u32) {
        for _ in 0..ms / TICK_MS {
            self.clock.advance(TICK_MS);
            self.core.tick();
        }
    }
}

/// Rig with manually pulsed encoders for pulse-exact assertions.
struct ManualRig {
    core: RathaCore,
    clock: ManualClock,
    left_pulses: PulseHandle,
    right_pulses: PulseHandle,
}

impl ManualRig {
    fn new() -> Self {
        let clock = ManualClock::new();
        let shared: Arc<dyn Clock> = Arc::new(clock.clone());

        let left_actuator = MockActuator::new();
        let right_actuator = MockActuator::new();
        let left_encoder = CountingEncoder::new(Arc::clone(&shared));
        let right_encoder = CountingEncoder::new(Arc::clone(&shared));
        let left_pulses = left_encoder.pulse_handle();
        let right_pulses = right_encoder.pulse_handle();

        let mut core = RathaCore::new(
            WheelAssembly {
                actuator: Box::new(left_actuator),
                encoder: Box::new(left_encoder),
            },
            WheelAssembly {
                actuator: Box::new(right_actuator),
                encoder: Box::new(right_encoder),
            },
            shared,
            Box::new(MemoryStorage::new()),
            params(),
        );
        core.begin().unwrap();

        Self {
            core,
            clock,
            left_pulses,
            right_pulses,
        }
    }

    fn tick(&mut self) {
        self.clock.advance(TICK_MS);
        self.core.tick();
    }
}

// === Scenario 1: straight forward at 50% ===

#[test]
fn straight_drive_walks_kicker_then_holds_speed() {
    let mut rig = SimRig::new();
    let events = rig.core.subscribe_events();

    rig.core.drive(50.0, 0.0);
    rig.run_for(500);

    let left_states: Vec<MotionState> = events
        .try_iter()
        .filter(|e| e.wheel == WheelId::Left)
        .map(|e| e.to)
        .collect();
    assert_eq!(
        left_states,
        vec![
            MotionState::DriveInit,
            MotionState::DriveKicker,
            MotionState::DrivePidReset,
            MotionState::DriveRun,
        ]
    );

    // settle, then both wheels should hold ~15 pulses/period, which the
    // simulated wheel produces at a magnitude near 127
    rig.run_for(10_000);
    let left = rig.left.magnitude() as i32;
    let right = rig.right.magnitude() as i32;
    assert!((110..=145).contains(&left), "left magnitude {}", left);
    assert!((110..=145).contains(&right), "right magnitude {}", right);
    assert_eq!(rig.left.direction(), Direction::Forward);
    assert_eq!(rig.right.direction(), Direction::Forward);
}

// === Scenario 2: arc right ===

#[test]
fn right_arc_runs_right_wheel_faster() {
    let mut rig = SimRig::new();

    rig.core.drive(50.0, 1.0);
    rig.run_for(10_000);

    // setpoints 12 vs 18 pulses/period: the converged magnitudes keep the
    // same ordering with a clear gap
    let left = rig.left.magnitude() as i32;
    let right = rig.right.magnitude() as i32;
    assert!(
        right >= left + 20,
        "expected right well above left, got L={} R={}",
        left,
        right
    );
    assert_eq!(rig.left.direction(), Direction::Forward);
    assert_eq!(rig.right.direction(), Direction::Forward);
}

// === Scenario 3: in-place quarter turn ===

#[test]
fn quarter_spin_counter_rotates_and_terminates() {
    let mut rig = SimRig::new();
    rig.core.set_spin_adjust(1.0);

    rig.core.spin(25.0);
    rig.core.tick();
    assert_eq!(rig.left.direction(), Direction::Forward);
    assert_eq!(rig.right.direction(), Direction::Reverse);
    assert_eq!(rig.left.magnitude(), 40); // move PWM
    assert!(rig.core.is_running());

    // 17 pulses at ~18.8 pps is under a second
    rig.run_for(2000);
    assert!(!rig.core.is_running());
    assert_eq!(rig.left.magnitude(), 0);
    assert_eq!(rig.right.magnitude(), 0);
}

// === Scenario 4: stop from motion ===

#[test]
fn stop_idles_everything_in_the_same_tick() {
    let mut rig = SimRig::new();

    rig.core.drive(60.0, 0.0);
    for _ in 0..5 {
        rig.clock.advance(TICK_MS);
        rig.core.tick();
    }
    assert!(rig.core.is_running());
    assert!(rig.left.magnitude() > 0);

    rig.core.stop();
    assert!(!rig.core.is_running());
    assert_eq!(rig.left.magnitude(), 0);
    assert_eq!(rig.right.magnitude(), 0);
    assert_eq!(rig.core.linear_velocity(), 0.0);
    assert_eq!(rig.core.angular_velocity(), 0.0);
}

// === Scenario 5: evasive back-and-spin sequence ===

#[test]
fn evasive_sequence_runs_to_completion() {
    let mut rig = SimRig::new();

    rig.core.start_sequence(&[
        ActionItem::Stop,
        ActionItem::Pause { ms: 300 },
        ActionItem::Move {
            left_rad: -PI,
            right_rad: -PI,
        },
        ActionItem::Pause { ms: 300 },
        ActionItem::Spin { fraction: -25.0 },
        ActionItem::End,
    ]);

    // the backward move must actually engage reverse
    rig.run_for(500);
    assert!(rig.core.is_running());
    assert_eq!(rig.left.direction(), Direction::Reverse);
    assert_eq!(rig.right.direction(), Direction::Reverse);

    rig.run_for(5000);
    assert!(rig.core.is_sequence_complete());
    assert!(!rig.core.is_running());
    assert_eq!(rig.left.magnitude(), 0);
    assert_eq!(rig.right.magnitude(), 0);
}

// === Scenario 6: stalled wheel watchdog ===

#[test]
fn watchdog_frees_a_stalled_move() {
    let mut rig = SimRig::new();
    let events = rig.core.subscribe_events();

    rig.stall_left.store(true, Ordering::Relaxed);
    rig.stall_right.store(true, Ordering::Relaxed);

    rig.core.move_rad(PI, PI);
    rig.run_for(1990);
    assert!(rig.core.is_running());

    rig.run_for(500);
    assert!(!rig.core.is_running());
    assert_eq!(rig.left.magnitude(), 0);
    assert_eq!(rig.right.magnitude(), 0);

    // both wheels dropped to idle right at the 2-second mark
    let idle_times: Vec<u32> = events
        .try_iter()
        .filter(|e| e.to == MotionState::Idle)
        .map(|e| e.at_ms)
        .collect();
    assert_eq!(idle_times.len(), 2);
    for t in idle_times {
        assert!((2000..=2000 + 2 * TICK_MS).contains(&t), "idled at {}ms", t);
    }
}

// === Pulse-exact move target (property: deg -> pulses round trip) ===

#[test]
fn move_deg_completes_on_the_exact_pulse() {
    let mut rig = ManualRig::new();

    // 90 degrees at 40 ppr is exactly 10 pulses
    rig.core.move_deg(90.0, 90.0);
    rig.tick();
    assert!(rig.core.is_running());

    for _ in 0..9 {
        rig.left_pulses.pulse();
        rig.right_pulses.pulse();
        rig.tick();
        assert!(rig.core.is_running(), "finished early");
    }

    rig.left_pulses.pulse();
    rig.right_pulses.pulse();
    rig.tick();
    assert!(!rig.core.is_running());
}

#[test]
fn asymmetric_move_finishes_per_wheel() {
    let mut rig = ManualRig::new();

    // left 10 pulses, right 20
    rig.core.move_deg(90.0, 180.0);
    rig.tick();

    for _ in 0..10 {
        rig.left_pulses.pulse();
        rig.right_pulses.pulse();
        rig.tick();
    }
    assert!(!rig.core.is_wheel_running(WheelId::Left));
    assert!(rig.core.is_wheel_running(WheelId::Right));

    for _ in 0..10 {
        rig.right_pulses.pulse();
        rig.tick();
    }
    assert!(!rig.core.is_running());
}

#[test]
fn move_len_rolls_one_circumference_per_revolution() {
    let mut rig = ManualRig::new();

    // one wheel circumference of travel = one revolution = 40 pulses
    rig.core.move_len(PI * 65.0);
    rig.tick();

    for _ in 0..39 {
        rig.left_pulses.pulse();
        rig.right_pulses.pulse();
        rig.tick();
        assert!(rig.core.is_running());
    }
    rig.left_pulses.pulse();
    rig.right_pulses.pulse();
    rig.tick();
    assert!(!rig.core.is_running());
}

// === Initialization failure ===

struct DeadEncoder;

impl Encoder for DeadEncoder {
    fn begin(&mut self) -> Result<()> {
        Err(Error::Encoder("no interrupt source".to_string()))
    }

    fn reset(&mut self) {}

    fn read(&mut self, _reset: bool) -> ratha_core::EncoderReading {
        ratha_core::EncoderReading {
            elapsed_ms: 0,
            pulses: 0,
        }
    }
}

#[test]
fn begin_reports_encoder_failure_but_still_operates() {
    let clock = ManualClock::new();
    let shared: Arc<dyn Clock> = Arc::new(clock.clone());

    let left_actuator = MockActuator::new();
    let left_probe = left_actuator.probe();
    let right_actuator = MockActuator::new();
    let right_encoder = CountingEncoder::new(Arc::clone(&shared));

    let mut core = RathaCore::new(
        WheelAssembly {
            actuator: Box::new(left_actuator),
            encoder: Box::new(DeadEncoder),
        },
        WheelAssembly {
            actuator: Box::new(right_actuator),
            encoder: Box::new(right_encoder),
        },
        shared,
        Box::new(MemoryStorage::new()),
        params(),
    );

    assert!(core.begin().is_err());

    // the core still accepts commands; the dead wheel just never sees
    // feedback, so its PID climbs toward the upper limit
    core.drive(50.0, 0.0);
    for _ in 0..400 {
        clock.advance(TICK_MS);
        core.tick();
    }
    assert!(core.is_running());
    assert!(left_probe.magnitude() >= 40);
}

// === Sequence restart and reuse ===

#[test]
fn sequence_can_be_restarted_after_completion() {
    let mut rig = SimRig::new();
    let patrol = [
        ActionItem::Drive {
            linear: 40.0,
            angular: 0.0,
        },
        ActionItem::Pause { ms: 200 },
        ActionItem::Stop,
        ActionItem::End,
    ];

    rig.core.start_sequence(&patrol);
    rig.run_for(1000);
    assert!(rig.core.is_sequence_complete());
    assert!(!rig.core.is_running());

    rig.core.start_sequence(&patrol);
    rig.run_for(1000);
    assert!(rig.core.is_sequence_complete());
    assert!(!rig.core.is_running());
}

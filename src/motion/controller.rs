//! Core motion controller
//!
//! [`RathaCore`] owns the two wheel machines, their PID loops and the
//! collaborator hardware, and exposes the motion API to the application:
//! closed-loop [`drive`](RathaCore::drive), open-loop precision
//! [`move_rad`](RathaCore::move_rad) and [`spin`](RathaCore::spin),
//! scripted [`start_sequence`](RathaCore::start_sequence), and
//! [`stop`](RathaCore::stop).
//!
//! Scheduling is cooperative: the application calls
//! [`tick`](RathaCore::tick) from its main loop as often as it can - at
//! least twice per PID period to keep the control cadence free of jitter.
//! A tick never blocks; every time-gated step inside is a compare against
//! the shared clock.

use std::sync::Arc;

use crossbeam_channel::Receiver;

use crate::clock::Clock;
use crate::config::{TuningConfig, VehicleParams, WHEEL_COUNT};
use crate::drivers::{Actuator, ConfigStorage, Direction, Encoder};
use crate::error::{Error, Result};
use crate::events::{EventBus, MotionEvent};
use crate::kinematics;
use crate::pid::{Pid, PidMode};

use super::sequence::{ActionItem, SequenceState};
use super::wheel::{MotionState, WheelId, WheelRuntime};

/// PID calculation period. 250 ms gives a 4 Hz control cadence, enough
/// pulses per sample at design encoder resolution for a usable measurement.
pub const PID_PERIOD_MS: u32 = 250;

/// The actuator/encoder pair for one wheel.
pub struct WheelAssembly {
    pub actuator: Box<dyn Actuator>,
    pub encoder: Box<dyn Encoder>,
}

/// Motion-control core for a two-wheel differential-drive rover.
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use ratha_core::{RathaCore, SystemClock, VehicleParams, WheelAssembly};
/// # fn wheel() -> WheelAssembly { unimplemented!() }
/// # fn storage() -> Box<dyn ratha_core::ConfigStorage> { unimplemented!() }
///
/// # fn main() -> ratha_core::Result<()> {
/// let mut core = RathaCore::new(
///     wheel(),
///     wheel(),
///     Arc::new(SystemClock::new()),
///     storage(),
///     VehicleParams::new(40, 120, 65.0, 110.0),
/// );
/// core.begin()?;
///
/// // cruise forward at half speed, bearing slightly right
/// core.drive(50.0, 0.2);
///
/// loop {
///     core.tick();
///     // ... the rest of the application loop
/// }
/// # }
/// ```
pub struct RathaCore {
    params: VehicleParams,
    tuning: TuningConfig,
    clock: Arc<dyn Clock>,

    actuators: [Box<dyn Actuator>; WHEEL_COUNT],
    encoders: [Box<dyn Encoder>; WHEEL_COUNT],
    pids: [Pid; WHEEL_COUNT],
    wheels: [WheelRuntime; WHEEL_COUNT],

    storage: Box<dyn ConfigStorage>,
    sequence: SequenceState,
    events: EventBus,

    /// Last accepted drive command: percent of full scale, signed.
    v_linear: f32,
    /// Last accepted drive command: rad/s, positive = right turn.
    v_angular: f32,
}

impl RathaCore {
    /// Assemble a controller. Hardware is not touched until
    /// [`begin`](Self::begin).
    pub fn new(
        left: WheelAssembly,
        right: WheelAssembly,
        clock: Arc<dyn Clock>,
        storage: Box<dyn ConfigStorage>,
        params: VehicleParams,
    ) -> Self {
        let now = clock.now_ms();
        let tuning = TuningConfig::default();

        let pids = [0, 1].map(|i| {
            let mut pid = Pid::new(tuning.kp[i], tuning.ki[i], tuning.kd[i], now);
            pid.set_period(PID_PERIOD_MS);
            pid.set_limits(tuning.pwm_min as i32, tuning.pwm_max as i32);
            pid
        });

        Self {
            params,
            tuning,
            clock,
            actuators: [left.actuator, right.actuator],
            encoders: [left.encoder, right.encoder],
            pids,
            wheels: [
                WheelRuntime::new(WheelId::Left),
                WheelRuntime::new(WheelId::Right),
            ],
            storage,
            sequence: SequenceState::new(),
            events: EventBus::new(),
            v_linear: 0.0,
            v_angular: 0.0,
        }
    }

    /// Initialize hardware, load the stored tuning and come to a stop.
    ///
    /// An encoder that cannot begin is reported as an error, but the
    /// controller remains usable: the affected wheel simply produces no
    /// feedback, so its PID will peg at the upper output limit.
    pub fn begin(&mut self) -> Result<()> {
        log::info!(
            "RathaCore: Initializing (ppr={}, pps_max={}, PID {}ms)",
            self.params.ppr,
            self.params.pps_max,
            PID_PERIOD_MS
        );

        for actuator in &mut self.actuators {
            actuator.begin();
        }

        let mut first_failure: Option<Error> = None;
        for (i, encoder) in self.encoders.iter_mut().enumerate() {
            if let Err(e) = encoder.begin() {
                log::warn!("RathaCore: Encoder {} failed to begin: {}", i, e);
                if first_failure.is_none() {
                    first_failure = Some(e);
                }
            }
        }

        self.load_config();
        self.stop();

        match first_failure {
            None => Ok(()),
            Some(e) => Err(e),
        }
    }

    /// Run one scheduler step: advance the active sequence, then evaluate
    /// both wheel machines against the same clock reading so their PID
    /// steps stay in phase.
    pub fn tick(&mut self) {
        let now = self.clock.now_ms();

        self.step_sequence(now);

        for i in 0..WHEEL_COUNT {
            self.wheels[i].step(
                now,
                &mut *self.actuators[i],
                &mut *self.encoders[i],
                &mut self.pids[i],
                &self.tuning,
                &self.events,
            );
        }
    }

    // === Free-running drive ===

    /// Drive along a path under closed-loop control.
    ///
    /// `v_linear` is a percentage of the full-scale speed [-100, 100],
    /// negative for reverse. `v_angular` is the turn rate in rad/s,
    /// saturated to [-pi/2, pi/2]; positive turns right. The angular term
    /// only redistributes speed between the wheels - it cannot reverse one,
    /// so turning requires nonzero linear speed (use [`spin`](Self::spin)
    /// to turn in place).
    ///
    /// Zero linear velocity is a [`stop`](Self::stop). Repeating the
    /// previous accepted command is a no-op, so the caller may invoke this
    /// every loop iteration without disturbing the control loop.
    pub fn drive(&mut self, v_linear: f32, v_angular: f32) {
        let (v, w) = kinematics::clamp_drive(v_linear, v_angular);

        if v == 0.0 {
            self.stop();
            return;
        }
        if v == self.v_linear && w == self.v_angular {
            return;
        }

        let setpoints = kinematics::drive_setpoints(&self.params, v, w, Self::pid_freq());
        log::info!(
            "RathaCore: Drive v={:.0}% w={:.3}rad/s -> sp L={} R={}",
            v,
            w,
            setpoints.left,
            setpoints.right
        );

        self.v_linear = v;
        self.v_angular = w;

        // a retune while in motion skips the kicker and goes straight to a
        // clean PID restart on both wheels
        let next = if self.is_running() {
            MotionState::DrivePidReset
        } else {
            MotionState::DriveInit
        };

        let now = self.clock.now_ms();
        let targets = [setpoints.left, setpoints.right];
        for i in 0..WHEEL_COUNT {
            self.wheels[i].direction = setpoints.direction;
            self.wheels[i].setpoint = targets[i];
            self.wheels[i].enter(next, now, &self.events);
        }
    }

    /// [`drive`](Self::drive) with the turn rate in degrees per second.
    pub fn drive_deg(&mut self, v_linear: f32, v_angular_deg: f32) {
        self.drive(v_linear, v_angular_deg.to_radians());
    }

    /// Change the linear velocity, keeping the current turn rate.
    pub fn set_linear_velocity(&mut self, v_linear: f32) {
        if v_linear == 0.0 {
            self.stop();
        } else {
            self.drive(v_linear, self.v_angular);
        }
    }

    /// Change the turn rate, keeping the current linear velocity.
    pub fn set_angular_velocity_rad(&mut self, v_angular: f32) {
        self.drive(self.v_linear, v_angular);
    }

    /// [`set_angular_velocity_rad`](Self::set_angular_velocity_rad) in
    /// degrees per second.
    pub fn set_angular_velocity_deg(&mut self, v_angular_deg: f32) {
        self.set_angular_velocity_rad(v_angular_deg.to_radians());
    }

    /// Linear velocity of the last accepted drive command (percent).
    pub fn linear_velocity(&self) -> f32 {
        self.v_linear
    }

    /// Angular velocity of the last accepted drive command (rad/s).
    pub fn angular_velocity(&self) -> f32 {
        self.v_angular
    }

    // === Precision moves ===

    /// Rotate each wheel through a set angle at the configured move
    /// magnitude, counting encoder pulses instead of closing a PID loop.
    /// Negative angle is reverse rotation. Meant for slow, close-quarters
    /// maneuvering; completion is observable via
    /// [`is_running`](Self::is_running).
    pub fn move_rad(&mut self, left_rad: f32, right_rad: f32) {
        let now = self.clock.now_ms();
        let angles = [left_rad, right_rad];

        log::info!(
            "RathaCore: Move L={:.3}rad R={:.3}rad at PWM {}",
            left_rad,
            right_rad,
            self.tuning.pwm_move
        );

        for i in 0..WHEEL_COUNT {
            self.wheels[i].direction = Direction::from_sign(angles[i]);
            self.wheels[i].setpoint = self.tuning.pwm_move as i32;
            self.wheels[i].target_pulses = kinematics::angle_to_pulses(&self.params, angles[i]);
            self.wheels[i].enter(MotionState::MoveInit, now, &self.events);
        }
    }

    /// [`move_rad`](Self::move_rad) with the angles in degrees.
    pub fn move_deg(&mut self, left_deg: f32, right_deg: f32) {
        self.move_rad(left_deg.to_radians(), right_deg.to_radians());
    }

    /// Move straight through `length` (same unit as the configured wheel
    /// diameter, negative for reverse): both wheels rotate equally.
    pub fn move_len(&mut self, length: f32) {
        let angle = kinematics::length_to_angle(&self.params, length);
        self.move_rad(angle, angle);
    }

    /// Spin in place through a signed fraction of a full turn, in percent
    /// [-100, 100]. Positive spins right: left wheel forward, right wheel
    /// reverse. Implemented as a precision move with opposite directions,
    /// derated by the configured spin adjustment for coast-down inertia.
    pub fn spin(&mut self, fraction: f32) {
        let f = fraction.clamp(-100.0, 100.0);
        let angle = kinematics::spin_angle(&self.params, f, self.tuning.spin_adjust);

        log::info!("RathaCore: Spin {:.0}% -> {:.3}rad per wheel", f, angle);

        if f >= 0.0 {
            self.move_rad(angle, -angle);
        } else {
            self.move_rad(-angle, angle);
        }
    }

    // === Stop and status ===

    /// Bring everything to an immediate stop: both machines to idle,
    /// actuator magnitudes to zero, PID loops off, velocities cleared and
    /// any running sequence cancelled. Idempotent.
    pub fn stop(&mut self) {
        let now = self.clock.now_ms();
        log::info!("RathaCore: Stop");

        self.v_linear = 0.0;
        self.v_angular = 0.0;

        for i in 0..WHEEL_COUNT {
            self.wheels[i].direction = Direction::Forward;
            self.wheels[i].setpoint = 0;
            self.wheels[i].target_pulses = 0;
            self.wheels[i].enter(MotionState::Idle, now, &self.events);
            self.pids[i].set_mode(PidMode::Off, now);
            self.actuators[i].run(Direction::Forward, 0);
        }

        self.sequence.finish();
    }

    /// True while any wheel is executing a motion program.
    pub fn is_running(&self) -> bool {
        self.wheels.iter().any(|w| w.state != MotionState::Idle)
    }

    /// True while the given wheel is executing a motion program.
    pub fn is_wheel_running(&self, wheel: WheelId) -> bool {
        self.wheels[wheel.index()].state != MotionState::Idle
    }

    /// Current motion state of the given wheel.
    pub fn wheel_state(&self, wheel: WheelId) -> MotionState {
        self.wheels[wheel.index()].state
    }

    /// Subscribe to wheel state transitions.
    pub fn subscribe_events(&mut self) -> Receiver<MotionEvent> {
        self.events.subscribe()
    }

    // === Sequences ===

    /// Begin executing a scripted sequence in the background. The items
    /// are copied; the slice may live in static or stack storage. A
    /// sequence runs until its [`ActionItem::End`] or until any
    /// [`stop`](Self::stop).
    pub fn start_sequence(&mut self, items: &[ActionItem]) {
        log::info!("RathaCore: Starting sequence of {} actions", items.len());
        self.sequence.start(items);
    }

    /// True when no sequence is active.
    pub fn is_sequence_complete(&self) -> bool {
        !self.sequence.in_sequence
    }

    /// Advance the active sequence by at most one step. Runs before the
    /// wheel machines in [`tick`](Self::tick), so an action started here
    /// is dispatched in the same tick.
    fn step_sequence(&mut self, now: u32) {
        if !self.sequence.in_sequence {
            return;
        }

        let item = match self.sequence.current() {
            Some(item) => item,
            None => {
                // ran off the end without an explicit End marker
                self.sequence.finish();
                return;
            }
        };

        match item {
            ActionItem::Drive { linear, angular } => {
                // fire and forget; drive(0, _) stops internally, which
                // would cancel us, so re-assert the sequence afterwards
                self.drive(linear, angular);
                self.sequence.in_sequence = true;
                self.sequence.advance();
            }

            ActionItem::Move { left_rad, right_rad } => {
                if !self.sequence.in_action {
                    self.move_rad(left_rad, right_rad);
                    self.sequence.in_action = true;
                } else if !self.is_running() {
                    self.sequence.in_action = false;
                    self.sequence.advance();
                }
            }

            ActionItem::Spin { fraction } => {
                if !self.sequence.in_action {
                    self.spin(fraction);
                    self.sequence.in_action = true;
                } else if !self.is_running() {
                    self.sequence.in_action = false;
                    self.sequence.advance();
                }
            }

            ActionItem::Pause { ms } => {
                if !self.sequence.in_action {
                    self.sequence.pause_start_ms = now;
                    self.sequence.in_action = true;
                } else if now.wrapping_sub(self.sequence.pause_start_ms) >= ms {
                    self.sequence.in_action = false;
                    self.sequence.advance();
                }
            }

            ActionItem::Stop => {
                self.stop();
                self.sequence.in_sequence = true;
                self.sequence.advance();
            }

            ActionItem::End => {
                log::info!("RathaCore: Sequence complete");
                self.sequence.finish();
            }
        }
    }

    // === Tuning ===

    /// Set the lower PID output limit. Rejected unless below the current
    /// maximum. The move magnitude is clipped back into range.
    pub fn set_min_pwm(&mut self, value: u8) {
        if value >= self.tuning.pwm_max {
            log::debug!(
                "RathaCore: Rejected min PWM {} (max is {})",
                value,
                self.tuning.pwm_max
            );
            return;
        }
        self.tuning.pwm_min = value;
        self.clip_move_pwm();
        self.apply_pid_limits();
    }

    /// Set the upper PID output limit. Rejected unless above the current
    /// minimum. The move magnitude is clipped back into range.
    pub fn set_max_pwm(&mut self, value: u8) {
        if value <= self.tuning.pwm_min {
            log::debug!(
                "RathaCore: Rejected max PWM {} (min is {})",
                value,
                self.tuning.pwm_min
            );
            return;
        }
        self.tuning.pwm_max = value;
        self.clip_move_pwm();
        self.apply_pid_limits();
    }

    /// Set the precision-move magnitude. Rejected outside the current
    /// [min, max] PWM range.
    pub fn set_move_pwm(&mut self, value: u8) {
        if value < self.tuning.pwm_min || value > self.tuning.pwm_max {
            log::debug!("RathaCore: Rejected move PWM {}", value);
            return;
        }
        self.tuning.pwm_move = value;
    }

    /// Set the startup kicker magnitude. Unconstrained.
    pub fn set_kicker_pwm(&mut self, value: u8) {
        self.tuning.pwm_kicker = value;
    }

    /// Set the spin inertial derating factor, in (0, 1].
    pub fn set_spin_adjust(&mut self, value: f32) {
        if !(value > 0.0 && value <= 1.0) {
            log::debug!("RathaCore: Rejected spin adjust {}", value);
            return;
        }
        self.tuning.spin_adjust = value;
    }

    /// Replace the PID gains for one wheel. Negative gains are rejected.
    pub fn set_pid(&mut self, wheel: WheelId, kp: f32, ki: f32, kd: f32) {
        let p_on = self.pids[wheel.index()].p_on();
        self.set_pid_full(wheel, kp, ki, kd, p_on);
    }

    /// Replace the PID gains and the proportional-on-error weighting for
    /// one wheel. Negative gains or `p_on` outside [0, 1] are rejected.
    pub fn set_pid_full(&mut self, wheel: WheelId, kp: f32, ki: f32, kd: f32, p_on: f32) {
        if kp < 0.0 || ki < 0.0 || kd < 0.0 || !(0.0..=1.0).contains(&p_on) {
            log::debug!(
                "RathaCore: Rejected PID tuning for {:?}: {} {} {} pOn {}",
                wheel,
                kp,
                ki,
                kd,
                p_on
            );
            return;
        }
        let i = wheel.index();
        self.tuning.kp[i] = kp;
        self.tuning.ki[i] = ki;
        self.tuning.kd[i] = kd;
        self.pids[i].set_tuning(kp, ki, kd, p_on);
    }

    /// Current PID gains `(kp, ki, kd)` for one wheel.
    pub fn pid_gains(&self, wheel: WheelId) -> (f32, f32, f32) {
        let i = wheel.index();
        (self.tuning.kp[i], self.tuning.ki[i], self.tuning.kd[i])
    }

    /// Replace the vehicle geometry. Zero values substitute the defaults.
    /// Takes effect from the next motion command.
    pub fn set_vehicle_params(&mut self, ppr: u16, pps_max: u16, wheel_diameter: f32, base_length: f32) {
        self.params = VehicleParams::new(ppr, pps_max, wheel_diameter, base_length);
    }

    pub fn vehicle_params(&self) -> &VehicleParams {
        &self.params
    }

    pub fn tuning(&self) -> &TuningConfig {
        &self.tuning
    }

    pub fn min_pwm(&self) -> u8 {
        self.tuning.pwm_min
    }

    pub fn max_pwm(&self) -> u8 {
        self.tuning.pwm_max
    }

    pub fn move_pwm(&self) -> u8 {
        self.tuning.pwm_move
    }

    pub fn kicker_pwm(&self) -> u8 {
        self.tuning.pwm_kicker
    }

    pub fn spin_adjust(&self) -> f32 {
        self.tuning.spin_adjust
    }

    // === Configuration persistence ===

    /// Reload tuning from the persistent store, falling back to (and
    /// re-writing) defaults when the store is missing or corrupt. Returns
    /// true if defaults were loaded.
    pub fn load_config(&mut self) -> bool {
        let (tuning, defaults_loaded) = TuningConfig::load(&mut *self.storage);
        self.tuning = tuning;
        self.apply_pid_limits();
        for i in 0..WHEEL_COUNT {
            let p_on = self.pids[i].p_on();
            self.pids[i].set_tuning(self.tuning.kp[i], self.tuning.ki[i], self.tuning.kd[i], p_on);
        }
        defaults_loaded
    }

    /// Write the current tuning to the persistent store.
    pub fn save_config(&mut self) -> Result<()> {
        self.tuning.save(&mut *self.storage)
    }

    // === Internals ===

    fn pid_freq() -> f32 {
        1000.0 / PID_PERIOD_MS as f32
    }

    fn clip_move_pwm(&mut self) {
        let clipped = self.tuning.pwm_move.clamp(self.tuning.pwm_min, self.tuning.pwm_max);
        if clipped != self.tuning.pwm_move {
            log::debug!(
                "RathaCore: Move PWM clipped {} -> {}",
                self.tuning.pwm_move,
                clipped
            );
            self.tuning.pwm_move = clipped;
        }
    }

    fn apply_pid_limits(&mut self) {
        for pid in &mut self.pids {
            pid.set_limits(self.tuning.pwm_min as i32, self.tuning.pwm_max as i32);
        }
    }
}

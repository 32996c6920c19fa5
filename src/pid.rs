//! Discrete PID controller in incremental (velocity) form
//!
//! Each step computes a *change* in control output from the error and the
//! change in measurement, then clamps the accumulated output:
//!
//! ```text
//! dco = kpi * (sp - cv) - kpd * (cv - prev_cv)
//! co  = clamp(prev_co + dco, out_min, out_max)
//! ```
//!
//! with `kpi = Kp*pOn + Ki*dt` and `kpd = Kp*(1-pOn) + Kd/dt`. The `pOn`
//! factor blends proportional-on-error (1.0, the default) with
//! proportional-on-measurement (0.0); derivative always acts on the
//! measurement. Because the clamp applies to the carried output as well,
//! the integral term cannot wind up past the limits, and gain or setpoint
//! changes mid-run are safe.

/// Controller execution mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidMode {
    /// Never compute; output is whatever the caller manages it to be.
    Off,
    /// Track time internally and step once per period.
    Auto,
    /// Step whenever [`Pid::compute`] is called; the caller owns the cadence.
    User,
}

/// Relationship between control output and measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PidSense {
    /// More output raises the measurement (a motor).
    Direct,
    /// More output lowers the measurement.
    Reverse,
}

/// Default calculation period in milliseconds.
pub const DEFAULT_PERIOD_MS: u32 = 100;

/// Single-loop PID state.
///
/// Signals (setpoint, measurement, output) are integers - encoder pulses in
/// and PWM counts out. Gains and the carried output are kept in f32 so that
/// small gains do not quantize to a dead band.
pub struct Pid {
    // user-supplied gains, reported back by the getters
    user_kp: f32,
    user_ki: f32,
    user_kd: f32,
    p_on: f32,

    // effective per-step gains, sense sign applied
    kpi: f32,
    kpd: f32,

    mode: PidMode,
    sense: PidSense,
    period_ms: u32,
    last_ms: u32,

    out_min: i32,
    out_max: i32,

    setpoint: i32,
    input: i32,
    output: i32,

    prev_input: i32,
    prev_output: f32,
    error: i32,
}

impl Pid {
    /// Create a controller with the given gains, defaulting to
    /// proportional-on-error (`pOn = 1.0`), direct sense, mode [`PidMode::Off`],
    /// output limits [0, 255] and a 100 ms period.
    ///
    /// The controller never reads a clock itself; `now_ms` here and in
    /// [`compute`](Self::compute) come from whatever [`crate::clock::Clock`]
    /// the owner ticks with.
    pub fn new(kp: f32, ki: f32, kd: f32, now_ms: u32) -> Self {
        let mut pid = Self {
            user_kp: 0.0,
            user_ki: 0.0,
            user_kd: 0.0,
            p_on: 1.0,
            kpi: 0.0,
            kpd: 0.0,
            mode: PidMode::Off,
            sense: PidSense::Direct,
            period_ms: DEFAULT_PERIOD_MS,
            last_ms: now_ms.wrapping_sub(DEFAULT_PERIOD_MS),
            out_min: 0,
            out_max: 255,
            setpoint: 0,
            input: 0,
            output: 0,
            prev_input: 0,
            prev_output: 0.0,
            error: 0,
        };
        pid.set_tuning(kp, ki, kd, 1.0);
        pid
    }

    /// Perform the next calculation step if one is due.
    ///
    /// In [`PidMode::Auto`] a step runs only when the period has elapsed
    /// since the last one; in [`PidMode::User`] it runs unconditionally, the
    /// elapsed time assumed to equal the period; in [`PidMode::Off`] it
    /// never runs.
    ///
    /// Returns true if a step was performed.
    pub fn compute(&mut self, now_ms: u32) -> bool {
        match self.mode {
            PidMode::Off => return false,
            PidMode::Auto => {
                if now_ms.wrapping_sub(self.last_ms) < self.period_ms {
                    return false;
                }
            }
            PidMode::User => {}
        }

        let d_input = self.input - self.prev_input;
        self.error = self.setpoint - self.input;

        let delta = self.kpi * self.error as f32 - self.kpd * d_input as f32;
        self.prev_output = self.clamp(self.prev_output + delta);
        self.output = self.prev_output.round() as i32;

        self.prev_input = self.input;
        self.last_ms = now_ms;

        true
    }

    /// Snap the internal state to the current signals: the next step starts
    /// from here with no accumulated history.
    pub fn reset(&mut self, now_ms: u32) {
        self.prev_input = self.input;
        self.prev_output = self.clamp(self.output as f32);
        self.error = 0;
        self.last_ms = now_ms;
    }

    /// Replace the gains and the proportional-on-error weighting.
    ///
    /// Negative gains and `p_on` outside [0, 1] are rejected and the
    /// current values retained.
    pub fn set_tuning(&mut self, kp: f32, ki: f32, kd: f32, p_on: f32) {
        if kp < 0.0 || ki < 0.0 || kd < 0.0 || !(0.0..=1.0).contains(&p_on) {
            log::debug!(
                "Pid: Rejected tuning kp={} ki={} kd={} pOn={}",
                kp,
                ki,
                kd,
                p_on
            );
            return;
        }

        self.user_kp = kp;
        self.user_ki = ki;
        self.user_kd = kd;
        self.p_on = p_on;
        self.refresh_gains();
    }

    /// Change the calculation period, preserving steady-state behavior by
    /// rescaling the integral and derivative contributions. Zero is rejected.
    pub fn set_period(&mut self, period_ms: u32) {
        if period_ms == 0 {
            log::debug!("Pid: Rejected zero period");
            return;
        }
        self.period_ms = period_ms;
        self.refresh_gains();
    }

    /// Change the output clamp. `min >= max` is rejected. When the
    /// controller is running, the current output and the carried output are
    /// re-clamped immediately.
    pub fn set_limits(&mut self, min: i32, max: i32) {
        if min >= max {
            log::debug!("Pid: Rejected limits [{}, {}]", min, max);
            return;
        }

        self.out_min = min;
        self.out_max = max;

        if self.mode != PidMode::Off {
            self.output = self.output.clamp(min, max);
            self.prev_output = self.clamp(self.prev_output);
        }
    }

    /// Change the execution mode. Leaving [`PidMode::Off`] resets the
    /// controller so it resumes bumplessly from the current signals.
    pub fn set_mode(&mut self, mode: PidMode, now_ms: u32) {
        if self.mode == PidMode::Off && mode != PidMode::Off {
            self.reset(now_ms);
        }
        self.mode = mode;
    }

    /// Flip between direct and reverse action.
    pub fn set_sense(&mut self, sense: PidSense) {
        if sense != self.sense {
            self.sense = sense;
            self.refresh_gains();
        }
    }

    pub fn set_setpoint(&mut self, setpoint: i32) {
        self.setpoint = setpoint;
    }

    pub fn set_input(&mut self, input: i32) {
        self.input = input;
    }

    pub fn setpoint(&self) -> i32 {
        self.setpoint
    }

    pub fn output(&self) -> i32 {
        self.output
    }

    /// Error from the last step.
    pub fn error(&self) -> i32 {
        self.error
    }

    /// User gains as supplied, `(kp, ki, kd)`.
    pub fn tuning(&self) -> (f32, f32, f32) {
        (self.user_kp, self.user_ki, self.user_kd)
    }

    pub fn p_on(&self) -> f32 {
        self.p_on
    }

    pub fn period_ms(&self) -> u32 {
        self.period_ms
    }

    pub fn mode(&self) -> PidMode {
        self.mode
    }

    pub fn sense(&self) -> PidSense {
        self.sense
    }

    pub fn limits(&self) -> (i32, i32) {
        (self.out_min, self.out_max)
    }

    /// Recompute the effective per-step gains from the user gains, the
    /// current period and the sense.
    fn refresh_gains(&mut self) {
        let dt = self.period_ms as f32 / 1000.0;
        let ki = self.user_ki * dt;
        let kd = self.user_kd / dt;

        self.kpi = self.user_kp * self.p_on + ki;
        self.kpd = self.user_kp * (1.0 - self.p_on) + kd;

        if self.sense == PidSense::Reverse {
            self.kpi = -self.kpi;
            self.kpd = -self.kpd;
        }
    }

    fn clamp(&self, value: f32) -> f32 {
        value.clamp(self.out_min as f32, self.out_max as f32)
    }
}

//! Vehicle geometry, tuning parameters and their persistence
//!
//! # Configuration File Format
//!
//! The optional configuration file is TOML-formatted:
//!
//! ```toml
//! [vehicle]
//! ppr = 40              # encoder pulses per wheel revolution
//! pps_max = 120         # pulses per second at full output
//! wheel_diameter = 65.0 # mm
//! base_length = 110.0   # mm, wheel center to wheel center
//!
//! [tuning]
//! pwm_min = 40
//! pwm_max = 255
//! pwm_move = 40
//! pwm_kicker = 60
//! spin_adjust = 0.75
//! kp = [1.5, 1.5]       # per wheel [left, right]
//! ki = [0.0, 0.0]
//! kd = [0.15, 0.15]
//! ```
//!
//! Every key is optional; omitted keys take the documented defaults.
//!
//! # Persistent Tuning Blob
//!
//! Runtime tuning changes survive power cycles through a fixed 34-byte blob
//! written via [`ConfigStorage`]:
//!
//! ```text
//! [sig0, sig1, pwm_min, pwm_max, pwm_move, pwm_kicker,
//!  spin_adjust (f32 LE),
//!  Kp[0], Ki[0], Kd[0], Kp[1], Ki[1], Kd[1] (each f32 LE)]
//! ```
//!
//! A signature mismatch on load means the store is empty or corrupt:
//! defaults are written back and returned.

use std::f32::consts::PI;

use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::drivers::ConfigStorage;
use crate::error::{Error, Result};

/// Number of wheels. The core is built around a differential pair.
pub const WHEEL_COUNT: usize = 2;

/// Blob signature bytes; bumped when the layout changes.
const BLOB_SIG: [u8; 2] = [0xaa, 0x33];

/// Persistent blob length in bytes.
pub const BLOB_LEN: usize = 6 + 4 + WHEEL_COUNT * 3 * 4;

// Vehicle geometry defaults (a common 2WD chassis with slotted-disc
// encoders). A zero passed for any primary parameter substitutes these.
const PPR_DEFAULT: u16 = 40;
const PPS_MAX_DEFAULT: u16 = 120;
const WHEEL_DIAMETER_DEFAULT: f32 = 65.0;
const BASE_LENGTH_DEFAULT: f32 = 110.0;

// Tuning defaults.
const PWM_MIN_DEFAULT: u8 = 40;
const PWM_MAX_DEFAULT: u8 = 255;
const PWM_MOVE_DEFAULT: u8 = 40;
const PWM_KICKER_DEFAULT: u8 = 60;
const SPIN_ADJUST_DEFAULT: f32 = 0.75;
const KP_DEFAULT: f32 = 1.5;
const KI_DEFAULT: f32 = 0.0;
const KD_DEFAULT: f32 = 0.15;

/// Physical vehicle parameters, fixed for the life of a controller.
///
/// The derived pulse-space values are what the kinematics actually use:
/// converting both the wheel diameter and the base length into encoder
/// pulses lets every transform cancel the length unit out.
#[derive(Debug, Clone, Copy)]
pub struct VehicleParams {
    /// Encoder pulses per wheel revolution.
    pub ppr: u16,
    /// Encoder pulses per second at full actuator magnitude.
    pub pps_max: u16,
    /// Wheel diameter (mm, or any length unit used consistently).
    pub wheel_diameter: f32,
    /// Distance between wheel centers (same unit as `wheel_diameter`).
    pub base_length: f32,

    /// Distance traveled per encoder pulse.
    pub length_per_pulse: f32,
    /// Wheel diameter expressed in pulses.
    pub diameter_pulses: f32,
    /// Base length expressed in pulses.
    pub base_pulses: f32,
}

impl VehicleParams {
    /// Build parameters, substituting the documented default for any zero
    /// value, and compute the derived pulse geometry.
    pub fn new(ppr: u16, pps_max: u16, wheel_diameter: f32, base_length: f32) -> Self {
        let ppr = if ppr == 0 { PPR_DEFAULT } else { ppr };
        let pps_max = if pps_max == 0 { PPS_MAX_DEFAULT } else { pps_max };
        let wheel_diameter = if wheel_diameter <= 0.0 {
            WHEEL_DIAMETER_DEFAULT
        } else {
            wheel_diameter
        };
        let base_length = if base_length <= 0.0 {
            BASE_LENGTH_DEFAULT
        } else {
            base_length
        };

        let length_per_pulse = (PI * wheel_diameter) / ppr as f32;

        let params = Self {
            ppr,
            pps_max,
            wheel_diameter,
            base_length,
            length_per_pulse,
            diameter_pulses: wheel_diameter / length_per_pulse,
            base_pulses: base_length / length_per_pulse,
        };

        log::debug!(
            "VehicleParams: ppr={}, pps_max={}, wheel dia {:.1} ({:.2}p), base {:.1} ({:.2}p)",
            params.ppr,
            params.pps_max,
            params.wheel_diameter,
            params.diameter_pulses,
            params.base_length,
            params.base_pulses
        );

        params
    }
}

impl Default for VehicleParams {
    fn default() -> Self {
        Self::new(0, 0, 0.0, 0.0)
    }
}

/// Tunable control parameters, persisted as a signed blob.
#[derive(Debug, Clone, PartialEq)]
pub struct TuningConfig {
    /// Lower clamp for PID output.
    pub pwm_min: u8,
    /// Upper clamp for PID output.
    pub pwm_max: u8,
    /// Open-loop magnitude used by precision moves.
    pub pwm_move: u8,
    /// Startup magnitude used to overcome static friction.
    pub pwm_kicker: u8,
    /// Inertial derating factor for spin pulse targets, in (0, 1].
    pub spin_adjust: f32,
    /// Proportional gain per wheel [left, right].
    pub kp: [f32; WHEEL_COUNT],
    /// Integral gain per wheel.
    pub ki: [f32; WHEEL_COUNT],
    /// Derivative gain per wheel.
    pub kd: [f32; WHEEL_COUNT],
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            pwm_min: PWM_MIN_DEFAULT,
            pwm_max: PWM_MAX_DEFAULT,
            pwm_move: PWM_MOVE_DEFAULT,
            pwm_kicker: PWM_KICKER_DEFAULT,
            spin_adjust: SPIN_ADJUST_DEFAULT,
            kp: [KP_DEFAULT; WHEEL_COUNT],
            ki: [KI_DEFAULT; WHEEL_COUNT],
            kd: [KD_DEFAULT; WHEEL_COUNT],
        }
    }
}

impl TuningConfig {
    /// Serialize to the fixed persistent layout.
    pub fn encode(&self) -> [u8; BLOB_LEN] {
        let mut blob = [0u8; BLOB_LEN];
        blob[0] = BLOB_SIG[0];
        blob[1] = BLOB_SIG[1];
        blob[2] = self.pwm_min;
        blob[3] = self.pwm_max;
        blob[4] = self.pwm_move;
        blob[5] = self.pwm_kicker;
        blob[6..10].copy_from_slice(&self.spin_adjust.to_le_bytes());

        let mut at = 10;
        for wheel in 0..WHEEL_COUNT {
            blob[at..at + 4].copy_from_slice(&self.kp[wheel].to_le_bytes());
            blob[at + 4..at + 8].copy_from_slice(&self.ki[wheel].to_le_bytes());
            blob[at + 8..at + 12].copy_from_slice(&self.kd[wheel].to_le_bytes());
            at += 12;
        }

        blob
    }

    /// Deserialize from the persistent layout.
    ///
    /// Returns `None` on a signature mismatch or values that cannot have
    /// come from a valid save (inverted limits, negative or non-finite
    /// gains), which all mean the store content is unusable.
    pub fn decode(blob: &[u8]) -> Option<Self> {
        if blob.len() < BLOB_LEN || blob[0] != BLOB_SIG[0] || blob[1] != BLOB_SIG[1] {
            return None;
        }

        let f32_at = |at: usize| f32::from_le_bytes([blob[at], blob[at + 1], blob[at + 2], blob[at + 3]]);

        let mut cfg = Self {
            pwm_min: blob[2],
            pwm_max: blob[3],
            pwm_move: blob[4],
            pwm_kicker: blob[5],
            spin_adjust: f32_at(6),
            ..Self::default()
        };

        let mut at = 10;
        for wheel in 0..WHEEL_COUNT {
            cfg.kp[wheel] = f32_at(at);
            cfg.ki[wheel] = f32_at(at + 4);
            cfg.kd[wheel] = f32_at(at + 8);
            at += 12;
        }

        if cfg.pwm_min >= cfg.pwm_max {
            return None;
        }
        if !(cfg.spin_adjust > 0.0 && cfg.spin_adjust <= 1.0) {
            return None;
        }
        for wheel in 0..WHEEL_COUNT {
            for g in [cfg.kp[wheel], cfg.ki[wheel], cfg.kd[wheel]] {
                if !g.is_finite() || g < 0.0 {
                    return None;
                }
            }
        }

        Some(cfg)
    }

    /// Load from the store.
    ///
    /// On a missing or corrupt blob the defaults are written back and
    /// returned; the second element reports whether that happened.
    pub fn load(storage: &mut dyn ConfigStorage) -> (Self, bool) {
        let mut blob = [0u8; BLOB_LEN];

        let decoded = match storage.read_into(&mut blob) {
            Ok(()) => Self::decode(&blob),
            Err(e) => {
                log::warn!("TuningConfig: Store read failed: {}", e);
                None
            }
        };

        match decoded {
            Some(cfg) => (cfg, false),
            None => {
                log::info!("TuningConfig: No valid stored config, writing defaults");
                let cfg = Self::default();
                if let Err(e) = storage.write(&cfg.encode()) {
                    log::warn!("TuningConfig: Defaults write failed: {}", e);
                }
                (cfg, true)
            }
        }
    }

    /// Write the current values to the store.
    pub fn save(&self, storage: &mut dyn ConfigStorage) -> Result<()> {
        storage.write(&self.encode())
    }
}

// ============================================================================
// TOML configuration file
// ============================================================================

fn default_ppr() -> u16 {
    PPR_DEFAULT
}
fn default_pps_max() -> u16 {
    PPS_MAX_DEFAULT
}
fn default_wheel_diameter() -> f32 {
    WHEEL_DIAMETER_DEFAULT
}
fn default_base_length() -> f32 {
    BASE_LENGTH_DEFAULT
}

/// `[vehicle]` section of the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct VehicleSection {
    #[serde(default = "default_ppr")]
    pub ppr: u16,
    #[serde(default = "default_pps_max")]
    pub pps_max: u16,
    #[serde(default = "default_wheel_diameter")]
    pub wheel_diameter: f32,
    #[serde(default = "default_base_length")]
    pub base_length: f32,
}

impl Default for VehicleSection {
    fn default() -> Self {
        Self {
            ppr: PPR_DEFAULT,
            pps_max: PPS_MAX_DEFAULT,
            wheel_diameter: WHEEL_DIAMETER_DEFAULT,
            base_length: BASE_LENGTH_DEFAULT,
        }
    }
}

fn default_pwm_min() -> u8 {
    PWM_MIN_DEFAULT
}
fn default_pwm_max() -> u8 {
    PWM_MAX_DEFAULT
}
fn default_pwm_move() -> u8 {
    PWM_MOVE_DEFAULT
}
fn default_pwm_kicker() -> u8 {
    PWM_KICKER_DEFAULT
}
fn default_spin_adjust() -> f32 {
    SPIN_ADJUST_DEFAULT
}
fn default_kp() -> [f32; WHEEL_COUNT] {
    [KP_DEFAULT; WHEEL_COUNT]
}
fn default_ki() -> [f32; WHEEL_COUNT] {
    [KI_DEFAULT; WHEEL_COUNT]
}
fn default_kd() -> [f32; WHEEL_COUNT] {
    [KD_DEFAULT; WHEEL_COUNT]
}

/// `[tuning]` section of the configuration file.
#[derive(Debug, Clone, Deserialize)]
pub struct TuningSection {
    #[serde(default = "default_pwm_min")]
    pub pwm_min: u8,
    #[serde(default = "default_pwm_max")]
    pub pwm_max: u8,
    #[serde(default = "default_pwm_move")]
    pub pwm_move: u8,
    #[serde(default = "default_pwm_kicker")]
    pub pwm_kicker: u8,
    #[serde(default = "default_spin_adjust")]
    pub spin_adjust: f32,
    #[serde(default = "default_kp")]
    pub kp: [f32; WHEEL_COUNT],
    #[serde(default = "default_ki")]
    pub ki: [f32; WHEEL_COUNT],
    #[serde(default = "default_kd")]
    pub kd: [f32; WHEEL_COUNT],
}

impl Default for TuningSection {
    fn default() -> Self {
        Self {
            pwm_min: PWM_MIN_DEFAULT,
            pwm_max: PWM_MAX_DEFAULT,
            pwm_move: PWM_MOVE_DEFAULT,
            pwm_kicker: PWM_KICKER_DEFAULT,
            spin_adjust: SPIN_ADJUST_DEFAULT,
            kp: default_kp(),
            ki: default_ki(),
            kd: default_kd(),
        }
    }
}

/// Root configuration file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub vehicle: VehicleSection,
    #[serde(default)]
    pub tuning: TuningSection,
}

impl Config {
    /// Load and validate a TOML configuration file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("Failed to read config: {}", e)))?;

        let config: Config = basic_toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let t = &self.tuning;

        if t.pwm_min >= t.pwm_max {
            return Err(Error::Config(format!(
                "pwm_min ({}) must be below pwm_max ({})",
                t.pwm_min, t.pwm_max
            )));
        }
        if t.pwm_move < t.pwm_min || t.pwm_move > t.pwm_max {
            return Err(Error::Config(format!(
                "pwm_move ({}) must be within [{}, {}]",
                t.pwm_move, t.pwm_min, t.pwm_max
            )));
        }
        if !(t.spin_adjust > 0.0 && t.spin_adjust <= 1.0) {
            return Err(Error::Config(format!(
                "spin_adjust ({}) must be in (0, 1]",
                t.spin_adjust
            )));
        }
        for wheel in 0..WHEEL_COUNT {
            for (name, g) in [("kp", t.kp[wheel]), ("ki", t.ki[wheel]), ("kd", t.kd[wheel])] {
                if !g.is_finite() || g < 0.0 {
                    return Err(Error::Config(format!(
                        "{}[{}] must be a non-negative number (got {})",
                        name, wheel, g
                    )));
                }
            }
        }

        Ok(())
    }

    /// Vehicle parameters described by this file.
    pub fn vehicle_params(&self) -> VehicleParams {
        VehicleParams::new(
            self.vehicle.ppr,
            self.vehicle.pps_max,
            self.vehicle.wheel_diameter,
            self.vehicle.base_length,
        )
    }

    /// Tuning values described by this file.
    pub fn tuning_config(&self) -> TuningConfig {
        TuningConfig {
            pwm_min: self.tuning.pwm_min,
            pwm_max: self.tuning.pwm_max,
            pwm_move: self.tuning.pwm_move,
            pwm_kicker: self.tuning.pwm_kicker,
            spin_adjust: self.tuning.spin_adjust,
            kp: self.tuning.kp,
            ki: self.tuning.ki,
            kd: self.tuning.kd,
        }
    }
}

//! Stateless unicycle / differential-wheel transforms
//!
//! The unicycle model describes vehicle motion as a linear velocity V and a
//! rotation rate w about the midpoint of the wheel axis. Steering a
//! differential pair means translating (V, w) into independent wheel rates:
//!
//! ```text
//! vL = V - w*B/2
//! vR = V + w*B/2
//! ```
//!
//! where B is the base length between the wheel centers. With B expressed
//! in encoder pulses, the wheel rates fall straight out in pulses per
//! second and every length unit cancels.
//!
//! Conventions fixed here and relied on throughout the crate:
//! - V > 0 is forward, V < 0 reverse.
//! - w > 0 turns right, and the right wheel runs faster.
//! - Direction follows the sign of V alone; the angular term changes the
//!   split between the wheels but can never reverse one. Turning in place
//!   is the separate spin primitive.

use std::f32::consts::{PI, TAU};

use crate::config::VehicleParams;
use crate::drivers::Direction;

/// Per-wheel PID setpoints produced from one drive command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WheelSetpoints {
    /// Left wheel target in pulses per PID period.
    pub left: i32,
    /// Right wheel target in pulses per PID period.
    pub right: i32,
    /// Common direction, from the sign of the linear velocity.
    pub direction: Direction,
}

/// Saturate a drive command into its accepted range:
/// linear to [-100, 100] percent, angular to [-pi/2, pi/2] rad/s.
pub fn clamp_drive(v_linear: f32, v_angular: f32) -> (f32, f32) {
    (
        v_linear.clamp(-100.0, 100.0),
        v_angular.clamp(-PI / 2.0, PI / 2.0),
    )
}

/// Decompose a clamped (linear, angular) command into wheel setpoints.
///
/// The base rate and the half-differential are rounded separately, so the
/// setpoint sum depends only on the linear velocity: a pure steering change
/// redistributes pulses between the wheels without changing their total.
///
/// # Arguments
/// * `v_linear` - percent of `pps_max`, [-100, 100]
/// * `v_angular` - rad/s, [-pi/2, pi/2], positive = right turn
/// * `pid_freq` - PID steps per second
pub fn drive_setpoints(
    params: &VehicleParams,
    v_linear: f32,
    v_angular: f32,
    pid_freq: f32,
) -> WheelSetpoints {
    // percent of full scale to pulses per second, then per PID period
    let pps = params.pps_max as f32 * v_linear.abs() / 100.0;
    let base = (pps / pid_freq).round() as i32;

    // differential split, half to each side
    let half = (v_angular * params.base_pulses / 2.0 / pid_freq).round() as i32;

    WheelSetpoints {
        left: base - half,
        right: base + half,
        direction: Direction::from_sign(v_linear),
    }
}

/// Encoder pulses for a wheel rotation through `angle` radians.
pub fn angle_to_pulses(params: &VehicleParams, angle: f32) -> u32 {
    (angle.abs() * params.ppr as f32 / TAU).round() as u32
}

/// Wheel rotation angle (radians) that rolls the wheel `length` along the
/// ground. Sign is preserved.
pub fn length_to_angle(params: &VehicleParams, length: f32) -> f32 {
    // circumference = pi * d, so angle = 2 * length / d
    2.0 * length / params.wheel_diameter
}

/// Per-wheel rotation angle for an in-place spin through `fraction` percent
/// of a full vehicle turn.
///
/// Each wheel travels an arc of (|fraction|/100) * pi * base_length, derated
/// by `spin_adjust` to allow for the vehicle coasting after power-off.
/// The caller applies the signs: fraction > 0 runs the left wheel forward
/// and the right wheel in reverse.
pub fn spin_angle(params: &VehicleParams, fraction: f32, spin_adjust: f32) -> f32 {
    TAU * (fraction.abs() / 100.0) * (params.base_pulses / params.diameter_pulses) * spin_adjust
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const PID_FREQ: f32 = 4.0;

    fn params() -> VehicleParams {
        VehicleParams::new(40, 120, 65.0, 110.0)
    }

    #[test]
    fn test_straight_drive_splits_evenly() {
        let sp = drive_setpoints(&params(), 50.0, 0.0, PID_FREQ);
        assert_eq!(sp.left, 15);
        assert_eq!(sp.right, 15);
        assert_eq!(sp.direction, Direction::Forward);
    }

    #[test]
    fn test_right_arc_speeds_right_wheel() {
        let sp = drive_setpoints(&params(), 50.0, 1.0, PID_FREQ);
        assert_eq!(sp.left, 12);
        assert_eq!(sp.right, 18);
        assert_eq!(sp.direction, Direction::Forward);
    }

    #[test]
    fn test_reverse_direction_follows_linear_sign() {
        let sp = drive_setpoints(&params(), -50.0, 1.0, PID_FREQ);
        assert_eq!(sp.direction, Direction::Reverse);
        // magnitude split identical to the forward case
        assert_eq!(sp.left + sp.right, 30);
    }

    #[test]
    fn test_setpoint_sum_invariant_to_angular() {
        let p = params();
        for v in [10.0, 35.0, 50.0, 72.0, 100.0] {
            let straight = drive_setpoints(&p, v, 0.0, PID_FREQ);
            for w in [-1.5, -1.0, -0.25, 0.0, 0.4, 1.0, 1.5] {
                let sp = drive_setpoints(&p, v, w, PID_FREQ);
                assert_eq!(
                    sp.left + sp.right,
                    straight.left + straight.right,
                    "sum changed for v={} w={}",
                    v,
                    w
                );
            }
        }
    }

    #[test]
    fn test_setpoint_difference_tracks_angular() {
        let p = params();
        for w in [-1.5, -1.0, -0.25, 0.0, 0.4, 1.0, 1.5f32] {
            let sp = drive_setpoints(&p, 60.0, w, PID_FREQ);
            let expected = (w * p.base_pulses / PID_FREQ).round() as i32;
            assert!(
                ((sp.right - sp.left) - expected).abs() <= 1,
                "diff {} vs expected {} for w={}",
                sp.right - sp.left,
                expected,
                w
            );
        }
    }

    #[test]
    fn test_angle_to_pulses() {
        let p = params();
        // one full wheel revolution = ppr pulses
        assert_eq!(angle_to_pulses(&p, TAU), 40);
        assert_eq!(angle_to_pulses(&p, -TAU), 40);
        assert_eq!(angle_to_pulses(&p, PI), 20);
        assert_eq!(angle_to_pulses(&p, 0.0), 0);
        // 90 degrees
        assert_eq!(angle_to_pulses(&p, PI / 2.0), 10);
    }

    #[test]
    fn test_length_to_angle_round_trip() {
        let p = params();
        // one circumference of travel is one revolution
        let angle = length_to_angle(&p, PI * 65.0);
        assert_relative_eq!(angle, TAU, epsilon = 1e-4);

        assert!(length_to_angle(&p, -50.0) < 0.0);
    }

    #[test]
    fn test_spin_quarter_turn_pulses() {
        let p = params();
        let angle = spin_angle(&p, 25.0, 1.0);
        assert_relative_eq!(angle, 2.658, epsilon = 0.01);
        assert_eq!(angle_to_pulses(&p, angle), 17);
    }

    #[test]
    fn test_spin_adjust_derates() {
        let p = params();
        let full = spin_angle(&p, 25.0, 1.0);
        let derated = spin_angle(&p, 25.0, 0.75);
        assert_relative_eq!(derated, full * 0.75, epsilon = 1e-5);
    }

    #[test]
    fn test_clamp_drive_saturates() {
        let (v, w) = clamp_drive(101.0, 0.0);
        assert_relative_eq!(v, 100.0);
        assert_relative_eq!(w, 0.0);

        let (v, w) = clamp_drive(-200.0, 5.0);
        assert_relative_eq!(v, -100.0);
        assert_relative_eq!(w, PI / 2.0);
    }
}

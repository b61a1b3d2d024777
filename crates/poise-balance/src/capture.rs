//! Linear inverted pendulum relations used by the capture-point optimizer.
//!
//! ```text
//! ICP           ξ = x + ẋ / ω
//! perfect CMP   r = ξ_d − ξ̇_d / ω
//! CoM force     F = [m ω² (x − r), m g]
//! ```

use nalgebra::{Vector2, Vector3};

use crate::types::CaptureState;

/// Natural frequency of a pendulum of height `com_height`.
pub fn omega_from_height(gravity: f64, com_height: f64) -> f64 {
    (gravity / com_height).sqrt()
}

impl CaptureState {
    /// State with `omega` derived from the CoM height above `ground_height`.
    pub fn from_com(
        com_position: Vector3<f64>,
        com_velocity: Vector3<f64>,
        gravity: f64,
        ground_height: f64,
    ) -> Self {
        Self {
            com_position,
            com_velocity,
            omega: omega_from_height(gravity, com_position.z - ground_height),
        }
    }

    /// Instantaneous capture point.
    pub fn icp(&self) -> Vector2<f64> {
        self.com_position.xy() + self.com_velocity.xy() / self.omega
    }
}

/// CMP that keeps the ICP on its desired trajectory with zero error.
pub fn perfect_cmp(desired_icp: &Vector2<f64>, desired_icp_velocity: &Vector2<f64>, omega: f64) -> Vector2<f64> {
    desired_icp - desired_icp_velocity / omega
}

/// ICP tracking error, desired minus measured.
pub fn icp_error(desired_icp: &Vector2<f64>, measured_icp: &Vector2<f64>) -> Vector2<f64> {
    desired_icp - measured_icp
}

/// Sensitivity of the current ICP to each upcoming footstep location.
///
/// The first entry is `e^{−ω t_rem}`. Each later entry is the previous one
/// times `e^{−ω T_i}` where `T_i` is the duration of the step before it.
/// `out` is overwritten; it holds one value per duration in `step_durations`
/// plus the first.
pub fn footstep_recursion_multipliers(
    omega: f64,
    time_remaining: f64,
    step_durations: &[f64],
    out: &mut Vec<f64>,
) {
    out.clear();
    let mut m = (-omega * time_remaining.max(0.0)).exp();
    out.push(m);
    for duration in step_durations {
        m *= (-omega * duration.max(0.0)).exp();
        out.push(m);
    }
}

/// CoM force that realises `cmp` under LIPM dynamics.
pub fn cmp_force(mass: f64, omega: f64, com_xy: &Vector2<f64>, cmp: &Vector2<f64>, gravity: f64) -> Vector3<f64> {
    let horizontal = (com_xy - cmp) * (mass * omega * omega);
    Vector3::new(horizontal.x, horizontal.y, mass * gravity)
}

/// Moment about the CoM from shifting the CoP by `−am_offset` under a
/// vertical load `fz`.
pub fn angular_momentum_torque(am_offset: &Vector2<f64>, fz: f64) -> Vector3<f64> {
    Vector3::new(-am_offset.y * fz, am_offset.x * fz, 0.0)
}

//! Per-tick swing goal post-processing: ICP step adjustment, leg-crossover
//! projection and terrain clamping.

use nalgebra::{Rotation2, Vector2, Vector3};

use crate::config::{GaitConfig, LimbSide};

/// `clamp(gain · (measured − setpoint), ±max_per_axis)` on each axis.
pub fn instantaneous_step_adjustment(
    gain: f64,
    measured_icp: &Vector2<f64>,
    setpoint_icp: &Vector2<f64>,
    max_per_axis: f64,
) -> Vector2<f64> {
    let raw = (measured_icp - setpoint_icp) * gain;
    let limit = max_per_axis.abs();
    raw.map(|v| if v.is_finite() { v.clamp(-limit, limit) } else { 0.0 })
}

/// Keeps a swing goal on the limb's own side of the body and within reach.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CrossoverProjection {
    pub min_clearance: f64,
    pub max_stride: f64,
}

impl CrossoverProjection {
    pub const fn new(min_clearance: f64, max_stride: f64) -> Self {
        Self {
            min_clearance,
            max_stride,
        }
    }

    pub const fn from_config(config: &GaitConfig) -> Self {
        Self::new(config.min_clearance, config.max_stride)
    }

    /// Project `goal` for a limb on `side`.
    ///
    /// In the heading frame (x forward, y left) the goal must sit at least
    /// `min_clearance` to the limb's side of every other supporting foot, and
    /// no further than `max_stride` from `liftoff`.
    pub fn project(
        &self,
        goal: Vector2<f64>,
        side: LimbSide,
        heading: f64,
        liftoff: &Vector2<f64>,
        other_supports: impl IntoIterator<Item = Vector2<f64>>,
    ) -> Vector2<f64> {
        let to_heading = Rotation2::new(-heading);
        let sign = side.sign();

        let mut local = to_heading * goal;
        for support in other_supports {
            let s = to_heading * support;
            // Lateral distance measured towards the limb's own side.
            let lateral = sign * (local.y - s.y);
            if lateral < self.min_clearance {
                local.y = s.y + sign * self.min_clearance;
            }
        }

        let mut projected = to_heading.inverse() * local;
        let stride = projected - liftoff;
        let length = stride.norm();
        if length > self.max_stride && length > 0.0 {
            projected = liftoff + stride * (self.max_stride / length);
        }
        projected
    }
}

/// Lift a planar goal onto the estimated ground height.
pub fn project_to_ground(goal: &Vector2<f64>, ground_height: f64) -> Vector3<f64> {
    Vector3::new(goal.x, goal.y, ground_height)
}

//! Swing-foot trajectory between liftoff and touchdown.
//!
//! Degree-11 Bézier curves for the horizontal blend and the height bump. The
//! first and last three control points repeat, so velocity and acceleration
//! vanish at both ends. The goal may move every tick (step adjustment); the
//! curve is always re-evaluated from the liftoff position.

use nalgebra::Vector3;

use crate::types::TimeInterval;

// Horizontal S-curve from 0 to 1.
const BEZIER_S: [f64; 12] = [0.0, 0.0, 0.0, 0.5, 0.5, 0.5, 0.5, 0.5, 0.5, 1.0, 1.0, 1.0];

// Height profile, zero at both ends.
const BEZIER_H: [f64; 12] = [0.0, 0.0, 0.0, 0.9, 0.9, 1.0, 1.0, 0.9, 0.9, 0.0, 0.0, 0.0];

// bezier_eval(&BEZIER_H, 0.5); normalises the peak to `step_height`.
const BEZIER_H_PEAK: f64 = 0.886_230_468_75;

/// De Casteljau evaluation.
fn bezier_eval(points: &[f64; 12], t: f64) -> f64 {
    let mut work = *points;
    for k in 1..12 {
        for i in 0..(12 - k) {
            work[i] = work[i] * (1.0 - t) + work[i + 1] * t;
        }
    }
    work[0]
}

/// Derivative via the degree-10 hodograph.
fn bezier_derivative(points: &[f64; 12], t: f64) -> f64 {
    let mut diffs = [0.0; 11];
    for (i, d) in diffs.iter_mut().enumerate() {
        *d = points[i + 1] - points[i];
    }
    for k in 1..11 {
        for i in 0..(11 - k) {
            diffs[i] = diffs[i] * (1.0 - t) + diffs[i + 1] * t;
        }
    }
    11.0 * diffs[0]
}

/// Desired swing-foot position and velocity at one instant.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SwingSetpoint {
    pub position: Vector3<f64>,
    pub velocity: Vector3<f64>,
    /// Normalised swing phase in [0, 1].
    pub phase: f64,
}

/// One swing, from the liftoff position to a (possibly moving) goal.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SwingTrajectory {
    start: Vector3<f64>,
    target: Vector3<f64>,
    interval: TimeInterval,
    step_height: f64,
}

impl SwingTrajectory {
    pub const fn new(start: Vector3<f64>, target: Vector3<f64>, interval: TimeInterval, step_height: f64) -> Self {
        Self {
            start,
            target,
            interval,
            step_height,
        }
    }

    pub const fn start(&self) -> Vector3<f64> {
        self.start
    }

    pub const fn target(&self) -> Vector3<f64> {
        self.target
    }

    pub fn retarget(&mut self, target: Vector3<f64>) {
        self.target = target;
    }

    /// Setpoint at controller time `time`.
    pub fn evaluate(&self, time: f64) -> SwingSetpoint {
        let t = self.interval.phase(time);
        let duration = self.interval.duration();

        let s = bezier_eval(&BEZIER_S, t);
        let lift = self.step_height / BEZIER_H_PEAK;
        let delta = self.target - self.start;
        let mut position = self.start + delta * s;
        position.z += bezier_eval(&BEZIER_H, t) * lift;

        let velocity = if duration > 1e-10 {
            let ds_dt = bezier_derivative(&BEZIER_S, t) / duration;
            let mut v = delta * ds_dt;
            v.z += bezier_derivative(&BEZIER_H, t) * lift / duration;
            v
        } else {
            Vector3::zeros()
        };

        SwingSetpoint {
            position,
            velocity,
            phase: t,
        }
    }
}

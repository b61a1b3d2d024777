//! Core value types shared by the balance pipeline.

use std::fmt;

use nalgebra::{Vector2, Vector3};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Index of a limb (foot) managed by the stepping state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LimbId(pub usize);

impl fmt::Display for LimbId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of an actuated joint.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JointId(pub String);

/// Name of a rigid body that receives a desired wrench.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BodyId(pub String);

macro_rules! string_id {
    ($name:ident) => {
        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(JointId);
string_id!(BodyId);

/// Monotonic identifier assigned to each accepted footstep command.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepId(pub u64);

// ---------------------------------------------------------------------------
// Timing
// ---------------------------------------------------------------------------

/// Closed time window `[start, end]` in controller seconds.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct TimeInterval {
    pub start: f64,
    pub end: f64,
}

impl TimeInterval {
    pub const fn new(start: f64, end: f64) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Fraction of the window elapsed at `time`, clamped to [0, 1].
    pub fn phase(&self, time: f64) -> f64 {
        let d = self.duration();
        if d <= 0.0 {
            return 1.0;
        }
        ((time - self.start) / d).clamp(0.0, 1.0)
    }
}

// ---------------------------------------------------------------------------
// Footsteps
// ---------------------------------------------------------------------------

/// A footstep request: move `limb` to `goal` (world XY) between liftoff
/// (`interval.start`) and touchdown (`interval.end`).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FootstepCommand {
    pub limb: LimbId,
    pub goal: Vector2<f64>,
    pub interval: TimeInterval,
}

impl FootstepCommand {
    pub const fn new(limb: LimbId, goal: Vector2<f64>, liftoff: f64, touchdown: f64) -> Self {
        Self {
            limb,
            goal,
            interval: TimeInterval::new(liftoff, touchdown),
        }
    }
}

/// One footstep inside the optimization horizon.
#[derive(Clone, Debug, PartialEq)]
pub struct FootstepTarget {
    pub step: StepId,
    pub limb: LimbId,
    /// Location currently planned (last accepted solution, or nominal).
    pub planned: Vector2<f64>,
    /// Nominal location from the footstep command.
    pub reference: Vector2<f64>,
    /// Location solved on the previous tick, used for regularization.
    pub previous: Vector2<f64>,
    pub interval: TimeInterval,
}

// ---------------------------------------------------------------------------
// Capture state and outputs
// ---------------------------------------------------------------------------

/// Centre-of-mass state supplied by the estimator for one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CaptureState {
    pub com_position: Vector3<f64>,
    pub com_velocity: Vector3<f64>,
    /// LIPM natural frequency, `sqrt(g / z)`. Must be positive.
    pub omega: f64,
}

/// Per-joint torques produced by one tick, in registration order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct JointTorqueCommand {
    joints: Vec<JointId>,
    torques: Vec<f64>,
}

impl JointTorqueCommand {
    /// Command over `joints` with every torque zero.
    pub fn zero(joints: Vec<JointId>) -> Self {
        let torques = vec![0.0; joints.len()];
        Self { joints, torques }
    }

    pub fn len(&self) -> usize {
        self.joints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.joints.is_empty()
    }

    pub fn get(&self, joint: &str) -> Option<f64> {
        self.joints
            .iter()
            .position(|j| j.as_str() == joint)
            .map(|i| self.torques[i])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&JointId, f64)> {
        self.joints.iter().zip(self.torques.iter().copied())
    }

    pub fn joints(&self) -> &[JointId] {
        &self.joints
    }

    pub fn torques(&self) -> &[f64] {
        &self.torques
    }

    pub(crate) fn torques_mut(&mut self) -> &mut [f64] {
        &mut self.torques
    }

    pub(crate) fn push_joint(&mut self, joint: JointId) -> usize {
        self.joints.push(joint);
        self.torques.push(0.0);
        self.joints.len() - 1
    }

    pub fn set_zero(&mut self) {
        self.torques.fill(0.0);
    }

    pub fn is_all_zero(&self) -> bool {
        self.torques.iter().all(|t| *t == 0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn interval_phase_clamps() {
        let w = TimeInterval::new(1.0, 1.6);
        assert_relative_eq!(w.duration(), 0.6, epsilon = 1e-12);
        assert_relative_eq!(w.phase(0.5), 0.0);
        assert_relative_eq!(w.phase(1.3), 0.5, epsilon = 1e-12);
        assert_relative_eq!(w.phase(2.0), 1.0);
    }

    #[test]
    fn degenerate_interval_is_complete() {
        let w = TimeInterval::new(1.0, 1.0);
        assert_relative_eq!(w.phase(0.0), 1.0);
    }

    #[test]
    fn torque_command_lookup() {
        let mut cmd = JointTorqueCommand::zero(vec!["hip".into(), "knee".into()]);
        assert_eq!(cmd.len(), 2);
        assert!(cmd.is_all_zero());
        cmd.torques_mut()[1] = 3.5;
        assert_eq!(cmd.get("knee"), Some(3.5));
        assert_eq!(cmd.get("ankle"), None);
        cmd.set_zero();
        assert!(cmd.is_all_zero());
    }

    #[test]
    fn ids_display() {
        assert_eq!(LimbId(3).to_string(), "3");
        assert_eq!(JointId::from("l_knee").to_string(), "l_knee");
        assert_eq!(BodyId::from("pelvis").as_str(), "pelvis");
    }

    #[test]
    fn footstep_command_deserializes_from_toml() {
        let cmd: FootstepCommand = toml::from_str(
            r"
            limb = 1
            goal = [0.3, -0.1]
            interval = { start = 1.0, end = 1.6 }
            ",
        )
        .unwrap();
        assert_eq!(cmd.limb, LimbId(1));
        assert_relative_eq!(cmd.goal.x, 0.3);
        assert_relative_eq!(cmd.interval.end, 1.6);
    }
}

//! Synthetic legs with hand-checkable Jacobians.

use std::collections::HashMap;

use nalgebra::{Vector2, Vector3};
use poise_balance::{
    BodyId, JointFrame, JointId, JointSpec, KinematicsProvider, LimbConfig, LimbId, LimbSide,
};

/// Two-joint planar leg: hip and knee both rotate about world ŷ.
///
/// The foot sits at `foot`; the hip is `leg_length` above it and `lean`
/// behind it along x, with the knee halfway between. A vertical force `F` at
/// the foot therefore needs `τ = −r_x F` at each joint, where `r_x` is the
/// foot's x offset from that joint.
#[derive(Clone, Debug, PartialEq)]
pub struct PlanarLeg {
    pub limb: LimbId,
    pub side: LimbSide,
    pub name: String,
    pub foot: Vector3<f64>,
    pub hip: Vector3<f64>,
    pub knee: Vector3<f64>,
}

impl PlanarLeg {
    pub fn new(limb: LimbId, side: LimbSide, foot: Vector2<f64>, leg_length: f64, lean: f64) -> Self {
        let name = match side {
            LimbSide::Left => "left",
            LimbSide::Right => "right",
        };
        Self {
            limb,
            side,
            name: format!("{name}_{}", limb.0),
            foot: Vector3::new(foot.x, foot.y, 0.0),
            hip: Vector3::new(foot.x - lean, foot.y, leg_length),
            knee: Vector3::new(foot.x - 0.5 * lean, foot.y, 0.5 * leg_length),
        }
    }

    pub fn hip_joint(&self) -> JointId {
        JointId::from(format!("{}_hip", self.name))
    }

    pub fn knee_joint(&self) -> JointId {
        JointId::from(format!("{}_knee", self.name))
    }

    pub fn foot_body(&self) -> BodyId {
        BodyId::from(format!("{}_foot", self.name))
    }

    /// Limb entry with a 0.2 × 0.1 m rectangular sole under the foot.
    pub fn limb_config(&self) -> LimbConfig {
        LimbConfig {
            id: self.limb,
            side: self.side,
            support_body: self.foot_body(),
            chain: vec![
                JointSpec::revolute(self.hip_joint()),
                JointSpec::revolute(self.knee_joint()),
            ],
            sole_vertices: vec![[0.1, 0.05], [-0.1, 0.05], [-0.1, -0.05], [0.1, -0.05]],
            friction: 0.8,
            initial_position: [self.foot.x, self.foot.y],
            initially_supporting: true,
        }
    }

    /// Joint torques that hold a vertical force `fz` at the foot.
    pub fn gravity_torques(&self, fz: f64) -> [(JointId, f64); 2] {
        [
            (self.hip_joint(), -(self.foot.x - self.hip.x) * fz),
            (self.knee_joint(), -(self.foot.x - self.knee.x) * fz),
        ]
    }
}

/// Fixed joint frames and body points.
#[derive(Clone, Debug, Default)]
pub struct StaticKinematics {
    joints: HashMap<JointId, JointFrame>,
    points: HashMap<BodyId, Vector3<f64>>,
}

impl StaticKinematics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Frames for every joint and foot of `legs`.
    pub fn from_legs<'a>(legs: impl IntoIterator<Item = &'a PlanarLeg>) -> Self {
        let mut kin = Self::new();
        for leg in legs {
            kin.add_leg(leg);
        }
        kin
    }

    #[must_use]
    pub fn with_joint(mut self, joint: impl Into<JointId>, origin: Vector3<f64>, axis: Vector3<f64>) -> Self {
        self.joints.insert(joint.into(), JointFrame { origin, axis });
        self
    }

    #[must_use]
    pub fn with_body_point(mut self, body: impl Into<BodyId>, point: Vector3<f64>) -> Self {
        self.points.insert(body.into(), point);
        self
    }

    pub fn add_leg(&mut self, leg: &PlanarLeg) {
        let axis = Vector3::y();
        self.joints.insert(
            leg.hip_joint(),
            JointFrame {
                origin: leg.hip,
                axis,
            },
        );
        self.joints.insert(
            leg.knee_joint(),
            JointFrame {
                origin: leg.knee,
                axis,
            },
        );
        self.points.insert(leg.foot_body(), leg.foot);
    }

    /// Move a body point, e.g. a swinging foot.
    pub fn set_body_point(&mut self, body: &BodyId, point: Vector3<f64>) {
        self.points.insert(body.clone(), point);
    }
}

impl KinematicsProvider for StaticKinematics {
    fn joint_frame(&self, joint: &JointId) -> Option<JointFrame> {
        self.joints.get(joint).copied()
    }

    fn body_point(&self, body: &BodyId) -> Option<Vector3<f64>> {
        self.points.get(body).copied()
    }
}

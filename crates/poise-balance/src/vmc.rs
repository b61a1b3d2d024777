//! Virtual model control: desired body wrenches to joint torques.
//!
//! For every controlled body the staged wrench `w = [τ; f]` (torque about the
//! body point, then force, both in the reference frame) is mapped through the
//! geometric Jacobian of its chain:
//!
//! ```text
//! revolute   J_i = [a_i; a_i × (p − o_i)]
//! prismatic  J_i = [0;   a_i]
//! τ_joint = Jᵀ w
//! ```
//!
//! Joints shared between chains accumulate the contribution of each chain.
//! Wrenches are staged first and mapped together in [`VirtualModelController::compute`].

use nalgebra::{DMatrix, UnitQuaternion, Vector3, Vector6};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{ConfigError, VmcError};
use crate::types::{BodyId, JointId, JointTorqueCommand};

// ---------------------------------------------------------------------------
// Joints and kinematics
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JointKind {
    Revolute,
    Prismatic,
}

/// A joint in a controlled body's chain.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct JointSpec {
    pub id: JointId,
    pub kind: JointKind,
}

impl JointSpec {
    pub fn revolute(id: impl Into<JointId>) -> Self {
        Self {
            id: id.into(),
            kind: JointKind::Revolute,
        }
    }

    pub fn prismatic(id: impl Into<JointId>) -> Self {
        Self {
            id: id.into(),
            kind: JointKind::Prismatic,
        }
    }
}

/// Joint origin and unit axis in the reference frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct JointFrame {
    pub origin: Vector3<f64>,
    pub axis: Vector3<f64>,
}

/// Current kinematic state supplied by the rigid-body model.
pub trait KinematicsProvider {
    fn joint_frame(&self, joint: &JointId) -> Option<JointFrame>;

    /// Point on `body` where its wrench is applied.
    fn body_point(&self, body: &BodyId) -> Option<Vector3<f64>>;
}

/// Geometric Jacobian column of one joint for a wrench applied at `point`.
pub fn jacobian_column(kind: JointKind, frame: &JointFrame, point: &Vector3<f64>) -> Vector6<f64> {
    let a = frame.axis;
    match kind {
        JointKind::Revolute => {
            let v = a.cross(&(point - frame.origin));
            Vector6::new(a.x, a.y, a.z, v.x, v.y, v.z)
        }
        JointKind::Prismatic => Vector6::new(0.0, 0.0, 0.0, a.x, a.y, a.z),
    }
}

// ---------------------------------------------------------------------------
// Selection and wrenches
// ---------------------------------------------------------------------------

/// Wrench axis, in `[ωx ωy ωz vx vy vz]` order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WrenchAxis {
    TorqueX = 0,
    TorqueY = 1,
    TorqueZ = 2,
    ForceX = 3,
    ForceY = 4,
    ForceZ = 5,
}

/// k×6 0/1 matrix picking which wrench components are enforced.
///
/// Only `SᵀS` matters when mapping, which is a diagonal mask.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SelectionMatrix {
    mask: [bool; 6],
}

impl Default for SelectionMatrix {
    fn default() -> Self {
        Self::full()
    }
}

impl SelectionMatrix {
    pub const fn full() -> Self {
        Self { mask: [true; 6] }
    }

    pub const fn linear() -> Self {
        Self {
            mask: [false, false, false, true, true, true],
        }
    }

    pub const fn angular() -> Self {
        Self {
            mask: [true, true, true, false, false, false],
        }
    }

    pub fn from_axes(axes: &[WrenchAxis]) -> Self {
        let mut mask = [false; 6];
        for axis in axes {
            mask[*axis as usize] = true;
        }
        Self { mask }
    }

    /// Validate a selection matrix given as rows.
    ///
    /// Each row must have exactly six entries, all 0 or 1 with a single 1,
    /// and no two rows may select the same axis.
    pub fn from_matrix(matrix: &DMatrix<f64>) -> Result<Self, ConfigError> {
        if matrix.ncols() != 6 || matrix.nrows() > 6 {
            return Err(ConfigError::MalformedSelection(format!(
                "expected k×6 with k ≤ 6, got {}×{}",
                matrix.nrows(),
                matrix.ncols()
            )));
        }
        let mut mask = [false; 6];
        for (r, row) in matrix.row_iter().enumerate() {
            let mut selected = None;
            for (c, v) in row.iter().enumerate() {
                if *v == 1.0 {
                    if selected.is_some() {
                        return Err(ConfigError::MalformedSelection(format!(
                            "row {r} selects more than one axis"
                        )));
                    }
                    selected = Some(c);
                } else if *v != 0.0 {
                    return Err(ConfigError::MalformedSelection(format!(
                        "row {r} has entry {v}, expected 0 or 1"
                    )));
                }
            }
            let Some(c) = selected else {
                return Err(ConfigError::MalformedSelection(format!(
                    "row {r} selects no axis"
                )));
            };
            if mask[c] {
                return Err(ConfigError::MalformedSelection(format!(
                    "axis {c} selected twice"
                )));
            }
            mask[c] = true;
        }
        Ok(Self { mask })
    }

    /// Number of enforced axes (rows of S).
    pub fn rank(&self) -> usize {
        self.mask.iter().filter(|m| **m).count()
    }

    pub const fn is_selected(&self, axis: WrenchAxis) -> bool {
        self.mask[axis as usize]
    }

    /// `SᵀS w`.
    pub fn apply(&self, wrench: &Vector6<f64>) -> Vector6<f64> {
        Vector6::from_fn(|i, _| if self.mask[i] { wrench[i] } else { 0.0 })
    }
}

/// Desired wrench on one body for one tick.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DesiredWrench {
    /// Torque about the body point.
    pub torque: Vector3<f64>,
    pub force: Vector3<f64>,
    /// Rotation from the frame the wrench is expressed in to the reference frame.
    pub expressed_in: UnitQuaternion<f64>,
    pub selection: SelectionMatrix,
}

impl DesiredWrench {
    /// Fully selected wrench expressed in the reference frame.
    pub fn new(torque: Vector3<f64>, force: Vector3<f64>) -> Self {
        Self {
            torque,
            force,
            expressed_in: UnitQuaternion::identity(),
            selection: SelectionMatrix::full(),
        }
    }

    pub fn force(force: Vector3<f64>) -> Self {
        Self::new(Vector3::zeros(), force)
    }

    #[must_use]
    pub fn expressed_in(mut self, rotation: UnitQuaternion<f64>) -> Self {
        self.expressed_in = rotation;
        self
    }

    #[must_use]
    pub fn with_selection(mut self, selection: SelectionMatrix) -> Self {
        self.selection = selection;
        self
    }

    /// Masked in its own frame, then rotated into the reference frame.
    pub fn to_reference(&self) -> Vector6<f64> {
        let local = Vector6::new(
            self.torque.x,
            self.torque.y,
            self.torque.z,
            self.force.x,
            self.force.y,
            self.force.z,
        );
        let masked = self.selection.apply(&local);
        let torque = self.expressed_in * masked.fixed_rows::<3>(0).into_owned();
        let force = self.expressed_in * masked.fixed_rows::<3>(3).into_owned();
        Vector6::new(torque.x, torque.y, torque.z, force.x, force.y, force.z)
    }
}

// ---------------------------------------------------------------------------
// VirtualModelController
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct ControlledBody {
    body: BodyId,
    /// Indices into the controller's joint table.
    chain: Vec<usize>,
    staged: Option<Vector6<f64>>,
}

/// Maps staged body wrenches to one torque per registered joint.
#[derive(Clone, Debug, Default)]
pub struct VirtualModelController {
    bodies: Vec<ControlledBody>,
    kinds: Vec<JointKind>,
    torques: JointTorqueCommand,
}

impl VirtualModelController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `body` driven through `chain` (body to root). Fails on a
    /// duplicate body, a repeated or empty joint id, or a joint already
    /// registered with another kind.
    pub fn register_controlled_body(&mut self, body: BodyId, chain: Vec<JointSpec>) -> Result<(), VmcError> {
        if self.bodies.iter().any(|b| b.body == body) {
            return Err(VmcError::DuplicateBody(body));
        }
        for (i, joint) in chain.iter().enumerate() {
            if joint.id.as_str().is_empty() {
                return Err(VmcError::EmptyJointId(body));
            }
            if chain[..i].iter().any(|j| j.id == joint.id) {
                return Err(VmcError::DuplicateJointInChain {
                    body,
                    joint: joint.id.clone(),
                });
            }
            if let Some(idx) = self.joint_index(&joint.id)
                && self.kinds[idx] != joint.kind
            {
                return Err(VmcError::ConflictingJoint(joint.id.clone()));
            }
        }

        let mut indices = Vec::with_capacity(chain.len());
        for joint in chain {
            let idx = match self.joint_index(&joint.id) {
                Some(idx) => idx,
                None => {
                    self.kinds.push(joint.kind);
                    self.torques.push_joint(joint.id)
                }
            };
            indices.push(idx);
        }
        self.bodies.push(ControlledBody {
            body,
            chain: indices,
            staged: None,
        });
        Ok(())
    }

    /// Stage the wrench for `body`. A second call in the same tick replaces
    /// the first.
    pub fn submit_wrench(&mut self, body: &BodyId, wrench: &DesiredWrench) -> Result<(), VmcError> {
        let entry = self
            .bodies
            .iter_mut()
            .find(|b| &b.body == body)
            .ok_or_else(|| VmcError::UnknownBody(body.clone()))?;
        entry.staged = Some(wrench.to_reference());
        Ok(())
    }

    /// Drop every staged wrench without mapping it.
    pub fn clear_staged(&mut self) {
        for body in &mut self.bodies {
            body.staged = None;
        }
    }

    /// Map every staged wrench to joint torques and clear the stage.
    ///
    /// Bodies without a staged wrench contribute nothing.
    pub fn compute(&mut self, kinematics: &dyn KinematicsProvider) -> Result<&JointTorqueCommand, VmcError> {
        self.torques.set_zero();
        let result = self.accumulate(kinematics);
        self.clear_staged();
        match result {
            Ok(()) => Ok(&self.torques),
            Err(e) => {
                self.torques.set_zero();
                Err(e)
            }
        }
    }

    fn accumulate(&mut self, kinematics: &dyn KinematicsProvider) -> Result<(), VmcError> {
        for body in &self.bodies {
            let Some(wrench) = body.staged else {
                warn!(body = %body.body, "no wrench submitted this tick, skipping chain");
                continue;
            };
            if body.chain.is_empty() {
                continue;
            }
            let point = kinematics
                .body_point(&body.body)
                .ok_or_else(|| VmcError::MissingBodyPoint(body.body.clone()))?;
            for &idx in &body.chain {
                let id = &self.torques.joints()[idx];
                let frame = kinematics
                    .joint_frame(id)
                    .ok_or_else(|| VmcError::MissingJointFrame(id.clone()))?;
                let column = jacobian_column(self.kinds[idx], &frame, &point);
                self.torques.torques_mut()[idx] += column.dot(&wrench);
            }
        }
        Ok(())
    }

    fn joint_index(&self, joint: &JointId) -> Option<usize> {
        self.torques.joints().iter().position(|j| j == joint)
    }

    /// Torques from the last successful [`compute`](Self::compute).
    pub const fn torques(&self) -> &JointTorqueCommand {
        &self.torques
    }

    /// Every distinct joint across all chains, in registration order.
    pub fn joints(&self) -> &[JointId] {
        self.torques.joints()
    }

    pub fn is_registered(&self, body: &BodyId) -> bool {
        self.bodies.iter().any(|b| &b.body == body)
    }

    pub fn has_staged_wrench(&self, body: &BodyId) -> bool {
        self.bodies
            .iter()
            .any(|b| &b.body == body && b.staged.is_some())
    }
}

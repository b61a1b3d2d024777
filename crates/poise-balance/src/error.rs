//! Error types for the balance core.
//!
//! Setup-time problems ([`ConfigError`], registration variants of
//! [`VmcError`], [`GaitError`]) are fatal and surface before the control loop
//! starts. [`SolveError`] is recoverable: the optimizer holds its previous
//! solution and the loop carries on.

use crate::types::{BodyId, JointId, LimbId};

/// Top-level error type for poise-balance.
#[derive(Debug, thiserror::Error)]
pub enum BalanceError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Virtual model control error: {0}")]
    Vmc(#[from] VmcError),

    #[error("Gait error: {0}")]
    Gait(#[from] GaitError),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Solve error: {0}")]
    Solve(#[from] SolveError),
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("Feedback gain must be positive on every axis, got [{0}, {1}]")]
    ZeroFeedbackGain(f64, f64),

    #[error("Duplicate limb id {0}")]
    DuplicateLimb(LimbId),

    #[error("Malformed selection matrix: {0}")]
    MalformedSelection(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, message: impl Into<String>) -> Self {
        Self::InvalidValue {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// Errors raised while assembling the QP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    #[error("Task block of size {got} does not fit layout slot of size {expected}")]
    LayoutMismatch { expected: usize, got: usize },

    #[error("Problem size {size} exceeds preallocated capacity {capacity}")]
    CapacityExceeded { size: usize, capacity: usize },
}

/// QP solve failures. Always recoverable.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SolveError {
    #[error("Solver did not converge within budget: {0}")]
    NotConverged(String),

    #[error("Solver rejected the problem: {0}")]
    Setup(String),

    #[error("Solution contains NaN")]
    NanSolution,

    #[error("Invalid estimator input: {0}")]
    InvalidInput(String),

    #[error("QP assembly failed: {0}")]
    Assembly(#[from] LayoutError),
}

/// Errors from the wrench-to-torque mapper.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum VmcError {
    #[error("Body {0} is already registered")]
    DuplicateBody(BodyId),

    #[error("Joint {joint} appears twice in the chain of {body}")]
    DuplicateJointInChain { body: BodyId, joint: JointId },

    #[error("Joint {0} registered with conflicting joint kinds")]
    ConflictingJoint(JointId),

    #[error("Joint id must not be empty (body {0})")]
    EmptyJointId(BodyId),

    #[error("Body {0} is not registered")]
    UnknownBody(BodyId),

    #[error("No kinematic frame available for joint {0}")]
    MissingJointFrame(JointId),

    #[error("No control point available for body {0}")]
    MissingBodyPoint(BodyId),
}

/// Errors from the stepping state machine.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GaitError {
    #[error("Limb {0} is not managed by this state machine")]
    UnknownLimb(LimbId),

    #[error("Footstep for limb {limb} has touchdown {touchdown} not after liftoff {liftoff}")]
    InvalidTimeWindow {
        limb: LimbId,
        liftoff: f64,
        touchdown: f64,
    },

    #[error("Footstep goal for limb {0} is not finite")]
    NonFiniteGoal(LimbId),
}

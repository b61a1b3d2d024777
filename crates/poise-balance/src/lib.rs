//! Real-time balance and stepping core for legged robots.
//!
//! Each control tick runs a fixed pipeline:
//!
//! 1. **Gait state machine**: per-limb Support/Swing phases, the footstep
//!    queue, contact activation and swing-goal adjustment
//! 2. **Capture-point QP**: CMP feedback, optional angular-momentum offset
//!    and footstep adjustment, solved jointly with Clarabel
//! 3. **Wrench distribution**: the CoM wrench implied by the CMP, split over
//!    the supporting limbs inside their friction cones
//! 4. **Virtual model control**: body wrenches to joint torques via `Jᵀ w`
//!
//! # Architecture
//!
//! The instantaneous capture point `ξ = x + ẋ/ω` follows `ξ̇ = ω (ξ − r_cmp)`.
//! Feedback on the CMP drives the measured ICP towards the desired one; when
//! the CoP saturates at the support polygon edge, upcoming footsteps move
//! instead. The QP decision vector layout is a pure function of the enabled
//! features and the footstep horizon (see [`layout`]).
//!
//! [`BalanceController`] owns every component and never lets a fault escape
//! a tick: failures command zero torque.

pub mod adjustment;
pub mod capture;
pub mod config;
pub mod contact;
pub mod controller;
pub mod error;
pub mod gait;
pub mod layout;
pub mod optimizer;
pub mod solver;
pub mod swing;
pub mod tasks;
pub mod types;
pub mod vmc;

pub use adjustment::{CrossoverProjection, instantaneous_step_adjustment, project_to_ground};
pub use capture::{
    angular_momentum_torque, cmp_force, footstep_recursion_multipliers, icp_error,
    omega_from_height, perfect_cmp,
};
pub use config::{
    BalanceConfig, GaitConfig, IcpOptimizerConfig, LimbConfig, LimbSide, SolverConfig,
};
pub use contact::{ContactModel, SupportPolygon, clamp_to_friction_cone};
pub use controller::{BalanceController, ContactStatus, ControllerInput, FootstepInbox, TickOutput};
pub use error::{BalanceError, ConfigError, GaitError, LayoutError, SolveError, VmcError};
pub use gait::{
    FootMeasurement, GaitEvent, GaitEventListener, GaitInput, GaitPhase, GaitStateMachine,
};
pub use layout::{Block, FeatureFlags, QpVariableLayout, compute_layout};
pub use optimizer::{IcpOptimizer, IcpOptimizerInput, IcpSolution, SolutionStatus, TickTrace};
pub use solver::{ClarabelSolver, QpProblem, QpSolver, SolveStats};
pub use swing::{SwingSetpoint, SwingTrajectory};
pub use tasks::{DynamicsTask, QpInput};
pub use types::{
    BodyId, CaptureState, FootstepCommand, FootstepTarget, JointId, JointTorqueCommand, LimbId,
    StepId, TimeInterval,
};
pub use vmc::{
    DesiredWrench, JointFrame, JointKind, JointSpec, KinematicsProvider, SelectionMatrix,
    VirtualModelController, WrenchAxis, jacobian_column,
};

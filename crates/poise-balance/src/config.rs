//! Controller configuration loaded from TOML.
//!
//! Every field has a serde default so a partial file is enough; `validate()`
//! runs on load and is also called by [`BalanceController::new`] so a bad
//! configuration never reaches the control loop.
//!
//! [`BalanceController::new`]: crate::controller::BalanceController::new

use std::collections::HashSet;

use nalgebra::Vector2;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::layout::FeatureFlags;
use crate::types::{BodyId, LimbId};
use crate::vmc::JointSpec;

// ---------------------------------------------------------------------------
// Serde default functions
// ---------------------------------------------------------------------------

const fn default_control_dt() -> f64 {
    0.004
}
const fn default_mass() -> f64 {
    30.0
}
const fn default_gravity() -> f64 {
    9.81
}
const fn default_feedback_gain() -> [f64; 2] {
    [3.0, 2.5]
}
const fn default_feedback_weight() -> [f64; 2] {
    [0.5, 0.5]
}
const fn default_feedback_regularization_weight() -> f64 {
    1e-4
}
const fn default_angular_momentum_weight() -> f64 {
    50.0
}
const fn default_footstep_weight() -> [f64; 2] {
    [20.0, 20.0]
}
const fn default_footstep_regularization_weight() -> f64 {
    1e-3
}
const fn default_dynamics_weight() -> f64 {
    500.0
}
const fn default_safety_factor() -> f64 {
    1.0
}
const fn default_max_feedback() -> [f64; 2] {
    [0.15, 0.15]
}
const fn default_max_footstep_adjustment() -> [f64; 2] {
    [0.15, 0.1]
}
const fn default_max_footsteps() -> usize {
    4
}
const fn default_max_polygon_vertices() -> usize {
    16
}
const fn default_true() -> bool {
    true
}
const fn default_max_iter() -> u32 {
    50
}
const fn default_time_limit() -> f64 {
    0.002
}
const fn default_tolerance() -> f64 {
    1e-7
}
const fn default_step_adjustment_gain() -> f64 {
    1.0
}
const fn default_max_adjustment_per_axis() -> f64 {
    0.1
}
const fn default_step_height() -> f64 {
    0.08
}
const fn default_min_swing_fraction() -> f64 {
    0.5
}
const fn default_min_clearance() -> f64 {
    0.05
}
const fn default_max_stride() -> f64 {
    0.6
}
const fn default_friction() -> f64 {
    0.7
}

// ---------------------------------------------------------------------------
// BalanceConfig
// ---------------------------------------------------------------------------

/// Top-level configuration for [`BalanceController`](crate::controller::BalanceController).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceConfig {
    /// Control period in seconds (default: 0.004 = 250 Hz).
    #[serde(default = "default_control_dt")]
    pub control_dt: f64,

    /// Total robot mass in kg.
    #[serde(default = "default_mass")]
    pub mass: f64,

    /// Gravitational acceleration magnitude (positive).
    #[serde(default = "default_gravity")]
    pub gravity: f64,

    #[serde(default)]
    pub optimizer: IcpOptimizerConfig,

    #[serde(default)]
    pub solver: SolverConfig,

    #[serde(default)]
    pub gait: GaitConfig,

    #[serde(default)]
    pub limbs: Vec<LimbConfig>,
}

impl Default for BalanceConfig {
    fn default() -> Self {
        Self {
            control_dt: default_control_dt(),
            mass: default_mass(),
            gravity: default_gravity(),
            optimizer: IcpOptimizerConfig::default(),
            solver: SolverConfig::default(),
            gait: GaitConfig::default(),
            limbs: Vec::new(),
        }
    }
}

impl BalanceConfig {
    /// Validate configuration. Returns Err on the first invalid value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("control_dt", self.control_dt)?;
        positive("mass", self.mass)?;
        positive("gravity", self.gravity)?;
        self.optimizer.validate()?;
        self.solver.validate()?;
        self.gait.validate()?;

        let mut seen = HashSet::new();
        for limb in &self.limbs {
            if !seen.insert(limb.id) {
                return Err(ConfigError::DuplicateLimb(limb.id));
            }
            limb.validate()?;
        }
        Ok(())
    }

    /// Parse from a TOML string and validate.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Load from TOML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Sole vertices summed over all limbs, an upper bound on the support
    /// polygon's vertex count.
    pub fn total_sole_vertices(&self) -> usize {
        self.limbs.iter().map(|l| l.sole_vertices.len()).sum()
    }
}

// ---------------------------------------------------------------------------
// IcpOptimizerConfig
// ---------------------------------------------------------------------------

/// Weights, gains and limits of the capture-point QP.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IcpOptimizerConfig {
    /// Proportional ICP feedback gain per axis. Must be nonzero.
    #[serde(default = "default_feedback_gain")]
    pub feedback_gain: [f64; 2],

    #[serde(default = "default_feedback_weight")]
    pub feedback_weight: [f64; 2],

    #[serde(default = "default_feedback_regularization_weight")]
    pub feedback_regularization_weight: f64,

    #[serde(default = "default_angular_momentum_weight")]
    pub angular_momentum_weight: f64,

    #[serde(default = "default_footstep_weight")]
    pub footstep_weight: [f64; 2],

    #[serde(default = "default_footstep_regularization_weight")]
    pub footstep_regularization_weight: f64,

    /// Weight of the dynamics-consistency least-squares task.
    #[serde(default = "default_dynamics_weight")]
    pub dynamics_weight: f64,

    /// Scales down how much a footstep adjustment is trusted to fix ICP error.
    #[serde(default = "default_safety_factor")]
    pub safety_factor: f64,

    /// Per-axis bound on |feedback|.
    #[serde(default = "default_max_feedback")]
    pub max_feedback: [f64; 2],

    /// Per-axis bound on |footstep − reference|.
    #[serde(default = "default_max_footstep_adjustment")]
    pub max_footstep_adjustment: [f64; 2],

    /// Footsteps considered by the optimizer (horizon length).
    #[serde(default = "default_max_footsteps")]
    pub max_footsteps: usize,

    /// Capacity of the support polygon constraint buffer.
    #[serde(default = "default_max_polygon_vertices")]
    pub max_polygon_vertices: usize,

    #[serde(default)]
    pub use_angular_momentum: bool,

    #[serde(default = "default_true")]
    pub use_step_adjustment: bool,

    /// Keep the CoP inside the support polygon as a hard constraint.
    #[serde(default = "default_true")]
    pub use_support_polygon_constraint: bool,
}

impl Default for IcpOptimizerConfig {
    fn default() -> Self {
        Self {
            feedback_gain: default_feedback_gain(),
            feedback_weight: default_feedback_weight(),
            feedback_regularization_weight: default_feedback_regularization_weight(),
            angular_momentum_weight: default_angular_momentum_weight(),
            footstep_weight: default_footstep_weight(),
            footstep_regularization_weight: default_footstep_regularization_weight(),
            dynamics_weight: default_dynamics_weight(),
            safety_factor: default_safety_factor(),
            max_feedback: default_max_feedback(),
            max_footstep_adjustment: default_max_footstep_adjustment(),
            max_footsteps: default_max_footsteps(),
            max_polygon_vertices: default_max_polygon_vertices(),
            use_angular_momentum: false,
            use_step_adjustment: true,
            use_support_polygon_constraint: true,
        }
    }
}

impl IcpOptimizerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let [kx, ky] = self.feedback_gain;
        if kx <= 0.0 || ky <= 0.0 || !kx.is_finite() || !ky.is_finite() {
            return Err(ConfigError::ZeroFeedbackGain(kx, ky));
        }
        non_negative_pair("feedback_weight", self.feedback_weight)?;
        non_negative("feedback_regularization_weight", self.feedback_regularization_weight)?;
        non_negative("angular_momentum_weight", self.angular_momentum_weight)?;
        non_negative_pair("footstep_weight", self.footstep_weight)?;
        non_negative(
            "footstep_regularization_weight",
            self.footstep_regularization_weight,
        )?;
        positive("dynamics_weight", self.dynamics_weight)?;
        positive("safety_factor", self.safety_factor)?;
        positive("max_feedback[0]", self.max_feedback[0])?;
        positive("max_feedback[1]", self.max_feedback[1])?;
        non_negative_pair("max_footstep_adjustment", self.max_footstep_adjustment)?;
        if self.max_polygon_vertices < 3 {
            return Err(ConfigError::invalid(
                "max_polygon_vertices",
                "must be at least 3",
            ));
        }
        Ok(())
    }

    pub const fn feature_flags(&self) -> FeatureFlags {
        FeatureFlags {
            use_angular_momentum: self.use_angular_momentum,
            use_step_adjustment: self.use_step_adjustment,
        }
    }

    pub fn feedback_gain(&self) -> Vector2<f64> {
        Vector2::from(self.feedback_gain)
    }
}

// ---------------------------------------------------------------------------
// SolverConfig
// ---------------------------------------------------------------------------

/// Iteration and wall-clock budget handed to the QP solver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    #[serde(default = "default_max_iter")]
    pub max_iter: u32,

    /// Time limit per solve in seconds.
    #[serde(default = "default_time_limit")]
    pub time_limit: f64,

    /// Absolute/relative gap and feasibility tolerance.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            max_iter: default_max_iter(),
            time_limit: default_time_limit(),
            tolerance: default_tolerance(),
        }
    }
}

impl SolverConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_iter == 0 {
            return Err(ConfigError::invalid("solver.max_iter", "must be positive"));
        }
        positive("solver.time_limit", self.time_limit)?;
        positive("solver.tolerance", self.tolerance)
    }
}

// ---------------------------------------------------------------------------
// GaitConfig
// ---------------------------------------------------------------------------

/// Stepping state machine and swing adjustment parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaitConfig {
    /// Gain on (measured ICP − setpoint ICP) for the per-tick swing adjustment.
    #[serde(default = "default_step_adjustment_gain")]
    pub step_adjustment_gain: f64,

    #[serde(default = "default_max_adjustment_per_axis")]
    pub max_adjustment_per_axis: f64,

    /// Peak swing-foot height above the liftoff/touchdown line.
    #[serde(default = "default_step_height")]
    pub step_height: f64,

    /// Contact force (N) at or above which a swinging foot counts as landed.
    #[serde(default)]
    pub touchdown_force_threshold: Option<f64>,

    /// Foot height above ground at or below which a swinging foot counts as landed.
    #[serde(default)]
    pub touchdown_height_threshold: Option<f64>,

    /// Sensor touchdown is ignored before this fraction of the swing.
    #[serde(default = "default_min_swing_fraction")]
    pub min_swing_fraction: f64,

    /// Minimum lateral distance kept from every other support foot.
    #[serde(default = "default_min_clearance")]
    pub min_clearance: f64,

    /// Maximum distance of a goal from the liftoff position.
    #[serde(default = "default_max_stride")]
    pub max_stride: f64,

    /// Shift later queued steps by adjustments realised at touchdown.
    #[serde(default)]
    pub accumulate_adjustment: bool,
}

impl Default for GaitConfig {
    fn default() -> Self {
        Self {
            step_adjustment_gain: default_step_adjustment_gain(),
            max_adjustment_per_axis: default_max_adjustment_per_axis(),
            step_height: default_step_height(),
            touchdown_force_threshold: None,
            touchdown_height_threshold: None,
            min_swing_fraction: default_min_swing_fraction(),
            min_clearance: default_min_clearance(),
            max_stride: default_max_stride(),
            accumulate_adjustment: false,
        }
    }
}

impl GaitConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        non_negative("gait.step_adjustment_gain", self.step_adjustment_gain)?;
        positive("gait.max_adjustment_per_axis", self.max_adjustment_per_axis)?;
        non_negative("gait.step_height", self.step_height)?;
        if let Some(f) = self.touchdown_force_threshold {
            positive("gait.touchdown_force_threshold", f)?;
        }
        if let Some(h) = self.touchdown_height_threshold {
            non_negative("gait.touchdown_height_threshold", h)?;
        }
        if !(0.0..=1.0).contains(&self.min_swing_fraction) {
            return Err(ConfigError::invalid(
                "gait.min_swing_fraction",
                format!("must lie in [0, 1], got {}", self.min_swing_fraction),
            ));
        }
        non_negative("gait.min_clearance", self.min_clearance)?;
        positive("gait.max_stride", self.max_stride)
    }
}

// ---------------------------------------------------------------------------
// LimbConfig
// ---------------------------------------------------------------------------

/// Which side of the body a limb sits on. Used by crossover projection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LimbSide {
    Left,
    Right,
}

impl LimbSide {
    /// +1 for left (positive y in the heading frame), −1 for right.
    pub const fn sign(self) -> f64 {
        match self {
            Self::Left => 1.0,
            Self::Right => -1.0,
        }
    }
}

/// One limb: its contact geometry and the kinematic chain that carries its
/// support wrench.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimbConfig {
    pub id: LimbId,
    pub side: LimbSide,
    /// Body receiving this limb's share of the CoM wrench.
    pub support_body: BodyId,
    /// Joints from the support body up to the root.
    #[serde(default)]
    pub chain: Vec<JointSpec>,
    /// Sole polygon in the foot frame, counter-clockwise.
    pub sole_vertices: Vec<[f64; 2]>,
    #[serde(default = "default_friction")]
    pub friction: f64,
    /// Foot position (world XY) at startup.
    #[serde(default)]
    pub initial_position: [f64; 2],
    #[serde(default = "default_true")]
    pub initially_supporting: bool,
}

impl LimbConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sole_vertices.len() < 3 {
            return Err(ConfigError::invalid(
                "sole_vertices",
                format!(
                    "limb {} needs at least 3 vertices, got {}",
                    self.id,
                    self.sole_vertices.len()
                ),
            ));
        }
        non_negative("friction", self.friction)
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn positive(field: &str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("must be positive, got {value}")))
    }
}

fn non_negative(field: &str, value: f64) -> Result<(), ConfigError> {
    if value >= 0.0 && value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!("must be non-negative, got {value}"),
        ))
    }
}

fn non_negative_pair(field: &str, value: [f64; 2]) -> Result<(), ConfigError> {
    non_negative(field, value[0])?;
    non_negative(field, value[1])
}

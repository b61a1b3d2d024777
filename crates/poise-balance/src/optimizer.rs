//! Capture-point QP: CMP feedback, angular-momentum offset and footstep
//! adjustment solved jointly each tick.
//!
//! Decision vector (see [`crate::layout`]):
//!
//! ```text
//! x = [δ, κ?, f₀?, f₁?, ...]
//! δ   CoP feedback, CoP = perfect CMP + δ
//! κ   CMP offset produced by angular momentum, CMP = CoP + κ
//! fᵢ  absolute location of upcoming footstep i
//! ```
//!
//! Constraints: CoP inside the support polygon, `|δ| ≤ max_feedback` per
//! axis, `|fᵢ − refᵢ| ≤ max_footstep_adjustment` per axis.
//!
//! A failed solve holds the last committed feedback and the planned
//! footsteps; nothing stale or partial leaves the optimizer.

use nalgebra::{DVector, Matrix2, Vector2};
use tracing::warn;

use crate::capture::{footstep_recursion_multipliers, icp_error, perfect_cmp};
use crate::config::IcpOptimizerConfig;
use crate::contact::{ContactModel, SupportPolygon};
use crate::error::{LayoutError, SolveError};
use crate::layout::{Block, QpVariableLayout, compute_layout};
use crate::solver::{QpProblem, QpSolver};
use crate::tasks::{
    DynamicsTask, QpInput, angular_momentum_minimization, dynamics_task, feedback_minimization,
    feedback_regularization, footstep_regularization, footstep_task, submit,
};
use crate::types::{CaptureState, FootstepTarget, StepId};

/// Everything the optimizer reads for one tick.
#[derive(Clone, Copy, Debug)]
pub struct IcpOptimizerInput<'a> {
    pub time: f64,
    pub capture: &'a CaptureState,
    pub desired_icp: Vector2<f64>,
    pub desired_icp_velocity: Vector2<f64>,
    /// Contact set as finalised by the gait state machine this tick.
    pub contacts: &'a [ContactModel],
    /// Upcoming footsteps, earliest touchdown first.
    pub footsteps: &'a [FootstepTarget],
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SolutionStatus {
    Solved,
    /// Solve failed; previous feedback and planned footsteps are returned.
    Held,
}

/// Per-tick diagnostics for an external observability layer.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TickTrace {
    pub feedback_cost: f64,
    pub feedback_regularization_cost: f64,
    pub angular_momentum_cost: f64,
    pub footstep_cost: f64,
    pub footstep_regularization_cost: f64,
    pub dynamics_cost: f64,
    /// Sum of constant terms of all tasks.
    pub total_residual: f64,
    pub objective: f64,
    pub first_step_multiplier: f64,
    pub num_variables: usize,
    pub num_constraints: usize,
    pub iterations: u32,
    pub solve_time_us: u64,
    pub failure: Option<SolveError>,
}

/// Result of one optimizer tick.
#[derive(Clone, Debug)]
pub struct IcpSolution {
    pub status: SolutionStatus,
    pub feedback: Vector2<f64>,
    pub angular_momentum: Vector2<f64>,
    pub perfect_cmp: Vector2<f64>,
    pub cop: Vector2<f64>,
    pub cmp: Vector2<f64>,
    /// Solved location per footstep in the horizon.
    pub footsteps: Vec<(StepId, Vector2<f64>)>,
    pub trace: TickTrace,
}

impl IcpSolution {
    fn with_capacity(max_footsteps: usize) -> Self {
        Self {
            status: SolutionStatus::Held,
            feedback: Vector2::zeros(),
            angular_momentum: Vector2::zeros(),
            perfect_cmp: Vector2::zeros(),
            cop: Vector2::zeros(),
            cmp: Vector2::zeros(),
            footsteps: Vec::with_capacity(max_footsteps),
            trace: TickTrace::default(),
        }
    }

    pub fn is_solved(&self) -> bool {
        self.status == SolutionStatus::Solved
    }
}

/// Buffers sized once from the configured horizon and polygon capacity.
#[derive(Clone, Debug)]
struct Scratch {
    problem: QpProblem,
    x: DVector<f64>,
    feedback_min: QpInput,
    feedback_reg: QpInput,
    am_min: QpInput,
    footstep_task: Vec<QpInput>,
    footstep_reg: Vec<QpInput>,
    dynamics: QpInput,
    polygon: SupportPolygon,
    multipliers: Vec<f64>,
    durations: Vec<f64>,
}

impl Scratch {
    fn new(config: &IcpOptimizerConfig, polygon_vertices: usize) -> Self {
        let max_vars = 4 + 2 * config.max_footsteps;
        let max_constraints = polygon_vertices + 4 + 4 * config.max_footsteps;
        Self {
            problem: QpProblem::with_capacity(max_vars, max_constraints),
            x: DVector::zeros(max_vars),
            feedback_min: QpInput::with_capacity(2),
            feedback_reg: QpInput::with_capacity(2),
            am_min: QpInput::with_capacity(2),
            footstep_task: vec![QpInput::with_capacity(2); config.max_footsteps],
            footstep_reg: vec![QpInput::with_capacity(2); config.max_footsteps],
            dynamics: QpInput::with_capacity(max_vars),
            polygon: SupportPolygon::with_capacity(polygon_vertices),
            multipliers: Vec::with_capacity(config.max_footsteps + 1),
            durations: Vec::with_capacity(config.max_footsteps),
        }
    }
}

/// Capture-point optimizer generic over the QP backend.
pub struct IcpOptimizer<S> {
    config: IcpOptimizerConfig,
    solver: S,
    scratch: Scratch,
    previous_feedback: Vector2<f64>,
    previous_angular_momentum: Vector2<f64>,
    solution: IcpSolution,
}

impl<S: QpSolver> IcpOptimizer<S> {
    /// `config` is assumed validated (see [`IcpOptimizerConfig::validate`]).
    pub fn new(config: IcpOptimizerConfig, solver: S) -> Self {
        Self::with_polygon_capacity(config, solver, 0)
    }

    /// Like [`Self::new`], with constraint storage for a support polygon of at
    /// least `vertices` vertices (e.g. the summed sole vertices of every
    /// limb). The configured `max_polygon_vertices` is the floor.
    pub fn with_polygon_capacity(config: IcpOptimizerConfig, solver: S, vertices: usize) -> Self {
        let scratch = Scratch::new(&config, vertices.max(config.max_polygon_vertices));
        let solution = IcpSolution::with_capacity(config.max_footsteps);
        Self {
            config,
            solver,
            scratch,
            previous_feedback: Vector2::zeros(),
            previous_angular_momentum: Vector2::zeros(),
            solution,
        }
    }

    pub const fn config(&self) -> &IcpOptimizerConfig {
        &self.config
    }

    /// Last computed solution.
    pub const fn solution(&self) -> &IcpSolution {
        &self.solution
    }

    /// Inequality rows the scratch problem holds without growing.
    pub fn constraint_capacity(&self) -> usize {
        self.scratch.problem.constraint_capacity()
    }

    /// Recursion multipliers of the last tick, one per footstep in the horizon.
    pub fn recursion_multipliers(&self) -> &[f64] {
        &self.scratch.multipliers
    }

    /// Build and solve this tick's QP.
    pub fn compute(&mut self, input: &IcpOptimizerInput<'_>) -> &IcpSolution {
        let omega = input.capture.omega;
        let valid = omega > 0.0 && omega.is_finite();
        let perfect = if valid {
            perfect_cmp(&input.desired_icp, &input.desired_icp_velocity, omega)
        } else {
            input.desired_icp
        };
        self.solution.perfect_cmp = perfect;
        self.solution.trace = TickTrace::default();

        let outcome = if valid {
            self.assemble(input, perfect)
                .map_err(SolveError::from)
                .and_then(|layout| self.solve(input, layout))
        } else {
            Err(SolveError::InvalidInput(format!("omega must be positive, got {omega}")))
        };

        if let Err(e) = outcome {
            warn!(error = %e, "ICP optimizer holding previous solution");
            self.hold(input, e);
        }

        let s = &mut self.solution;
        s.cop = s.perfect_cmp + s.feedback;
        s.cmp = s.cop + s.angular_momentum;
        &self.solution
    }

    /// Store the last solution as the regularisation reference.
    ///
    /// Held solutions already equal the committed state, so this is a no-op
    /// for them.
    pub fn commit(&mut self) {
        if self.solution.is_solved() {
            self.previous_feedback = self.solution.feedback;
            self.previous_angular_momentum = self.solution.angular_momentum;
        }
    }

    /// Drop the last solution in favour of the committed state, e.g. when the
    /// tick it was computed for is abandoned.
    pub fn discard(&mut self) {
        let s = &mut self.solution;
        s.status = SolutionStatus::Held;
        s.feedback = self.previous_feedback;
        s.angular_momentum = self.previous_angular_momentum;
        s.footsteps.clear();
        s.cop = s.perfect_cmp + s.feedback;
        s.cmp = s.cop + s.angular_momentum;
    }

    /// Forget the previous solution.
    pub fn reset(&mut self) {
        self.previous_feedback = Vector2::zeros();
        self.previous_angular_momentum = Vector2::zeros();
        self.solution.feedback = Vector2::zeros();
        self.solution.angular_momentum = Vector2::zeros();
        self.solution.footsteps.clear();
        self.solution.status = SolutionStatus::Held;
    }

    fn horizon(&self, input: &IcpOptimizerInput<'_>) -> usize {
        input.footsteps.len().min(self.config.max_footsteps)
    }

    #[allow(clippy::too_many_lines)]
    fn assemble(
        &mut self,
        input: &IcpOptimizerInput<'_>,
        perfect: Vector2<f64>,
    ) -> Result<QpVariableLayout, LayoutError> {
        let cfg = &self.config;
        let sc = &mut self.scratch;
        let horizon = input.footsteps.len().min(cfg.max_footsteps);
        let layout = compute_layout(cfg.feature_flags(), horizon);
        let footsteps = &input.footsteps[..layout.footstep_count()];

        sc.problem.reset(layout.size())?;

        // Recursion timing.
        sc.durations.clear();
        for pair in input.footsteps[..horizon].windows(2) {
            sc.durations.push(pair[1].interval.end - pair[0].interval.end);
        }
        let time_remaining = input
            .footsteps
            .first()
            .map_or(0.0, |f| f.interval.end - input.time);
        footstep_recursion_multipliers(
            input.capture.omega,
            time_remaining,
            &sc.durations,
            &mut sc.multipliers,
        );
        sc.multipliers.truncate(horizon.max(1));
        let first_step_multiplier = if horizon > 0 { sc.multipliers[0] } else { 0.0 };
        self.solution.trace.first_step_multiplier = first_step_multiplier;

        // Costs.
        let feedback_weight = Matrix2::from_diagonal(&Vector2::from(cfg.feedback_weight));
        let reg_weight = Matrix2::from_diagonal_element(cfg.feedback_regularization_weight);
        feedback_minimization(&feedback_weight, &mut sc.feedback_min)?;
        submit(&sc.feedback_min, Block::Feedback, &layout, &mut sc.problem)?;
        feedback_regularization(&reg_weight, &self.previous_feedback, &mut sc.feedback_reg)?;
        submit(&sc.feedback_reg, Block::Feedback, &layout, &mut sc.problem)?;

        if layout.angular_momentum_index().is_some() {
            let am_weight = Matrix2::from_diagonal_element(cfg.angular_momentum_weight);
            angular_momentum_minimization(&am_weight, &mut sc.am_min)?;
            submit(&sc.am_min, Block::AngularMomentum, &layout, &mut sc.problem)?;
        }

        let step_weight = Matrix2::from_diagonal(&Vector2::from(cfg.footstep_weight));
        let step_reg_weight = Matrix2::from_diagonal_element(cfg.footstep_regularization_weight);
        for (i, step) in footsteps.iter().enumerate() {
            footstep_task(&step_weight, &step.reference, &mut sc.footstep_task[i])?;
            submit(&sc.footstep_task[i], Block::Footstep(i), &layout, &mut sc.problem)?;
            footstep_regularization(&step_reg_weight, &step.previous, &mut sc.footstep_reg[i])?;
            submit(&sc.footstep_reg[i], Block::Footstep(i), &layout, &mut sc.problem)?;
        }

        let measured_icp = input.capture.icp();
        let dynamics = DynamicsTask {
            weight: cfg.dynamics_weight,
            feedback_gain: cfg.feedback_gain(),
            icp_error: icp_error(&input.desired_icp, &measured_icp),
            first_step_multiplier,
            first_step_reference: footsteps.first().map_or_else(Vector2::zeros, |f| f.reference),
            safety_factor: cfg.safety_factor,
        };
        dynamics_task(&dynamics, &layout, &mut sc.dynamics)?;
        submit(&sc.dynamics, Block::Full, &layout, &mut sc.problem)?;

        // Constraints.
        let fb = layout.feedback_index();
        let polygon_rows = if cfg.use_support_polygon_constraint {
            sc.polygon.rebuild(input.contacts);
            if sc.polygon.has_area() { sc.polygon.len() } else { 0 }
        } else {
            0
        };
        let rows = polygon_rows + 4 + 4 * footsteps.len();
        if sc.problem.reserve_constraints(rows) {
            warn!(rows, vertices = polygon_rows, "support polygon exceeds constraint capacity, growing storage");
        }
        if polygon_rows > 0 {
            for (n, b) in sc.polygon.halfspaces() {
                sc.problem
                    .add_inequality([(fb, n.x), (fb + 1, n.y)], b - n.dot(&perfect))?;
            }
        }
        for axis in 0..2 {
            let limit = cfg.max_feedback[axis];
            sc.problem.add_inequality([(fb + axis, 1.0)], limit)?;
            sc.problem.add_inequality([(fb + axis, -1.0)], limit)?;
        }
        for (i, step) in footsteps.iter().enumerate() {
            let Some(idx) = layout.footstep_index(i) else {
                break;
            };
            for axis in 0..2 {
                let limit = cfg.max_footstep_adjustment[axis];
                sc.problem
                    .add_inequality([(idx + axis, 1.0)], step.reference[axis] + limit)?;
                sc.problem
                    .add_inequality([(idx + axis, -1.0)], limit - step.reference[axis])?;
            }
        }

        Ok(layout)
    }

    fn solve(&mut self, input: &IcpOptimizerInput<'_>, layout: QpVariableLayout) -> Result<(), SolveError> {
        let horizon = self.horizon(input);
        let sc = &mut self.scratch;
        let stats = self.solver.solve(&sc.problem, &mut sc.x)?;
        let x = &sc.x;

        let s = &mut self.solution;
        s.status = SolutionStatus::Solved;
        s.feedback = Vector2::new(x[0], x[1]);
        s.angular_momentum = layout
            .angular_momentum_index()
            .map_or_else(Vector2::zeros, |i| Vector2::new(x[i], x[i + 1]));

        s.footsteps.clear();
        for (i, step) in input.footsteps.iter().take(horizon).enumerate() {
            let location = layout
                .footstep_index(i)
                .map_or(step.planned, |idx| Vector2::new(x[idx], x[idx + 1]));
            s.footsteps.push((step.step, location));
        }

        let t = &mut s.trace;
        let block = |offset: usize| x.rows(offset, 2);
        t.feedback_cost = sc.feedback_min.cost(&block(0));
        t.feedback_regularization_cost = sc.feedback_reg.cost(&block(0));
        if let Some(i) = layout.angular_momentum_index() {
            t.angular_momentum_cost = sc.am_min.cost(&block(i));
        }
        for i in 0..layout.footstep_count() {
            if let Some(idx) = layout.footstep_index(i) {
                t.footstep_cost += sc.footstep_task[i].cost(&block(idx));
                t.footstep_regularization_cost += sc.footstep_reg[i].cost(&block(idx));
            }
        }
        t.dynamics_cost = sc.dynamics.cost(&x.rows(0, layout.size()));
        t.total_residual = sc.problem.residual();
        t.objective = sc.problem.objective(x);
        t.num_variables = sc.problem.num_variables();
        t.num_constraints = sc.problem.num_constraints();
        t.iterations = stats.iterations;
        t.solve_time_us = stats.solve_time_us;
        Ok(())
    }

    fn hold(&mut self, input: &IcpOptimizerInput<'_>, error: SolveError) {
        let horizon = self.horizon(input);
        let s = &mut self.solution;
        s.status = SolutionStatus::Held;
        s.feedback = self.previous_feedback;
        s.angular_momentum = self.previous_angular_momentum;
        s.footsteps.clear();
        s.footsteps
            .extend(input.footsteps.iter().take(horizon).map(|f| (f.step, f.planned)));
        s.trace.failure = Some(error);
    }
}

//! One control tick: gait → capture-point QP → wrench distribution → VMC.
//!
//! The contact set is final before the QP is built, and the QP is solved
//! before any torque is mapped. A tick never returns an error or unwinds:
//! every fault ends in an all-zero torque command and an `error!` record.

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use nalgebra::{Vector2, Vector3};
use tracing::{debug, error, warn};

use crate::capture::{angular_momentum_torque, cmp_force};
use crate::config::BalanceConfig;
use crate::contact::clamp_to_friction_cone;
use crate::error::{BalanceError, GaitError, SolveError, VmcError};
use crate::gait::{FootMeasurement, GaitEvent, GaitInput, GaitStateMachine};
use crate::optimizer::{IcpOptimizer, IcpOptimizerInput, SolutionStatus, TickTrace};
use crate::solver::QpSolver;
use crate::swing::SwingSetpoint;
use crate::types::{
    BodyId, CaptureState, FootstepCommand, FootstepTarget, JointTorqueCommand, LimbId, StepId,
};
use crate::vmc::{DesiredWrench, JointSpec, KinematicsProvider, VirtualModelController};

// ---------------------------------------------------------------------------
// FootstepInbox
// ---------------------------------------------------------------------------

/// Thread-safe buffer for footstep commands produced off the control thread.
///
/// The controller drains it in one critical section at the start of each
/// tick, so a tick always sees a stable snapshot of the queue.
#[derive(Clone, Debug, Default)]
pub struct FootstepInbox {
    pending: Arc<Mutex<Vec<FootstepCommand>>>,
}

impl FootstepInbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, command: FootstepCommand) {
        self.lock().push(command);
    }

    pub fn extend(&self, commands: impl IntoIterator<Item = FootstepCommand>) {
        self.lock().extend(commands);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Move every buffered command into `out`.
    pub fn drain_into(&self, out: &mut Vec<FootstepCommand>) {
        out.append(&mut self.lock());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<FootstepCommand>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ---------------------------------------------------------------------------
// Tick input / output
// ---------------------------------------------------------------------------

/// Everything read from the outside world for one tick.
#[derive(Clone, Copy)]
pub struct ControllerInput<'a> {
    pub time: f64,
    pub capture: CaptureState,
    pub desired_icp: Vector2<f64>,
    pub desired_icp_velocity: Vector2<f64>,
    pub feet: &'a [FootMeasurement],
    /// Extra body wrenches. A wrench on a support body replaces its share.
    pub task_wrenches: &'a [(BodyId, DesiredWrench)],
    pub kinematics: &'a dyn KinematicsProvider,
}

/// Contact state published to downstream consumers.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ContactStatus {
    pub limb: LimbId,
    pub active: bool,
    pub anchor: Vector2<f64>,
    pub yaw: f64,
}

/// Result of one tick.
#[derive(Clone, Debug, Default)]
pub struct TickOutput {
    pub torques: JointTorqueCommand,
    pub contacts: Vec<ContactStatus>,
    pub events: Vec<GaitEvent>,
    pub swing_setpoints: Vec<(LimbId, SwingSetpoint)>,
    pub trace: TickTrace,
    pub status: Option<SolutionStatus>,
    pub feedback: Vector2<f64>,
    pub cmp: Vector2<f64>,
    /// Whether the optimizer result was committed this tick.
    pub committed: bool,
    /// The tick failed and commanded zero torque.
    pub faulted: bool,
}

impl TickOutput {
    fn clear(&mut self) {
        self.torques.set_zero();
        self.contacts.clear();
        self.events.clear();
        self.swing_setpoints.clear();
        self.status = None;
        self.feedback = Vector2::zeros();
        self.cmp = Vector2::zeros();
        self.committed = false;
        self.faulted = false;
    }
}

// ---------------------------------------------------------------------------
// BalanceController
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct SupportLimb {
    limb: LimbId,
    body: BodyId,
}

/// Balance and stepping controller for one robot.
pub struct BalanceController<S> {
    config: BalanceConfig,
    gait: GaitStateMachine,
    optimizer: IcpOptimizer<S>,
    vmc: VirtualModelController,
    supports: Vec<SupportLimb>,
    walking: Arc<AtomicBool>,
    inbox: FootstepInbox,
    drained: Vec<FootstepCommand>,
    footsteps: Vec<FootstepTarget>,
    output: TickOutput,
}

impl<S: QpSolver> BalanceController<S> {
    /// Validate `config`, build one contact per limb and register each limb's
    /// support body with the virtual model controller.
    pub fn new(config: BalanceConfig, solver: S) -> Result<Self, BalanceError> {
        config.validate()?;
        let gait = GaitStateMachine::new(config.gait.clone(), &config.limbs)?;
        let mut vmc = VirtualModelController::new();
        let mut supports = Vec::with_capacity(config.limbs.len());
        for limb in &config.limbs {
            vmc.register_controlled_body(limb.support_body.clone(), limb.chain.clone())?;
            supports.push(SupportLimb {
                limb: limb.id,
                body: limb.support_body.clone(),
            });
        }

        let horizon = config.optimizer.max_footsteps;
        let optimizer = IcpOptimizer::with_polygon_capacity(
            config.optimizer.clone(),
            solver,
            config.total_sole_vertices(),
        );
        let output = TickOutput {
            torques: vmc.torques().clone(),
            contacts: Vec::with_capacity(supports.len()),
            swing_setpoints: Vec::with_capacity(supports.len()),
            ..TickOutput::default()
        };

        Ok(Self {
            config,
            gait,
            optimizer,
            vmc,
            supports,
            walking: Arc::new(AtomicBool::new(true)),
            inbox: FootstepInbox::new(),
            drained: Vec::new(),
            footsteps: Vec::with_capacity(horizon),
            output,
        })
    }

    /// Register an additional controlled body for caller task wrenches.
    pub fn register_task_body(&mut self, body: BodyId, chain: Vec<JointSpec>) -> Result<(), VmcError> {
        self.vmc.register_controlled_body(body, chain)?;
        self.output.torques = self.vmc.torques().clone();
        Ok(())
    }

    pub const fn config(&self) -> &BalanceConfig {
        &self.config
    }

    pub const fn gait(&self) -> &GaitStateMachine {
        &self.gait
    }

    pub const fn optimizer(&self) -> &IcpOptimizer<S> {
        &self.optimizer
    }

    pub const fn vmc(&self) -> &VirtualModelController {
        &self.vmc
    }

    /// Output of the last tick.
    pub const fn output(&self) -> &TickOutput {
        &self.output
    }

    /// Shared walking-enable flag. Clearing it returns every limb to Support
    /// on the next tick.
    pub fn walking_enable(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.walking)
    }

    /// Handle for pushing footstep commands from another thread.
    pub fn footstep_inbox(&self) -> FootstepInbox {
        self.inbox.clone()
    }

    /// Queue a footstep directly from the control thread.
    pub fn enqueue_footstep(&mut self, command: &FootstepCommand) -> Result<Option<StepId>, GaitError> {
        self.gait.enqueue(command)
    }

    /// Return to standing and forget every cached solution.
    pub fn reset(&mut self, feet: &[FootMeasurement]) {
        self.gait.reset(feet);
        self.optimizer.reset();
        self.inbox.drain_into(&mut self.drained);
        self.drained.clear();
    }

    /// Run one control tick.
    pub fn tick(&mut self, input: &ControllerInput<'_>) -> &TickOutput {
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.run(input)));
        let fault = match outcome {
            Ok(Ok(())) => None,
            Ok(Err(e)) => Some(e.to_string()),
            Err(payload) => Some(
                payload
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "panic".to_string()),
            ),
        };
        if let Some(reason) = fault {
            error!(time = input.time, %reason, "control tick failed, commanding zero torque");
            self.output.torques.set_zero();
            self.output.committed = false;
            self.output.faulted = true;
        }
        &self.output
    }

    fn run(&mut self, input: &ControllerInput<'_>) -> Result<(), BalanceError> {
        self.output.clear();
        // A faulted tick may have left wrenches staged.
        self.vmc.clear_staged();
        validate_capture(&input.capture)?;

        let walking = self.walking.load(Ordering::Acquire);
        self.drain_inbox(walking);

        // Contacts are decided first.
        let gait_input = GaitInput {
            time: input.time,
            walking_enabled: walking,
            measured_icp: input.capture.icp(),
            setpoint_icp: input.desired_icp,
            feet: input.feet,
        };
        self.gait.update(&gait_input, &mut self.output.events);
        if !walking {
            self.optimizer.reset();
        }

        self.gait
            .upcoming_footsteps(self.config.optimizer.max_footsteps, &mut self.footsteps);
        self.optimizer.compute(&IcpOptimizerInput {
            time: input.time,
            capture: &input.capture,
            desired_icp: input.desired_icp,
            desired_icp_velocity: input.desired_icp_velocity,
            contacts: self.gait.contacts(),
            footsteps: &self.footsteps,
        });

        if self.walking.load(Ordering::Acquire) != walking {
            debug!(time = input.time, "walking flag changed during tick, discarding solution");
            self.optimizer.discard();
        } else if self.optimizer.solution().is_solved() {
            self.optimizer.commit();
            for &(step, location) in &self.optimizer.solution().footsteps {
                self.gait.apply_footstep_solution(step, location);
            }
            self.output.committed = true;
        }

        self.distribute_wrench(&input.capture)?;
        for (body, wrench) in input.task_wrenches {
            self.vmc.submit_wrench(body, wrench)?;
        }
        let torques = self.vmc.compute(input.kinematics)?;
        self.output
            .torques
            .torques_mut()
            .copy_from_slice(torques.torques());

        self.publish();
        Ok(())
    }

    fn drain_inbox(&mut self, walking: bool) {
        self.inbox.drain_into(&mut self.drained);
        if !walking {
            if !self.drained.is_empty() {
                debug!(count = self.drained.len(), "walking disabled, dropping footstep commands");
            }
            self.drained.clear();
            return;
        }
        for command in self.drained.drain(..) {
            if let Err(e) = self.gait.enqueue(&command) {
                warn!(error = %e, "rejected footstep command");
            }
        }
    }

    /// Split the CoM wrench implied by the CMP equally over the supporting
    /// limbs. Swinging limbs get an explicit zero wrench.
    fn distribute_wrench(&mut self, capture: &CaptureState) -> Result<(), VmcError> {
        let solution = self.optimizer.solution();
        let force = cmp_force(
            self.config.mass,
            capture.omega,
            &capture.com_position.xy(),
            &solution.cmp,
            self.config.gravity,
        );
        let torque = angular_momentum_torque(&solution.angular_momentum, force.z);

        let contacts = self.gait.contacts();
        let active = contacts.iter().filter(|c| c.is_active()).count();
        let share = if active > 0 { 1.0 / active as f64 } else { 0.0 };

        for (support, contact) in self.supports.iter().zip(contacts) {
            debug_assert_eq!(support.limb, contact.limb());
            let wrench = if contact.is_active() {
                let f = clamp_to_friction_cone(&(force * share), contact.friction());
                DesiredWrench::new(torque * share, f)
            } else {
                DesiredWrench::new(Vector3::zeros(), Vector3::zeros())
            };
            self.vmc.submit_wrench(&support.body, &wrench)?;
        }
        Ok(())
    }

    fn publish(&mut self) {
        let out = &mut self.output;
        let solution = self.optimizer.solution();
        out.status = Some(solution.status);
        out.feedback = solution.feedback;
        out.cmp = solution.cmp;
        out.trace.clone_from(&solution.trace);
        out.contacts.extend(self.gait.contacts().iter().map(|c| ContactStatus {
            limb: c.limb(),
            active: c.is_active(),
            anchor: c.anchor(),
            yaw: c.yaw(),
        }));
        out.swing_setpoints.extend(self.gait.swing_setpoints());
    }
}

fn validate_capture(capture: &CaptureState) -> Result<(), SolveError> {
    let finite = capture.com_position.iter().all(|v| v.is_finite())
        && capture.com_velocity.iter().all(|v| v.is_finite());
    if !finite {
        return Err(SolveError::InvalidInput("non-finite CoM state".into()));
    }
    if !(capture.omega > 0.0 && capture.omega.is_finite()) {
        return Err(SolveError::InvalidInput(format!(
            "omega must be positive, got {}",
            capture.omega
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LimbConfig, LimbSide, SolverConfig};
    use crate::solver::{ClarabelSolver, QpProblem, SolveStats};
    use crate::types::JointId;
    use crate::vmc::JointFrame;
    use approx::assert_relative_eq;
    use nalgebra::DVector;
    use std::collections::HashMap;

    struct Frames {
        joints: HashMap<JointId, JointFrame>,
        points: HashMap<BodyId, Vector3<f64>>,
    }

    impl KinematicsProvider for Frames {
        fn joint_frame(&self, joint: &JointId) -> Option<JointFrame> {
            self.joints.get(joint).copied()
        }

        fn body_point(&self, body: &BodyId) -> Option<Vector3<f64>> {
            self.points.get(body).copied()
        }
    }

    struct PanickingSolver;

    impl QpSolver for PanickingSolver {
        fn solve(&mut self, _: &QpProblem, _: &mut DVector<f64>) -> Result<SolveStats, SolveError> {
            panic!("solver exploded");
        }
    }

    fn leg(id: usize, side: LimbSide, y: f64) -> LimbConfig {
        LimbConfig {
            id: LimbId(id),
            side,
            support_body: format!("foot_{id}").into(),
            chain: vec![JointSpec::revolute(format!("hip_{id}"))],
            sole_vertices: vec![[0.1, 0.05], [-0.1, 0.05], [-0.1, -0.05], [0.1, -0.05]],
            friction: 0.8,
            initial_position: [0.0, y],
            initially_supporting: true,
        }
    }

    fn config() -> BalanceConfig {
        BalanceConfig {
            mass: 20.0,
            limbs: vec![leg(0, LimbSide::Left, 0.1), leg(1, LimbSide::Right, -0.1)],
            ..BalanceConfig::default()
        }
    }

    fn frames() -> Frames {
        let mut joints = HashMap::new();
        let mut points = HashMap::new();
        for (id, y) in [(0, 0.1), (1, -0.1)] {
            joints.insert(
                JointId::from(format!("hip_{id}")),
                JointFrame {
                    origin: Vector3::new(0.0, y, 0.6),
                    axis: Vector3::y(),
                },
            );
            points.insert(BodyId::from(format!("foot_{id}")), Vector3::new(0.05, y, 0.0));
        }
        Frames { joints, points }
    }

    fn standing(kinematics: &Frames) -> ControllerInput<'_> {
        ControllerInput {
            time: 0.0,
            capture: CaptureState {
                com_position: Vector3::new(0.0, 0.0, 0.6),
                com_velocity: Vector3::zeros(),
                omega: (9.81_f64 / 0.6).sqrt(),
            },
            desired_icp: Vector2::zeros(),
            desired_icp_velocity: Vector2::zeros(),
            feet: &[],
            task_wrenches: &[],
            kinematics,
        }
    }

    #[test]
    fn rejects_invalid_config() {
        let mut cfg = config();
        cfg.optimizer.feedback_gain = [0.0, 1.0];
        let result = BalanceController::new(cfg, ClarabelSolver::new(SolverConfig::default()));
        assert!(matches!(result, Err(BalanceError::Config(_))));
    }

    #[test]
    fn standing_splits_weight() {
        let cfg = config();
        let solver = ClarabelSolver::new(cfg.solver.clone());
        let mut controller = BalanceController::new(cfg, solver).unwrap();
        let kin = frames();
        let out = controller.tick(&standing(&kin));
        assert!(!out.faulted);
        assert!(out.committed);
        assert_eq!(out.status, Some(SolutionStatus::Solved));
        assert_relative_eq!(out.feedback.norm(), 0.0, epsilon = 1e-4);
        // Half the weight per foot, lever arm 0.05 about ŷ.
        let expected = -0.05 * 20.0 * 9.81 / 2.0;
        assert_relative_eq!(out.torques.get("hip_0").unwrap(), expected, epsilon = 1e-2);
        assert_relative_eq!(out.torques.get("hip_1").unwrap(), expected, epsilon = 1e-2);
        assert_eq!(out.contacts.len(), 2);
        assert!(out.contacts.iter().all(|c| c.active));
    }

    #[test]
    fn invalid_capture_commands_zero_torque() {
        let cfg = config();
        let solver = ClarabelSolver::new(cfg.solver.clone());
        let mut controller = BalanceController::new(cfg, solver).unwrap();
        let kin = frames();
        let mut input = standing(&kin);
        input.capture.omega = f64::NAN;
        let out = controller.tick(&input);
        assert!(out.faulted);
        assert!(out.torques.is_all_zero());
        assert_eq!(out.torques.len(), 2);
    }

    #[test]
    fn panic_in_solver_is_contained() {
        let mut controller = BalanceController::new(config(), PanickingSolver).unwrap();
        let kin = frames();
        let out = controller.tick(&standing(&kin));
        assert!(out.faulted);
        assert!(out.torques.is_all_zero());
    }

    #[test]
    fn missing_kinematics_faults() {
        let cfg = config();
        let solver = ClarabelSolver::new(cfg.solver.clone());
        let mut controller = BalanceController::new(cfg, solver).unwrap();
        let kin = Frames {
            joints: HashMap::new(),
            points: HashMap::new(),
        };
        let out = controller.tick(&standing(&kin));
        assert!(out.faulted);
        assert!(out.torques.is_all_zero());
    }

    #[test]
    fn inbox_drained_at_tick_start() {
        let cfg = config();
        let solver = ClarabelSolver::new(cfg.solver.clone());
        let mut controller = BalanceController::new(cfg, solver).unwrap();
        let inbox = controller.footstep_inbox();
        let producer = std::thread::spawn(move || {
            inbox.push(FootstepCommand::new(LimbId(0), Vector2::new(0.2, 0.1), 1.0, 1.6));
            inbox.push(FootstepCommand::new(LimbId(5), Vector2::new(0.2, 0.1), 1.0, 1.6));
        });
        producer.join().unwrap();
        assert_eq!(controller.footstep_inbox().len(), 2);

        let kin = frames();
        controller.tick(&standing(&kin));
        assert!(controller.footstep_inbox().is_empty());
        // The unknown limb is rejected, the valid step is queued.
        assert_eq!(controller.gait().queued_len(), 1);
    }

    #[test]
    fn disabling_walking_clears_queue() {
        let cfg = config();
        let solver = ClarabelSolver::new(cfg.solver.clone());
        let mut controller = BalanceController::new(cfg, solver).unwrap();
        controller
            .enqueue_footstep(&FootstepCommand::new(LimbId(0), Vector2::new(0.2, 0.1), 1.0, 1.6))
            .unwrap();
        controller.walking_enable().store(false, Ordering::Release);

        let kin = frames();
        let out = controller.tick(&standing(&kin));
        assert!(!out.faulted);
        assert_eq!(controller.gait().queued_len(), 0);
    }

    #[test]
    fn task_wrench_overrides_support() {
        let cfg = config();
        let solver = ClarabelSolver::new(cfg.solver.clone());
        let mut controller = BalanceController::new(cfg, solver).unwrap();
        let kin = frames();
        let baseline = controller.tick(&standing(&kin)).torques.get("hip_0").unwrap();

        // Overriding the support wrench of foot_0 with a pure force along ŷ
        // produces no torque about the ŷ hip axis.
        let wrenches = [(
            BodyId::from("foot_0"),
            DesiredWrench::force(Vector3::new(0.0, 10.0, 0.0)),
        )];
        let input = ControllerInput {
            task_wrenches: &wrenches,
            ..standing(&kin)
        };
        let out = controller.tick(&input);
        assert!(baseline.abs() > 1.0);
        assert_relative_eq!(out.torques.get("hip_0").unwrap(), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn constraint_storage_covers_every_sole() {
        let round: Vec<[f64; 2]> = (0..20)
            .map(|i| {
                let a = std::f64::consts::TAU * f64::from(i) / 20.0;
                [0.1 * a.cos(), 0.05 * a.sin()]
            })
            .collect();
        let mut cfg = config();
        for limb in &mut cfg.limbs {
            limb.sole_vertices.clone_from(&round);
        }
        assert_eq!(cfg.total_sole_vertices(), 40);
        let horizon = cfg.optimizer.max_footsteps;
        let solver = ClarabelSolver::new(cfg.solver.clone());
        let mut controller = BalanceController::new(cfg, solver).unwrap();
        let capacity = controller.optimizer().constraint_capacity();
        assert_eq!(capacity, 40 + 4 + 4 * horizon);

        for i in 0..horizon {
            let t = 1.0 + 0.8 * i as f64;
            let (limb, y) = if i % 2 == 0 { (0, 0.1) } else { (1, -0.1) };
            controller
                .enqueue_footstep(&FootstepCommand::new(LimbId(limb), Vector2::new(0.1 * (i + 1) as f64, y), t, t + 0.6))
                .unwrap();
        }
        let kin = frames();
        let out = controller.tick(&standing(&kin));
        assert!(!out.faulted);
        assert!(out.committed);
        assert_eq!(out.status, Some(SolutionStatus::Solved));
        assert_eq!(controller.optimizer().constraint_capacity(), capacity);
    }
}

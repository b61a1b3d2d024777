//! Per-limb Support/Swing stepping state machine.
//!
//! Each limb carries a tagged [`GaitPhase`]. Transitions come from a fixed
//! `(phase, trigger) -> phase` table; entry, exit and per-tick action hooks are
//! plain function pointers looked up by phase. The machine owns the contact
//! models and the footstep queue, and at most one transition fires per limb
//! per tick.
//!
//! Touchdown policy: a sensed contact (force at or above the threshold, or
//! foot height above the liftoff ground at or below the threshold) ends the
//! swing early, but only once `min_swing_fraction` of the swing has elapsed.
//! Otherwise the swing ends at its scheduled touchdown time.

use nalgebra::{Vector2, Vector3};
use tracing::{debug, warn};

use crate::adjustment::{CrossoverProjection, instantaneous_step_adjustment, project_to_ground};
use crate::config::{GaitConfig, LimbConfig, LimbSide};
use crate::contact::ContactModel;
use crate::error::{ConfigError, GaitError};
use crate::swing::{SwingSetpoint, SwingTrajectory};
use crate::types::{FootstepCommand, FootstepTarget, LimbId, StepId, TimeInterval};

// ---------------------------------------------------------------------------
// Phases and transitions
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GaitPhase {
    Support,
    Swing,
}

impl GaitPhase {
    const fn index(self) -> usize {
        match self {
            Self::Support => 0,
            Self::Swing => 1,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Trigger {
    LiftOff,
    ScheduledTouchDown,
    SensedTouchDown,
}

const TRANSITIONS: [(GaitPhase, Trigger, GaitPhase); 3] = [
    (GaitPhase::Support, Trigger::LiftOff, GaitPhase::Swing),
    (GaitPhase::Swing, Trigger::ScheduledTouchDown, GaitPhase::Support),
    (GaitPhase::Swing, Trigger::SensedTouchDown, GaitPhase::Support),
];

fn transition(from: GaitPhase, trigger: Trigger) -> Option<GaitPhase> {
    TRANSITIONS
        .iter()
        .find(|(f, t, _)| *f == from && *t == trigger)
        .map(|&(_, _, to)| to)
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum GaitEvent {
    LiftOff {
        limb: LimbId,
        step: StepId,
        time: f64,
    },
    TouchDown {
        limb: LimbId,
        location: Vector2<f64>,
        time: f64,
        /// Ended early by a contact sensor rather than by the schedule.
        sensed: bool,
    },
}

impl GaitEvent {
    pub const fn limb(&self) -> LimbId {
        match *self {
            Self::LiftOff { limb, .. } | Self::TouchDown { limb, .. } => limb,
        }
    }
}

/// Receives liftoff and touchdown events as they happen.
pub trait GaitEventListener {
    fn on_event(&mut self, event: GaitEvent);
}

impl GaitEventListener for Vec<GaitEvent> {
    fn on_event(&mut self, event: GaitEvent) {
        self.push(event);
    }
}

impl GaitEventListener for () {
    fn on_event(&mut self, _event: GaitEvent) {}
}

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Measured state of one foot.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct FootMeasurement {
    pub limb: LimbId,
    /// World position of the sole centre.
    pub position: Vector3<f64>,
    pub yaw: f64,
    /// Normal contact force, if the limb has a force sensor.
    pub contact_force: Option<f64>,
}

/// Snapshot read by [`GaitStateMachine::update`].
#[derive(Clone, Copy, Debug)]
pub struct GaitInput<'a> {
    pub time: f64,
    pub walking_enabled: bool,
    pub measured_icp: Vector2<f64>,
    pub setpoint_icp: Vector2<f64>,
    pub feet: &'a [FootMeasurement],
}

impl GaitInput<'_> {
    fn foot(&self, limb: LimbId) -> Option<&FootMeasurement> {
        self.feet.iter().find(|f| f.limb == limb)
    }
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
struct QueuedStep {
    step: StepId,
    limb: LimbId,
    interval: TimeInterval,
    reference: Vector2<f64>,
    planned: Vector2<f64>,
    previous: Vector2<f64>,
}

impl QueuedStep {
    fn target(&self) -> FootstepTarget {
        FootstepTarget {
            step: self.step,
            limb: self.limb,
            planned: self.planned,
            reference: self.reference,
            previous: self.previous,
            interval: self.interval,
        }
    }

    fn shift(&mut self, delta: &Vector2<f64>) {
        self.reference += delta;
        self.planned += delta;
        self.previous += delta;
    }
}

#[derive(Clone, Debug)]
struct SwingStep {
    queued: QueuedStep,
    liftoff: Vector2<f64>,
    yaw: f64,
    trajectory: SwingTrajectory,
    /// Goal after adjustment and projection, where the contact will land.
    landing: Vector2<f64>,
    adjustment: Vector2<f64>,
}

#[derive(Clone, Debug)]
struct LimbState {
    id: LimbId,
    side: LimbSide,
    phase: GaitPhase,
    pending: Option<QueuedStep>,
    swing: Option<SwingStep>,
    setpoint: Option<SwingSetpoint>,
    /// Ground height under the foot, sampled at liftoff.
    ground_height: f64,
}

// ---------------------------------------------------------------------------
// Hooks
// ---------------------------------------------------------------------------

struct HookContext<'a, 'b> {
    input: &'a GaitInput<'a>,
    listener: &'b mut dyn GaitEventListener,
    sensed: bool,
}

type Hook = fn(&mut GaitStateMachine, usize, &mut HookContext<'_, '_>);

struct PhaseHooks {
    on_entry: Hook,
    on_exit: Hook,
    action: Hook,
}

const HOOKS: [PhaseHooks; 2] = [
    PhaseHooks {
        on_entry: enter_support,
        on_exit: exit_support,
        action: hold_support,
    },
    PhaseHooks {
        on_entry: enter_swing,
        on_exit: exit_swing,
        action: track_swing,
    },
];

fn enter_support(gait: &mut GaitStateMachine, i: usize, ctx: &mut HookContext<'_, '_>) {
    let time = ctx.input.time;
    let measured = ctx.input.foot(gait.limbs[i].id).copied();
    let limb = &mut gait.limbs[i];

    let step = limb.swing.take();
    let (location, yaw) = match (&step, measured) {
        (Some(s), Some(foot)) if ctx.sensed => (foot.position.xy(), s.yaw),
        (Some(s), _) => (s.landing, s.yaw),
        (None, Some(foot)) => (foot.position.xy(), foot.yaw),
        (None, None) => (gait.contacts[i].anchor(), gait.contacts[i].yaw()),
    };
    if let Some(s) = &step
        && gait.config.accumulate_adjustment
    {
        let delta = location - s.queued.reference;
        for q in &mut gait.queue {
            q.shift(&delta);
        }
    }

    gait.contacts[i].activate(location, yaw);
    debug!(limb = %limb.id, x = location.x, y = location.y, sensed = ctx.sensed, "touchdown");
    ctx.listener.on_event(GaitEvent::TouchDown {
        limb: limb.id,
        location,
        time,
        sensed: ctx.sensed,
    });
}

fn exit_support(gait: &mut GaitStateMachine, i: usize, _ctx: &mut HookContext<'_, '_>) {
    gait.contacts[i].deactivate();
}

fn hold_support(_gait: &mut GaitStateMachine, _i: usize, _ctx: &mut HookContext<'_, '_>) {}

fn enter_swing(gait: &mut GaitStateMachine, i: usize, ctx: &mut HookContext<'_, '_>) {
    let time = ctx.input.time;
    let measured = ctx.input.foot(gait.limbs[i].id).copied();
    let step_height = gait.config.step_height;
    let contact = &gait.contacts[i];
    let limb = &mut gait.limbs[i];

    let Some(queued) = limb.pending.take() else {
        warn!(limb = %limb.id, "swing entered without a footstep");
        return;
    };

    let (start, yaw) = match measured {
        Some(foot) => (foot.position, foot.yaw),
        None => {
            let a = contact.anchor();
            (Vector3::new(a.x, a.y, limb.ground_height), contact.yaw())
        }
    };
    limb.ground_height = start.z;

    let goal = project_to_ground(&queued.planned, start.z);
    let step = queued.step;
    limb.swing = Some(SwingStep {
        liftoff: start.xy(),
        yaw,
        trajectory: SwingTrajectory::new(start, goal, queued.interval, step_height),
        landing: queued.planned,
        adjustment: Vector2::zeros(),
        queued,
    });

    debug!(limb = %limb.id, step = step.0, "liftoff");
    ctx.listener.on_event(GaitEvent::LiftOff {
        limb: limb.id,
        step,
        time,
    });
}

fn exit_swing(gait: &mut GaitStateMachine, i: usize, _ctx: &mut HookContext<'_, '_>) {
    gait.limbs[i].setpoint = None;
}

fn track_swing(gait: &mut GaitStateMachine, i: usize, ctx: &mut HookContext<'_, '_>) {
    let input = ctx.input;
    let config = &gait.config;
    let own = gait.limbs[i].id;
    let others = gait
        .contacts
        .iter()
        .filter(|c| c.is_active() && c.limb() != own)
        .map(ContactModel::anchor);

    let limb = &mut gait.limbs[i];
    let Some(step) = limb.swing.as_mut() else {
        return;
    };

    step.adjustment = instantaneous_step_adjustment(
        config.step_adjustment_gain,
        &input.measured_icp,
        &input.setpoint_icp,
        config.max_adjustment_per_axis,
    );
    let raw = step.queued.planned + step.adjustment;
    step.landing = gait
        .crossover
        .project(raw, limb.side, step.yaw, &step.liftoff, others);
    step.trajectory
        .retarget(project_to_ground(&step.landing, limb.ground_height));
    limb.setpoint = Some(step.trajectory.evaluate(input.time));
}

// ---------------------------------------------------------------------------
// GaitStateMachine
// ---------------------------------------------------------------------------

/// Stepping state machine for every limb of the robot.
#[derive(Clone, Debug)]
pub struct GaitStateMachine {
    config: GaitConfig,
    crossover: CrossoverProjection,
    limbs: Vec<LimbState>,
    contacts: Vec<ContactModel>,
    /// Sorted by liftoff time.
    queue: Vec<QueuedStep>,
    next_step: u64,
    time: f64,
}

impl GaitStateMachine {
    /// Build one contact per limb. Limbs marked `initially_supporting` start
    /// in Support at their initial position; the rest start in a free swing
    /// that only a sensed contact can end.
    pub fn new(config: GaitConfig, limbs: &[LimbConfig]) -> Result<Self, ConfigError> {
        config.validate()?;
        let mut states: Vec<LimbState> = Vec::with_capacity(limbs.len());
        let mut contacts = Vec::with_capacity(limbs.len());

        for limb in limbs {
            if states.iter().any(|s| s.id == limb.id) {
                return Err(ConfigError::DuplicateLimb(limb.id));
            }
            limb.validate()?;
            let vertices = limb.sole_vertices.iter().map(|&v| Vector2::from(v)).collect();
            let mut contact = ContactModel::new(limb.id, vertices, limb.friction)?;
            let phase = if limb.initially_supporting {
                contact.activate(Vector2::from(limb.initial_position), 0.0);
                GaitPhase::Support
            } else {
                GaitPhase::Swing
            };
            states.push(LimbState {
                id: limb.id,
                side: limb.side,
                phase,
                pending: None,
                swing: None,
                setpoint: None,
                ground_height: 0.0,
            });
            contacts.push(contact);
        }

        Ok(Self {
            crossover: CrossoverProjection::from_config(&config),
            config,
            limbs: states,
            contacts,
            queue: Vec::new(),
            next_step: 0,
            time: f64::NEG_INFINITY,
        })
    }

    pub const fn config(&self) -> &GaitConfig {
        &self.config
    }

    /// Contact models in limb order.
    pub fn contacts(&self) -> &[ContactModel] {
        &self.contacts
    }

    pub fn contact(&self, limb: LimbId) -> Option<&ContactModel> {
        self.limb_index(limb).map(|i| &self.contacts[i])
    }

    pub fn limb_ids(&self) -> impl Iterator<Item = LimbId> + '_ {
        self.limbs.iter().map(|l| l.id)
    }

    pub fn phase(&self, limb: LimbId) -> Option<GaitPhase> {
        self.limb_index(limb).map(|i| self.limbs[i].phase)
    }

    /// Time of the last update.
    pub const fn time(&self) -> f64 {
        self.time
    }

    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn active_step(&self, limb: LimbId) -> Option<StepId> {
        let i = self.limb_index(limb)?;
        self.limbs[i].swing.as_ref().map(|s| s.queued.step)
    }

    /// Ground height recorded at the limb's last liftoff.
    pub fn ground_height(&self, limb: LimbId) -> Option<f64> {
        self.limb_index(limb).map(|i| self.limbs[i].ground_height)
    }

    /// Instantaneous adjustment applied to the limb's swing goal this tick.
    pub fn swing_adjustment(&self, limb: LimbId) -> Option<Vector2<f64>> {
        let i = self.limb_index(limb)?;
        self.limbs[i].swing.as_ref().map(|s| s.adjustment)
    }

    pub fn swing_setpoint(&self, limb: LimbId) -> Option<SwingSetpoint> {
        self.limb_index(limb).and_then(|i| self.limbs[i].setpoint)
    }

    pub fn swing_setpoints(&self) -> impl Iterator<Item = (LimbId, SwingSetpoint)> + '_ {
        self.limbs
            .iter()
            .filter_map(|l| l.setpoint.map(|s| (l.id, s)))
    }

    /// Queue a footstep. Returns `Ok(None)` when its touchdown has already
    /// passed and the step was dropped.
    pub fn enqueue(&mut self, command: &FootstepCommand) -> Result<Option<StepId>, GaitError> {
        let limb = command.limb;
        if self.limb_index(limb).is_none() {
            return Err(GaitError::UnknownLimb(limb));
        }
        let TimeInterval { start, end } = command.interval;
        if !(start.is_finite() && end.is_finite() && end > start) {
            return Err(GaitError::InvalidTimeWindow {
                limb,
                liftoff: start,
                touchdown: end,
            });
        }
        if !(command.goal.x.is_finite() && command.goal.y.is_finite()) {
            return Err(GaitError::NonFiniteGoal(limb));
        }
        if end <= self.time {
            warn!(limb = %limb, touchdown = end, now = self.time, "dropping stale footstep");
            return Ok(None);
        }

        let step = StepId(self.next_step);
        self.next_step += 1;
        let at = self.queue.partition_point(|q| q.interval.start <= start);
        self.queue.insert(
            at,
            QueuedStep {
                step,
                limb,
                interval: command.interval,
                reference: command.goal,
                planned: command.goal,
                previous: command.goal,
            },
        );
        Ok(Some(step))
    }

    /// Feed an optimizer result back as the step's planned location.
    ///
    /// Returns false when the step is no longer queued or swinging.
    pub fn apply_footstep_solution(&mut self, step: StepId, location: Vector2<f64>) -> bool {
        let active = self
            .limbs
            .iter_mut()
            .filter_map(|l| l.swing.as_mut())
            .map(|s| &mut s.queued);
        let target = active
            .chain(self.queue.iter_mut())
            .find(|q| q.step == step);
        match target {
            Some(q) => {
                q.planned = location;
                q.previous = location;
                true
            }
            None => false,
        }
    }

    /// Footsteps for the optimizer horizon: active swings by touchdown, then
    /// queued steps by liftoff.
    pub fn upcoming_footsteps(&self, max: usize, out: &mut Vec<FootstepTarget>) {
        out.clear();
        out.extend(
            self.limbs
                .iter()
                .filter_map(|l| l.swing.as_ref())
                .map(|s| s.queued.target()),
        );
        out.sort_by(|a, b| a.interval.end.total_cmp(&b.interval.end));
        out.extend(self.queue.iter().map(QueuedStep::target));
        out.truncate(max);
    }

    /// Advance every limb by one tick.
    pub fn update<L: GaitEventListener>(&mut self, input: &GaitInput<'_>, listener: &mut L) {
        self.time = input.time;
        if !input.walking_enabled {
            self.reset(input.feet);
            return;
        }
        self.drop_stale(input.time);

        let mut ctx = HookContext {
            input,
            listener,
            sensed: false,
        };
        for i in 0..self.limbs.len() {
            let phase = self.limbs[i].phase;
            if let Some(trigger) = self.trigger(i, input)
                && let Some(next) = transition(phase, trigger)
            {
                ctx.sensed = trigger == Trigger::SensedTouchDown;
                (HOOKS[phase.index()].on_exit)(self, i, &mut ctx);
                self.limbs[i].phase = next;
                (HOOKS[next.index()].on_entry)(self, i, &mut ctx);
            }
            let phase = self.limbs[i].phase;
            (HOOKS[phase.index()].action)(self, i, &mut ctx);
        }
    }

    /// Every limb back to Support at its measured foot, with an empty queue.
    pub fn reset(&mut self, feet: &[FootMeasurement]) {
        self.queue.clear();
        for (limb, contact) in self.limbs.iter_mut().zip(&mut self.contacts) {
            limb.phase = GaitPhase::Support;
            limb.pending = None;
            limb.swing = None;
            limb.setpoint = None;
            match feet.iter().find(|f| f.limb == limb.id) {
                Some(foot) => {
                    limb.ground_height = foot.position.z;
                    contact.activate(foot.position.xy(), foot.yaw);
                }
                None => contact.activate(contact.anchor(), contact.yaw()),
            }
        }
    }

    fn limb_index(&self, limb: LimbId) -> Option<usize> {
        self.limbs.iter().position(|l| l.id == limb)
    }

    fn drop_stale(&mut self, time: f64) {
        self.queue.retain(|q| {
            let live = q.interval.end > time;
            if !live {
                warn!(limb = %q.limb, step = q.step.0, touchdown = q.interval.end, "footstep missed its window");
            }
            live
        });
    }

    /// What, if anything, should move limb `i` out of its phase this tick.
    fn trigger(&mut self, i: usize, input: &GaitInput<'_>) -> Option<Trigger> {
        let limb = &self.limbs[i];
        match limb.phase {
            GaitPhase::Support => {
                let at = self.queue.iter().position(|q| q.limb == limb.id)?;
                if self.queue[at].interval.start > input.time {
                    return None;
                }
                let queued = self.queue.remove(at);
                self.limbs[i].pending = Some(queued);
                Some(Trigger::LiftOff)
            }
            GaitPhase::Swing => {
                let phase = limb
                    .swing
                    .as_ref()
                    .map_or(1.0, |s| s.queued.interval.phase(input.time));
                if phase >= self.config.min_swing_fraction
                    && self.sensed_contact(limb, input)
                {
                    return Some(Trigger::SensedTouchDown);
                }
                let due = limb
                    .swing
                    .as_ref()
                    .is_some_and(|s| input.time >= s.queued.interval.end);
                due.then_some(Trigger::ScheduledTouchDown)
            }
        }
    }

    fn sensed_contact(&self, limb: &LimbState, input: &GaitInput<'_>) -> bool {
        let Some(foot) = input.foot(limb.id) else {
            return false;
        };
        let by_force = self
            .config
            .touchdown_force_threshold
            .zip(foot.contact_force)
            .is_some_and(|(threshold, force)| force >= threshold);
        let by_height = self
            .config
            .touchdown_height_threshold
            .is_some_and(|threshold| foot.position.z - limb.ground_height <= threshold);
        by_force || by_height
    }
}

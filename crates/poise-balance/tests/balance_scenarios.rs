//! Integration tests: the full tick pipeline against synthetic legs.
//!
//! Covers the closed-form feedback law, static gravity compensation through
//! the virtual model controller, push recovery on a linear inverted pendulum
//! and a single scripted step.

use approx::assert_relative_eq;
use nalgebra::{Vector2, Vector3};
use poise_balance::{
    BalanceController, BodyId, CaptureState, ClarabelSolver, ContactModel, ControllerInput,
    DesiredWrench, FootMeasurement, FootstepCommand, GaitEvent, GaitPhase, IcpOptimizer,
    IcpOptimizerConfig, IcpOptimizerInput, JointSpec, LimbId, SolutionStatus, SolverConfig,
};
use poise_test_utils::{
    FailingSolver, LipmPlant, StaticKinematics, biped, deterministic_pushes, feet_at_rest, single_leg,
    tick_time,
};

const GRAVITY: f64 = 9.81;

fn sole(limb: usize, x: f64, y: f64) -> ContactModel {
    let mut contact = ContactModel::new(
        LimbId(limb),
        vec![
            Vector2::new(0.1, 0.05),
            Vector2::new(-0.1, 0.05),
            Vector2::new(-0.1, -0.05),
            Vector2::new(0.1, -0.05),
        ],
        0.8,
    )
    .unwrap();
    contact.activate(Vector2::new(x, y), 0.0);
    contact
}

// =============================================================================
// Dynamics consistency
// =============================================================================

#[test]
fn feedback_matches_closed_form() {
    let config = IcpOptimizerConfig {
        feedback_gain: [2.0, 4.0],
        feedback_weight: [1e-4, 1e-4],
        feedback_regularization_weight: 1e-8,
        dynamics_weight: 1e5,
        use_angular_momentum: false,
        use_step_adjustment: false,
        ..IcpOptimizerConfig::default()
    };
    let mut optimizer = IcpOptimizer::new(config, ClarabelSolver::new(SolverConfig::default()));
    let contacts = [sole(0, 0.0, 0.1), sole(1, 0.0, -0.1)];

    for (dx, dy) in [(0.01, 0.0), (-0.02, 0.015), (0.0, -0.01)] {
        let capture = CaptureState {
            com_position: Vector3::new(0.0, 0.0, 0.8),
            com_velocity: Vector3::zeros(),
            omega: (GRAVITY / 0.8).sqrt(),
        };
        let desired = Vector2::new(dx, dy);
        let solution = optimizer.compute(&IcpOptimizerInput {
            time: 0.0,
            capture: &capture,
            desired_icp: desired,
            desired_icp_velocity: Vector2::zeros(),
            contacts: &contacts,
            footsteps: &[],
        });
        assert!(solution.is_solved());
        // e = desired − measured, measured ICP at the origin.
        assert_relative_eq!(solution.feedback.x, -2.0 * dx, epsilon = 1e-4);
        assert_relative_eq!(solution.feedback.y, -4.0 * dy, epsilon = 1e-4);
        assert_relative_eq!(solution.angular_momentum, Vector2::zeros());
        assert!(solution.footsteps.is_empty());
        optimizer.commit();
    }
}

// =============================================================================
// Gravity compensation
// =============================================================================

#[test]
fn single_leg_holds_static_load() {
    let mass = 25.0;
    let (config, leg) = single_leg(mass, 0.08);
    let solver = ClarabelSolver::new(config.solver.clone());
    let mut controller = BalanceController::new(config, solver).unwrap();
    let kinematics = StaticKinematics::from_legs([&leg]);
    let feet = feet_at_rest(std::slice::from_ref(&leg));

    // CoM at rest straight above the foot.
    let height = 0.8;
    let input = ControllerInput {
        time: 0.0,
        capture: CaptureState {
            com_position: Vector3::new(leg.foot.x, leg.foot.y, height),
            com_velocity: Vector3::zeros(),
            omega: (GRAVITY / height).sqrt(),
        },
        desired_icp: leg.foot.xy(),
        desired_icp_velocity: Vector2::zeros(),
        feet: &feet,
        task_wrenches: &[],
        kinematics: &kinematics,
    };

    for k in 0..5 {
        let out = controller.tick(&ControllerInput {
            time: tick_time(k, 0.004),
            ..input
        });
        assert!(!out.faulted);
        assert!(out.committed);
        assert_relative_eq!(out.feedback, Vector2::zeros(), epsilon = 1e-5);
        assert_relative_eq!(out.cmp, leg.foot.xy(), epsilon = 1e-5);

        for (joint, expected) in leg.gravity_torques(mass * GRAVITY) {
            let actual = out.torques.get(joint.as_str()).unwrap();
            assert_relative_eq!(actual, expected, epsilon = 1e-3);
        }
        // 245.25 N through lever arms of 0.08 m (hip) and 0.04 m (knee).
        assert_relative_eq!(out.torques.get("left_0_hip").unwrap(), -19.62, epsilon = 1e-3);
        assert_relative_eq!(out.torques.get("left_0_knee").unwrap(), -9.81, epsilon = 1e-3);
    }
}

#[test]
fn solver_failure_holds_without_faulting() {
    let (config, legs) = biped(30.0, 0.2);
    let mut controller = BalanceController::new(config, FailingSolver::default()).unwrap();
    let kinematics = StaticKinematics::from_legs(&legs);
    let feet = feet_at_rest(&legs);
    let plant = LipmPlant::new(Vector2::zeros(), 0.8, GRAVITY);

    for k in 0..3 {
        let out = controller.tick(&ControllerInput {
            time: tick_time(k, 0.004),
            capture: plant.capture(),
            desired_icp: Vector2::zeros(),
            desired_icp_velocity: Vector2::zeros(),
            feet: &feet,
            task_wrenches: &[],
            kinematics: &kinematics,
        });
        assert!(!out.faulted);
        assert!(!out.committed);
        assert_eq!(out.status, Some(SolutionStatus::Held));
        assert_relative_eq!(out.feedback, Vector2::zeros());
        assert!(!out.torques.is_all_zero());
    }
}

// =============================================================================
// Task wrenches and fault recovery
// =============================================================================

fn standing_input<'a>(
    k: usize,
    plant: &LipmPlant,
    feet: &'a [FootMeasurement],
    task_wrenches: &'a [(BodyId, DesiredWrench)],
    kinematics: &'a StaticKinematics,
) -> ControllerInput<'a> {
    ControllerInput {
        time: tick_time(k, 0.004),
        capture: plant.capture(),
        desired_icp: Vector2::zeros(),
        desired_icp_velocity: Vector2::zeros(),
        feet,
        task_wrenches,
        kinematics,
    }
}

#[test]
fn task_bodies_map_through_controller() {
    let (config, legs) = biped(30.0, 0.2);
    let solver = ClarabelSolver::new(config.solver.clone());
    let mut controller = BalanceController::new(config, solver).unwrap();
    controller
        .register_task_body(
            BodyId::from("gripper"),
            vec![JointSpec::revolute("roll"), JointSpec::prismatic("lift")],
        )
        .unwrap();
    let kinematics = StaticKinematics::from_legs(&legs)
        .with_joint("roll", Vector3::new(0.0, 0.0, 1.2), Vector3::x())
        .with_joint("lift", Vector3::new(0.0, 0.3, 1.1), Vector3::z())
        .with_body_point("gripper", Vector3::new(0.0, 0.3, 1.0));
    let feet = feet_at_rest(&legs);
    let plant = LipmPlant::new(Vector2::zeros(), 0.8, GRAVITY);

    let wrenches = [(BodyId::from("gripper"), DesiredWrench::force(Vector3::new(0.0, 0.0, -40.0)))];
    let out = controller.tick(&standing_input(0, &plant, &feet, &wrenches, &kinematics));
    assert!(!out.faulted);
    // Prismatic along ẑ takes the force directly; the roll joint sees a
    // 0.3 m lever about x̂.
    assert_relative_eq!(out.torques.get("lift").unwrap(), -40.0, epsilon = 1e-9);
    assert_relative_eq!(out.torques.get("roll").unwrap(), -12.0, epsilon = 1e-9);
}

#[test]
fn faulted_tick_leaves_no_residue() {
    let (config, legs) = biped(30.0, 0.2);
    let build = || {
        let solver = ClarabelSolver::new(config.solver.clone());
        let mut controller = BalanceController::new(config.clone(), solver).unwrap();
        controller
            .register_task_body(BodyId::from("hand"), vec![JointSpec::revolute("shoulder")])
            .unwrap();
        controller
    };
    let mut controller = build();
    let mut reference = build();
    let kinematics = StaticKinematics::from_legs(&legs)
        .with_joint("shoulder", Vector3::new(0.0, 0.0, 1.2), Vector3::y())
        .with_body_point("hand", Vector3::new(0.3, 0.0, 1.2));
    let feet = feet_at_rest(&legs);
    let plant = LipmPlant::new(Vector2::new(0.01, 0.0), 0.8, GRAVITY);
    let hand = (BodyId::from("hand"), DesiredWrench::force(Vector3::new(0.0, 0.0, -50.0)));

    // The hand wrench is staged before the unknown body fails the tick.
    let bad = [hand.clone(), (BodyId::from("ghost"), DesiredWrench::force(Vector3::x()))];
    let out = controller.tick(&standing_input(0, &plant, &feet, &bad, &kinematics));
    assert!(out.faulted);
    assert!(out.torques.is_all_zero());
    reference.tick(&standing_input(0, &plant, &feet, &[], &kinematics));

    // Next tick without task wrenches matches a controller that never faulted.
    let out = controller.tick(&standing_input(1, &plant, &feet, &[], &kinematics));
    assert!(!out.faulted);
    assert!(out.committed);
    assert_relative_eq!(out.torques.get("shoulder").unwrap(), 0.0);
    let expected = reference.tick(&standing_input(1, &plant, &feet, &[], &kinematics));
    assert_relative_eq!(out.feedback, expected.feedback, epsilon = 1e-9);
    for (joint, torque) in expected.torques.iter() {
        assert_relative_eq!(out.torques.get(joint.as_str()).unwrap(), torque, epsilon = 1e-6);
    }

    // And the hand still maps once submitted again: 50 N at 0.3 m about ŷ.
    let good = [hand];
    let out = controller.tick(&standing_input(2, &plant, &feet, &good, &kinematics));
    assert!(!out.faulted);
    assert_relative_eq!(out.torques.get("shoulder").unwrap(), 15.0, epsilon = 1e-9);
}

// =============================================================================
// Closed loop on a linear inverted pendulum
// =============================================================================

#[test]
fn recovers_from_pushes_in_place() {
    let (config, legs) = biped(30.0, 0.2);
    let dt = config.control_dt;
    let solver = ClarabelSolver::new(config.solver.clone());
    let mut controller = BalanceController::new(config, solver).unwrap();
    let kinematics = StaticKinematics::from_legs(&legs);
    let feet = feet_at_rest(&legs);
    let mut plant = LipmPlant::new(Vector2::zeros(), 0.8, GRAVITY);

    let mut k = 0;
    for push in deterministic_pushes(3, 0.08, 7) {
        plant.push(&push);
        // One second per push is ample at a rate of (K − 1)ω.
        for _ in 0..250 {
            let out = controller.tick(&ControllerInput {
                time: tick_time(k, dt),
                capture: plant.capture(),
                desired_icp: Vector2::zeros(),
                desired_icp_velocity: Vector2::zeros(),
                feet: &feet,
                task_wrenches: &[],
                kinematics: &kinematics,
            });
            assert!(!out.faulted, "tick {k} faulted");
            let cmp = out.cmp;
            plant.step(&cmp, dt);
            k += 1;
        }
        assert!(plant.icp().norm() < 2e-3, "icp {} after push", plant.icp().norm());
    }
    assert!(plant.com.norm() < 0.02);
}

#[test]
fn single_step_on_lipm_plant() {
    let (config, legs) = biped(30.0, 0.2);
    let dt = config.control_dt;
    let max_shift = config.gait.max_adjustment_per_axis
        + config
            .optimizer
            .max_footstep_adjustment
            .iter()
            .copied()
            .fold(0.0, f64::max);
    let solver = ClarabelSolver::new(config.solver.clone());
    let mut controller = BalanceController::new(config, solver).unwrap();
    let mut kinematics = StaticKinematics::from_legs(&legs);
    let mut feet = feet_at_rest(&legs);
    let mut plant = LipmPlant::new(Vector2::zeros(), 0.8, GRAVITY);

    let left = &legs[0];
    let goal = Vector2::new(0.1, left.foot.y);
    controller
        .enqueue_footstep(&FootstepCommand::new(left.limb, goal, 0.5, 1.1))
        .unwrap();

    let mut events = Vec::new();
    for k in 0..400 {
        let out = controller.tick(&ControllerInput {
            time: tick_time(k, dt),
            capture: plant.capture(),
            desired_icp: Vector2::zeros(),
            desired_icp_velocity: Vector2::zeros(),
            feet: &feet,
            task_wrenches: &[],
            kinematics: &kinematics,
        });
        assert!(!out.faulted, "tick {k} faulted");
        events.extend(out.events.iter().copied());
        let cmp = out.cmp;
        for &(limb, setpoint) in &out.swing_setpoints {
            if limb == left.limb {
                feet[0].position = setpoint.position;
                kinematics.set_body_point(&left.foot_body(), setpoint.position);
            }
        }
        plant.step(&cmp, dt);
    }

    assert_eq!(events.len(), 2);
    assert!(matches!(events[0], GaitEvent::LiftOff { limb, .. } if limb == left.limb));
    let GaitEvent::TouchDown { location, sensed, .. } = events[1] else {
        panic!("expected a touchdown, got {:?}", events[1]);
    };
    assert!(!sensed);
    assert!((location - goal).amax() <= max_shift + 1e-9);

    let gait = controller.gait();
    assert_eq!(gait.phase(left.limb), Some(GaitPhase::Support));
    assert!(gait.contacts().iter().all(ContactModel::is_active));
    assert_relative_eq!(gait.contact(left.limb).unwrap().anchor(), location);
}

//! Integration tests: gait transitions on a fixed-rate clock.

use nalgebra::{Vector2, Vector3};
use poise_balance::{
    FootMeasurement, FootstepCommand, GaitConfig, GaitInput, GaitPhase, GaitStateMachine, LimbId,
    instantaneous_step_adjustment,
};
use poise_test_utils::{RecordingListener, biped, feet_at_rest, tick_time};

const DT: f64 = 0.004;

fn machine(gait: GaitConfig) -> (GaitStateMachine, Vec<FootMeasurement>) {
    let (config, legs) = biped(30.0, 0.2);
    let machine = GaitStateMachine::new(gait, &config.limbs).unwrap();
    (machine, feet_at_rest(&legs))
}

fn input(k: usize, feet: &[FootMeasurement]) -> GaitInput<'_> {
    GaitInput {
        time: tick_time(k, DT),
        walking_enabled: true,
        measured_icp: Vector2::zeros(),
        setpoint_icp: Vector2::zeros(),
        feet,
    }
}

#[test]
fn idle_support_never_transitions() {
    let (mut gait, feet) = machine(GaitConfig::default());
    let mut listener = RecordingListener::new();
    for k in 0..20_000 {
        gait.update(&input(k, &feet), &mut listener);
    }
    assert!(listener.events.is_empty());
    for limb in [LimbId(0), LimbId(1)] {
        assert_eq!(gait.phase(limb), Some(GaitPhase::Support));
        assert!(gait.contact(limb).unwrap().is_active());
    }
}

#[test]
fn scheduled_transitions_land_on_tick() {
    let (mut gait, feet) = machine(GaitConfig::default());
    gait.enqueue(&FootstepCommand::new(LimbId(0), Vector2::new(0.2, 0.1), 1.0, 1.6))
        .unwrap();
    let mut listener = RecordingListener::new();
    let mut swing_ticks: i64 = 0;
    for k in 0..600 {
        gait.update(&input(k, &feet), &mut listener);
        if gait.phase(LimbId(0)) == Some(GaitPhase::Swing) {
            swing_ticks += 1;
        }
    }

    let lift_offs = listener.lift_offs(LimbId(0));
    let touch_downs = listener.touch_downs(LimbId(0));
    assert_eq!(lift_offs.len(), 1);
    assert_eq!(touch_downs.len(), 1);
    assert!((lift_offs[0] - 1.0).abs() <= DT + 1e-9, "liftoff at {}", lift_offs[0]);
    assert!((touch_downs[0] - 1.6).abs() <= DT + 1e-9, "touchdown at {}", touch_downs[0]);
    assert!(listener.lift_offs(LimbId(1)).is_empty());
    assert!((swing_ticks - 150).abs() <= 1, "{swing_ticks} swing ticks");
}

#[test]
fn sensed_contact_lands_before_schedule() {
    let config = GaitConfig {
        touchdown_force_threshold: Some(40.0),
        ..GaitConfig::default()
    };
    let (mut gait, mut feet) = machine(config);
    gait.enqueue(&FootstepCommand::new(LimbId(0), Vector2::new(0.2, 0.1), 1.0, 1.6))
        .unwrap();
    let mut listener = RecordingListener::new();
    for k in 0..600 {
        // Foot loaded from 1.45 s on, well past the minimum swing fraction.
        if tick_time(k, DT) >= 1.45 {
            feet[0].position = Vector3::new(0.18, 0.1, 0.0);
            feet[0].contact_force = Some(120.0);
        }
        gait.update(&input(k, &feet), &mut listener);
    }

    let touch_downs = listener.touch_downs(LimbId(0));
    assert_eq!(touch_downs.len(), 1);
    assert!(touch_downs[0] < 1.6);
    assert!((touch_downs[0] - 1.45).abs() <= DT + 1e-9);
    let anchor = gait.contact(LimbId(0)).unwrap().anchor();
    assert!((anchor - Vector2::new(0.18, 0.1)).norm() < 1e-12);
}

#[test]
fn adjustment_clamped_for_large_errors() {
    let max = GaitConfig::default().max_adjustment_per_axis;
    for scale in [10.0, 100.0] {
        let error = Vector2::new(scale * max, -scale * max);
        let adjustment = instantaneous_step_adjustment(1.0, &error, &Vector2::zeros(), max);
        assert!(adjustment.x <= max && adjustment.x >= max - 1e-12);
        assert!(adjustment.y >= -max && adjustment.y <= -max + 1e-12);
    }
}

#[test]
fn swing_adjustment_clamped_during_swing() {
    let (mut gait, feet) = machine(GaitConfig::default());
    let max = gait.config().max_adjustment_per_axis;
    gait.enqueue(&FootstepCommand::new(LimbId(0), Vector2::new(0.2, 0.1), 1.0, 1.6))
        .unwrap();

    for (scale, ticks) in [(10.0, 250..320), (100.0, 320..390)] {
        for k in ticks {
            let measured = Vector2::new(scale * max, scale * max);
            gait.update(
                &GaitInput {
                    measured_icp: measured,
                    ..input(k, &feet)
                },
                &mut (),
            );
            if let Some(adjustment) = gait.swing_adjustment(LimbId(0)) {
                assert!(adjustment.amax() <= max + 1e-12, "adjustment {adjustment}");
            }
        }
    }
    assert_eq!(gait.phase(LimbId(0)), Some(GaitPhase::Swing));
}

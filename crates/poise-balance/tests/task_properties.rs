//! Property tests: every QP task contributes a convex term.
//!
//! For random positive diagonal weights each task's quadratic block must be
//! symmetric positive-semidefinite, whatever the references and layout.

use nalgebra::{DMatrix, Matrix2, Vector2};
use poise_balance::tasks::{
    angular_momentum_minimization, dynamics_task, feedback_minimization, feedback_regularization,
    footstep_regularization, footstep_task,
};
use poise_balance::{DynamicsTask, FeatureFlags, QpInput, compute_layout};
use proptest::prelude::*;

// =============================================================================
// Strategies
// =============================================================================

fn arb_diagonal() -> impl Strategy<Value = Matrix2<f64>> {
    (1e-4..1e4f64, 1e-4..1e4f64).prop_map(|(x, y)| Matrix2::new(x, 0.0, 0.0, y))
}

fn arb_point() -> impl Strategy<Value = Vector2<f64>> {
    (-2.0..2.0f64, -2.0..2.0f64).prop_map(|(x, y)| Vector2::new(x, y))
}

fn arb_flags() -> impl Strategy<Value = FeatureFlags> {
    (any::<bool>(), any::<bool>()).prop_map(|(am, steps)| FeatureFlags {
        use_angular_momentum: am,
        use_step_adjustment: steps,
    })
}

fn assert_psd(h: &DMatrix<f64>) -> Result<(), TestCaseError> {
    let scale = h.amax().max(1.0);
    prop_assert!((h - h.transpose()).amax() <= 1e-12 * scale, "not symmetric: {h}");
    let min = h.clone().symmetric_eigenvalues().min();
    prop_assert!(min >= -1e-9 * scale, "negative eigenvalue {min}");
    Ok(())
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #[test]
    fn two_variable_tasks_are_psd(
        weight in arb_diagonal(),
        target in arb_point(),
    ) {
        let mut input = QpInput::with_capacity(8);

        feedback_minimization(&weight, &mut input).unwrap();
        assert_psd(&input.quadratic().clone_owned())?;

        feedback_regularization(&weight, &target, &mut input).unwrap();
        assert_psd(&input.quadratic().clone_owned())?;

        angular_momentum_minimization(&weight, &mut input).unwrap();
        assert_psd(&input.quadratic().clone_owned())?;

        footstep_task(&weight, &target, &mut input).unwrap();
        assert_psd(&input.quadratic().clone_owned())?;

        footstep_regularization(&weight, &target, &mut input).unwrap();
        assert_psd(&input.quadratic().clone_owned())?;
    }

    #[test]
    fn dynamics_task_is_psd(
        weight in 1e-2..1e4f64,
        kx in 0.5..10.0f64,
        ky in 0.5..10.0f64,
        error in arb_point(),
        reference in arb_point(),
        multiplier in 0.0..1.0f64,
        safety in 0.5..2.0f64,
        flags in arb_flags(),
        footsteps in 0usize..4,
    ) {
        let layout = compute_layout(flags, footsteps);
        let task = DynamicsTask {
            weight,
            feedback_gain: Vector2::new(kx, ky),
            icp_error: error,
            first_step_multiplier: multiplier,
            first_step_reference: reference,
            safety_factor: safety,
        };
        let mut input = QpInput::with_capacity(layout.size());
        dynamics_task(&task, &layout, &mut input).unwrap();
        prop_assert_eq!(input.size(), layout.size());
        assert_psd(&input.quadratic().clone_owned())?;
        prop_assert!(input.residual() >= 0.0);
    }

    /// The cost of a tracking task is zero at its target and positive elsewhere.
    #[test]
    fn tracking_minimum_at_target(
        weight in arb_diagonal(),
        target in arb_point(),
        offset in arb_point(),
    ) {
        let mut input = QpInput::with_capacity(2);
        footstep_task(&weight, &target, &mut input).unwrap();
        let at = nalgebra::DVector::from_column_slice(target.as_slice());
        let away = nalgebra::DVector::from_column_slice((target + offset).as_slice());
        let scale = weight.amax() * (1.0 + target.norm_squared());
        prop_assert!(input.cost(&at).abs() <= 1e-9 * scale);
        prop_assert!(input.cost(&away) >= -1e-9 * scale);
    }
}

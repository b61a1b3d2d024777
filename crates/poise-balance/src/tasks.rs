//! Cost tasks of the capture-point QP.
//!
//! Each task encodes `½ xᵀHx − hᵀx + r` over its own block of the decision
//! vector and is added into the full problem by [`submit`]. All builders take
//! a preallocated [`QpInput`] and overwrite it; none of them allocate.
//!
//! Tracking a target `t` with weight `W` expands to
//!
//! ```text
//! ½ (x − t)ᵀ W (x − t)  =  ½ xᵀWx − (Wt)ᵀx + ½ tᵀWt
//! ```

use nalgebra::{DMatrix, DMatrixView, DVector, DVectorView, Dyn, Matrix2, Storage, Vector, Vector2};

use crate::error::LayoutError;
use crate::layout::{Block, QpVariableLayout};
use crate::solver::QpProblem;

/// Block-local quadratic, linear and constant cost terms.
#[derive(Clone, Debug)]
pub struct QpInput {
    quadratic: DMatrix<f64>,
    linear: DVector<f64>,
    residual: f64,
    size: usize,
}

impl QpInput {
    /// Storage for a block of at most `max_size` variables.
    pub fn with_capacity(max_size: usize) -> Self {
        Self {
            quadratic: DMatrix::zeros(max_size, max_size),
            linear: DVector::zeros(max_size),
            residual: 0.0,
            size: 0,
        }
    }

    /// Zero the input and size it for `size` variables.
    pub fn reset(&mut self, size: usize) -> Result<(), LayoutError> {
        let capacity = self.linear.len();
        if size > capacity {
            return Err(LayoutError::CapacityExceeded { size, capacity });
        }
        self.quadratic.fill(0.0);
        self.linear.fill(0.0);
        self.residual = 0.0;
        self.size = size;
        Ok(())
    }

    pub const fn size(&self) -> usize {
        self.size
    }

    pub fn quadratic(&self) -> DMatrixView<'_, f64> {
        self.quadratic.view((0, 0), (self.size, self.size))
    }

    pub fn linear(&self) -> DVectorView<'_, f64> {
        self.linear.rows(0, self.size)
    }

    pub const fn residual(&self) -> f64 {
        self.residual
    }

    /// Cost of this task at the block-local point `x`.
    pub fn cost<S: Storage<f64, Dyn>>(&self, x: &Vector<f64, Dyn, S>) -> f64 {
        0.5 * (self.quadratic() * x).dot(x) - self.linear().dot(x) + self.residual
    }

    fn add_block(&mut self, row: usize, col: usize, m: &Matrix2<f64>) {
        let mut view = self.quadratic.fixed_view_mut::<2, 2>(row, col);
        view += m;
    }

    fn add_linear(&mut self, row: usize, v: &Vector2<f64>) {
        let mut view = self.linear.fixed_rows_mut::<2>(row);
        view += v;
    }

    /// Add `½ (x − target)ᵀ W (x − target)` for a 2-variable block at `offset`.
    fn add_tracking(&mut self, offset: usize, weight: &Matrix2<f64>, target: &Vector2<f64>) {
        self.add_block(offset, offset, weight);
        self.add_linear(offset, &(weight * target));
        self.residual += 0.5 * target.dot(&(weight * target));
    }
}

// ---------------------------------------------------------------------------
// Task builders
// ---------------------------------------------------------------------------

/// Penalise CMP feedback magnitude.
pub fn feedback_minimization(weight: &Matrix2<f64>, input: &mut QpInput) -> Result<(), LayoutError> {
    input.reset(2)?;
    input.add_tracking(0, weight, &Vector2::zeros());
    Ok(())
}

/// Penalise change of feedback from the previous tick.
pub fn feedback_regularization(
    weight: &Matrix2<f64>,
    previous: &Vector2<f64>,
    input: &mut QpInput,
) -> Result<(), LayoutError> {
    input.reset(2)?;
    input.add_tracking(0, weight, previous);
    Ok(())
}

/// Penalise use of the angular-momentum CMP offset.
pub fn angular_momentum_minimization(weight: &Matrix2<f64>, input: &mut QpInput) -> Result<(), LayoutError> {
    input.reset(2)?;
    input.add_tracking(0, weight, &Vector2::zeros());
    Ok(())
}

/// Keep a footstep close to its nominal location.
pub fn footstep_task(
    weight: &Matrix2<f64>,
    reference: &Vector2<f64>,
    input: &mut QpInput,
) -> Result<(), LayoutError> {
    input.reset(2)?;
    input.add_tracking(0, weight, reference);
    Ok(())
}

/// Keep a footstep close to last tick's solution.
pub fn footstep_regularization(
    weight: &Matrix2<f64>,
    previous: &Vector2<f64>,
    input: &mut QpInput,
) -> Result<(), LayoutError> {
    input.reset(2)?;
    input.add_tracking(0, weight, previous);
    Ok(())
}

/// Inputs of the dynamics-consistency task.
#[derive(Clone, Copy, Debug)]
pub struct DynamicsTask {
    pub weight: f64,
    pub feedback_gain: Vector2<f64>,
    /// Desired minus measured ICP.
    pub icp_error: Vector2<f64>,
    /// Recursion multiplier of the first footstep, `e^{−ω t_rem}`.
    pub first_step_multiplier: f64,
    /// Nominal location of the first footstep.
    pub first_step_reference: Vector2<f64>,
    pub safety_factor: f64,
}

/// Soft equality tying feedback, angular momentum and the first footstep to
/// the ICP error:
///
/// ```text
/// K⁻¹ (δ + κ) + (γ₀/s) f₀ = −e + γ₀ f₀_ref
/// ```
///
/// The safety factor `s` scales only the footstep column: with `s > 1` the
/// step must travel `s` times as far to absorb the same ICP error. With
/// `s = 1`, `f₀ = f₀_ref` and no angular momentum this is `δ = −K e`. The
/// task spans the full decision vector; blocks absent from `layout` drop out.
pub fn dynamics_task(
    task: &DynamicsTask,
    layout: &QpVariableLayout,
    input: &mut QpInput,
) -> Result<(), LayoutError> {
    input.reset(layout.size())?;

    let k_inv = Matrix2::from_diagonal(&task.feedback_gain.map(f64::recip));
    let step_scale = task.first_step_multiplier / task.safety_factor;
    let step_jacobian = Matrix2::from_diagonal_element(step_scale);

    let mut b = -task.icp_error;

    // Jacobian of the residual Jx − b as 2×2 diagonal blocks.
    let mut blocks: [(usize, Matrix2<f64>); 3] = [(0, Matrix2::zeros()); 3];
    let mut count = 0;
    blocks[count] = (layout.feedback_index(), k_inv);
    count += 1;
    if let Some(i) = layout.angular_momentum_index() {
        blocks[count] = (i, k_inv);
        count += 1;
    }
    if let Some(i) = layout.footstep_index(0) {
        blocks[count] = (i, step_jacobian);
        count += 1;
        b += task.first_step_reference * task.first_step_multiplier;
    }

    let w = Matrix2::from_diagonal_element(task.weight);
    let w_b = w * b;
    for (row, j_row) in &blocks[..count] {
        for (col, j_col) in &blocks[..count] {
            input.add_block(*row, *col, &(j_row.transpose() * w * j_col));
        }
        input.add_linear(*row, &(j_row.transpose() * w_b));
    }
    input.residual += 0.5 * b.dot(&w_b);
    Ok(())
}

/// Add `input` into `problem` at the slot `layout` assigns to `block`.
pub fn submit(
    input: &QpInput,
    block: Block,
    layout: &QpVariableLayout,
    problem: &mut QpProblem,
) -> Result<(), LayoutError> {
    let size = input.size();
    let offset = layout.checked_offset(block, size)?;
    if offset + size > problem.num_variables() {
        return Err(LayoutError::LayoutMismatch {
            expected: problem.num_variables(),
            got: offset + size,
        });
    }
    let (mut h, mut g, r) = problem.cost_block_mut(offset, size);
    h += input.quadratic();
    g += input.linear();
    *r += input.residual();
    Ok(())
}

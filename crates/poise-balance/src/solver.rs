//! QP problem storage and the solver seam.
//!
//! Problems are posed as
//!
//! ```text
//! minimize    ½ xᵀ H x − hᵀ x (+ r)
//! subject to  A x ≤ b
//! ```
//!
//! [`QpProblem`] owns buffers sized once for the largest problem the
//! optimizer can build and exposes views of the active region. Any solver
//! plugs in through [`QpSolver`]; [`ClarabelSolver`] is the default.

use std::time::Instant;

use clarabel::algebra::CscMatrix;
use clarabel::solver::{
    DefaultSettingsBuilder, DefaultSolver, IPSolver, SolverStatus, SupportedConeT::NonnegativeConeT,
};
use nalgebra::{DMatrix, DMatrixView, DMatrixViewMut, DVector, DVectorView, DVectorViewMut};

use crate::config::SolverConfig;
use crate::error::{LayoutError, SolveError};

// ---------------------------------------------------------------------------
// QpProblem
// ---------------------------------------------------------------------------

/// Preallocated storage for one QP.
#[derive(Clone, Debug)]
pub struct QpProblem {
    hessian: DMatrix<f64>,
    gradient: DVector<f64>,
    residual: f64,
    constraints: DMatrix<f64>,
    bounds: DVector<f64>,
    n: usize,
    m: usize,
}

impl QpProblem {
    /// Storage for up to `max_variables` variables and `max_constraints` rows.
    pub fn with_capacity(max_variables: usize, max_constraints: usize) -> Self {
        Self {
            hessian: DMatrix::zeros(max_variables, max_variables),
            gradient: DVector::zeros(max_variables),
            residual: 0.0,
            constraints: DMatrix::zeros(max_constraints, max_variables),
            bounds: DVector::zeros(max_constraints),
            n: 0,
            m: 0,
        }
    }

    /// Clear the problem and size it for `n` variables.
    pub fn reset(&mut self, n: usize) -> Result<(), LayoutError> {
        let capacity = self.hessian.nrows();
        if n > capacity {
            return Err(LayoutError::CapacityExceeded { size: n, capacity });
        }
        self.hessian.view_mut((0, 0), (n, n)).fill(0.0);
        self.gradient.rows_mut(0, n).fill(0.0);
        self.residual = 0.0;
        self.constraints.rows_mut(0, self.m).fill(0.0);
        self.bounds.rows_mut(0, self.m).fill(0.0);
        self.n = n;
        self.m = 0;
        Ok(())
    }

    /// Grow constraint storage to at least `rows` rows. Returns true when it
    /// had to grow.
    pub fn reserve_constraints(&mut self, rows: usize) -> bool {
        if rows <= self.constraints.nrows() {
            return false;
        }
        let cols = self.constraints.ncols();
        self.constraints.resize_mut(rows, cols, 0.0);
        self.bounds.resize_vertically_mut(rows, 0.0);
        true
    }

    pub fn constraint_capacity(&self) -> usize {
        self.constraints.nrows()
    }

    pub const fn num_variables(&self) -> usize {
        self.n
    }

    pub const fn num_constraints(&self) -> usize {
        self.m
    }

    pub fn hessian(&self) -> DMatrixView<'_, f64> {
        self.hessian.view((0, 0), (self.n, self.n))
    }

    pub fn gradient(&self) -> DVectorView<'_, f64> {
        self.gradient.rows(0, self.n)
    }

    pub const fn residual(&self) -> f64 {
        self.residual
    }

    pub fn constraint_matrix(&self) -> DMatrixView<'_, f64> {
        self.constraints.view((0, 0), (self.m, self.n))
    }

    pub fn constraint_bounds(&self) -> DVectorView<'_, f64> {
        self.bounds.rows(0, self.m)
    }

    pub(crate) fn cost_block_mut(
        &mut self,
        offset: usize,
        size: usize,
    ) -> (DMatrixViewMut<'_, f64>, DVectorViewMut<'_, f64>, &mut f64) {
        (
            self.hessian.view_mut((offset, offset), (size, size)),
            self.gradient.rows_mut(offset, size),
            &mut self.residual,
        )
    }

    /// Append `Σ coeff_i x_i ≤ bound`.
    pub fn add_inequality(
        &mut self,
        coefficients: impl IntoIterator<Item = (usize, f64)>,
        bound: f64,
    ) -> Result<(), LayoutError> {
        let capacity = self.constraints.nrows();
        if self.m >= capacity {
            return Err(LayoutError::CapacityExceeded {
                size: self.m + 1,
                capacity,
            });
        }
        for (col, value) in coefficients {
            if col >= self.n {
                return Err(LayoutError::LayoutMismatch {
                    expected: self.n,
                    got: col + 1,
                });
            }
            self.constraints[(self.m, col)] += value;
        }
        self.bounds[self.m] = bound;
        self.m += 1;
        Ok(())
    }

    /// Objective value `½ xᵀHx − hᵀx + r` at `x`.
    pub fn objective(&self, x: &DVector<f64>) -> f64 {
        let x = x.rows(0, self.n);
        0.5 * (self.hessian() * x).dot(&x) - self.gradient().dot(&x) + self.residual
    }
}

// ---------------------------------------------------------------------------
// Solver seam
// ---------------------------------------------------------------------------

/// Diagnostics from a successful solve.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct SolveStats {
    pub iterations: u32,
    pub solve_time_us: u64,
}

/// A convex QP solver. Implementations must return within their own
/// iteration/time budget and report anything short of convergence as an error.
pub trait QpSolver {
    /// Solve `problem`, writing the first `problem.num_variables()` entries of
    /// `solution`. `solution` is left untouched on error.
    fn solve(&mut self, problem: &QpProblem, solution: &mut DVector<f64>) -> Result<SolveStats, SolveError>;
}

/// Interior-point solve via Clarabel.
#[derive(Clone, Debug)]
pub struct ClarabelSolver {
    config: SolverConfig,
}

impl ClarabelSolver {
    pub const fn new(config: SolverConfig) -> Self {
        Self { config }
    }

    pub const fn config(&self) -> &SolverConfig {
        &self.config
    }
}

impl QpSolver for ClarabelSolver {
    fn solve(&mut self, problem: &QpProblem, solution: &mut DVector<f64>) -> Result<SolveStats, SolveError> {
        let start = Instant::now();
        let n = problem.num_variables();
        let m = problem.num_constraints();

        let p_csc = dense_to_csc_upper_tri(problem.hessian());
        let a_csc = dense_to_csc(problem.constraint_matrix());
        // Clarabel minimizes ½xᵀPx + qᵀx.
        let q: Vec<f64> = problem.gradient().iter().map(|h| -h).collect();
        let b: Vec<f64> = problem.constraint_bounds().iter().copied().collect();
        let cones = [NonnegativeConeT(m)];

        let tol = self.config.tolerance;
        let settings = DefaultSettingsBuilder::default()
            .max_iter(self.config.max_iter)
            .time_limit(self.config.time_limit)
            .verbose(false)
            .tol_gap_abs(tol)
            .tol_gap_rel(tol)
            .tol_feas(tol)
            .build()
            .map_err(|e| SolveError::Setup(e.to_string()))?;

        let mut solver = DefaultSolver::new(&p_csc, &q, &a_csc, &b, &cones, settings)
            .map_err(|e| SolveError::Setup(format!("{e:?}")))?;
        solver.solve();
        let sol = &solver.solution;

        if !matches!(sol.status, SolverStatus::Solved | SolverStatus::AlmostSolved) {
            return Err(SolveError::NotConverged(format!("{:?}", sol.status)));
        }
        if sol.x.iter().take(n).any(|v| !v.is_finite()) {
            return Err(SolveError::NanSolution);
        }
        solution.rows_mut(0, n).copy_from_slice(&sol.x[..n]);

        Ok(SolveStats {
            iterations: sol.iterations,
            solve_time_us: u64::try_from(start.elapsed().as_micros()).unwrap_or(u64::MAX),
        })
    }
}

/// Convert a dense view to a Clarabel `CscMatrix<f64>` (full matrix).
fn dense_to_csc(m: DMatrixView<'_, f64>) -> CscMatrix<f64> {
    let (nrows, ncols) = m.shape();
    let mut colptr = vec![0usize; ncols + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..ncols {
        for i in 0..nrows {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(nrows, ncols, colptr, rowval, nzval)
}

/// Convert a symmetric dense view to upper-triangular `CscMatrix<f64>`.
fn dense_to_csc_upper_tri(m: DMatrixView<'_, f64>) -> CscMatrix<f64> {
    let n = m.ncols();
    let mut colptr = vec![0usize; n + 1];
    let mut rowval = Vec::new();
    let mut nzval = Vec::new();

    for j in 0..n {
        for i in 0..=j {
            let v = m[(i, j)];
            if v.abs() > 1e-15 {
                rowval.push(i);
                nzval.push(v);
            }
        }
        colptr[j + 1] = rowval.len();
    }

    CscMatrix::new(n, n, colptr, rowval, nzval)
}

//! Linear solvers for the global systems assembled by `amrfem`.
//!
//! All solvers implement [`LinearSolver`]. A solve either fails with a [`LinearSolverError`]
//! (the system could not be solved at all) or returns a [`LinearSolveReport`]. Running out of
//! iterations is *not* an error: the report carries `converged == false` together with the
//! best available iterate, and the caller decides whether to continue.

use nalgebra::DVector;
use nalgebra_sparse::CsrMatrix;
use std::error::Error;
use thiserror::Error;

pub mod cg;
pub mod direct;

pub use cg::{ConjugateGradient, JacobiPreconditioner, PcgSolver};
pub use direct::{DenseLuSolver, SparseCholeskySolver};

/// Tolerance and iteration budget handed to a linear solver.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct SolverSettings {
    /// Relative residual tolerance `||b - Ax|| <= tolerance * ||b||`.
    pub tolerance: f64,
    pub max_iterations: usize,
}

impl Default for SolverSettings {
    fn default() -> Self {
        Self {
            tolerance: 1e-12,
            max_iterations: 10_000,
        }
    }
}

/// Outcome of a linear solve.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct LinearSolveReport {
    pub iterations: usize,
    /// Relative residual `||b - Ax|| / ||b||` of the returned solution
    /// (the absolute residual if `b == 0`).
    pub final_residual: f64,
    pub converged: bool,
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LinearSolverError {
    #[error("dimension mismatch: matrix is {nrows}x{ncols}, right-hand side has length {rhs_len}")]
    DimensionMismatch { nrows: usize, ncols: usize, rhs_len: usize },
    #[error("zero diagonal entry in row {row}")]
    ZeroDiagonal { row: usize },
    #[error("operator appears to be indefinite")]
    IndefiniteOperator,
    #[error("preconditioner appears to be indefinite")]
    IndefinitePreconditioner,
    #[error("factorization failed: {0}")]
    Factorization(String),
    #[error("error applying operator: {0}")]
    Operator(Box<dyn Error + Send + Sync>),
}

/// A solver for `A x = b` with a sparse square matrix `A`.
pub trait LinearSolver {
    /// Solves the system, using the incoming `x` as initial guess where applicable.
    fn solve(
        &mut self,
        matrix: &CsrMatrix<f64>,
        rhs: &DVector<f64>,
        x: &mut DVector<f64>,
        settings: &SolverSettings,
    ) -> Result<LinearSolveReport, LinearSolverError>;

    fn name(&self) -> &'static str;
}

impl<S: LinearSolver + ?Sized> LinearSolver for Box<S> {
    fn solve(
        &mut self,
        matrix: &CsrMatrix<f64>,
        rhs: &DVector<f64>,
        x: &mut DVector<f64>,
        settings: &SolverSettings,
    ) -> Result<LinearSolveReport, LinearSolverError> {
        (**self).solve(matrix, rhs, x, settings)
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// Computes `y = A x` for a CSR matrix.
pub fn csr_mul_vector(matrix: &CsrMatrix<f64>, x: &DVector<f64>) -> DVector<f64> {
    assert_eq!(matrix.ncols(), x.len());
    DVector::from_iterator(
        matrix.nrows(),
        matrix.row_iter().map(|row| {
            row.col_indices()
                .iter()
                .zip(row.values())
                .map(|(&j, v)| v * x[j])
                .sum::<f64>()
        }),
    )
}

/// Relative residual `||b - Ax|| / ||b||`, or the absolute residual if `b` vanishes.
pub fn relative_residual(matrix: &CsrMatrix<f64>, rhs: &DVector<f64>, x: &DVector<f64>) -> f64 {
    let residual = rhs - csr_mul_vector(matrix, x);
    let rhs_norm = rhs.norm();
    if rhs_norm > 0.0 {
        residual.norm() / rhs_norm
    } else {
        residual.norm()
    }
}

pub(crate) fn check_dimensions(
    matrix: &CsrMatrix<f64>,
    rhs: &DVector<f64>,
    x: &DVector<f64>,
) -> Result<(), LinearSolverError> {
    if matrix.nrows() != matrix.ncols() || matrix.nrows() != rhs.len() || x.len() != rhs.len() {
        return Err(LinearSolverError::DimensionMismatch {
            nrows: matrix.nrows(),
            ncols: matrix.ncols(),
            rhs_len: rhs.len(),
        });
    }
    Ok(())
}

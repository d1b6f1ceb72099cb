//! Direct solvers.
//!
//! Direct solvers always perform exactly one "iteration" and report `converged == true` when the
//! factorization succeeds; the reported residual is the true relative residual of the solution.

use crate::{check_dimensions, relative_residual, LinearSolveReport, LinearSolver, LinearSolverError, SolverSettings};
use log::debug;
use nalgebra::{DMatrix, DVector};
use nalgebra_sparse::factorization::CscCholesky;
use nalgebra_sparse::{CscMatrix, CsrMatrix};

/// Sparse Cholesky factorization for symmetric positive definite systems.
#[derive(Debug, Default, Clone, Copy)]
pub struct SparseCholeskySolver;

impl LinearSolver for SparseCholeskySolver {
    fn solve(
        &mut self,
        matrix: &CsrMatrix<f64>,
        rhs: &DVector<f64>,
        x: &mut DVector<f64>,
        _settings: &SolverSettings,
    ) -> Result<LinearSolveReport, LinearSolverError> {
        check_dimensions(matrix, rhs, x)?;
        let csc = CscMatrix::from(matrix);
        let factorization =
            CscCholesky::factor(&csc).map_err(|err| LinearSolverError::Factorization(format!("{err:?}")))?;
        let b = DMatrix::from_column_slice(rhs.len(), 1, rhs.as_slice());
        let solution = factorization.solve(&b);
        x.copy_from(&solution.column(0));

        let final_residual = relative_residual(matrix, rhs, x);
        debug!("Sparse Cholesky solve, relative residual {:e}", final_residual);
        Ok(LinearSolveReport {
            iterations: 1,
            final_residual,
            converged: true,
        })
    }

    fn name(&self) -> &'static str {
        "sparse-cholesky"
    }
}

/// Dense LU factorization with partial pivoting.
///
/// Intended for small indefinite or non-symmetric systems, such as the saddle point systems of
/// mixed velocity-pressure discretizations.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenseLuSolver;

impl LinearSolver for DenseLuSolver {
    fn solve(
        &mut self,
        matrix: &CsrMatrix<f64>,
        rhs: &DVector<f64>,
        x: &mut DVector<f64>,
        _settings: &SolverSettings,
    ) -> Result<LinearSolveReport, LinearSolverError> {
        check_dimensions(matrix, rhs, x)?;
        let mut dense = DMatrix::zeros(matrix.nrows(), matrix.ncols());
        for (i, j, &v) in matrix.triplet_iter() {
            dense[(i, j)] += v;
        }
        let solution = dense
            .lu()
            .solve(rhs)
            .ok_or_else(|| LinearSolverError::Factorization("matrix is singular".to_string()))?;
        x.copy_from(&solution);

        let final_residual = relative_residual(matrix, rhs, x);
        debug!("Dense LU solve, relative residual {:e}", final_residual);
        Ok(LinearSolveReport {
            iterations: 1,
            final_residual,
            converged: true,
        })
    }

    fn name(&self) -> &'static str {
        "dense-lu"
    }
}

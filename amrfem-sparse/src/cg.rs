//! Preconditioned conjugate gradient for symmetric positive definite systems.

use crate::{check_dimensions, relative_residual, LinearSolveReport, LinearSolver, LinearSolverError, SolverSettings};
use log::{debug, warn};
use nalgebra::{DMatrix, DVector, DVectorView, DVectorViewMut, RealField, Scalar};
use nalgebra_sparse::CsrMatrix;
use std::error::Error;

pub type OperatorResult = Result<(), Box<dyn Error + Send + Sync>>;

/// An operator `y = A x`.
pub trait LinearOperator<T: Scalar> {
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> OperatorResult;
}

impl<'a, T, A> LinearOperator<T> for &'a A
where
    T: Scalar,
    A: ?Sized + LinearOperator<T>,
{
    fn apply(&self, y: DVectorViewMut<T>, x: DVectorView<T>) -> OperatorResult {
        <A as LinearOperator<T>>::apply(self, y, x)
    }
}

impl<T: RealField + Copy> LinearOperator<T> for DMatrix<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> OperatorResult {
        y.gemv(T::one(), self, &x, T::zero());
        Ok(())
    }
}

impl<T: RealField + Copy> LinearOperator<T> for CsrMatrix<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> OperatorResult {
        assert_eq!(self.ncols(), x.len());
        assert_eq!(self.nrows(), y.len());
        for (i, row) in self.row_iter().enumerate() {
            let mut sum = T::zero();
            for (&j, &a_ij) in row.col_indices().iter().zip(row.values()) {
                sum += a_ij * x[j];
            }
            y[i] = sum;
        }
        Ok(())
    }
}

pub struct IdentityOperator;

impl<T: Scalar> LinearOperator<T> for IdentityOperator {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> OperatorResult {
        y.copy_from(&x);
        Ok(())
    }
}

/// Diagonal (Jacobi) preconditioner `P = diag(A)^{-1}`.
#[derive(Debug, Clone)]
pub struct JacobiPreconditioner<T: Scalar> {
    inverse_diagonal: DVector<T>,
}

impl<T: RealField + Copy> JacobiPreconditioner<T> {
    pub fn from_csr(matrix: &CsrMatrix<T>) -> Result<Self, LinearSolverError> {
        let mut inverse_diagonal = DVector::zeros(matrix.nrows());
        for (i, row) in matrix.row_iter().enumerate() {
            let diagonal = row
                .col_indices()
                .iter()
                .zip(row.values())
                .filter(|&(&j, _)| j == i)
                .fold(T::zero(), |acc, (_, &v)| acc + v);
            if diagonal == T::zero() {
                return Err(LinearSolverError::ZeroDiagonal { row: i });
            }
            inverse_diagonal[i] = T::one() / diagonal;
        }
        Ok(Self { inverse_diagonal })
    }

    pub fn inverse_diagonal(&self) -> &DVector<T> {
        &self.inverse_diagonal
    }
}

impl<T: RealField + Copy> LinearOperator<T> for JacobiPreconditioner<T> {
    fn apply(&self, mut y: DVectorViewMut<T>, x: DVectorView<T>) -> OperatorResult {
        y.zip_zip_apply(&x, &self.inverse_diagonal, |y_i, x_i, d_i| *y_i = x_i * d_i);
        Ok(())
    }
}

#[derive(Debug, Clone)]
#[allow(non_snake_case)]
struct CgWorkspace<T: Scalar> {
    r: DVector<T>,
    z: DVector<T>,
    p: DVector<T>,
    Ap: DVector<T>,
}

impl<T: RealField + Copy> CgWorkspace<T> {
    fn new(dim: usize) -> Self {
        Self {
            r: DVector::zeros(dim),
            z: DVector::zeros(dim),
            p: DVector::zeros(dim),
            Ap: DVector::zeros(dim),
        }
    }
}

/// Result of a conjugate gradient run that did not break down.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CgOutput<T> {
    /// Number of updates made to the solution vector.
    pub num_iterations: usize,
    /// Norm of the recursively updated residual, relative to `||b||`.
    pub approx_relative_residual: T,
    pub converged: bool,
}

/// Preconditioned conjugate gradient with a relative residual stopping criterion.
///
/// Uses the *approximate* residual maintained by the iteration. For ill-conditioned
/// problems it may drift from the true residual, which callers can recompute.
#[derive(Debug)]
pub struct ConjugateGradient<T: Scalar, A, P> {
    operator: A,
    preconditioner: P,
    tolerance: T,
    max_iterations: usize,
}

impl<T: RealField + Copy, A> ConjugateGradient<T, A, IdentityOperator> {
    pub fn new(operator: A) -> Self {
        Self {
            operator,
            preconditioner: IdentityOperator,
            tolerance: T::default_epsilon().sqrt(),
            max_iterations: 1000,
        }
    }
}

impl<T: RealField + Copy, A, P> ConjugateGradient<T, A, P> {
    pub fn with_preconditioner<P2>(self, preconditioner: P2) -> ConjugateGradient<T, A, P2> {
        ConjugateGradient {
            operator: self.operator,
            preconditioner,
            tolerance: self.tolerance,
            max_iterations: self.max_iterations,
        }
    }

    pub fn with_tolerance(self, tolerance: T) -> Self {
        Self { tolerance, ..self }
    }

    pub fn with_max_iterations(self, max_iterations: usize) -> Self {
        Self { max_iterations, ..self }
    }
}

impl<T, A, P> ConjugateGradient<T, A, P>
where
    T: RealField + Copy,
    A: LinearOperator<T>,
    P: LinearOperator<T>,
{
    /// Solves `A x = b` starting from the incoming value of `x`.
    #[allow(non_snake_case)]
    pub fn solve_with_guess(
        &self,
        b: &DVector<T>,
        x: &mut DVector<T>,
    ) -> Result<CgOutput<T>, LinearSolverError> {
        assert_eq!(b.len(), x.len());
        let CgWorkspace { mut r, mut z, mut p, mut Ap } = CgWorkspace::new(x.len());

        let b_norm = b.norm();
        if b_norm == T::zero() {
            x.fill(T::zero());
            return Ok(CgOutput {
                num_iterations: 0,
                approx_relative_residual: T::zero(),
                converged: true,
            });
        }

        // r = b - A x
        self.operator
            .apply(DVectorViewMut::from(&mut r), DVectorView::from(&*x))
            .map_err(LinearSolverError::Operator)?;
        r.zip_apply(b, |r_i, b_i| *r_i = b_i - *r_i);

        // z = P r
        self.preconditioner
            .apply(DVectorViewMut::from(&mut z), DVectorView::from(&r))
            .map_err(LinearSolverError::Operator)?;
        p.copy_from(&z);
        let mut rz = r.dot(&z);

        let mut iterations = 0;
        loop {
            let relative_residual = r.norm() / b_norm;
            if relative_residual <= self.tolerance {
                return Ok(CgOutput {
                    num_iterations: iterations,
                    approx_relative_residual: relative_residual,
                    converged: true,
                });
            }
            if iterations >= self.max_iterations {
                return Ok(CgOutput {
                    num_iterations: iterations,
                    approx_relative_residual: relative_residual,
                    converged: false,
                });
            }

            self.operator
                .apply(DVectorViewMut::from(&mut Ap), DVectorView::from(&p))
                .map_err(LinearSolverError::Operator)?;
            let pAp = p.dot(&Ap);
            if pAp <= T::zero() {
                return Err(LinearSolverError::IndefiniteOperator);
            }

            let alpha = rz / pAp;
            x.axpy(alpha, &p, T::one());
            r.axpy(-alpha, &Ap, T::one());

            self.preconditioner
                .apply(DVectorViewMut::from(&mut z), DVectorView::from(&r))
                .map_err(LinearSolverError::Operator)?;
            let rz_next = r.dot(&z);
            if rz_next < T::zero() {
                return Err(LinearSolverError::IndefinitePreconditioner);
            }

            let beta = rz_next / rz;
            // p = z + beta p
            p.axpy(T::one(), &z, beta);
            rz = rz_next;
            iterations += 1;
        }
    }
}

/// Jacobi-preconditioned CG behind the [`LinearSolver`] interface.
#[derive(Debug, Default, Clone, Copy)]
pub struct PcgSolver;

impl LinearSolver for PcgSolver {
    fn solve(
        &mut self,
        matrix: &CsrMatrix<f64>,
        rhs: &DVector<f64>,
        x: &mut DVector<f64>,
        settings: &SolverSettings,
    ) -> Result<LinearSolveReport, LinearSolverError> {
        check_dimensions(matrix, rhs, x)?;
        let preconditioner = JacobiPreconditioner::from_csr(matrix)?;
        let output = ConjugateGradient::new(matrix)
            .with_preconditioner(&preconditioner)
            .with_tolerance(settings.tolerance)
            .with_max_iterations(settings.max_iterations)
            .solve_with_guess(rhs, x)?;

        let final_residual = relative_residual(matrix, rhs, x);
        if output.converged {
            debug!(
                "CG converged in {} iterations, relative residual {:e}",
                output.num_iterations, final_residual
            );
        } else {
            warn!(
                "CG did not converge within {} iterations, relative residual {:e}",
                settings.max_iterations, final_residual
            );
        }
        Ok(LinearSolveReport {
            iterations: output.num_iterations,
            final_residual,
            converged: output.converged,
        })
    }

    fn name(&self) -> &'static str {
        "jacobi-pcg"
    }
}

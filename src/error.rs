//! The library-wide error type.

use crate::element::FeType;
use crate::mesh::{BoundaryId, ElementId};
use amrfem_sparse::LinearSolverError;
use thiserror::Error;

/// Errors that abort an operation.
///
/// Convergence failures of linear or nonlinear solves are *not* errors; they are reported as
/// statuses in [`LinearSolveReport`](amrfem_sparse::LinearSolveReport) and
/// [`NonlinearReport`](crate::system::NonlinearReport).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AmrError {
    #[error("unsupported element type {fe_type} in {dim}D: {reason}")]
    UnsupportedElementType {
        fe_type: FeType,
        dim: usize,
        reason: &'static str,
    },
    #[error("side {side} of element {element} lies on boundary {boundary_id:?}, which has no boundary condition")]
    MissingBoundaryCondition {
        element: ElementId,
        side: usize,
        boundary_id: Option<BoundaryId>,
    },
    #[error("element {element} has a degenerate Jacobian (determinant {determinant:e})")]
    DegenerateElement { element: ElementId, determinant: f64 },
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),
    #[error("invalid mesh: {0}")]
    InvalidMesh(String),
    #[error("invalid element {element}: {reason}")]
    InvalidElement { element: ElementId, reason: String },
    #[error("linear solver failed")]
    LinearSolver(#[from] LinearSolverError),
    #[error("failed to read configuration")]
    Io(#[from] std::io::Error),
    #[error("failed to parse configuration")]
    Json(#[from] serde_json::Error),
}

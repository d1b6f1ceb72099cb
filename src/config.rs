//! Run parameters of an adaptive solve, read once from JSON.
use crate::element::FeType;
use crate::mesh::refinement::MeshRefinement;
use crate::mesh::MAX_LEVEL;
use crate::AmrError;
use amrfem_sparse::{DenseLuSolver, LinearSolver, PcgSolver, SolverSettings, SparseCholeskySolver};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearSolverKind {
    /// Jacobi preconditioned conjugate gradients.
    Cg,
    /// Sparse Cholesky factorization.
    #[default]
    Cholesky,
    /// Dense LU factorization for small nonsymmetric systems.
    Lu,
}

impl LinearSolverKind {
    pub fn build(&self) -> Box<dyn LinearSolver + Send> {
        match self {
            Self::Cg => Box::new(PcgSolver),
            Self::Cholesky => Box::new(SparseCholeskySolver),
            Self::Lu => Box::new(DenseLuSolver),
        }
    }
}

/// How [`MeshRefinement`] turns an error vector into flags.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlaggingStrategy {
    #[default]
    ElemFraction,
    ErrorFraction,
}

/// Parameters of an adaptive run. Missing fields take their default.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AmrConfig {
    pub dimension: usize,
    /// Number of base cells along each axis of the initial mesh.
    pub initial_cells: usize,
    pub fe_type: FeType,
    pub max_r_steps: usize,
    pub max_r_level: u8,
    /// Refine every element in every step instead of estimating errors.
    pub uniform_refine: bool,
    pub refine_fraction: f64,
    pub coarsen_fraction: f64,
    pub flagging: FlaggingStrategy,
    /// The loop stops early once the global error estimate falls below this value.
    pub error_tolerance: f64,
    pub penalty: f64,
    pub linear_solver: LinearSolverKind,
    pub linear_tolerance: f64,
    pub max_linear_iterations: usize,
}

impl Default for AmrConfig {
    fn default() -> Self {
        Self {
            dimension: 2,
            initial_cells: 2,
            fe_type: FeType::hermite(),
            max_r_steps: 4,
            max_r_level: 10,
            uniform_refine: false,
            refine_fraction: 0.5,
            coarsen_fraction: 0.5,
            flagging: FlaggingStrategy::ElemFraction,
            error_tolerance: 0.0,
            penalty: 1e10,
            linear_solver: LinearSolverKind::Cholesky,
            linear_tolerance: 1e-12,
            max_linear_iterations: 10_000,
        }
    }
}

impl AmrConfig {
    pub fn from_json_str(json: &str) -> Result<Self, AmrError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, AmrError> {
        let json = fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }

    pub fn to_json_string(&self) -> Result<String, AmrError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Rejects parameters outside of their admissible ranges.
    pub fn validate(&self) -> Result<(), AmrError> {
        let invalid = |message: String| Err(AmrError::InvalidConfiguration(message));
        self.fe_type.validate(self.dimension)?;
        if self.initial_cells == 0 {
            return invalid("initial_cells must be positive".to_string());
        }
        if self.max_r_steps == 0 {
            return invalid("max_r_steps must be at least 1".to_string());
        }
        if self.max_r_level > MAX_LEVEL {
            return invalid(format!("max_r_level must not exceed {MAX_LEVEL}, got {}", self.max_r_level));
        }
        for (name, fraction) in [
            ("refine_fraction", self.refine_fraction),
            ("coarsen_fraction", self.coarsen_fraction),
        ] {
            if !(0.0..=1.0).contains(&fraction) {
                return invalid(format!("{name} must lie in [0, 1], got {fraction}"));
            }
        }
        if !(self.error_tolerance >= 0.0) {
            return invalid(format!("error_tolerance must be non-negative, got {}", self.error_tolerance));
        }
        if !(self.penalty > 0.0 && self.penalty.is_finite()) {
            return invalid(format!("penalty must be positive and finite, got {}", self.penalty));
        }
        if !(self.linear_tolerance > 0.0) {
            return invalid(format!("linear_tolerance must be positive, got {}", self.linear_tolerance));
        }
        if self.max_linear_iterations == 0 {
            return invalid("max_linear_iterations must be positive".to_string());
        }
        Ok(())
    }

    pub fn solver_settings(&self) -> SolverSettings {
        SolverSettings {
            tolerance: self.linear_tolerance,
            max_iterations: self.max_linear_iterations,
        }
    }

    pub fn mesh_refinement(&self) -> MeshRefinement {
        MeshRefinement::new()
            .with_refine_fraction(self.refine_fraction)
            .with_coarsen_fraction(self.coarsen_fraction)
            .with_max_h_level(self.max_r_level)
    }
}

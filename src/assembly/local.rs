use crate::dof_map::DofMap;
use crate::mesh::{BoundaryId, ElementId, Mesh};
use crate::AmrError;
use nalgebra::{DMatrix, DVector, Point3, Vector3};
use rustc_hash::FxHashMap;
use std::fmt;
use std::sync::Arc;

mod biharmonic;
mod ipdg;
mod laplace_young;
mod navier_stokes;
mod poisson;

pub use biharmonic::*;
pub use ipdg::*;
pub use laplace_young::*;
pub use navier_stokes::*;
pub use poisson::*;

/// Penalty used for weakly imposed boundary values and fluxes.
pub const DEFAULT_PENALTY: f64 = 1e10;

/// Read-only state shared by all element computations of one assembly pass.
#[derive(Clone, Copy)]
pub struct AssemblyContext<'a> {
    pub mesh: &'a Mesh,
    pub dof_map: &'a DofMap,
    /// Current iterate, used for linearization of nonlinear problems.
    pub solution: &'a DVector<f64>,
    /// Solution of the previous time step for transient problems.
    pub old_solution: Option<&'a DVector<f64>>,
}

/// A rectangular block coupling the dofs of two elements, as produced by DG face terms.
#[derive(Clone, Debug, PartialEq)]
pub struct CouplingBlock {
    pub row_dofs: Vec<usize>,
    pub col_dofs: Vec<usize>,
    pub matrix: DMatrix<f64>,
}

/// The local matrix `Ke`, vector `Fe` and off-element couplings of a single element.
#[derive(Clone, Debug, PartialEq)]
pub struct ElementContribution {
    pub dof_indices: Vec<usize>,
    pub matrix: DMatrix<f64>,
    pub vector: DVector<f64>,
    pub couplings: Vec<CouplingBlock>,
}

impl Default for ElementContribution {
    fn default() -> Self {
        Self {
            dof_indices: Vec::new(),
            matrix: DMatrix::zeros(0, 0),
            vector: DVector::zeros(0),
            couplings: Vec::new(),
        }
    }
}

impl ElementContribution {
    /// Resets the contribution to zeros for the given element dofs.
    pub fn reset(&mut self, dof_indices: Vec<usize>) {
        let n = dof_indices.len();
        self.dof_indices = dof_indices;
        self.matrix = DMatrix::zeros(n, n);
        self.vector = DVector::zeros(n);
        self.couplings.clear();
    }
}

/// Computes the contribution of single elements to a global system.
///
/// Implementations are shared between threads. Mutable scratch data such as [`FeValues`]
/// lives in the associated `Workspace`, of which every thread owns one instance.
///
/// [`FeValues`]: crate::fe::FeValues
pub trait ElementAssembler: Sync {
    type Workspace: Send;

    fn new_workspace(&self, dof_map: &DofMap) -> Result<Self::Workspace, AmrError>;

    fn assemble_element(
        &self,
        context: &AssemblyContext,
        workspace: &mut Self::Workspace,
        element: ElementId,
        output: &mut ElementContribution,
    ) -> Result<(), AmrError>;
}

pub type ScalarFunction = Arc<dyn Fn(&Point3<f64>) -> f64 + Send + Sync>;
pub type VectorFunction = Arc<dyn Fn(&Point3<f64>) -> Vector3<f64> + Send + Sync>;

/// The condition imposed on a boundary with a given id.
#[derive(Clone)]
pub enum BoundaryCondition {
    /// Weakly imposed values by penalty. C1 problems also penalize the normal flux, using
    /// `gradient` when given and a zero flux otherwise.
    Dirichlet {
        value: ScalarFunction,
        gradient: Option<VectorFunction>,
    },
    /// Prescribed normal flux `n · ∇u`.
    Neumann { flux: ScalarFunction },
    /// Homogeneous natural condition without any side terms.
    Natural,
    /// Imposed through constraints of the [`DofMap`], without any side terms.
    Constrained,
}

impl BoundaryCondition {
    pub fn dirichlet(value: impl Fn(&Point3<f64>) -> f64 + Send + Sync + 'static) -> Self {
        Self::Dirichlet {
            value: Arc::new(value),
            gradient: None,
        }
    }

    pub fn dirichlet_with_gradient(
        value: impl Fn(&Point3<f64>) -> f64 + Send + Sync + 'static,
        gradient: impl Fn(&Point3<f64>) -> Vector3<f64> + Send + Sync + 'static,
    ) -> Self {
        Self::Dirichlet {
            value: Arc::new(value),
            gradient: Some(Arc::new(gradient)),
        }
    }

    pub fn neumann(flux: impl Fn(&Point3<f64>) -> f64 + Send + Sync + 'static) -> Self {
        Self::Neumann { flux: Arc::new(flux) }
    }
}

impl fmt::Debug for BoundaryCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dirichlet { gradient, .. } => f
                .debug_struct("Dirichlet")
                .field("gradient", &gradient.is_some())
                .finish_non_exhaustive(),
            Self::Neumann { .. } => f.debug_struct("Neumann").finish_non_exhaustive(),
            Self::Natural => write!(f, "Natural"),
            Self::Constrained => write!(f, "Constrained"),
        }
    }
}

/// Boundary conditions keyed by boundary id.
#[derive(Clone, Debug, Default)]
pub struct BoundaryConditions {
    conditions: FxHashMap<BoundaryId, BoundaryCondition>,
}

impl BoundaryConditions {
    pub fn new() -> Self {
        Self::default()
    }

    /// The same condition on every listed boundary id.
    pub fn uniform(ids: impl IntoIterator<Item = BoundaryId>, condition: BoundaryCondition) -> Self {
        let mut conditions = Self::new();
        for id in ids {
            conditions.insert(id, condition.clone());
        }
        conditions
    }

    pub fn with(mut self, id: BoundaryId, condition: BoundaryCondition) -> Self {
        self.insert(id, condition);
        self
    }

    pub fn insert(&mut self, id: BoundaryId, condition: BoundaryCondition) {
        self.conditions.insert(id, condition);
    }

    pub fn get(&self, id: BoundaryId) -> Option<&BoundaryCondition> {
        self.conditions.get(&id)
    }

    /// Looks up the condition of a boundary side.
    ///
    /// Sides without an id, or with an id that has no condition, are a configuration error.
    pub fn for_side(&self, mesh: &Mesh, element: ElementId, side: usize) -> Result<&BoundaryCondition, AmrError> {
        let boundary_id = mesh.element(element).boundary_id(side);
        boundary_id
            .and_then(|id| self.get(id))
            .ok_or(AmrError::MissingBoundaryCondition {
                element,
                side,
                boundary_id,
            })
    }
}

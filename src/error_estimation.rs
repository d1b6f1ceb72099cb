//! Functionality for error estimation.
//!
//! Estimators produce an [`ErrorVector`] with one non-negative indicator per element, which
//! drives [`MeshRefinement`](crate::mesh::refinement::MeshRefinement). [`ExactSolution`] computes
//! global error norms against a known solution.
use crate::assembly::{FaceOwnership, ScalarFunction, VectorFunction};
use crate::element::ShapeCapabilities;
use crate::fe::FeValues;
use crate::mesh::{ElementId, Mesh};
use crate::system::EquationSystem;
use crate::AmrError;
use eyre::WrapErr;
use itertools::izip;
use nalgebra::{Matrix3, Point3, Vector3};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// One error indicator per element, indexed by element id.
///
/// Statistics only consider the elements that were active when the vector was created. Slots of
/// inactive or removed elements are zero.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ErrorVector {
    values: Vec<f64>,
    active: Vec<ElementId>,
}

impl ErrorVector {
    /// A zero indicator for every active element of the mesh.
    pub fn new(mesh: &Mesh) -> Self {
        Self {
            values: vec![0.0; mesh.element_capacity()],
            active: mesh.active_element_ids(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn get(&self, element: ElementId) -> f64 {
        self.values.get(element.0).copied().unwrap_or(0.0)
    }

    /// # Panics
    ///
    /// Panics if the element id is beyond the capacity of the mesh the vector was created for.
    pub fn set(&mut self, element: ElementId, value: f64) {
        self.values[element.0] = value;
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn active_elements(&self) -> &[ElementId] {
        &self.active
    }

    /// Pairs of active element and indicator, in increasing id order.
    pub fn iter_active(&self) -> impl Iterator<Item = (ElementId, f64)> + '_ {
        self.active.iter().map(move |&id| (id, self.values[id.0]))
    }

    pub fn mean(&self) -> f64 {
        if self.active.is_empty() {
            return 0.0;
        }
        self.iter_active().map(|(_, e)| e).sum::<f64>() / self.active.len() as f64
    }

    /// Unbiased sample variance over the active elements.
    pub fn variance(&self) -> f64 {
        let n = self.active.len();
        if n < 2 {
            return 0.0;
        }
        let mean = self.mean();
        self.iter_active()
            .map(|(_, e)| (e - mean).powi(2))
            .sum::<f64>()
            / (n - 1) as f64
    }

    /// Square root of the sum of squared indicators, the global estimate.
    pub fn l2_norm(&self) -> f64 {
        self.iter_active()
            .map(|(_, e)| e * e)
            .sum::<f64>()
            .sqrt()
    }

    pub fn max(&self) -> f64 {
        self.iter_active().map(|(_, e)| e).fold(0.0, f64::max)
    }

    pub fn min(&self) -> f64 {
        self.iter_active()
            .map(|(_, e)| e)
            .reduce(f64::min)
            .unwrap_or(0.0)
    }
}

/// Computes per-element error indicators for one variable of a solved system.
pub trait ErrorEstimator {
    fn estimate_error(&self, mesh: &Mesh, system: &EquationSystem, variable: usize) -> Result<ErrorVector, AmrError>;
}

/// The quantity whose jump across faces drives a [`JumpErrorEstimator`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JumpKind {
    /// Jump of the normal derivative `[∇u · n]`, the Kelly estimator for second order problems.
    NormalFlux,
    /// Jump of the Laplacian `[Δu]`, for fourth order problems on C1 elements.
    Laplacian,
    /// Jump of the value `[u]`, for discontinuous elements.
    Value,
}

/// Estimates errors from jumps across interior faces.
///
/// Every interior face is integrated once, from its finer side. The contribution
/// `h ∫ jump²`, with `h` the diameter of the coarser of the two elements, is added to both
/// elements, and the indicator of an element is the square root of its sum. Boundary faces
/// do not contribute.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct JumpErrorEstimator {
    kind: JumpKind,
    quadrature_order: Option<usize>,
}

impl JumpErrorEstimator {
    pub fn new(kind: JumpKind) -> Self {
        Self {
            kind,
            quadrature_order: None,
        }
    }

    pub fn kelly() -> Self {
        Self::new(JumpKind::NormalFlux)
    }

    pub fn laplacian() -> Self {
        Self::new(JumpKind::Laplacian)
    }

    pub fn with_quadrature_order(self, order: usize) -> Self {
        Self {
            quadrature_order: Some(order),
            ..self
        }
    }

    pub fn kind(&self) -> JumpKind {
        self.kind
    }
}

impl ErrorEstimator for JumpErrorEstimator {
    fn estimate_error(&self, mesh: &Mesh, system: &EquationSystem, variable: usize) -> Result<ErrorVector, AmrError> {
        let dof_map = system.dof_map();
        check_variable(system, variable)?;
        let fe_type = dof_map.variable(variable).fe_type();
        if self.kind == JumpKind::Laplacian && !fe_type.supports_second_derivatives() {
            return Err(AmrError::UnsupportedElementType {
                fe_type,
                dim: mesh.dim(),
                reason: "Laplacian jumps require elements with second derivatives",
            });
        }

        let order = self
            .quadrature_order
            .unwrap_or_else(|| fe_type.default_quadrature_order());
        let mut fe_face = FeValues::new_side(fe_type, mesh.dim(), order)?;
        let mut fe_neighbor = FeValues::new_side(fe_type, mesh.dim(), order)?;
        let solution = system.solution();
        let mut squared = ErrorVector::new(mesh);

        for element in mesh.active_elements() {
            let id = element.id();
            for side in 0..mesh.n_sides() {
                let Some(neighbor) = mesh.neighbor(id, side) else {
                    continue;
                };
                if !FaceOwnership::LowerId.owns_face(mesh, id, neighbor) {
                    continue;
                }

                fe_face.reinit_side(mesh, id, side)?;
                fe_neighbor.reinit_at_points(mesh, neighbor, fe_face.xyz())?;
                let u_element = dof_map.local_solution(id, variable, solution);
                let u_neighbor = dof_map.local_solution(neighbor, variable, solution);

                let jumps: Vec<f64> = match self.kind {
                    JumpKind::NormalFlux => izip!(
                        fe_face.interpolate_gradient(&u_element),
                        fe_neighbor.interpolate_gradient(&u_neighbor),
                        fe_face.normals()
                    )
                    .map(|(grad_e, grad_n, normal)| (grad_e - grad_n).dot(normal))
                    .collect(),
                    JumpKind::Laplacian => izip!(
                        fe_face.interpolate_hessian(&u_element),
                        fe_neighbor.interpolate_hessian(&u_neighbor)
                    )
                    .map(|(hess_e, hess_n)| hess_e.trace() - hess_n.trace())
                    .collect(),
                    JumpKind::Value => izip!(fe_face.interpolate(&u_element), fe_neighbor.interpolate(&u_neighbor))
                        .map(|(u_e, u_n)| u_e - u_n)
                        .collect(),
                };

                let integral: f64 = izip!(fe_face.jxw(), &jumps)
                    .map(|(w, jump)| w * jump * jump)
                    .sum();
                let h = mesh
                    .element_box(id)
                    .hmax()
                    .max(mesh.element_box(neighbor).hmax());
                squared.values[id.0] += h * integral;
                squared.values[neighbor.0] += h * integral;
            }
        }

        for value in &mut squared.values {
            *value = value.sqrt();
        }
        Ok(squared)
    }
}

pub type MatrixFunction = Arc<dyn Fn(&Point3<f64>) -> Matrix3<f64> + Send + Sync>;

/// Default number of orders added to the quadrature of the discrete field when integrating
/// errors against a non-polynomial exact solution.
pub const DEFAULT_EXTRA_QUADRATURE_ORDER: usize = 2;

/// Global error norms of a discrete field.
///
/// `h1` and `h2` are full norms including the lower order terms. They are only available when
/// the exact solution provides the corresponding derivatives.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorNorms {
    pub l2: f64,
    pub h1: Option<f64>,
    pub h2: Option<f64>,
}

/// Squared error integrals of a single element.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
struct ElementErrors {
    value: f64,
    gradient: f64,
    hessian: f64,
}

/// A known solution with optional derivatives, against which discrete fields are measured.
#[derive(Clone)]
pub struct ExactSolution {
    value: ScalarFunction,
    gradient: Option<VectorFunction>,
    hessian: Option<MatrixFunction>,
    extra_quadrature_order: usize,
}

impl fmt::Debug for ExactSolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExactSolution")
            .field("gradient", &self.gradient.is_some())
            .field("hessian", &self.hessian.is_some())
            .field("extra_quadrature_order", &self.extra_quadrature_order)
            .finish_non_exhaustive()
    }
}

impl ExactSolution {
    pub fn new(value: impl Fn(&Point3<f64>) -> f64 + Send + Sync + 'static) -> Self {
        Self {
            value: Arc::new(value),
            gradient: None,
            hessian: None,
            extra_quadrature_order: DEFAULT_EXTRA_QUADRATURE_ORDER,
        }
    }

    /// The zero function, whose error norms are the norms of the discrete field itself.
    pub fn zero() -> Self {
        Self::new(|_| 0.0)
            .with_gradient(|_| Vector3::zeros())
            .with_hessian(|_| Matrix3::zeros())
    }

    pub fn with_gradient(self, gradient: impl Fn(&Point3<f64>) -> Vector3<f64> + Send + Sync + 'static) -> Self {
        Self {
            gradient: Some(Arc::new(gradient)),
            ..self
        }
    }

    pub fn with_hessian(self, hessian: impl Fn(&Point3<f64>) -> Matrix3<f64> + Send + Sync + 'static) -> Self {
        Self {
            hessian: Some(Arc::new(hessian)),
            ..self
        }
    }

    pub fn with_extra_quadrature_order(self, extra_quadrature_order: usize) -> Self {
        Self {
            extra_quadrature_order,
            ..self
        }
    }

    /// Computes the L2, H1 and H2 errors of one variable over the active elements.
    pub fn compute_error(&self, mesh: &Mesh, system: &EquationSystem, variable: usize) -> eyre::Result<ErrorNorms> {
        let element_errors = self
            .element_errors(mesh, system, variable)
            .wrap_err_with(|| format!("failed to compute errors of variable {variable} in system {}", system.name()))?;
        let total = element_errors
            .iter()
            .fold(ElementErrors::default(), |acc, (_, e)| ElementErrors {
                value: acc.value + e.value,
                gradient: acc.gradient + e.gradient,
                hessian: acc.hessian + e.hessian,
            });

        let fe_type = system.dof_map().variable(variable).fe_type();
        let h1 = self
            .gradient
            .is_some()
            .then(|| (total.value + total.gradient).sqrt());
        let h2 = (self.gradient.is_some() && self.hessian.is_some() && fe_type.supports_second_derivatives())
            .then(|| (total.value + total.gradient + total.hessian).sqrt());
        Ok(ErrorNorms {
            l2: total.value.sqrt(),
            h1,
            h2,
        })
    }

    pub fn l2_error(&self, mesh: &Mesh, system: &EquationSystem, variable: usize) -> eyre::Result<f64> {
        Ok(self.compute_error(mesh, system, variable)?.l2)
    }

    fn element_errors(
        &self,
        mesh: &Mesh,
        system: &EquationSystem,
        variable: usize,
    ) -> Result<Vec<(ElementId, ElementErrors)>, AmrError> {
        check_variable(system, variable)?;
        let dof_map = system.dof_map();
        let fe_type = dof_map.variable(variable).fe_type();
        let order = fe_type.default_quadrature_order() + self.extra_quadrature_order;
        let template = FeValues::new(fe_type, mesh.dim(), order)?;
        let with_hessian = self.hessian.is_some() && fe_type.supports_second_derivatives();
        let dim = mesh.dim();
        let solution = system.solution();

        let active = mesh.active_element_ids();
        active
            .par_iter()
            .map_init(
                || template.clone(),
                |fe, &id| {
                    fe.reinit(mesh, id)?;
                    let coefficients = dof_map.local_solution(id, variable, solution);
                    let values = fe.interpolate(&coefficients);
                    let mut errors = ElementErrors::default();
                    for (qp, (w, x)) in izip!(fe.jxw(), fe.xyz()).enumerate() {
                        errors.value += w * (values[qp] - (self.value)(x)).powi(2);
                    }
                    if let Some(gradient) = &self.gradient {
                        let gradients = fe.interpolate_gradient(&coefficients);
                        for (qp, (w, x)) in izip!(fe.jxw(), fe.xyz()).enumerate() {
                            let diff = gradients[qp] - gradient(x);
                            errors.gradient += w * (0..dim).map(|a| diff[a].powi(2)).sum::<f64>();
                        }
                    }
                    if let (Some(hessian), true) = (&self.hessian, with_hessian) {
                        let hessians = fe.interpolate_hessian(&coefficients);
                        for (qp, (w, x)) in izip!(fe.jxw(), fe.xyz()).enumerate() {
                            let diff = hessians[qp] - hessian(x);
                            let squared_norm: f64 = (0..dim)
                                .flat_map(|a| (0..dim).map(move |b| (a, b)))
                                .map(|(a, b)| diff[(a, b)].powi(2))
                                .sum();
                            errors.hessian += w * squared_norm;
                        }
                    }
                    Ok::<_, AmrError>((id, errors))
                },
            )
            .collect()
    }
}

/// The norm measured by an [`ExactErrorEstimator`].
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorNorm {
    #[default]
    L2,
    H1,
    H2,
}

/// Uses the true per-element error against an [`ExactSolution`] as the indicator.
#[derive(Clone, Debug)]
pub struct ExactErrorEstimator {
    exact: ExactSolution,
    norm: ErrorNorm,
}

impl ExactErrorEstimator {
    pub fn new(exact: ExactSolution, norm: ErrorNorm) -> Self {
        Self { exact, norm }
    }

    pub fn norm(&self) -> ErrorNorm {
        self.norm
    }
}

impl ErrorEstimator for ExactErrorEstimator {
    fn estimate_error(&self, mesh: &Mesh, system: &EquationSystem, variable: usize) -> Result<ErrorVector, AmrError> {
        let missing = match self.norm {
            ErrorNorm::L2 => None,
            ErrorNorm::H1 => self.exact.gradient.is_none().then_some("gradient"),
            ErrorNorm::H2 => (self.exact.gradient.is_none() || self.exact.hessian.is_none())
                .then_some("gradient and Hessian"),
        };
        if let Some(missing) = missing {
            return Err(AmrError::InvalidConfiguration(format!(
                "the {:?} error requires the {missing} of the exact solution",
                self.norm
            )));
        }

        let mut result = ErrorVector::new(mesh);
        for (id, errors) in self.exact.element_errors(mesh, system, variable)? {
            let squared = match self.norm {
                ErrorNorm::L2 => errors.value,
                ErrorNorm::H1 => errors.value + errors.gradient,
                ErrorNorm::H2 => errors.value + errors.gradient + errors.hessian,
            };
            result.set(id, squared.sqrt());
        }
        Ok(result)
    }
}

fn check_variable(system: &EquationSystem, variable: usize) -> Result<(), AmrError> {
    let n_variables = system.dof_map().n_variables();
    if variable >= n_variables {
        return Err(AmrError::InvalidConfiguration(format!(
            "variable {variable} does not exist in system {} with {n_variables} variable(s)",
            system.name()
        )));
    }
    Ok(())
}

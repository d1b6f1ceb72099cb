//! Degree-of-freedom distribution and constraints.
//!
//! Continuous families share dofs between elements by keying them on the lattice point of their
//! site, while discontinuous families key them on the owning element. Hanging sites of
//! non-conforming meshes are constrained to the trace of the coarser neighbor, and Dirichlet data
//! is imposed as heterogeneous constraints `x_c = sum_m c_m x_m + rhs`.
use crate::element::{FeType, ShapeCapabilities, TensorBasis};
use crate::mesh::{BoundaryId, ElementId, LatticePoint, Mesh, MAX_LEVEL};
use crate::AmrError;
use itertools::izip;
use log::debug;
use nalgebra::{DMatrix, DVector, Point3};
use rustc_hash::FxHashMap;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Coefficients smaller than this are dropped from hanging-node constraints.
const CONSTRAINT_COEFFICIENT_TOLERANCE: f64 = 1e-13;

#[derive(Clone, Debug, PartialEq)]
pub struct Variable {
    name: String,
    fe_type: FeType,
}

impl Variable {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fe_type(&self) -> FeType {
        self.fe_type
    }
}

/// The identity of a dof, independent of the numbering.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DofKey {
    /// A dof of a continuous family, shared by all elements having a site at the lattice point.
    Site {
        variable: usize,
        point: LatticePoint,
        /// Derivative component as a bit mask over axes, zero for nodal values.
        component: u8,
    },
    /// A dof of a discontinuous family, owned by a single element.
    Element {
        variable: usize,
        element: ElementId,
        local: usize,
    },
}

/// An affine constraint `x = sum_m c_m x_m + rhs` of a single dof.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DofConstraint {
    /// Pairs of master dof and coefficient `c_m`.
    pub masters: Vec<(usize, f64)>,
    pub rhs: f64,
}

/// Boundary data for [`DirichletBoundary`], evaluated at physical site positions.
pub type BoundaryFunction = Arc<dyn Fn(&Point3<f64>) -> f64 + Send + Sync>;

/// Constrains the nodal values of a variable on all boundary sides with the given ids.
///
/// For Hermite variables only the nodal values are constrained; the derivative dofs stay free.
/// Discontinuous variables impose boundary data weakly and are not affected.
#[derive(Clone)]
pub struct DirichletBoundary {
    pub variable: usize,
    pub boundary_ids: Vec<BoundaryId>,
    pub value: BoundaryFunction,
}

impl DirichletBoundary {
    pub fn new(
        variable: usize,
        boundary_ids: impl Into<Vec<BoundaryId>>,
        value: impl Fn(&Point3<f64>) -> f64 + Send + Sync + 'static,
    ) -> Self {
        Self {
            variable,
            boundary_ids: boundary_ids.into(),
            value: Arc::new(value),
        }
    }

    pub fn homogeneous(variable: usize, boundary_ids: impl Into<Vec<BoundaryId>>) -> Self {
        Self::new(variable, boundary_ids, |_| 0.0)
    }
}

impl fmt::Debug for DirichletBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirichletBoundary")
            .field("variable", &self.variable)
            .field("boundary_ids", &self.boundary_ids)
            .finish_non_exhaustive()
    }
}

/// Pins the nodal value of a variable at the site located at `point`.
#[derive(Clone, Debug, PartialEq)]
pub struct PointConstraint {
    pub variable: usize,
    pub point: Point3<f64>,
    pub value: f64,
}

#[derive(Clone, Debug)]
pub struct DofMap {
    dim: usize,
    variables: Vec<Variable>,
    bases: Vec<TensorBasis>,
    // [variable][element id] -> global dofs, empty for inactive or removed elements
    element_dofs: Vec<Vec<Vec<usize>>>,
    dof_keys: Vec<DofKey>,
    dof_lookup: FxHashMap<DofKey, usize>,
    constraints: BTreeMap<usize, DofConstraint>,
    dirichlet_boundaries: Vec<DirichletBoundary>,
    point_constraints: Vec<PointConstraint>,
}

impl DofMap {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            variables: Vec::new(),
            bases: Vec::new(),
            element_dofs: Vec::new(),
            dof_keys: Vec::new(),
            dof_lookup: FxHashMap::default(),
            constraints: BTreeMap::new(),
            dirichlet_boundaries: Vec::new(),
            point_constraints: Vec::new(),
        }
    }

    /// Adds a variable and returns its index.
    pub fn add_variable(&mut self, name: impl Into<String>, fe_type: FeType) -> Result<usize, AmrError> {
        let basis = TensorBasis::new(fe_type, self.dim)?;
        self.variables.push(Variable {
            name: name.into(),
            fe_type,
        });
        self.bases.push(basis);
        Ok(self.variables.len() - 1)
    }

    /// Registers a Dirichlet boundary that is imposed on every subsequent distribution.
    pub fn add_dirichlet_boundary(&mut self, boundary: DirichletBoundary) {
        self.dirichlet_boundaries.push(boundary);
    }

    /// Registers a point constraint that is imposed on every subsequent distribution.
    pub fn add_point_constraint(&mut self, constraint: PointConstraint) {
        self.point_constraints.push(constraint);
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn n_variables(&self) -> usize {
        self.variables.len()
    }

    pub fn variable(&self, index: usize) -> &Variable {
        &self.variables[index]
    }

    pub fn variables(&self) -> &[Variable] {
        &self.variables
    }

    pub fn variable_number(&self, name: &str) -> Option<usize> {
        self.variables.iter().position(|v| v.name == name)
    }

    pub fn basis(&self, variable: usize) -> &TensorBasis {
        &self.bases[variable]
    }

    pub fn n_dofs(&self) -> usize {
        self.dof_keys.len()
    }

    pub fn dof_key(&self, dof: usize) -> &DofKey {
        &self.dof_keys[dof]
    }

    pub fn dof_for_key(&self, key: &DofKey) -> Option<usize> {
        self.dof_lookup.get(key).copied()
    }

    /// Global dofs of one variable on an active element, in local shape function order.
    pub fn dof_indices(&self, element: ElementId, variable: usize) -> &[usize] {
        self.element_dofs[variable]
            .get(element.0)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Global dofs of all variables on an element, variable by variable.
    pub fn element_dof_indices(&self, element: ElementId) -> Vec<usize> {
        (0..self.n_variables())
            .flat_map(|variable| self.dof_indices(element, variable).iter().copied())
            .collect()
    }

    /// Gathers the local coefficients of one variable on an element from a global vector.
    pub fn local_solution(&self, element: ElementId, variable: usize, solution: &DVector<f64>) -> Vec<f64> {
        self.dof_indices(element, variable)
            .iter()
            .map(|&dof| solution[dof])
            .collect()
    }

    pub fn constraints(&self) -> &BTreeMap<usize, DofConstraint> {
        &self.constraints
    }

    pub fn constraint(&self, dof: usize) -> Option<&DofConstraint> {
        self.constraints.get(&dof)
    }

    pub fn is_constrained(&self, dof: usize) -> bool {
        self.constraints.contains_key(&dof)
    }

    pub fn n_constrained_dofs(&self) -> usize {
        self.constraints.len()
    }

    /// Numbers the dofs of all variables on the active elements and builds the constraints.
    ///
    /// Dofs are numbered contiguously in increasing active element id order. Hanging-node
    /// constraints are built first; Dirichlet and point constraints then replace them where
    /// they overlap, and chains of constraints are resolved so that every master is free.
    pub fn distribute_dofs(&mut self, mesh: &Mesh) -> Result<(), AmrError> {
        if mesh.dim() != self.dim {
            return Err(AmrError::InvalidMesh(format!(
                "dof map is {}-dimensional, mesh is {}-dimensional",
                self.dim,
                mesh.dim()
            )));
        }

        self.dof_keys.clear();
        self.dof_lookup.clear();
        self.constraints.clear();
        self.element_dofs = vec![vec![Vec::new(); mesh.element_capacity()]; self.n_variables()];

        for element in mesh.active_elements() {
            for (variable, basis) in self.bases.iter().enumerate() {
                let continuous = basis.fe_type().is_continuous();
                let dofs = (0..basis.n_functions())
                    .map(|local| {
                        let key = if continuous {
                            DofKey::Site {
                                variable,
                                point: basis.site_lattice_point(local, &element.lo(), element.size()),
                                component: basis.functions()[local].component(),
                            }
                        } else {
                            DofKey::Element {
                                variable,
                                element: element.id(),
                                local,
                            }
                        };
                        *self.dof_lookup.entry(key).or_insert_with(|| {
                            self.dof_keys.push(key);
                            self.dof_keys.len() - 1
                        })
                    })
                    .collect();
                self.element_dofs[variable][element.id().0] = dofs;
            }
        }

        self.constraints = self.hanging_node_constraints(mesh);
        let n_hanging = self.constraints.len();
        self.apply_dirichlet_boundaries(mesh);
        self.apply_point_constraints(mesh)?;
        resolve_constraint_chains(&mut self.constraints)?;

        debug!(
            "Distributed {} dofs over {} active elements ({} hanging, {} constrained in total)",
            self.n_dofs(),
            mesh.n_active_elements(),
            n_hanging,
            self.constraints.len()
        );
        Ok(())
    }

    fn hanging_node_constraints(&self, mesh: &Mesh) -> BTreeMap<usize, DofConstraint> {
        let mut constraints = BTreeMap::new();
        for (variable, basis) in self.bases.iter().enumerate() {
            if !basis.fe_type().is_continuous() {
                continue;
            }
            for element in mesh.active_elements() {
                for side in 0..mesh.n_sides() {
                    let coarse = match mesh.neighbor(element.id(), side) {
                        Some(neighbor) if mesh.element(neighbor).level() < element.level() => mesh.element(neighbor),
                        _ => continue,
                    };
                    let coarse_box = mesh.element_box(coarse.id());
                    let coarse_lengths = coarse_box.lengths();
                    let coarse_dofs = self.dof_indices(coarse.id(), variable);

                    for local in basis.functions_on_side(side) {
                        let point = basis.site_lattice_point(local, &element.lo(), element.size());
                        let is_coarse_site = (0..self.dim).all(|a| {
                            (point[a] - coarse.lo()[a]) * basis.site_denominator() % coarse.size() == 0
                        });
                        if is_coarse_site {
                            continue;
                        }
                        let dof = self.element_dofs[variable][element.id().0][local];
                        if constraints.contains_key(&dof) {
                            continue;
                        }

                        let xi = coarse_box.to_reference(&mesh.lattice_to_physical(&point));
                        let alpha = basis.functions()[local].derivative;
                        let masters = coarse_dofs
                            .iter()
                            .enumerate()
                            .map(|(j, &master)| (master, basis.physical_derivative(j, &xi, alpha, &coarse_lengths)))
                            .filter(|(_, c)| c.abs() > CONSTRAINT_COEFFICIENT_TOLERANCE)
                            .collect();
                        constraints.insert(dof, DofConstraint { masters, rhs: 0.0 });
                    }
                }
            }
        }
        constraints
    }

    fn apply_dirichlet_boundaries(&mut self, mesh: &Mesh) {
        let mut dirichlet = Vec::new();
        for boundary in &self.dirichlet_boundaries {
            let basis = &self.bases[boundary.variable];
            if !basis.fe_type().is_continuous() {
                continue;
            }
            for element in mesh.active_elements() {
                for side in 0..mesh.n_sides() {
                    let on_boundary = mesh.neighbor(element.id(), side).is_none()
                        && element
                            .boundary_id(side)
                            .map_or(false, |id| boundary.boundary_ids.contains(&id));
                    if !on_boundary {
                        continue;
                    }
                    for local in basis.functions_on_side(side) {
                        if basis.functions()[local].component() != 0 {
                            continue;
                        }
                        let point = basis.site_lattice_point(local, &element.lo(), element.size());
                        let dof = self.element_dofs[boundary.variable][element.id().0][local];
                        let rhs = (boundary.value)(&mesh.lattice_to_physical(&point));
                        dirichlet.push((dof, rhs));
                    }
                }
            }
        }
        for (dof, rhs) in dirichlet {
            self.constraints.insert(dof, DofConstraint { masters: Vec::new(), rhs });
        }
    }

    fn apply_point_constraints(&mut self, mesh: &Mesh) -> Result<(), AmrError> {
        for constraint in &self.point_constraints {
            let variable = constraint.variable;
            let basis = self.bases.get(variable).ok_or_else(|| {
                AmrError::InvalidConfiguration(format!("point constraint refers to unknown variable {variable}"))
            })?;
            let found = mesh.active_elements().find_map(|element| {
                let element_box = mesh.element_box(element.id());
                let tol = 1e-8 * element_box.hmax();
                (0..basis.n_functions())
                    .filter(|&local| basis.functions()[local].component() == 0)
                    .find(|&local| {
                        let x = element_box.to_physical(&basis.site_reference_coords(local));
                        (x - constraint.point).norm() <= tol
                    })
                    .map(|local| self.element_dofs[variable][element.id().0][local])
            });
            let dof = found.ok_or_else(|| {
                AmrError::InvalidConfiguration(format!(
                    "no site of variable {} at point {:?}",
                    self.variables[variable].name, constraint.point
                ))
            })?;
            self.constraints.insert(
                dof,
                DofConstraint {
                    masters: Vec::new(),
                    rhs: constraint.value,
                },
            );
        }
        Ok(())
    }

    /// Eliminates constrained dofs from an element matrix and vector.
    ///
    /// Masters that are not already present are appended to `dofs`, and the system is replaced by
    /// `C^T K C` and `C^T (F - K g)`, where `u_local = C u + g`. Constrained dofs keep a unit
    /// diagonal entry with the constraint right-hand side, so the global matrix stays regular.
    pub fn constrain_element_matrix_and_vector(
        &self,
        matrix: &mut DMatrix<f64>,
        vector: &mut DVector<f64>,
        dofs: &mut Vec<usize>,
    ) {
        assert_eq!(matrix.nrows(), dofs.len());
        assert_eq!(matrix.ncols(), dofs.len());
        assert_eq!(vector.len(), dofs.len());
        if !dofs.iter().any(|dof| self.is_constrained(*dof)) {
            return;
        }

        let n = dofs.len();
        let (c, g) = self.build_constraint_matrix(dofs);
        let kg = &*matrix * &g;
        let mut constrained_vector = c.transpose() * (&*vector - kg);
        let mut constrained_matrix = c.transpose() * &*matrix * &c;

        for i in 0..n {
            if let Some(constraint) = self.constraint(dofs[i]) {
                constrained_matrix[(i, i)] = 1.0;
                constrained_vector[i] = constraint.rhs;
            }
        }
        *matrix = constrained_matrix;
        *vector = constrained_vector;
    }

    /// Eliminates constrained dofs from a rectangular coupling block between two elements.
    ///
    /// Returns the right-hand side correction `-C_r^T K g_c` for the (extended) row dofs.
    /// Rows of constrained dofs are zeroed; their diagonal comes from the element's own block.
    pub fn constrain_coupling_matrix(
        &self,
        matrix: &mut DMatrix<f64>,
        row_dofs: &mut Vec<usize>,
        col_dofs: &mut Vec<usize>,
    ) -> DVector<f64> {
        assert_eq!(matrix.nrows(), row_dofs.len());
        assert_eq!(matrix.ncols(), col_dofs.len());
        let any_constrained = row_dofs.iter().chain(col_dofs.iter()).any(|dof| self.is_constrained(*dof));
        if !any_constrained {
            return DVector::zeros(row_dofs.len());
        }

        let (c_rows, _) = self.build_constraint_matrix(row_dofs);
        let (c_cols, g_cols) = self.build_constraint_matrix(col_dofs);
        let correction = -(c_rows.transpose() * (&*matrix * g_cols));
        *matrix = c_rows.transpose() * &*matrix * c_cols;
        correction
    }

    /// Builds `C` and `g` with `u_local = C u_extended + g`, extending `dofs` with masters.
    fn build_constraint_matrix(&self, dofs: &mut Vec<usize>) -> (DMatrix<f64>, DVector<f64>) {
        let n = dofs.len();
        let mut positions: FxHashMap<usize, usize> = dofs.iter().enumerate().map(|(i, &d)| (d, i)).collect();
        for i in 0..n {
            if let Some(constraint) = self.constraint(dofs[i]) {
                for &(master, _) in &constraint.masters {
                    if !positions.contains_key(&master) {
                        positions.insert(master, dofs.len());
                        dofs.push(master);
                    }
                }
            }
        }

        let mut c = DMatrix::zeros(n, dofs.len());
        let mut g = DVector::zeros(n);
        for i in 0..n {
            match self.constraint(dofs[i]) {
                Some(constraint) => {
                    for &(master, coefficient) in &constraint.masters {
                        c[(i, positions[&master])] += coefficient;
                    }
                    g[i] = constraint.rhs;
                }
                None => c[(i, i)] = 1.0,
            }
        }
        (c, g)
    }

    /// Overwrites every constrained entry of `x` with the value implied by its masters.
    pub fn enforce_constraints_exactly(&self, x: &mut DVector<f64>) {
        assert_eq!(x.len(), self.n_dofs());
        for (&dof, constraint) in &self.constraints {
            x[dof] = constraint
                .masters
                .iter()
                .map(|&(master, c)| c * x[master])
                .sum::<f64>()
                + constraint.rhs;
        }
    }

    /// Interpolates a function into the space of one variable.
    ///
    /// The closure receives the physical site and the derivative multi-index of each dof and must
    /// return the corresponding (derivative) value. Dofs of other variables are left untouched.
    pub fn interpolate(
        &self,
        mesh: &Mesh,
        variable: usize,
        f: impl Fn(&Point3<f64>, &[u8; 3]) -> f64,
        x: &mut DVector<f64>,
    ) {
        let basis = &self.bases[variable];
        for element in mesh.active_elements() {
            let element_box = mesh.element_box(element.id());
            let dofs = self.dof_indices(element.id(), variable);
            for (local, (function, &dof)) in izip!(basis.functions(), dofs).enumerate() {
                let site = element_box.to_physical(&basis.site_reference_coords(local));
                x[dof] = f(&site, &function.derivative);
            }
        }
    }
}

/// Substitutes constrained masters until every master is free.
fn resolve_constraint_chains(constraints: &mut BTreeMap<usize, DofConstraint>) -> Result<(), AmrError> {
    // Each substitution pass moves masters at least one level coarser
    for _ in 0..=2 * MAX_LEVEL as usize {
        let pending: Vec<usize> = constraints
            .iter()
            .filter(|(_, c)| c.masters.iter().any(|(m, _)| constraints.contains_key(m)))
            .map(|(&dof, _)| dof)
            .collect();
        if pending.is_empty() {
            return Ok(());
        }

        for dof in pending {
            let constraint = &constraints[&dof];
            let mut masters: BTreeMap<usize, f64> = BTreeMap::new();
            let mut rhs = constraint.rhs;
            for &(master, coefficient) in &constraint.masters {
                match constraints.get(&master) {
                    Some(inner) => {
                        for &(inner_master, inner_coefficient) in &inner.masters {
                            *masters.entry(inner_master).or_insert(0.0) += coefficient * inner_coefficient;
                        }
                        rhs += coefficient * inner.rhs;
                    }
                    None => *masters.entry(master).or_insert(0.0) += coefficient,
                }
            }
            let resolved = DofConstraint {
                masters: masters
                    .into_iter()
                    .filter(|(_, c)| c.abs() > CONSTRAINT_COEFFICIENT_TOLERANCE)
                    .collect(),
                rhs,
            };
            constraints.insert(dof, resolved);
        }
    }
    Err(AmrError::InvalidMesh(
        "constraint chains did not resolve, the constraints are cyclic".to_string(),
    ))
}

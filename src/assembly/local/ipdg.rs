use crate::assembly::local::{
    AssemblyContext, BoundaryCondition, BoundaryConditions, CouplingBlock, ElementAssembler, ElementContribution,
    ScalarFunction,
};
use crate::dof_map::DofMap;
use crate::fe::FeValues;
use crate::mesh::{ElementId, Mesh};
use crate::AmrError;
use nalgebra::{DMatrix, Point3};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Default interior penalty parameter `σ`.
pub const DEFAULT_IP_PENALTY: f64 = 10.0;

/// Which of two equally refined elements integrates their shared face.
///
/// When the levels differ, the finer element always integrates the face.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FaceOwnership {
    #[default]
    LowerId,
    HigherId,
}

impl FaceOwnership {
    /// Whether `element` integrates the face it shares with `neighbor`.
    pub fn owns_face(&self, mesh: &Mesh, element: ElementId, neighbor: ElementId) -> bool {
        let (e, n) = (mesh.element(element), mesh.element(neighbor));
        if n.level() < e.level() {
            true
        } else if n.level() == e.level() && n.is_active() {
            match self {
                Self::LowerId => element < neighbor,
                Self::HigherId => element > neighbor,
            }
        } else {
            false
        }
    }
}

/// Symmetric interior penalty discretization of `-Δu = f`.
///
/// Dirichlet data is imposed weakly with the same consistency and penalty terms as interior
/// faces. Each interior face is integrated by exactly one of its elements, which emits the
/// coupling blocks with the element across the face.
pub struct InteriorPenaltyAssembler {
    variable: usize,
    forcing: ScalarFunction,
    boundary_conditions: BoundaryConditions,
    penalty: f64,
    ownership: FaceOwnership,
    quadrature_order: Option<usize>,
}

pub struct InteriorPenaltyWorkspace {
    fe: FeValues,
    fe_face: FeValues,
    fe_neighbor: FeValues,
}

impl InteriorPenaltyAssembler {
    pub fn new(
        forcing: impl Fn(&Point3<f64>) -> f64 + Send + Sync + 'static,
        boundary_conditions: BoundaryConditions,
    ) -> Self {
        Self {
            variable: 0,
            forcing: Arc::new(forcing),
            boundary_conditions,
            penalty: DEFAULT_IP_PENALTY,
            ownership: FaceOwnership::default(),
            quadrature_order: None,
        }
    }

    pub fn with_variable(self, variable: usize) -> Self {
        Self { variable, ..self }
    }

    pub fn with_penalty(self, penalty: f64) -> Self {
        Self { penalty, ..self }
    }

    pub fn with_ownership(self, ownership: FaceOwnership) -> Self {
        Self { ownership, ..self }
    }

    pub fn with_quadrature_order(self, order: usize) -> Self {
        Self {
            quadrature_order: Some(order),
            ..self
        }
    }

    pub fn ownership(&self) -> FaceOwnership {
        self.ownership
    }
}

impl ElementAssembler for InteriorPenaltyAssembler {
    type Workspace = InteriorPenaltyWorkspace;

    fn new_workspace(&self, dof_map: &DofMap) -> Result<Self::Workspace, AmrError> {
        let fe_type = dof_map.variable(self.variable).fe_type();
        let dim = dof_map.dim();
        let order = self
            .quadrature_order
            .unwrap_or_else(|| fe_type.default_quadrature_order());
        Ok(InteriorPenaltyWorkspace {
            fe: FeValues::new(fe_type, dim, order)?,
            fe_face: FeValues::new_side(fe_type, dim, order)?,
            fe_neighbor: FeValues::new_side(fe_type, dim, order)?,
        })
    }

    fn assemble_element(
        &self,
        context: &AssemblyContext,
        workspace: &mut Self::Workspace,
        element: ElementId,
        output: &mut ElementContribution,
    ) -> Result<(), AmrError> {
        let mesh = context.mesh;
        let dof_map = context.dof_map;
        output.reset(dof_map.dof_indices(element, self.variable).to_vec());
        let n_dofs = output.dof_indices.len();

        let fe = &mut workspace.fe;
        fe.reinit(mesh, element)?;
        for qp in 0..fe.jxw().len() {
            let jxw = fe.jxw()[qp];
            let f = (self.forcing)(&fe.xyz()[qp]);
            for i in 0..n_dofs {
                for j in 0..n_dofs {
                    output.matrix[(i, j)] += jxw * fe.dphi()[i][qp].dot(&fe.dphi()[j][qp]);
                }
                output.vector[i] += jxw * f * fe.phi()[i][qp];
            }
        }

        let element_box = mesh.element_box(element);
        let order = f64::from(dof_map.variable(self.variable).fe_type().order.max(1));
        for side in 0..mesh.n_sides() {
            let h_elem = element_box.volume() / element_box.side_area(side) / (order * order);
            let sigma = self.penalty / h_elem;
            let fe_face = &mut workspace.fe_face;

            let Some(neighbor) = mesh.neighbor(element, side) else {
                let value = match self.boundary_conditions.for_side(mesh, element, side)? {
                    BoundaryCondition::Dirichlet { value, .. } => value,
                    BoundaryCondition::Neumann { flux } => {
                        fe_face.reinit_side(mesh, element, side)?;
                        for qp in 0..fe_face.jxw().len() {
                            let g = flux(&fe_face.xyz()[qp]);
                            for i in 0..n_dofs {
                                output.vector[i] += fe_face.jxw()[qp] * g * fe_face.phi()[i][qp];
                            }
                        }
                        continue;
                    }
                    BoundaryCondition::Natural | BoundaryCondition::Constrained => continue,
                };

                fe_face.reinit_side(mesh, element, side)?;
                let (jxw, xyz, phi, dphi, normals) =
                    (fe_face.jxw(), fe_face.xyz(), fe_face.phi(), fe_face.dphi(), fe_face.normals());
                for qp in 0..jxw.len() {
                    let g = value(&xyz[qp]);
                    for i in 0..n_dofs {
                        let dn_i = dphi[i][qp].dot(&normals[qp]);
                        for j in 0..n_dofs {
                            let dn_j = dphi[j][qp].dot(&normals[qp]);
                            output.matrix[(i, j)] += jxw[qp] * sigma * phi[i][qp] * phi[j][qp];
                            output.matrix[(i, j)] -= jxw[qp] * (phi[i][qp] * dn_j + phi[j][qp] * dn_i);
                        }
                        output.vector[i] += jxw[qp] * g * sigma * phi[i][qp];
                        output.vector[i] -= jxw[qp] * dn_i * g;
                    }
                }
                continue;
            };

            if !self.ownership.owns_face(mesh, element, neighbor) {
                continue;
            }

            fe_face.reinit_side(mesh, element, side)?;
            let fe_neighbor = &mut workspace.fe_neighbor;
            fe_neighbor.reinit_at_points(mesh, neighbor, fe_face.xyz())?;
            let neighbor_dofs = dof_map.dof_indices(neighbor, self.variable).to_vec();
            let n_neighbor = neighbor_dofs.len();

            let mut kee = DMatrix::zeros(n_dofs, n_dofs);
            let mut knn = DMatrix::zeros(n_neighbor, n_neighbor);
            let mut kne = DMatrix::zeros(n_neighbor, n_dofs);
            let mut ken = DMatrix::zeros(n_dofs, n_neighbor);

            let (jxw, phi, dphi, normals) = (fe_face.jxw(), fe_face.phi(), fe_face.dphi(), fe_face.normals());
            let (phi_n, dphi_n) = (fe_neighbor.phi(), fe_neighbor.dphi());
            for qp in 0..jxw.len() {
                let normal = &normals[qp];
                let w = jxw[qp];
                for i in 0..n_dofs {
                    for j in 0..n_dofs {
                        kee[(i, j)] -= 0.5
                            * w
                            * (phi[j][qp] * normal.dot(&dphi[i][qp]) + phi[i][qp] * normal.dot(&dphi[j][qp]));
                        kee[(i, j)] += w * sigma * phi[j][qp] * phi[i][qp];
                    }
                }
                for i in 0..n_neighbor {
                    for j in 0..n_neighbor {
                        knn[(i, j)] += 0.5
                            * w
                            * (phi_n[j][qp] * normal.dot(&dphi_n[i][qp]) + phi_n[i][qp] * normal.dot(&dphi_n[j][qp]));
                        knn[(i, j)] += w * sigma * phi_n[j][qp] * phi_n[i][qp];
                    }
                }
                for i in 0..n_neighbor {
                    for j in 0..n_dofs {
                        kne[(i, j)] += 0.5
                            * w
                            * (phi_n[i][qp] * normal.dot(&dphi[j][qp]) - phi[j][qp] * normal.dot(&dphi_n[i][qp]));
                        kne[(i, j)] -= w * sigma * phi[j][qp] * phi_n[i][qp];
                    }
                }
                for i in 0..n_dofs {
                    for j in 0..n_neighbor {
                        ken[(i, j)] += 0.5
                            * w
                            * (phi_n[j][qp] * normal.dot(&dphi[i][qp]) - phi[i][qp] * normal.dot(&dphi_n[j][qp]));
                        ken[(i, j)] -= w * sigma * phi[i][qp] * phi_n[j][qp];
                    }
                }
            }

            output.matrix += kee;
            let element_dofs = output.dof_indices.clone();
            output.couplings.push(CouplingBlock {
                row_dofs: neighbor_dofs.clone(),
                col_dofs: neighbor_dofs.clone(),
                matrix: knn,
            });
            output.couplings.push(CouplingBlock {
                row_dofs: neighbor_dofs.clone(),
                col_dofs: element_dofs.clone(),
                matrix: kne,
            });
            output.couplings.push(CouplingBlock {
                row_dofs: element_dofs,
                col_dofs: neighbor_dofs,
                matrix: ken,
            });
        }
        Ok(())
    }
}

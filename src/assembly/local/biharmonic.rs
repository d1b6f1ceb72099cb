use crate::assembly::local::{
    AssemblyContext, BoundaryCondition, BoundaryConditions, ElementAssembler, ElementContribution, ScalarFunction,
    DEFAULT_PENALTY,
};
use crate::dof_map::DofMap;
use crate::element::{Continuity, ShapeCapabilities};
use crate::fe::FeValues;
use crate::mesh::ElementId;
use crate::AmrError;
use nalgebra::Point3;
use std::sync::Arc;

/// Assembles `Δ²u = f` on C1 elements.
///
/// Dirichlet sides penalize both the boundary value and the normal flux, as a fourth order
/// problem needs both. `Neumann` sides penalize the normal flux only.
pub struct BiharmonicAssembler {
    variable: usize,
    forcing: ScalarFunction,
    boundary_conditions: BoundaryConditions,
    penalty: f64,
    quadrature_order: Option<usize>,
}

pub struct BiharmonicWorkspace {
    fe: FeValues,
    fe_face: FeValues,
    laplacians: Vec<f64>,
}

impl BiharmonicAssembler {
    pub fn new(
        forcing: impl Fn(&Point3<f64>) -> f64 + Send + Sync + 'static,
        boundary_conditions: BoundaryConditions,
    ) -> Self {
        Self {
            variable: 0,
            forcing: Arc::new(forcing),
            boundary_conditions,
            penalty: DEFAULT_PENALTY,
            quadrature_order: None,
        }
    }

    pub fn with_variable(self, variable: usize) -> Self {
        Self { variable, ..self }
    }

    pub fn with_penalty(self, penalty: f64) -> Self {
        Self { penalty, ..self }
    }

    pub fn with_quadrature_order(self, order: usize) -> Self {
        Self {
            quadrature_order: Some(order),
            ..self
        }
    }

    pub fn penalty(&self) -> f64 {
        self.penalty
    }
}

impl ElementAssembler for BiharmonicAssembler {
    type Workspace = BiharmonicWorkspace;

    fn new_workspace(&self, dof_map: &DofMap) -> Result<Self::Workspace, AmrError> {
        let fe_type = dof_map.variable(self.variable).fe_type();
        let dim = dof_map.dim();
        if fe_type.continuity() != Continuity::C1 || !fe_type.supports_second_derivatives() {
            return Err(AmrError::UnsupportedElementType {
                fe_type,
                dim,
                reason: "the biharmonic operator requires C1 elements with second derivatives",
            });
        }
        let order = self
            .quadrature_order
            .unwrap_or_else(|| fe_type.default_quadrature_order());
        Ok(BiharmonicWorkspace {
            fe: FeValues::new(fe_type, dim, order)?,
            fe_face: FeValues::new_side(fe_type, dim, order)?,
            laplacians: Vec::new(),
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
        let dim = mesh.dim();
        output.reset(context.dof_map.dof_indices(element, self.variable).to_vec());
        let n = output.dof_indices.len();

        let fe = &mut workspace.fe;
        fe.reinit(mesh, element)?;
        let (jxw, xyz, phi, d2phi) = (fe.jxw(), fe.xyz(), fe.phi(), fe.d2phi());
        let laplacians = &mut workspace.laplacians;
        for qp in 0..jxw.len() {
            laplacians.clear();
            laplacians.extend((0..n).map(|i| (0..dim).map(|a| d2phi[i][qp][(a, a)]).sum::<f64>()));
            let f = (self.forcing)(&xyz[qp]);
            for i in 0..n {
                for j in 0..n {
                    output.matrix[(i, j)] += jxw[qp] * laplacians[i] * laplacians[j];
                }
                output.vector[i] += jxw[qp] * f * phi[i][qp];
            }
        }

        for side in 0..mesh.n_sides() {
            if mesh.neighbor(element, side).is_some() {
                continue;
            }
            let condition = self.boundary_conditions.for_side(mesh, element, side)?;
            let (value_penalty, value, gradient, neumann_flux) = match condition {
                BoundaryCondition::Dirichlet { value, gradient } => (self.penalty, Some(value), gradient.as_ref(), None),
                BoundaryCondition::Neumann { flux } => (0.0, None, None, Some(flux)),
                BoundaryCondition::Natural | BoundaryCondition::Constrained => continue,
            };

            let fe_face = &mut workspace.fe_face;
            fe_face.reinit_side(mesh, element, side)?;
            let (jxw, xyz, phi, dphi, normals) =
                (fe_face.jxw(), fe_face.xyz(), fe_face.phi(), fe_face.dphi(), fe_face.normals());
            for qp in 0..jxw.len() {
                let g = value.map_or(0.0, |value| value(&xyz[qp]));
                let flux_value = match (gradient, neumann_flux) {
                    (Some(gradient), _) => gradient(&xyz[qp]).dot(&normals[qp]),
                    (None, Some(flux)) => flux(&xyz[qp]),
                    (None, None) => 0.0,
                };
                for i in 0..n {
                    let dn_i = dphi[i][qp].dot(&normals[qp]);
                    for j in 0..n {
                        let dn_j = dphi[j][qp].dot(&normals[qp]);
                        output.matrix[(i, j)] +=
                            jxw[qp] * (value_penalty * phi[i][qp] * phi[j][qp] + self.penalty * dn_i * dn_j);
                    }
                    output.vector[i] += jxw[qp] * (value_penalty * g * phi[i][qp] + self.penalty * flux_value * dn_i);
                }
            }
        }
        Ok(())
    }
}

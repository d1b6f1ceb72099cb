use crate::assembly::local::{
    AssemblyContext, BoundaryCondition, BoundaryConditions, ElementAssembler, ElementContribution, ScalarFunction,
    DEFAULT_PENALTY,
};
use crate::dof_map::DofMap;
use crate::element::ShapeCapabilities;
use crate::fe::FeValues;
use crate::mesh::ElementId;
use crate::AmrError;
use nalgebra::Point3;
use std::sync::Arc;

/// Assembles `-Δu = f` on continuous elements.
///
/// Dirichlet sides are imposed by an L2 penalty, Neumann sides contribute `∫ g φ`.
pub struct PoissonAssembler {
    variable: usize,
    forcing: ScalarFunction,
    boundary_conditions: BoundaryConditions,
    penalty: f64,
    quadrature_order: Option<usize>,
}

pub struct PoissonWorkspace {
    fe: FeValues,
    fe_face: FeValues,
}

impl PoissonAssembler {
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
}

impl ElementAssembler for PoissonAssembler {
    type Workspace = PoissonWorkspace;

    fn new_workspace(&self, dof_map: &DofMap) -> Result<Self::Workspace, AmrError> {
        let fe_type = dof_map.variable(self.variable).fe_type();
        let dim = dof_map.dim();
        if !fe_type.is_continuous() {
            return Err(AmrError::UnsupportedElementType {
                fe_type,
                dim,
                reason: "the Poisson assembler requires continuous elements, use interior penalty for DG",
            });
        }
        let order = self
            .quadrature_order
            .unwrap_or_else(|| fe_type.default_quadrature_order());
        Ok(PoissonWorkspace {
            fe: FeValues::new(fe_type, dim, order)?,
            fe_face: FeValues::new_side(fe_type, dim, order)?,
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
        output.reset(context.dof_map.dof_indices(element, self.variable).to_vec());
        let n = output.dof_indices.len();

        let fe = &mut workspace.fe;
        fe.reinit(mesh, element)?;
        for qp in 0..fe.jxw().len() {
            let jxw = fe.jxw()[qp];
            let f = (self.forcing)(&fe.xyz()[qp]);
            for i in 0..n {
                let dphi_i = &fe.dphi()[i][qp];
                for j in 0..n {
                    output.matrix[(i, j)] += jxw * dphi_i.dot(&fe.dphi()[j][qp]);
                }
                output.vector[i] += jxw * f * fe.phi()[i][qp];
            }
        }

        for side in 0..mesh.n_sides() {
            if mesh.neighbor(element, side).is_some() {
                continue;
            }
            let condition = self.boundary_conditions.for_side(mesh, element, side)?;
            let fe_face = &mut workspace.fe_face;
            match condition {
                BoundaryCondition::Dirichlet { value, .. } => {
                    fe_face.reinit_side(mesh, element, side)?;
                    for qp in 0..fe_face.jxw().len() {
                        let jxw = fe_face.jxw()[qp];
                        let g = value(&fe_face.xyz()[qp]);
                        let phi = fe_face.phi();
                        for i in 0..n {
                            for j in 0..n {
                                output.matrix[(i, j)] += jxw * self.penalty * phi[i][qp] * phi[j][qp];
                            }
                            output.vector[i] += jxw * self.penalty * g * phi[i][qp];
                        }
                    }
                }
                BoundaryCondition::Neumann { flux } => {
                    fe_face.reinit_side(mesh, element, side)?;
                    for qp in 0..fe_face.jxw().len() {
                        let g = flux(&fe_face.xyz()[qp]);
                        for i in 0..n {
                            output.vector[i] += fe_face.jxw()[qp] * g * fe_face.phi()[i][qp];
                        }
                    }
                }
                BoundaryCondition::Natural | BoundaryCondition::Constrained => {}
            }
        }
        Ok(())
    }
}

use crate::assembly::local::{AssemblyContext, ElementAssembler, ElementContribution};
use crate::dof_map::DofMap;
use crate::element::ShapeCapabilities;
use crate::fe::FeValues;
use crate::mesh::ElementId;
use crate::AmrError;

/// The Laplace-Young capillary surface `-∇·(∇u / √(1 + |∇u|²)) + κu = 0` with the contact
/// flux `σ` on every boundary side.
///
/// The mean curvature coefficient is frozen at the current iterate, so each assembly yields the
/// system for the next iterate and [`EquationSystem::solve_nonlinear`] runs a fixed-point
/// iteration on it.
///
/// [`EquationSystem::solve_nonlinear`]: crate::system::EquationSystem::solve_nonlinear
pub struct LaplaceYoungAssembler {
    variable: usize,
    kappa: f64,
    sigma: f64,
    quadrature_order: Option<usize>,
}

pub struct LaplaceYoungWorkspace {
    fe: FeValues,
    fe_face: FeValues,
}

impl Default for LaplaceYoungAssembler {
    fn default() -> Self {
        Self::new(1.0, 0.2)
    }
}

impl LaplaceYoungAssembler {
    pub fn new(kappa: f64, sigma: f64) -> Self {
        Self {
            variable: 0,
            kappa,
            sigma,
            quadrature_order: None,
        }
    }

    pub fn with_variable(self, variable: usize) -> Self {
        Self { variable, ..self }
    }

    pub fn with_quadrature_order(self, order: usize) -> Self {
        Self {
            quadrature_order: Some(order),
            ..self
        }
    }

    pub fn kappa(&self) -> f64 {
        self.kappa
    }

    pub fn sigma(&self) -> f64 {
        self.sigma
    }
}

impl ElementAssembler for LaplaceYoungAssembler {
    type Workspace = LaplaceYoungWorkspace;

    fn new_workspace(&self, dof_map: &DofMap) -> Result<Self::Workspace, AmrError> {
        let fe_type = dof_map.variable(self.variable).fe_type();
        let dim = dof_map.dim();
        if !fe_type.is_continuous() {
            return Err(AmrError::UnsupportedElementType {
                fe_type,
                dim,
                reason: "the Laplace-Young assembler requires continuous elements",
            });
        }
        let order = self
            .quadrature_order
            .unwrap_or_else(|| fe_type.default_quadrature_order());
        Ok(LaplaceYoungWorkspace {
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
        let coefficients = context
            .dof_map
            .local_solution(element, self.variable, context.solution);

        let fe = &mut workspace.fe;
        fe.reinit(mesh, element)?;
        let grad_u = fe.interpolate_gradient(&coefficients);
        let (jxw, phi, dphi) = (fe.jxw(), fe.phi(), fe.dphi());
        for qp in 0..jxw.len() {
            let w = jxw[qp];
            let curvature = 1.0 / (1.0 + grad_u[qp].norm_squared()).sqrt();
            for i in 0..n {
                for j in 0..n {
                    output.matrix[(i, j)] +=
                        w * (curvature * dphi[i][qp].dot(&dphi[j][qp]) + self.kappa * phi[i][qp] * phi[j][qp]);
                }
            }
        }

        for side in 0..mesh.n_sides() {
            if mesh.neighbor(element, side).is_some() {
                continue;
            }
            let fe_face = &mut workspace.fe_face;
            fe_face.reinit_side(mesh, element, side)?;
            for qp in 0..fe_face.jxw().len() {
                for i in 0..n {
                    output.vector[i] += fe_face.jxw()[qp] * self.sigma * fe_face.phi()[i][qp];
                }
            }
        }
        Ok(())
    }
}

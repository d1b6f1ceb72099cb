use crate::assembly::local::{
    AssemblyContext, BoundaryCondition, BoundaryConditions, ElementAssembler, ElementContribution, DEFAULT_PENALTY,
};
use crate::dof_map::DofMap;
use crate::element::{FeFamily, ShapeCapabilities};
use crate::fe::FeValues;
use crate::mesh::ElementId;
use crate::AmrError;
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};

/// Time discretization of the momentum equations.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeScheme {
    Steady,
    BackwardEuler { dt: f64 },
}

/// Incompressible Navier-Stokes in two dimensions with unit viscosity.
///
/// Velocity components and pressure are separate variables, typically a Taylor-Hood pair of
/// quadratic velocities and linear pressure. The convection term is linearized by Newton's method
/// around the current iterate, so each assembly yields the system for the next iterate rather
/// than for an update. Velocity boundary values are imposed by a nodal penalty on all sites of
/// a boundary side. The pressure is only determined up to a constant unless pinned, e.g. by a
/// [`PointConstraint`](crate::dof_map::PointConstraint).
pub struct NavierStokesAssembler {
    velocity: [usize; 2],
    pressure: usize,
    velocity_conditions: [BoundaryConditions; 2],
    time_scheme: TimeScheme,
    penalty: f64,
    quadrature_order: Option<usize>,
}

pub struct NavierStokesWorkspace {
    fe_velocity: FeValues,
    fe_pressure: FeValues,
    fe_face: FeValues,
}

impl NavierStokesAssembler {
    pub fn new(u: usize, v: usize, p: usize, u_conditions: BoundaryConditions, v_conditions: BoundaryConditions) -> Self {
        Self {
            velocity: [u, v],
            pressure: p,
            velocity_conditions: [u_conditions, v_conditions],
            time_scheme: TimeScheme::Steady,
            penalty: DEFAULT_PENALTY,
            quadrature_order: None,
        }
    }

    /// The lid-driven cavity on a mesh from [`build_square`](crate::mesh::procedural::build_square):
    /// `u = 1` on the top boundary (id 2) and no-slip everywhere else.
    pub fn lid_driven_cavity(u: usize, v: usize, p: usize) -> Self {
        let no_slip = BoundaryCondition::dirichlet(|_| 0.0);
        let u_conditions = BoundaryConditions::uniform([0, 1, 3], no_slip.clone()).with(2, BoundaryCondition::dirichlet(|_| 1.0));
        let v_conditions = BoundaryConditions::uniform([0, 1, 2, 3], no_slip);
        Self::new(u, v, p, u_conditions, v_conditions)
    }

    pub fn with_time_scheme(self, time_scheme: TimeScheme) -> Self {
        Self { time_scheme, ..self }
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

    pub fn time_scheme(&self) -> TimeScheme {
        self.time_scheme
    }
}

impl ElementAssembler for NavierStokesAssembler {
    type Workspace = NavierStokesWorkspace;

    fn new_workspace(&self, dof_map: &DofMap) -> Result<Self::Workspace, AmrError> {
        let dim = dof_map.dim();
        let velocity_type = dof_map.variable(self.velocity[0]).fe_type();
        let pressure_type = dof_map.variable(self.pressure).fe_type();
        if dim != 2 {
            return Err(AmrError::UnsupportedElementType {
                fe_type: velocity_type,
                dim,
                reason: "the Navier-Stokes assembler is two-dimensional",
            });
        }
        if dof_map.variable(self.velocity[1]).fe_type() != velocity_type
            || velocity_type.family != FeFamily::Lagrange
            || !pressure_type.is_continuous()
        {
            return Err(AmrError::UnsupportedElementType {
                fe_type: velocity_type,
                dim,
                reason: "velocity components must share a continuous Lagrange type and pressure must be continuous",
            });
        }
        let order = self
            .quadrature_order
            .unwrap_or_else(|| velocity_type.default_quadrature_order());
        Ok(NavierStokesWorkspace {
            fe_velocity: FeValues::new(velocity_type, dim, order)?,
            fe_pressure: FeValues::new(pressure_type, dim, order)?,
            fe_face: FeValues::new_side(velocity_type, dim, order)?,
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
        let [u_var, v_var] = self.velocity;
        let u_dofs = dof_map.dof_indices(element, u_var);
        let v_dofs = dof_map.dof_indices(element, v_var);
        let p_dofs = dof_map.dof_indices(element, self.pressure);
        let (n_u, n_p) = (u_dofs.len(), p_dofs.len());
        output.reset(u_dofs.iter().chain(v_dofs).chain(p_dofs).copied().collect());

        // Offsets of the u, v and p blocks
        let (ou, ov, op) = (0, n_u, 2 * n_u);
        let (mass, step) = match self.time_scheme {
            TimeScheme::Steady => (0.0, 1.0),
            TimeScheme::BackwardEuler { dt } => (1.0, dt),
        };

        let current = context.solution;
        let old = context.old_solution.unwrap_or(current);
        let u_coeffs = dof_map.local_solution(element, u_var, current);
        let v_coeffs = dof_map.local_solution(element, v_var, current);
        let u_old_coeffs = dof_map.local_solution(element, u_var, old);
        let v_old_coeffs = dof_map.local_solution(element, v_var, old);

        let fe = &mut workspace.fe_velocity;
        let fe_p = &mut workspace.fe_pressure;
        fe.reinit(mesh, element)?;
        fe_p.reinit(mesh, element)?;
        let u_values = fe.interpolate(&u_coeffs);
        let v_values = fe.interpolate(&v_coeffs);
        let grad_u = fe.interpolate_gradient(&u_coeffs);
        let grad_v = fe.interpolate_gradient(&v_coeffs);
        let u_old = fe.interpolate(&u_old_coeffs);
        let v_old = fe.interpolate(&v_old_coeffs);

        let (jxw, phi, dphi) = (fe.jxw(), fe.phi(), fe.dphi());
        let psi = fe_p.phi();
        let k = &mut output.matrix;
        let f = &mut output.vector;
        for qp in 0..jxw.len() {
            let w = jxw[qp];
            let velocity = Vector3::new(u_values[qp], v_values[qp], 0.0);
            let (u_x, u_y) = (grad_u[qp].x, grad_u[qp].y);
            let (v_x, v_y) = (grad_v[qp].x, grad_v[qp].y);
            let convection_u = velocity.dot(&grad_u[qp]);
            let convection_v = velocity.dot(&grad_v[qp]);

            for i in 0..n_u {
                f[ou + i] += w * (mass * u_old[qp] * phi[i][qp] + step * convection_u * phi[i][qp]);
                f[ov + i] += w * (mass * v_old[qp] * phi[i][qp] + step * convection_v * phi[i][qp]);

                for j in 0..n_u {
                    let mass_ij = mass * phi[i][qp] * phi[j][qp];
                    let diffusion = step * dphi[i][qp].dot(&dphi[j][qp]);
                    let convection = step * velocity.dot(&dphi[j][qp]) * phi[i][qp];
                    let newton = step * phi[i][qp] * phi[j][qp];
                    k[(ou + i, ou + j)] += w * (mass_ij + diffusion + convection + newton * u_x);
                    k[(ou + i, ov + j)] += w * newton * u_y;
                    k[(ov + i, ov + j)] += w * (mass_ij + diffusion + convection + newton * v_y);
                    k[(ov + i, ou + j)] += w * newton * v_x;
                }

                for j in 0..n_p {
                    k[(ou + i, op + j)] -= w * step * psi[j][qp] * dphi[i][qp].x;
                    k[(ov + i, op + j)] -= w * step * psi[j][qp] * dphi[i][qp].y;
                }
            }

            for i in 0..n_p {
                for j in 0..n_u {
                    k[(op + i, ou + j)] += w * psi[i][qp] * dphi[j][qp].x;
                    k[(op + i, ov + j)] += w * psi[i][qp] * dphi[j][qp].y;
                }
            }
        }

        let basis = fe.basis();
        for side in 0..mesh.n_sides() {
            if mesh.neighbor(element, side).is_some() {
                continue;
            }
            for (component, offset) in [(0, ou), (1, ov)] {
                match self.velocity_conditions[component].for_side(mesh, element, side)? {
                    BoundaryCondition::Dirichlet { value, .. } => {
                        let element_box = mesh.element_box(element);
                        for local in basis.functions_on_side(side) {
                            let site = element_box.to_physical(&basis.site_reference_coords(local));
                            k[(offset + local, offset + local)] += self.penalty;
                            f[offset + local] += self.penalty * value(&site);
                        }
                    }
                    BoundaryCondition::Neumann { flux } => {
                        let fe_face = &mut workspace.fe_face;
                        fe_face.reinit_side(mesh, element, side)?;
                        for qp in 0..fe_face.jxw().len() {
                            let traction = flux(&fe_face.xyz()[qp]);
                            for i in 0..n_u {
                                f[offset + i] += fe_face.jxw()[qp] * step * traction * fe_face.phi()[i][qp];
                            }
                        }
                    }
                    BoundaryCondition::Natural | BoundaryCondition::Constrained => {}
                }
            }
        }
        Ok(())
    }
}

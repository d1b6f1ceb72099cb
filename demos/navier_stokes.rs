//! Transient lid-driven cavity flow with Taylor-Hood Q2/Q1 elements and Newton iterations
//! in every backward Euler step.
use amrfem::assembly::{NavierStokesAssembler, TimeScheme};
use amrfem::dof_map::{DofMap, PointConstraint};
use amrfem::element::FeType;
use amrfem::mesh::procedural::build_square;
use amrfem::sparse::DenseLuSolver;
use amrfem::system::{EquationSystem, NonlinearSettings};
use eyre::eyre;
use nalgebra::Point3;

const N_CELLS: usize = 8;
const N_TIMESTEPS: usize = 15;
const DT: f64 = 0.005;

fn main() -> eyre::Result<()> {
    let mesh = build_square(N_CELLS, N_CELLS, 0.0, 1.0, 0.0, 1.0)?;

    let mut dof_map = DofMap::new(2);
    let u = dof_map.add_variable("u", FeType::lagrange(2))?;
    let v = dof_map.add_variable("v", FeType::lagrange(2))?;
    let p = dof_map.add_variable("p", FeType::lagrange(1))?;
    // The pressure is only determined up to a constant
    dof_map.add_point_constraint(PointConstraint {
        variable: p,
        point: Point3::origin(),
        value: 0.0,
    });
    let mut system = EquationSystem::new("navier-stokes", dof_map);
    system.init(&mesh)?;
    println!("Taylor-Hood system with {} dofs on {} elements", system.n_dofs(), mesh.n_active_elements());

    let assembler =
        NavierStokesAssembler::lid_driven_cavity(u, v, p).with_time_scheme(TimeScheme::BackwardEuler { dt: DT });
    let settings = NonlinearSettings::default();
    let center = Point3::new(0.5, 0.5, 0.0);

    for step in 1..=N_TIMESTEPS {
        system.advance_time_step(DT);
        let report = system.solve_nonlinear(&mesh, &assembler, &mut DenseLuSolver, &settings)?;
        if !report.converged {
            return Err(eyre!("Newton iterations did not converge in time step {step}: {report:?}"));
        }
        let velocity = [u, v].map(|variable| system.point_value(&mesh, variable, &center).unwrap_or(f64::NAN));
        println!(
            "step {:2}, t = {:.3}: {} Newton iterations, |Δ| = {:.2e}, velocity at center ({:.4}, {:.4})",
            step,
            system.time(),
            report.iterations,
            report.final_delta_norm,
            velocity[0],
            velocity[1]
        );
    }
    Ok(())
}

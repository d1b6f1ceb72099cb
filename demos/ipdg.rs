//! Symmetric interior penalty solution of the Laplace equation on the L-shaped domain.
//!
//! The exact solution `u = r^(2/3) sin(2θ/3)` has a singular gradient at the reentrant corner,
//! so value-jump driven refinement concentrates elements around the origin.
use amrfem::adaptivity::AdaptiveLoop;
use amrfem::assembly::{BoundaryCondition, BoundaryConditions, InteriorPenaltyAssembler};
use amrfem::config::{AmrConfig, LinearSolverKind};
use amrfem::dof_map::DofMap;
use amrfem::element::FeType;
use amrfem::error_estimation::{ExactSolution, JumpErrorEstimator, JumpKind};
use amrfem::mesh::procedural::build_l_shape;
use amrfem::system::EquationSystem;
use nalgebra::Point3;
use std::f64::consts::PI;

fn singular_solution(p: &Point3<f64>) -> f64 {
    let r = p.coords.xy().norm();
    let mut theta = p.y.atan2(p.x);
    if theta < 0.0 {
        theta += 2.0 * PI;
    }
    r.powf(2.0 / 3.0) * (2.0 * theta / 3.0).sin()
}

fn main() -> eyre::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => AmrConfig::from_json_file(&path)?,
        None => AmrConfig {
            fe_type: FeType::discontinuous(1),
            initial_cells: 2,
            max_r_steps: 8,
            refine_fraction: 0.3,
            coarsen_fraction: 0.0,
            linear_solver: LinearSolverKind::Cholesky,
            ..AmrConfig::default()
        },
    };

    let mut mesh = build_l_shape(config.initial_cells)?;
    let mut dof_map = DofMap::new(2);
    dof_map.add_variable("u", config.fe_type)?;
    let mut system = EquationSystem::new("ipdg", dof_map);

    let conditions = BoundaryConditions::uniform([0, 1, 2, 3], BoundaryCondition::dirichlet(singular_solution));
    let assembler = InteriorPenaltyAssembler::new(|_| 0.0, conditions);
    let exact = ExactSolution::new(singular_solution);

    let report = AdaptiveLoop::new(config)?.run(
        &mut mesh,
        &mut system,
        &assembler,
        &JumpErrorEstimator::new(JumpKind::Value),
        |view| {
            let l2_error = exact.l2_error(view.mesh, view.system, 0)?;
            let estimate = view.error.map(|error| error.l2_norm());
            println!(
                "step {:2}: {:6} elements, {:7} dofs, max level {:2}, L2 error {:.3e}, jump estimate {}",
                view.step,
                view.mesh.n_active_elements(),
                view.system.n_dofs(),
                view.mesh.max_level(),
                l2_error,
                estimate.map_or_else(|| "-".to_string(), |e| format!("{e:.3e}"))
            );
            Ok(())
        },
    )?;

    println!(
        "Finished after {} steps, {} linear iterations in the last solve",
        report.steps.len(),
        report.steps.last().map_or(0, |step| step.linear_report.iterations)
    );
    Ok(())
}

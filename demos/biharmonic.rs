//! Adaptive solve of the clamped plate problem `Δ²u = f` on the unit square.
//!
//! Run with an optional JSON configuration file:
//!
//! ```text
//! cargo run --release --example biharmonic -- biharmonic.json
//! ```
use amrfem::adaptivity::AdaptiveLoop;
use amrfem::assembly::{BiharmonicAssembler, BoundaryCondition, BoundaryConditions};
use amrfem::config::AmrConfig;
use amrfem::dof_map::DofMap;
use amrfem::error_estimation::{ExactSolution, JumpErrorEstimator};
use amrfem::mesh::procedural::build_square;
use amrfem::system::EquationSystem;
use eyre::eyre;
use nalgebra::{Point3, Vector3};

fn x(t: f64) -> f64 {
    (t - t * t).powi(2)
}

fn dx(t: f64) -> f64 {
    2.0 * (t - t * t) * (1.0 - 2.0 * t)
}

fn d2x(t: f64) -> f64 {
    2.0 - 12.0 * t + 12.0 * t * t
}

fn main() -> eyre::Result<()> {
    let config = match std::env::args().nth(1) {
        Some(path) => AmrConfig::from_json_file(&path)?,
        None => AmrConfig::default(),
    };
    if config.dimension != 2 {
        return Err(eyre!("the plate demo is two-dimensional, got dimension {}", config.dimension));
    }
    println!("{}", config.to_json_string()?);

    let n = config.initial_cells;
    let mut mesh = build_square(n, n, 0.0, 1.0, 0.0, 1.0)?;
    let mut dof_map = DofMap::new(2);
    dof_map.add_variable("u", config.fe_type)?;
    let mut system = EquationSystem::new("biharmonic", dof_map);

    let clamped = BoundaryConditions::uniform(
        [0, 1, 2, 3],
        BoundaryCondition::dirichlet_with_gradient(|_| 0.0, |_| Vector3::zeros()),
    );
    let forcing = |p: &Point3<f64>| 256.0 * (24.0 * x(p.y) + 2.0 * d2x(p.x) * d2x(p.y) + 24.0 * x(p.x));
    let assembler = BiharmonicAssembler::new(forcing, clamped).with_penalty(config.penalty);
    let exact = ExactSolution::new(|p| 256.0 * x(p.x) * x(p.y))
        .with_gradient(|p| 256.0 * Vector3::new(dx(p.x) * x(p.y), x(p.x) * dx(p.y), 0.0));

    let report = AdaptiveLoop::new(config)?.run(
        &mut mesh,
        &mut system,
        &assembler,
        &JumpErrorEstimator::laplacian(),
        |view| {
            let norms = exact.compute_error(view.mesh, view.system, 0)?;
            println!(
                "step {:2}: {:6} elements, {:7} dofs, L2 error {:.3e}, H1 error {:.3e}",
                view.step,
                view.mesh.n_active_elements(),
                view.system.n_dofs(),
                norms.l2,
                norms.h1.unwrap_or(f64::NAN)
            );
            Ok(())
        },
    )?;

    if report.capped_count > 0 {
        println!("{} refinement requests were dropped at the maximum level", report.capped_count);
    }
    Ok(())
}

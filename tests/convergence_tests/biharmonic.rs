//! Clamped plate problems `Δ²u = f` on the unit square with cubic Hermite elements.
//!
//! The manufactured solution is `u = 256 X(x) X(y)` with `X(t) = (t - t²)²`, which vanishes
//! together with its normal derivative on the boundary.
use amrfem::adaptivity::AdaptiveLoop;
use amrfem::assembly::{BiharmonicAssembler, BoundaryCondition, BoundaryConditions};
use amrfem::config::{AmrConfig, LinearSolverKind};
use amrfem::dof_map::DofMap;
use amrfem::element::FeType;
use amrfem::error_estimation::{ExactSolution, JumpErrorEstimator};
use amrfem::mesh::procedural::build_square;
use amrfem::system::EquationSystem;
use amrfem::sparse::SparseCholeskySolver;
use nalgebra::{Point3, Vector3};
use util::assert_decreasing_by_factor;

fn x(t: f64) -> f64 {
    (t - t * t).powi(2)
}

fn dx(t: f64) -> f64 {
    2.0 * (t - t * t) * (1.0 - 2.0 * t)
}

fn d2x(t: f64) -> f64 {
    2.0 - 12.0 * t + 12.0 * t * t
}

fn u_exact(p: &Point3<f64>) -> f64 {
    256.0 * x(p.x) * x(p.y)
}

fn u_exact_gradient(p: &Point3<f64>) -> Vector3<f64> {
    256.0 * Vector3::new(dx(p.x) * x(p.y), x(p.x) * dx(p.y), 0.0)
}

fn f(p: &Point3<f64>) -> f64 {
    // Δ²u = 256 (X'''' Y + 2 X'' Y'' + X Y''''), with X'''' = 24
    256.0 * (24.0 * x(p.y) + 2.0 * d2x(p.x) * d2x(p.y) + 24.0 * x(p.x))
}

fn clamped() -> BoundaryConditions {
    BoundaryConditions::uniform(
        [0, 1, 2, 3],
        BoundaryCondition::dirichlet_with_gradient(|_| 0.0, |_| Vector3::zeros()),
    )
}

fn hermite_system() -> eyre::Result<EquationSystem> {
    let mut dof_map = DofMap::new(2);
    dof_map.add_variable("u", FeType::hermite())?;
    Ok(EquationSystem::new("biharmonic", dof_map))
}

#[test]
fn clamped_plate_converges_under_uniform_refinement() -> eyre::Result<()> {
    let config = AmrConfig {
        fe_type: FeType::hermite(),
        uniform_refine: true,
        max_r_steps: 4,
        linear_solver: LinearSolverKind::Cholesky,
        ..AmrConfig::default()
    };
    let mut mesh = build_square(2, 2, 0.0, 1.0, 0.0, 1.0)?;
    let mut system = hermite_system()?;
    let assembler = BiharmonicAssembler::new(f, clamped());
    let exact = ExactSolution::new(u_exact).with_gradient(u_exact_gradient);

    let mut errors = Vec::new();
    let report = AdaptiveLoop::new(config)?.run(
        &mut mesh,
        &mut system,
        &assembler,
        &JumpErrorEstimator::laplacian(),
        |view| {
            errors.push(exact.l2_error(view.mesh, view.system, 0)?);
            Ok(())
        },
    )?;

    let n_dofs: Vec<_> = report.steps.iter().map(|step| step.n_dofs).collect();
    assert_eq!(n_dofs, [36, 100, 324, 1156]);
    assert_decreasing_by_factor!(errors, factor = 8.0);
    let documented = [0.0335, 0.00207, 0.000129, 8.08e-6];
    for (step, (&error, &expected)) in errors.iter().zip(&documented).enumerate() {
        assert!(
            ((error - expected) / expected).abs() < 0.03,
            "step {step}: L2 error {error:e}, expected {expected:e}"
        );
    }
    Ok(())
}

#[test]
fn cubic_solutions_are_reproduced() -> eyre::Result<()> {
    // x² y is biharmonic and lies in the bicubic space
    let value = |p: &Point3<f64>| p.x * p.x * p.y;
    let gradient = |p: &Point3<f64>| Vector3::new(2.0 * p.x * p.y, p.x * p.x, 0.0);
    let conditions =
        BoundaryConditions::uniform([0, 1, 2, 3], BoundaryCondition::dirichlet_with_gradient(value, gradient));

    let mesh = build_square(3, 3, 0.0, 1.0, 0.0, 1.0)?;
    let mut system = hermite_system()?;
    system.init(&mesh)?;
    system.solve(&mesh, &BiharmonicAssembler::new(|_| 0.0, conditions), &mut SparseCholeskySolver)?;

    let norms = ExactSolution::new(value)
        .with_gradient(gradient)
        .compute_error(&mesh, &system, 0)?;
    assert!(norms.l2 < 1e-6, "L2 error {:e}", norms.l2);
    assert!(norms.h1.unwrap() < 1e-5);
    Ok(())
}

#[test]
fn laplacian_estimator_drives_local_refinement() -> eyre::Result<()> {
    let config = AmrConfig {
        fe_type: FeType::hermite(),
        max_r_steps: 4,
        refine_fraction: 0.5,
        coarsen_fraction: 0.0,
        ..AmrConfig::default()
    };
    let mut mesh = build_square(2, 2, 0.0, 1.0, 0.0, 1.0)?;
    let mut system = hermite_system()?;
    let assembler = BiharmonicAssembler::new(f, clamped());
    let exact = ExactSolution::new(u_exact);

    let mut errors = Vec::new();
    let report = AdaptiveLoop::new(config)?.run(
        &mut mesh,
        &mut system,
        &assembler,
        &JumpErrorEstimator::laplacian(),
        |view| {
            errors.push(exact.l2_error(view.mesh, view.system, 0)?);
            Ok(())
        },
    )?;

    assert_eq!(report.steps.len(), 4);
    for pair in report.steps.windows(2) {
        assert!(pair[1].n_dofs > pair[0].n_dofs);
    }
    assert!(errors[3] < 0.5 * errors[0], "errors {:?}", errors);
    Ok(())
}

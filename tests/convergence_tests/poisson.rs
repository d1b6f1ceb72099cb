//! Poisson problems `-Δu = f` on continuous elements.
use amrfem::assembly::{BoundaryCondition, BoundaryConditions, PoissonAssembler};
use amrfem::dof_map::{DirichletBoundary, DofMap};
use amrfem::element::FeType;
use amrfem::error_estimation::ExactSolution;
use amrfem::mesh::procedural::build_square;
use amrfem::mesh::refinement::MeshRefinement;
use amrfem::mesh::{Mesh, RefinementFlag};
use amrfem::sparse::{PcgSolver, SparseCholeskySolver};
use amrfem::system::EquationSystem;
use nalgebra::{Point3, Vector3};
use std::f64::consts::PI;
use util::convergence_rates;

/// Refines the elements touching the origin twice, leaving hanging nodes.
fn corner_refined_square() -> eyre::Result<Mesh> {
    let mut mesh = build_square(2, 2, 0.0, 1.0, 0.0, 1.0)?;
    let mut refinement = MeshRefinement::new();
    for _ in 0..2 {
        let corner = mesh
            .locate_active_element(&Point3::new(0.1, 0.1, 0.0))
            .ok_or_else(|| eyre::eyre!("corner not covered"))?;
        mesh.set_refinement_flag(corner, RefinementFlag::Refine);
        refinement.refine_and_coarsen_elements(&mut mesh)?;
    }
    Ok(mesh)
}

#[test]
fn quadratic_solution_is_exact_on_non_conforming_meshes() -> eyre::Result<()> {
    let u_exact = |x: &Point3<f64>| x.x * x.x + x.y * x.y;
    let mesh = corner_refined_square()?;

    let mut dof_map = DofMap::new(2);
    dof_map.add_variable("u", FeType::lagrange(2))?;
    dof_map.add_dirichlet_boundary(DirichletBoundary::new(0, [0, 1, 2, 3], u_exact));
    let mut system = EquationSystem::new("poisson", dof_map);
    system.init(&mesh)?;
    assert!(system.dof_map().n_constrained_dofs() > 0);

    let conditions = BoundaryConditions::uniform([0, 1, 2, 3], BoundaryCondition::Constrained);
    let assembler = PoissonAssembler::new(|_| -4.0, conditions);
    system.solve(&mesh, &assembler, &mut SparseCholeskySolver)?;

    let error = ExactSolution::new(u_exact).l2_error(&mesh, &system, 0)?;
    assert!(error < 1e-10, "L2 error {:e}", error);
    Ok(())
}

#[test]
fn bilinear_elements_converge_at_second_order() -> eyre::Result<()> {
    let u_exact = |x: &Point3<f64>| (PI * x.x).sin() * (PI * x.y).sin();
    let gradient = |x: &Point3<f64>| {
        PI * Vector3::new(
            (PI * x.x).cos() * (PI * x.y).sin(),
            (PI * x.x).sin() * (PI * x.y).cos(),
            0.0,
        )
    };
    let exact = ExactSolution::new(u_exact).with_gradient(gradient);

    let resolutions = [4, 8, 16, 32];
    let mut l2_errors = Vec::new();
    let mut h1_errors = Vec::new();
    for &n in &resolutions {
        let mesh = build_square(n, n, 0.0, 1.0, 0.0, 1.0)?;
        let mut dof_map = DofMap::new(2);
        dof_map.add_variable("u", FeType::lagrange(1))?;
        dof_map.add_dirichlet_boundary(DirichletBoundary::homogeneous(0, [0, 1, 2, 3]));
        let mut system = EquationSystem::new("poisson", dof_map);
        system.init(&mesh)?;

        let conditions = BoundaryConditions::uniform([0, 1, 2, 3], BoundaryCondition::Constrained);
        let assembler = PoissonAssembler::new(move |x| 2.0 * PI * PI * u_exact(x), conditions);
        let report = system.solve(&mesh, &assembler, &mut PcgSolver)?;
        assert!(report.converged);

        let norms = exact.compute_error(&mesh, &system, 0)?;
        l2_errors.push(norms.l2);
        h1_errors.push(norms.h1.unwrap());
    }

    let h: Vec<f64> = resolutions.iter().map(|&n| 1.0 / n as f64).collect();
    let l2_rates = convergence_rates(&l2_errors, &h);
    let h1_rates = convergence_rates(&h1_errors, &h);
    assert!(l2_rates.iter().all(|&rate| rate > 1.8), "L2 rates {:?}", l2_rates);
    assert!(h1_rates.iter().all(|&rate| rate > 0.9), "H1 rates {:?}", h1_rates);
    Ok(())
}

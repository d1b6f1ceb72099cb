use crate::{corner_refined_square, refine_balanced, unit_square};
use amrfem::assembly::{BoundaryCondition, BoundaryConditions, PoissonAssembler};
use amrfem::dof_map::{DirichletBoundary, DofMap, PointConstraint};
use amrfem::element::FeType;
use amrfem::mesh::{ElementId, Mesh};
use amrfem::sparse::{PcgSolver, SolverSettings, SparseCholeskySolver};
use amrfem::system::{EquationSystem, NonlinearSettings};
use amrfem::AmrError;
use matrixcompare::assert_scalar_eq;
use nalgebra::{DVector, Point3};

fn affine(x: &Point3<f64>) -> f64 {
    1.0 + x.x + 2.0 * x.y
}

/// A Laplace problem whose solution is the affine function above.
fn affine_laplace_system(mesh: &Mesh, fe_type: FeType) -> (EquationSystem, PoissonAssembler) {
    let mut dof_map = DofMap::new(2);
    dof_map.add_variable("u", fe_type).unwrap();
    dof_map.add_dirichlet_boundary(DirichletBoundary::new(0, [0, 1, 2, 3], affine));
    let mut system = EquationSystem::new("laplace", dof_map);
    system.init(mesh).unwrap();
    let conditions = BoundaryConditions::uniform([0, 1, 2, 3], BoundaryCondition::Constrained);
    (system, PoissonAssembler::new(|_| 0.0, conditions))
}

#[test]
fn init_enforces_boundary_constraints() {
    let mesh = unit_square(4);
    let (system, _) = affine_laplace_system(&mesh, FeType::lagrange(1));
    assert_eq!(system.n_dofs(), 25);
    assert_eq!(system.solution().len(), 25);
    assert_eq!(system.dof_map().n_constrained_dofs(), 16);
    assert_eq!(system.time(), 0.0);
    assert!(system.last_linear_report().is_none());
    // Boundary values are set, interior values are zero
    assert_scalar_eq!(system.point_value(&mesh, 0, &Point3::new(0.0, 0.0, 0.0)).unwrap(), 1.0, comp = abs, tol = 1e-14);
    assert_eq!(system.point_value(&mesh, 0, &Point3::new(0.5, 0.5, 0.0)), Some(0.0));
}

#[test]
fn affine_solutions_are_reproduced_by_direct_and_iterative_solvers() {
    let mesh = unit_square(4);
    let (mut cholesky, assembler) = affine_laplace_system(&mesh, FeType::lagrange(1));
    let report = cholesky.solve(&mesh, &assembler, &mut SparseCholeskySolver).unwrap();
    assert!(report.converged);
    assert_eq!(cholesky.last_linear_report(), Some(&report));
    let value = cholesky.point_value(&mesh, 0, &Point3::new(0.3, 0.7, 0.0)).unwrap();
    assert_scalar_eq!(value, 2.7, comp = abs, tol = 1e-10);

    let (mut pcg, assembler) = affine_laplace_system(&mesh, FeType::lagrange(1));
    let report = pcg.solve(&mesh, &assembler, &mut PcgSolver).unwrap();
    assert!(report.converged);
    assert!(report.iterations > 0);
    assert!((cholesky.solution() - pcg.solution()).amax() <= 1e-8);
}

#[test]
fn hanging_nodes_do_not_spoil_affine_solutions() {
    let mesh = corner_refined_square();
    let (mut system, assembler) = affine_laplace_system(&mesh, FeType::lagrange(2));
    system.solve(&mesh, &assembler, &mut SparseCholeskySolver).unwrap();
    for x in [Point3::new(0.1, 0.1, 0.0), Point3::new(0.26, 0.6, 0.0), Point3::new(0.8, 0.3, 0.0)] {
        let value = system.point_value(&mesh, 0, &x).unwrap();
        assert_scalar_eq!(value, affine(&x), comp = abs, tol = 1e-10);
    }
    assert_eq!(system.point_value(&mesh, 0, &Point3::new(1.5, 0.5, 0.0)), None);
}

#[test]
fn solutions_of_the_wrong_length_are_rejected() {
    let mesh = unit_square(2);
    let (mut system, _) = affine_laplace_system(&mesh, FeType::lagrange(1));
    let result = system.set_solution(DVector::zeros(4));
    assert!(matches!(result, Err(AmrError::InvalidConfiguration(_))));
    assert!(system.set_solution(DVector::from_element(9, 2.0)).is_ok());
    assert_eq!(system.solution()[4], 2.0);
}

#[test]
fn time_steps_keep_the_previous_solution() {
    let mesh = unit_square(2);
    let (mut system, _) = affine_laplace_system(&mesh, FeType::lagrange(1));
    system.set_solution(DVector::from_element(9, 1.0)).unwrap();
    system.advance_time_step(0.25);
    system.set_solution(DVector::from_element(9, 3.0)).unwrap();
    system.advance_time_step(0.25);

    assert_eq!(system.time(), 0.5);
    assert_eq!(system.old_solution(), &DVector::from_element(9, 3.0));
}

#[test]
fn newton_iteration_on_a_linear_problem_converges_immediately() {
    let mesh = unit_square(4);
    let (mut system, assembler) = affine_laplace_system(&mesh, FeType::lagrange(2));
    system.set_linear_settings(SolverSettings {
        tolerance: 1e-12,
        max_iterations: 100,
    });
    let report = system
        .solve_nonlinear(&mesh, &assembler, &mut SparseCholeskySolver, &NonlinearSettings::default())
        .unwrap();

    assert!(report.converged);
    assert_eq!(report.iterations, 2);
    assert!(report.final_delta_norm < 1e-10);
    // The linear tolerance is only modified during the iteration
    assert_eq!(system.linear_settings().tolerance, 1e-12);
    assert_eq!(system.linear_settings().max_iterations, 100);
}

#[test]
fn newton_iteration_reports_non_convergence() {
    let mesh = unit_square(2);
    let (mut system, assembler) = affine_laplace_system(&mesh, FeType::lagrange(1));
    let settings = NonlinearSettings {
        max_iterations: 1,
        ..NonlinearSettings::default()
    };
    let report = system
        .solve_nonlinear(&mesh, &assembler, &mut SparseCholeskySolver, &settings)
        .unwrap();
    assert!(!report.converged);
    assert_eq!(report.iterations, 1);
}

#[test]
fn reinit_follows_the_refined_mesh() {
    let mut mesh = unit_square(2);
    let (mut system, assembler) = affine_laplace_system(&mesh, FeType::lagrange(1));
    system.solve(&mesh, &assembler, &mut SparseCholeskySolver).unwrap();

    let old_mesh = mesh.clone();
    refine_balanced(&mut mesh, &[ElementId(2)]);
    system.reinit(&old_mesh, &mesh).unwrap();
    assert_eq!(system.n_dofs(), 9 + 5);
    // The projected solution already solves the problem on the refined mesh
    let before = system.solution().clone();
    system.solve(&mesh, &assembler, &mut SparseCholeskySolver).unwrap();
    assert!((system.solution() - before).amax() <= 1e-10);
}

#[test]
fn failed_reinit_leaves_the_system_untouched() {
    // The pinned point is a vertex of the refined mesh only
    let mut mesh = unit_square(1);
    mesh.refine(&[ElementId(0)], 10).unwrap();
    let mut dof_map = DofMap::new(2);
    let u = dof_map.add_variable("u", FeType::lagrange(1)).unwrap();
    dof_map.add_point_constraint(PointConstraint {
        variable: u,
        point: Point3::new(0.5, 0.5, 0.0),
        value: 0.0,
    });
    let mut system = EquationSystem::new("pinned", dof_map);
    system.init(&mesh).unwrap();
    assert_eq!(system.n_dofs(), 9);
    let solution = DVector::from_fn(9, |i, _| i as f64);
    system.set_solution(solution.clone()).unwrap();

    let x = Point3::new(0.2, 0.1, 0.0);
    let before = system.point_value(&mesh, u, &x).unwrap();

    let old_mesh = mesh.clone();
    mesh.coarsen(&[ElementId(0)]).unwrap();
    let error = system.reinit(&old_mesh, &mesh).unwrap_err();
    assert!(matches!(error, AmrError::InvalidConfiguration(_)));

    assert_eq!(system.n_dofs(), 9);
    assert_eq!(system.dof_map().n_dofs(), 9);
    assert_eq!(system.solution(), &solution);
    assert_eq!(system.old_solution().len(), 9);
    let after = system.point_value(&old_mesh, u, &x).unwrap();
    assert_scalar_eq!(after, before, comp = abs, tol = 1e-12);
}

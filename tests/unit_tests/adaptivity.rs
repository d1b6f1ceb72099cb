use crate::unit_square;
use amrfem::adaptivity::AdaptiveLoop;
use amrfem::assembly::{BoundaryCondition, BoundaryConditions, PoissonAssembler};
use amrfem::config::{AmrConfig, LinearSolverKind};
use amrfem::dof_map::{DirichletBoundary, DofMap};
use amrfem::element::FeType;
use amrfem::error_estimation::JumpErrorEstimator;
use amrfem::system::EquationSystem;
use amrfem::AmrError;
use eyre::eyre;

fn poisson_config() -> AmrConfig {
    AmrConfig {
        fe_type: FeType::lagrange(1),
        max_r_steps: 3,
        refine_fraction: 0.3,
        coarsen_fraction: 0.0,
        linear_solver: LinearSolverKind::Cholesky,
        ..AmrConfig::default()
    }
}

/// `-Δu = 1` with homogeneous Dirichlet data imposed by constraints.
fn poisson_problem() -> (EquationSystem, PoissonAssembler) {
    let mut dof_map = DofMap::new(2);
    dof_map.add_variable("u", FeType::lagrange(1)).unwrap();
    dof_map.add_dirichlet_boundary(DirichletBoundary::homogeneous(0, [0, 1, 2, 3]));
    let conditions = BoundaryConditions::uniform([0, 1, 2, 3], BoundaryCondition::Constrained);
    (EquationSystem::new("poisson", dof_map), PoissonAssembler::new(|_| 1.0, conditions))
}

#[test]
fn invalid_configurations_are_rejected() {
    let config = AmrConfig {
        refine_fraction: 2.0,
        ..poisson_config()
    };
    let error = AdaptiveLoop::new(config).unwrap_err();
    assert!(matches!(
        error.downcast_ref::<AmrError>(),
        Some(AmrError::InvalidConfiguration(_))
    ));
}

#[test]
fn kelly_driven_refinement_adds_dofs_every_step() {
    let mut mesh = unit_square(4);
    let (mut system, assembler) = poisson_problem();
    let mut adaptive = AdaptiveLoop::new(poisson_config()).unwrap();

    let mut visited = Vec::new();
    let report = adaptive
        .run(&mut mesh, &mut system, &assembler, &JumpErrorEstimator::kelly(), |view| {
            assert_eq!(view.system.n_dofs(), view.system.solution().len());
            visited.push((view.step, view.error.is_some()));
            Ok(())
        })
        .unwrap();

    assert_eq!(visited, vec![(0, true), (1, true), (2, false)]);
    assert_eq!(report.steps.len(), 3);
    assert!(!report.reached_tolerance);
    assert_eq!(report.capped_count, 0);
    for pair in report.steps.windows(2) {
        assert!(pair[1].n_dofs > pair[0].n_dofs);
        assert!(pair[1].n_active_elements > pair[0].n_active_elements);
    }
    let last = report.steps.last().unwrap();
    assert_eq!(last.error_estimate, None);
    assert_eq!(last.refinement, None);
    assert_eq!(last.n_dofs, system.n_dofs());
    assert_eq!(last.n_active_elements, mesh.n_active_elements());
    for step in &report.steps[..2] {
        assert!(step.error_estimate.unwrap() > 0.0);
        assert!(step.refinement.unwrap().refined > 0);
        assert!(step.linear_report.converged);
    }
}

#[test]
fn loop_stops_once_the_estimate_is_below_the_tolerance() {
    let mut mesh = unit_square(4);
    let (mut system, assembler) = poisson_problem();
    let config = AmrConfig {
        error_tolerance: 1e6,
        ..poisson_config()
    };
    let report = AdaptiveLoop::new(config)
        .unwrap()
        .run(&mut mesh, &mut system, &assembler, &JumpErrorEstimator::kelly(), |_| Ok(()))
        .unwrap();

    assert!(report.reached_tolerance);
    assert_eq!(report.steps.len(), 1);
    assert!(report.steps[0].error_estimate.is_some());
    assert_eq!(mesh.n_active_elements(), 16);
}

#[test]
fn uniform_refinement_skips_estimation() {
    let mut mesh = unit_square(2);
    let (mut system, assembler) = poisson_problem();
    let config = AmrConfig {
        uniform_refine: true,
        ..poisson_config()
    };
    let mut estimated = 0;
    let report = AdaptiveLoop::new(config)
        .unwrap()
        .run(&mut mesh, &mut system, &assembler, &JumpErrorEstimator::kelly(), |view| {
            estimated += usize::from(view.error.is_some());
            Ok(())
        })
        .unwrap();

    let n_dofs: Vec<_> = report.steps.iter().map(|step| step.n_dofs).collect();
    assert_eq!(n_dofs, [9, 25, 81]);
    assert_eq!(estimated, 0);
    assert!(report.steps.iter().all(|step| step.error_estimate.is_none()));
    assert_eq!(report.steps[1].refinement.unwrap().refined, 16);
}

#[test]
fn refinement_beyond_the_maximum_level_is_counted() {
    let mut mesh = unit_square(2);
    let (mut system, assembler) = poisson_problem();
    let config = AmrConfig {
        uniform_refine: true,
        max_r_level: 1,
        ..poisson_config()
    };
    let report = AdaptiveLoop::new(config)
        .unwrap()
        .run(&mut mesh, &mut system, &assembler, &JumpErrorEstimator::kelly(), |_| Ok(()))
        .unwrap();

    let n_dofs: Vec<_> = report.steps.iter().map(|step| step.n_dofs).collect();
    assert_eq!(n_dofs, [9, 25, 25]);
    assert_eq!(report.capped_count, 16);
    assert_eq!(mesh.max_level(), 1);
}

#[test]
fn callback_errors_abort_the_loop() {
    let mut mesh = unit_square(2);
    let (mut system, assembler) = poisson_problem();
    let mut calls = 0;
    let result = AdaptiveLoop::new(poisson_config()).unwrap().run(
        &mut mesh,
        &mut system,
        &assembler,
        &JumpErrorEstimator::kelly(),
        |view| {
            calls += 1;
            if view.step == 1 {
                Err(eyre!("stopped by the caller"))
            } else {
                Ok(())
            }
        },
    );

    assert_eq!(calls, 2);
    assert_eq!(result.unwrap_err().to_string(), "stopped by the caller");
}

//! Steady lid-driven cavity flow with Taylor-Hood elements.
use amrfem::assembly::{NavierStokesAssembler, TimeScheme};
use amrfem::dof_map::{DofMap, PointConstraint};
use amrfem::element::FeType;
use amrfem::mesh::procedural::build_square;
use amrfem::mesh::Mesh;
use amrfem::sparse::DenseLuSolver;
use amrfem::system::{EquationSystem, NonlinearSettings};
use nalgebra::Point3;

fn cavity_system(mesh: &Mesh) -> eyre::Result<EquationSystem> {
    let mut dof_map = DofMap::new(2);
    dof_map.add_variable("u", FeType::lagrange(2))?;
    dof_map.add_variable("v", FeType::lagrange(2))?;
    let p = dof_map.add_variable("p", FeType::lagrange(1))?;
    dof_map.add_point_constraint(PointConstraint {
        variable: p,
        point: Point3::origin(),
        value: 0.0,
    });
    let mut system = EquationSystem::new("navier-stokes", dof_map);
    system.init(mesh)?;
    Ok(system)
}

#[test]
fn steady_cavity_develops_a_recirculating_vortex() -> eyre::Result<()> {
    let mesh = build_square(4, 4, 0.0, 1.0, 0.0, 1.0)?;
    let mut system = cavity_system(&mesh)?;
    let assembler = NavierStokesAssembler::lid_driven_cavity(0, 1, 2);

    let report = system.solve_nonlinear(&mesh, &assembler, &mut DenseLuSolver, &NonlinearSettings::default())?;
    assert!(report.converged, "{:?}", report);
    assert!(report.iterations <= 8);

    let u = |x: f64, y: f64| system.point_value(&mesh, 0, &Point3::new(x, y, 0.0));
    let below_lid = u(0.5, 0.999).unwrap();
    let center = u(0.5, 0.5).unwrap();
    assert!(below_lid > 0.9, "u just below the lid is {}", below_lid);
    assert!(center < 0.0, "u at the center is {}", center);

    // The pressure is pinned at the origin
    let pressure = system.point_value(&mesh, 2, &Point3::origin()).unwrap();
    assert!(pressure.abs() < 1e-6);
    Ok(())
}

#[test]
fn backward_euler_steps_approach_the_steady_state() -> eyre::Result<()> {
    let mesh = build_square(4, 4, 0.0, 1.0, 0.0, 1.0)?;
    let settings = NonlinearSettings {
        tolerance: 1e-9,
        ..NonlinearSettings::default()
    };
    let mut steady = cavity_system(&mesh)?;
    steady.solve_nonlinear(
        &mesh,
        &NavierStokesAssembler::lid_driven_cavity(0, 1, 2),
        &mut DenseLuSolver,
        &settings,
    )?;

    let mut transient = cavity_system(&mesh)?;
    let dt = 0.5;
    let assembler = NavierStokesAssembler::lid_driven_cavity(0, 1, 2).with_time_scheme(TimeScheme::BackwardEuler { dt });
    let samples = [
        Point3::new(0.5, 0.5, 0.0),
        Point3::new(0.3, 0.8, 0.0),
        Point3::new(0.7, 0.2, 0.0),
    ];
    let velocity_distance = |system: &EquationSystem| -> f64 {
        samples
            .iter()
            .flat_map(|x| [0, 1].map(|variable| (x, variable)))
            .filter_map(|(x, variable)| {
                Some((system.point_value(&mesh, variable, x)? - steady.point_value(&mesh, variable, x)?).abs())
            })
            .fold(0.0, f64::max)
    };

    let mut distances = Vec::new();
    for _ in 0..4 {
        transient.advance_time_step(dt);
        let report = transient.solve_nonlinear(&mesh, &assembler, &mut DenseLuSolver, &settings)?;
        assert!(report.converged);
        distances.push(velocity_distance(&transient));
    }

    assert_eq!(transient.time(), 2.0);
    assert!(distances.windows(2).all(|pair| pair[1] < pair[0]), "distances {:?}", distances);
    assert!(distances[3] < 1e-3, "distances {:?}", distances);
    Ok(())
}

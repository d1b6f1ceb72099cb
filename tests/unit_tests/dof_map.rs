use crate::{corner_refined_square, unit_square};
use amrfem::dof_map::{DirichletBoundary, DofKey, DofMap, PointConstraint};
use amrfem::element::FeType;
use amrfem::mesh::procedural::{build_cube, build_square};
use amrfem::mesh::{cell_size, ElementId, Mesh, MAX_LEVEL};
use amrfem::proptest::locally_refined_square_mesh;
use amrfem::AmrError;
use matrixcompare::assert_scalar_eq;
use nalgebra::{DMatrix, DVector, Point3};
use proptest::prelude::*;

fn single_variable_dof_map(mesh: &Mesh, fe_type: FeType) -> DofMap {
    let mut dof_map = DofMap::new(mesh.dim());
    dof_map.add_variable("u", fe_type).unwrap();
    dof_map.distribute_dofs(mesh).unwrap();
    dof_map
}

/// Interpolates `x^2 y + 3 x y^2 - y`, which lies in the Q2 and bicubic Hermite spaces.
fn interpolate_polynomial(mesh: &Mesh, dof_map: &DofMap) -> DVector<f64> {
    let mut x = DVector::zeros(dof_map.n_dofs());
    dof_map.interpolate(
        mesh,
        0,
        |p, alpha| {
            let (x, y) = (p.x, p.y);
            match (alpha[0], alpha[1]) {
                (0, 0) => x * x * y + 3.0 * x * y * y - y,
                (1, 0) => 2.0 * x * y + 3.0 * y * y,
                (0, 1) => x * x + 6.0 * x * y - 1.0,
                (1, 1) => 2.0 * x + 6.0 * y,
                _ => unreachable!(),
            }
        },
        &mut x,
    );
    x
}

#[test]
fn dof_counts_on_uniform_meshes() {
    let mesh = unit_square(2);
    assert_eq!(single_variable_dof_map(&mesh, FeType::lagrange(1)).n_dofs(), 9);
    assert_eq!(single_variable_dof_map(&mesh, FeType::lagrange(2)).n_dofs(), 25);
    assert_eq!(single_variable_dof_map(&mesh, FeType::hermite()).n_dofs(), 36);
    assert_eq!(single_variable_dof_map(&mesh, FeType::discontinuous(1)).n_dofs(), 16);
    assert_eq!(single_variable_dof_map(&mesh, FeType::discontinuous(0)).n_dofs(), 4);

    let cube = build_cube([2, 1, 1], [0.0; 3], [1.0; 3]).unwrap();
    assert_eq!(single_variable_dof_map(&cube, FeType::lagrange(1)).n_dofs(), 12);
    assert_eq!(single_variable_dof_map(&cube, FeType::hermite()).n_dofs(), 96);
}

#[test]
fn multiple_variables_are_numbered_element_by_element() {
    let mesh = unit_square(2);
    let mut dof_map = DofMap::new(2);
    let u = dof_map.add_variable("u", FeType::lagrange(2)).unwrap();
    let p = dof_map.add_variable("p", FeType::lagrange(1)).unwrap();
    dof_map.distribute_dofs(&mesh).unwrap();

    assert_eq!(dof_map.n_dofs(), 25 + 9);
    assert_eq!(dof_map.variable_number("p"), Some(p));
    assert_eq!(dof_map.variable(u).name(), "u");
    // The first element owns the first dofs, velocity before pressure
    let first = dof_map.element_dof_indices(ElementId(0));
    assert_eq!(first, (0..13).collect::<Vec<_>>());
    for element in mesh.active_element_ids() {
        assert_eq!(dof_map.dof_indices(element, u).len(), 9);
        assert_eq!(dof_map.dof_indices(element, p).len(), 4);
    }
}

#[test]
fn continuous_dofs_are_shared_by_their_site() {
    let mesh = unit_square(2);
    let dof_map = single_variable_dof_map(&mesh, FeType::lagrange(1));
    // Lower right vertex of element 0 is the lower left vertex of element 1
    assert_eq!(dof_map.dof_indices(ElementId(0), 0)[1], dof_map.dof_indices(ElementId(1), 0)[0]);
    let key = DofKey::Site {
        variable: 0,
        point: [cell_size(0), cell_size(0), 0],
        component: 0,
    };
    let center = dof_map.dof_for_key(&key).unwrap();
    assert_eq!(dof_map.dof_key(center), &key);
    for element in mesh.active_element_ids() {
        assert!(dof_map.dof_indices(element, 0).contains(&center));
    }

    let dg = single_variable_dof_map(&mesh, FeType::discontinuous(1));
    assert_eq!(dg.dof_indices(ElementId(0), 0), &[0, 1, 2, 3]);
    assert_eq!(dg.dof_indices(ElementId(1), 0), &[4, 5, 6, 7]);
    assert_eq!(dg.n_constrained_dofs(), 0);
}

#[test]
fn hanging_vertex_is_constrained_to_the_coarse_edge() {
    let mut mesh = build_square(2, 1, 0.0, 2.0, 0.0, 1.0).unwrap();
    mesh.refine(&[ElementId(0)], MAX_LEVEL).unwrap();
    let dof_map = single_variable_dof_map(&mesh, FeType::lagrange(1));
    assert_eq!(dof_map.n_constrained_dofs(), 1);

    let base = cell_size(0);
    let dof = |point| {
        dof_map
            .dof_for_key(&DofKey::Site {
                variable: 0,
                point,
                component: 0,
            })
            .unwrap()
    };
    let hanging = dof([base, base / 2, 0]);
    let constraint = dof_map.constraint(hanging).unwrap();
    let mut masters = constraint.masters.clone();
    masters.sort_by_key(|&(master, _)| master);
    let mut expected = vec![(dof([base, 0, 0]), 0.5), (dof([base, base, 0]), 0.5)];
    expected.sort_by_key(|&(master, _)| master);
    assert_eq!(masters.len(), 2);
    for ((master, c), (expected_master, expected_c)) in masters.into_iter().zip(expected) {
        assert_eq!(master, expected_master);
        assert_scalar_eq!(c, expected_c, comp = abs, tol = 1e-14);
    }
    assert_eq!(constraint.rhs, 0.0);
}

#[test]
fn hermite_hanging_dofs_include_derivatives() {
    let mut mesh = build_square(2, 1, 0.0, 2.0, 0.0, 1.0).unwrap();
    mesh.refine(&[ElementId(0)], MAX_LEVEL).unwrap();
    let dof_map = single_variable_dof_map(&mesh, FeType::hermite());
    // Value, x-, y- and mixed derivative at the hanging vertex
    assert_eq!(dof_map.n_constrained_dofs(), 4);
}

#[test]
fn dirichlet_boundaries_constrain_boundary_values() {
    let mesh = unit_square(2);
    let mut dof_map = DofMap::new(2);
    dof_map.add_variable("u", FeType::lagrange(1)).unwrap();
    dof_map.add_dirichlet_boundary(DirichletBoundary::new(0, [0, 1, 2, 3], |x| x.x + 2.0 * x.y));
    dof_map.distribute_dofs(&mesh).unwrap();
    assert_eq!(dof_map.n_constrained_dofs(), 8);

    for (&dof, constraint) in dof_map.constraints() {
        assert!(constraint.masters.is_empty());
        let DofKey::Site { point, .. } = *dof_map.dof_key(dof) else {
            panic!("continuous dofs are keyed by site");
        };
        let x = mesh.lattice_to_physical(&point);
        assert_scalar_eq!(constraint.rhs, x.x + 2.0 * x.y, comp = abs, tol = 1e-14);
    }

    // Hermite variables only constrain nodal values
    let mut dof_map = DofMap::new(2);
    dof_map.add_variable("u", FeType::hermite()).unwrap();
    dof_map.add_dirichlet_boundary(DirichletBoundary::homogeneous(0, [0]));
    dof_map.distribute_dofs(&mesh).unwrap();
    assert_eq!(dof_map.n_constrained_dofs(), 3);
}

#[test]
fn point_constraints_pin_nodal_values() {
    let mesh = unit_square(2);
    let mut dof_map = DofMap::new(2);
    dof_map.add_variable("p", FeType::lagrange(1)).unwrap();
    dof_map.add_point_constraint(PointConstraint {
        variable: 0,
        point: Point3::new(0.5, 0.5, 0.0),
        value: 2.0,
    });
    dof_map.distribute_dofs(&mesh).unwrap();
    assert_eq!(dof_map.n_constrained_dofs(), 1);
    let (_, constraint) = dof_map.constraints().iter().next().unwrap();
    assert_eq!(constraint.rhs, 2.0);

    dof_map.add_point_constraint(PointConstraint {
        variable: 0,
        point: Point3::new(0.3, 0.3, 0.0),
        value: 0.0,
    });
    assert!(matches!(dof_map.distribute_dofs(&mesh), Err(AmrError::InvalidConfiguration(_))));
}

#[test]
fn distribution_rejects_mismatched_dimensions() {
    let mesh = unit_square(1);
    let mut dof_map = DofMap::new(3);
    dof_map.add_variable("u", FeType::lagrange(1)).unwrap();
    assert!(matches!(dof_map.distribute_dofs(&mesh), Err(AmrError::InvalidMesh(_))));
    assert!(matches!(
        dof_map.add_variable("v", FeType::lagrange(3)),
        Err(AmrError::UnsupportedElementType { .. })
    ));
}

#[test]
fn constrained_element_systems_keep_unit_diagonals() {
    let mesh = unit_square(1);
    let mut dof_map = DofMap::new(2);
    dof_map.add_variable("u", FeType::lagrange(1)).unwrap();
    // Only the bottom side, which holds local dofs 0 and 1
    dof_map.add_dirichlet_boundary(DirichletBoundary::new(0, [0], |_| 3.0));
    dof_map.distribute_dofs(&mesh).unwrap();

    #[rustfmt::skip]
    let mut matrix = DMatrix::from_row_slice(4, 4, &[
         4.0, -1.0, -1.0, -2.0,
        -1.0,  4.0, -2.0, -1.0,
        -1.0, -2.0,  4.0, -1.0,
        -2.0, -1.0, -1.0,  4.0,
    ]) / 6.0;
    let mut vector = DVector::from_element(4, 0.25);
    let mut dofs = dof_map.dof_indices(ElementId(0), 0).to_vec();
    dof_map.constrain_element_matrix_and_vector(&mut matrix, &mut vector, &mut dofs);

    assert_eq!(dofs.len(), 4);
    assert_eq!(matrix[(0, 0)], 1.0);
    assert_eq!(matrix[(1, 1)], 1.0);
    assert_eq!(matrix[(0, 2)], 0.0);
    assert_eq!(matrix[(2, 0)], 0.0);
    assert_eq!(vector[0], 3.0);
    // F - K g for the free rows: 0.25 - 3 * (-1 - 2) / 6
    assert_scalar_eq!(vector[2], 1.75, comp = abs, tol = 1e-14);
    assert_scalar_eq!(matrix[(2, 2)], 4.0 / 6.0, comp = abs, tol = 1e-14);
}

#[test]
fn constraint_chains_resolve_to_free_masters() {
    let mesh = corner_refined_square();
    let dof_map = single_variable_dof_map(&mesh, FeType::lagrange(2));
    assert!(dof_map.n_constrained_dofs() > 0);
    for constraint in dof_map.constraints().values() {
        for (master, _) in &constraint.masters {
            assert!(!dof_map.is_constrained(*master));
        }
    }
}

proptest! {
    #[test]
    fn hanging_constraints_reproduce_the_coarse_trace(
        mesh in locally_refined_square_mesh(3, 5),
        hermite in any::<bool>()
    ) {
        let fe_type = if hermite { FeType::hermite() } else { FeType::lagrange(2) };
        let dof_map = single_variable_dof_map(&mesh, fe_type);
        let interpolated = interpolate_polynomial(&mesh, &dof_map);
        let mut constrained = interpolated.clone();
        dof_map.enforce_constraints_exactly(&mut constrained);
        prop_assert!((constrained - interpolated).amax() <= 1e-11);
    }
}

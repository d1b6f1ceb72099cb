use crate::unit_square;
use amrfem::mesh::procedural::{build_cube, build_l_shape, build_line, build_square};
use amrfem::mesh::{cell_size, ElementId, Mesh, RefinementFlag, LATTICE_BITS, MAX_LEVEL};
use amrfem::proptest::uniform_mesh;
use amrfem::AmrError;
use matrixcompare::assert_scalar_eq;
use nalgebra::Point3;
use proptest::prelude::*;

#[test]
fn structured_generators_produce_expected_counts() {
    let line = build_line(5, -1.0, 1.0).unwrap();
    assert_eq!(line.dim(), 1);
    assert_eq!(line.n_active_elements(), 5);
    assert_eq!(line.n_nodes(), 6);

    let square = build_square(3, 2, 0.0, 3.0, 0.0, 1.0).unwrap();
    assert_eq!(square.n_active_elements(), 6);
    assert_eq!(square.n_nodes(), 12);
    assert_eq!(square.n_sides(), 4);

    let cube = build_cube([2, 2, 2], [0.0; 3], [1.0; 3]).unwrap();
    assert_eq!(cube.n_active_elements(), 8);
    assert_eq!(cube.n_nodes(), 27);

    let l_shape = build_l_shape(2).unwrap();
    assert_eq!(l_shape.n_active_elements(), 12);
    assert!(l_shape
        .locate_active_element(&Point3::new(0.5, -0.5, 0.0))
        .is_none());
}

#[test]
fn generators_reject_empty_domains() {
    assert!(matches!(build_square(0, 2, 0.0, 1.0, 0.0, 1.0), Err(AmrError::InvalidMesh(_))));
    assert!(matches!(build_line(2, 1.0, 1.0), Err(AmrError::InvalidMesh(_))));
    let duplicate = Mesh::from_base_cells(2, [0.0; 3], [1.0; 3], [[0, 0, 0], [0, 0, 0]]);
    assert!(matches!(duplicate, Err(AmrError::InvalidMesh(_))));
}

#[test]
fn square_boundary_ids_follow_generator_convention() {
    let mesh = unit_square(2);
    // Element 0 is the lower left cell
    let element = mesh.element(ElementId(0));
    assert_eq!(element.boundary_id(0), Some(3));
    assert_eq!(element.boundary_id(1), None);
    assert_eq!(element.boundary_id(2), Some(0));
    assert_eq!(element.boundary_id(3), None);

    // Element 3 is the upper right cell
    let element = mesh.element(ElementId(3));
    assert_eq!(element.boundary_id(1), Some(1));
    assert_eq!(element.boundary_id(3), Some(2));
}

#[test]
fn element_boxes_match_physical_cells() {
    let mesh = unit_square(2);
    let element_box = mesh.element_box(ElementId(3));
    assert_eq!(element_box.lo(), [0.5, 0.5, 0.0]);
    assert_eq!(element_box.hi(), [1.0, 1.0, 0.0]);
    assert_scalar_eq!(element_box.volume(), 0.25, comp = abs, tol = 1e-15);
    assert_scalar_eq!(element_box.side_area(0), 0.5, comp = abs, tol = 1e-15);
    assert_scalar_eq!(element_box.hmax(), 0.5f64.hypot(0.5), comp = abs, tol = 1e-15);
    assert_scalar_eq!(element_box.hmin(), 0.5, comp = abs, tol = 1e-15);
    assert_eq!(element_box.center(), Point3::new(0.75, 0.75, 0.0));
    assert_eq!(element_box.to_reference(&Point3::new(1.0, 0.5, 0.0)), [1.0, -1.0, 0.0]);
}

#[test]
fn refinement_creates_children_in_lexicographic_order() {
    let mut mesh = unit_square(2);
    let summary = mesh.refine(&[ElementId(0)], MAX_LEVEL).unwrap();
    assert_eq!(summary.refined, 1);
    assert_eq!(summary.capped, 0);
    assert_eq!(summary.new_elements, vec![ElementId(4), ElementId(5), ElementId(6), ElementId(7)]);

    let parent = mesh.element(ElementId(0));
    assert!(!parent.is_active());
    assert_eq!(parent.children(), &summary.new_elements[..]);
    assert_eq!(mesh.n_active_elements(), 7);
    assert_eq!(mesh.n_elements(), 8);
    assert_eq!(mesh.n_nodes(), 14);

    let half = cell_size(1);
    for (c, &child) in summary.new_elements.iter().enumerate() {
        let child = mesh.element(child);
        assert_eq!(child.level(), 1);
        assert_eq!(child.parent(), Some(ElementId(0)));
        assert_eq!(child.lo(), [(c & 1) as i64 * half, ((c >> 1) & 1) as i64 * half, 0]);
    }
    // Children inherit the boundary ids of the parent sides they lie on
    assert_eq!(mesh.element(ElementId(4)).boundary_id(0), Some(3));
    assert_eq!(mesh.element(ElementId(4)).boundary_id(2), Some(0));
    assert_eq!(mesh.element(ElementId(7)).boundary_id(1), None);
}

#[test]
fn neighbors_across_non_conforming_faces() {
    let mut mesh = unit_square(2);
    mesh.refine(&[ElementId(0)], MAX_LEVEL).unwrap();

    // The finer element sees the coarse element across the face
    assert_eq!(mesh.neighbor(ElementId(5), 1), Some(ElementId(1)));
    assert_eq!(mesh.neighbor(ElementId(4), 0), None);
    // The coarse element sees the inactive parent, whose touching children are active
    assert_eq!(mesh.neighbor(ElementId(1), 0), Some(ElementId(0)));
    assert_eq!(mesh.active_neighbors_across(ElementId(1), 0), vec![ElementId(5), ElementId(7)]);
    assert_eq!(mesh.active_neighbors_across(ElementId(2), 2), vec![ElementId(6), ElementId(7)]);
    assert_eq!(mesh.active_descendants(ElementId(0)).len(), 4);
}

#[test]
fn locate_active_element_descends_the_tree() {
    let mut mesh = unit_square(2);
    mesh.refine(&[ElementId(0)], MAX_LEVEL).unwrap();

    let locate = |x: f64, y: f64| mesh.locate_active_element(&Point3::new(x, y, 0.0));
    assert_eq!(locate(0.1, 0.1), Some(ElementId(4)));
    assert_eq!(locate(0.3, 0.3), Some(ElementId(7)));
    assert_eq!(locate(0.3, 0.1), Some(ElementId(5)));
    assert_eq!(locate(0.75, 0.25), Some(ElementId(1)));
    assert_eq!(locate(0.25, 0.75), Some(ElementId(2)));
    assert_eq!(locate(-0.1, 0.5), None);
    // Lattice boxes are half-open, so the upper domain boundary is not covered
    assert_eq!(locate(1.0, 0.5), None);
}

#[test]
fn refine_then_coarsen_restores_the_element() {
    let mut mesh = unit_square(2);
    let before = mesh.element(ElementId(0)).clone();
    let n_nodes = mesh.n_nodes();

    mesh.refine(&[ElementId(0)], MAX_LEVEL).unwrap();
    assert_eq!(mesh.coarsen(&[ElementId(0)]).unwrap(), 1);

    assert_eq!(mesh.element(ElementId(0)), &before);
    assert_eq!(mesh.n_nodes(), n_nodes);
    assert_eq!(mesh.active_element_ids(), vec![ElementId(0), ElementId(1), ElementId(2), ElementId(3)]);
    assert!(mesh.try_element(ElementId(4)).is_none());
    assert_eq!(mesh.element_capacity(), 8);

    // Slots of removed children are handed out again, lowest first
    let summary = mesh.refine(&[ElementId(3)], MAX_LEVEL).unwrap();
    assert_eq!(summary.new_elements, vec![ElementId(4), ElementId(5), ElementId(6), ElementId(7)]);
    assert_eq!(mesh.element_capacity(), 8);
    assert_eq!(mesh.element(ElementId(4)).parent(), Some(ElementId(3)));
    assert_eq!(mesh.element(ElementId(4)).lo(), mesh.element(ElementId(3)).lo());
    assert_eq!(mesh.locate_active_element(&Point3::new(0.9, 0.9, 0.0)), Some(ElementId(7)));
}

#[test]
fn invalid_refinement_requests_leave_the_mesh_untouched() {
    let mut mesh = unit_square(2);
    mesh.refine(&[ElementId(0)], MAX_LEVEL).unwrap();
    let n_active = mesh.n_active_elements();

    let result = mesh.refine(&[ElementId(1), ElementId(0)], MAX_LEVEL);
    assert!(matches!(result, Err(AmrError::InvalidElement { element: ElementId(0), .. })));
    let result = mesh.refine(&[ElementId(42)], MAX_LEVEL);
    assert!(matches!(result, Err(AmrError::InvalidElement { .. })));
    assert_eq!(mesh.n_active_elements(), n_active);
    assert!(mesh.element(ElementId(1)).is_active());

    assert!(matches!(mesh.coarsen(&[ElementId(1)]), Err(AmrError::InvalidElement { .. })));
    mesh.refine(&[ElementId(4)], MAX_LEVEL).unwrap();
    assert!(matches!(mesh.coarsen(&[ElementId(0)]), Err(AmrError::InvalidElement { .. })));
}

#[test]
fn refinement_at_the_maximum_level_is_capped() {
    let mut mesh = unit_square(1);
    let summary = mesh.refine(&[ElementId(0)], 0).unwrap();
    assert_eq!(summary.refined, 0);
    assert_eq!(summary.capped, 1);
    assert!(mesh.element(ElementId(0)).is_active());
    assert!(u32::from(MAX_LEVEL) < LATTICE_BITS);
}

#[test]
fn flags_and_boundary_ids_can_be_reassigned() {
    let mut mesh = unit_square(2);
    mesh.set_refinement_flag(ElementId(2), RefinementFlag::Refine);
    assert_eq!(mesh.element(ElementId(2)).refinement_flag(), RefinementFlag::Refine);
    mesh.clear_refinement_flags();
    assert_eq!(mesh.element(ElementId(2)).refinement_flag(), RefinementFlag::DoNothing);

    mesh.set_boundary_ids(|x, _| (x.x < 1e-12).then_some(7));
    assert_eq!(mesh.element(ElementId(0)).boundary_id(0), Some(7));
    assert_eq!(mesh.element(ElementId(0)).boundary_id(2), None);
}

#[test]
fn hexahedra_refine_into_eight_children() {
    let mut mesh = build_cube([1, 1, 1], [0.0; 3], [1.0, 2.0, 3.0]).unwrap();
    let summary = mesh.refine(&[ElementId(0)], MAX_LEVEL).unwrap();
    assert_eq!(summary.new_elements.len(), 8);
    assert_eq!(mesh.n_nodes(), 27);
    let last = mesh.element_box(ElementId(8));
    assert_eq!(last.lo(), [0.5, 1.0, 1.5]);
    assert_eq!(last.hi(), [1.0, 2.0, 3.0]);
}

proptest! {
    #[test]
    fn coarsening_undoes_refinement(
        mesh in uniform_mesh(2, 4),
        pick in any::<prop::sample::Index>()
    ) {
        let mut mesh = mesh;
        let active = mesh.active_element_ids();
        let element = *pick.get(&active);
        let before = mesh.element(element).clone();
        let n_nodes = mesh.n_nodes();

        mesh.refine(&[element], MAX_LEVEL).unwrap();
        prop_assert_eq!(mesh.n_active_elements(), active.len() + 3);
        mesh.coarsen(&[element]).unwrap();

        prop_assert_eq!(mesh.element(element), &before);
        prop_assert_eq!(mesh.n_nodes(), n_nodes);
        prop_assert_eq!(mesh.active_element_ids(), active);
    }

    #[test]
    fn children_tile_their_parent(mesh in uniform_mesh(3, 2), pick in any::<prop::sample::Index>()) {
        let mut mesh = mesh;
        let element = *pick.get(&mesh.active_element_ids());
        let volume = mesh.element_box(element).volume();
        let summary = mesh.refine(&[element], MAX_LEVEL).unwrap();
        let children_volume: f64 = summary
            .new_elements
            .iter()
            .map(|&child| mesh.element_box(child).volume())
            .sum();
        prop_assert!((children_volume - volume).abs() <= 1e-14 * volume);
        for &child in &summary.new_elements {
            let center = mesh.element_box(child).center();
            prop_assert_eq!(mesh.locate_active_element(&center), Some(child));
        }
    }
}

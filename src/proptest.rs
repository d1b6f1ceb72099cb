//! Proptest strategies for meshes, element types and points.
use crate::element::FeType;
use crate::mesh::procedural::{build_cube, build_line, build_square};
use crate::mesh::refinement::MeshRefinement;
use crate::mesh::{Mesh, RefinementFlag};
use ::proptest::prelude::*;
use nalgebra::Point3;

/// Points in the closed unit box, padded with zeros beyond `dim`.
pub fn unit_box_point(dim: usize) -> impl Strategy<Value = Point3<f64>> {
    [0.0..=1.0, 0.0..=1.0, 0.0..=1.0].prop_map(move |mut x: [f64; 3]| {
        x[dim.min(3)..].iter_mut().for_each(|xi| *xi = 0.0);
        Point3::from(x)
    })
}

/// Every element type that is valid in the given dimension.
pub fn fe_type(dim: usize) -> impl Strategy<Value = FeType> {
    prop_oneof![
        (1..=2u8).prop_map(FeType::lagrange),
        (0..=3u8).prop_map(FeType::discontinuous),
        Just(FeType::hermite()),
    ]
    .prop_filter("element type must be valid in the dimension", move |fe_type| {
        fe_type.validate(dim).is_ok()
    })
}

/// Uniform meshes of the unit line, square or cube with at most `max_cells_per_axis` cells
/// along each axis.
pub fn uniform_mesh(dim: usize, max_cells_per_axis: usize) -> impl Strategy<Value = Mesh> {
    let counts = [1..=max_cells_per_axis, 1..=max_cells_per_axis, 1..=max_cells_per_axis];
    counts.prop_filter_map("mesh generation failed", move |[nx, ny, nz]| match dim {
        1 => build_line(nx, 0.0, 1.0).ok(),
        2 => build_square(nx, ny, 0.0, 1.0, 0.0, 1.0).ok(),
        _ => build_cube([nx, ny, nz], [0.0; 3], [1.0; 3]).ok(),
    })
}

/// Unit square meshes with hanging nodes, built by up to `max_refinements` balanced refinements
/// of randomly chosen active elements.
pub fn locally_refined_square_mesh(max_cells_per_axis: usize, max_refinements: usize) -> impl Strategy<Value = Mesh> {
    let picks = prop::collection::vec(any::<prop::sample::Index>(), 0..=max_refinements);
    (uniform_mesh(2, max_cells_per_axis), picks).prop_filter_map("refinement failed", |(mut mesh, picks)| {
        let mut refinement = MeshRefinement::new().with_max_h_level(4);
        for pick in picks {
            let active = mesh.active_element_ids();
            let id = *pick.get(&active);
            mesh.set_refinement_flag(id, RefinementFlag::Refine);
            refinement.refine_and_coarsen_elements(&mut mesh).ok()?;
        }
        Some(mesh)
    })
}

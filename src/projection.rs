//! Transfer of finite element fields between meshes.
use crate::dof_map::DofMap;
use crate::fe::evaluate_field_derivative;
use crate::mesh::Mesh;
use crate::AmrError;
use nalgebra::DVector;

/// Relative distance by which sites are moved towards the center of their element before the
/// old element containing them is looked up.
const SITE_NUDGE: f64 = 1e-3;

/// Projects a solution from an old mesh onto a refined and/or coarsened version of it.
///
/// Every dof of the new space is set to the value (or derivative) of the old field at its site,
/// evaluated on the old element covering the interior of the new element near that site. On
/// elements that were refined this reproduces the old field exactly, since the spaces are
/// nested. Constraints of the new space are enforced on the result.
pub fn project_solution(
    old_mesh: &Mesh,
    old_dof_map: &DofMap,
    old_solution: &DVector<f64>,
    new_mesh: &Mesh,
    new_dof_map: &DofMap,
) -> Result<DVector<f64>, AmrError> {
    let compatible = old_dof_map.n_variables() == new_dof_map.n_variables()
        && old_dof_map
            .variables()
            .iter()
            .zip(new_dof_map.variables())
            .all(|(old, new)| old.fe_type() == new.fe_type());
    if !compatible {
        return Err(AmrError::InvalidConfiguration(
            "solution can only be projected between dof maps with the same variables".to_string(),
        ));
    }
    if old_solution.len() != old_dof_map.n_dofs() {
        return Err(AmrError::InvalidConfiguration(format!(
            "solution has {} entries, but the dof map has {} dofs",
            old_solution.len(),
            old_dof_map.n_dofs()
        )));
    }

    let mut projected = DVector::zeros(new_dof_map.n_dofs());
    let mut visited = vec![false; new_dof_map.n_dofs()];
    for element in new_mesh.active_elements() {
        let element_box = new_mesh.element_box(element.id());
        let center = element_box.center();
        for variable in 0..new_dof_map.n_variables() {
            let basis = new_dof_map.basis(variable);
            let dofs = new_dof_map.dof_indices(element.id(), variable);
            for (local, &dof) in dofs.iter().enumerate() {
                if visited[dof] {
                    continue;
                }
                visited[dof] = true;

                let site = element_box.to_physical(&basis.site_reference_coords(local));
                let nudged = site + (center - site) * SITE_NUDGE;
                let old_element = old_mesh.locate_active_element(&nudged).ok_or_else(|| {
                    AmrError::InvalidMesh(format!("site {site:?} of the new mesh is not covered by the old mesh"))
                })?;
                let coefficients = old_dof_map.local_solution(old_element, variable, old_solution);
                projected[dof] = evaluate_field_derivative(
                    old_dof_map.basis(variable),
                    &old_mesh.element_box(old_element),
                    &coefficients,
                    &site,
                    basis.functions()[local].derivative,
                );
            }
        }
    }

    new_dof_map.enforce_constraints_exactly(&mut projected);
    Ok(projected)
}

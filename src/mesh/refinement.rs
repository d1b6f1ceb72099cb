//! Error-driven flagging, level balance and application of refinement and coarsening.
//!
//! [`MeshRefinement`] flags active elements from an [`ErrorVector`], makes the flags compatible
//! with a face level mismatch of at most one and complete sibling sets, and finally applies them
//! to the [`Mesh`]: coarsening first, then refinement.
use crate::error_estimation::ErrorVector;
use crate::mesh::{ElementId, Mesh, RefinementFlag, MAX_LEVEL};
use crate::AmrError;
use log::{debug, warn};
use ordered_float::OrderedFloat;
use rustc_hash::FxHashSet;

/// Outcome of [`MeshRefinement::refine_and_coarsen_elements`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct RefinementStats {
    /// Number of elements that were split.
    pub refined: usize,
    /// Number of parents whose children were removed.
    pub coarsened: usize,
    /// Number of elements flagged for refinement but skipped at the maximum level.
    pub capped: usize,
}

impl RefinementStats {
    pub fn changed_mesh(&self) -> bool {
        self.refined > 0 || self.coarsened > 0
    }
}

/// Refinement policy and bookkeeping of refinement-limit events.
#[derive(Debug, Clone, PartialEq)]
pub struct MeshRefinement {
    refine_fraction: f64,
    coarsen_fraction: f64,
    max_h_level: u8,
    capped_count: usize,
}

impl Default for MeshRefinement {
    fn default() -> Self {
        Self {
            refine_fraction: 0.3,
            coarsen_fraction: 0.0,
            max_h_level: MAX_LEVEL,
            capped_count: 0,
        }
    }
}

impl MeshRefinement {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_refine_fraction(self, refine_fraction: f64) -> Self {
        Self {
            refine_fraction,
            ..self
        }
    }

    pub fn with_coarsen_fraction(self, coarsen_fraction: f64) -> Self {
        Self {
            coarsen_fraction,
            ..self
        }
    }

    /// Sets the maximum level of refined elements, at most [`MAX_LEVEL`].
    pub fn with_max_h_level(self, max_h_level: u8) -> Self {
        Self {
            max_h_level: max_h_level.min(MAX_LEVEL),
            ..self
        }
    }

    pub fn refine_fraction(&self) -> f64 {
        self.refine_fraction
    }

    pub fn coarsen_fraction(&self) -> f64 {
        self.coarsen_fraction
    }

    pub fn max_h_level(&self) -> u8 {
        self.max_h_level
    }

    /// Total number of refinement requests that were dropped because an element was at
    /// the maximum level.
    pub fn capped_count(&self) -> usize {
        self.capped_count
    }

    fn check_fractions(&self) -> Result<(), AmrError> {
        let valid = |f: f64| (0.0..=1.0).contains(&f);
        if !valid(self.refine_fraction) || !valid(self.coarsen_fraction) {
            return Err(AmrError::InvalidConfiguration(format!(
                "refine and coarsen fractions must lie in [0, 1], got {} and {}",
                self.refine_fraction, self.coarsen_fraction
            )));
        }
        Ok(())
    }

    /// Flags the `round(refine_fraction * n)` active elements with the largest error for
    /// refinement and the `round(coarsen_fraction * n)` with the smallest for coarsening.
    ///
    /// Elements are ranked by descending error, ties by ascending id. Previous flags are cleared.
    /// Returns the number of elements flagged for refinement.
    pub fn flag_elements_by_elem_fraction(&mut self, mesh: &mut Mesh, error: &ErrorVector) -> Result<usize, AmrError> {
        self.check_fractions()?;
        mesh.clear_refinement_flags();

        let mut ranked: Vec<(ElementId, f64)> = mesh
            .active_elements()
            .map(|element| (element.id(), error.get(element.id())))
            .collect();
        ranked.sort_by_key(|&(id, e)| (std::cmp::Reverse(OrderedFloat(e)), id));

        let n = ranked.len();
        let n_refine = (self.refine_fraction * n as f64).round() as usize;
        let n_coarsen = ((self.coarsen_fraction * n as f64).round() as usize).min(n - n_refine.min(n));

        let mut refined = 0;
        for &(id, _) in ranked.iter().take(n_refine) {
            if self.try_flag_refine(mesh, id) {
                refined += 1;
            }
        }
        for &(id, _) in ranked.iter().rev().take(n_coarsen) {
            if mesh.element(id).parent().is_some() {
                mesh.set_refinement_flag(id, RefinementFlag::Coarsen);
            }
        }
        self.report_capped(n_refine - refined);
        debug!(
            "Flagged {} of {} elements for refinement and up to {} for coarsening",
            refined, n, n_coarsen
        );
        Ok(refined)
    }

    /// Flags elements whose error lies within the top `refine_fraction` of the error range for
    /// refinement, and those within the bottom `coarsen_fraction` for coarsening.
    ///
    /// With `min` and `max` the extreme errors, elements with an error of at least
    /// `(1 - refine_fraction) * max` are refined, and elements with an error of at most
    /// `min + coarsen_fraction * (max - min)` are coarsened. Returns the number of elements
    /// flagged for refinement.
    pub fn flag_elements_by_error_fraction(&mut self, mesh: &mut Mesh, error: &ErrorVector) -> Result<usize, AmrError> {
        self.check_fractions()?;
        mesh.clear_refinement_flags();

        let active = mesh.active_element_ids();
        if active.is_empty() {
            return Ok(0);
        }
        let (min, max) = active
            .iter()
            .map(|&id| error.get(id))
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), e| (lo.min(e), hi.max(e)));
        let refine_cutoff = (1.0 - self.refine_fraction) * max;
        let coarsen_cutoff = min + self.coarsen_fraction * (max - min);

        let mut refined = 0;
        let mut capped = 0;
        for id in active {
            let e = error.get(id);
            if e <= coarsen_cutoff && self.coarsen_fraction > 0.0 && mesh.element(id).parent().is_some() {
                mesh.set_refinement_flag(id, RefinementFlag::Coarsen);
            }
            if e >= refine_cutoff && self.refine_fraction > 0.0 {
                if self.try_flag_refine(mesh, id) {
                    refined += 1;
                } else {
                    capped += 1;
                }
            }
        }
        self.report_capped(capped);
        Ok(refined)
    }

    fn try_flag_refine(&mut self, mesh: &mut Mesh, id: ElementId) -> bool {
        if mesh.element(id).level() >= self.max_h_level {
            return false;
        }
        mesh.set_refinement_flag(id, RefinementFlag::Refine);
        true
    }

    fn report_capped(&mut self, capped: usize) {
        if capped > 0 {
            warn!(
                "{} element(s) were not flagged for refinement because they reached the maximum level {}",
                capped, self.max_h_level
            );
            self.capped_count += capped;
        }
    }

    /// Adjusts flags until applying them keeps the level difference across every face at most
    /// one and only removes complete sets of siblings.
    ///
    /// Flags are only ever raised, from coarsening to nothing or from nothing to refinement, so the
    /// iteration reaches a fixed point.
    pub fn make_flags_compatible(&self, mesh: &mut Mesh) {
        let mut passes = 0;
        loop {
            passes += 1;
            let siblings_changed = restrict_coarsening_to_complete_siblings(mesh);
            let balance_changed = enforce_level_balance(mesh);
            if !siblings_changed && !balance_changed {
                break;
            }
        }
        debug!("Refinement flags became compatible after {} pass(es)", passes);
    }

    /// Applies the flags of the mesh: makes them compatible, coarsens, refines and clears them.
    pub fn refine_and_coarsen_elements(&mut self, mesh: &mut Mesh) -> Result<RefinementStats, AmrError> {
        self.make_flags_compatible(mesh);

        let mut parents: Vec<ElementId> = mesh
            .active_elements()
            .filter(|element| element.refinement_flag() == RefinementFlag::Coarsen)
            .filter_map(|element| element.parent())
            .collect();
        parents.sort();
        parents.dedup();
        let coarsened = mesh.coarsen(&parents)?;

        let marked: Vec<ElementId> = mesh
            .active_elements()
            .filter(|element| element.refinement_flag() == RefinementFlag::Refine)
            .map(|element| element.id())
            .collect();
        let summary = mesh.refine(&marked, self.max_h_level)?;
        self.capped_count += summary.capped;
        mesh.clear_refinement_flags();

        let stats = RefinementStats {
            refined: summary.refined,
            coarsened,
            capped: summary.capped,
        };
        debug!(
            "Refined {} and coarsened {} element(s), {} active elements remain",
            stats.refined,
            stats.coarsened,
            mesh.n_active_elements()
        );
        Ok(stats)
    }

    /// Refines every active element `n` times.
    pub fn uniformly_refine(&mut self, mesh: &mut Mesh, n: usize) -> Result<RefinementStats, AmrError> {
        let mut total = RefinementStats::default();
        for _ in 0..n {
            let active = mesh.active_element_ids();
            let summary = mesh.refine(&active, self.max_h_level)?;
            self.capped_count += summary.capped;
            total.refined += summary.refined;
            total.capped += summary.capped;
        }
        Ok(total)
    }

    /// Coarsens every complete set of active siblings `n` times, as far as level balance allows.
    pub fn uniformly_coarsen(&mut self, mesh: &mut Mesh, n: usize) -> Result<RefinementStats, AmrError> {
        let mut total = RefinementStats::default();
        for _ in 0..n {
            mesh.clear_refinement_flags();
            for id in mesh.active_element_ids() {
                if mesh.element(id).parent().is_some() {
                    mesh.set_refinement_flag(id, RefinementFlag::Coarsen);
                }
            }
            let stats = self.refine_and_coarsen_elements(mesh)?;
            total.coarsened += stats.coarsened;
            if stats.coarsened == 0 {
                break;
            }
        }
        Ok(total)
    }
}

/// The level an active element will have once its flag is applied.
fn target_level(mesh: &Mesh, id: ElementId) -> i32 {
    let element = mesh.element(id);
    let level = i32::from(element.level());
    match element.refinement_flag() {
        RefinementFlag::Refine => level + 1,
        RefinementFlag::Coarsen => level - 1,
        RefinementFlag::DoNothing => level,
    }
}

/// Removes coarsening flags from sibling sets that are not entirely active and flagged.
fn restrict_coarsening_to_complete_siblings(mesh: &mut Mesh) -> bool {
    let parents: FxHashSet<ElementId> = mesh
        .active_elements()
        .filter(|element| element.refinement_flag() == RefinementFlag::Coarsen)
        .filter_map(|element| element.parent())
        .collect();

    let mut changed = false;
    for parent in parents {
        let children = mesh.element(parent).children().to_vec();
        let complete = children.iter().all(|&child| {
            let child = mesh.element(child);
            child.is_active() && child.refinement_flag() == RefinementFlag::Coarsen
        });
        if !complete {
            for child in children {
                if mesh.element(child).refinement_flag() == RefinementFlag::Coarsen {
                    mesh.set_refinement_flag(child, RefinementFlag::DoNothing);
                    changed = true;
                }
            }
        }
    }
    changed
}

/// Raises flags of elements that would end up more than one level coarser than a face neighbor.
fn enforce_level_balance(mesh: &mut Mesh) -> bool {
    let mut changed = false;
    for id in mesh.active_element_ids() {
        for side in 0..mesh.n_sides() {
            for neighbor in mesh.active_neighbors_across(id, side) {
                if target_level(mesh, id) > target_level(mesh, neighbor) + 1 {
                    let raised = match mesh.element(neighbor).refinement_flag() {
                        RefinementFlag::Coarsen => RefinementFlag::DoNothing,
                        _ => RefinementFlag::Refine,
                    };
                    mesh.set_refinement_flag(neighbor, raised);
                    changed = true;
                }
            }
        }
    }
    changed
}

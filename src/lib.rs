//! Adaptive finite element assembly and solution on hierarchically refined box meshes.
//!
//! The building blocks follow the usual adaptive loop: a [`mesh::Mesh`] of axis-aligned
//! elements, a [`dof_map::DofMap`] with hanging-node and Dirichlet constraints, element
//! assemblers feeding a global sparse system, an [`system::EquationSystem`] that solves it, and
//! error estimators that drive [`mesh::refinement::MeshRefinement`]. The
//! [`adaptivity::AdaptiveLoop`] ties them together.
pub mod adaptivity;
pub mod assembly;
pub mod config;
pub mod dof_map;
pub mod element;
pub mod error;
pub mod error_estimation;
pub mod fe;
pub mod mesh;
pub mod projection;
pub mod quadrature;
pub mod system;

#[cfg(feature = "proptest-support")]
pub mod proptest;

pub use error::AmrError;

pub mod sparse {
    pub use amrfem_sparse::*;
}

pub extern crate nalgebra;
pub extern crate nalgebra_sparse;

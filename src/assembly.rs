//! Element-level assembly and its reduction into global sparse systems.
pub mod global;
pub mod local;

pub use global::*;
pub use local::*;

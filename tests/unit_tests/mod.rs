mod adaptivity;
mod dof_map;
mod mesh;
mod system;

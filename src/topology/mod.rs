//! Ownership of global indices and mesh cells across ranks.

pub mod index_map;
pub mod mesh;

pub use index_map::IndexMap;
pub use mesh::{CellPartition, MeshPartition};

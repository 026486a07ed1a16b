//! Matrix and vector storage.

pub mod crs;
pub mod matrix;
pub mod mesh_matrix;
pub mod stencil;
pub mod vector;

pub use matrix::DistributedSparseMatrix;
pub use mesh_matrix::MeshPartitionedMatrix;
pub use vector::DistributedVector;

#![cfg_attr(docsrs, feature(doc_cfg))]
//! # fv-matrix
//!
//! fv-matrix assembles distributed sparse matrices for finite-volume PDE
//! codes. Rows are partitioned across ranks; every rank assembles the rows it
//! owns from cell-local contributions that may reference halo cells owned by
//! its neighbours.
//!
//! ## Features
//! - [`IndexMap`](topology::index_map::IndexMap): owned and owned-plus-halo
//!   global index lists with O(1) lookup
//! - [`DistributedSparseMatrix`](data::matrix::DistributedSparseMatrix): a
//!   two-phase fill lifecycle (Unfilled, then Filled) with recoverable
//!   structural writes reported through [`WriteReport`](matrix_error::WriteReport)
//! - Matrix sums that never lose entries, matrix/vector products and Matrix
//!   Market export/import
//! - [`MeshPartitionedMatrix`](data::mesh_matrix::MeshPartitionedMatrix):
//!   local-index assembly over a [`MeshPartition`](topology::mesh::MeshPartition)
//!   with an optional cached [`Stencil`](data::stencil::Stencil)
//! - Pluggable communication backends (serial, threads, MPI)
//!
//! ## Determinism
//!
//! Reductions combine contributions in rank order, so every rank computes a
//! bitwise-identical result for the same inputs. Randomized tests fix their
//! `SmallRng` seeds.
//!
//! ## Usage
//!
//! ```toml
//! [dependencies]
//! fv-matrix = "0.3"
//! # Optional features:
//! # features = ["mpi-support", "rayon"]
//! ```
//!
//! ```
//! use fv_matrix::prelude::*;
//! use std::sync::Arc;
//!
//! let comm = Arc::new(NoComm);
//! let mut a = DistributedSparseMatrix::on_root(3, 3, 3, comm.clone());
//! a.accumulate(&[3.0, 10.0, 2.5], &[0, 0, 2], &[2, 1, 0]).unwrap();
//! a.accumulate(&[0.0, 0.0, 0.0], &[0, 1, 2], &[0, 1, 2]).unwrap();
//! let mut id = DistributedSparseMatrix::identity(3, comm).unwrap();
//! // the identity pattern is a subset of `a`'s, so nothing is dropped
//! let mut sum = a.add(&mut id).unwrap().strict().unwrap();
//! assert_eq!(sum.num_local_nonzeros(), 6);
//! assert_eq!(sum.to_dense().unwrap()[1], vec![0.0, 1.0, 0.0]);
//! ```

pub mod algs;
pub mod config;
pub mod data;
pub mod debug_invariants;
pub mod io;
pub mod matrix_error;
pub mod topology;

pub use debug_invariants::DebugInvariants;
pub use matrix_error::MatrixError;

/// A convenient prelude to import the most-used traits & types:
pub mod prelude {
    #[cfg(feature = "mpi-support")]
    pub use crate::algs::communicator::MpiComm;
    pub use crate::algs::communicator::{Communicator, NoComm, ThreadComm};
    pub use crate::algs::redistribute::VectorRedistributor;
    pub use crate::config::{MatrixConfig, StencilPolicy};
    pub use crate::data::matrix::{
        Diagonal, DistributedSparseMatrix, FillState, Operand, Product,
    };
    pub use crate::data::mesh_matrix::MeshPartitionedMatrix;
    pub use crate::data::stencil::{Stencil, StencilCache};
    pub use crate::data::vector::DistributedVector;
    pub use crate::debug_invariants::DebugInvariants;
    pub use crate::io::matrix_market::{MatrixMarketReader, MatrixMarketWriter};
    pub use crate::matrix_error::{Combined, MatrixError, WriteReport};
    pub use crate::topology::index_map::{IndexMap, MapKind};
    pub use crate::topology::mesh::{CellPartition, MeshPartition};
}

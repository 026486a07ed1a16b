//! Cell ownership of a partitioned mesh, as seen by matrix assembly.
//!
//! A rank sees its *overlapping* cells: the cells it owns plus a halo of
//! read-only neighbours. Local cell indices are positions in
//! [`global_overlapping_cell_ids`](MeshPartition::global_overlapping_cell_ids).

use crate::algs::communicator::Communicator;
use crate::matrix_error::MatrixError;
use crate::topology::index_map::IndexMap;
use std::sync::Arc;

/// Cell ownership tables of one rank.
pub trait MeshPartition {
    type Comm: Communicator;

    /// Number of cells over all ranks.
    fn global_cell_count(&self) -> u64;

    /// Global IDs of the cells this rank owns.
    fn global_non_overlapping_cell_ids(&self) -> &[u64];

    /// Global IDs of every cell visible here, in local order.
    fn global_overlapping_cell_ids(&self) -> &[u64];

    /// Local positions of the owned cells, in the order of
    /// [`global_non_overlapping_cell_ids`](Self::global_non_overlapping_cell_ids).
    fn local_non_overlapping_cell_ids(&self) -> &[usize];

    fn communicator(&self) -> &Arc<Self::Comm>;

    /// Cells visible on this rank, halo included.
    fn local_cell_count(&self) -> usize {
        self.global_overlapping_cell_ids().len()
    }
}

/// Explicit ownership tables.
pub struct CellPartition<C> {
    global_cells: u64,
    owned: Vec<u64>,
    overlapping: Vec<u64>,
    owned_positions: Vec<usize>,
    comm: Arc<C>,
}

impl<C> Clone for CellPartition<C> {
    fn clone(&self) -> Self {
        Self {
            global_cells: self.global_cells,
            owned: self.owned.clone(),
            overlapping: self.overlapping.clone(),
            owned_positions: self.owned_positions.clone(),
            comm: self.comm.clone(),
        }
    }
}

impl<C> std::fmt::Debug for CellPartition<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CellPartition")
            .field("global_cells", &self.global_cells)
            .field("owned", &self.owned)
            .field("overlapping", &self.overlapping)
            .finish()
    }
}

impl<C: Communicator> CellPartition<C> {
    /// Tables from an explicit owned list and overlapping list. Every owned
    /// cell must appear in `overlapping`.
    pub fn new(
        global_cells: u64,
        owned: Vec<u64>,
        overlapping: Vec<u64>,
        comm: Arc<C>,
    ) -> Result<Self, MatrixError> {
        let owned_map =
            IndexMap::non_overlapping(global_cells, owned.clone(), comm.rank(), comm.size().max(1))?;
        let overlap_map = IndexMap::overlapping(global_cells, overlapping.clone(), &owned_map)?;
        let owned_positions = owned
            .iter()
            .filter_map(|&g| overlap_map.local_position(g))
            .collect();
        Ok(Self {
            global_cells,
            owned,
            overlapping,
            owned_positions,
            comm,
        })
    }

    /// 1-D chain of `n` cells split into contiguous blocks, each extended by
    /// up to `halo` cells on either side.
    pub fn line(n: u64, halo: u64, comm: Arc<C>) -> Self {
        let owned_map = IndexMap::contiguous(n, comm.rank(), comm.size().max(1));
        let owned = owned_map.owned_indices();
        let (overlapping, owned_positions) = match (owned.first(), owned.last()) {
            (Some(&lo), Some(&hi)) => {
                let start = lo.saturating_sub(halo);
                let end = (hi + 1 + halo).min(n);
                let first = (lo - start) as usize;
                ((start..end).collect(), (first..first + owned.len()).collect())
            }
            _ => (Vec::new(), Vec::new()),
        };
        Self {
            global_cells: n,
            owned,
            overlapping,
            owned_positions,
            comm,
        }
    }
}

impl<C: Communicator> MeshPartition for CellPartition<C> {
    type Comm = C;

    fn global_cell_count(&self) -> u64 {
        self.global_cells
    }

    fn global_non_overlapping_cell_ids(&self) -> &[u64] {
        &self.owned
    }

    fn global_overlapping_cell_ids(&self) -> &[u64] {
        &self.overlapping
    }

    fn local_non_overlapping_cell_ids(&self) -> &[usize] {
        &self.owned_positions
    }

    fn communicator(&self) -> &Arc<C> {
        &self.comm
    }
}

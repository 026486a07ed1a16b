//! Matrix assembled from mesh-local contributions.
//!
//! Rows are `equations` blocks of cells and columns are `variables` blocks of
//! cells. Cell `c` of block `e` has global index `e * global_cells + c` and
//! local (overlapping) index `e * local_cells + local_cell`.
//!
//! Writes use local overlapping indices. They are translated to global
//! indices and rows owned by another rank are masked out before reaching the
//! underlying [`DistributedSparseMatrix`]; those rows are assembled by their
//! owner from its own copy of the halo.

use crate::algs::communicator::Communicator;
use crate::algs::exchange::MatrixCommTags;
use crate::config::MatrixConfig;
use crate::data::matrix::{Diagonal, DistributedSparseMatrix, FillState};
use crate::data::stencil::{Stencil, StencilCache};
use crate::data::vector::DistributedVector;
use crate::matrix_error::{Combined, MatrixError, WriteReport};
use crate::topology::index_map::IndexMap;
use crate::topology::mesh::MeshPartition;
use std::sync::Arc;

/// `[c + e * stride for e in 0..blocks for c in cells]`.
fn block_ids_global(cells: &[u64], blocks: usize, stride: u64) -> Vec<u64> {
    (0..blocks as u64)
        .flat_map(|e| cells.iter().map(move |&c| e * stride + c))
        .collect()
}

fn block_ids_local(cells: &[usize], blocks: usize, stride: usize) -> Vec<usize> {
    (0..blocks)
        .flat_map(|e| cells.iter().map(move |&c| e * stride + c))
        .collect()
}

/// Map local overlapping `(rows, cols)` to global indices, keeping owned rows.
fn translate_local(
    rows: &[usize],
    cols: &[usize],
    row_map: &IndexMap,
    col_map: &IndexMap,
) -> Result<Stencil, MatrixError> {
    if rows.len() != cols.len() {
        return Err(MatrixError::ShapeMismatch {
            context: "local column indices",
            expected: rows.len(),
            got: cols.len(),
        });
    }
    let lookup = |map: &IndexMap, i: usize| {
        map.local_indices()
            .get(i)
            .copied()
            .ok_or(MatrixError::IndexOutOfBounds {
                index: i as u64,
                bound: map.num_local() as u64,
            })
    };
    let mut stencil = Stencil {
        rows: Vec::with_capacity(rows.len()),
        cols: Vec::with_capacity(rows.len()),
        mask: Vec::with_capacity(rows.len()),
    };
    for (&r, &c) in rows.iter().zip(cols) {
        let row = lookup(row_map, r)?;
        let col = lookup(col_map, c)?;
        let keep = row_map.is_owned(row);
        stencil.mask.push(keep);
        if keep {
            stencil.rows.push(row);
            stencil.cols.push(col);
        }
    }
    Ok(stencil)
}

/// A [`DistributedSparseMatrix`] laid out by a mesh partition.
pub struct MeshPartitionedMatrix<M: MeshPartition> {
    mesh: Arc<M>,
    equations: usize,
    variables: usize,
    overlapping_rows: IndexMap,
    overlapping_cols: IndexMap,
    matrix: DistributedSparseMatrix<M::Comm>,
    stencil: StencilCache,
}

impl<M: MeshPartition> std::fmt::Debug for MeshPartitionedMatrix<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MeshPartitionedMatrix")
            .field("equations", &self.equations)
            .field("variables", &self.variables)
            .field("matrix", &self.matrix)
            .field("stencil", &self.stencil)
            .finish()
    }
}

impl<M: MeshPartition> MeshPartitionedMatrix<M> {
    /// Empty matrix of `equations x variables` cell blocks over `mesh`.
    pub fn new(
        mesh: Arc<M>,
        equations: usize,
        variables: usize,
        config: &MatrixConfig,
    ) -> Result<Self, MatrixError> {
        let comm = mesh.communicator().clone();
        let (rank, size) = (comm.rank(), comm.size().max(1));
        let n = mesh.global_cell_count();
        let owned = mesh.global_non_overlapping_cell_ids();
        let visible = mesh.global_overlapping_cell_ids();

        let row_map = IndexMap::non_overlapping(
            n * equations as u64,
            block_ids_global(owned, equations, n),
            rank,
            size,
        )?;
        let col_map = IndexMap::non_overlapping(
            n * variables as u64,
            block_ids_global(owned, variables, n),
            rank,
            size,
        )?;
        let overlapping_rows = IndexMap::overlapping(
            n * equations as u64,
            block_ids_global(visible, equations, n),
            &row_map,
        )?;
        let overlapping_cols = IndexMap::overlapping(
            n * variables as u64,
            block_ids_global(visible, variables, n),
            &col_map,
        )?;
        let matrix = DistributedSparseMatrix::with_config(row_map, col_map, config, comm)?;
        log::debug!(
            "mesh matrix on rank {rank}: {} owned / {} visible cells, {equations}x{variables} blocks",
            owned.len(),
            visible.len()
        );
        Ok(Self {
            mesh,
            equations,
            variables,
            overlapping_rows,
            overlapping_cols,
            matrix,
            stencil: StencilCache::new(config.stencil),
        })
    }

    /// Unfilled identity with one equation and one variable per cell.
    pub fn identity(mesh: Arc<M>) -> Result<Self, MatrixError> {
        let mut m = Self::new(mesh, 1, 1, &MatrixConfig::with_bandwidth(1))?;
        m.add_at_diagonal(Diagonal::Uniform(1.0))?;
        Ok(m)
    }

    /// Same mesh and layout around another matrix; the stencil starts empty.
    fn with_matrix(&self, matrix: DistributedSparseMatrix<M::Comm>) -> Self {
        Self {
            mesh: self.mesh.clone(),
            equations: self.equations,
            variables: self.variables,
            overlapping_rows: self.overlapping_rows.clone(),
            overlapping_cols: self.overlapping_cols.clone(),
            matrix,
            stencil: StencilCache::new(self.stencil.policy()),
        }
    }

    /// Use a different tag block for every collective of this matrix.
    pub fn with_tags(mut self, tags: MatrixCommTags) -> Self {
        self.matrix = self.matrix.with_tags(tags);
        self
    }

    pub fn mesh(&self) -> &Arc<M> {
        &self.mesh
    }

    pub fn equations(&self) -> usize {
        self.equations
    }

    pub fn variables(&self) -> usize {
        self.variables
    }

    pub fn matrix(&self) -> &DistributedSparseMatrix<M::Comm> {
        &self.matrix
    }

    pub fn matrix_mut(&mut self) -> &mut DistributedSparseMatrix<M::Comm> {
        &mut self.matrix
    }

    pub fn into_matrix(self) -> DistributedSparseMatrix<M::Comm> {
        self.matrix
    }

    pub fn stencil(&self) -> &StencilCache {
        &self.stencil
    }

    pub fn overlapping_row_map(&self) -> &IndexMap {
        &self.overlapping_rows
    }

    pub fn overlapping_col_map(&self) -> &IndexMap {
        &self.overlapping_cols
    }

    pub fn fill_state(&self) -> FillState {
        self.matrix.fill_state()
    }

    pub fn finalize(&mut self) {
        self.matrix.finalize();
    }

    // ----- row and column IDs -------------------------------------------

    pub fn global_non_overlapping_row_ids(&self) -> Vec<u64> {
        self.matrix.row_map().local_indices().to_vec()
    }

    pub fn global_overlapping_row_ids(&self) -> Vec<u64> {
        self.overlapping_rows.local_indices().to_vec()
    }

    pub fn local_non_overlapping_row_ids(&self) -> Vec<usize> {
        block_ids_local(
            self.mesh.local_non_overlapping_cell_ids(),
            self.equations,
            self.mesh.local_cell_count(),
        )
    }

    pub fn global_non_overlapping_col_ids(&self) -> Vec<u64> {
        self.matrix.col_map().local_indices().to_vec()
    }

    pub fn global_overlapping_col_ids(&self) -> Vec<u64> {
        self.overlapping_cols.local_indices().to_vec()
    }

    pub fn local_non_overlapping_col_ids(&self) -> Vec<usize> {
        block_ids_local(
            self.mesh.local_non_overlapping_cell_ids(),
            self.variables,
            self.mesh.local_cell_count(),
        )
    }

    // ----- writes -------------------------------------------------------

    /// Translate local overlapping triples to global ones on owned rows.
    ///
    /// Returns the surviving values and the stencil that located them.
    pub fn translate(
        &mut self,
        values: &[f64],
        rows: &[usize],
        cols: &[usize],
    ) -> Result<(Vec<f64>, Arc<Stencil>), MatrixError> {
        let (row_map, col_map) = (&self.overlapping_rows, &self.overlapping_cols);
        let stencil = self
            .stencil
            .get_or_translate(rows, cols, |r, c| translate_local(r, c, row_map, col_map))?;
        let values = stencil.select(values)?;
        Ok((values, stencil))
    }

    /// [`DistributedSparseMatrix::replace`] with local overlapping indices.
    /// Collective while the matrix is Unfilled.
    pub fn put(&mut self, values: &[f64], rows: &[usize], cols: &[usize]) -> Result<WriteReport, MatrixError> {
        let (values, st) = self.translate(values, rows, cols)?;
        self.matrix.replace(&values, &st.rows, &st.cols)
    }

    /// [`DistributedSparseMatrix::accumulate`] with local overlapping indices.
    pub fn add_at(&mut self, values: &[f64], rows: &[usize], cols: &[usize]) -> Result<WriteReport, MatrixError> {
        let (values, st) = self.translate(values, rows, cols)?;
        self.matrix.accumulate(&values, &st.rows, &st.cols)
    }

    /// Diagonal triples in local overlapping indices.
    fn local_diagonal(&self, diagonal: Diagonal<'_>) -> Result<(Vec<f64>, Vec<usize>), MatrixError> {
        let n = self
            .overlapping_rows
            .num_local()
            .min(self.overlapping_cols.num_local());
        match diagonal {
            Diagonal::Uniform(v) => Ok((vec![v; n], (0..n).collect())),
            Diagonal::Values(values) if values.len() <= n => {
                Ok((values.to_vec(), (0..values.len()).collect()))
            }
            Diagonal::Values(values) => Err(MatrixError::ShapeMismatch {
                context: "local diagonal values",
                expected: n,
                got: values.len(),
            }),
        }
    }

    /// [`put`](Self::put) along the local diagonal.
    pub fn put_diagonal(&mut self, diagonal: Diagonal<'_>) -> Result<WriteReport, MatrixError> {
        let (values, ids) = self.local_diagonal(diagonal)?;
        self.put(&values, &ids, &ids)
    }

    /// [`add_at`](Self::add_at) along the local diagonal.
    pub fn add_at_diagonal(&mut self, diagonal: Diagonal<'_>) -> Result<WriteReport, MatrixError> {
        let (values, ids) = self.local_diagonal(diagonal)?;
        self.add_at(&values, &ids, &ids)
    }

    /// Discard the matrix, keeping maps and bandwidth. The stored stencil is
    /// kept only when `keep_stencil` is set.
    pub fn flush(&mut self, keep_stencil: bool) {
        self.matrix = self.matrix.emptied();
        self.stencil.flush(keep_stencil);
    }

    // ----- reads --------------------------------------------------------

    /// Diagonal in the overlapping row layout, halo entries imported from
    /// their owners.
    pub fn take_diagonal(&mut self) -> Result<DistributedVector, MatrixError> {
        let owned = self.matrix.take_diagonal()?;
        self.matrix.redistributor().import(&owned, &self.overlapping_rows)
    }

    /// `A x` for `x` in the overlapping column layout; the result is in the
    /// overlapping row layout.
    pub fn matvec_local(&mut self, x: &[f64]) -> Result<Vec<f64>, MatrixError> {
        let fits = if x.len() == self.overlapping_cols.num_local() {
            Ok(())
        } else {
            Err(MatrixError::ShapeMismatch {
                context: "overlapping column vector",
                expected: self.overlapping_cols.num_local(),
                got: x.len(),
            })
        };
        self.matrix.agree_on(fits)?;
        let owned: Vec<f64> = self
            .local_non_overlapping_col_ids()
            .into_iter()
            .map(|i| x[i])
            .collect();
        let xd = DistributedVector::new(self.matrix.col_map().clone(), owned)?;
        let y = self.matrix.matvec_distributed(&xd)?;
        Ok(self.matrix.redistributor().import(&y, &self.overlapping_rows)?.into_values())
    }

    // ----- combination --------------------------------------------------

    pub fn copy(&mut self) -> Self {
        let matrix = self.matrix.copy();
        self.with_matrix(matrix)
    }

    pub fn scaled(&mut self, factor: f64) -> Self {
        let matrix = self.matrix.scaled(factor);
        self.with_matrix(matrix)
    }

    pub fn add(&mut self, other: &mut Self) -> Result<Combined<Self>, MatrixError> {
        let Combined { value, report } = self.matrix.add(&mut other.matrix)?;
        Ok(Combined {
            value: self.with_matrix(value),
            report,
        })
    }

    pub fn subtract(&mut self, other: &mut Self) -> Result<Combined<Self>, MatrixError> {
        let Combined { value, report } = self.matrix.subtract(&mut other.matrix)?;
        Ok(Combined {
            value: self.with_matrix(value),
            report,
        })
    }

    pub fn in_place_add(&mut self, other: &mut Self) -> Result<WriteReport, MatrixError> {
        self.matrix.in_place_add(&mut other.matrix)
    }
}

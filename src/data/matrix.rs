//! Row-partitioned sparse matrix with a two-phase fill lifecycle.
//!
//! A [`DistributedSparseMatrix`] starts [`FillState::Unfilled`]: writes add
//! structural positions and repeated positions sum. [`finalize`] freezes the
//! structure once; afterwards only values at existing positions change, and
//! writes to missing positions are dropped and reported in a [`WriteReport`]
//! rather than failing the call.
//!
//! Every rank stores only the rows its row map owns. Methods that touch other
//! ranks' rows (combination, products, export, dense views, global counts)
//! are collective and must be called by every rank in the same order.
//!
//! [`finalize`]: DistributedSparseMatrix::finalize

use crate::algs::communicator::Communicator;
use crate::algs::exchange::{
    MatrixCommTags, all_gather, all_reduce_and, all_reduce_count, all_reduce_sum_slice, all_to_all,
    fetch_by_index, gather_to_root,
};
use crate::algs::redistribute::VectorRedistributor;
use crate::algs::wire::{WireEntry, WireSlot};
use crate::config::MatrixConfig;
use crate::data::crs::{Csr, OpenRows, RowLayout};
use crate::data::vector::DistributedVector;
use crate::debug_invariants::DebugInvariants;
use crate::io::matrix_market::{MarketMatrix, MatrixMarketReader, MatrixMarketWriter, Triplet};
use crate::matrix_error::{Combined, DropReason, DroppedEntry, MatrixError, WriteOp, WriteReport};
use crate::topology::index_map::{IndexMap, MapKind};
use hashbrown::HashMap;
use itertools::{Itertools, izip};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use std::sync::Arc;

/// Lifecycle state of a matrix.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub enum FillState {
    /// Structure still open; repeated positions sum.
    Unfilled,
    /// Structure frozen.
    Filled,
}

/// Diagonal argument of [`put_diagonal`](DistributedSparseMatrix::put_diagonal)
/// and [`add_at_diagonal`](DistributedSparseMatrix::add_at_diagonal).
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum Diagonal<'a> {
    /// The same value on every diagonal position.
    Uniform(f64),
    /// A replicated vector; entry `i` goes to `(i, i)`. May be shorter than
    /// the diagonal, leaving the trailing positions untouched.
    Values(&'a [f64]),
}

/// Right-hand side of [`multiply`](DistributedSparseMatrix::multiply).
pub enum Operand<'a, C> {
    Scalar(f64),
    /// Replicated vector of the global column length.
    Vector(&'a [f64]),
    /// Vector laid out on the column map.
    Distributed(&'a DistributedVector),
    Matrix(&'a mut DistributedSparseMatrix<C>),
}

/// Result of [`multiply`](DistributedSparseMatrix::multiply), shaped by the operand.
pub enum Product<C> {
    Matrix(DistributedSparseMatrix<C>),
    Vector(Vec<f64>),
    Distributed(DistributedVector),
}

impl<C> Product<C> {
    pub fn into_matrix(self) -> Option<DistributedSparseMatrix<C>> {
        match self {
            Product::Matrix(m) => Some(m),
            _ => None,
        }
    }

    pub fn into_vector(self) -> Option<Vec<f64>> {
        match self {
            Product::Vector(v) => Some(v),
            _ => None,
        }
    }

    pub fn into_distributed(self) -> Option<DistributedVector> {
        match self {
            Product::Distributed(v) => Some(v),
            _ => None,
        }
    }
}

/// Sparse matrix whose rows are partitioned by a non-overlapping row map.
pub struct DistributedSparseMatrix<C> {
    row_map: IndexMap,
    col_map: IndexMap,
    layout: Arc<RowLayout>,
    /// `Some` while Unfilled.
    open: Option<OpenRows>,
    /// Frozen rows; empty while Unfilled.
    frozen: Csr,
    bandwidth: usize,
    comm: Arc<C>,
    tags: MatrixCommTags,
}

impl<C> Clone for DistributedSparseMatrix<C> {
    fn clone(&self) -> Self {
        Self {
            row_map: self.row_map.clone(),
            col_map: self.col_map.clone(),
            layout: self.layout.clone(),
            open: self.open.clone(),
            frozen: self.frozen.clone(),
            bandwidth: self.bandwidth,
            comm: self.comm.clone(),
            tags: self.tags,
        }
    }
}

impl<C> fmt::Debug for DistributedSparseMatrix<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributedSparseMatrix")
            .field("rows", &self.row_map.global_size())
            .field("cols", &self.col_map.global_size())
            .field("owned_rows", &self.layout.len())
            .field("filled", &self.open.is_none())
            .field("bandwidth", &self.bandwidth)
            .finish()
    }
}

impl<C: Communicator> DistributedSparseMatrix<C> {
    /// Empty Unfilled matrix over the given maps.
    ///
    /// Both maps must be non-overlapping and built for this communicator's
    /// rank and size.
    pub fn new(
        row_map: IndexMap,
        col_map: IndexMap,
        bandwidth: usize,
        comm: Arc<C>,
    ) -> Result<Self, MatrixError> {
        for (name, map) in [("row", &row_map), ("column", &col_map)] {
            if map.kind() != MapKind::NonOverlapping {
                return Err(MatrixError::InvalidPartition(format!(
                    "{name} map of a matrix must be non-overlapping"
                )));
            }
            if map.rank() != comm.rank() || map.size() != comm.size().max(1) {
                return Err(MatrixError::InvalidPartition(format!(
                    "{name} map built for rank {}/{} used on rank {}/{}",
                    map.rank(),
                    map.size(),
                    comm.rank(),
                    comm.size()
                )));
            }
        }
        Ok(Self::assemble(row_map, col_map, bandwidth, comm))
    }

    /// Like [`new`](Self::new) with bandwidth taken from `config`.
    pub fn with_config(
        row_map: IndexMap,
        col_map: IndexMap,
        config: &MatrixConfig,
        comm: Arc<C>,
    ) -> Result<Self, MatrixError> {
        let bandwidth = config.effective_bandwidth(row_map.global_size(), col_map.global_size());
        Self::new(row_map, col_map, bandwidth, comm)
    }

    /// `rows x cols` matrix whose rows all live on rank 0.
    pub fn on_root(rows: u64, cols: u64, bandwidth: usize, comm: Arc<C>) -> Self {
        let (rank, size) = (comm.rank(), comm.size().max(1));
        Self::assemble(
            IndexMap::on_root(rows, rank, size),
            IndexMap::on_root(cols, rank, size),
            bandwidth,
            comm,
        )
    }

    /// `rows x cols` matrix with rows spread in contiguous blocks.
    pub fn contiguous(rows: u64, cols: u64, bandwidth: usize, comm: Arc<C>) -> Self {
        let (rank, size) = (comm.rank(), comm.size().max(1));
        Self::assemble(
            IndexMap::contiguous(rows, rank, size),
            IndexMap::contiguous(cols, rank, size),
            bandwidth,
            comm,
        )
    }

    /// Unfilled `size x size` identity with rows on rank 0.
    pub fn identity(size: u64, comm: Arc<C>) -> Result<Self, MatrixError> {
        let mut m = Self::on_root(size, size, 1, comm);
        m.add_at_diagonal(Diagonal::Uniform(1.0))?;
        Ok(m)
    }

    /// Unfilled identity over a square `map`.
    pub fn identity_on(map: IndexMap, comm: Arc<C>) -> Result<Self, MatrixError> {
        let mut m = Self::new(map.clone(), map, 1, comm)?;
        m.add_at_diagonal(Diagonal::Uniform(1.0))?;
        Ok(m)
    }

    fn assemble(row_map: IndexMap, col_map: IndexMap, bandwidth: usize, comm: Arc<C>) -> Self {
        let layout = Arc::new(RowLayout::new(row_map.owned_indices()));
        let open = OpenRows::new(layout.len(), MatrixConfig::row_reserve(bandwidth));
        let frozen = Csr::empty(layout.len());
        Self {
            row_map,
            col_map,
            layout,
            open: Some(open),
            frozen,
            bandwidth,
            comm,
            tags: MatrixCommTags::default(),
        }
    }

    /// Fresh Unfilled matrix with the same maps, bandwidth and tags.
    pub fn emptied(&self) -> Self {
        Self::assemble(
            self.row_map.clone(),
            self.col_map.clone(),
            self.bandwidth,
            self.comm.clone(),
        )
        .with_tags(self.tags)
    }

    /// A Filled matrix over `layout` with storage `frozen`.
    fn from_frozen(
        row_map: IndexMap,
        col_map: IndexMap,
        layout: Arc<RowLayout>,
        mut frozen: Csr,
        bandwidth: usize,
        comm: Arc<C>,
    ) -> Self {
        frozen.compact();
        let m = Self {
            row_map,
            col_map,
            layout,
            open: None,
            frozen,
            bandwidth,
            comm,
            tags: MatrixCommTags::default(),
        };
        m.debug_assert_invariants();
        m
    }

    /// Use a different tag block for this matrix's collectives.
    pub fn with_tags(mut self, tags: MatrixCommTags) -> Self {
        self.tags = tags;
        self
    }

    pub fn row_map(&self) -> &IndexMap {
        &self.row_map
    }

    pub fn col_map(&self) -> &IndexMap {
        &self.col_map
    }

    pub fn comm(&self) -> &Arc<C> {
        &self.comm
    }

    pub fn tags(&self) -> MatrixCommTags {
        self.tags
    }

    /// `(global rows, global cols)`.
    pub fn global_shape(&self) -> (u64, u64) {
        (self.row_map.global_size(), self.col_map.global_size())
    }

    pub fn bandwidth(&self) -> usize {
        self.bandwidth
    }

    pub fn fill_state(&self) -> FillState {
        if self.open.is_some() {
            FillState::Unfilled
        } else {
            FillState::Filled
        }
    }

    pub fn is_filled(&self) -> bool {
        self.open.is_none()
    }

    /// Stored entries on this rank. Before finalize this counts every
    /// inserted value, repeats included.
    pub fn num_local_nonzeros(&self) -> usize {
        match &self.open {
            Some(open) => open.pending(),
            None => self.frozen.nnz(),
        }
    }

    /// Sum of [`num_local_nonzeros`](Self::num_local_nonzeros) over all ranks.
    pub fn num_global_nonzeros(&self) -> Result<usize, MatrixError> {
        all_reduce_count(&*self.comm, self.tags.reduce, self.num_local_nonzeros())
    }

    // ----- writes -------------------------------------------------------

    fn check_triples(&self, values: &[f64], rows: &[u64], cols: &[u64]) -> Result<(), MatrixError> {
        for (context, len) in [("row indices", rows.len()), ("column indices", cols.len())] {
            if len != values.len() {
                return Err(MatrixError::ShapeMismatch {
                    context,
                    expected: values.len(),
                    got: len,
                });
            }
        }
        let (n_rows, n_cols) = self.global_shape();
        if let Some(&r) = rows.iter().find(|&&r| r >= n_rows) {
            return Err(MatrixError::IndexOutOfBounds {
                index: r,
                bound: n_rows,
            });
        }
        if let Some(&c) = cols.iter().find(|&&c| c >= n_cols) {
            return Err(MatrixError::IndexOutOfBounds {
                index: c,
                bound: n_cols,
            });
        }
        Ok(())
    }

    /// Add structural positions. Only legal while Unfilled.
    pub fn insert(&mut self, values: &[f64], rows: &[u64], cols: &[u64]) -> Result<WriteReport, MatrixError> {
        self.check_triples(values, rows, cols)?;
        let Some(open) = self.open.as_mut() else {
            return Err(MatrixError::Structural { operation: "insert" });
        };
        let mut dropped = Vec::new();
        push_open(open, &self.layout, values, rows, cols, &mut dropped);
        Ok(WriteReport::from_call(WriteOp::Insert, dropped))
    }

    /// Sum `values` into `(rows[i], cols[i])`.
    ///
    /// Unfilled: same as [`insert`](Self::insert). Filled: positions without a
    /// structural entry are dropped and reported; the rest are applied.
    pub fn accumulate(&mut self, values: &[f64], rows: &[u64], cols: &[u64]) -> Result<WriteReport, MatrixError> {
        self.check_triples(values, rows, cols)?;
        let mut dropped = Vec::new();
        match self.open.as_mut() {
            Some(open) => push_open(open, &self.layout, values, rows, cols, &mut dropped),
            None => write_frozen(&mut self.frozen, &self.layout, values, rows, cols, Mode::Sum, &mut dropped),
        }
        Ok(WriteReport::from_call(WriteOp::Accumulate, dropped))
    }

    /// Overwrite `(rows[i], cols[i])` with `values`.
    ///
    /// On an empty Unfilled matrix this is a plain insert. On a non-empty
    /// Unfilled matrix the positions are first inserted as zeros and the
    /// matrix is finalized, so the call replaces earlier values instead of
    /// summing with them. On a Filled matrix missing positions are dropped and
    /// reported. Collective while Unfilled, so all ranks finalize together.
    pub fn replace(&mut self, values: &[f64], rows: &[u64], cols: &[u64]) -> Result<WriteReport, MatrixError> {
        self.check_triples(values, rows, cols)?;
        if let Some(open) = &self.open {
            let empty = all_reduce_and(&*self.comm, self.tags.reduce, open.is_empty())?;
            if !empty {
                if let Some(open) = self.open.as_mut() {
                    for (&r, &c) in rows.iter().zip(cols) {
                        if let Some(slot) = self.layout.slot(r) {
                            open.push(slot, c, 0.0);
                        }
                    }
                }
                self.finalize();
            }
        }
        let mut dropped = Vec::new();
        match self.open.as_mut() {
            Some(open) => push_open(open, &self.layout, values, rows, cols, &mut dropped),
            None => write_frozen(&mut self.frozen, &self.layout, values, rows, cols, Mode::Set, &mut dropped),
        }
        Ok(WriteReport::from_call(WriteOp::Replace, dropped))
    }

    fn diagonal_triples(&self, diagonal: Diagonal<'_>) -> Result<(Vec<f64>, Vec<u64>), MatrixError> {
        let (n_rows, n_cols) = self.global_shape();
        let n = n_rows.min(n_cols);
        let owned = self.layout.rows().iter().copied();
        Ok(match diagonal {
            Diagonal::Uniform(v) => owned.filter(|&r| r < n).map(|r| (v, r)).unzip(),
            Diagonal::Values(values) => {
                if values.len() as u64 > n {
                    return Err(MatrixError::ShapeMismatch {
                        context: "diagonal values",
                        expected: n as usize,
                        got: values.len(),
                    });
                }
                owned
                    .filter(|&r| r < values.len() as u64)
                    .map(|r| (values[r as usize], r))
                    .unzip()
            }
        })
    }

    /// [`replace`](Self::replace) along the diagonal of the owned rows.
    pub fn put_diagonal(&mut self, diagonal: Diagonal<'_>) -> Result<WriteReport, MatrixError> {
        let (values, ids) = self.diagonal_triples(diagonal)?;
        self.replace(&values, &ids, &ids)
    }

    /// [`accumulate`](Self::accumulate) along the diagonal of the owned rows.
    pub fn add_at_diagonal(&mut self, diagonal: Diagonal<'_>) -> Result<WriteReport, MatrixError> {
        let (values, ids) = self.diagonal_triples(diagonal)?;
        self.accumulate(&values, &ids, &ids)
    }

    /// Multiply every stored value by `factor`. Structure is unchanged.
    pub fn scale(&mut self, factor: f64) {
        match self.open.as_mut() {
            Some(open) => open.scale(factor),
            None => self.frozen.values_mut().iter_mut().for_each(|v| *v *= factor),
        }
    }

    // ----- lifecycle ----------------------------------------------------

    /// Freeze the structure. Idempotent; storage is compacted at most once.
    pub fn finalize(&mut self) {
        if let Some(open) = self.open.take() {
            let pending = open.pending();
            self.frozen = open.freeze();
            log::debug!(
                "finalize: {} owned rows, {pending} inserted values -> {} entries",
                self.layout.len(),
                self.frozen.nnz()
            );
        }
        if self.frozen.compact() {
            log::trace!("finalize: storage compacted");
        }
        self.debug_assert_invariants();
    }

    /// Guard run by every read operation.
    #[inline]
    pub fn ensure_finalized(&mut self) {
        if self.open.is_some() || !self.frozen.is_compacted() {
            self.finalize();
        }
    }

    /// Finalize, then clone.
    pub fn copy(&mut self) -> Self {
        self.ensure_finalized();
        self.clone()
    }

    /// Finalized copy scaled by `factor`.
    pub fn scaled(&mut self, factor: f64) -> Self {
        let mut m = self.copy();
        m.scale(factor);
        m
    }

    /// `(global row, global col, value)` of the frozen local rows.
    fn local_entries(&self) -> impl Iterator<Item = (u64, u64, f64)> + '_ {
        self.frozen
            .iter()
            .map(|(slot, c, v)| (self.layout.row(slot), c, v))
    }

    /// Finalize, then list the locally stored `(row, col, value)` triples.
    pub fn entries(&mut self) -> Vec<(u64, u64, f64)> {
        self.ensure_finalized();
        self.local_entries().collect()
    }

    /// This matrix's frozen entries that `target` owns on this rank.
    ///
    /// When the row maps agree everywhere the local rows are returned as is;
    /// otherwise every rank's entries are gathered and filtered.
    fn routed_entries(&self, target: &IndexMap) -> Result<Vec<(u64, u64, f64)>, MatrixError> {
        let same = all_reduce_and(&*self.comm, self.tags.reduce, self.row_map.same_as(target))?;
        if same {
            return Ok(self.local_entries().collect());
        }
        let local: Vec<WireEntry> = self
            .local_entries()
            .map(|(r, c, v)| WireEntry::new(r, c, v))
            .collect();
        let parts = all_gather(&*self.comm, self.tags.rows, &local)?;
        Ok(parts
            .iter()
            .flatten()
            .filter(|e| target.is_owned(e.row()))
            .map(|e| (e.row(), e.col(), e.value()))
            .collect())
    }

    fn check_same_shape(&self, other: &Self, context: &'static str) -> Result<(), MatrixError> {
        let (a, b) = (self.global_shape(), other.global_shape());
        if a.0 != b.0 {
            return Err(MatrixError::ShapeMismatch {
                context,
                expected: a.0 as usize,
                got: b.0 as usize,
            });
        }
        if a.1 != b.1 {
            return Err(MatrixError::ShapeMismatch {
                context,
                expected: a.1 as usize,
                got: b.1 as usize,
            });
        }
        Ok(())
    }

    /// `self += factor * other`, for a Filled `other`.
    fn accumulate_matrix(&mut self, other: &Self, factor: f64) -> Result<WriteReport, MatrixError> {
        let triples = other.routed_entries(&self.row_map)?;
        let (values, rows, cols): (Vec<f64>, Vec<u64>, Vec<u64>) = triples
            .into_iter()
            .map(|(r, c, v)| (factor * v, r, c))
            .multiunzip();
        self.accumulate(&values, &rows, &cols)
    }

    // ----- combination --------------------------------------------------

    /// `self + other` as a new matrix.
    ///
    /// Both operands are finalized. The one with more global nonzeros is
    /// copied and the other summed into the copy, so when one pattern is a
    /// structural subset of the other the result has the larger pattern and no
    /// value is dropped. Otherwise entries outside the copied pattern are
    /// dropped and listed in the report.
    pub fn add(&mut self, other: &mut Self) -> Result<Combined<Self>, MatrixError> {
        self.combine(other, 1.0)
    }

    /// `self - other` as a new matrix; see [`add`](Self::add).
    pub fn subtract(&mut self, other: &mut Self) -> Result<Combined<Self>, MatrixError> {
        self.combine(other, -1.0)
    }

    fn combine(&mut self, other: &mut Self, sign: f64) -> Result<Combined<Self>, MatrixError> {
        self.check_same_shape(other, "matrix combination")?;
        self.ensure_finalized();
        other.ensure_finalized();
        let mine = self.num_global_nonzeros()?;
        let theirs = other.num_global_nonzeros()?;
        let (value, report) = if mine > theirs {
            let mut out = self.clone();
            let report = out.accumulate_matrix(other, sign)?;
            (out, report)
        } else {
            let mut out = other.clone();
            out.scale(sign);
            let report = out.accumulate_matrix(self, 1.0)?;
            (out, report)
        };
        Ok(Combined { value, report })
    }

    /// `self += other`.
    ///
    /// When `self` is Filled and holds fewer nonzeros than `other`, both are
    /// summed into a scratch matrix sized for `other` and `self`'s storage is
    /// replaced by it; the result is then Unfilled.
    pub fn in_place_add(&mut self, other: &mut Self) -> Result<WriteReport, MatrixError> {
        self.check_same_shape(other, "in-place addition")?;
        other.ensure_finalized();
        if !self.is_filled() {
            return self.accumulate_matrix(other, 1.0);
        }
        let mine = self.num_global_nonzeros()?;
        let theirs = other.num_global_nonzeros()?;
        if theirs <= mine {
            return self.accumulate_matrix(other, 1.0);
        }
        let rows = self.row_map.global_size().max(1) as usize;
        let bandwidth = theirs / rows + 1;
        let mut scratch = Self::assemble(self.row_map.clone(), self.col_map.clone(), bandwidth, self.comm.clone())
            .with_tags(self.tags);
        let mut report = scratch.accumulate_matrix(other, 1.0)?;
        report.merge(scratch.accumulate_matrix(self, 1.0)?);
        log::debug!("in_place_add: storage swapped for a scratch matrix of bandwidth {bandwidth}");
        self.layout = scratch.layout;
        self.open = scratch.open;
        self.frozen = scratch.frozen;
        Ok(report)
    }

    /// Whether every stored position of `self` is also stored in `other`.
    /// Collective.
    pub fn is_structural_subset_of(&mut self, other: &mut Self) -> Result<bool, MatrixError> {
        self.check_same_shape(other, "structural comparison")?;
        self.ensure_finalized();
        other.ensure_finalized();
        let mine = self.routed_entries(&other.row_map)?;
        let local = mine.iter().all(|&(r, c, _)| {
            other
                .layout
                .slot(r)
                .is_some_and(|slot| other.frozen.find(slot, c).is_some())
        });
        all_reduce_and(&*self.comm, self.tags.reduce, local)
    }

    // ----- products -----------------------------------------------------

    /// Multiply by a scalar, vector or matrix.
    pub fn multiply(&mut self, rhs: Operand<'_, C>) -> Result<Product<C>, MatrixError> {
        Ok(match rhs {
            Operand::Scalar(s) => Product::Matrix(self.scaled(s)),
            Operand::Vector(x) => Product::Vector(self.matvec(x)?),
            Operand::Distributed(x) => Product::Distributed(self.matvec_distributed(x)?),
            Operand::Matrix(b) => Product::Matrix(self.matmul(b)?),
        })
    }

    fn row_products<F>(&self, x: F) -> Vec<f64>
    where
        F: Fn(u64) -> f64 + Sync,
    {
        let dot = |slot: usize| {
            let (cols, vals) = self.frozen.row(slot);
            cols.iter().zip(vals).map(|(&c, &v)| v * x(c)).sum::<f64>()
        };
        #[cfg(feature = "rayon")]
        {
            use rayon::prelude::*;
            (0..self.layout.len()).into_par_iter().map(dot).collect()
        }
        #[cfg(not(feature = "rayon"))]
        {
            (0..self.layout.len()).map(dot).collect()
        }
    }

    /// Vector redistributor sharing this matrix's communicator and tags.
    pub fn redistributor(&self) -> VectorRedistributor<C> {
        VectorRedistributor::with_tags(self.comm.clone(), self.tags)
    }

    /// Collective verdict on an operand check that only this rank can make.
    ///
    /// Every rank fails together, so none is left waiting in a later
    /// collective while a peer has already returned.
    pub(crate) fn agree_on(&self, local: Result<(), MatrixError>) -> Result<(), MatrixError> {
        let all_ok = all_reduce_and(&*self.comm, self.tags.reduce, local.is_ok())?;
        local?;
        if !all_ok {
            return Err(MatrixError::UnsupportedOperation(
                "operand rejected on another rank".into(),
            ));
        }
        Ok(())
    }

    /// `A x` for a replicated `x`; every rank receives the full result.
    pub fn matvec(&mut self, x: &[f64]) -> Result<Vec<f64>, MatrixError> {
        let (_, n_cols) = self.global_shape();
        let fits = if x.len() as u64 == n_cols {
            Ok(())
        } else {
            Err(MatrixError::ShapeMismatch {
                context: "matrix-vector operand",
                expected: n_cols as usize,
                got: x.len(),
            })
        };
        self.agree_on(fits)?;
        self.ensure_finalized();
        let local = self.row_products(|c| x[c as usize]);
        let y = DistributedVector::new(self.row_map.clone(), local)?;
        self.redistributor().gather_to_replica(&y)
    }

    /// `A x` for `x` on the column map; the result lies on the row map.
    pub fn matvec_distributed(&mut self, x: &DistributedVector) -> Result<DistributedVector, MatrixError> {
        let fits = if x.map().same_as(&self.col_map) {
            Ok(())
        } else {
            Err(MatrixError::UnsupportedOperation(
                "distributed operand must be laid out on the column map".into(),
            ))
        };
        self.agree_on(fits)?;
        self.ensure_finalized();
        let wanted: Vec<u64> = self
            .frozen
            .iter()
            .map(|(_, c, _)| c)
            .filter(|&c| !x.map().is_owned(c))
            .sorted_unstable()
            .dedup()
            .collect();
        let replies: Vec<WireSlot> = fetch_by_index(&*self.comm, self.tags.import, &wanted, |g, out| {
            if let Some(v) = x.get(g).filter(|_| x.map().is_owned(g)) {
                out.push(WireSlot::new(g, v));
            }
        })?;
        let halo: HashMap<u64, f64> = replies.iter().map(|s| (s.index(), s.value())).collect();
        let local = self.row_products(|c| x.get(c).or_else(|| halo.get(&c).copied()).unwrap_or(0.0));
        DistributedVector::new(self.row_map.clone(), local)
    }

    /// `x^T A` for a replicated `x`; every rank receives the full result.
    pub fn left_multiply(&mut self, x: &[f64]) -> Result<Vec<f64>, MatrixError> {
        let (n_rows, n_cols) = self.global_shape();
        let fits = if x.len() as u64 == n_rows {
            Ok(())
        } else {
            Err(MatrixError::ShapeMismatch {
                context: "vector-matrix operand",
                expected: n_rows as usize,
                got: x.len(),
            })
        };
        self.agree_on(fits)?;
        self.ensure_finalized();
        let mut y = vec![0.0; n_cols as usize];
        for (r, c, v) in self.local_entries() {
            y[c as usize] += v * x[r as usize];
        }
        all_reduce_sum_slice(&*self.comm, self.tags.reduce, &mut y)?;
        Ok(y)
    }

    /// `A B` as a new Filled matrix on `A`'s rows and `B`'s columns.
    ///
    /// The rows of `B` referenced by local columns of `A` are fetched from
    /// their owners. Product positions that cancel to zero stay stored.
    pub fn matmul(&mut self, other: &mut Self) -> Result<Self, MatrixError> {
        let (_, inner) = self.global_shape();
        let (other_rows, _) = other.global_shape();
        if inner != other_rows {
            return Err(MatrixError::ShapeMismatch {
                context: "matrix product inner dimension",
                expected: inner as usize,
                got: other_rows as usize,
            });
        }
        self.ensure_finalized();
        other.ensure_finalized();
        let wanted: Vec<u64> = self
            .frozen
            .iter()
            .map(|(_, c, _)| c)
            .sorted_unstable()
            .dedup()
            .collect();
        let b: &Self = other;
        let fetched: Vec<WireEntry> = fetch_by_index(&*self.comm, self.tags.rows, &wanted, |g, out| {
            if let Some(slot) = b.layout.slot(g) {
                let (cols, vals) = b.frozen.row(slot);
                out.extend(cols.iter().zip(vals).map(|(&c, &v)| WireEntry::new(g, c, v)));
            }
        })?;
        let mut b_rows: HashMap<u64, Vec<(u64, f64)>> = HashMap::new();
        for e in &fetched {
            b_rows.entry(e.row()).or_default().push((e.col(), e.value()));
        }

        let bandwidth = self.bandwidth.max(other.bandwidth);
        let mut open = OpenRows::new(self.layout.len(), MatrixConfig::row_reserve(bandwidth));
        let mut acc: BTreeMap<u64, f64> = BTreeMap::new();
        for slot in 0..self.layout.len() {
            acc.clear();
            let (cols, vals) = self.frozen.row(slot);
            for (k, &a) in cols.iter().zip(vals) {
                for &(j, bkj) in b_rows.get(k).into_iter().flatten() {
                    *acc.entry(j).or_insert(0.0) += a * bkj;
                }
            }
            for (&j, &v) in &acc {
                open.push(slot, j, v);
            }
        }
        Ok(Self::from_frozen(
            self.row_map.clone(),
            other.col_map.clone(),
            self.layout.clone(),
            open.freeze(),
            bandwidth,
            self.comm.clone(),
        )
        .with_tags(self.tags))
    }

    // ----- extraction ---------------------------------------------------

    /// Arbitrary-position reads are not supported; always fails.
    pub fn take(&self, rows: &[u64], cols: &[u64]) -> Result<Vec<f64>, MatrixError> {
        log::warn!(
            "take of {} position(s) from a distributed matrix is not supported",
            rows.len().max(cols.len())
        );
        Err(MatrixError::UnsupportedOperation(
            "take from a distributed sparse matrix".into(),
        ))
    }

    /// Diagonal values of the owned rows; unstored diagonal positions are zero.
    pub fn take_diagonal(&mut self) -> Result<DistributedVector, MatrixError> {
        self.ensure_finalized();
        let values = self
            .layout
            .rows()
            .iter()
            .enumerate()
            .map(|(slot, &r)| {
                self.frozen
                    .find(slot, r)
                    .map_or(0.0, |pos| self.frozen.values()[pos])
            })
            .collect();
        DistributedVector::new(self.row_map.clone(), values)
    }

    /// Gather every row to rank 0. Other ranks receive `None`.
    fn gather_market(&mut self) -> Result<Option<MarketMatrix>, MatrixError> {
        self.ensure_finalized();
        let local: Vec<WireEntry> = self
            .local_entries()
            .map(|(r, c, v)| WireEntry::new(r, c, v))
            .collect();
        let (rows, cols) = self.global_shape();
        let gathered = gather_to_root(&*self.comm, self.tags.export, 0, &local)?;
        Ok(gathered.map(|parts| {
            let entries = parts
                .iter()
                .flatten()
                .map(|e| Triplet {
                    row: e.row(),
                    col: e.col(),
                    value: e.value(),
                })
                .collect();
            MarketMatrix::new(rows, cols, entries)
        }))
    }

    /// Write the whole matrix in Matrix Market format. Collective; only rank
    /// 0 writes to `writer`.
    pub fn export_matrix_market<W: Write>(&mut self, writer: W) -> Result<(), MatrixError> {
        if let Some(market) = self.gather_market()? {
            MatrixMarketWriter.write(writer, &market)?;
        }
        Ok(())
    }

    /// [`export_matrix_market`](Self::export_matrix_market) into a file
    /// created by rank 0.
    pub fn export_mmf<P: AsRef<Path>>(&mut self, path: P) -> Result<(), MatrixError> {
        if let Some(market) = self.gather_market()? {
            let file = std::fs::File::create(path)?;
            MatrixMarketWriter.write(BufWriter::new(file), &market)?;
        }
        Ok(())
    }

    /// Read a Matrix Market stream; each rank keeps the rows `row_map` owns.
    /// The result is Filled.
    pub fn from_matrix_market<R: Read>(
        reader: R,
        row_map: IndexMap,
        col_map: IndexMap,
        comm: Arc<C>,
    ) -> Result<Self, MatrixError> {
        let market = MatrixMarketReader.read(reader)?;
        for (context, expected, got) in [
            ("imported row count", row_map.global_size(), market.rows),
            ("imported column count", col_map.global_size(), market.cols),
        ] {
            if expected != got {
                return Err(MatrixError::ShapeMismatch {
                    context,
                    expected: expected as usize,
                    got: got as usize,
                });
            }
        }
        let bandwidth = market.entries.len().div_ceil(market.rows.max(1) as usize);
        let mut m = Self::new(row_map, col_map, bandwidth, comm)?;
        let (values, rows, cols): (Vec<f64>, Vec<u64>, Vec<u64>) = market
            .entries
            .iter()
            .filter(|t| m.row_map.is_owned(t.row))
            .map(|t| (t.value, t.row, t.col))
            .multiunzip();
        m.insert(&values, &rows, &cols)?;
        m.finalize();
        Ok(m)
    }

    /// Dense replicated copy; every rank receives all rows.
    pub fn to_dense(&mut self) -> Result<Vec<Vec<f64>>, MatrixError> {
        Ok(self
            .table()?
            .cells
            .into_iter()
            .map(|row| row.into_iter().map(|v| v.unwrap_or(0.0)).collect())
            .collect())
    }

    /// Replicated printable view distinguishing stored from unstored positions.
    pub fn table(&mut self) -> Result<MatrixTable, MatrixError> {
        self.ensure_finalized();
        let local: Vec<WireEntry> = self
            .local_entries()
            .map(|(r, c, v)| WireEntry::new(r, c, v))
            .collect();
        let parts = all_gather(&*self.comm, self.tags.gather, &local)?;
        let (rows, cols) = self.global_shape();
        let mut cells = vec![vec![None; cols as usize]; rows as usize];
        for e in parts.iter().flatten() {
            cells[e.row() as usize][e.col() as usize] = Some(e.value());
        }
        Ok(MatrixTable { cells })
    }

    /// An equivalent Filled matrix with rows and columns spread evenly in
    /// contiguous blocks over all ranks.
    pub fn rebalanced(&mut self) -> Result<Self, MatrixError> {
        self.ensure_finalized();
        let (rows, cols) = self.global_shape();
        let (rank, size) = (self.comm.rank(), self.comm.size().max(1));
        let row_map = IndexMap::contiguous(rows, rank, size);
        let col_map = IndexMap::contiguous(cols, rank, size);
        let mut outgoing = vec![Vec::new(); size];
        for (r, c, v) in self.local_entries() {
            outgoing[IndexMap::contiguous_owner(rows, size, r)].push(WireEntry::new(r, c, v));
        }
        let incoming = all_to_all(&*self.comm, self.tags.rebalance, outgoing)?;
        let layout = Arc::new(RowLayout::new(row_map.owned_indices()));
        let mut open = OpenRows::new(layout.len(), MatrixConfig::row_reserve(self.bandwidth));
        for e in incoming.iter().flatten() {
            if let Some(slot) = layout.slot(e.row()) {
                open.push(slot, e.col(), e.value());
            }
        }
        log::debug!(
            "rebalanced: rank {rank} now owns {} rows, {} entries",
            layout.len(),
            open.pending()
        );
        Ok(Self::from_frozen(
            row_map,
            col_map,
            layout,
            open.freeze(),
            self.bandwidth,
            self.comm.clone(),
        )
        .with_tags(self.tags))
    }
}

#[derive(Copy, Clone)]
enum Mode {
    Sum,
    Set,
}

fn push_open(
    open: &mut OpenRows,
    layout: &RowLayout,
    values: &[f64],
    rows: &[u64],
    cols: &[u64],
    dropped: &mut Vec<DroppedEntry>,
) {
    for (&value, &row, &col) in izip!(values, rows, cols) {
        match layout.slot(row) {
            Some(slot) => open.push(slot, col, value),
            None => dropped.push(DroppedEntry {
                row,
                col,
                value,
                reason: DropReason::UnownedRow,
            }),
        }
    }
}

fn write_frozen(
    csr: &mut Csr,
    layout: &RowLayout,
    values: &[f64],
    rows: &[u64],
    cols: &[u64],
    mode: Mode,
    dropped: &mut Vec<DroppedEntry>,
) {
    for (&value, &row, &col) in izip!(values, rows, cols) {
        let Some(slot) = layout.slot(row) else {
            dropped.push(DroppedEntry {
                row,
                col,
                value,
                reason: DropReason::UnownedRow,
            });
            continue;
        };
        match csr.find(slot, col) {
            Some(pos) => match mode {
                Mode::Sum => *csr.value_mut(pos) += value,
                Mode::Set => *csr.value_mut(pos) = value,
            },
            None => dropped.push(DroppedEntry {
                row,
                col,
                value,
                reason: DropReason::NoStructuralEntry,
            }),
        }
    }
}

impl<C: Communicator> DebugInvariants for DistributedSparseMatrix<C> {
    fn validate_invariants(&self) -> Result<(), MatrixError> {
        self.row_map.validate_invariants()?;
        self.col_map.validate_invariants()?;
        if self.layout.len() != self.row_map.num_owned() {
            return Err(MatrixError::ShapeMismatch {
                context: "row layout",
                expected: self.row_map.num_owned(),
                got: self.layout.len(),
            });
        }
        if self.open.is_some() {
            return Ok(());
        }
        if self.frozen.n_rows() != self.layout.len() {
            return Err(MatrixError::ShapeMismatch {
                context: "frozen row count",
                expected: self.layout.len(),
                got: self.frozen.n_rows(),
            });
        }
        self.frozen.check().map_err(MatrixError::CorruptStorage)?;
        let n_cols = self.col_map.global_size();
        if let Some((_, c, _)) = self.frozen.iter().find(|&(_, c, _)| c >= n_cols) {
            return Err(MatrixError::IndexOutOfBounds {
                index: c,
                bound: n_cols,
            });
        }
        Ok(())
    }
}

/// Replicated cell view of a matrix; `None` marks an unstored position.
#[derive(Clone, Debug, PartialEq)]
pub struct MatrixTable {
    pub cells: Vec<Vec<Option<f64>>>,
}

impl fmt::Display for MatrixTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for row in &self.cells {
            for cell in row {
                match cell {
                    Some(v) => write!(f, "{v:>11.6}")?,
                    None => write!(f, "{:^11}", "---")?,
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

impl<C: Communicator> std::ops::Mul<f64> for DistributedSparseMatrix<C> {
    type Output = Self;

    fn mul(mut self, factor: f64) -> Self {
        self.scale(factor);
        self
    }
}

impl<C: Communicator> std::ops::Neg for DistributedSparseMatrix<C> {
    type Output = Self;

    fn neg(mut self) -> Self {
        self.scale(-1.0);
        self
    }
}

impl<C: Communicator> std::ops::Add for DistributedSparseMatrix<C> {
    type Output = Result<Combined<Self>, MatrixError>;

    fn add(mut self, mut rhs: Self) -> Self::Output {
        self.combine(&mut rhs, 1.0)
    }
}

impl<C: Communicator> std::ops::Sub for DistributedSparseMatrix<C> {
    type Output = Result<Combined<Self>, MatrixError>;

    fn sub(mut self, mut rhs: Self) -> Self::Output {
        self.combine(&mut rhs, -1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, ThreadComm};
    use std::f64::consts::PI;

    fn serial(rows: u64, cols: u64) -> DistributedSparseMatrix<NoComm> {
        DistributedSparseMatrix::on_root(rows, cols, 3, Arc::new(NoComm))
    }

    /// The 3x3 matrix used throughout: rows (0,10,3), (0,pi,0), (2.5,0,0).
    fn l1() -> DistributedSparseMatrix<NoComm> {
        let mut m = serial(3, 3);
        m.accumulate(&[3.0, 10.0, PI, 2.5], &[0, 0, 1, 2], &[2, 1, 1, 0])
            .unwrap();
        m
    }

    fn close(a: &[f64], b: &[f64]) -> bool {
        a.len() == b.len() && a.iter().zip(b).all(|(x, y)| (x - y).abs() <= 1e-9 * y.abs().max(1.0))
    }

    #[test]
    fn accumulate_before_finalize_sums() {
        let mut m = l1();
        m.accumulate(&[1.73, 2.2, 8.4, 3.9, 1.23], &[1, 2, 0, 0, 1], &[2, 2, 0, 0, 2])
            .unwrap();
        let dense = m.to_dense().unwrap();
        assert!(close(&dense[0], &[12.3, 10.0, 3.0]));
        assert!(close(&dense[1], &[0.0, PI, 2.96]));
        assert!(close(&dense[2], &[2.5, 0.0, 2.2]));
    }

    #[test]
    fn finalize_is_idempotent() {
        let mut m = l1();
        assert_eq!(m.fill_state(), FillState::Unfilled);
        m.finalize();
        let once = m.clone().to_dense().unwrap();
        m.finalize();
        assert_eq!(m.fill_state(), FillState::Filled);
        assert_eq!(m.to_dense().unwrap(), once);
        assert_eq!(m.num_local_nonzeros(), 4);
    }

    #[test]
    fn insert_after_finalize_is_structural_error() {
        let mut m = l1();
        m.finalize();
        assert_eq!(
            m.insert(&[1.0], &[0], &[0]).unwrap_err(),
            MatrixError::Structural { operation: "insert" }
        );
    }

    #[test]
    fn put_diagonal_replaces_prefix() {
        let mut m = serial(3, 3);
        m.put_diagonal(Diagonal::Values(&[3.0, 10.0, PI])).unwrap();
        m.put_diagonal(Diagonal::Values(&[10.0, 3.0])).unwrap();
        assert_eq!(m.fill_state(), FillState::Filled);
        let table = m.table().unwrap();
        assert_eq!(table.cells[0], vec![Some(10.0), None, None]);
        assert_eq!(table.cells[1], vec![None, Some(3.0), None]);
        assert_eq!(table.cells[2], vec![None, None, Some(PI)]);
    }

    #[test]
    fn replace_twice_keeps_last_accumulate_twice_sums() {
        let mut m = l1();
        m.replace(&[7.0], &[0], &[1]).unwrap();
        m.replace(&[8.0], &[0], &[1]).unwrap();
        m.accumulate(&[1.0], &[2], &[0]).unwrap();
        m.accumulate(&[1.0], &[2], &[0]).unwrap();
        let dense = m.to_dense().unwrap();
        assert_eq!(dense[0][1], 8.0);
        assert_eq!(dense[2][0], 4.5);
    }

    #[test]
    fn filled_accumulate_drops_missing_and_reports_once() {
        let mut m = l1();
        m.finalize();
        let report = m
            .accumulate(&[1.0, 5.0, 2.0, 7.0], &[0, 1, 2, 2], &[1, 0, 0, 2])
            .unwrap();
        assert_eq!(report.warnings().len(), 1);
        assert_eq!(report.dropped_count(), 2);
        let w = &report.warnings()[0];
        assert_eq!(w.operation, WriteOp::Accumulate);
        assert_eq!((w.dropped[0].row, w.dropped[0].col), (1, 0));
        assert_eq!(w.dropped[1].reason, DropReason::NoStructuralEntry);
        let dense = m.to_dense().unwrap();
        assert_eq!(dense[0][1], 11.0);
        assert_eq!(dense[2][0], 4.5);
        assert_eq!(dense[1][0], 0.0);
        assert!(report.into_result().is_err());
    }

    #[test]
    fn bad_indices_and_lengths_are_fatal() {
        let mut m = serial(3, 2);
        assert_eq!(
            m.accumulate(&[1.0], &[0], &[2]).unwrap_err(),
            MatrixError::IndexOutOfBounds { index: 2, bound: 2 }
        );
        assert!(matches!(
            m.accumulate(&[1.0, 2.0], &[0], &[0, 1]),
            Err(MatrixError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            m.put_diagonal(Diagonal::Values(&[1.0, 2.0, 3.0])),
            Err(MatrixError::ShapeMismatch { .. })
        ));
    }

    #[test]
    fn sum_with_identity() {
        let mut l = l1();
        l.accumulate(&[0.0, 0.0, 0.0], &[0, 1, 2], &[0, 1, 2]).unwrap();
        let mut id = DistributedSparseMatrix::identity(3, Arc::new(NoComm)).unwrap();
        let sum = l.add(&mut id).unwrap();
        assert!(sum.report.is_clean());
        let mut value = sum.value;
        let dense = value.to_dense().unwrap();
        assert!(close(&dense[0], &[1.0, 10.0, 3.0]));
        assert!(close(&dense[1], &[0.0, 1.0 + PI, 0.0]));
        assert!(close(&dense[2], &[2.5, 0.0, 1.0]));
    }

    #[test]
    fn subset_addition_commutes_and_subtraction_is_ordered() {
        let mut big = l1();
        big.accumulate(&[1.0, 1.0, 1.0], &[0, 1, 2], &[0, 1, 2]).unwrap();
        let mut small = DistributedSparseMatrix::identity(3, Arc::new(NoComm)).unwrap();
        assert!(small.is_structural_subset_of(&mut big).unwrap());
        assert!(!big.is_structural_subset_of(&mut small).unwrap());
        let ab = big.add(&mut small).unwrap().strict().unwrap().to_dense().unwrap();
        let ba = small.add(&mut big).unwrap().strict().unwrap().to_dense().unwrap();
        assert_eq!(ab, ba);
        let a_minus_b = big.subtract(&mut small).unwrap().strict().unwrap().to_dense().unwrap();
        let b_minus_a = small.subtract(&mut big).unwrap().strict().unwrap().to_dense().unwrap();
        for (x, y) in a_minus_b.iter().flatten().zip(b_minus_a.iter().flatten()) {
            assert_eq!(*x, -*y);
        }
        assert!((a_minus_b[1][1] - PI).abs() < 1e-12);
        assert_eq!(a_minus_b[0][1], 10.0);
    }

    #[test]
    fn operators_mirror_methods() {
        let a = l1();
        let b = DistributedSparseMatrix::identity(3, Arc::new(NoComm)).unwrap();
        let mut doubled = a.clone() * 2.0;
        assert_eq!(doubled.to_dense().unwrap()[0][1], 20.0);
        let mut neg = -a.clone();
        assert_eq!(neg.to_dense().unwrap()[2][0], -2.5);
        let sum = (a + b).unwrap();
        // identity diagonal falls outside l1's pattern except at (1,1)
        assert_eq!(sum.report.dropped_count(), 2);
    }

    #[test]
    fn in_place_add_swaps_storage_when_receiver_is_smaller() {
        let mut small = DistributedSparseMatrix::identity(3, Arc::new(NoComm)).unwrap();
        small.finalize();
        let mut big = l1();
        big.accumulate(&[0.0, 0.0], &[0, 2], &[0, 2]).unwrap();
        let report = small.in_place_add(&mut big).unwrap();
        assert!(report.is_clean());
        assert_eq!(small.fill_state(), FillState::Unfilled);
        let dense = small.to_dense().unwrap();
        assert!(close(&dense[0], &[1.0, 10.0, 3.0]));
        assert!(close(&dense[1], &[0.0, 1.0 + PI, 0.0]));
        assert!(close(&dense[2], &[2.5, 0.0, 1.0]));
    }

    #[test]
    fn products_with_vectors() {
        let mut m = l1();
        let y = m.multiply(Operand::Vector(&[1.0, 2.0, 3.0])).unwrap().into_vector().unwrap();
        assert!(close(&y, &[29.0, 2.0 * PI, 2.5]));
        let z = m.left_multiply(&[1.0, 2.0, 3.0]).unwrap();
        assert!(close(&z, &[7.5, 10.0 + 2.0 * PI, 3.0]));
        assert!(matches!(
            m.matvec(&[1.0]),
            Err(MatrixError::ShapeMismatch { .. })
        ));
        let x = DistributedVector::new(m.col_map().clone(), vec![1.0, 2.0, 3.0]).unwrap();
        let yd = m.multiply(Operand::Distributed(&x)).unwrap().into_distributed().unwrap();
        assert!(close(yd.values(), &[29.0, 2.0 * PI, 2.5]));
    }

    #[test]
    fn scalar_product_preserves_structure() {
        let mut m = l1();
        let mut s = m.multiply(Operand::Scalar(0.0)).unwrap().into_matrix().unwrap();
        assert_eq!(s.num_local_nonzeros(), 4);
        assert_eq!(s.table().unwrap().cells[0][1], Some(0.0));
    }

    #[test]
    fn matrix_product() {
        let mut a = l1();
        let mut b = DistributedSparseMatrix::identity(3, Arc::new(NoComm)).unwrap();
        b.accumulate(&[4.38, 12357.2, 1.1], &[2, 1, 0], &[1, 0, 2]).unwrap();
        let mut c = a.multiply(Operand::Matrix(&mut b)).unwrap().into_matrix().unwrap();
        assert_eq!(c.fill_state(), FillState::Filled);
        let dense = c.to_dense().unwrap();
        assert!(close(&dense[0], &[123572.0, 23.14, 3.0]));
        assert!(close(&dense[1], &[12357.2 * PI, PI, 0.0]));
        assert!(close(&dense[2], &[2.5, 0.0, 2.75]));
    }

    #[test]
    fn take_is_unsupported_and_diagonal_is_not() {
        let mut m = l1();
        assert!(matches!(
            m.take(&[0], &[0]),
            Err(MatrixError::UnsupportedOperation(_))
        ));
        let d = m.take_diagonal().unwrap();
        assert_eq!(d.values(), &[0.0, PI, 0.0]);
    }

    #[test]
    fn table_marks_unstored_positions() {
        let mut m = l1();
        let text = m.table().unwrap().to_string();
        let first = text.lines().next().unwrap();
        assert!(first.contains("---"));
        assert!(first.contains("10.000000"));
        assert_eq!(text.lines().count(), 3);
    }

    #[test]
    fn matrix_market_round_trip() {
        let mut m = l1();
        let mut buf = Vec::new();
        m.export_matrix_market(&mut buf).unwrap();
        let text = String::from_utf8(buf.clone()).unwrap();
        assert!(text.starts_with(crate::io::matrix_market::BANNER));
        let mut back = DistributedSparseMatrix::from_matrix_market(
            buf.as_slice(),
            IndexMap::serial(3),
            IndexMap::serial(3),
            Arc::new(NoComm),
        )
        .unwrap();
        assert_eq!(back.entries(), m.entries());
    }

    #[test]
    fn maps_must_fit_the_communicator() {
        let wrong = IndexMap::contiguous(4, 1, 2);
        assert!(matches!(
            DistributedSparseMatrix::new(wrong.clone(), wrong, 1, Arc::new(NoComm)),
            Err(MatrixError::InvalidPartition(_))
        ));
    }

    #[test]
    fn two_ranks_drop_unowned_rows_and_agree_on_products() {
        let world = ThreadComm::world(2);
        let results: Vec<_> = std::thread::scope(|s| {
            let hs: Vec<_> = world
                .into_iter()
                .map(|c| {
                    s.spawn(move || {
                        let comm = Arc::new(c);
                        let mut m = DistributedSparseMatrix::contiguous(3, 3, 2, comm.clone());
                        // every rank submits the full pattern; each keeps its own rows
                        let report = m
                            .accumulate(&[3.0, 10.0, PI, 2.5], &[0, 0, 1, 2], &[2, 1, 1, 0])
                            .unwrap();
                        let dropped = report.dropped_count();
                        let y = m.matvec(&[1.0, 2.0, 3.0]).unwrap();
                        let z = m.left_multiply(&[1.0, 2.0, 3.0]).unwrap();
                        let nnz = m.num_global_nonzeros().unwrap();
                        let mut id = DistributedSparseMatrix::identity(3, comm).unwrap();
                        let mut sum = m.add(&mut id).unwrap();
                        let dense = sum.value.to_dense().unwrap();
                        (dropped, y, z, nnz, dense)
                    })
                })
                .collect();
            hs.into_iter().map(|h| h.join().unwrap()).collect()
        });
        // rank 0 owns rows 0..2, rank 1 owns row 2
        assert_eq!(results[0].0, 1);
        assert_eq!(results[1].0, 3);
        for (_, y, z, nnz, dense) in &results {
            assert!(close(y, &[29.0, 2.0 * PI, 2.5]));
            assert!(close(z, &[7.5, 10.0 + 2.0 * PI, 3.0]));
            assert_eq!(*nnz, 4);
            assert_eq!(dense[1][1], PI + 1.0);
        }
    }
}

//! Conversion between replicated and distributed vectors.
//!
//! A *replicated* vector is a plain `Vec<f64>` of the full global length held
//! identically by every rank. A [`DistributedVector`] holds only the entries
//! its [`IndexMap`] lists. All methods except
//! [`scatter_to_partition`](VectorRedistributor::scatter_to_partition) are
//! collective.

use crate::algs::communicator::Communicator;
use crate::algs::exchange::{MatrixCommTags, all_gather, all_reduce_max, all_reduce_sum, all_reduce_sum_slice, fetch_by_index};
use crate::algs::wire::WireSlot;
use crate::data::vector::DistributedVector;
use crate::matrix_error::MatrixError;
use crate::topology::index_map::IndexMap;
use hashbrown::HashMap;
use std::sync::Arc;

/// Moves vector data between layouts over a communicator.
#[derive(Debug)]
pub struct VectorRedistributor<C> {
    comm: Arc<C>,
    tags: MatrixCommTags,
}

impl<C> Clone for VectorRedistributor<C> {
    fn clone(&self) -> Self {
        Self {
            comm: self.comm.clone(),
            tags: self.tags,
        }
    }
}

impl<C: Communicator> VectorRedistributor<C> {
    pub fn new(comm: Arc<C>) -> Self {
        Self {
            comm,
            tags: MatrixCommTags::default(),
        }
    }

    pub fn with_tags(comm: Arc<C>, tags: MatrixCommTags) -> Self {
        Self { comm, tags }
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn tags(&self) -> MatrixCommTags {
        self.tags
    }

    /// Slice the entries `map` lists out of a replicated vector. Local only.
    pub fn scatter_to_partition(
        &self,
        replicated: &[f64],
        map: &IndexMap,
    ) -> Result<DistributedVector, MatrixError> {
        check_global_len(replicated.len(), map, "scatter_to_partition input")?;
        let values = map
            .local_indices()
            .iter()
            .map(|&g| replicated[g as usize])
            .collect();
        DistributedVector::new(map.clone(), values)
    }

    /// Every rank receives the full vector assembled from owned entries.
    pub fn gather_to_replica(&self, v: &DistributedVector) -> Result<Vec<f64>, MatrixError> {
        let n = v.map().global_size() as usize;
        let owned: Vec<WireSlot> = v.owned_entries().map(|(g, x)| WireSlot::new(g, x)).collect();
        let parts = all_gather(&*self.comm, self.tags.gather, &owned)?;
        let mut out = vec![0.0; n];
        let mut filled = vec![false; n];
        for slot in parts.iter().flatten() {
            let g = slot.index() as usize;
            if g >= n {
                return Err(MatrixError::IndexOutOfBounds {
                    index: slot.index(),
                    bound: n as u64,
                });
            }
            if filled[g] {
                return Err(MatrixError::InvalidPartition(format!(
                    "index {g} contributed by more than one rank"
                )));
            }
            filled[g] = true;
            out[g] = slot.value();
        }
        if let Some(missing) = filled.iter().position(|f| !f) {
            return Err(MatrixError::InvalidPartition(format!(
                "index {missing} contributed by no rank"
            )));
        }
        Ok(out)
    }

    /// Re-lay `v` out along `target`, fetching each entry from its owner.
    pub fn import(
        &self,
        v: &DistributedVector,
        target: &IndexMap,
    ) -> Result<DistributedVector, MatrixError> {
        if target.global_size() != v.map().global_size() {
            return Err(MatrixError::ShapeMismatch {
                context: "import target map",
                expected: v.map().global_size() as usize,
                got: target.global_size() as usize,
            });
        }
        let wants: Vec<u64> = target
            .local_indices()
            .iter()
            .copied()
            .filter(|&g| !v.map().is_owned(g))
            .collect();
        let replies: Vec<WireSlot> = fetch_by_index(&*self.comm, self.tags.import, &wants, |g, out| {
            if v.map().is_owned(g) {
                if let Some(x) = v.get(g) {
                    out.push(WireSlot::new(g, x));
                }
            }
        })?;
        let fetched: HashMap<u64, f64> = replies.iter().map(|s| (s.index(), s.value())).collect();
        let values = target
            .local_indices()
            .iter()
            .map(|&g| {
                let value = if v.map().is_owned(g) {
                    v.get(g)
                } else {
                    fetched.get(&g).copied()
                };
                value.ok_or_else(|| MatrixError::InvalidPartition(format!("no rank owns index {g}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        DistributedVector::new(target.clone(), values)
    }

    /// Element-wise sum of a replicated-length buffer over all ranks.
    pub fn all_reduce_sum(&self, local: &mut [f64]) -> Result<(), MatrixError> {
        all_reduce_sum_slice(&*self.comm, self.tags.reduce, local)
    }

    /// Global dot product over owned entries; both vectors share a map.
    pub fn dot(&self, a: &DistributedVector, b: &DistributedVector) -> Result<f64, MatrixError> {
        if !a.map().same_as(b.map()) {
            return Err(MatrixError::UnsupportedOperation(
                "dot product of vectors on different maps".into(),
            ));
        }
        let local: f64 = a
            .owned_entries()
            .zip(b.owned_entries())
            .map(|((_, x), (_, y))| x * y)
            .sum();
        all_reduce_sum(&*self.comm, self.tags.reduce, local)
    }

    /// Euclidean norm over owned entries.
    pub fn norm_2(&self, v: &DistributedVector) -> Result<f64, MatrixError> {
        Ok(self.dot(v, v)?.sqrt())
    }

    /// Maximum absolute owned entry.
    pub fn norm_inf(&self, v: &DistributedVector) -> Result<f64, MatrixError> {
        let local = v.owned_entries().map(|(_, x)| x.abs()).fold(0.0, f64::max);
        all_reduce_max(&*self.comm, self.tags.reduce, local)
    }
}

fn check_global_len(len: usize, map: &IndexMap, context: &'static str) -> Result<(), MatrixError> {
    if len as u64 != map.global_size() {
        return Err(MatrixError::ShapeMismatch {
            context,
            expected: map.global_size() as usize,
            got: len,
        });
    }
    Ok(())
}

//! Partition of a global index range across ranks.
//!
//! An [`IndexMap`] lists the global indices a rank sees, in local order.
//! A *non-overlapping* map owns every index it lists; an *overlapping* map also
//! lists halo replicas and remembers which of its indices are owned here (the
//! paired non-overlapping map). Maps are immutable and cheap to clone.

use crate::algs::communicator::Communicator;
use crate::algs::exchange::{MatrixCommTags, all_gather};
use crate::debug_invariants::DebugInvariants;
use crate::matrix_error::MatrixError;
use hashbrown::{HashMap, HashSet};
use std::sync::Arc;

/// Flavour of an [`IndexMap`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash, serde::Serialize, serde::Deserialize)]
pub enum MapKind {
    /// Each global index is owned by exactly one rank and listed only there.
    NonOverlapping,
    /// Ranks also list read-only halo replicas.
    Overlapping,
}

#[derive(Debug)]
struct MapData {
    global_size: u64,
    local: Vec<u64>,
    position: HashMap<u64, usize>,
    /// Local positions of owned indices, ascending.
    owned_positions: Vec<usize>,
    owned: HashSet<u64>,
}

/// Immutable partition of `0..global_size`.
#[derive(Clone, Debug)]
pub struct IndexMap {
    data: Arc<MapData>,
    kind: MapKind,
    rank: usize,
    size: usize,
}

impl IndexMap {
    /// A map owning exactly `indices` on this rank.
    pub fn non_overlapping(
        global_size: u64,
        indices: Vec<u64>,
        rank: usize,
        size: usize,
    ) -> Result<Self, MatrixError> {
        let position = positions(global_size, &indices)?;
        let owned = indices.iter().copied().collect();
        let owned_positions = (0..indices.len()).collect();
        Ok(Self {
            data: Arc::new(MapData {
                global_size,
                local: indices,
                position,
                owned_positions,
                owned,
            }),
            kind: MapKind::NonOverlapping,
            rank,
            size,
        })
    }

    /// A map listing `indices` (owned plus halo); ownership comes from `owned`,
    /// which must be non-overlapping and a subset of `indices`.
    pub fn overlapping(
        global_size: u64,
        indices: Vec<u64>,
        owned: &IndexMap,
    ) -> Result<Self, MatrixError> {
        if owned.kind != MapKind::NonOverlapping {
            return Err(MatrixError::InvalidPartition(
                "ownership must come from a non-overlapping map".into(),
            ));
        }
        if owned.global_size() != global_size {
            return Err(MatrixError::InvalidPartition(format!(
                "global sizes differ: {} vs {}",
                owned.global_size(),
                global_size
            )));
        }
        let position = positions(global_size, &indices)?;
        let mut owned_positions = Vec::with_capacity(owned.num_local());
        for &g in owned.local_indices() {
            let pos = *position.get(&g).ok_or_else(|| {
                MatrixError::InvalidPartition(format!(
                    "owned index {g} missing from the overlapping index list"
                ))
            })?;
            owned_positions.push(pos);
        }
        owned_positions.sort_unstable();
        Ok(Self {
            data: Arc::new(MapData {
                global_size,
                local: indices,
                position,
                owned_positions,
                owned: owned.data.owned.clone(),
            }),
            kind: MapKind::Overlapping,
            rank: owned.rank,
            size: owned.size,
        })
    }

    /// Uniform linear distribution: contiguous blocks, remainder to the lowest ranks.
    pub fn contiguous(global_size: u64, rank: usize, size: usize) -> Self {
        let size_u = size.max(1) as u64;
        let base = global_size / size_u;
        let extra = global_size % size_u;
        let r = rank as u64;
        let start = r * base + r.min(extra);
        let len = base + u64::from(r < extra);
        Self::from_range(global_size, start..start + len, rank, size)
    }

    /// Rank that owns `id` under [`contiguous`](Self::contiguous).
    pub fn contiguous_owner(global_size: u64, size: usize, id: u64) -> usize {
        let size_u = size.max(1) as u64;
        let base = global_size / size_u;
        let extra = global_size % size_u;
        let boundary = extra * (base + 1);
        if id < boundary {
            (id / (base + 1)) as usize
        } else if base == 0 {
            size.max(1) - 1
        } else {
            (extra + (id - boundary) / base) as usize
        }
    }

    /// Rank 0 owns every index; all other ranks own nothing.
    pub fn on_root(global_size: u64, rank: usize, size: usize) -> Self {
        let range = if rank == 0 { 0..global_size } else { 0..0 };
        Self::from_range(global_size, range, rank, size)
    }

    /// Single-rank map owning everything.
    pub fn serial(global_size: u64) -> Self {
        Self::on_root(global_size, 0, 1)
    }

    fn from_range(global_size: u64, range: std::ops::Range<u64>, rank: usize, size: usize) -> Self {
        let local: Vec<u64> = range.collect();
        let position = local.iter().enumerate().map(|(i, &g)| (g, i)).collect();
        let owned = local.iter().copied().collect();
        let owned_positions = (0..local.len()).collect();
        Self {
            data: Arc::new(MapData {
                global_size,
                local,
                position,
                owned_positions,
                owned,
            }),
            kind: MapKind::NonOverlapping,
            rank,
            size,
        }
    }

    /// Owned global indices in local order.
    pub fn owned_indices(&self) -> Vec<u64> {
        self.data
            .owned_positions
            .iter()
            .map(|&p| self.data.local[p])
            .collect()
    }

    /// Local positions of the owned indices, ascending.
    pub fn owned_positions(&self) -> &[usize] {
        &self.data.owned_positions
    }

    /// Every global index visible here (owned and halo), in local order.
    pub fn local_indices(&self) -> &[u64] {
        &self.data.local
    }

    /// True if `id` is visible on this rank.
    pub fn contains(&self, id: u64) -> bool {
        self.data.position.contains_key(&id)
    }

    /// True only on the rank that owns `id`.
    pub fn is_owned(&self, id: u64) -> bool {
        self.data.owned.contains(&id)
    }

    /// Position of `id` in [`local_indices`](Self::local_indices).
    pub fn local_position(&self, id: u64) -> Option<usize> {
        self.data.position.get(&id).copied()
    }

    pub fn num_local(&self) -> usize {
        self.data.local.len()
    }

    pub fn num_owned(&self) -> usize {
        self.data.owned_positions.len()
    }

    pub fn global_size(&self) -> u64 {
        self.data.global_size
    }

    pub fn kind(&self) -> MapKind {
        self.kind
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Same global size, same local indices in the same order, same kind.
    pub fn same_as(&self, other: &IndexMap) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
            || (self.kind == other.kind
                && self.data.global_size == other.data.global_size
                && self.data.local == other.data.local
                && self.data.owned_positions == other.data.owned_positions)
    }

    /// Collective check that the owned indices of all ranks partition
    /// `0..global_size` exactly once.
    pub fn validate_partition<C: Communicator>(&self, comm: &C) -> Result<(), MatrixError> {
        let tags = MatrixCommTags::default();
        let owned = self.owned_indices();
        let parts = all_gather(comm, tags.gather, &owned)?;
        let n = self.global_size() as usize;
        let mut seen = vec![false; n];
        for (rank, part) in parts.iter().enumerate() {
            for &g in part {
                let slot = seen.get_mut(g as usize).ok_or(MatrixError::IndexOutOfBounds {
                    index: g,
                    bound: n as u64,
                })?;
                if *slot {
                    return Err(MatrixError::InvalidPartition(format!(
                        "index {g} owned twice (again on rank {rank})"
                    )));
                }
                *slot = true;
            }
        }
        if let Some(missing) = seen.iter().position(|s| !s) {
            return Err(MatrixError::InvalidPartition(format!(
                "index {missing} is owned by no rank"
            )));
        }
        Ok(())
    }
}

fn positions(global_size: u64, indices: &[u64]) -> Result<HashMap<u64, usize>, MatrixError> {
    let mut position = HashMap::with_capacity(indices.len());
    for (i, &g) in indices.iter().enumerate() {
        if g >= global_size {
            return Err(MatrixError::IndexOutOfBounds {
                index: g,
                bound: global_size,
            });
        }
        if position.insert(g, i).is_some() {
            return Err(MatrixError::DuplicateIndex(g));
        }
    }
    Ok(position)
}

impl DebugInvariants for IndexMap {
    fn validate_invariants(&self) -> Result<(), MatrixError> {
        let d = &self.data;
        if d.position.len() != d.local.len() {
            return Err(MatrixError::InvalidPartition(
                "position table out of sync with local indices".into(),
            ));
        }
        for &p in &d.owned_positions {
            let g = *d.local.get(p).ok_or(MatrixError::IndexOutOfBounds {
                index: p as u64,
                bound: d.local.len() as u64,
            })?;
            if !d.owned.contains(&g) {
                return Err(MatrixError::InvalidPartition(format!(
                    "owned position {p} holds unowned index {g}"
                )));
            }
        }
        if self.kind == MapKind::NonOverlapping && d.owned_positions.len() != d.local.len() {
            return Err(MatrixError::InvalidPartition(
                "non-overlapping map lists a halo index".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algs::communicator::{NoComm, ThreadComm};

    #[test]
    fn contiguous_blocks_cover_range() {
        let maps: Vec<_> = (0..3).map(|r| IndexMap::contiguous(10, r, 3)).collect();
        assert_eq!(maps[0].local_indices(), &[0, 1, 2, 3]);
        assert_eq!(maps[1].local_indices(), &[4, 5, 6]);
        assert_eq!(maps[2].local_indices(), &[7, 8, 9]);
        for m in &maps {
            m.validate_invariants().unwrap();
        }
        for (r, m) in maps.iter().enumerate() {
            for &g in m.local_indices() {
                assert_eq!(IndexMap::contiguous_owner(10, 3, g), r);
            }
        }
    }

    #[test]
    fn root_map_owns_everything_on_rank_zero() {
        assert_eq!(IndexMap::on_root(4, 0, 2).num_owned(), 4);
        assert_eq!(IndexMap::on_root(4, 1, 2).num_owned(), 0);
        assert!(IndexMap::serial(3).is_owned(2));
    }

    #[test]
    fn overlapping_map_knows_its_owner() {
        let owned = IndexMap::non_overlapping(6, vec![3, 4, 5], 1, 2).unwrap();
        let ovl = IndexMap::overlapping(6, vec![2, 3, 4, 5], &owned).unwrap();
        assert!(ovl.contains(2));
        assert!(!ovl.is_owned(2));
        assert!(ovl.is_owned(3));
        assert_eq!(ovl.owned_indices(), vec![3, 4, 5]);
        assert_eq!(ovl.owned_positions(), &[1, 2, 3]);
        assert_eq!(ovl.local_position(2), Some(0));
        assert_eq!(ovl.kind(), MapKind::Overlapping);
        ovl.validate_invariants().unwrap();
    }

    #[test]
    fn construction_errors() {
        assert_eq!(
            IndexMap::non_overlapping(3, vec![0, 3], 0, 1).unwrap_err(),
            MatrixError::IndexOutOfBounds { index: 3, bound: 3 }
        );
        assert_eq!(
            IndexMap::non_overlapping(3, vec![1, 1], 0, 1).unwrap_err(),
            MatrixError::DuplicateIndex(1)
        );
        let owned = IndexMap::non_overlapping(4, vec![0, 1], 0, 2).unwrap();
        assert!(matches!(
            IndexMap::overlapping(4, vec![1, 2], &owned),
            Err(MatrixError::InvalidPartition(_))
        ));
    }

    #[test]
    fn same_as_compares_layout() {
        let a = IndexMap::contiguous(8, 0, 2);
        let b = IndexMap::non_overlapping(8, vec![0, 1, 2, 3], 0, 2).unwrap();
        let c = IndexMap::non_overlapping(8, vec![3, 2, 1, 0], 0, 2).unwrap();
        assert!(a.same_as(&b));
        assert!(!a.same_as(&c));
    }

    #[test]
    fn serial_partition_validates() {
        IndexMap::serial(5).validate_partition(&NoComm).unwrap();
        let gap = IndexMap::non_overlapping(5, vec![0, 1, 2], 0, 1).unwrap();
        assert!(matches!(
            gap.validate_partition(&NoComm),
            Err(MatrixError::InvalidPartition(_))
        ));
    }

    #[test]
    fn distributed_partition_detects_double_ownership() {
        let world = ThreadComm::world(2);
        let results: Vec<_> = std::thread::scope(|s| {
            let hs: Vec<_> = world
                .into_iter()
                .map(|c| {
                    s.spawn(move || {
                        let ids = if c.rank() == 0 { vec![0, 1, 2] } else { vec![2, 3] };
                        IndexMap::non_overlapping(4, ids, c.rank(), 2)
                            .unwrap()
                            .validate_partition(&c)
                    })
                })
                .collect();
            hs.into_iter().map(|h| h.join().unwrap()).collect()
        });
        for r in results {
            assert!(matches!(r, Err(MatrixError::InvalidPartition(_))));
        }
    }
}

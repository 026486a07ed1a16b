//! Collective exchange patterns built from point-to-point messages.
//!
//! Every collective runs in two stages, in the order:
//! 1. exchange byte counts with every peer (`tag`),
//! 2. exchange payloads sized from stage 1 (`tag + 1`).
//!
//! All receives are posted before the sends, and every handle is drained
//! before returning, even if an error occurs. Reductions combine contributions
//! in rank order so every rank computes a bitwise-identical result.

use crate::algs::communicator::{CommTag, Communicator, Wait};
use crate::algs::wire::{WireCount, WireIndex, cast_slice, cast_slice_mut, decode_records};
use crate::matrix_error::MatrixError;
use bytemuck::Pod;

/// Tags used by the matrix engine, one block of two per collective kind.
#[derive(Copy, Clone, Debug)]
pub struct MatrixCommTags {
    pub reduce: CommTag,
    pub gather: CommTag,
    pub rows: CommTag,
    pub import: CommTag,
    pub export: CommTag,
    pub rebalance: CommTag,
}

impl MatrixCommTags {
    /// Construct tags from a base, assigning deterministic offsets per collective.
    #[inline]
    pub const fn from_base(base: CommTag) -> Self {
        Self {
            reduce: base,
            gather: base.offset(2),
            rows: base.offset(4),
            import: base.offset(6),
            export: base.offset(8),
            rebalance: base.offset(10),
        }
    }
}

impl Default for MatrixCommTags {
    fn default() -> Self {
        Self::from_base(CommTag::new(0xF100))
    }
}

/// Send `outgoing[p]` to every rank `p` and return what each rank sent here.
///
/// `outgoing.len()` must equal `comm.size()`. The slot addressed to this rank
/// is moved straight into the result.
pub fn all_to_all_bytes<C>(
    comm: &C,
    tag: CommTag,
    mut outgoing: Vec<Vec<u8>>,
) -> Result<Vec<Vec<u8>>, MatrixError>
where
    C: Communicator,
{
    let size = comm.size().max(1);
    let me = comm.rank();
    if outgoing.len() != size {
        return Err(MatrixError::ShapeMismatch {
            context: "all_to_all outgoing buffers",
            expected: size,
            got: outgoing.len(),
        });
    }
    let mut incoming = vec![Vec::new(); size];
    incoming[me] = std::mem::take(&mut outgoing[me]);
    if size == 1 {
        return Ok(incoming);
    }
    let peers: Vec<usize> = (0..size).filter(|&p| p != me).collect();

    // 1) sizes
    let mut recv_sizes = Vec::with_capacity(peers.len());
    for &nbr in &peers {
        let mut cnt = WireCount::new(0);
        let h = comm.irecv(
            nbr,
            tag.as_u16(),
            cast_slice_mut(std::slice::from_mut(&mut cnt)),
        );
        recv_sizes.push((nbr, h));
    }
    let mut pending_sends = Vec::with_capacity(peers.len());
    for &nbr in &peers {
        let count = WireCount::new(outgoing[nbr].len());
        pending_sends.push(comm.isend(
            nbr,
            tag.as_u16(),
            cast_slice(std::slice::from_ref(&count)),
        ));
    }
    let mut sizes_in = vec![0usize; size];
    let mut maybe_err = None;
    for (nbr, h) in recv_sizes {
        match h.wait() {
            Some(data) if data.len() == std::mem::size_of::<WireCount>() => {
                match decode_records::<WireCount>(&data).and_then(|c| c[0].get()) {
                    Some(n) => sizes_in[nbr] = n,
                    None if maybe_err.is_none() => {
                        maybe_err = Some(MatrixError::CommError {
                            neighbor: nbr,
                            reason: "announced size does not fit in memory".into(),
                        });
                    }
                    None => {}
                }
            }
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(MatrixError::BufferSizeMismatch {
                    neighbor: nbr,
                    expected: std::mem::size_of::<WireCount>(),
                    got: data.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(MatrixError::CommError {
                    neighbor: nbr,
                    reason: "failed to receive size header".into(),
                });
            }
            _ => {} // already have an error; just drain
        }
    }
    for send in pending_sends {
        let _ = send.wait();
    }
    if let Some(err) = maybe_err {
        return Err(err);
    }
    log::trace!("rank {me}: incoming sizes {sizes_in:?}");

    // 2) payloads
    let data_tag = tag.offset(1);
    let mut recv_data = Vec::with_capacity(peers.len());
    for &nbr in &peers {
        let mut buffer = vec![0u8; sizes_in[nbr]];
        let h = comm.irecv(nbr, data_tag.as_u16(), &mut buffer);
        recv_data.push((nbr, h));
    }
    let mut pending_sends = Vec::with_capacity(peers.len());
    for &nbr in &peers {
        pending_sends.push(comm.isend(nbr, data_tag.as_u16(), &outgoing[nbr]));
    }
    for (nbr, h) in recv_data {
        let expected = sizes_in[nbr];
        match h.wait() {
            Some(data) if data.len() == expected => incoming[nbr] = data,
            // NoComm-like backends never deliver; an empty message is still valid.
            None if expected == 0 => {}
            Some(data) if maybe_err.is_none() => {
                maybe_err = Some(MatrixError::BufferSizeMismatch {
                    neighbor: nbr,
                    expected,
                    got: data.len(),
                });
            }
            None if maybe_err.is_none() => {
                maybe_err = Some(MatrixError::CommError {
                    neighbor: nbr,
                    reason: "no data received (wait returned None)".into(),
                });
            }
            _ => {}
        }
    }
    for send in pending_sends {
        let _ = send.wait();
    }
    match maybe_err {
        Some(err) => Err(err),
        None => Ok(incoming),
    }
}

/// Typed all-to-all over `Pod` records.
pub fn all_to_all<C, T>(
    comm: &C,
    tag: CommTag,
    outgoing: Vec<Vec<T>>,
) -> Result<Vec<Vec<T>>, MatrixError>
where
    C: Communicator,
    T: Pod,
{
    let bytes = outgoing
        .iter()
        .map(|recs| cast_slice(recs).to_vec())
        .collect();
    let incoming = all_to_all_bytes(comm, tag, bytes)?;
    incoming
        .into_iter()
        .enumerate()
        .map(|(nbr, raw)| {
            decode_records(&raw).ok_or(MatrixError::BufferSizeMismatch {
                neighbor: nbr,
                expected: raw.len() - raw.len() % std::mem::size_of::<T>().max(1),
                got: raw.len(),
            })
        })
        .collect()
}

/// Every rank receives every rank's `local` records, indexed by rank.
pub fn all_gather<C, T>(comm: &C, tag: CommTag, local: &[T]) -> Result<Vec<Vec<T>>, MatrixError>
where
    C: Communicator,
    T: Pod,
{
    let size = comm.size().max(1);
    all_to_all(comm, tag, vec![local.to_vec(); size])
}

/// Rank `root` receives every rank's `local` records; other ranks get `None`.
pub fn gather_to_root<C, T>(
    comm: &C,
    tag: CommTag,
    root: usize,
    local: &[T],
) -> Result<Option<Vec<Vec<T>>>, MatrixError>
where
    C: Communicator,
    T: Pod,
{
    let size = comm.size().max(1);
    let mut outgoing = vec![Vec::new(); size];
    outgoing[root] = local.to_vec();
    let incoming = all_to_all(comm, tag, outgoing)?;
    Ok((comm.rank() == root).then_some(incoming))
}

/// Request/reply by global index.
///
/// Every rank announces the indices it `wants`; every rank then answers each
/// peer's requests through `respond`, which appends zero or more records for
/// an index it can serve (typically one it owns). Returns all records received
/// here, own answers included, in rank order.
pub fn fetch_by_index<C, T, F>(
    comm: &C,
    tag: CommTag,
    wants: &[u64],
    mut respond: F,
) -> Result<Vec<T>, MatrixError>
where
    C: Communicator,
    T: Pod,
    F: FnMut(u64, &mut Vec<T>),
{
    let requests: Vec<WireIndex> = wants.iter().map(|&g| WireIndex::of(g)).collect();
    let all_requests = all_gather(comm, tag, &requests)?;
    let replies: Vec<Vec<T>> = all_requests
        .iter()
        .map(|reqs| {
            let mut out = Vec::new();
            for r in reqs {
                respond(r.get(), &mut out);
            }
            out
        })
        .collect();
    let incoming = all_to_all(comm, tag, replies)?;
    Ok(incoming.into_iter().flatten().collect())
}

/// Sum of `x` over all ranks.
pub fn all_reduce_sum<C: Communicator>(comm: &C, tag: CommTag, x: f64) -> Result<f64, MatrixError> {
    let parts = all_gather(comm, tag, &[x.to_bits()])?;
    Ok(parts
        .iter()
        .filter_map(|p| p.first())
        .map(|&bits| f64::from_bits(bits))
        .sum())
}

/// Sum of a count over all ranks.
pub fn all_reduce_count<C: Communicator>(
    comm: &C,
    tag: CommTag,
    n: usize,
) -> Result<usize, MatrixError> {
    let parts = all_gather(comm, tag, &[n as u64])?;
    Ok(parts.iter().filter_map(|p| p.first()).sum::<u64>() as usize)
}

/// Maximum of `x` over all ranks.
pub fn all_reduce_max<C: Communicator>(comm: &C, tag: CommTag, x: f64) -> Result<f64, MatrixError> {
    let parts = all_gather(comm, tag, &[x.to_bits()])?;
    Ok(parts
        .iter()
        .filter_map(|p| p.first())
        .map(|&bits| f64::from_bits(bits))
        .fold(f64::NEG_INFINITY, f64::max))
}

/// Logical AND of `flag` over all ranks.
pub fn all_reduce_and<C: Communicator>(comm: &C, tag: CommTag, flag: bool) -> Result<bool, MatrixError> {
    let parts = all_gather(comm, tag, &[flag as u8])?;
    Ok(parts.iter().all(|p| p.first().copied() == Some(1)))
}

/// Element-wise sum of `local` over all ranks, written back in place.
pub fn all_reduce_sum_slice<C: Communicator>(
    comm: &C,
    tag: CommTag,
    local: &mut [f64],
) -> Result<(), MatrixError> {
    if comm.is_serial() {
        return Ok(());
    }
    let bits: Vec<u64> = local.iter().map(|v| v.to_bits()).collect();
    let parts = all_gather(comm, tag, &bits)?;
    for (rank, part) in parts.iter().enumerate() {
        if part.len() != local.len() {
            return Err(MatrixError::ShapeMismatch {
                context: "all_reduce_sum_slice contribution",
                expected: local.len(),
                got: part.len(),
            });
        }
        log::trace!("reducing {} values from rank {rank}", part.len());
    }
    for (i, slot) in local.iter_mut().enumerate() {
        *slot = parts.iter().map(|p| f64::from_bits(p[i])).sum();
    }
    Ok(())
}

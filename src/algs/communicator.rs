//! Thin façade over in-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! Handles are waitable; the exchange helpers in [`crate::algs::exchange`]
//! call `.wait()` on every handle before they trust a buffer.
//!
//! Messages between the same `(src, dst, tag)` are delivered in send order on
//! every backend, so collectives may reuse a tag as long as all ranks call them
//! in lockstep.

use bytes::Bytes;
use hashbrown::HashMap;
use once_cell::sync::Lazy;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;

/// Typed message tag. Collectives derive their per-stage tags with [`CommTag::offset`].
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    #[inline]
    pub const fn new(tag: u16) -> Self {
        Self(tag)
    }
    #[inline]
    pub const fn as_u16(self) -> u16 {
        self.0
    }
    /// Tag `k` slots after this one.
    #[inline]
    pub const fn offset(self, k: u16) -> Self {
        Self(self.0.wrapping_add(k))
    }
}

/// Non-blocking communication interface (minimal by design).
pub trait Communicator: Send + Sync + 'static {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Post a send of `buf` to `peer`.
    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    /// Post a receive of at most `buf.len()` bytes from `peer`; the data is
    /// returned by [`Wait::wait`].
    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle;

    /// This process's rank.
    fn rank(&self) -> usize;
    /// Number of ranks.
    fn size(&self) -> usize;

    /// True when there is nobody to talk to.
    fn is_serial(&self) -> bool {
        self.size() <= 1
    }
}

/// Anything that can be waited on.
pub trait Wait {
    /// Wait for completion and return the received data (if any).
    fn wait(self) -> Option<Vec<u8>>;
}

impl Wait for () {
    fn wait(self) -> Option<Vec<u8>> {
        None
    }
}

/// Compile-time no-op comm for pure serial use.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16, _buf: &mut [u8]) {}
    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
}

// --- ThreadComm: ranks simulated by threads of one process ---

type Key = (usize, usize, u16); // (src, dst, tag)

/// FIFO queues of in-flight messages shared by the ranks of one world.
#[derive(Default)]
pub struct Mailbox {
    queues: Mutex<HashMap<Key, VecDeque<Bytes>>>,
    arrived: Condvar,
}

impl Mailbox {
    fn post(&self, key: Key, data: Bytes) {
        let mut queues = self.queues.lock();
        queues.entry(key).or_default().push_back(data);
        self.arrived.notify_all();
    }

    fn take(&self, key: Key) -> Bytes {
        let mut queues = self.queues.lock();
        loop {
            if let Some(data) = queues.get_mut(&key).and_then(VecDeque::pop_front) {
                return data;
            }
            self.arrived.wait(&mut queues);
        }
    }
}

static DEFAULT_MAILBOX: Lazy<Arc<Mailbox>> = Lazy::new(|| Arc::new(Mailbox::default()));

/// Handle for a pending [`ThreadComm`] receive; blocks in `wait`.
pub struct LocalHandle {
    mailbox: Arc<Mailbox>,
    key: Key,
    max_len: usize,
}

impl Wait for LocalHandle {
    fn wait(self) -> Option<Vec<u8>> {
        let bytes = self.mailbox.take(self.key);
        let n = bytes.len().min(self.max_len);
        Some(bytes[..n].to_vec())
    }
}

/// Each rank runs on its own thread; every rank of a world must hold a
/// `ThreadComm` built from the same mailbox.
#[derive(Clone)]
pub struct ThreadComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl std::fmt::Debug for ThreadComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ThreadComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl ThreadComm {
    /// Rank `rank` of `size`, on the process-wide default mailbox.
    ///
    /// Worlds that share the default mailbox must use distinct tags.
    pub fn new(rank: usize, size: usize) -> Self {
        Self {
            rank,
            size,
            mailbox: DEFAULT_MAILBOX.clone(),
        }
    }

    /// All ranks of a fresh world with a private mailbox.
    pub fn world(size: usize) -> Vec<Self> {
        let mailbox = Arc::new(Mailbox::default());
        (0..size)
            .map(|rank| Self {
                rank,
                size,
                mailbox: mailbox.clone(),
            })
            .collect()
    }
}

impl Communicator for ThreadComm {
    type SendHandle = ();
    type RecvHandle = LocalHandle;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle {
        self.mailbox
            .post((self.rank, peer, tag), Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> Self::RecvHandle {
        LocalHandle {
            mailbox: self.mailbox.clone(),
            key: (peer, self.rank, tag),
            max_len: buf.len(),
        }
    }

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::*;
    use mpi::environment::Universe;
    use mpi::request::{Request, StaticScope};
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::*;

    /// MPI world communicator. Keeps the universe alive for its lifetime.
    pub struct MpiComm {
        pub world: Arc<SimpleCommunicator>,
        pub rank: usize,
        pub size: usize,
        _universe: Option<Arc<Universe>>,
    }

    // Ranks drive their communicator from a single thread; the bound only
    // exists so the handle can sit behind the `Communicator` trait.
    unsafe impl Send for MpiComm {}
    unsafe impl Sync for MpiComm {}

    impl MpiComm {
        /// Initialize MPI and wrap `MPI_COMM_WORLD`.
        pub fn new() -> Option<Self> {
            let universe = mpi::initialize()?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Some(Self {
                world: Arc::new(world),
                rank,
                size,
                _universe: Some(Arc::new(universe)),
            })
        }
    }

    /// Pending send; owns the buffer until the request completes.
    pub struct MpiSendHandle {
        request: Request<'static, [u8], StaticScope>,
        buffer: *mut [u8],
    }

    impl Wait for MpiSendHandle {
        fn wait(self) -> Option<Vec<u8>> {
            self.request.wait();
            // SAFETY: `buffer` came from `Box::leak` in `isend` and the request
            // that borrowed it has completed.
            drop(unsafe { Box::from_raw(self.buffer) });
            None
        }
    }

    /// Pending receive; the message is pulled in `wait`.
    pub struct MpiRecvHandle {
        world: Arc<SimpleCommunicator>,
        peer: i32,
        tag: i32,
        max_len: usize,
    }

    impl Wait for MpiRecvHandle {
        fn wait(self) -> Option<Vec<u8>> {
            let (mut data, _status) = self
                .world
                .process_at_rank(self.peer)
                .receive_vec_with_tag::<u8>(self.tag);
            data.truncate(self.max_len);
            Some(data)
        }
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSendHandle;
        type RecvHandle = MpiRecvHandle;

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSendHandle {
            let owned: &'static mut [u8] = Box::leak(buf.to_vec().into_boxed_slice());
            let buffer: *mut [u8] = owned;
            // SAFETY: the leaked allocation outlives the request; it is freed
            // in `MpiSendHandle::wait`.
            let shared: &'static [u8] = unsafe { &*buffer };
            let request = self
                .world
                .process_at_rank(peer as i32)
                .immediate_send_with_tag(StaticScope, shared, tag as i32);
            MpiSendHandle { request, buffer }
        }

        fn irecv(&self, peer: usize, tag: u16, buf: &mut [u8]) -> MpiRecvHandle {
            MpiRecvHandle {
                world: self.world.clone(),
                peer: peer as i32,
                tag: tag as i32,
                max_len: buf.len(),
            }
        }

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

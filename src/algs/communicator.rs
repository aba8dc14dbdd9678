//! Thin façade over intra-process (threads) or inter-process (MPI) message passing.
//!
//! Messages are *contiguous byte slices* (no zero-copy guarantees).
//! All handles are **waitable**; callers `.wait()` before they trust that a receive
//! has completed. Collectives have default implementations on top of point-to-point
//! messages and must be entered by every worker in the same order.

use crate::mesh_error::MeshError;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Message tag of one exchange phase.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct CommTag(pub u16);

impl CommTag {
    pub const fn new(base: u16) -> Self {
        Self(base)
    }

    pub const fn base(self) -> u16 {
        self.0
    }

    /// Tag `k` steps after this one.
    pub const fn offset(self, k: u16) -> Self {
        Self(self.0.wrapping_add(k))
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

fn peer_gone(peer: usize, what: &str, tag: CommTag) -> MeshError {
    MeshError::CommError {
        neighbor: peer,
        detail: format!("{what} on tag {:#06x}: peer stopped before sending", tag.base()),
    }
}

fn decode_u64(peer: usize, bytes: &[u8]) -> Result<u64, MeshError> {
    let arr: [u8; 8] = bytes.try_into().map_err(|_| {
        MeshError::Wire(format!(
            "expected an 8-byte word from rank {peer}, got {} bytes",
            bytes.len()
        ))
    })?;
    Ok(u64::from_le_bytes(arr))
}

/// Message-passing interface of one worker.
pub trait Communicator {
    /// Handle returned by `isend`.
    type SendHandle: Wait;
    /// Handle returned by `irecv`.
    type RecvHandle: Wait;

    /// Index of this worker.
    fn rank(&self) -> usize;
    /// Number of workers.
    fn size(&self) -> usize;

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> Self::SendHandle;
    fn irecv(&self, peer: usize, tag: u16) -> Self::RecvHandle;

    /// Every worker contributes `local`; every worker receives all contributions by rank.
    fn all_gather(&self, tag: CommTag, local: &[u8]) -> Result<Vec<Vec<u8>>, MeshError> {
        let (me, n) = (self.rank(), self.size());
        let sends: Vec<_> = (0..n)
            .filter(|&peer| peer != me)
            .map(|peer| self.isend(peer, tag.base(), local))
            .collect();
        let mut out = Vec::with_capacity(n);
        for peer in 0..n {
            if peer == me {
                out.push(local.to_vec());
            } else {
                let data = self
                    .irecv(peer, tag.base())
                    .wait()
                    .ok_or_else(|| peer_gone(peer, "all_gather", tag))?;
                out.push(data);
            }
        }
        for s in sends {
            let _ = s.wait();
        }
        Ok(out)
    }

    /// Personalized exchange: `outgoing[r]` goes to worker `r`; the result holds what each
    /// worker sent here, by rank.
    fn all_to_all(&self, tag: CommTag, outgoing: Vec<Vec<u8>>) -> Result<Vec<Vec<u8>>, MeshError> {
        let (me, n) = (self.rank(), self.size());
        if outgoing.len() != n {
            return Err(MeshError::CommError {
                neighbor: me,
                detail: format!("all_to_all given {} buffers for {n} workers", outgoing.len()),
            });
        }
        let mut incoming = vec![Vec::new(); n];
        let mut sends = Vec::with_capacity(n);
        for (peer, buf) in outgoing.into_iter().enumerate() {
            if peer == me {
                incoming[me] = buf;
            } else {
                sends.push(self.isend(peer, tag.base(), &buf));
            }
        }
        for (peer, slot) in incoming.iter_mut().enumerate() {
            if peer == me {
                continue;
            }
            *slot = self
                .irecv(peer, tag.base())
                .wait()
                .ok_or_else(|| peer_gone(peer, "all_to_all", tag))?;
        }
        for s in sends {
            let _ = s.wait();
        }
        Ok(incoming)
    }

    fn all_reduce_sum(&self, tag: CommTag, value: u64) -> Result<u64, MeshError> {
        let all = self.all_gather(tag, &value.to_le_bytes())?;
        all.iter()
            .enumerate()
            .try_fold(0u64, |acc, (peer, b)| -> Result<u64, MeshError> {
                Ok(acc + decode_u64(peer, b)?)
            })
    }

    fn all_reduce_max(&self, tag: CommTag, value: u64) -> Result<u64, MeshError> {
        let all = self.all_gather(tag, &value.to_le_bytes())?;
        all.iter()
            .enumerate()
            .try_fold(0u64, |acc, (peer, b)| -> Result<u64, MeshError> {
                Ok(acc.max(decode_u64(peer, b)?))
            })
    }

    /// Logical OR across workers.
    fn any(&self, tag: CommTag, flag: bool) -> Result<bool, MeshError> {
        Ok(self.all_reduce_max(tag, u64::from(flag))? != 0)
    }

    fn barrier(&self, tag: CommTag) -> Result<(), MeshError> {
        self.all_gather(tag, &[]).map(|_| ())
    }
}

/// Compile-time no-op comm for single-worker runs.
#[derive(Clone, Debug, Default)]
pub struct NoComm;

impl Communicator for NoComm {
    type SendHandle = ();
    type RecvHandle = ();

    fn rank(&self) -> usize {
        0
    }
    fn size(&self) -> usize {
        1
    }
    fn isend(&self, _peer: usize, _tag: u16, _buf: &[u8]) {}
    fn irecv(&self, _peer: usize, _tag: u16) {}
}

// --- LocalComm: in-process workers on threads ---
type Key = (usize, usize, u16); // (src, dst, tag)

struct Mailbox {
    queues: DashMap<Key, VecDeque<Bytes>>,
    doorbell: Mutex<()>,
    ring: Condvar,
    departed: Vec<AtomicBool>,
    aborted: AtomicBool,
}

impl Mailbox {
    fn new(size: usize) -> Self {
        Self {
            queues: DashMap::new(),
            doorbell: Mutex::new(()),
            ring: Condvar::new(),
            departed: (0..size).map(|_| AtomicBool::new(false)).collect(),
            aborted: AtomicBool::new(false),
        }
    }

    /// Drained queues are dropped so the map only holds keys with pending messages.
    fn pop(&self, key: &Key) -> Option<Bytes> {
        let data = self.queues.get_mut(key).and_then(|mut q| q.pop_front());
        if data.is_some() {
            self.queues.remove_if(key, |_, q| q.is_empty());
        }
        data
    }

    fn post(&self, key: Key, data: Bytes) {
        self.queues.entry(key).or_default().push_back(data);
        let _guard = self.doorbell.lock();
        self.ring.notify_all();
    }

    fn depart(&self, rank: usize, panicked: bool) {
        self.departed[rank].store(true, Ordering::SeqCst);
        if panicked {
            self.aborted.store(true, Ordering::SeqCst);
        }
        let _guard = self.doorbell.lock();
        self.ring.notify_all();
    }
}

/// Receive handle of a [`LocalComm`]; blocks in [`Wait::wait`].
pub struct LocalRecv {
    mailbox: Arc<Mailbox>,
    key: Key,
}

impl Wait for LocalRecv {
    fn wait(self) -> Option<Vec<u8>> {
        let src = self.key.0;
        loop {
            if let Some(bytes) = self.mailbox.pop(&self.key) {
                return Some(bytes.to_vec());
            }
            if self.mailbox.departed[src].load(Ordering::SeqCst)
                || self.mailbox.aborted.load(Ordering::SeqCst)
            {
                // One more look: the peer may have posted right before leaving.
                return self.mailbox.pop(&self.key).map(|b| b.to_vec());
            }
            let mut guard = self.mailbox.doorbell.lock();
            self.mailbox
                .ring
                .wait_for(&mut guard, Duration::from_millis(1));
        }
    }
}

/// One worker of an in-process world. Messages are FIFO per `(src, dst, tag)`.
#[derive(Clone)]
pub struct LocalComm {
    rank: usize,
    size: usize,
    mailbox: Arc<Mailbox>,
}

impl std::fmt::Debug for LocalComm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalComm")
            .field("rank", &self.rank)
            .field("size", &self.size)
            .finish()
    }
}

impl LocalComm {
    /// Communicators for a world of `size` workers sharing one mailbox.
    pub fn world(size: usize) -> Vec<LocalComm> {
        let mailbox = Arc::new(Mailbox::new(size));
        (0..size)
            .map(|rank| LocalComm {
                rank,
                size,
                mailbox: Arc::clone(&mailbox),
            })
            .collect()
    }

    /// Mark this worker as gone; peers waiting on it stop blocking.
    pub fn depart(&self) {
        self.mailbox.depart(self.rank, false);
    }
}

impl Communicator for LocalComm {
    type SendHandle = ();
    type RecvHandle = LocalRecv;

    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn isend(&self, peer: usize, tag: u16, buf: &[u8]) {
        log::trace!("rank {} -> {peer} tag {tag:#06x}: {} bytes", self.rank, buf.len());
        self.mailbox
            .post((self.rank, peer, tag), Bytes::copy_from_slice(buf));
    }

    fn irecv(&self, peer: usize, tag: u16) -> LocalRecv {
        LocalRecv {
            mailbox: Arc::clone(&self.mailbox),
            key: (peer, self.rank, tag),
        }
    }
}

/// Run `f` on `n` in-process workers, one thread each, and collect the results by rank.
///
/// When a worker panics, workers blocked on it see a [`MeshError::CommError`] instead of
/// hanging, and the first panic is re-raised on the calling thread once all workers stop.
pub fn spawn_world<R, F>(n: usize, f: F) -> Vec<R>
where
    F: Fn(LocalComm) -> R + Sync,
    R: Send,
{
    assert!(n > 0, "a world needs at least one worker");
    let comms = LocalComm::world(n);
    std::thread::scope(|scope| {
        let handles: Vec<_> = comms
            .into_iter()
            .map(|comm| {
                let f = &f;
                scope.spawn(move || {
                    let rank = comm.rank;
                    let mailbox = Arc::clone(&comm.mailbox);
                    let result = panic::catch_unwind(AssertUnwindSafe(|| f(comm)));
                    mailbox.depart(rank, result.is_err());
                    result
                })
            })
            .collect();
        let mut out = Vec::with_capacity(n);
        let mut first_panic = None;
        for h in handles {
            match h.join() {
                Ok(Ok(r)) => out.push(r),
                Ok(Err(payload)) | Err(payload) => {
                    first_panic.get_or_insert(payload);
                }
            }
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
        out
    })
}

// --- MPI backend (feature = "mpi-support") ---
#[cfg(feature = "mpi-support")]
mod mpi_backend {
    use super::{CommTag, Communicator, Wait};
    use crate::mesh_error::MeshError;
    use mpi::Count;
    use mpi::collective::SystemOperation;
    use mpi::datatype::{Partition, PartitionMut};
    use mpi::environment::Universe;
    use mpi::topology::SimpleCommunicator;
    use mpi::traits::{
        Communicator as _, CommunicatorCollectives as _, Destination as _, Source as _,
    };

    /// World communicator of an MPI job. Point-to-point sends block until buffered;
    /// collectives map onto native MPI collectives.
    pub struct MpiComm {
        _universe: Universe,
        world: SimpleCommunicator,
        rank: usize,
        size: usize,
    }

    impl MpiComm {
        pub fn new() -> Result<Self, MeshError> {
            let universe = mpi::initialize().ok_or_else(|| MeshError::CommError {
                neighbor: 0,
                detail: "MPI was already initialized".into(),
            })?;
            let world = universe.world();
            let rank = world.rank() as usize;
            let size = world.size() as usize;
            Ok(Self {
                _universe: universe,
                world,
                rank,
                size,
            })
        }
    }

    pub struct MpiSend;

    impl Wait for MpiSend {
        fn wait(self) -> Option<Vec<u8>> {
            None
        }
    }

    pub struct MpiRecv(Option<Vec<u8>>);

    impl Wait for MpiRecv {
        fn wait(self) -> Option<Vec<u8>> {
            self.0
        }
    }

    fn displacements(counts: &[Count]) -> Vec<Count> {
        counts
            .iter()
            .scan(0, |acc, &c| {
                let d = *acc;
                *acc += c;
                Some(d)
            })
            .collect()
    }

    fn split(buf: Vec<u8>, counts: &[Count], displs: &[Count]) -> Vec<Vec<u8>> {
        counts
            .iter()
            .zip(displs)
            .map(|(&c, &d)| buf[d as usize..(d + c) as usize].to_vec())
            .collect()
    }

    impl Communicator for MpiComm {
        type SendHandle = MpiSend;
        type RecvHandle = MpiRecv;

        fn rank(&self) -> usize {
            self.rank
        }

        fn size(&self) -> usize {
            self.size
        }

        fn isend(&self, peer: usize, tag: u16, buf: &[u8]) -> MpiSend {
            self.world
                .process_at_rank(peer as i32)
                .send_with_tag(buf, i32::from(tag));
            MpiSend
        }

        fn irecv(&self, peer: usize, tag: u16) -> MpiRecv {
            let (data, _status) = self
                .world
                .process_at_rank(peer as i32)
                .receive_vec_with_tag::<u8>(i32::from(tag));
            MpiRecv(Some(data))
        }

        fn all_gather(&self, _tag: CommTag, local: &[u8]) -> Result<Vec<Vec<u8>>, MeshError> {
            let my_len = local.len() as Count;
            let mut counts = vec![0 as Count; self.size];
            self.world.all_gather_into(&my_len, &mut counts[..]);
            let displs = displacements(&counts);
            let total: Count = counts.iter().sum();
            let mut buf = vec![0u8; total as usize];
            {
                let mut part = PartitionMut::new(&mut buf[..], &counts[..], &displs[..]);
                self.world.all_gather_varcount_into(local, &mut part);
            }
            Ok(split(buf, &counts, &displs))
        }

        fn all_to_all(
            &self,
            _tag: CommTag,
            outgoing: Vec<Vec<u8>>,
        ) -> Result<Vec<Vec<u8>>, MeshError> {
            if outgoing.len() != self.size {
                return Err(MeshError::CommError {
                    neighbor: self.rank,
                    detail: format!(
                        "all_to_all given {} buffers for {} workers",
                        outgoing.len(),
                        self.size
                    ),
                });
            }
            let send_counts: Vec<Count> = outgoing.iter().map(|b| b.len() as Count).collect();
            let send_displs = displacements(&send_counts);
            let send: Vec<u8> = outgoing.concat();
            let mut recv_counts = vec![0 as Count; self.size];
            self.world.all_to_all_into(&send_counts[..], &mut recv_counts[..]);
            let recv_displs = displacements(&recv_counts);
            let total: Count = recv_counts.iter().sum();
            let mut recv = vec![0u8; total as usize];
            {
                let send_part = Partition::new(&send[..], &send_counts[..], &send_displs[..]);
                let mut recv_part =
                    PartitionMut::new(&mut recv[..], &recv_counts[..], &recv_displs[..]);
                self.world
                    .all_to_all_varcount_into(&send_part, &mut recv_part);
            }
            Ok(split(recv, &recv_counts, &recv_displs))
        }

        fn all_reduce_sum(&self, _tag: CommTag, value: u64) -> Result<u64, MeshError> {
            let mut out = 0u64;
            self.world
                .all_reduce_into(&value, &mut out, SystemOperation::sum());
            Ok(out)
        }

        fn all_reduce_max(&self, _tag: CommTag, value: u64) -> Result<u64, MeshError> {
            let mut out = 0u64;
            self.world
                .all_reduce_into(&value, &mut out, SystemOperation::max());
            Ok(out)
        }

        fn barrier(&self, _tag: CommTag) -> Result<(), MeshError> {
            self.world.barrier();
            Ok(())
        }
    }
}

#[cfg(feature = "mpi-support")]
pub use mpi_backend::MpiComm;

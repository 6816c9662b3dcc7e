//! Process groups and synchronous collective communication.
//!
//! The distributed parts of `canort` are expressed against the [`ProcessGroup`]
//! trait, which exposes the collective primitives supplied by the surrounding
//! execution environment: rank, size, barrier, broadcast, fixed-size gather and
//! variable-size gather. Semantics are MPI-like: every member of a group must
//! call each collective, in the same order, or the group deadlocks. There is no
//! cancellation and no timeout; a failure inside a collective is fatal to the
//! whole group.
//!
//! Two implementations are provided: [`LocalGroup`], the trivial single-process
//! group, and [`ThreadGroup`], an in-process group of OS threads used to
//! exercise multi-rank behaviour without an MPI launcher. An MPI-backed
//! implementation can be supplied by downstream code through the same trait.

use std::any::Any;
use std::sync::{Arc, Barrier, Mutex};
use std::thread;

use itertools::Itertools;

pub mod taskvec;

#[cfg(test)]
#[path = "comm_tests.rs"]
mod comm_tests;

/// Marker trait for element types that can travel through collectives.
pub trait CollectiveElem: Clone + Default + Send + 'static {}

impl<T: Clone + Default + Send + 'static> CollectiveElem for T {}

/// A group of cooperating processes executing synchronous collectives.
///
/// Contract violations (root out of range, mismatched contribution counts,
/// mismatched element types) are programming errors of the deadlock class and
/// panic rather than returning recoverable errors.
pub trait ProcessGroup {
    /// Returns the rank of the calling process within the group.
    fn rank(&self) -> usize;

    /// Returns the number of processes in the group.
    fn size(&self) -> usize;

    /// Blocks until every member of the group has entered the barrier.
    fn barrier(&self);

    /// Replicates the contents of `data` on `root` to every member of the
    /// group. On non-root ranks the vector is resized to the root's length.
    fn broadcast<T: CollectiveElem>(&self, data: &mut Vec<T>, root: usize);

    /// Gathers equal-length contributions from every rank onto `root`, in
    /// ascending rank order. Returns `Some` on the root and `None` elsewhere.
    fn gather<T: CollectiveElem>(&self, send: &[T], root: usize) -> Option<Vec<T>>;

    /// Gathers variable-length contributions onto `root`, placing rank `r`'s
    /// contribution at `displs[r]`. `counts` and `displs` are significant only
    /// at the root; non-root ranks may pass empty slices. Returns `Some` on
    /// the root and `None` elsewhere.
    fn gatherv<T: CollectiveElem>(
        &self,
        send: &[T],
        counts: &[usize],
        displs: &[usize],
        root: usize,
    ) -> Option<Vec<T>>;
}

/// Computes the exclusive prefix sum over per-rank contribution counts, giving
/// the receive-buffer displacement of each rank's contribution.
pub fn exclusive_prefix_sum(counts: &[usize]) -> Vec<usize> {
    counts
        .iter()
        .scan(0, |acc, count| {
            let displ = *acc;
            *acc += count;
            Some(displ)
        })
        .collect_vec()
}

// ==========
// LocalGroup
// ==========

/// The trivial process group containing only the calling process.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalGroup;

impl ProcessGroup for LocalGroup {
    fn rank(&self) -> usize {
        0
    }

    fn size(&self) -> usize {
        1
    }

    fn barrier(&self) {}

    fn broadcast<T: CollectiveElem>(&self, _data: &mut Vec<T>, root: usize) {
        assert_eq!(root, 0, "broadcast root {root} outside a group of size 1");
    }

    fn gather<T: CollectiveElem>(&self, send: &[T], root: usize) -> Option<Vec<T>> {
        assert_eq!(root, 0, "gather root {root} outside a group of size 1");
        Some(send.to_vec())
    }

    fn gatherv<T: CollectiveElem>(
        &self,
        send: &[T],
        counts: &[usize],
        displs: &[usize],
        root: usize,
    ) -> Option<Vec<T>> {
        assert_eq!(root, 0, "gatherv root {root} outside a group of size 1");
        assert_eq!(counts.len(), 1, "gatherv counts must cover every rank");
        assert_eq!(displs.len(), 1, "gatherv displacements must cover every rank");
        assert_eq!(
            counts[0],
            send.len(),
            "gatherv contribution length does not match the declared count"
        );
        let mut recv = vec![T::default(); displs[0] + counts[0]];
        recv[displs[0]..].clone_from_slice(send);
        Some(recv)
    }
}

// ===========
// ThreadGroup
// ===========

/// Shared state of a [`ThreadGroup`]: a barrier and one exchange slot per rank.
struct GroupShared {
    barrier: Barrier,
    slots: Vec<Mutex<Option<Box<dyn Any + Send>>>>,
}

impl GroupShared {
    fn new(size: usize) -> Self {
        Self {
            barrier: Barrier::new(size),
            slots: (0..size).map(|_| Mutex::new(None)).collect(),
        }
    }
}

/// An in-process group of OS threads sharing a barrier and per-rank exchange
/// slots. Collectives move data through shared memory; every rank deposits its
/// contribution, waits at the barrier, and the relevant ranks read the slots
/// before a second barrier releases them.
pub struct ThreadGroup {
    rank: usize,
    shared: Arc<GroupShared>,
}

impl ThreadGroup {
    /// Spawns a group of `size` threads, each executing `f` with its own group
    /// handle, and returns the per-rank results in ascending rank order.
    pub fn spawn<F, R>(size: usize, f: F) -> Vec<R>
    where
        F: Fn(ThreadGroup) -> R + Send + Sync + 'static,
        R: Send + 'static,
    {
        assert!(size >= 1, "a process group must have at least one member");
        let shared = Arc::new(GroupShared::new(size));
        let f = Arc::new(f);
        let handles = (0..size)
            .map(|rank| {
                let group = ThreadGroup {
                    rank,
                    shared: Arc::clone(&shared),
                };
                let f = Arc::clone(&f);
                thread::spawn(move || f(group))
            })
            .collect_vec();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("a group member panicked"))
            .collect_vec()
    }

    fn deposit<T: CollectiveElem>(&self, payload: Vec<T>) {
        let mut slot = self.shared.slots[self.rank]
            .lock()
            .expect("exchange slot poisoned");
        *slot = Some(Box::new(payload));
    }

    fn clear_own_slot(&self) {
        let mut slot = self.shared.slots[self.rank]
            .lock()
            .expect("exchange slot poisoned");
        *slot = None;
    }

    fn read_slot<T: CollectiveElem>(&self, rank: usize) -> Vec<T> {
        let slot = self.shared.slots[rank]
            .lock()
            .expect("exchange slot poisoned");
        slot.as_ref()
            .and_then(|payload| payload.downcast_ref::<Vec<T>>())
            .expect("mismatched element types in a collective")
            .clone()
    }
}

impl ProcessGroup for ThreadGroup {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.shared.slots.len()
    }

    fn barrier(&self) {
        self.shared.barrier.wait();
    }

    fn broadcast<T: CollectiveElem>(&self, data: &mut Vec<T>, root: usize) {
        assert!(
            root < self.size(),
            "broadcast root {root} outside a group of size {}",
            self.size()
        );
        if self.rank == root {
            self.deposit(data.clone());
        }
        self.shared.barrier.wait();
        if self.rank != root {
            *data = self.read_slot(root);
        }
        self.shared.barrier.wait();
        if self.rank == root {
            self.clear_own_slot();
        }
    }

    fn gather<T: CollectiveElem>(&self, send: &[T], root: usize) -> Option<Vec<T>> {
        assert!(
            root < self.size(),
            "gather root {root} outside a group of size {}",
            self.size()
        );
        self.deposit(send.to_vec());
        self.shared.barrier.wait();
        let gathered = (self.rank == root).then(|| {
            let mut recv = Vec::with_capacity(send.len() * self.size());
            for rank in 0..self.size() {
                let contribution: Vec<T> = self.read_slot(rank);
                assert_eq!(
                    contribution.len(),
                    send.len(),
                    "unequal contribution lengths in a fixed-size gather"
                );
                recv.extend(contribution);
            }
            recv
        });
        self.shared.barrier.wait();
        self.clear_own_slot();
        gathered
    }

    fn gatherv<T: CollectiveElem>(
        &self,
        send: &[T],
        counts: &[usize],
        displs: &[usize],
        root: usize,
    ) -> Option<Vec<T>> {
        assert!(
            root < self.size(),
            "gatherv root {root} outside a group of size {}",
            self.size()
        );
        self.deposit(send.to_vec());
        self.shared.barrier.wait();
        let gathered = (self.rank == root).then(|| {
            assert_eq!(counts.len(), self.size(), "gatherv counts must cover every rank");
            assert_eq!(
                displs.len(),
                self.size(),
                "gatherv displacements must cover every rank"
            );
            let total = counts
                .iter()
                .zip(displs.iter())
                .map(|(count, displ)| displ + count)
                .max()
                .unwrap_or(0);
            let mut recv = vec![T::default(); total];
            for rank in 0..self.size() {
                let contribution: Vec<T> = self.read_slot(rank);
                assert_eq!(
                    contribution.len(),
                    counts[rank],
                    "gatherv contribution length of rank {rank} does not match the declared count"
                );
                recv[displs[rank]..displs[rank] + counts[rank]].clone_from_slice(&contribution);
            }
            recv
        });
        self.shared.barrier.wait();
        self.clear_own_slot();
        gathered
    }
}

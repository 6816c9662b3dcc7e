//! Collective gather of per-process task vectors.
//!
//! Distributed task scheduling partitions a global task list into per-process
//! triples of shell-index and task-count vectors. [`gather_task_vectors`]
//! rebuilds the global triple on a coordinating process from the local
//! partitions, concatenated in ascending rank order.

use anyhow::{self, ensure};

use crate::comm::{exclusive_prefix_sum, ProcessGroup};

#[cfg(test)]
#[path = "taskvec_tests.rs"]
mod taskvec_tests;

/// Three equal-length integer vectors describing a partition of a task list.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TaskVectorTriple {
    /// First shell indices of the tasks.
    pub s1: Vec<i64>,

    /// Second shell indices of the tasks.
    pub s2: Vec<i64>,

    /// Task counts per shell pair.
    pub ntasks: Vec<i64>,
}

impl TaskVectorTriple {
    /// Returns the common length of the three vectors, or `None` if they
    /// disagree.
    pub fn common_len(&self) -> Option<usize> {
        (self.s1.len() == self.s2.len() && self.s1.len() == self.ntasks.len())
            .then_some(self.s1.len())
    }
}

/// Gathers the local task-vector triples of every rank onto `root`.
///
/// Every rank first reports its three local lengths through a fixed-size
/// gather; the root derives the receive displacements as exclusive prefix sums
/// over the reported lengths in ascending rank order; three independent
/// variable-length gathers then collect the vectors themselves. The
/// concatenation order of the global vectors is therefore by ascending rank,
/// then by original local order within each rank's contribution.
///
/// Every member of the group must call this function; non-root ranks
/// participate in all collectives and receive `Ok(None)`.
///
/// # Errors
///
/// Errors if the local vectors have unequal lengths, or if the gathered global
/// vectors have unequal lengths. The latter indicates a bookkeeping bug in the
/// caller's task partitioning and is not recoverable.
pub fn gather_task_vectors<G: ProcessGroup>(
    group: &G,
    local: &TaskVectorTriple,
    root: usize,
) -> Result<Option<TaskVectorTriple>, anyhow::Error> {
    ensure!(
        root < group.size(),
        "gather root {root} outside a group of size {}",
        group.size()
    );
    ensure!(
        local.common_len().is_some(),
        "local task vectors have unequal lengths: s1 = {}, s2 = {}, ntasks = {}",
        local.s1.len(),
        local.s2.len(),
        local.ntasks.len()
    );

    // Root gathers the number of elements held by each rank.
    let s1_counts = group.gather(&[local.s1.len()], root);
    let s2_counts = group.gather(&[local.s2.len()], root);
    let nt_counts = group.gather(&[local.ntasks.len()], root);

    // Displacements in the receive buffers, in ascending rank order.
    let (s1_counts, s1_displs) = counts_and_displs(s1_counts);
    let (s2_counts, s2_displs) = counts_and_displs(s2_counts);
    let (nt_counts, nt_displs) = counts_and_displs(nt_counts);

    let s1_all = group.gatherv(&local.s1, &s1_counts, &s1_displs, root);
    let s2_all = group.gatherv(&local.s2, &s2_counts, &s2_displs, root);
    let nt_all = group.gatherv(&local.ntasks, &nt_counts, &nt_displs, root);

    if group.rank() == root {
        let global = TaskVectorTriple {
            s1: s1_all.unwrap_or_default(),
            s2: s2_all.unwrap_or_default(),
            ntasks: nt_all.unwrap_or_default(),
        };
        ensure!(
            global.common_len().is_some(),
            "gathered task vectors have unequal lengths (s1 = {}, s2 = {}, ntasks = {}); \
             this indicates a bookkeeping bug in the caller's task partitioning",
            global.s1.len(),
            global.s2.len(),
            global.ntasks.len()
        );
        Ok(Some(global))
    } else {
        Ok(None)
    }
}

fn counts_and_displs(counts: Option<Vec<usize>>) -> (Vec<usize>, Vec<usize>) {
    match counts {
        Some(counts) => {
            let displs = exclusive_prefix_sum(&counts);
            (counts, displs)
        }
        None => (Vec::new(), Vec::new()),
    }
}

//! Linear-dependency detection in overlap spectra.
//!
//! A near-zero overlap eigenvalue indicates basis-function redundancy that
//! must be removed before inversion. [`filter_linear_dependencies`] decides
//! the cut between ill-conditioned and well-conditioned directions from the
//! ascending eigenvalues alone, so the decision is pure and reproducible;
//! [`broadcast_rank_decision`] is the single synchronisation point that makes
//! every process of a group agree on the cut before any `n_cond`-sized tensor
//! is allocated.

use std::fmt::LowerExp;

use anyhow::{self, ensure, format_err};
use ndarray::ArrayView1;
use num::Float;

use crate::comm::ProcessGroup;
use crate::io::format::canort_warn;

#[cfg(test)]
#[path = "lindep_tests.rs"]
mod lindep_tests;

/// The outcome of the linear-dependency cut on an ascending overlap spectrum.
#[derive(Clone, Debug, PartialEq)]
pub struct LindepDecision<T> {
    /// Number of directions below the threshold, dropped.
    pub n_illcond: usize,

    /// Number of retained directions.
    pub n_cond: usize,

    /// Index of the first retained eigenvalue, or `None` if the whole
    /// spectrum lies below the threshold.
    pub first_retained: Option<usize>,

    /// Largest eigenvalue divided by the smallest retained eigenvalue; NaN
    /// when nothing is retained.
    pub result_condition_number: T,
}

/// Determines the linear-dependency cut for an ascending eigenvalue sequence.
///
/// The threshold is an absolute eigenvalue cutoff, not a relative ratio;
/// eigenvalues exactly equal to the threshold are retained. Zero or negative
/// eigenvalues (numerical noise for a valid overlap) are always dropped as
/// long as the threshold is positive. An empty retained set (`n_cond == 0`)
/// is a degenerate but non-crashing outcome: the condition diagnostic becomes
/// NaN and downstream sizing yields empty transforms.
pub fn filter_linear_dependencies<T>(eigenvalues: ArrayView1<T>, threshold: T) -> LindepDecision<T>
where
    T: Float,
{
    let n = eigenvalues.len();
    let first_retained = eigenvalues.iter().position(|e| *e >= threshold);
    let n_illcond = first_retained.unwrap_or(n);
    let result_condition_number = match first_retained {
        Some(first) => eigenvalues[n - 1] / eigenvalues[first],
        None => T::nan(),
    };
    LindepDecision {
        n_illcond,
        n_cond: n - n_illcond,
        first_retained,
        result_condition_number,
    }
}

/// Emits the linear-dependency audit trail: a warning naming the number of
/// dropped directions, the first retained eigenvalue, and each dropped
/// eigenvalue. Quiet when nothing was dropped.
pub fn report_linear_dependencies<T>(eigenvalues: ArrayView1<T>, decision: &LindepDecision<T>)
where
    T: Float + LowerExp,
{
    if decision.n_illcond == 0 {
        return;
    }
    canort_warn!(
        "Found {} linear dependencies in the overlap spectrum.",
        decision.n_illcond
    );
    match decision.first_retained {
        Some(first) => canort_warn!(
            "First eigenvalue above the linear-dependency threshold: {:.6e}",
            eigenvalues[first]
        ),
        None => canort_warn!(
            "All {} eigenvalues lie below the linear-dependency threshold; the retained subspace is empty.",
            decision.n_illcond
        ),
    }
    canort_warn!("Eigenvalues deemed linearly dependent:");
    for (i, eigenvalue) in eigenvalues.iter().take(decision.n_illcond).enumerate() {
        canort_warn!("  {}: {:.6e}", i + 1, eigenvalue);
    }
}

/// Broadcasts the coordinator's `n_illcond` decision to every member of the
/// group and returns it on all ranks.
///
/// This is the one synchronisation point of the orthogonalisation: every
/// downstream tensor is sized by the value it returns, so every process must
/// call it before allocating anything `n_cond`-dependent, even in a group of
/// size 1. Ranks other than the coordinator may pass `None` (dense mode) or a
/// redundantly computed local decision (distributed mode); the broadcast value
/// wins everywhere.
pub fn broadcast_rank_decision<G: ProcessGroup>(
    group: &G,
    n_illcond: Option<usize>,
    coordinator: usize,
) -> Result<usize, anyhow::Error> {
    ensure!(
        coordinator < group.size(),
        "coordinator rank {coordinator} outside a group of size {}",
        group.size()
    );
    let mut buf = if group.rank() == coordinator {
        vec![n_illcond
            .ok_or_else(|| format_err!("the coordinator holds no linear-dependency decision"))?]
    } else {
        Vec::new()
    };
    group.broadcast(&mut buf, coordinator);
    buf.first()
        .copied()
        .ok_or_else(|| format_err!("the rank-decision broadcast delivered no value"))
}

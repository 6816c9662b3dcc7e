use approx::assert_abs_diff_eq;
use ndarray::array;
use proptest::prelude::*;
use serial_test::serial;

use crate::comm::{LocalGroup, ProcessGroup, ThreadGroup};
use crate::ortho::lindep::{broadcast_rank_decision, filter_linear_dependencies};

#[test]
fn test_filter_drops_near_zero_eigenvalue() {
    let eigenvalues = array![1e-12, 0.5, 1.0, 2.0];
    let decision = filter_linear_dependencies(eigenvalues.view(), 1e-10);
    assert_eq!(decision.n_illcond, 1);
    assert_eq!(decision.n_cond, 3);
    assert_eq!(decision.first_retained, Some(1));
    assert_abs_diff_eq!(decision.result_condition_number, 4.0, epsilon = 1e-14);
}

#[test]
fn test_filter_retains_everything_above_threshold() {
    let eigenvalues = array![0.2, 0.7, 1.3];
    let decision = filter_linear_dependencies(eigenvalues.view(), 1e-10);
    assert_eq!(decision.n_illcond, 0);
    assert_eq!(decision.n_cond, 3);
    assert_eq!(decision.first_retained, Some(0));
}

#[test]
fn test_filter_tie_at_threshold_is_retained() {
    let eigenvalues = array![0.5, 1.0];
    let decision = filter_linear_dependencies(eigenvalues.view(), 0.5);
    assert_eq!(decision.n_illcond, 0);
    assert_eq!(decision.first_retained, Some(0));
}

#[test]
fn test_filter_degenerate_spectrum() {
    let eigenvalues = array![1e-14_f64, 1e-13, 1e-12];
    let decision = filter_linear_dependencies(eigenvalues.view(), 1e-10);
    assert_eq!(decision.n_illcond, 3);
    assert_eq!(decision.n_cond, 0);
    assert_eq!(decision.first_retained, None);
    assert!(decision.result_condition_number.is_nan());
}

#[test]
fn test_broadcast_rank_decision_single_rank() {
    assert_eq!(
        broadcast_rank_decision(&LocalGroup, Some(3), 0).unwrap(),
        3
    );
    assert!(broadcast_rank_decision(&LocalGroup, None, 0).is_err());
    assert!(broadcast_rank_decision(&LocalGroup, Some(3), 1).is_err());
}

#[test]
#[serial]
fn test_broadcast_rank_decision_propagates() {
    let decisions = ThreadGroup::spawn(4, |group| {
        let local = (group.rank() == 1).then_some(5);
        broadcast_rank_decision(&group, local, 1).unwrap()
    });
    assert_eq!(decisions, vec![5, 5, 5, 5]);
}

proptest! {
    #[test]
    fn prop_filter_partitions_spectrum(
        mut eigenvalues in proptest::collection::vec(0.0f64..10.0, 1..40),
        threshold in 0.0f64..10.0,
    ) {
        eigenvalues.sort_by(|a, b| a.partial_cmp(b).unwrap());
        let eigenvalues = ndarray::Array1::from_vec(eigenvalues);
        let decision = filter_linear_dependencies(eigenvalues.view(), threshold);
        prop_assert_eq!(decision.n_illcond + decision.n_cond, eigenvalues.len());
        prop_assert!(eigenvalues.iter().take(decision.n_illcond).all(|e| *e < threshold));
        prop_assert!(eigenvalues.iter().skip(decision.n_illcond).all(|e| *e >= threshold));
    }
}

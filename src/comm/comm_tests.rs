use proptest::prelude::*;
use serial_test::serial;

use crate::comm::{exclusive_prefix_sum, LocalGroup, ProcessGroup, ThreadGroup};

#[test]
fn test_local_group_collectives() {
    let group = LocalGroup;
    assert_eq!(group.rank(), 0);
    assert_eq!(group.size(), 1);
    group.barrier();

    let mut data = vec![1.5f64, -2.5];
    group.broadcast(&mut data, 0);
    assert_eq!(data, vec![1.5, -2.5]);

    assert_eq!(group.gather(&[7usize], 0), Some(vec![7]));
    assert_eq!(
        group.gatherv(&[1i64, 2, 3], &[3], &[0], 0),
        Some(vec![1, 2, 3])
    );
}

#[test]
#[serial]
fn test_thread_group_broadcast_propagates() {
    let received = ThreadGroup::spawn(4, |group| {
        let mut data = if group.rank() == 2 {
            vec![41usize, 42]
        } else {
            Vec::new()
        };
        group.broadcast(&mut data, 2);
        data
    });
    for data in received {
        assert_eq!(data, vec![41, 42]);
    }
}

#[test]
#[serial]
fn test_thread_group_gather_rank_order() {
    let gathered = ThreadGroup::spawn(3, |group| group.gather(&[group.rank() as i64 * 10], 0));
    assert_eq!(gathered[0], Some(vec![0, 10, 20]));
    assert_eq!(gathered[1], None);
    assert_eq!(gathered[2], None);
}

#[test]
#[serial]
fn test_thread_group_gatherv_displacements() {
    let gathered = ThreadGroup::spawn(3, |group| {
        let send = vec![group.rank() as i64; group.rank()];
        let (counts, displs) = if group.rank() == 1 {
            (vec![0, 1, 2], vec![0, 0, 1])
        } else {
            (Vec::new(), Vec::new())
        };
        group.gatherv(&send, &counts, &displs, 1)
    });
    assert_eq!(gathered[0], None);
    assert_eq!(gathered[1], Some(vec![1, 2, 2]));
    assert_eq!(gathered[2], None);
}

#[test]
fn test_exclusive_prefix_sum() {
    assert_eq!(exclusive_prefix_sum(&[]), Vec::<usize>::new());
    assert_eq!(exclusive_prefix_sum(&[2, 0, 3]), vec![0, 2, 2]);
}

proptest! {
    #[test]
    fn prop_exclusive_prefix_sum_partial_sums(
        counts in proptest::collection::vec(0usize..100, 0..16)
    ) {
        let displs = exclusive_prefix_sum(&counts);
        prop_assert_eq!(displs.len(), counts.len());
        for i in 0..counts.len() {
            prop_assert_eq!(displs[i], counts[..i].iter().sum::<usize>());
        }
    }
}

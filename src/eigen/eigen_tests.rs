use ndarray::{array, Array2};
use ndarray_linalg::assert::close_l2;
use serial_test::serial;

use crate::comm::{LocalGroup, ProcessGroup, ThreadGroup};
use crate::eigen::{
    DenseEigh, ReplicatedBlockCyclicEigh, Spectrum, SymmetricEigenBackend, SymmetricOperator,
};
use crate::matrix::ProcessGrid;

fn test_overlap() -> Array2<f64> {
    array![
        [6.0, 2.0, 1.0, 0.5, 0.0],
        [2.0, 5.0, 2.0, 1.0, 0.5],
        [1.0, 2.0, 4.0, 1.5, 1.0],
        [0.5, 1.0, 1.5, 3.0, 1.0],
        [0.0, 0.5, 1.0, 1.0, 2.0],
    ]
}

#[test]
fn test_symmetric_operator_validation() {
    assert!(SymmetricOperator::from_dense(Array2::zeros((2, 3))).is_err());
    assert!(SymmetricOperator::on_coordinator(0, None).is_err());
    assert!(SymmetricOperator::on_coordinator(3, Some(Array2::zeros((2, 2)))).is_err());
    let overlap = SymmetricOperator::from_dense(test_overlap()).unwrap();
    assert_eq!(overlap.dim(), 5);
    assert!(overlap.data().is_some());
}

#[test]
fn test_dense_eigh_ascending_orthonormal() {
    let overlap = SymmetricOperator::from_dense(test_overlap()).unwrap();
    let backend = DenseEigh { coordinator: 0 };
    let spectrum = backend.diagonalise(&overlap, &LocalGroup).unwrap();
    let dense = match spectrum {
        Spectrum::Dense(Some(dense)) => dense,
        _ => panic!("no dense spectrum on the coordinator"),
    };
    assert!(dense
        .eigenvalues
        .windows(2)
        .into_iter()
        .all(|pair| pair[0] <= pair[1]));
    let gram = dense.eigenvectors.t().dot(&dense.eigenvectors);
    close_l2(&gram, &Array2::eye(5), 1e-10);
}

#[test]
#[serial]
fn test_dense_eigh_noncoordinator_holds_nothing() {
    let held = ThreadGroup::spawn(2, |group| {
        let data = (group.rank() == 0).then(test_overlap);
        let overlap = SymmetricOperator::on_coordinator(5, data).unwrap();
        let backend = DenseEigh { coordinator: 0 };
        match backend.diagonalise(&overlap, &group).unwrap() {
            Spectrum::Dense(dense) => dense.is_some(),
            Spectrum::BlockCyclic(_) => panic!("unexpected block-cyclic spectrum"),
        }
    });
    assert_eq!(held, vec![true, false]);
}

#[test]
#[serial]
fn test_replicated_block_cyclic_eigh_layout_contract() {
    let spectra = ThreadGroup::spawn(4, |group| {
        let data = (group.rank() == 0).then(test_overlap);
        let overlap = SymmetricOperator::on_coordinator(5, data).unwrap();
        let backend = ReplicatedBlockCyclicEigh {
            mb: 2,
            grid: ProcessGrid::new(2, 2).unwrap(),
            coordinator: 0,
        };
        let spectrum = match backend.diagonalise(&overlap, &group).unwrap() {
            Spectrum::BlockCyclic(spectrum) => spectrum,
            Spectrum::Dense(_) => panic!("unexpected dense spectrum"),
        };
        let gathered = spectrum.eigenvectors.gather(&group, 0).unwrap();
        (spectrum.eigenvalues, gathered)
    });

    // Eigenvalues replicated on every grid member.
    for (eigenvalues, _) in &spectra[1..] {
        close_l2(eigenvalues, &spectra[0].0, 1e-12);
    }
    // Eigenvectors reassemble into an orthonormal matrix.
    let vmat = spectra[0].1.as_ref().expect("no gathered eigenvectors");
    let gram = vmat.t().dot(vmat);
    close_l2(&gram, &Array2::eye(5), 1e-10);
}

#[test]
fn test_replicated_block_cyclic_eigh_grid_too_large() {
    let overlap = SymmetricOperator::from_dense(test_overlap()).unwrap();
    let backend = ReplicatedBlockCyclicEigh {
        mb: 2,
        grid: ProcessGrid::new(2, 2).unwrap(),
        coordinator: 0,
    };
    assert!(backend.diagonalise(&overlap, &LocalGroup).is_err());
}

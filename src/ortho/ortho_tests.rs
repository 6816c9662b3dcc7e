use ndarray::{array, Array1, Array2};
use ndarray_linalg::assert::close_l2;
use ndarray_linalg::{Eigh, UPLO};

use crate::ortho::{
    build_canonical_transform, build_symmetric_transform, FragmentOrthogonalisable,
    OrthogonalisationKind,
};

/// Builds a symmetric matrix with the prescribed spectrum by conjugating it
/// with the eigenvectors of a fixed symmetric seed matrix.
fn symmetric_with_spectrum(eigenvalues: &[f64]) -> Array2<f64> {
    let n = eigenvalues.len();
    let seed = Array2::from_shape_fn((n, n), |(i, j)| ((3 * i + 5 * j + 7) % 11) as f64);
    let seed = (&seed + &seed.t()) / 2.0;
    let (_, vmat) = seed.eigh(UPLO::Lower).unwrap();
    let smat = vmat
        .dot(&Array2::from_diag(&Array1::from_vec(eigenvalues.to_vec())))
        .dot(&vmat.t());
    (&smat + &smat.t()) / 2.0
}

#[test]
fn test_fragment_canonical_full_rank() {
    let smat = symmetric_with_spectrum(&[0.2, 0.9, 1.4, 3.0]);
    let ortho = smat
        .view()
        .orthogonalise_fragment(OrthogonalisationKind::Canonical, 1e-10, 1e-10)
        .unwrap();
    assert_eq!(ortho.n_illcond, 0);
    assert_eq!(ortho.n_cond, 4);
    assert_eq!(ortho.diagnostics.condition_number, None);
    let identity = ortho.xmat.t().dot(&smat).dot(&ortho.xmat);
    close_l2(&identity, &Array2::eye(4), 1e-8);
}

#[test]
fn test_fragment_canonical_drops_linear_dependency() {
    let smat = symmetric_with_spectrum(&[1e-12, 0.5, 1.0, 2.0]);
    let ortho = smat
        .view()
        .orthogonalise_fragment(OrthogonalisationKind::Canonical, 1e-10, 1e-8)
        .unwrap();
    assert_eq!(ortho.n_illcond, 1);
    assert_eq!(ortho.n_cond, 3);
    assert_eq!(ortho.xmat.shape(), &[4, 3]);
    assert!((ortho.diagnostics.result_condition_number - 4.0).abs() < 1e-6);
    let identity = ortho.xmat.t().dot(&smat).dot(&ortho.xmat);
    close_l2(&identity, &Array2::eye(3), 1e-8);
}

#[test]
fn test_fragment_degenerate_spectrum_yields_empty_transform() {
    let smat = Array2::<f64>::eye(3) * 1e-14;
    let ortho = smat
        .view()
        .orthogonalise_fragment(OrthogonalisationKind::Canonical, 1e-10, 1e-10)
        .unwrap();
    assert_eq!(ortho.n_illcond, 3);
    assert_eq!(ortho.n_cond, 0);
    assert_eq!(ortho.xmat.shape(), &[3, 0]);
    assert!(ortho.diagnostics.result_condition_number.is_nan());
}

#[test]
fn test_fragment_symmetric_full_rank() {
    let smat = symmetric_with_spectrum(&[0.4, 0.8, 1.7, 2.2]);
    let ortho = smat
        .view()
        .orthogonalise_fragment(OrthogonalisationKind::Symmetric, 1e-10, 1e-10)
        .unwrap();
    assert_eq!(ortho.n_cond, 4);
    assert_eq!(ortho.xmat.shape(), &[4, 4]);
    // The symmetric transform shares row and column bases and is itself
    // symmetric.
    close_l2(&ortho.xmat.t().to_owned(), &ortho.xmat, 1e-10);
    let identity = ortho.xmat.t().dot(&smat).dot(&ortho.xmat);
    close_l2(&identity, &Array2::eye(4), 1e-8);
}

#[test]
fn test_fragment_single_precision() {
    let smat = array![[2.0f32, 0.5], [0.5, 1.0]];
    let ortho = smat
        .view()
        .orthogonalise_fragment(OrthogonalisationKind::Canonical, 1e-6, 1e-6)
        .unwrap();
    assert_eq!(ortho.n_cond, 2);
    let identity = ortho.xmat.t().dot(&smat).dot(&ortho.xmat);
    close_l2(&identity, &Array2::<f32>::eye(2), 1e-5);
}

#[test]
fn test_fragment_rejects_asymmetric_matrix() {
    let smat = array![[1.0, 0.3], [0.0, 1.0]];
    assert!(smat
        .view()
        .orthogonalise_fragment(OrthogonalisationKind::Canonical, 1e-10, 1e-10)
        .is_err());
}

#[test]
fn test_build_transform_rejects_negative_retained_eigenvalue() {
    let eigenvalues = array![-1.0, 2.0];
    let eigenvectors = Array2::<f64>::eye(2);
    assert!(build_canonical_transform(&eigenvalues.view(), &eigenvectors.view(), 0).is_err());
    assert!(build_symmetric_transform(&eigenvalues.view(), &eigenvectors.view(), 0).is_err());
    // Dropping the negative direction makes both transforms well defined.
    assert!(build_canonical_transform(&eigenvalues.view(), &eigenvectors.view(), 1).is_ok());
}

#[test]
fn test_build_canonical_transform_scales_columns() {
    let eigenvalues = array![0.25, 4.0];
    let eigenvectors = Array2::<f64>::eye(2);
    let xmat = build_canonical_transform(&eigenvalues.view(), &eigenvectors.view(), 0).unwrap();
    close_l2(&xmat, &array![[2.0, 0.0], [0.0, 0.5]], 1e-14);
}

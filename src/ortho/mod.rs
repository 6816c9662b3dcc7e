//! Assembly of orthogonalising transforms from overlap spectra.
//!
//! Given the eigendecomposition of a symmetric positive-semidefinite overlap
//! matrix and a linear-dependency cut, the transform
//! $`\mathbf{X}`$ satisfying $`\mathbf{X}^{\mathrm{T}} \mathbf{S} \mathbf{X} =
//! \mathbf{I}`$ on the retained subspace is built by scaling each retained
//! eigenvector by the inverse square root of its eigenvalue. The *canonical*
//! transform keeps the scaled eigenvectors as they are, so its rows index the
//! original basis and its columns the orthogonal one; the *symmetric* (Löwdin)
//! variant multiplies back by the eigenvector matrix and shares row and column
//! bases.

use std::fmt;

use anyhow::{self, ensure, format_err};
use duplicate::duplicate_item;
use ndarray::{s, Array2, ArrayView1, ArrayView2, Ix2, LinalgScalar};
use ndarray_einsum_beta::einsum;
use ndarray_linalg::{Eigh, Norm, UPLO};
use num::Float;
use serde::{Deserialize, Serialize};

use crate::comm::ProcessGroup;
use crate::matrix::BlockCyclicMatrix;
use crate::ortho::lindep::{filter_linear_dependencies, report_linear_dependencies};

pub mod lindep;

#[cfg(test)]
#[path = "ortho_tests.rs"]
mod ortho_tests;

// ================
// Enum definitions
// ================

/// The kind of orthogonalising transform to assemble.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrthogonalisationKind {
    /// Canonical transform: retained eigenvectors scaled by the inverse
    /// square roots of their eigenvalues, `N × n_cond`.
    #[default]
    Canonical,

    /// Symmetric (Löwdin) transform
    /// $`\mathbf{V} \mathbf{s}^{-1/2} \mathbf{V}^{\mathrm{T}}`$, `N × N`.
    Symmetric,
}

impl fmt::Display for OrthogonalisationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrthogonalisationKind::Canonical => write!(f, "canonical"),
            OrthogonalisationKind::Symmetric => write!(f, "symmetric"),
        }
    }
}

// ==================
// Struct definitions
// ==================

/// Conditioning diagnostics of an orthogonalisation.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConditionDiagnostics<T> {
    /// Raw condition number of the overlap matrix. Never computed by the
    /// current implementation; `None` is the explicit not-computed sentinel.
    pub condition_number: Option<T>,

    /// Largest eigenvalue divided by the smallest retained eigenvalue; NaN
    /// when nothing is retained.
    pub result_condition_number: T,
}

/// The result of orthogonalising a localised fragment overlap matrix.
#[derive(Clone, Debug)]
pub struct FragmentOrthogonalisation<T> {
    /// The orthogonalising transform as a plain dense matrix.
    pub xmat: Array2<T>,

    /// Number of directions dropped as linearly dependent.
    pub n_illcond: usize,

    /// Number of retained directions.
    pub n_cond: usize,

    /// Conditioning diagnostics.
    pub diagnostics: ConditionDiagnostics<T>,
}

// =========
// Functions
// =========

/// Builds the canonical transform from an ascending eigendecomposition:
/// eigenvector columns `n_illcond..` scaled by the inverse square roots of
/// their eigenvalues, giving an `N × n_cond` matrix.
///
/// # Errors
///
/// Errors on mismatched eigenpair dimensions or non-positive retained
/// eigenvalues.
pub fn build_canonical_transform<T>(
    eigenvalues: &ArrayView1<T>,
    eigenvectors: &ArrayView2<T>,
    n_illcond: usize,
) -> Result<Array2<T>, anyhow::Error>
where
    T: Float + LinalgScalar,
{
    let n = check_eigenpairs(eigenvalues, eigenvectors, n_illcond)?;
    if n_illcond == n {
        return Ok(Array2::zeros((n, 0)));
    }
    let vcond = eigenvectors.slice(s![.., n_illcond..]);
    let scale = eigenvalues
        .slice(s![n_illcond..])
        .mapv(|eigenvalue| T::one() / eigenvalue.sqrt());
    einsum("ij,j->ij", &[&vcond, &scale])
        .map_err(|err| format_err!(err))?
        .into_dimensionality::<Ix2>()
        .map_err(|err| format_err!(err))
}

/// Builds the symmetric (Löwdin) transform
/// $`\mathbf{V}_{\mathrm{cond}} \mathbf{s}^{-1/2}
/// \mathbf{V}_{\mathrm{cond}}^{\mathrm{T}}`$ from an ascending
/// eigendecomposition, giving an `N × N` matrix of rank `n_cond`.
///
/// # Errors
///
/// Errors on mismatched eigenpair dimensions or non-positive retained
/// eigenvalues.
pub fn build_symmetric_transform<T>(
    eigenvalues: &ArrayView1<T>,
    eigenvectors: &ArrayView2<T>,
    n_illcond: usize,
) -> Result<Array2<T>, anyhow::Error>
where
    T: Float + LinalgScalar,
{
    let n = check_eigenpairs(eigenvalues, eigenvectors, n_illcond)?;
    if n_illcond == n {
        return Ok(Array2::zeros((n, n)));
    }
    let vcond = eigenvectors.slice(s![.., n_illcond..]);
    let scale = eigenvalues
        .slice(s![n_illcond..])
        .mapv(|eigenvalue| T::one() / eigenvalue.sqrt());
    let scaled = einsum("ij,j->ij", &[&vcond, &scale])
        .map_err(|err| format_err!(err))?
        .into_dimensionality::<Ix2>()
        .map_err(|err| format_err!(err))?;
    Ok(scaled.dot(&vcond.t()))
}

fn check_eigenpairs<T>(
    eigenvalues: &ArrayView1<T>,
    eigenvectors: &ArrayView2<T>,
    n_illcond: usize,
) -> Result<usize, anyhow::Error>
where
    T: Float + LinalgScalar,
{
    let n = eigenvectors.nrows();
    ensure!(
        eigenvectors.ncols() == n && eigenvalues.len() == n,
        "eigenpair dimensions mismatched: {} eigenvalues for a {:?} eigenvector matrix",
        eigenvalues.len(),
        eigenvectors.shape()
    );
    ensure!(
        n_illcond <= n,
        "cut index {n_illcond} exceeds the spectrum length {n}"
    );
    ensure!(
        eigenvalues
            .slice(s![n_illcond..])
            .iter()
            .all(|eigenvalue| *eigenvalue > T::zero()),
        "retained overlap eigenvalues must be strictly positive"
    );
    Ok(n)
}

/// Scales the local tile columns of a block-cyclic eigenvector matrix by the
/// inverse square roots of their replicated eigenvalues, for global columns
/// `n_illcond..`. This is the distributed form of the canonical slice-and-scale:
/// a purely local contraction requiring no communication, since the
/// eigenvalues are replicated on every grid member. Ranks outside the grid
/// hold no tile and return immediately.
pub fn scale_retained_columns(
    tile: &mut BlockCyclicMatrix,
    eigenvalues: &ArrayView1<f64>,
    n_illcond: usize,
) -> Result<(), anyhow::Error> {
    let pc = match tile.coords() {
        Some((_, pc)) => pc,
        None => return Ok(()),
    };
    ensure!(
        eigenvalues.len() == tile.layout().ncols(),
        "eigenvalue count {} does not match the global column count {}",
        eigenvalues.len(),
        tile.layout().ncols()
    );
    ensure!(
        eigenvalues
            .slice(s![n_illcond..])
            .iter()
            .all(|eigenvalue| *eigenvalue > 0.0),
        "retained overlap eigenvalues must be strictly positive"
    );
    let layout = tile.layout().clone();
    let local = tile.local_mut();
    for lc in 0..local.ncols() {
        let j = layout.local_to_global_col(pc, lc);
        if j >= n_illcond {
            let inv_sqrt = 1.0 / eigenvalues[j].sqrt();
            local.column_mut(lc).mapv_inplace(|x| x * inv_sqrt);
        }
    }
    Ok(())
}

// =====================
// Trait implementations
// =====================

/// Orthogonalisation of a localised fragment overlap matrix.
///
/// Fragments are always single-process and dense: the fragment's own overlap
/// is eigendecomposed, filtered and scaled with exactly the same routines as
/// the global-basis path, so on the same matrix and threshold the two paths
/// produce bit-identical transforms.
pub trait FragmentOrthogonalisable {
    /// Numerical type of the matrix elements.
    type NumType;

    /// Eigendecomposes the fragment overlap, drops linearly dependent
    /// directions below `threshold` and assembles the orthogonalising
    /// transform of the requested kind.
    ///
    /// # Errors
    ///
    /// Errors if the matrix is not symmetric within `symmetry_threshold`, if
    /// the eigensolver fails, or if a retained eigenvalue is non-positive.
    fn orthogonalise_fragment(
        &self,
        kind: OrthogonalisationKind,
        threshold: Self::NumType,
        symmetry_threshold: Self::NumType,
    ) -> Result<FragmentOrthogonalisation<Self::NumType>, anyhow::Error>;
}

#[duplicate_item(
    [
        dtype_ [ f64 ]
    ]
    [
        dtype_ [ f32 ]
    ]
)]
impl FragmentOrthogonalisable for ArrayView2<'_, dtype_> {
    type NumType = dtype_;

    fn orthogonalise_fragment(
        &self,
        kind: OrthogonalisationKind,
        threshold: dtype_,
        symmetry_threshold: dtype_,
    ) -> Result<FragmentOrthogonalisation<dtype_>, anyhow::Error> {
        let smat = self;
        ensure!(
            smat.is_square(),
            "the fragment overlap matrix must be square, got {:?}",
            smat.shape()
        );
        ensure!(
            smat.nrows() >= 1,
            "the fragment overlap matrix must have dimension at least 1"
        );
        let asymmetry = (smat.to_owned() - smat.t()).norm_l2();
        ensure!(
            asymmetry <= symmetry_threshold,
            "the fragment overlap matrix is not symmetric: ‖S - Sᵀ‖ = {asymmetry:.3e} > {symmetry_threshold:.3e}"
        );

        let (eigenvalues, eigenvectors) = smat
            .eigh(UPLO::Lower)
            .map_err(|err| format_err!("fragment overlap eigendecomposition failed: {err}"))?;
        let decision = filter_linear_dependencies(eigenvalues.view(), threshold);
        report_linear_dependencies(eigenvalues.view(), &decision);

        let xmat = match kind {
            OrthogonalisationKind::Canonical => build_canonical_transform(
                &eigenvalues.view(),
                &eigenvectors.view(),
                decision.n_illcond,
            )?,
            OrthogonalisationKind::Symmetric => build_symmetric_transform(
                &eigenvalues.view(),
                &eigenvectors.view(),
                decision.n_illcond,
            )?,
        };
        Ok(FragmentOrthogonalisation {
            xmat,
            n_illcond: decision.n_illcond,
            n_cond: decision.n_cond,
            diagnostics: ConditionDiagnostics {
                condition_number: None,
                result_condition_number: decision.result_condition_number,
            },
        })
    }
}

// ===================
// Transform ownership
// ===================

/// An orthogonalising transform left distributed in block-cyclic layout: the
/// scaled eigenvector tiles plus the number of leading global columns that
/// were dropped as linearly dependent. The retained slice can be collected on
/// a root collectively without any rank ever forming the full `N × N`
/// eigenvector matrix.
#[derive(Clone, Debug)]
pub struct BlockCyclicTransform {
    tiles: BlockCyclicMatrix,
    col_offset: usize,
}

impl BlockCyclicTransform {
    /// Wraps scaled eigenvector tiles whose global columns `col_offset..`
    /// constitute the transform.
    pub fn new(tiles: BlockCyclicMatrix, col_offset: usize) -> Result<Self, anyhow::Error> {
        ensure!(
            col_offset <= tiles.layout().ncols(),
            "column offset {col_offset} exceeds the global column count {}",
            tiles.layout().ncols()
        );
        Ok(Self { tiles, col_offset })
    }

    /// Returns the number of transform columns, `n_cond`.
    pub fn ncols(&self) -> usize {
        self.tiles.layout().ncols() - self.col_offset
    }

    /// Returns the underlying block-cyclic tiles.
    pub fn tiles(&self) -> &BlockCyclicMatrix {
        &self.tiles
    }

    /// Collects the `N × n_cond` transform onto `root` as a dense matrix.
    ///
    /// This is a collective: every member of the group must call it. Returns
    /// `Some` on the root and `None` elsewhere.
    pub fn gather<G: ProcessGroup>(
        &self,
        group: &G,
        root: usize,
    ) -> Result<Option<Array2<f64>>, anyhow::Error> {
        self.tiles.gather_columns(group, root, self.col_offset)
    }
}

/// An orthogonalising transform, owned by the caller of the orthogonalisation
/// that produced it.
#[derive(Clone, Debug)]
pub enum OrthogonalTransform {
    /// Dense transform replicated on every rank of the group.
    Dense(Array2<f64>),

    /// Transform left distributed in block-cyclic layout.
    BlockCyclic(BlockCyclicTransform),
}

impl OrthogonalTransform {
    /// Returns the number of transform columns.
    pub fn ncols(&self) -> usize {
        match self {
            OrthogonalTransform::Dense(xmat) => xmat.ncols(),
            OrthogonalTransform::BlockCyclic(transform) => transform.ncols(),
        }
    }

    /// Returns the replicated dense transform, or `None` for a distributed
    /// one.
    pub fn as_dense(&self) -> Option<&Array2<f64>> {
        match self {
            OrthogonalTransform::Dense(xmat) => Some(xmat),
            OrthogonalTransform::BlockCyclic(_) => None,
        }
    }
}

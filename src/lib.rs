//! # canort: canonical orthogonalisation of basis-set overlap operators
//!
//! `canort` computes numerically stable orthogonal transforms of basis-set
//! overlap operators for electronic-structure calculations. Given a symmetric
//! positive-semidefinite overlap matrix $`\mathbf{S}`$ over $`N`$ basis
//! functions, it produces a transform $`\mathbf{X}`$ with
//! $`\mathbf{X}^{\mathrm{T}} \mathbf{S} \mathbf{X} = \mathbf{I}`$ on the
//! well-conditioned subspace, discarding near-linearly-dependent basis
//! directions below a numerical threshold and reporting the retained rank
//! together with conditioning diagnostics.
//!
//! The crate provides:
//! - dense and block-cyclic eigendecomposition backends behind one strategy
//!   contract ([`eigen`]), so the orthogonalisation runs identically on a
//!   single process or across a 2-D process grid;
//! - the linear-dependency filter and the rank broadcast that makes every
//!   process agree on the truncated dimension ([`ortho::lindep`]);
//! - canonical and symmetric (Löwdin) transform assembly for the global basis
//!   and for localised fragment sub-bases ([`ortho`],
//!   [`drivers::orthogonalisation`]);
//! - a generic variable-length gather of integer-tagged work vectors used by
//!   distributed task scheduling ([`comm::taskvec`]).
//!
//! Collective behaviour is expressed against the [`comm::ProcessGroup`]
//! trait; an in-process thread-backed group is included for testing, and
//! MPI-backed groups can be supplied by downstream code.
//!
//! ## Linear algebra backend
//!
//! There are six features defining six different ways a linear algebra
//! backend can be configured for `canort`. These are inherited from the
//! [`ndarray-linalg`](https://docs.rs/ndarray-linalg/latest/ndarray_linalg/)
//! crate. One (and only one) of these must be enabled:
//! - `openblas-static`: Downloads, builds OpenBLAS, and links statically
//! - `openblas-system`: Finds and links existing OpenBLAS in the system
//! - `netlib-static`: Downloads, builds LAPACK, and links statically
//! - `netlib-system`: Finds and links existing LAPACK in the system
//! - `intel-mkl-static`: Finds and links existing static Intel MKL in the
//!   system, or downloads and links statically if not found
//! - `intel-mkl-system`: Finds and links existing shared Intel MKL in the
//!   system
//!
//! The composite `standard` feature enables `openblas-static`.

pub mod comm;
pub mod drivers;
pub mod eigen;
pub mod io;
pub mod matrix;
pub mod ortho;

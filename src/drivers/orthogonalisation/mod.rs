//! Driver for the collective orthogonalisation of the global overlap operator.
//!
//! The driver composes the eigendecomposition backend, the linear-dependency
//! filter and the transform assembly into the fixed collective sequence
//! backend → filter → rank broadcast → assembly. Every member of the process
//! group must execute the sequence in this order; in particular, nothing sized
//! by `n_cond` may be allocated before the rank broadcast completes.

use std::fmt;

use anyhow::{self, bail, ensure, format_err};
use derive_builder::Builder;
use ndarray::Array2;
use ndarray_linalg::Norm;
use serde::{Deserialize, Serialize};

use crate::comm::ProcessGroup;
use crate::drivers::CanortDriver;
use crate::eigen::{
    DenseEigh, ReplicatedBlockCyclicEigh, Spectrum, SymmetricEigenBackend, SymmetricOperator,
};
use crate::io::format::{canort_output, log_subtitle, log_title, CanortOutput};
use crate::matrix::ProcessGrid;
use crate::ortho::lindep::{
    broadcast_rank_decision, filter_linear_dependencies, report_linear_dependencies,
};
use crate::ortho::{
    build_canonical_transform, build_symmetric_transform, scale_retained_columns,
    BlockCyclicTransform, ConditionDiagnostics, OrthogonalTransform, OrthogonalisationKind,
};


// ==================
// Struct definitions
// ==================

// ----------
// Parameters
// ----------

/// The execution mode of the overlap diagonalisation.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum DiagonalisationMode {
    /// Direct in-core diagonalisation on the coordinator, followed by a
    /// broadcast of the resulting transform.
    Dense,

    /// Diagonalisation over a 2-D process grid in block-cyclic layout with
    /// block size `mb`. If `grid` is `None`, a near-square grid is derived
    /// from the group size at run time.
    BlockCyclic {
        mb: usize,
        grid: Option<ProcessGrid>,
    },
}

impl Default for DiagonalisationMode {
    fn default() -> Self {
        DiagonalisationMode::Dense
    }
}

impl fmt::Display for DiagonalisationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DiagonalisationMode::Dense => write!(f, "dense"),
            DiagonalisationMode::BlockCyclic { mb, grid } => match grid {
                Some(grid) => write!(f, "block-cyclic (mb = {mb}, grid = {grid})"),
                None => write!(f, "block-cyclic (mb = {mb}, grid = auto)"),
            },
        }
    }
}

/// A structure containing control parameters for overlap orthogonalisation.
#[derive(Clone, Builder, Debug, Serialize, Deserialize)]
pub struct OrthogonalisationParams {
    /// Absolute eigenvalue threshold below which overlap eigenvectors are
    /// deemed linearly dependent and discarded. Callers select it based on
    /// the expected scale of the overlap matrix.
    #[builder(default = "1e-5")]
    pub linear_dependency_threshold: f64,

    /// Threshold for verifying that the overlap matrix is symmetric.
    #[builder(default = "1e-10")]
    pub symmetry_threshold: f64,

    /// The kind of orthogonalising transform to assemble. The symmetric kind
    /// is only available in dense mode.
    #[builder(default)]
    pub kind: OrthogonalisationKind,

    /// The execution mode of the overlap diagonalisation.
    #[builder(default)]
    pub mode: DiagonalisationMode,

    /// The rank performing the serial work of the orthogonalisation. In
    /// block-cyclic mode it must be a member of the process grid.
    #[builder(default = "0")]
    pub coordinator: usize,
}

impl OrthogonalisationParams {
    /// Returns a builder to construct a [`OrthogonalisationParams`] structure.
    pub fn builder() -> OrthogonalisationParamsBuilder {
        OrthogonalisationParamsBuilder::default()
    }

    /// Deserialises parameters from a YAML string.
    pub fn from_yaml_str(input: &str) -> Result<Self, anyhow::Error> {
        serde_yaml::from_str(input).map_err(|err| format_err!(err))
    }
}

impl Default for OrthogonalisationParams {
    fn default() -> Self {
        Self::builder()
            .build()
            .expect("Unable to construct default orthogonalisation parameters.")
    }
}

impl fmt::Display for OrthogonalisationParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Linear-dependency threshold: {:.3e}",
            self.linear_dependency_threshold
        )?;
        writeln!(f, "Overlap symmetry threshold: {:.3e}", self.symmetry_threshold)?;
        writeln!(f, "Orthogonalisation kind: {}", self.kind)?;
        writeln!(f, "Diagonalisation mode: {}", self.mode)?;
        writeln!(f, "Coordinator rank: {}", self.coordinator)?;
        Ok(())
    }
}

// ------
// Result
// ------

/// A structure containing the result of an overlap orthogonalisation.
#[derive(Clone, Debug)]
pub struct OrthogonalisationResult {
    /// Number of retained directions; identical on every rank of the group.
    pub n_cond: usize,

    /// Number of directions dropped as linearly dependent; identical on every
    /// rank of the group.
    pub n_illcond: usize,

    /// Conditioning diagnostics, held by the ranks that held eigenvalues: the
    /// coordinator in dense mode, every grid member in block-cyclic mode.
    pub diagnostics: Option<ConditionDiagnostics<f64>>,

    /// The orthogonalising transform.
    pub xmat: OrthogonalTransform,
}

// ------
// Driver
// ------

/// Driver for the collective orthogonalisation of the global overlap operator.
#[derive(Builder)]
#[builder(pattern = "owned")]
pub struct OrthogonalisationDriver<'a, G>
where
    G: ProcessGroup,
{
    /// The control parameters for the orthogonalisation.
    parameters: &'a OrthogonalisationParams,

    /// The assembled overlap operator, materialised on the coordinator.
    overlap: &'a SymmetricOperator,

    /// The process group executing the orthogonalisation collectively.
    group: &'a G,

    /// The result of the orthogonalisation.
    #[builder(setter(skip), default = "None")]
    result: Option<OrthogonalisationResult>,
}

impl<'a, G> OrthogonalisationDriver<'a, G>
where
    G: ProcessGroup,
{
    /// Returns a builder to construct a [`OrthogonalisationDriver`] structure.
    pub fn builder() -> OrthogonalisationDriverBuilder<'a, G> {
        OrthogonalisationDriverBuilder::default()
    }

    /// Executes the orthogonalisation collectively.
    fn orthogonalise(&mut self) -> Result<(), anyhow::Error> {
        let params = self.parameters;
        let group = self.group;
        ensure!(
            params.coordinator < group.size(),
            "coordinator rank {} outside a group of size {}",
            params.coordinator,
            group.size()
        );
        let is_coordinator = group.rank() == params.coordinator;
        let n = self.overlap.dim();

        if is_coordinator {
            log_title("Orthogonalisation of the Overlap Operator");
            canort_output!("");
            params.log_output_display();
            canort_output!("");

            let smat = self
                .overlap
                .data()
                .ok_or_else(|| format_err!("the coordinator holds no overlap data"))?;
            let asymmetry = (smat.to_owned() - smat.t()).norm_l2();
            ensure!(
                asymmetry <= params.symmetry_threshold,
                "the overlap matrix is not symmetric: ‖S - Sᵀ‖ = {asymmetry:.3e} > {:.3e}",
                params.symmetry_threshold
            );
        }

        let result = match params.mode {
            DiagonalisationMode::Dense => self.orthogonalise_dense()?,
            DiagonalisationMode::BlockCyclic { mb, grid } => {
                ensure!(
                    params.kind == OrthogonalisationKind::Canonical,
                    "symmetric orthogonalisation is only available in dense mode"
                );
                self.orthogonalise_block_cyclic(mb, grid)?
            }
        };

        if is_coordinator {
            canort_output!("");
            log_subtitle("Orthogonalisation summary");
            canort_output!("Dimension of the original basis: {n}");
            canort_output!(
                "Directions dropped as linearly dependent: {}",
                result.n_illcond
            );
            canort_output!("Dimension of the orthogonal basis: {}", result.n_cond);
            if let Some(diagnostics) = &result.diagnostics {
                canort_output!(
                    "Result condition number: {:.6e}",
                    diagnostics.result_condition_number
                );
            }
            canort_output!("");
        }

        self.result = Some(result);
        Ok(())
    }

    /// The dense path: coordinator eigendecomposition and filter, rank
    /// broadcast, coordinator slice-and-scale, then a one-time broadcast of
    /// the `N × n_cond` transform to every rank.
    fn orthogonalise_dense(&self) -> Result<OrthogonalisationResult, anyhow::Error> {
        let params = self.parameters;
        let group = self.group;
        let n = self.overlap.dim();

        let backend = DenseEigh {
            coordinator: params.coordinator,
        };
        let spectrum = match backend.diagonalise(self.overlap, group)? {
            Spectrum::Dense(spectrum) => spectrum,
            Spectrum::BlockCyclic(_) => bail!("the dense backend returned a block-cyclic spectrum"),
        };

        let decision = spectrum.as_ref().map(|dense| {
            filter_linear_dependencies(
                dense.eigenvalues.view(),
                params.linear_dependency_threshold,
            )
        });
        if let (Some(dense), Some(decision)) = (&spectrum, &decision) {
            report_linear_dependencies(dense.eigenvalues.view(), decision);
        }

        // The single synchronisation point: every rank agrees on the cut
        // before anything sized by n_cond is allocated.
        let n_illcond = broadcast_rank_decision(
            group,
            decision.as_ref().map(|decision| decision.n_illcond),
            params.coordinator,
        )?;
        ensure!(
            n_illcond <= n,
            "broadcast cut index {n_illcond} exceeds the basis dimension {n}"
        );
        let n_cond = n - n_illcond;
        let width = match params.kind {
            OrthogonalisationKind::Canonical => n_cond,
            OrthogonalisationKind::Symmetric => n,
        };

        let mut buf = match &spectrum {
            Some(dense) => {
                let xmat = match params.kind {
                    OrthogonalisationKind::Canonical => build_canonical_transform(
                        &dense.eigenvalues.view(),
                        &dense.eigenvectors.view(),
                        n_illcond,
                    )?,
                    OrthogonalisationKind::Symmetric => build_symmetric_transform(
                        &dense.eigenvalues.view(),
                        &dense.eigenvectors.view(),
                        n_illcond,
                    )?,
                };
                xmat.iter().copied().collect::<Vec<_>>()
            }
            None => Vec::new(),
        };
        group.broadcast(&mut buf, params.coordinator);
        let xmat = Array2::from_shape_vec((n, width), buf).map_err(|err| format_err!(err))?;

        Ok(OrthogonalisationResult {
            n_cond,
            n_illcond,
            diagnostics: decision.map(|decision| ConditionDiagnostics {
                condition_number: None,
                result_condition_number: decision.result_condition_number,
            }),
            xmat: OrthogonalTransform::Dense(xmat),
        })
    }

    /// The block-cyclic path: grid diagonalisation with replicated
    /// eigenvalues, redundant identical filtering on every grid member, rank
    /// broadcast to the whole group, then local column scaling of the
    /// block-cyclic eigenvector tiles. The full eigenvector matrix is never
    /// collected on one process.
    fn orthogonalise_block_cyclic(
        &self,
        mb: usize,
        grid: Option<ProcessGrid>,
    ) -> Result<OrthogonalisationResult, anyhow::Error> {
        let params = self.parameters;
        let group = self.group;
        let n = self.overlap.dim();

        ensure!(mb >= 1, "block size must be at least 1");
        let grid = match grid {
            Some(grid) => {
                ensure!(
                    grid.size() <= group.size(),
                    "a {} process grid requires {} processes but the group provides {}",
                    grid,
                    grid.size(),
                    group.size()
                );
                grid
            }
            None => ProcessGrid::for_size(group.size()),
        };
        ensure!(
            grid.coords_of(params.coordinator).is_some(),
            "coordinator rank {} is not a member of the {} process grid",
            params.coordinator,
            grid
        );

        let backend = ReplicatedBlockCyclicEigh {
            mb,
            grid,
            coordinator: params.coordinator,
        };
        let spectrum = match backend.diagonalise(self.overlap, group)? {
            Spectrum::BlockCyclic(spectrum) => spectrum,
            Spectrum::Dense(_) => bail!("the block-cyclic backend returned a dense spectrum"),
        };
        let eigenvalues = spectrum.eigenvalues;
        let mut tiles = spectrum.eigenvectors;

        // Grid members decide redundantly but identically from the replicated
        // eigenvalues; the audit warning is emitted once, on the coordinator.
        let decision = (!eigenvalues.is_empty()).then(|| {
            filter_linear_dependencies(eigenvalues.view(), params.linear_dependency_threshold)
        });
        if group.rank() == params.coordinator {
            if let Some(decision) = &decision {
                report_linear_dependencies(eigenvalues.view(), decision);
            }
        }

        // The single synchronisation point, reaching every rank of the wider
        // group, grid member or not.
        let n_illcond = broadcast_rank_decision(
            group,
            decision.as_ref().map(|decision| decision.n_illcond),
            params.coordinator,
        )?;
        ensure!(
            n_illcond <= n,
            "broadcast cut index {n_illcond} exceeds the basis dimension {n}"
        );
        let n_cond = n - n_illcond;

        scale_retained_columns(&mut tiles, &eigenvalues.view(), n_illcond)?;
        let transform = BlockCyclicTransform::new(tiles, n_illcond)?;

        Ok(OrthogonalisationResult {
            n_cond,
            n_illcond,
            diagnostics: decision.map(|decision| ConditionDiagnostics {
                condition_number: None,
                result_condition_number: decision.result_condition_number,
            }),
            xmat: OrthogonalTransform::BlockCyclic(transform),
        })
    }
}

impl<G> CanortDriver for OrthogonalisationDriver<'_, G>
where
    G: ProcessGroup,
{
    type Params = OrthogonalisationParams;

    type Outcome = OrthogonalisationResult;

    fn result(&self) -> Result<&Self::Outcome, anyhow::Error> {
        self.result
            .as_ref()
            .ok_or_else(|| format_err!("No orthogonalisation results found."))
    }

    fn run(&mut self) -> Result<(), anyhow::Error> {
        self.orthogonalise()
    }
}

//! Process grids and block-cyclic distributed matrices.
//!
//! Distributed dense linear algebra deals a matrix out in fixed-size square
//! blocks assigned round-robin to a 2-D process grid, balancing load across
//! the grid. [`BlockCyclicMatrix`] is the opaque handle for a matrix in this
//! layout: a [`BlockCyclicLayout`] plus the calling rank's local tile. Callers
//! move between replicated and block-cyclic form through the explicit
//! redistribution operations [`BlockCyclicMatrix::from_replicated`],
//! [`BlockCyclicMatrix::gather`] and [`BlockCyclicMatrix::gather_columns`]
//! rather than by touching the layout arithmetic directly.

use std::fmt;

use anyhow::{self, ensure, format_err};
use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::comm::{exclusive_prefix_sum, ProcessGroup};


// ===========
// ProcessGrid
// ===========

/// A 2-D process grid over the leading `nprow * npcol` ranks of a process
/// group, with ranks assigned in row-major order.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessGrid {
    nprow: usize,
    npcol: usize,
}

impl ProcessGrid {
    /// Returns a grid with the given shape.
    ///
    /// # Errors
    ///
    /// Errors if either dimension is zero.
    pub fn new(nprow: usize, npcol: usize) -> Result<Self, anyhow::Error> {
        ensure!(
            nprow >= 1 && npcol >= 1,
            "process grid dimensions must be at least 1×1, got {nprow}×{npcol}"
        );
        Ok(Self { nprow, npcol })
    }

    /// Returns the near-square grid using as many of `size` ranks as possible.
    pub fn for_size(size: usize) -> Self {
        assert!(size >= 1, "a process group must have at least one member");
        let nprow = (1..=size)
            .take_while(|nprow| nprow * nprow <= size)
            .last()
            .unwrap_or(1);
        Self {
            nprow,
            npcol: size / nprow,
        }
    }

    /// Returns the number of process rows.
    pub fn nprow(&self) -> usize {
        self.nprow
    }

    /// Returns the number of process columns.
    pub fn npcol(&self) -> usize {
        self.npcol
    }

    /// Returns the number of grid members.
    pub fn size(&self) -> usize {
        self.nprow * self.npcol
    }

    /// Returns the grid coordinates of `rank`, or `None` if the rank lies
    /// outside the grid.
    pub fn coords_of(&self, rank: usize) -> Option<(usize, usize)> {
        (rank < self.size()).then(|| (rank / self.npcol, rank % self.npcol))
    }
}

impl fmt::Display for ProcessGrid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{}", self.nprow, self.npcol)
    }
}

// =================
// BlockCyclicLayout
// =================

/// The distribution of an `nrows × ncols` matrix in square `mb × mb` blocks
/// dealt round-robin over a [`ProcessGrid`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockCyclicLayout {
    nrows: usize,
    ncols: usize,
    mb: usize,
    grid: ProcessGrid,
}

impl BlockCyclicLayout {
    /// Returns the layout of an `nrows × ncols` matrix with block size `mb`
    /// over `grid`.
    ///
    /// # Errors
    ///
    /// Errors if any dimension or the block size is zero.
    pub fn new(
        nrows: usize,
        ncols: usize,
        mb: usize,
        grid: ProcessGrid,
    ) -> Result<Self, anyhow::Error> {
        ensure!(
            nrows >= 1 && ncols >= 1,
            "matrix dimensions must be at least 1×1, got {nrows}×{ncols}"
        );
        ensure!(mb >= 1, "block size must be at least 1, got {mb}");
        Ok(Self {
            nrows,
            ncols,
            mb,
            grid,
        })
    }

    /// Returns the number of global rows.
    pub fn nrows(&self) -> usize {
        self.nrows
    }

    /// Returns the number of global columns.
    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Returns the block size.
    pub fn mb(&self) -> usize {
        self.mb
    }

    /// Returns the process grid.
    pub fn grid(&self) -> &ProcessGrid {
        &self.grid
    }

    /// Returns the local tile shape held by the grid member at `(pr, pc)`.
    pub fn local_shape(&self, pr: usize, pc: usize) -> (usize, usize) {
        (
            numroc(self.nrows, self.mb, pr, self.grid.nprow),
            numroc(self.ncols, self.mb, pc, self.grid.npcol),
        )
    }

    /// Maps a local row index on process row `pr` to its global row index.
    pub fn local_to_global_row(&self, pr: usize, lr: usize) -> usize {
        ((lr / self.mb) * self.grid.nprow + pr) * self.mb + lr % self.mb
    }

    /// Maps a local column index on process column `pc` to its global column
    /// index.
    pub fn local_to_global_col(&self, pc: usize, lc: usize) -> usize {
        ((lc / self.mb) * self.grid.npcol + pc) * self.mb + lc % self.mb
    }
}

/// Number of rows or columns of a block-cyclically distributed dimension of
/// extent `n` owned by process coordinate `iproc` out of `nprocs`, with block
/// size `nb`.
fn numroc(n: usize, nb: usize, iproc: usize, nprocs: usize) -> usize {
    let nblocks = n / nb;
    let mut num = (nblocks / nprocs) * nb;
    let extra_blocks = nblocks % nprocs;
    if iproc < extra_blocks {
        num += nb;
    } else if iproc == extra_blocks {
        num += n % nb;
    }
    num
}

// =================
// BlockCyclicMatrix
// =================

/// A matrix in block-cyclic layout: the layout plus the calling rank's local
/// tile. Ranks outside the grid hold an empty tile but still participate in
/// every collective redistribution.
#[derive(Clone, Debug)]
pub struct BlockCyclicMatrix {
    layout: BlockCyclicLayout,
    coords: Option<(usize, usize)>,
    local: Array2<f64>,
}

impl BlockCyclicMatrix {
    /// Extracts the calling rank's tile from a replicated dense matrix.
    ///
    /// # Errors
    ///
    /// Errors if the dense matrix shape does not match the layout dimensions.
    pub fn from_replicated(
        layout: BlockCyclicLayout,
        rank: usize,
        dense: &ArrayView2<'_, f64>,
    ) -> Result<Self, anyhow::Error> {
        ensure!(
            dense.nrows() == layout.nrows && dense.ncols() == layout.ncols,
            "replicated matrix shape {:?} does not match the layout dimensions {}×{}",
            dense.shape(),
            layout.nrows,
            layout.ncols
        );
        let coords = layout.grid.coords_of(rank);
        let local = match coords {
            Some((pr, pc)) => {
                let (m_loc, n_loc) = layout.local_shape(pr, pc);
                Array2::from_shape_fn((m_loc, n_loc), |(lr, lc)| {
                    dense[[
                        layout.local_to_global_row(pr, lr),
                        layout.local_to_global_col(pc, lc),
                    ]]
                })
            }
            None => Array2::zeros((0, 0)),
        };
        Ok(Self {
            layout,
            coords,
            local,
        })
    }

    /// Returns the layout.
    pub fn layout(&self) -> &BlockCyclicLayout {
        &self.layout
    }

    /// Returns the grid coordinates of the calling rank, or `None` if it lies
    /// outside the grid.
    pub fn coords(&self) -> Option<(usize, usize)> {
        self.coords
    }

    /// Returns the local tile.
    pub fn local(&self) -> &Array2<f64> {
        &self.local
    }

    /// Returns the local tile mutably.
    pub fn local_mut(&mut self) -> &mut Array2<f64> {
        &mut self.local
    }

    /// Collects the full matrix onto `root` as a dense matrix.
    ///
    /// This is a collective: every member of the group must call it. Returns
    /// `Some` on the root and `None` elsewhere.
    pub fn gather<G: ProcessGroup>(
        &self,
        group: &G,
        root: usize,
    ) -> Result<Option<Array2<f64>>, anyhow::Error> {
        self.gather_columns(group, root, 0)
    }

    /// Collects global columns `col_start..` onto `root` as a dense
    /// `nrows × (ncols - col_start)` matrix, moving only the retained slice so
    /// that no rank ever materialises the full matrix when `col_start > 0`.
    ///
    /// This is a collective: every member of the group must call it. Returns
    /// `Some` on the root and `None` elsewhere.
    pub fn gather_columns<G: ProcessGroup>(
        &self,
        group: &G,
        root: usize,
        col_start: usize,
    ) -> Result<Option<Array2<f64>>, anyhow::Error> {
        ensure!(
            root < group.size(),
            "gather root {root} outside a group of size {}",
            group.size()
        );
        ensure!(
            col_start <= self.layout.ncols,
            "column offset {col_start} exceeds the global column count {}",
            self.layout.ncols
        );

        // Local contribution: retained elements in row-major tile order.
        let send = match self.coords {
            Some((_, pc)) => {
                let mut send = Vec::new();
                for lr in 0..self.local.nrows() {
                    for lc in 0..self.local.ncols() {
                        if self.layout.local_to_global_col(pc, lc) >= col_start {
                            send.push(self.local[[lr, lc]]);
                        }
                    }
                }
                send
            }
            None => Vec::new(),
        };

        let counts = group.gather(&[send.len()], root);
        let (counts, displs) = match counts {
            Some(counts) => {
                let displs = exclusive_prefix_sum(&counts);
                (counts, displs)
            }
            None => (Vec::new(), Vec::new()),
        };
        let gathered = group.gatherv(&send, &counts, &displs, root);

        if group.rank() != root {
            return Ok(None);
        }

        let recv = gathered.ok_or_else(|| format_err!("gatherv returned no buffer on the root"))?;
        let mut dense = Array2::zeros((self.layout.nrows, self.layout.ncols - col_start));
        for rank in 0..group.size() {
            if let Some((pr, pc)) = self.layout.grid.coords_of(rank) {
                let (m_loc, n_loc) = self.layout.local_shape(pr, pc);
                let mut k = displs[rank];
                for lr in 0..m_loc {
                    let i = self.layout.local_to_global_row(pr, lr);
                    for lc in 0..n_loc {
                        let j = self.layout.local_to_global_col(pc, lc);
                        if j >= col_start {
                            dense[[i, j - col_start]] = recv[k];
                            k += 1;
                        }
                    }
                }
            }
        }
        Ok(Some(dense))
    }
}

//! gp::block_covariance — symmetric block matrices with lower-triangular
//! block storage.
//!
//! Purpose
//! -------
//! Represent the covariance of several stacked length-`n` vectors (one per
//! state, or one per force) as a `D×D` grid of `n×n` blocks, storing only
//! the blocks on or below the diagonal.
//!
//! Key behaviors
//! -------------
//! - `block(i, j)` with `i < j` is served as a transposed view of the
//!   stored `block(j, i)`; no data is copied.
//! - `to_dense` / `from_dense` round-trip exactly for symmetric input;
//!   `from_dense_symmetrized` averages the two triangles first.
//! - `weighted_block_sum` and `element_cov` answer the covariance queries
//!   used by the variational updates.
//!
//! Invariants & assumptions
//! ------------------------
//! - `blocks.len() == D (D + 1) / 2`, every block is `n×n`; block `(i, j)`
//!   with `j ≤ i` lives at `i (i + 1) / 2 + j`.
//! - Out-of-range indices and shape mismatches are the only errors.
use crate::mlfm::errors::{MlfmError, MlfmResult};
use ndarray::{Array2, ArrayView1, ArrayView2, s};

#[derive(Debug, Clone, PartialEq)]
pub struct BlockCovariance {
    block_count: usize,
    block_size: usize,
    blocks: Vec<Array2<f64>>,
}

impl BlockCovariance {
    /// All-zero `D×D` grid of `n×n` blocks.
    pub fn zeros(block_count: usize, block_size: usize) -> Self {
        let stored = block_count * (block_count + 1) / 2;
        let blocks = (0..stored).map(|_| Array2::zeros((block_size, block_size))).collect();
        Self { block_count, block_size, blocks }
    }

    /// `scale · I` split into `D×D` blocks of size `n`.
    pub fn scaled_identity(block_count: usize, block_size: usize, scale: f64) -> Self {
        let mut out = Self::zeros(block_count, block_size);
        for i in 0..block_count {
            out.blocks[lower_index(i, i)].diag_mut().fill(scale);
        }
        out
    }

    /// Build from the lower-triangular blocks in row-major order
    /// `(0,0), (1,0), (1,1), (2,0), …`.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::ParamShape`] if the number of blocks is not
    ///   `D (D + 1) / 2`.
    /// - [`MlfmError::BlockShapeMismatch`] for a block that is not `n×n`.
    pub fn from_lower_blocks(
        block_count: usize, block_size: usize, blocks: Vec<Array2<f64>>,
    ) -> MlfmResult<Self> {
        let stored = block_count * (block_count + 1) / 2;
        if blocks.len() != stored {
            return Err(MlfmError::ParamShape {
                name: "lower blocks",
                expected: stored,
                found: blocks.len(),
            });
        }
        for b in &blocks {
            check_shape(b.view(), block_size, block_size)?;
        }
        Ok(Self { block_count, block_size, blocks })
    }

    /// Split a dense `D·n × D·n` matrix into blocks, keeping the lower
    /// triangle. Exact inverse of [`to_dense`](Self::to_dense) for
    /// symmetric input.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::BlockShapeMismatch`] if `dense` is not `D·n × D·n`.
    pub fn from_dense(
        dense: ArrayView2<f64>, block_count: usize, block_size: usize,
    ) -> MlfmResult<Self> {
        let dim = block_count * block_size;
        check_shape(dense, dim, dim)?;
        let mut blocks = Vec::with_capacity(block_count * (block_count + 1) / 2);
        for i in 0..block_count {
            for j in 0..=i {
                blocks.push(dense.slice(s![span(i, block_size), span(j, block_size)]).to_owned());
            }
        }
        Ok(Self { block_count, block_size, blocks })
    }

    /// Like [`from_dense`](Self::from_dense) but stores `(A + Aᵀ) / 2`, for
    /// inputs that are symmetric only up to rounding.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::BlockShapeMismatch`] if `dense` is not `D·n × D·n`.
    pub fn from_dense_symmetrized(
        dense: ArrayView2<f64>, block_count: usize, block_size: usize,
    ) -> MlfmResult<Self> {
        let dim = block_count * block_size;
        check_shape(dense, dim, dim)?;
        let sym = (&dense + &dense.t()) * 0.5;
        Self::from_dense(sym.view(), block_count, block_size)
    }

    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Side length of the dense matrix, `D·n`.
    pub fn dim(&self) -> usize {
        self.block_count * self.block_size
    }

    /// Block `(i, j)`; a transposed view of the stored block when `i < j`.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::BlockIndexOutOfRange`] if `i` or `j` is `≥ D`.
    pub fn block(&self, i: usize, j: usize) -> MlfmResult<ArrayView2<'_, f64>> {
        if i >= self.block_count || j >= self.block_count {
            return Err(MlfmError::BlockIndexOutOfRange {
                row: i,
                col: j,
                block_count: self.block_count,
            });
        }
        if j <= i {
            Ok(self.blocks[lower_index(i, j)].view())
        } else {
            Ok(self.blocks[lower_index(j, i)].view().reversed_axes())
        }
    }

    /// Shorthand for `block(i, i)`.
    pub fn diagonal_block(&self, i: usize) -> MlfmResult<ArrayView2<'_, f64>> {
        self.block(i, i)
    }

    /// Overwrite block `(i, j)`; for `i < j` the transpose is stored.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::BlockIndexOutOfRange`] or
    ///   [`MlfmError::BlockShapeMismatch`].
    pub fn set_block(&mut self, i: usize, j: usize, value: ArrayView2<f64>) -> MlfmResult<()> {
        self.block(i, j)?;
        check_shape(value, self.block_size, self.block_size)?;
        if j <= i {
            self.blocks[lower_index(i, j)].assign(&value);
        } else {
            self.blocks[lower_index(j, i)].assign(&value.t());
        }
        Ok(())
    }

    /// Assemble the full symmetric `D·n × D·n` matrix.
    pub fn to_dense(&self) -> Array2<f64> {
        let n = self.block_size;
        let mut dense = Array2::zeros((self.dim(), self.dim()));
        for i in 0..self.block_count {
            for j in 0..=i {
                let b = &self.blocks[lower_index(i, j)];
                dense.slice_mut(s![span(i, n), span(j, n)]).assign(b);
                if i != j {
                    dense.slice_mut(s![span(j, n), span(i, n)]).assign(&b.t());
                }
            }
        }
        dense
    }

    /// `Σ_ij left_i right_j block(i, j)`, an `n×n` matrix.
    ///
    /// For stacked `g = (g_0, …, g_{D-1})` with this covariance, this is
    /// `cov(Σ_i left_i g_i, Σ_j right_j g_j)`.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::BlockWeightLength`] if a weight vector is not length
    ///   `D`.
    pub fn weighted_block_sum(
        &self, left: ArrayView1<f64>, right: ArrayView1<f64>,
    ) -> MlfmResult<Array2<f64>> {
        for w in [left.len(), right.len()] {
            if w != self.block_count {
                return Err(MlfmError::BlockWeightLength { expected: self.block_count, found: w });
            }
        }
        let mut out = Array2::zeros((self.block_size, self.block_size));
        for i in 0..self.block_count {
            for j in 0..self.block_count {
                let w = left[i] * right[j];
                if w != 0.0 {
                    out.scaled_add(w, &self.block(i, j)?);
                }
            }
        }
        Ok(out)
    }

    /// Covariance between element `n` of vector `i` and element `m` of
    /// vector `j`.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::BlockIndexOutOfRange`] or
    ///   [`MlfmError::ElementIndexOutOfRange`].
    pub fn element_cov(&self, (i, n): (usize, usize), (j, m): (usize, usize)) -> MlfmResult<f64> {
        let block = self.block(i, j)?;
        for idx in [n, m] {
            if idx >= self.block_size {
                return Err(MlfmError::ElementIndexOutOfRange {
                    index: idx,
                    block_size: self.block_size,
                });
            }
        }
        Ok(block[[n, m]])
    }
}

fn lower_index(i: usize, j: usize) -> usize {
    i * (i + 1) / 2 + j
}

fn span(i: usize, n: usize) -> std::ops::Range<usize> {
    i * n..(i + 1) * n
}

fn check_shape(a: ArrayView2<f64>, rows: usize, cols: usize) -> MlfmResult<()> {
    let (r, c) = a.dim();
    if r != rows || c != cols {
        return Err(MlfmError::BlockShapeMismatch {
            expected_rows: rows,
            expected_cols: cols,
            rows: r,
            cols: c,
        });
    }
    Ok(())
}

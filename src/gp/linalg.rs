//! gp::linalg — ndarray ↔ nalgebra bridge and a checked Cholesky factor.
//!
//! Purpose
//! -------
//! Keep the public surface in `ndarray` while doing factorizations and
//! triangular solves with `nalgebra`. Every factorization goes through
//! [`CholeskyFactor::new`], which turns a non positive definite (or
//! non-finite) input into [`MlfmError::LinearAlgebra`] instead of a panic.
//!
//! Conventions
//! -----------
//! - Copies are element-wise via `from_fn`; no layout assumptions are made
//!   about the `ndarray` input (views and transposed views are fine).
//! - `log_det` is computed from the factor diagonal as `2 Σ ln L_ii`.
use crate::mlfm::errors::{MlfmError, MlfmResult};
use nalgebra::{Cholesky, DMatrix, DVector, Dyn};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};

/// Copy an `ndarray` matrix into a `DMatrix`.
pub fn to_dmatrix(a: ArrayView2<f64>) -> DMatrix<f64> {
    let (rows, cols) = a.dim();
    DMatrix::from_fn(rows, cols, |i, j| a[[i, j]])
}

/// Copy a `DMatrix` into an `ndarray` matrix.
pub fn to_array2(m: &DMatrix<f64>) -> Array2<f64> {
    Array2::from_shape_fn((m.nrows(), m.ncols()), |(i, j)| m[(i, j)])
}

pub fn to_dvector(v: ArrayView1<f64>) -> DVector<f64> {
    DVector::from_fn(v.len(), |i, _| v[i])
}

pub fn to_array1(v: &DVector<f64>) -> Array1<f64> {
    Array1::from_shape_fn(v.len(), |i| v[i])
}

/// `(m + mᵀ) / 2`, in place. Caller guarantees `m` is square.
pub fn symmetrize(m: &mut DMatrix<f64>) {
    let n = m.nrows();
    for i in 0..n {
        for j in 0..i {
            let avg = 0.5 * (m[(i, j)] + m[(j, i)]);
            m[(i, j)] = avg;
            m[(j, i)] = avg;
        }
    }
}

/// `Σ_ij a_ij b_ij` for equally shaped matrices.
pub fn frobenius_dot(a: &DMatrix<f64>, b: &DMatrix<f64>) -> f64 {
    a.component_mul(b).sum()
}

/// Cholesky factor `A = L Lᵀ` of a symmetric positive definite matrix.
#[derive(Debug, Clone)]
pub struct CholeskyFactor {
    chol: Cholesky<f64, Dyn>,
    l: DMatrix<f64>,
}

impl CholeskyFactor {
    /// Factorize `a`.
    ///
    /// Parameters
    /// ----------
    /// - `a`: symmetric matrix; only its lower triangle is read.
    /// - `context`, `index`: identify the matrix in the error on failure.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::LinearAlgebra`] if `a` has a non-finite entry or is
    ///   not numerically positive definite.
    pub fn new(a: DMatrix<f64>, context: &'static str, index: usize) -> MlfmResult<Self> {
        if a.iter().any(|v| !v.is_finite()) {
            return Err(MlfmError::LinearAlgebra { context, index });
        }
        let chol = Cholesky::new(a).ok_or(MlfmError::LinearAlgebra { context, index })?;
        let l = chol.l();
        Ok(Self { chol, l })
    }

    pub fn dim(&self) -> usize {
        self.l.nrows()
    }

    /// The lower-triangular factor `L`.
    pub fn l(&self) -> &DMatrix<f64> {
        &self.l
    }

    /// `A⁻¹ b`.
    pub fn solve(&self, b: &DMatrix<f64>) -> DMatrix<f64> {
        self.chol.solve(b)
    }

    /// `A⁻¹ v`.
    pub fn solve_vec(&self, v: &DVector<f64>) -> DVector<f64> {
        self.chol.solve(v)
    }

    /// `L⁻¹ b`.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::LinearAlgebra`] if the triangular solve fails, which
    ///   only happens for a degenerate factor.
    pub fn solve_lower(
        &self, b: &DMatrix<f64>, context: &'static str, index: usize,
    ) -> MlfmResult<DMatrix<f64>> {
        self.l.solve_lower_triangular(b).ok_or(MlfmError::LinearAlgebra { context, index })
    }

    /// Explicit symmetric inverse `A⁻¹`.
    pub fn inverse(&self) -> DMatrix<f64> {
        let mut inv = self.chol.inverse();
        symmetrize(&mut inv);
        inv
    }

    /// `ln |A|`.
    pub fn log_det(&self) -> f64 {
        2.0 * self.l.diagonal().iter().map(|d| d.ln()).sum::<f64>()
    }
}

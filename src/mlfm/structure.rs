//! Structural matrices and model dimensions.
//!
//! The ODE right-hand side is
//! `dx_k/dt = Σ_i (A_0[k,i] + Σ_r g_r(t) A_r[k,i]) x_i(t)`; this module
//! stores the `R + 1` matrices `A_0, …, A_R` and derives `K` and `R` from
//! them.
use crate::mlfm::errors::{MlfmError, MlfmResult};
use ndarray::{Array1, Array2, ArrayView2};

/// Model dimensions: `N` time points, `K` states, `R` forces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Dimensions {
    pub n_times: usize,
    pub n_states: usize,
    pub n_forces: usize,
}

impl Dimensions {
    /// Length of the stacked state vector, `N·K`.
    pub fn stacked_len(&self) -> usize {
        self.n_times * self.n_states
    }
}

/// The `R + 1` coupling matrices of the linear-in-state ODE.
///
/// Index 0 is the autonomous part `A_0`; indices `1..=R` multiply the
/// forces `g_1, …, g_R` (force `r` in 0-based force indexing uses matrix
/// `r + 1`).
#[derive(Debug, Clone, PartialEq)]
pub struct StructuralModel {
    matrices: Vec<Array2<f64>>,
}

impl StructuralModel {
    /// Validate and store the structural matrices.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::EmptyStructure`] if `matrices` is empty.
    /// - [`MlfmError::StructuralShape`] if any matrix is not `K×K`, with `K`
    ///   taken from the row count of `A_0`.
    /// - [`MlfmError::NonFiniteStructural`] for the first NaN/±inf entry.
    pub fn new(matrices: Vec<Array2<f64>>) -> MlfmResult<Self> {
        let first = matrices.first().ok_or(MlfmError::EmptyStructure)?;
        let k = first.nrows();
        for (index, m) in matrices.iter().enumerate() {
            if m.nrows() != k || m.ncols() != k || k == 0 {
                return Err(MlfmError::StructuralShape {
                    index,
                    rows: m.nrows(),
                    cols: m.ncols(),
                    expected: k.max(1),
                });
            }
            if let Some(((row, col), _)) = m.indexed_iter().find(|(_, v)| !v.is_finite()) {
                return Err(MlfmError::NonFiniteStructural { index, row, col });
            }
        }
        Ok(Self { matrices })
    }

    pub fn n_states(&self) -> usize {
        self.matrices[0].nrows()
    }

    pub fn n_forces(&self) -> usize {
        self.matrices.len() - 1
    }

    /// `A_r`, with `r = 0` the autonomous matrix.
    ///
    /// # Panics
    /// Panics if `r > R`.
    pub fn matrix(&self, r: usize) -> ArrayView2<'_, f64> {
        self.matrices[r].view()
    }

    /// `A_r[k, i]`.
    pub fn coefficient(&self, r: usize, k: usize, i: usize) -> f64 {
        self.matrices[r][[k, i]]
    }

    /// `(A_1[k,i], …, A_R[k,i])`: how strongly each force scales the effect
    /// of state `i` on the derivative of state `k`.
    pub fn force_weights(&self, k: usize, i: usize) -> Array1<f64> {
        self.matrices[1..].iter().map(|m| m[[k, i]]).collect()
    }
}

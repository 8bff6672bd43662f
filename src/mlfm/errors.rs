//! Errors for MLFM models (configuration checks, block-matrix access,
//! factorization failures and optimizer failures).
//!
//! This module defines [`MlfmError`] and its alias [`MlfmResult`]. Every
//! constructor in the crate validates its inputs eagerly and reports the
//! first violation here, so later numerical code can trust its inputs.
//!
//! ## Conventions
//! - **Indices are 0-based.** State indices run over `0..K`, force indices
//!   over `0..R`, structural-matrix indices over `0..=R` (0 is autonomous).
//! - [`MlfmError::LinearAlgebra`] is the only recoverable variant: it is
//!   raised when a covariance or precision matrix is not positive definite
//!   at the evaluated parameters. Optimizers turn it into a penalty.
//! - Convergence problems and EM non-monotonicity are *not* errors; they are
//!   reported through `FitStatus` on the returned fit.
use crate::optimization::errors::OptError;

/// Crate-wide result alias for MLFM operations.
pub type MlfmResult<T> = Result<T, MlfmError>;

/// Unified error type for MLFM modeling.
#[derive(Debug, Clone, PartialEq)]
pub enum MlfmError {
    // ---- Time grid / observations ----
    /// The time grid needs at least two points.
    TooFewTimes { len: usize },

    /// A time point is NaN/±inf.
    NonFiniteTime { index: usize, value: f64 },

    /// Time points must be strictly increasing.
    NonIncreasingTimes { index: usize, previous: f64, current: f64 },

    /// Observation matrix must be N×K.
    ObservationShape { expected_rows: usize, expected_cols: usize, rows: usize, cols: usize },

    /// An observation is NaN/±inf.
    NonFiniteObservation { row: usize, col: usize, value: f64 },

    // ---- Structure ----
    /// At least one structural matrix (the autonomous part) is required.
    EmptyStructure,

    /// Every structural matrix must be K×K.
    StructuralShape { index: usize, rows: usize, cols: usize, expected: usize },

    /// A structural coefficient is NaN/±inf.
    NonFiniteStructural { index: usize, row: usize, col: usize },

    // ---- Kernels / parameters ----
    /// Wrong number of kernels supplied (one per state, one per force).
    KernelCount { what: &'static str, expected: usize, found: usize },

    /// A hyperparameter vector does not match the kernel's parameter count.
    KernelParamCount { what: &'static str, index: usize, expected: usize, found: usize },

    /// Kernel hyperparameters must be finite and > 0 on the natural scale.
    InvalidKernelParam { name: &'static str, value: f64 },

    /// A parameter array has the wrong length or shape.
    ParamShape { name: &'static str, expected: usize, found: usize },

    /// A positive parameter (γ, τ, jitter, variance) is non-finite or ≤ 0.
    NonPositiveParam { name: &'static str, index: usize, value: f64 },

    /// A parameter entry is NaN/±inf.
    NonFiniteParam { name: &'static str, index: usize, value: f64 },

    // ---- Options ----
    /// An option value is outside its documented range.
    InvalidOption { name: &'static str, value: f64, reason: &'static str },

    /// Gamma hyperprior parameters must be finite and > 0.
    InvalidGammaPrior { shape: f64, rate: f64 },

    // ---- Block covariance ----
    /// Requested block lies outside the `D×D` block grid.
    BlockIndexOutOfRange { row: usize, col: usize, block_count: usize },

    /// Element index lies outside a block.
    ElementIndexOutOfRange { index: usize, block_size: usize },

    /// Matrix or block shape does not match the declared layout.
    BlockShapeMismatch { expected_rows: usize, expected_cols: usize, rows: usize, cols: usize },

    /// Weight vectors for a block sum must have one entry per block.
    BlockWeightLength { expected: usize, found: usize },

    // ---- Numerics ----
    /// A matrix that must be positive definite failed to factorize.
    /// `index` identifies the state/force the matrix belongs to (0 for
    /// global matrices).
    LinearAlgebra { context: &'static str, index: usize },

    // ---- Estimation ----
    /// Optimizer failed for a reason other than a recoverable factorization
    /// failure.
    OptimizationFailed { status: String },
}

impl std::error::Error for MlfmError {}

impl std::fmt::Display for MlfmError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // ---- Time grid / observations ----
            MlfmError::TooFewTimes { len } => {
                write!(f, "Time grid has {len} points; at least 2 are required")
            }
            MlfmError::NonFiniteTime { index, value } => {
                write!(f, "Non-finite time at index {index}: {value}")
            }
            MlfmError::NonIncreasingTimes { index, previous, current } => {
                write!(
                    f,
                    "Times must be strictly increasing: t[{index}] = {current} follows {previous}"
                )
            }
            MlfmError::ObservationShape { expected_rows, expected_cols, rows, cols } => {
                write!(
                    f,
                    "Observation matrix is {rows}x{cols}; expected {expected_rows}x{expected_cols}"
                )
            }
            MlfmError::NonFiniteObservation { row, col, value } => {
                write!(f, "Non-finite observation at ({row}, {col}): {value}")
            }

            // ---- Structure ----
            MlfmError::EmptyStructure => {
                write!(f, "At least the autonomous structural matrix is required")
            }
            MlfmError::StructuralShape { index, rows, cols, expected } => {
                write!(
                    f,
                    "Structural matrix {index} is {rows}x{cols}; expected {expected}x{expected}"
                )
            }
            MlfmError::NonFiniteStructural { index, row, col } => {
                write!(f, "Non-finite coefficient in structural matrix {index} at ({row}, {col})")
            }

            // ---- Kernels / parameters ----
            MlfmError::KernelCount { what, expected, found } => {
                write!(f, "Expected {expected} {what} kernels, found {found}")
            }
            MlfmError::KernelParamCount { what, index, expected, found } => {
                write!(
                    f,
                    "{what} kernel {index} takes {expected} hyperparameters, found {found}"
                )
            }
            MlfmError::InvalidKernelParam { name, value } => {
                write!(f, "Kernel parameter '{name}' must be finite and > 0, got {value}")
            }
            MlfmError::ParamShape { name, expected, found } => {
                write!(f, "Parameter '{name}' has size {found}; expected {expected}")
            }
            MlfmError::NonPositiveParam { name, index, value } => {
                write!(f, "Parameter '{name}' at index {index} must be finite and > 0, got {value}")
            }
            MlfmError::NonFiniteParam { name, index, value } => {
                write!(f, "Parameter '{name}' at index {index} is not finite: {value}")
            }

            // ---- Options ----
            MlfmError::InvalidOption { name, value, reason } => {
                write!(f, "Invalid option '{name}' = {value}: {reason}")
            }
            MlfmError::InvalidGammaPrior { shape, rate } => {
                write!(f, "Invalid Gamma prior (shape {shape}, rate {rate}): both must be > 0")
            }

            // ---- Block covariance ----
            MlfmError::BlockIndexOutOfRange { row, col, block_count } => {
                write!(f, "Block ({row}, {col}) out of range for {block_count}x{block_count} blocks")
            }
            MlfmError::ElementIndexOutOfRange { index, block_size } => {
                write!(f, "Element index {index} out of range for block size {block_size}")
            }
            MlfmError::BlockShapeMismatch { expected_rows, expected_cols, rows, cols } => {
                write!(f, "Matrix is {rows}x{cols}; expected {expected_rows}x{expected_cols}")
            }
            MlfmError::BlockWeightLength { expected, found } => {
                write!(f, "Block weights have length {found}; expected {expected}")
            }

            // ---- Numerics ----
            MlfmError::LinearAlgebra { context, index } => {
                write!(f, "Matrix not positive definite: {context} (index {index})")
            }

            // ---- Estimation ----
            MlfmError::OptimizationFailed { status } => {
                write!(f, "Optimization failed: {status}")
            }
        }
    }
}

impl From<OptError> for MlfmError {
    fn from(err: OptError) -> Self {
        MlfmError::OptimizationFailed { status: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    // Purpose
    // -------
    // Factorization failures survive the trip into the optimizer error type
    // as the recoverable variant, everything else as a model failure.
    //
    // Given
    // -----
    // - A `LinearAlgebra` error and an `InvalidOption` error.
    //
    // Expect
    // ------
    // - `OptError::LinearAlgebra` carrying the context and index;
    //   `OptError::ModelFailure` for the option error.
    fn conversion_to_opt_error_keeps_linear_algebra_recoverable() {
        // Arrange
        let la = MlfmError::LinearAlgebra { context: "S_k", index: 1 };
        let opt = MlfmError::InvalidOption { name: "tol", value: -1.0, reason: "must be > 0" };

        // Act
        let la_conv = OptError::from(la);
        let opt_conv = OptError::from(opt);

        // Assert
        assert_eq!(la_conv, OptError::LinearAlgebra { context: "S_k (index 1)".to_string() });
        assert!(matches!(opt_conv, OptError::ModelFailure { .. }));
    }
}

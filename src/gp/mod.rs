//! gp — Gaussian-process building blocks for gradient matching.
//!
//! Purpose
//! -------
//! Collect the covariance machinery the likelihood engine is built on:
//! kernel capabilities, symmetric block covariances, the per-state
//! gradient-matching covariance terms and the linear-algebra bridge.
//!
//! Key behaviors
//! -------------
//! - [`kernel`]: [`ForceKernel`] / [`StateKernel`] traits and [`RbfKernel`].
//! - [`block_covariance`]: [`BlockCovariance`] with lower-triangular block
//!   storage and covariance queries.
//! - [`covariance_handler`]: [`LatentStateCovarianceHandler`] producing
//!   `Cxx`, `Mdx`, `S_k` and their hyperparameter derivatives.
//! - [`linalg`]: `ndarray` ↔ `nalgebra` copies and [`CholeskyFactor`].
//!
//! Conventions
//! -----------
//! - Public values are `ndarray` arrays; factorizations and solves run on
//!   `nalgebra::DMatrix`.
//! - Non positive definite matrices are errors of kind
//!   `MlfmError::LinearAlgebra`, never panics.

pub mod block_covariance;
pub mod covariance_handler;
pub mod kernel;
pub mod linalg;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::block_covariance::BlockCovariance;
pub use self::covariance_handler::{HyperGradient, LatentStateCovarianceHandler, StateCovariance};
pub use self::kernel::{ForceKernel, RbfKernel, StateKernel};
pub use self::linalg::CholeskyFactor;

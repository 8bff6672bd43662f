//! mlfm_agm — multiplicative latent force models fitted by adaptive
//! gradient matching.
//!
//! Purpose
//! -------
//! Estimate the latent forces `g_r(t)` (and optionally kernel
//! hyperparameters, slack variances γ and data precisions τ) of
//!
//! ```text
//! dx_k/dt = Σ_i (A_0[k,i] + Σ_r A_r[k,i] g_r(t)) x_i(t)
//! ```
//!
//! from noisy observations of `x` on a time grid, without ever solving the
//! ODE: each state carries a Gaussian-process prior, and the GP derivative
//! is matched against the ODE right-hand side with slack variance γ_k.
//!
//! Key behaviors
//! -------------
//! - [`gp`]: kernels, block covariances and the per-state gradient-matching
//!   covariance handler.
//! - [`mlfm`]: observations, structural matrices, the immutable model,
//!   parameter packing and the likelihood engine with analytic gradients.
//! - [`fit`]: MAP, EM and variational drivers behind [`fit::fit`].
//! - [`optimization`]: the argmin-backed L-BFGS maximizer shared by the
//!   fits.
//! - [`logging`]: terminal progress output behind the `obs_slog` feature.
//!
//! Invariants & assumptions
//! ------------------------
//! - Everything is single-threaded and deterministic; a fit borrows the
//!   model immutably and returns fresh results.
//! - A non positive definite matrix is an error value
//!   (`MlfmError::LinearAlgebra`), never a panic; inside the optimizers it
//!   is a penalty.
//!
//! Conventions
//! -----------
//! - Observations and state means are `N×K`, forces `R×N`, stacked vectors
//!   state-major.
//! - Positive hyperparameters are optimized on the log scale.
//!
//! Testing notes
//! -------------
//! - Unit tests live next to the code; `tests/integration_mlfm_pipeline.rs`
//!   checks gradients against finite differences and runs all three fits
//!   on a rotation system with a known constant force.

pub mod fit;
pub mod gp;
pub mod logging;
pub mod mlfm;
pub mod optimization;

pub mod prelude {
    pub use crate::fit::prelude::*;
    pub use crate::gp::{BlockCovariance, ForceKernel, RbfKernel, StateKernel};
    pub use crate::mlfm::prelude::*;
    pub use crate::optimization::prelude::*;
}

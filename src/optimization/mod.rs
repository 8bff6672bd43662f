//! optimization — L-BFGS maximizer, numerical helpers, and error surface.
//!
//! Purpose
//! -------
//! Provide the generic optimization layer used by the MAP fit and by the
//! force-kernel refit inside EM. Callers implement [`LogLikelihood`] for a
//! packed, unconstrained parameter vector, choose tolerances, and obtain an
//! [`OptimOutcome`] without touching argmin directly.
//!
//! Key behaviors
//! -------------
//! - Maximize an objective `ℓ(θ)` with L-BFGS (`loglik_optimizer`) using a
//!   More–Thuente or Hager–Zhang line search.
//! - Supply log/exp helpers with clamping (`numerical_stability`) so that
//!   positive hyperparameters can be optimized on the log scale without
//!   overflow.
//! - Normalize configuration issues, numerical failures, and backend solver
//!   errors into [`OptError`] with the alias [`OptResult<T>`].
//!
//! Invariants & assumptions
//! ------------------------
//! - Optimizers work in an unconstrained space; all positive quantities are
//!   passed as logarithms.
//! - A covariance that fails to factorize at a trial point is a recoverable
//!   event: the objective reports [`OptError::LinearAlgebra`] and the adapter
//!   maps it to a large finite penalty.
//!
//! Conventions
//! -----------
//! - Internally argmin minimizes `c(θ) = -ℓ(θ)`; every public value is
//!   expressed in terms of `ℓ`.
//! - This layer performs no I/O. Progress output is only emitted through the
//!   argmin slog observer when the `obs_slog` feature is enabled and
//!   `MLEOptions::verbose` is set.
//!
//! Downstream usage
//! ----------------
//! - `fit::map` implements [`LogLikelihood`] for the MLFM log posterior.
//! - `fit::force_refit` implements it for a Gaussian-process marginal
//!   likelihood of the current force estimates.
//!
//! Testing notes
//! -------------
//! - Unit tests cover solver wiring, tolerance validation, the penalty
//!   mapping in the adapter, and convergence on toy quadratics.
//!
//! [`LogLikelihood`]: loglik_optimizer::LogLikelihood
//! [`OptimOutcome`]: loglik_optimizer::OptimOutcome
//! [`OptError`]: errors::OptError
//! [`OptResult<T>`]: errors::OptResult
//! [`OptError::LinearAlgebra`]: errors::OptError::LinearAlgebra

pub mod errors;
pub mod loglik_optimizer;
pub mod numerical_stability;

pub mod prelude {
    pub use super::errors::{OptError, OptResult};
    pub use super::loglik_optimizer::prelude::*;
    pub use super::numerical_stability::prelude::*;
}

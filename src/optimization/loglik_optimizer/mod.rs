//! loglik_optimizer — argmin-backed L-BFGS maximizer for MLFM objectives.
//!
//! Purpose
//! -------
//! Provide the single quasi-Newton engine shared by the MAP fit, the EM
//! M-step and the force-kernel refit. Callers implement [`LogLikelihood`]
//! for an objective `ℓ(θ)` over a packed parameter vector and call
//! [`maximize`]; the module takes care of sign flips, line-search choice,
//! tolerances, non-PD penalties and result normalization.
//!
//! Key behaviors
//! -------------
//! - Convert `ℓ(θ)` into the argmin cost `c(θ) = -ℓ(θ)` via
//!   [`adapter::ArgMinAdapter`].
//! - Turn a recoverable [`OptError::LinearAlgebra`] raised by the objective
//!   into the finite cost `PENALTY_COST` and a zero gradient, so the line
//!   search backtracks instead of aborting the run.
//! - Fall back to `finitediff` central/forward differences when an objective
//!   does not implement [`LogLikelihood::grad`].
//! - Normalize the final argmin state into an [`OptimOutcome`] whose
//!   `status` distinguishes solver convergence from an exhausted iteration
//!   budget.
//!
//! Invariants & assumptions
//! ------------------------
//! - The optimizer always maximizes; user code returns `ℓ(θ)` and `∇ℓ(θ)`,
//!   never the cost.
//! - Option structs ([`Tolerances`], [`MLEOptions`]) are validated at
//!   construction and trusted afterwards.
//!
//! Conventions
//! -----------
//! - Parameters are `ndarray::Array1<f64>` ([`Theta`]).
//! - Errors surface as [`OptResult<T>`]; argmin errors never leak.
//! - Progress output exists only behind the `obs_slog` feature and only when
//!   `MLEOptions::verbose` is set.
//!
//! Testing notes
//! -------------
//! - Unit tests cover tolerance validation, solver construction, the
//!   penalty path of the adapter, the finite-difference fallback and a full
//!   L-BFGS run on a concave quadratic.
//!
//! [`OptError::LinearAlgebra`]: crate::optimization::errors::OptError::LinearAlgebra
//! [`OptResult<T>`]: crate::optimization::errors::OptResult

pub mod adapter;
pub mod api;
pub mod builders;
pub mod run;
pub mod traits;
pub mod types;
pub mod validation;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::api::maximize;
pub use self::traits::{
    LineSearcher, LogLikelihood, MLEOptions, OptimOutcome, TerminationKind, Tolerances,
};
pub use self::types::{Cost, DEFAULT_LBFGS_MEM, FnEvalMap, Grad, Theta};

pub mod prelude {
    pub use super::api::maximize;
    pub use super::traits::{LineSearcher, LogLikelihood, MLEOptions, OptimOutcome, Tolerances};
    pub use super::types::{Cost, Grad, Theta};
}

//! numerical_stability — guarded positive-parameter transforms and shared
//! numerical constants.
//!
//! Purpose
//! -------
//! Collect the log-space transforms and small tolerances shared by the
//! likelihood engine and the three MLFM optimizers, so that every layer
//! agrees on how positive parameters are mapped into optimizer space and
//! how numerical failure is penalized.
//!
//! Key behaviors
//! -------------
//! - Provide clamped `exp`/`ln` maps (`safe_exp`, `safe_log` and their
//!   vector forms) for kernel hyperparameters, slack variances γ and data
//!   precisions τ.
//! - Centralize `DEFAULT_JITTER` (GP nugget), `PENALTY_COST` (finite cost
//!   for non-PD candidates) and `LOG_PARAM_BOUND`.
//!
//! Invariants & assumptions
//! ------------------------
//! - Every positive parameter in optimizer space is stored as its natural
//!   logarithm; the only exception is the latent force trajectory `g`,
//!   which is unconstrained.
//! - Values held `Fixed` by a fit target never pass through these
//!   transforms, so they are returned bit-identical.
//!
//! Conventions
//! -----------
//! - Pure functions over `f64` and `ndarray` vectors; no logging, no I/O.
//!
//! Testing notes
//! -------------
//! - Unit tests in [`transformations`] cover round-trips on moderate values
//!   and clamping behavior at the extremes.

pub mod transformations;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::transformations::{
    DEFAULT_JITTER, LOG_PARAM_BOUND, PENALTY_COST, POSITIVE_FLOOR, safe_exp, safe_exp_vec,
    safe_log, safe_log_vec,
};

pub mod prelude {
    pub use super::transformations::{
        DEFAULT_JITTER, PENALTY_COST, safe_exp, safe_exp_vec, safe_log, safe_log_vec,
    };
}

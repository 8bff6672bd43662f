//! Numerical stability utilities.
//!
//! Provides guarded versions of the positive-parameter transforms used by
//! every optimizer in the crate, plus the small set of shared numerical
//! constants (Cholesky jitter, penalty cost, log-space bounds).
//!
//! # Provided items
//! - [`DEFAULT_JITTER`]: diagonal nugget added to GP covariance matrices
//!   before factorization.
//! - [`PENALTY_COST`]: finite cost returned to the line search when a
//!   candidate point makes a covariance indefinite.
//! - [`LOG_PARAM_BOUND`]: symmetric clamp applied to log-parameters before
//!   exponentiation.
//! - [`safe_exp`] / [`safe_log`]: log-space maps for strictly positive
//!   parameters (γ, τ, kernel hyperparameters).
//! - [`safe_exp_vec`] / [`safe_log_vec`]: element-wise versions over
//!   `ndarray` vectors.
use ndarray::{Array1, ArrayView1};

/// Default diagonal jitter added to GP covariance matrices.
///
/// Squared-exponential Gram matrices on dense time grids are numerically
/// singular; the jitter keeps their Cholesky factorization well defined.
pub const DEFAULT_JITTER: f64 = 1e-6;

/// Cost reported to the line search for points where the model precision
/// cannot be factorized. Large but finite so that argmin keeps iterating.
pub const PENALTY_COST: f64 = 1e10;

/// Log-parameters are clamped to `[-LOG_PARAM_BOUND, LOG_PARAM_BOUND]`
/// before exponentiation, i.e. positive parameters live in `[e^-30, e^30]`.
pub const LOG_PARAM_BOUND: f64 = 30.0;

/// Smallest positive value accepted by [`safe_log`] before clamping.
pub const POSITIVE_FLOOR: f64 = 1e-300;

/// Map an unconstrained log-parameter to `(0, ∞)`.
///
/// The argument is clamped to `±LOG_PARAM_BOUND`, so the result is always
/// finite and strictly positive even when the line search tries extreme
/// steps.
pub fn safe_exp(x: f64) -> f64 {
    x.clamp(-LOG_PARAM_BOUND, LOG_PARAM_BOUND).exp()
}

/// Inverse of [`safe_exp`] on `(0, ∞)`.
///
/// Values below [`POSITIVE_FLOOR`] are floored first so that `ln` never
/// returns `-∞`.
pub fn safe_log(x: f64) -> f64 {
    x.max(POSITIVE_FLOOR).ln().clamp(-LOG_PARAM_BOUND, LOG_PARAM_BOUND)
}

/// Element-wise [`safe_exp`].
pub fn safe_exp_vec(x: ArrayView1<f64>) -> Array1<f64> {
    x.mapv(safe_exp)
}

/// Element-wise [`safe_log`].
pub fn safe_log_vec(x: ArrayView1<f64>) -> Array1<f64> {
    x.mapv(safe_log)
}

//! loglik_optimizer::types — numeric aliases and L-BFGS wiring.
//!
//! Purpose
//! -------
//! Fix the concrete `ndarray` containers and argmin solver generics used by
//! every MLFM objective (MAP posterior, EM expected log-likelihood, force
//! kernel refit), so the model code never names argmin generics directly.
//!
//! Conventions
//! -----------
//! - `Theta` is the packed optimizer vector: latent forces first, then
//!   log-hyperparameters, log-slacks and log-precisions, depending on which
//!   parameter groups are free.
//! - `Cost` is always the minimized quantity `c(θ) = -ℓ(θ)`.
use argmin::solver::{
    linesearch::{HagerZhangLineSearch, MoreThuenteLineSearch},
    quasinewton::LBFGS,
};
use ndarray::Array1;
use std::collections::HashMap;

/// Packed parameter vector in optimizer space.
pub type Theta = Array1<f64>;

/// Gradient vector, same shape as [`Theta`].
pub type Grad = Array1<f64>;

/// Scalar cost `c(θ) = -ℓ(θ)`.
pub type Cost = f64;

/// Function-evaluation counters as reported by argmin (`"cost_count"`,
/// `"gradient_count"`, ...).
pub type FnEvalMap = HashMap<String, u64>;

/// Default L-BFGS history size.
pub const DEFAULT_LBFGS_MEM: usize = 7;

/// Hager–Zhang line search over the crate's numeric types.
pub type HagerZhangLS = HagerZhangLineSearch<Theta, Grad, Cost>;

/// More–Thuente line search over the crate's numeric types.
pub type MoreThuenteLS = MoreThuenteLineSearch<Theta, Grad, Cost>;

/// L-BFGS with Hager–Zhang line search.
pub type LbfgsHagerZhang = LBFGS<HagerZhangLS, Theta, Grad, Cost>;

/// L-BFGS with More–Thuente line search.
pub type LbfgsMoreThuente = LBFGS<MoreThuenteLS, Theta, Grad, Cost>;

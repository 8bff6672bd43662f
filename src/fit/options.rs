//! Options of the three fitting methods.
//!
//! Every struct has public fields, a `Default` and a validating `new`;
//! the drivers re-run [`validate`](EmOptions::validate) so hand-built
//! values are checked as well.
use crate::{
    mlfm::{
        errors::{MlfmError, MlfmResult},
        params::FitTargets,
    },
    optimization::loglik_optimizer::MLEOptions,
};

/// Starting moments `Ex = Y`, `Cov = 1.0 · I` of the iterative methods.
pub const DEFAULT_INIT_STATE_VARIANCE: f64 = 1.0;

/// MAP: L-BFGS over the free groups of `targets`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MapOptions {
    pub targets: FitTargets,
    pub mle: MLEOptions,
}

impl MapOptions {
    pub fn new(targets: FitTargets, mle: MLEOptions) -> Self {
        Self { targets, mle }
    }
}

/// EM: alternate exact Gaussian E-steps with L-BFGS M-steps.
///
/// - `max_iter` / `min_iter`: outer iteration limits (`min_iter` suppresses
///   early convergence only).
/// - `tol_loglik`: convergence when the joint log-likelihood improves by
///   less than this.
/// - `tol_g`: convergence when no force value moves more than this.
/// - `decrease_tolerance`: largest accepted drop of the joint
///   log-likelihood; `None` uses `1e-6 · max(1, |ℓ_prev|)`.
/// - `init_state_variance`: isotropic starting covariance of the states.
/// - `refit_force_kernels`: refit every free ψ_r by GP marginal likelihood
///   of the current g_r after each M-step.
/// - `m_step`: options of the inner L-BFGS runs.
#[derive(Debug, Clone, PartialEq)]
pub struct EmOptions {
    pub targets: FitTargets,
    pub max_iter: usize,
    pub min_iter: usize,
    pub tol_loglik: f64,
    pub tol_g: f64,
    pub decrease_tolerance: Option<f64>,
    pub init_state_variance: f64,
    pub refit_force_kernels: bool,
    pub m_step: MLEOptions,
    pub verbose: bool,
}

impl EmOptions {
    /// Errors
    /// ------
    /// - [`MlfmError::InvalidOption`] for a zero `max_iter`, non-finite or
    ///   negative tolerances.
    pub fn new(targets: FitTargets, max_iter: usize, tol_loglik: f64, tol_g: f64) -> MlfmResult<Self> {
        let opts = Self { targets, max_iter, tol_loglik, tol_g, ..Self::default() };
        opts.validate()?;
        Ok(opts)
    }

    /// Errors
    /// ------
    /// - [`MlfmError::InvalidOption`] naming the offending field.
    pub fn validate(&self) -> MlfmResult<()> {
        check_max_iter(self.max_iter)?;
        check_non_negative("tol_loglik", self.tol_loglik)?;
        check_non_negative("tol_g", self.tol_g)?;
        if let Some(tol) = self.decrease_tolerance {
            check_non_negative("decrease_tolerance", tol)?;
        }
        check_positive("init_state_variance", self.init_state_variance)
    }

    /// Tolerated decrease of the joint log-likelihood below `previous`.
    pub fn decrease_allowance(&self, previous: f64) -> f64 {
        self.decrease_tolerance.unwrap_or_else(|| 1e-6 * previous.abs().max(1.0))
    }
}

impl Default for EmOptions {
    fn default() -> Self {
        Self {
            targets: FitTargets::default(),
            max_iter: 100,
            min_iter: 1,
            tol_loglik: 1e-6,
            tol_g: 1e-6,
            decrease_tolerance: None,
            init_state_variance: DEFAULT_INIT_STATE_VARIANCE,
            refit_force_kernels: false,
            m_step: MLEOptions::default(),
            verbose: false,
        }
    }
}

/// Variational coordinate ascent on `q(x) q(g)`; kernel hyperparameters,
/// γ and τ stay at the model's values.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VariationalOptions {
    pub max_iter: usize,
    pub tol: f64,
    pub init_state_variance: f64,
    pub verbose: bool,
}

impl VariationalOptions {
    /// Errors
    /// ------
    /// - [`MlfmError::InvalidOption`] for a zero `max_iter` or a negative /
    ///   non-finite `tol`.
    pub fn new(max_iter: usize, tol: f64) -> MlfmResult<Self> {
        let opts = Self { max_iter, tol, ..Self::default() };
        opts.validate()?;
        Ok(opts)
    }

    pub fn validate(&self) -> MlfmResult<()> {
        check_max_iter(self.max_iter)?;
        check_non_negative("tol", self.tol)?;
        check_positive("init_state_variance", self.init_state_variance)
    }
}

impl Default for VariationalOptions {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1e-6,
            init_state_variance: DEFAULT_INIT_STATE_VARIANCE,
            verbose: false,
        }
    }
}

// ---- Validation helpers ----

fn check_max_iter(max_iter: usize) -> MlfmResult<()> {
    if max_iter == 0 {
        return Err(MlfmError::InvalidOption {
            name: "max_iter",
            value: 0.0,
            reason: "must be at least 1",
        });
    }
    Ok(())
}

fn check_non_negative(name: &'static str, value: f64) -> MlfmResult<()> {
    if !value.is_finite() || value < 0.0 {
        return Err(MlfmError::InvalidOption { name, value, reason: "must be finite and >= 0" });
    }
    Ok(())
}

fn check_positive(name: &'static str, value: f64) -> MlfmResult<()> {
    if !value.is_finite() || value <= 0.0 {
        return Err(MlfmError::InvalidOption { name, value, reason: "must be finite and > 0" });
    }
    Ok(())
}

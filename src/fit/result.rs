//! Fit results and terminal status.
use crate::{
    gp::block_covariance::BlockCovariance,
    mlfm::{
        errors::{MlfmError, MlfmResult},
        params::MlfmParams,
    },
};
use ndarray::{Array1, Array2};

/// Why an iterative fit stopped before converging. The fit still carries
/// the last accepted estimate.
#[derive(Debug, Clone, PartialEq)]
pub enum AbortReason {
    /// An EM iteration lowered the joint log-likelihood by more than the
    /// allowed tolerance; the previous estimate was kept.
    NonMonotonicLikelihood { previous: f64, current: f64 },

    /// A covariance or precision matrix could not be factorized at the
    /// proposed parameters.
    LinearAlgebra { context: String },

    /// The inner L-BFGS run failed (for example a line-search exit) without
    /// improving on its starting point, or returned an error.
    OptimizerFailure { status: String },
}

impl AbortReason {
    /// Reason for a mid-fit error that can end a fit gracefully; `None` for
    /// configuration errors, which are returned as errors.
    pub(crate) fn from_error(err: &MlfmError) -> Option<Self> {
        match err {
            MlfmError::LinearAlgebra { context, index } => {
                Some(AbortReason::LinearAlgebra { context: format!("{context} (index {index})") })
            }
            MlfmError::OptimizationFailed { status } => {
                Some(AbortReason::OptimizerFailure { status: status.clone() })
            }
            _ => None,
        }
    }
}

/// Status for an error raised after `accepted` iterations: an abort when
/// at least one iteration was accepted and the error is recoverable, the
/// error itself otherwise.
pub(crate) fn abort_or_err(err: MlfmError, accepted: usize) -> MlfmResult<FitStatus> {
    match AbortReason::from_error(&err) {
        Some(reason) if accepted > 0 => Ok(FitStatus::Aborted { reason }),
        _ => Err(err),
    }
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::NonMonotonicLikelihood { previous, current } => {
                write!(f, "log-likelihood decreased from {previous} to {current}")
            }
            AbortReason::LinearAlgebra { context } => {
                write!(f, "matrix not positive definite: {context}")
            }
            AbortReason::OptimizerFailure { status } => write!(f, "optimizer failed: {status}"),
        }
    }
}

/// Terminal state of a fit.
#[derive(Debug, Clone, PartialEq)]
pub enum FitStatus {
    Converged,
    MaxIterationsReached,
    Aborted { reason: AbortReason },
}

impl FitStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, FitStatus::Converged)
    }
}

impl std::fmt::Display for FitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FitStatus::Converged => write!(f, "converged"),
            FitStatus::MaxIterationsReached => write!(f, "maximum iterations reached"),
            FitStatus::Aborted { reason } => write!(f, "aborted: {reason}"),
        }
    }
}

/// Outcome of [`fit`](crate::fit::fit).
///
/// - `params`: final forces (the posterior mean for the variational
///   method), hyperparameters, γ and τ.
/// - `force_covariance`: covariance of `q(g)` (variational only).
/// - `state_mean` (`N×K`) and `state_covariance`: Gaussian posterior of the
///   states at the final parameters (given the point forces for MAP and
///   EM, given `q(g)` for the variational method).
/// - `objective`: final value of the method's tracked objective: the log
///   posterior for MAP, the joint log-likelihood (marginal + force prior)
///   for EM and the variational method.
/// - `trace`: the tracked objective after every accepted iteration.
#[derive(Debug, Clone, PartialEq)]
pub struct MlfmFit {
    pub params: MlfmParams,
    pub force_covariance: Option<BlockCovariance>,
    pub state_mean: Array2<f64>,
    pub state_covariance: Option<BlockCovariance>,
    pub objective: f64,
    pub status: FitStatus,
    pub iterations: usize,
    pub trace: Array1<f64>,
}

impl MlfmFit {
    /// Estimated forces, `R×N`.
    pub fn forces(&self) -> &Array2<f64> {
        &self.params.forces
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    // Purpose
    // -------
    // Numerical and optimizer errors raised mid-fit become abort reasons;
    // configuration errors do not.
    //
    // Given
    // -----
    // - A `LinearAlgebra`, an `OptimizationFailed` and an `InvalidOption`
    //   error.
    //
    // Expect
    // ------
    // - The first two map to `LinearAlgebra` / `OptimizerFailure` with their
    //   details; the option error maps to `None`.
    fn mid_fit_errors_map_to_abort_reasons() {
        // Arrange
        let la = MlfmError::LinearAlgebra { context: "state posterior precision", index: 0 };
        let opt = MlfmError::OptimizationFailed { status: "line search".to_string() };
        let cfg = MlfmError::InvalidOption { name: "tol", value: -1.0, reason: "must be >= 0" };

        // Act / Assert
        assert_eq!(
            AbortReason::from_error(&la),
            Some(AbortReason::LinearAlgebra {
                context: "state posterior precision (index 0)".to_string()
            })
        );
        assert_eq!(
            AbortReason::from_error(&opt),
            Some(AbortReason::OptimizerFailure { status: "line search".to_string() })
        );
        assert_eq!(AbortReason::from_error(&cfg), None);
        let status = FitStatus::Aborted { reason: AbortReason::from_error(&opt).expect("reason") };
        assert_eq!(status.to_string(), "aborted: optimizer failed: line search");
    }

    #[test]
    // Purpose
    // -------
    // A recoverable error ends a fit gracefully only once an iteration has
    // been accepted.
    //
    // Given
    // -----
    // - A `LinearAlgebra` error after 0 and after 3 accepted iterations, and
    //   a configuration error after 3.
    //
    // Expect
    // ------
    // - `Err` with no accepted iteration, `Aborted` after 3; the
    //   configuration error is always returned.
    fn recoverable_errors_abort_after_an_accepted_iteration() {
        // Arrange
        let la = MlfmError::LinearAlgebra { context: "Lambda", index: 0 };
        let cfg = MlfmError::TooFewTimes { len: 1 };

        // Act
        let first = abort_or_err(la.clone(), 0);
        let later = abort_or_err(la.clone(), 3);
        let config = abort_or_err(cfg.clone(), 3);

        // Assert
        assert_eq!(first, Err(la));
        assert_eq!(
            later,
            Ok(FitStatus::Aborted {
                reason: AbortReason::LinearAlgebra { context: "Lambda (index 0)".to_string() }
            })
        );
        assert_eq!(config, Err(cfg));
    }
}

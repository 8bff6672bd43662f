//! Public configuration and result types of the L-BFGS maximizer.
//!
//! - [`LogLikelihood`]: objective trait implemented by the MLFM fits.
//! - [`MLEOptions`] / [`Tolerances`]: validated solver configuration.
//! - [`LineSearcher`]: line search used inside L-BFGS.
//! - [`OptimOutcome`] / [`TerminationKind`]: normalized run result.
//!
//! Convention: `ℓ(θ)` is maximized by minimizing `c(θ) = -ℓ(θ)`; gradients
//! returned by implementors are gradients of `ℓ`.
use crate::optimization::{
    errors::{OptError, OptResult},
    loglik_optimizer::{
        Cost, FnEvalMap, Grad, Theta,
        validation::{validate_theta_hat, validate_value, verify_tol_cost, verify_tol_grad},
    },
};
use argmin::core::{TerminationReason, TerminationStatus};
use argmin_math::ArgminL2Norm;
use std::str::FromStr;

/// Objective interface for the maximizer.
///
/// - `type Data`: evaluation context carried into `value`/`grad`/`check`
///   (for the MLFM fits this is the immutable model plus any fixed moments).
///
/// Required:
/// - `value`: evaluate `ℓ(θ)`. A non positive definite covariance must be
///   reported as [`OptError::LinearAlgebra`]; the adapter penalizes it.
/// - `check`: reject an inconsistent starting point before any iteration.
///
/// Optional:
/// - `grad`: analytic `∇ℓ(θ)`. When absent, finite differences are used.
/// - `value_and_grad`: both at once, `None` for the gradient when there is
///   no analytic one. The adapter calls this for every cost evaluation;
///   objectives that share work between the two should override it.
pub trait LogLikelihood {
    type Data;

    // Required methods
    fn value(&self, theta: &Theta, data: &Self::Data) -> OptResult<Cost>;
    fn check(&self, theta: &Theta, data: &Self::Data) -> OptResult<()>;

    // Optional methods
    fn grad(&self, _theta: &Theta, _data: &Self::Data) -> OptResult<Grad> {
        Err(OptError::GradientNotImplemented)
    }

    fn value_and_grad(&self, theta: &Theta, data: &Self::Data) -> OptResult<(Cost, Option<Grad>)> {
        let value = self.value(theta, data)?;
        match self.grad(theta, data) {
            Ok(grad) => Ok((value, Some(grad))),
            Err(OptError::GradientNotImplemented) => Ok((value, None)),
            Err(e) => Err(e),
        }
    }
}

/// Line search used inside L-BFGS.
///
/// Parsing is case-insensitive (`"MoreThuente"`, `"hagerzhang"`, ...);
/// unknown names return [`OptError::InvalidLineSearch`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineSearcher {
    MoreThuente,
    HagerZhang,
}

impl FromStr for LineSearcher {
    type Err = OptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().replace(['-', '_', ' '], "").as_str() {
            "morethuente" => Ok(LineSearcher::MoreThuente),
            "hagerzhang" => Ok(LineSearcher::HagerZhang),
            _ => Err(OptError::InvalidLineSearch {
                name: s.to_string(),
                reason: "Valid options are case insensitive 'MoreThuente' or 'HagerZhang'.",
            }),
        }
    }
}

/// Solver configuration for one L-BFGS run.
///
/// Fields:
/// - `tols`: stopping rules.
/// - `line_searcher`: line search inside L-BFGS.
/// - `verbose`: attach the slog observer (feature `obs_slog`).
/// - `lbfgs_mem`: history size, `None` → [`DEFAULT_LBFGS_MEM`].
///
/// Default: `tol_grad = 1e-6`, `tol_cost = 1e-10`, `max_iter = 500`,
/// More–Thuente, quiet.
///
/// [`DEFAULT_LBFGS_MEM`]: crate::optimization::loglik_optimizer::DEFAULT_LBFGS_MEM
#[derive(Debug, Clone, PartialEq)]
pub struct MLEOptions {
    pub tols: Tolerances,
    pub line_searcher: LineSearcher,
    pub verbose: bool,
    pub lbfgs_mem: Option<usize>,
}

impl MLEOptions {
    /// Build options; numeric tolerances are validated by [`Tolerances::new`].
    ///
    /// # Errors
    /// - [`OptError::InvalidLBFGSMem`] if `lbfgs_mem == Some(0)`.
    pub fn new(
        tols: Tolerances, line_searcher: LineSearcher, verbose: bool, lbfgs_mem: Option<usize>,
    ) -> OptResult<Self> {
        if let Some(m) = lbfgs_mem {
            if m == 0 {
                return Err(OptError::InvalidLBFGSMem {
                    mem: m,
                    reason: "L-BFGS memory must be greater than zero.",
                });
            }
        }
        Ok(Self { tols, line_searcher, verbose, lbfgs_mem })
    }

    /// Same options with a different iteration cap; used by the EM loop to
    /// run short inner M-steps.
    pub fn with_max_iter(&self, max_iter: usize) -> OptResult<Self> {
        let tols = Tolerances::new(self.tols.tol_grad, self.tols.tol_cost, Some(max_iter))?;
        Ok(Self { tols, ..self.clone() })
    }
}

impl Default for MLEOptions {
    fn default() -> Self {
        Self {
            tols: Tolerances { tol_grad: Some(1e-6), tol_cost: Some(1e-10), max_iter: Some(500) },
            line_searcher: LineSearcher::MoreThuente,
            verbose: false,
            lbfgs_mem: None,
        }
    }
}

/// Stopping rules for L-BFGS.
///
/// Any field may be `None`, but at least one must be set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Tolerances {
    pub tol_grad: Option<f64>,
    pub tol_cost: Option<f64>,
    pub max_iter: Option<usize>,
}

impl Tolerances {
    /// Construct validated tolerances.
    ///
    /// # Errors
    /// - [`OptError::NoTolerancesProvided`] if all three are `None`.
    /// - [`OptError::InvalidTolGrad`] / [`OptError::InvalidTolCost`] for
    ///   non-finite or non-positive tolerances.
    /// - [`OptError::InvalidMaxIter`] if `max_iter == Some(0)`.
    pub fn new(
        tol_grad: Option<f64>, tol_cost: Option<f64>, max_iter: Option<usize>,
    ) -> OptResult<Self> {
        if tol_grad.is_none() && tol_cost.is_none() && max_iter.is_none() {
            return Err(OptError::NoTolerancesProvided);
        }
        verify_tol_cost(tol_cost)?;
        verify_tol_grad(tol_grad)?;
        if let Some(max_iter) = max_iter {
            if max_iter == 0 {
                return Err(OptError::InvalidMaxIter {
                    max_iter,
                    reason: "Maximum iterations must be greater than zero.",
                });
            }
        }
        Ok(Self { tol_grad, tol_cost, max_iter })
    }
}

/// How an L-BFGS run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminationKind {
    /// Gradient-norm, cost-change or target-cost tolerance met.
    Converged,
    /// The iteration cap was hit first.
    MaxIterations,
    /// The solver gave up: a line-search exit, an interrupt or a timeout.
    Failed,
    /// argmin reported no termination reason.
    NotTerminated,
}

impl From<&TerminationStatus> for TerminationKind {
    fn from(status: &TerminationStatus) -> Self {
        match status {
            TerminationStatus::NotTerminated => TerminationKind::NotTerminated,
            TerminationStatus::Terminated(TerminationReason::MaxItersReached) => {
                TerminationKind::MaxIterations
            }
            TerminationStatus::Terminated(
                TerminationReason::SolverConverged | TerminationReason::TargetCostReached,
            ) => TerminationKind::Converged,
            TerminationStatus::Terminated(_) => TerminationKind::Failed,
        }
    }
}

/// Normalized result of [`maximize`](crate::optimization::loglik_optimizer::maximize).
///
/// - `theta_hat`: best packed parameter vector.
/// - `value`: best objective `ℓ(θ̂)` (not the cost).
/// - `termination`: see [`TerminationKind`].
/// - `status`: argmin's termination status rendered as text.
/// - `iterations`, `fn_evals`: argmin counters.
/// - `grad_norm`: norm of the last gradient, when available.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimOutcome {
    pub theta_hat: Theta,
    pub value: f64,
    pub termination: TerminationKind,
    pub status: String,
    pub iterations: usize,
    pub fn_evals: FnEvalMap,
    pub grad_norm: Option<f64>,
}

impl OptimOutcome {
    /// Build a validated outcome from raw solver state.
    ///
    /// # Errors
    /// - Propagates validation errors for `theta_hat` or `value`.
    pub fn new(
        theta_hat_opt: Option<Theta>, value: f64, status: &TerminationStatus, iterations: u64,
        fn_evals: FnEvalMap, grad: Option<Grad>,
    ) -> OptResult<Self> {
        let theta_hat = validate_theta_hat(theta_hat_opt)?;
        validate_value(value)?;
        let termination = TerminationKind::from(status);
        let status = match status {
            TerminationStatus::NotTerminated => "Not terminated".to_string(),
            TerminationStatus::Terminated(reason) => format!("{reason:?}"),
        };
        let grad_norm = grad.map(|g| g.l2_norm());
        Ok(Self {
            theta_hat,
            value,
            termination,
            status,
            iterations: iterations as usize,
            fn_evals,
            grad_norm,
        })
    }

    /// `true` only when a convergence tolerance stopped the run.
    pub fn converged(&self) -> bool {
        self.termination == TerminationKind::Converged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    // Purpose
    // -------
    // Line-search names parse case-insensitively and reject unknown names.
    //
    // Given
    // -----
    // - Mixed-case valid names and one invalid name.
    //
    // Expect
    // ------
    // - Valid names map to the right variant; the invalid one errors.
    fn line_searcher_parses_case_insensitively() {
        // Act / Assert
        assert_eq!(LineSearcher::from_str("MoreThuente").unwrap(), LineSearcher::MoreThuente);
        assert_eq!(LineSearcher::from_str("hager_zhang").unwrap(), LineSearcher::HagerZhang);
        assert!(matches!(
            LineSearcher::from_str("backtracking"),
            Err(OptError::InvalidLineSearch { .. })
        ));
    }

    #[test]
    // Purpose
    // -------
    // Tolerance validation rejects empty, non-positive and zero-iteration
    // configurations.
    //
    // Given
    // -----
    // - Several invalid tolerance combinations.
    //
    // Expect
    // ------
    // - Each returns the matching `OptError` variant.
    fn tolerances_reject_invalid_settings() {
        // Act / Assert
        assert_eq!(Tolerances::new(None, None, None), Err(OptError::NoTolerancesProvided));
        assert!(matches!(
            Tolerances::new(Some(-1.0), None, None),
            Err(OptError::InvalidTolGrad { .. })
        ));
        assert!(matches!(
            Tolerances::new(None, Some(f64::NAN), None),
            Err(OptError::InvalidTolCost { .. })
        ));
        assert!(matches!(Tolerances::new(None, None, Some(0)), Err(OptError::InvalidMaxIter { .. })));
    }

    #[test]
    // Purpose
    // -------
    // `with_max_iter` keeps every other option and only swaps the cap.
    //
    // Given
    // -----
    // - Default options.
    //
    // Expect
    // ------
    // - Same line search and gradient tolerance, new `max_iter`.
    fn with_max_iter_only_changes_the_cap() {
        // Arrange
        let opts = MLEOptions::default();

        // Act
        let short = opts.with_max_iter(5).expect("valid cap");

        // Assert
        assert_eq!(short.tols.max_iter, Some(5));
        assert_eq!(short.tols.tol_grad, opts.tols.tol_grad);
        assert_eq!(short.line_searcher, opts.line_searcher);
        assert!(MLEOptions::new(opts.tols, LineSearcher::HagerZhang, false, Some(0)).is_err());
    }

    #[test]
    // Purpose
    // -------
    // argmin termination reasons map onto `TerminationKind`.
    //
    // Given
    // -----
    // - A max-iterations stop, a solver-converged stop and a line-search
    //   exit.
    //
    // Expect
    // ------
    // - `MaxIterations`, `Converged` and `Failed` respectively; a solver
    //   exit never counts as convergence.
    fn termination_kind_distinguishes_budget_from_convergence() {
        // Arrange
        let budget = TerminationStatus::Terminated(TerminationReason::MaxItersReached);
        let solved = TerminationStatus::Terminated(TerminationReason::SolverConverged);
        let exited = TerminationStatus::Terminated(TerminationReason::SolverExit(
            "Line search terminated".to_string(),
        ));

        // Act / Assert
        assert_eq!(TerminationKind::from(&budget), TerminationKind::MaxIterations);
        assert_eq!(TerminationKind::from(&solved), TerminationKind::Converged);
        assert_eq!(TerminationKind::from(&exited), TerminationKind::Failed);
        assert_eq!(
            TerminationKind::from(&TerminationStatus::NotTerminated),
            TerminationKind::NotTerminated
        );
    }
}

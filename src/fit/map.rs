//! fit::map — maximum a posteriori estimation with L-BFGS.
//!
//! Purpose
//! -------
//! Maximize `log p(y | g, θ, γ, τ) + log p(g | ψ)` (plus optional
//! hyperpriors) over the free parameter groups of [`MapOptions::targets`].
//!
//! Key behaviors
//! -------------
//! - The free groups are packed by [`ParamLayout`]; positive groups are
//!   optimized on the log scale and fixed groups are cloned from the
//!   starting parameters on every evaluation.
//! - A non positive definite covariance at a trial point becomes a large
//!   finite penalty inside the optimizer, so the line search backtracks.
//! - After the run, the Gaussian posterior of the states given the fitted
//!   forces is attached to the result.
//!
//! Conventions
//! -----------
//! - `objective` is the log posterior; `trace` holds its starting and final
//!   values.
//! - Solver convergence maps to [`FitStatus::Converged`]; an exhausted
//!   iteration budget (or a run argmin never terminated) to
//!   [`FitStatus::MaxIterationsReached`]; a solver exit such as a failed
//!   line search to [`AbortReason::OptimizerFailure`], still with the best
//!   point argmin found.
use crate::{
    fit::{
        options::MapOptions,
        result::{AbortReason, FitStatus, MlfmFit},
    },
    mlfm::{
        errors::MlfmResult,
        likelihood::{LikelihoodEngine, OutputSelection},
        model::MlfmModel,
        params::{MlfmParams, ParamLayout},
    },
    optimization::{
        errors::{OptError, OptResult},
        loglik_optimizer::{
            Cost, Grad, LogLikelihood, TerminationKind, Theta, maximize,
            validation::validate_theta_input,
        },
    },
};
use ndarray::array;

/// Log posterior of the free groups; `Data` is the full starting parameter
/// set that supplies every fixed group.
#[derive(Debug)]
pub(crate) struct LogPosterior<'m> {
    engine: LikelihoodEngine<'m>,
    layout: ParamLayout,
}

impl LogLikelihood for LogPosterior<'_> {
    type Data = MlfmParams;

    fn value(&self, theta: &Theta, base: &MlfmParams) -> OptResult<Cost> {
        let params = self.layout.unpack(theta, base)?;
        let out = self.engine.evaluate(&params, &OutputSelection::value_only())?;
        out.log_posterior()
            .ok_or_else(|| OptError::ModelFailure { text: "log posterior not computed".into() })
    }

    fn check(&self, theta: &Theta, base: &MlfmParams) -> OptResult<()> {
        validate_theta_input(theta, self.layout.len())?;
        let params = self.layout.unpack(theta, base)?;
        self.engine.model().validate_params(&params)?;
        Ok(())
    }

    fn grad(&self, theta: &Theta, base: &MlfmParams) -> OptResult<Grad> {
        let params = self.layout.unpack(theta, base)?;
        let sel = OutputSelection::for_groups(self.layout.groups(), false);
        let out = self.engine.evaluate(&params, &sel)?;
        Ok(self.layout.pack_gradient(&out)?)
    }

    fn value_and_grad(&self, theta: &Theta, base: &MlfmParams) -> OptResult<(Cost, Option<Grad>)> {
        let params = self.layout.unpack(theta, base)?;
        let sel = OutputSelection::for_groups(self.layout.groups(), true);
        let out = self.engine.evaluate(&params, &sel)?;
        let value = out
            .log_posterior()
            .ok_or_else(|| OptError::ModelFailure { text: "log posterior not computed".into() })?;
        Ok((value, Some(self.layout.pack_gradient(&out)?)))
    }
}

/// MAP fit of `model`.
///
/// Errors
/// ------
/// - Validation errors for fixed values in `opts.targets`.
/// - `MlfmError::LinearAlgebra` if the starting point (or the final state
///   posterior) is not positive definite.
/// - `MlfmError::OptimizationFailed` for solver configuration or backend
///   failures.
pub fn fit_map(model: &MlfmModel, opts: &MapOptions) -> MlfmResult<MlfmFit> {
    let base = opts.targets.starting_params(model)?;
    let layout = ParamLayout::new(model, opts.targets.free_groups());
    let engine = LikelihoodEngine::new(model);
    let start = engine.evaluate(&base, &OutputSelection::value_only())?;
    let start_value = start.log_posterior().unwrap_or(f64::NAN);

    let (params, objective, status, iterations) = if layout.is_empty() {
        (base, start_value, FitStatus::Converged, 0)
    } else {
        let problem = LogPosterior { engine, layout };
        let theta0 = problem.layout.pack(&base);
        let outcome = maximize(&problem, theta0, &base, &opts.mle)?;
        let params = problem.layout.unpack(&outcome.theta_hat, &base)?;
        let status = match outcome.termination {
            TerminationKind::Converged => FitStatus::Converged,
            TerminationKind::Failed => FitStatus::Aborted {
                reason: AbortReason::OptimizerFailure { status: outcome.status.clone() },
            },
            TerminationKind::MaxIterations | TerminationKind::NotTerminated => {
                FitStatus::MaxIterationsReached
            }
        };
        (params, outcome.value, status, outcome.iterations)
    };

    let posterior = engine.state_posterior(&params, None)?;
    Ok(MlfmFit {
        params,
        force_covariance: None,
        state_mean: posterior.mean,
        state_covariance: Some(posterior.covariance),
        objective,
        status,
        iterations,
        trace: array![start_value, objective],
    })
}

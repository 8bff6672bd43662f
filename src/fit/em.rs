//! fit::em — expectation maximization over the latent trajectories.
//!
//! Purpose
//! -------
//! Treat the state trajectories as missing data. Each iteration
//!
//! 1. M-step: maximize the expected complete-data log-likelihood `Q` (plus
//!    the force prior and hyperpriors) over the free forces, state kernel
//!    hyperparameters and γ with L-BFGS; optionally refit every free ψ_r by
//!    GP marginal likelihood of g_r; set every free τ_k in closed form
//!    `N / (‖y_k − E x_k‖² + tr Cov_kk)`.
//! 2. E-step: `P = Λ + diag(τ)`, `E x = P⁻¹ diag(τ) y`, `Cov = P⁻¹`.
//! 3. Check the joint log-likelihood (marginal + force prior + hyperprior).
//!
//! Key behaviors
//! -------------
//! - Iteration 1 starts from `E x = Y`, `Cov = init_state_variance · I`
//!   and is accepted unconditionally; from then on a drop of the joint
//!   log-likelihood by more than `EmOptions::decrease_allowance` stops the
//!   fit with [`AbortReason::NonMonotonicLikelihood`] and returns the last
//!   accepted estimate.
//! - Converged after `min_iter` iterations, and never on the first one,
//!   when the joint log-likelihood changes by less than `tol_loglik`, or
//!   (forces free) when no force value moves by more than `tol_g`.
//! - From the second iteration on, an M-step whose solver fails without
//!   moving, a factorization failure or an optimizer error ends the fit
//!   with [`FitStatus::Aborted`] and the last accepted estimate.
//! - `trace` holds the joint log-likelihood of every accepted iteration.
//!
//! Invariants & assumptions
//! ------------------------
//! - ψ never enters the M-step objective; it only changes through the
//!   refit, and only when it is free.
//! - Fixed groups are never transformed, so they come back bit-identical.
use crate::{
    fit::{
        force_refit::refit_force_kernels,
        options::EmOptions,
        result::{AbortReason, FitStatus, MlfmFit, abort_or_err},
    },
    logging::ProgressLog,
    mlfm::{
        errors::MlfmResult,
        likelihood::{LikelihoodEngine, OutputSelection, StatePosterior},
        model::MlfmModel,
        params::{FreeGroups, MlfmParams, ParamLayout},
    },
    optimization::{
        errors::{OptError, OptResult},
        loglik_optimizer::{
            Cost, Grad, LogLikelihood, TerminationKind, Theta, maximize,
            validation::validate_theta_input,
        },
    },
};
use ndarray::{Array1, Zip};

/// Evaluation context of one M-step.
#[derive(Debug, Clone)]
pub(crate) struct MStepData {
    base: MlfmParams,
    moments: StatePosterior,
}

/// `Q` plus priors as a function of the packed free groups.
#[derive(Debug)]
pub(crate) struct ExpectedLogJoint<'m, 'l> {
    engine: LikelihoodEngine<'m>,
    layout: &'l ParamLayout,
}

impl LogLikelihood for ExpectedLogJoint<'_, '_> {
    type Data = MStepData;

    fn value(&self, theta: &Theta, data: &MStepData) -> OptResult<Cost> {
        let params = self.layout.unpack(theta, &data.base)?;
        let out = self.engine.expected_complete(&params, &data.moments, &OutputSelection::value_only())?;
        out.log_posterior()
            .ok_or_else(|| OptError::ModelFailure { text: "expected log joint not computed".into() })
    }

    fn check(&self, theta: &Theta, data: &MStepData) -> OptResult<()> {
        validate_theta_input(theta, self.layout.len())?;
        let params = self.layout.unpack(theta, &data.base)?;
        self.engine.model().validate_params(&params)?;
        Ok(())
    }

    fn grad(&self, theta: &Theta, data: &MStepData) -> OptResult<Grad> {
        let params = self.layout.unpack(theta, &data.base)?;
        let sel = OutputSelection::for_groups(self.layout.groups(), false);
        let out = self.engine.expected_complete(&params, &data.moments, &sel)?;
        Ok(self.layout.pack_gradient(&out)?)
    }

    fn value_and_grad(&self, theta: &Theta, data: &MStepData) -> OptResult<(Cost, Option<Grad>)> {
        let params = self.layout.unpack(theta, &data.base)?;
        let sel = OutputSelection::for_groups(self.layout.groups(), true);
        let out = self.engine.expected_complete(&params, &data.moments, &sel)?;
        let value = out
            .log_posterior()
            .ok_or_else(|| OptError::ModelFailure { text: "expected log joint not computed".into() })?;
        Ok((value, Some(self.layout.pack_gradient(&out)?)))
    }
}

/// Proposal of one EM iteration, before the monotonicity check.
struct EmStep {
    params: MlfmParams,
    moments: StatePosterior,
    log_likelihood: f64,
    max_step: f64,
    /// argmin status when the M-step solver failed without leaving its
    /// starting point.
    stalled: Option<String>,
}

/// Fixed inputs shared by every iteration of one EM run.
struct EmRun<'m, 'o> {
    engine: LikelihoodEngine<'m>,
    opts: &'o EmOptions,
    layout: ParamLayout,
    refit_psi: bool,
    fit_tau: bool,
}

impl EmRun<'_, '_> {
    /// M-step from `moments`, then E-step at the new parameters.
    fn step(&self, params: &MlfmParams, moments: &StatePosterior) -> MlfmResult<EmStep> {
        let model = self.engine.model();
        let mut next = params.clone();
        let mut stalled = None;
        if !self.layout.is_empty() {
            let problem = ExpectedLogJoint { engine: self.engine, layout: &self.layout };
            let data = MStepData { base: params.clone(), moments: moments.clone() };
            let theta0 = self.layout.pack(params);
            let outcome = maximize(&problem, theta0.clone(), &data, &self.opts.m_step)?;
            if outcome.termination == TerminationKind::Failed && outcome.theta_hat == theta0 {
                stalled = Some(outcome.status.clone());
            }
            next = self.layout.unpack(&outcome.theta_hat, params)?;
        }
        if self.refit_psi {
            next.force_log_params = refit_force_kernels(model, &next, &self.opts.m_step)?;
        }
        if self.fit_tau {
            next.tau = closed_form_tau(model, moments)?;
        }

        let next_moments = self.engine.state_posterior(&next, None)?;
        let log_likelihood = joint_value(&self.engine, &next)?;
        let max_step = max_abs_diff(&next, params);
        Ok(EmStep { params: next, moments: next_moments, log_likelihood, max_step, stalled })
    }
}

/// EM fit of `model`.
///
/// Once an iteration has been accepted, a factorization failure or an
/// optimizer failure ends the fit with [`FitStatus::Aborted`] and the last
/// accepted estimate instead of an error.
///
/// Errors
/// ------
/// - [`MlfmError::InvalidOption`] from [`EmOptions::validate`].
/// - Validation errors for fixed values in `opts.targets`.
/// - `MlfmError::LinearAlgebra` or `MlfmError::OptimizationFailed` raised
///   during the first iteration.
///
/// [`MlfmError::InvalidOption`]: crate::mlfm::errors::MlfmError::InvalidOption
pub fn fit_em(model: &MlfmModel, opts: &EmOptions) -> MlfmResult<MlfmFit> {
    opts.validate()?;
    let free = opts.targets.free_groups();
    let run = EmRun {
        engine: LikelihoodEngine::new(model),
        opts,
        layout: ParamLayout::new(
            model,
            FreeGroups {
                forces: free.forces,
                state_log_params: free.state_log_params,
                gamma: free.gamma,
                force_log_params: false,
                tau: false,
            },
        ),
        refit_psi: opts.refit_force_kernels && free.force_log_params,
        fit_tau: free.tau,
    };
    let log = ProgressLog::new(opts.verbose);

    let mut params = opts.targets.starting_params(model)?;
    let mut moments =
        StatePosterior::isotropic(model.observations().values().to_owned(), opts.init_state_variance);
    let mut trace = Vec::with_capacity(opts.max_iter);
    let mut previous: Option<f64> = None;
    let mut status = FitStatus::MaxIterationsReached;
    let mut iterations = 0;

    for iter in 1..=opts.max_iter {
        let step = match run.step(&params, &moments) {
            Ok(step) => step,
            Err(err) => {
                status = abort_or_err(err, iterations)?;
                break;
            }
        };
        let ll = step.log_likelihood;

        // The first M-step runs on the isotropic starting moments; a stall
        // there still leaves a useful E-step.
        if let Some(solver_status) = step.stalled {
            if previous.is_some() {
                status = FitStatus::Aborted {
                    reason: AbortReason::OptimizerFailure { status: solver_status },
                };
                break;
            }
        }
        if let Some(prev) = previous {
            if ll < prev - opts.decrease_allowance(prev) {
                log.rejected(prev, ll);
                status = FitStatus::Aborted {
                    reason: AbortReason::NonMonotonicLikelihood { previous: prev, current: ll },
                };
                break;
            }
        }

        params = step.params;
        moments = step.moments;
        trace.push(ll);
        iterations = iter;
        log.iteration("em", iter, ll, step.max_step);

        if iter >= opts.min_iter {
            if let Some(prev) = previous {
                let small_change = (ll - prev).abs() < opts.tol_loglik;
                let small_step = free.forces && step.max_step < opts.tol_g;
                if small_change || small_step {
                    status = FitStatus::Converged;
                    break;
                }
            }
        }
        previous = Some(ll);
    }
    log.finished("em", &status.to_string(), iterations);

    let objective = trace.last().copied().unwrap_or(f64::NAN);
    Ok(MlfmFit {
        params,
        force_covariance: None,
        state_mean: moments.mean,
        state_covariance: Some(moments.covariance),
        objective,
        status,
        iterations,
        trace: Array1::from(trace),
    })
}

/// Joint log-likelihood tracked for monotonicity.
fn joint_value(engine: &LikelihoodEngine<'_>, params: &MlfmParams) -> MlfmResult<f64> {
    let out = engine.evaluate(params, &OutputSelection::value_only())?;
    Ok(out.log_posterior().unwrap_or(f64::NAN))
}

/// `τ_k = N / (‖y_k − E x_k‖² + tr Cov_kk)`, floored away from division by
/// zero.
fn closed_form_tau(model: &MlfmModel, moments: &StatePosterior) -> MlfmResult<Array1<f64>> {
    let y = model.observations().values();
    let n = y.nrows() as f64;
    (0..y.ncols())
        .map(|k| -> MlfmResult<f64> {
            let sq: f64 = Zip::from(y.column(k))
                .and(moments.mean.column(k))
                .fold(0.0, |acc, &obs, &mean| acc + (obs - mean).powi(2));
            let tr = moments.covariance.diagonal_block(k)?.diag().sum();
            Ok(n / (sq + tr).max(f64::MIN_POSITIVE))
        })
        .collect()
}

fn max_abs_diff(a: &MlfmParams, b: &MlfmParams) -> f64 {
    Zip::from(&a.forces).and(&b.forces).fold(0.0_f64, |acc, &x, &y| acc.max((x - y).abs()))
}

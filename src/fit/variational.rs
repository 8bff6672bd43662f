//! fit::variational — mean-field coordinate ascent on `q(x) q(g)`.
//!
//! Both factors are Gaussian. Each iteration updates `q(g)` from the
//! current state moments, then `q(x)` from the new `q(g)`, using the
//! updates of [`LikelihoodEngine::force_posterior`] and
//! [`LikelihoodEngine::state_posterior`]. Kernel hyperparameters, γ and τ
//! stay at the model's configured values.
//!
//! The loop stops when no entry of the force mean moves by more than
//! `tol` (Converged) or after `max_iter` sweeps. No ELBO is computed; the
//! trace records the joint log-likelihood at the force mean.
use crate::{
    fit::{
        options::VariationalOptions,
        result::{FitStatus, MlfmFit, abort_or_err},
    },
    logging::ProgressLog,
    mlfm::{
        errors::MlfmResult,
        likelihood::{ForcePosterior, LikelihoodEngine, StatePosterior},
        model::MlfmModel,
        params::MlfmParams,
    },
};
use ndarray::{Array1, Zip};

/// One coordinate-ascent sweep from `params` and `moments`.
fn sweep(
    engine: &LikelihoodEngine<'_>, params: &MlfmParams, moments: &StatePosterior,
) -> MlfmResult<(MlfmParams, StatePosterior, ForcePosterior, f64)> {
    let update = engine.force_posterior(params, moments)?;
    let mut next = params.clone();
    next.forces = update.mean.clone();
    let next_moments = engine.state_posterior(&next, Some(&update.covariance))?;
    let ll = engine.joint_log_likelihood(&next)?;
    Ok((next, next_moments, update, ll))
}

/// Variational fit of `model`.
///
/// After the first sweep, a `q(g)` or `q(x)` precision that cannot be
/// factorized ends the fit with [`FitStatus::Aborted`] and the last complete
/// sweep.
///
/// Errors
/// ------
/// - `MlfmError::InvalidOption` from [`VariationalOptions::validate`].
/// - `MlfmError::LinearAlgebra` if a precision is not positive definite
///   during the first sweep.
pub fn fit_variational(model: &MlfmModel, opts: &VariationalOptions) -> MlfmResult<MlfmFit> {
    opts.validate()?;
    let engine = LikelihoodEngine::new(model);
    let log = ProgressLog::new(opts.verbose);
    let mut params = model.initial_params();
    let mut moments =
        StatePosterior::isotropic(model.observations().values().to_owned(), opts.init_state_variance);
    let mut q_g: Option<ForcePosterior> = None;
    let mut trace = Vec::with_capacity(opts.max_iter);
    let mut status = FitStatus::MaxIterationsReached;
    let mut iterations = 0;

    for iter in 1..=opts.max_iter {
        let (next, next_moments, update, ll) = match sweep(&engine, &params, &moments) {
            Ok(swept) => swept,
            Err(err) => {
                status = abort_or_err(err, iterations)?;
                break;
            }
        };
        let max_step = Zip::from(&next.forces)
            .and(&params.forces)
            .fold(0.0_f64, |acc, &new, &old| acc.max((new - old).abs()));
        params = next;
        moments = next_moments;
        q_g = Some(update);
        trace.push(ll);
        iterations = iter;
        log.iteration("variational", iter, ll, max_step);
        if max_step < opts.tol {
            status = FitStatus::Converged;
            break;
        }
    }
    log.finished("variational", &status.to_string(), iterations);

    Ok(MlfmFit {
        params,
        force_covariance: q_g.map(|q| q.covariance),
        state_mean: moments.mean,
        state_covariance: Some(moments.covariance),
        objective: trace.last().copied().unwrap_or(f64::NAN),
        status,
        iterations,
        trace: Array1::from(trace),
    })
}

//! Execution helper: run an argmin solver on an adapted objective and return
//! an [`OptimOutcome`].
use crate::optimization::{
    errors::OptResult,
    loglik_optimizer::{
        Grad, LogLikelihood, MLEOptions, OptimOutcome, Theta, adapter::ArgMinAdapter,
    },
};
#[cfg(feature = "obs_slog")]
use argmin::core::{CostFunction, Gradient};
use argmin::core::{Executor, State};
#[cfg(feature = "obs_slog")]
use argmin_math::ArgminL2Norm;

/// Run an L-BFGS solver (either line search) from `theta0`.
///
/// Wires the problem and solver into an argmin `Executor`, applies
/// `opts.tols.max_iter`, optionally attaches the terminal slog observer
/// (feature `obs_slog` with `opts.verbose`), and converts the final state
/// into an [`OptimOutcome`] carrying the best parameters and `ℓ(θ̂)`.
///
/// # Errors
/// - argmin runtime errors (line-search failure, observer failure) via the
///   crate's `From<argmin::core::Error>` conversion.
/// - Validation errors while building the [`OptimOutcome`].
pub fn run_lbfgs<'a, F, S>(
    theta0: Theta, opts: &MLEOptions, problem: ArgMinAdapter<'a, F>, solver: S,
) -> OptResult<OptimOutcome>
where
    F: LogLikelihood,
    S: argmin::core::Solver<
            ArgMinAdapter<'a, F>,
            argmin::core::IterState<Theta, Grad, (), (), (), f64>,
        > + Send
        + 'static,
{
    #[cfg(feature = "obs_slog")]
    if opts.verbose {
        log_initial_state(&theta0, &problem)?;
    }
    let mut optimizer = Executor::new(problem, solver);
    optimizer = optimizer.configure(|state| state.param(theta0));
    #[cfg(feature = "obs_slog")]
    if opts.verbose {
        let observer = argmin_observer_slog::SlogLogger::term_noblock();
        optimizer = optimizer.add_observer(observer, argmin::core::observers::ObserverMode::Always);
    }
    if let Some(max_iter) = opts.tols.max_iter {
        optimizer = optimizer.configure(|state| state.max_iters(max_iter as u64));
    }

    let mut result = optimizer.run()?.state().clone();
    let iterations = result.get_iter();
    let function_counts = result.get_func_counts().clone();
    let termination = result.get_termination_status().clone();
    let grad = result.take_gradient();
    OptimOutcome::new(
        result.take_best_param(),
        -result.get_best_cost(),
        &termination,
        iterations,
        function_counts,
        grad,
    )
}

#[cfg(feature = "obs_slog")]
fn log_initial_state<F>(theta0: &Theta, problem: &ArgMinAdapter<'_, F>) -> OptResult<()>
where
    F: LogLikelihood,
{
    let ll0 = -problem.cost(theta0)?;
    let g0n = problem.gradient(theta0).ok().map(|g| g.l2_norm());
    let logger = crate::logging::term_logger();
    slog::info!(logger, "lbfgs start";
        "dim" => theta0.len(),
        "loglik" => ll0,
        "grad_norm" => g0n.unwrap_or(f64::NAN),
    );
    Ok(())
}

//! High-level entry point: maximize a [`LogLikelihood`] with L-BFGS.
use crate::optimization::{
    errors::OptResult,
    loglik_optimizer::{
        OptimOutcome, Theta,
        adapter::ArgMinAdapter,
        builders::{build_optimizer_hager_zhang, build_optimizer_more_thuente},
        run::run_lbfgs,
        traits::{LineSearcher, LogLikelihood, MLEOptions},
    },
};

/// Maximize `ℓ(θ)` with L-BFGS using the line search in `opts`.
///
/// # Behavior
/// - Validates `theta0` via `f.check`.
/// - Wraps `(f, data)` in an [`ArgMinAdapter`] (cost `-ℓ`, penalty on
///   linear-algebra failure).
/// - Builds the solver for `opts.line_searcher` and runs it.
///
/// # Errors
/// - Errors from `f.check`, the builders, or the argmin run.
pub fn maximize<F: LogLikelihood>(
    f: &F, theta0: Theta, data: &F::Data, opts: &MLEOptions,
) -> OptResult<OptimOutcome> {
    f.check(&theta0, data)?;
    let problem = ArgMinAdapter::new(f, data);
    match opts.line_searcher {
        LineSearcher::MoreThuente => {
            let solver = build_optimizer_more_thuente(opts)?;
            run_lbfgs(theta0, opts, problem, solver)
        }
        LineSearcher::HagerZhang => {
            let solver = build_optimizer_hager_zhang(opts)?;
            run_lbfgs(theta0, opts, problem, solver)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::{
        errors::OptResult,
        loglik_optimizer::{Grad, Tolerances},
    };
    use ndarray::array;

    /// Concave quadratic with maximum at (1, -2).
    struct Quadratic;

    impl LogLikelihood for Quadratic {
        type Data = ();

        fn value(&self, theta: &Theta, _data: &()) -> OptResult<f64> {
            Ok(-(theta[0] - 1.0).powi(2) - 3.0 * (theta[1] + 2.0).powi(2))
        }

        fn check(&self, _theta: &Theta, _data: &()) -> OptResult<()> {
            Ok(())
        }

        fn grad(&self, theta: &Theta, _data: &()) -> OptResult<Grad> {
            Ok(array![-2.0 * (theta[0] - 1.0), -6.0 * (theta[1] + 2.0)])
        }
    }

    #[test]
    // Purpose
    // -------
    // Both line searches find the maximizer of a concave quadratic.
    //
    // Given
    // -----
    // - `Quadratic` started at the origin.
    //
    // Expect
    // ------
    // - θ̂ ≈ (1, -2), value ≈ 0, converged status.
    fn maximize_finds_quadratic_optimum_with_both_line_searches() {
        for ls in [LineSearcher::MoreThuente, LineSearcher::HagerZhang] {
            // Arrange
            let tols = Tolerances::new(Some(1e-8), None, Some(200)).expect("valid tolerances");
            let opts = MLEOptions::new(tols, ls, false, None).expect("valid options");

            // Act
            let out = maximize(&Quadratic, array![0.0, 0.0], &(), &opts).expect("run succeeds");

            // Assert
            assert!((out.theta_hat[0] - 1.0).abs() < 1e-4, "{ls:?}: {:?}", out.theta_hat);
            assert!((out.theta_hat[1] + 2.0).abs() < 1e-4, "{ls:?}: {:?}", out.theta_hat);
            assert!(out.value.abs() < 1e-7);
            assert!(out.converged());
        }
    }
}

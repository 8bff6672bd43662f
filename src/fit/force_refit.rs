//! Refit of the force-kernel hyperparameters inside EM.
//!
//! With the forces held at their current point estimate, each ψ_r is set
//! to the maximizer of the GP marginal likelihood
//! `log N(g_r | 0, Cg_r(ψ_r) + jitter·I)` (plus its Gamma hyperprior, when
//! the model has one). The observation likelihood does not depend on ψ, so
//! this step never lowers the EM objective.
use crate::{
    gp::kernel::ForceKernel,
    mlfm::{
        errors::MlfmResult, likelihood::force_log_density, model::MlfmModel, params::MlfmParams,
        priors::GammaPrior,
    },
    optimization::{
        errors::OptResult,
        loglik_optimizer::{
            Cost, Grad, LogLikelihood, MLEOptions, Theta, maximize, validation::validate_theta_input,
        },
    },
};
use ndarray::{Array1, ArrayView1};

/// GP marginal likelihood of one force trajectory in its log
/// hyperparameters; `Data` is the trajectory `g_r`.
#[derive(Debug)]
struct ForceMarginal<'m> {
    kernel: &'m dyn ForceKernel,
    times: ArrayView1<'m, f64>,
    jitter: f64,
    prior: Option<GammaPrior>,
    index: usize,
}

impl LogLikelihood for ForceMarginal<'_> {
    type Data = Array1<f64>;

    fn value(&self, theta: &Theta, g: &Array1<f64>) -> OptResult<Cost> {
        let dens = force_log_density(
            self.kernel,
            theta.view(),
            self.times,
            g.view(),
            self.jitter,
            self.index,
            false,
            false,
        )?;
        let prior = self.prior.map_or(0.0, |p| p.log_density(std::slice::from_ref(theta)));
        Ok(dens.value + prior)
    }

    fn check(&self, theta: &Theta, _g: &Array1<f64>) -> OptResult<()> {
        validate_theta_input(theta, self.kernel.n_params())
    }

    fn grad(&self, theta: &Theta, g: &Array1<f64>) -> OptResult<Grad> {
        let dens = force_log_density(
            self.kernel,
            theta.view(),
            self.times,
            g.view(),
            self.jitter,
            self.index,
            false,
            true,
        )?;
        let mut grad = dens.grad_log_params.unwrap_or_else(|| Array1::zeros(theta.len()));
        if let Some(prior) = self.prior {
            for pg in prior.grad_log_params(std::slice::from_ref(theta)) {
                grad += &pg;
            }
        }
        Ok(grad)
    }
}

/// New force log hyperparameters, one L-BFGS run per force.
///
/// Errors
/// ------
/// - `MlfmError::OptimizationFailed` if a run fails, including a starting
///   ψ_r whose covariance is not positive definite.
pub(crate) fn refit_force_kernels(
    model: &MlfmModel, params: &MlfmParams, opts: &MLEOptions,
) -> MlfmResult<Vec<Array1<f64>>> {
    model
        .force_kernels()
        .iter()
        .enumerate()
        .map(|(r, kernel)| -> MlfmResult<Array1<f64>> {
            let problem = ForceMarginal {
                kernel: kernel.as_ref(),
                times: model.times(),
                jitter: model.jitter(),
                prior: model.hyper_priors().force,
                index: r,
            };
            let g = params.forces.row(r).to_owned();
            let outcome = maximize(&problem, params.force_log_params[r].clone(), &g, opts)?;
            Ok(outcome.theta_hat)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gp::kernel::RbfKernel;

    #[test]
    // Purpose
    // -------
    // The refit objective's analytic gradient agrees with finite
    // differences, and a refit never lowers the marginal likelihood.
    //
    // Given
    // -----
    // - A smooth trajectory g(t) = 2 sin(t) on 15 points in [0, 3] and a
    //   unit RBF kernel.
    //
    // Expect
    // ------
    // - Gradient within 1e-4 of centered differences; optimized value at
    //   least the starting value.
    fn force_marginal_gradient_and_improvement() {
        // Arrange
        let times = Array1::linspace(0.0, 3.0, 15);
        let g = times.mapv(|t| 2.0 * t.sin());
        let kernel = RbfKernel::default();
        let problem = ForceMarginal {
            kernel: &kernel,
            times: times.view(),
            jitter: 1e-4,
            prior: None,
            index: 0,
        };
        let theta0 = Array1::from(vec![0.0, 0.0]);
        let h = 1e-5;

        // Act
        let grad = problem.grad(&theta0, &g).expect("gradient");
        let start = problem.value(&theta0, &g).expect("value");
        let opts = MLEOptions::default().with_max_iter(50).expect("valid cap");
        let outcome = maximize(&problem, theta0.clone(), &g, &opts).expect("runs");

        // Assert
        for p in 0..2 {
            let mut up = theta0.clone();
            let mut dn = theta0.clone();
            up[p] += h;
            dn[p] -= h;
            let fd = (problem.value(&up, &g).expect("value") - problem.value(&dn, &g).expect("value"))
                / (2.0 * h);
            assert!((grad[p] - fd).abs() < 1e-4 * fd.abs().max(1.0));
        }
        assert!(outcome.value >= start - 1e-9);
    }
}

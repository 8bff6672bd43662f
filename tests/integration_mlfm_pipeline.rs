//! Integration tests for the MLFM fitting pipeline.
//!
//! Purpose
//! -------
//! - Validate the path from raw observations and structural matrices,
//!   through the likelihood engine, to fitted forces under all three
//!   methods (MAP, EM, variational).
//! - Use the rotation system `dx_0/dt = g x_1`, `dx_1/dt = −g x_0` with a
//!   constant force `g = 1`, whose exact solution is `(cos t, −sin t)`.
//!
//! Coverage
//! --------
//! - `mlfm::likelihood`: analytic gradients in every parameter group
//!   (forces, state and force hyperparameters, γ, τ, Gamma hyperpriors)
//!   against centered finite differences; γ relaxation of the per-state
//!   precision contributions.
//! - `fit`: MAP, EM and variational recovery of the force, frozen groups
//!   returned bit-identical, the EM trace guard, EM with free state
//!   hyperparameters and γ, closed-form τ and force-kernel refits.
//!
//! Exclusions
//! ----------
//! - Low-level kernel, block-covariance and optimizer plumbing; those are
//!   covered by unit tests next to the code.
use mlfm_agm::{
    fit::{EmOptions, FitMethod, FitStatus, MapOptions, VariationalOptions, fit, fit_em, fit_variational},
    mlfm::{
        FitTargets, GammaPrior, HyperPriors, LikelihoodEngine, MlfmModel, MlfmParams, Observations,
        OutputSelection, StructuralModel, Target,
    },
    optimization::loglik_optimizer::MLEOptions,
};
use ndarray::{Array1, Array2, array};

/// Rotation model on `n` points of `[0, t_max]` observed without noise.
fn rotation_model(n: usize, t_max: f64, gamma: f64, tau: f64, jitter: f64) -> MlfmModel {
    let times = Array1::linspace(0.0, t_max, n);
    let values = Array2::from_shape_fn((n, 2), |(t, k)| {
        if k == 0 { times[t].cos() } else { -times[t].sin() }
    });
    let obs = Observations::new(times, values).expect("valid observations");
    let structure = StructuralModel::new(vec![Array2::zeros((2, 2)), array![[0.0, 1.0], [-1.0, 0.0]]])
        .expect("valid structure");
    MlfmModel::new(obs, structure)
        .and_then(|m| m.with_jitter(jitter))
        .and_then(|m| m.with_gamma(Array1::from_elem(2, gamma)))
        .and_then(|m| m.with_tau(Array1::from_elem(2, tau)))
        .expect("valid model")
}

fn mean_force(forces: &Array2<f64>) -> f64 {
    forces.mean().unwrap_or(f64::NAN)
}

fn max_abs_deviation(a: &Array2<f64>, b: ndarray::ArrayView2<f64>) -> f64 {
    (a - &b).mapv(f64::abs).fold(0.0_f64, |m, &v| m.max(v))
}

/// Centered difference of `f` along one coordinate of `params`.
fn central_difference(
    f: &dyn Fn(&MlfmParams) -> f64, params: &MlfmParams, h: f64,
    perturb: &dyn Fn(&mut MlfmParams, f64),
) -> f64 {
    let mut up = params.clone();
    let mut dn = params.clone();
    perturb(&mut up, h);
    perturb(&mut dn, -h);
    (f(&up) - f(&dn)) / (2.0 * h)
}

fn assert_close(analytic: f64, fd: f64, what: &str) {
    let tol = 1e-4 * fd.abs().max(1.0);
    assert!((analytic - fd).abs() < tol, "{what}: analytic {analytic} vs fd {fd}");
}

#[test]
// Purpose
// -------
// Every analytic gradient of the log posterior matches centered finite
// differences.
//
// Given
// -----
// - K = 2, R = 1, N = 20 rotation model with jitter 1e-3, γ = 0.1,
//   τ = 10, Gamma hyperpriors on both kernel families, a non-constant
//   force and perturbed hyperparameters.
//
// Expect
// ------
// - Every force, log θ, log γ, log ψ and log τ component within
//   1e-4 · max(1, |fd|).
fn analytic_gradients_match_finite_differences() {
    // Arrange
    let priors = HyperPriors::new(
        Some(GammaPrior::new(2.0, 1.0).expect("valid prior")),
        Some(GammaPrior::new(1.5, 0.5).expect("valid prior")),
    );
    let model = rotation_model(20, 5.0, 0.1, 10.0, 1e-3).with_hyper_priors(priors);
    let engine = LikelihoodEngine::new(&model);
    let mut params = model.initial_params();
    let times = model.times().to_owned();
    params.forces = Array2::from_shape_fn((1, 20), |(_, t)| 0.9 + 0.2 * (0.7 * times[t]).sin());
    params.state_log_params = vec![array![0.1, -0.05], array![-0.2, 0.1]];
    params.force_log_params = vec![array![0.3, 0.2]];
    params.gamma = array![0.1, 0.15];
    params.tau = array![10.0, 8.0];
    let value = |p: &MlfmParams| {
        engine
            .evaluate(p, &OutputSelection::value_only())
            .expect("evaluates")
            .log_posterior()
            .expect("value")
    };
    let h = 1e-4;

    // Act
    let out = engine.evaluate(&params, &OutputSelection::all()).expect("evaluates");

    // Assert
    let grad_g = out.grad_g.expect("force gradient");
    for t in 0..20 {
        let fd = central_difference(&value, &params, h, &|p, d| p.forces[[0, t]] += d);
        assert_close(grad_g[[0, t]], fd, &format!("g[{t}]"));
    }
    let grad_theta = out.grad_theta.expect("state hyperparameter gradient");
    for k in 0..2 {
        for j in 0..2 {
            let fd = central_difference(&value, &params, h, &|p, d| p.state_log_params[k][j] += d);
            assert_close(grad_theta[k][j], fd, &format!("theta[{k}][{j}]"));
        }
    }
    let grad_psi = out.grad_psi.expect("force hyperparameter gradient");
    for j in 0..2 {
        let fd = central_difference(&value, &params, h, &|p, d| p.force_log_params[0][j] += d);
        assert_close(grad_psi[0][j], fd, &format!("psi[{j}]"));
    }
    let grad_gamma = out.grad_gamma.expect("gamma gradient");
    let grad_tau = out.grad_tau.expect("tau gradient");
    for k in 0..2 {
        let fd = central_difference(&value, &params, h, &|p, d| p.gamma[k] *= d.exp());
        assert_close(grad_gamma[k], fd, &format!("gamma[{k}]"));
        let fd = central_difference(&value, &params, h, &|p, d| p.tau[k] *= d.exp());
        assert_close(grad_tau[k], fd, &format!("tau[{k}]"));
    }
}

#[test]
// Purpose
// -------
// MAP over the forces alone recovers the constant rotation rate.
//
// Given
// -----
// - Noise-free rotation data on 20 points of [0, 5], unit RBF kernels,
//   γ = 1e-2, τ = 1e3, jitter 1e-4; only the forces are free.
//
// Expect
// ------
// - Mean of ĝ within 0.05 of 1, the objective improved over the start,
//   and a state posterior mean within 1e-2 of the true trajectory.
fn map_recovers_rotation_force() {
    // Arrange
    let model = rotation_model(20, 5.0, 1e-2, 1e3, 1e-4);
    let method = FitMethod::Map(MapOptions::new(FitTargets::forces_only(&model), MLEOptions::default()));

    // Act
    let result = fit(&model, &method).expect("MAP fit runs");

    // Assert
    let g_bar = mean_force(result.forces());
    assert!((g_bar - 1.0).abs() < 0.05, "mean of g = {g_bar}");
    assert!(result.objective.is_finite());
    assert!(result.objective >= result.trace[0]);
    let max_dev = max_abs_deviation(&result.state_mean, model.observations().values());
    assert!(max_dev < 1e-2, "state mean deviates by {max_dev}");
    assert!(result.state_covariance.is_some());
}

#[test]
// Purpose
// -------
// Fixed parameter groups are returned exactly as supplied.
//
// Given
// -----
// - τ fixed at values that do not survive a log/exp round trip, γ and
//   the state hyperparameters fixed, forces free, 10 L-BFGS iterations.
//
// Expect
// ------
// - τ, γ and θ in the result are bit-identical to the fixed values.
// - The free forces moved away from their zero start.
fn frozen_groups_come_back_bit_identical() {
    // Arrange
    let model = rotation_model(15, 4.0, 0.1, 10.0, 1e-3);
    let tau = array![1.0 / 3.0, 0.1 + 0.2];
    let gamma = array![0.07, 1.0 / 7.0];
    let theta = vec![array![0.1, 0.3], array![-0.2, 1.0 / 3.0]];
    let targets = FitTargets {
        tau: Target::Fixed(tau.clone()),
        gamma: Target::Fixed(gamma.clone()),
        state_log_params: Target::Fixed(theta.clone()),
        ..FitTargets::default()
    };
    let mle = MLEOptions::default().with_max_iter(10).expect("valid cap");

    // Act
    let result = fit(&model, &FitMethod::Map(MapOptions::new(targets, mle))).expect("MAP fit runs");

    // Assert
    assert_eq!(result.params.tau, tau);
    assert_eq!(result.params.gamma, gamma);
    assert_eq!(result.params.state_log_params, theta);
    assert!(result.params.forces.iter().all(|g| g.is_finite()));
    let moved = result.params.forces.iter().fold(0.0_f64, |m, g| m.max(g.abs()));
    assert!(moved > 0.1, "forces barely moved: max |g| = {moved}");
}

#[test]
// Purpose
// -------
// Larger slack variances relax the gradient-matching constraint.
//
// Given
// -----
// - The rotation model at γ ∈ {0.01, 0.1, 1} with g = 1.
//
// Expect
// ------
// - The trace of each state's precision contribution strictly decreases
//   as γ grows.
fn precision_contributions_decrease_with_gamma() {
    // Arrange
    let traces: Vec<Vec<f64>> = [0.01, 0.1, 1.0]
        .iter()
        .map(|&gamma| {
            let model = rotation_model(15, 4.0, gamma, 10.0, 1e-3);
            let mut params = model.initial_params();
            params.forces.fill(1.0);

            // Act
            LikelihoodEngine::new(&model)
                .state_precision_contributions(&params)
                .expect("contributions")
                .iter()
                .map(|c| c.diag().sum())
                .collect()
        })
        .collect();

    // Assert
    for k in 0..2 {
        assert!(traces[0][k] > traces[1][k]);
        assert!(traces[1][k] > traces[2][k]);
    }
}

#[test]
// Purpose
// -------
// The EM trace only contains accepted iterations, none of which lowers the
// joint log-likelihood by more than the allowed tolerance.
//
// Given
// -----
// - Rotation model, forces free, at most 8 EM iterations with short
//   M-steps.
//
// Expect
// ------
// - One trace entry per accepted iteration, consecutive entries
//   non-decreasing within `decrease_allowance`, finite forces.
// - A mean force that has moved from zero toward 1.
fn em_trace_is_non_decreasing_within_tolerance() {
    // Arrange
    let model = rotation_model(15, 4.0, 1e-2, 1e2, 1e-4);
    let opts = EmOptions {
        targets: FitTargets::forces_only(&model),
        max_iter: 8,
        m_step: MLEOptions::default().with_max_iter(50).expect("valid cap"),
        ..EmOptions::default()
    };

    // Act
    let result = fit_em(&model, &opts).expect("EM fit runs");

    // Assert
    assert_eq!(result.trace.len(), result.iterations);
    assert!(result.iterations >= 1);
    for w in result.trace.windows(2) {
        assert!(w[1] >= w[0] - opts.decrease_allowance(w[0]), "trace step {} -> {}", w[0], w[1]);
    }
    if let FitStatus::Aborted { .. } = result.status {
        assert!(result.iterations < opts.max_iter);
    }
    assert!(result.params.forces.iter().all(|g| g.is_finite()));
    assert_eq!(result.objective, result.trace[result.trace.len() - 1]);
    let g_bar = mean_force(result.forces());
    assert!(g_bar > 0.25, "EM left the forces near zero: mean g = {g_bar}");
}

#[test]
// Purpose
// -------
// EM over the forces recovers the constant rotation rate and never stops
// on its first iteration.
//
// Given
// -----
// - Noise-free rotation data on 20 points of [0, 5], γ = 1e-2, τ = 1e3,
//   jitter 1e-4; only the forces are free; at most 30 iterations.
//
// Expect
// ------
// - At least two accepted iterations and a mean of ĝ within 0.05 of 1.
fn em_recovers_rotation_force() {
    // Arrange
    let model = rotation_model(20, 5.0, 1e-2, 1e3, 1e-4);
    let opts = EmOptions { targets: FitTargets::forces_only(&model), max_iter: 30, ..EmOptions::default() };

    // Act
    let result = fit_em(&model, &opts).expect("EM fit runs");

    // Assert
    assert!(result.iterations >= 2, "stopped after {} iteration(s)", result.iterations);
    let g_bar = mean_force(result.forces());
    assert!((g_bar - 1.0).abs() < 0.05, "mean of g = {g_bar}, status {}", result.status);
}

#[test]
// Purpose
// -------
// EM with the default targets (forces, θ, γ and τ free) makes progress:
// long line-search steps into extreme hyperparameters are backtracked
// instead of leaving the M-step where it started.
//
// Given
// -----
// - The 20-point rotation model with γ = 1e-2, τ = 1e3; default
//   `FitTargets`; at most 30 iterations.
//
// Expect
// ------
// - `Converged` only after at least two iterations.
// - Forces that left zero and free hyperparameters that left their start.
// - Finite parameters and trace.
fn em_with_default_targets_moves_every_free_group() {
    // Arrange
    let model = rotation_model(20, 5.0, 1e-2, 1e3, 1e-4);
    let start = model.initial_params();
    let opts = EmOptions { targets: FitTargets::default(), max_iter: 30, ..EmOptions::default() };

    // Act
    let result = fit_em(&model, &opts).expect("EM fit runs");

    // Assert
    if result.status.is_converged() {
        assert!(result.iterations >= 2, "converged after {} iteration(s)", result.iterations);
    }
    let moved = result.params.forces.iter().fold(0.0_f64, |m, g| m.max(g.abs()));
    assert!(moved > 1e-6, "forces never left zero, status {}", result.status);
    assert!(
        result.params.state_log_params != start.state_log_params
            || result.params.gamma != start.gamma,
        "θ and γ never left their start"
    );
    assert!(result.params.forces.iter().all(|g| g.is_finite()));
    assert!(result.params.gamma.iter().all(|g| g.is_finite() && *g > 0.0));
    assert!(result.params.tau.iter().all(|t| t.is_finite() && *t > 0.0));
    assert!(result.params.state_log_params.iter().flatten().all(|p| p.is_finite()));
    assert!(result.trace.iter().all(|v| v.is_finite()));
}

#[test]
// Purpose
// -------
// EM with `refit_force_kernels` updates the free force hyperparameters.
//
// Given
// -----
// - The 15-point rotation model; forces and ψ free, everything else
//   fixed; at most 10 iterations with force-kernel refits.
//
// Expect
// ------
// - Finite ψ that differ from the starting values, moved forces and
//   untouched state hyperparameters.
fn em_refits_free_force_kernels() {
    // Arrange
    let model = rotation_model(15, 4.0, 1e-2, 1e2, 1e-4);
    let start = model.initial_params();
    let targets = FitTargets { force_log_params: Target::Free, ..FitTargets::forces_only(&model) };
    let opts = EmOptions {
        targets,
        max_iter: 10,
        refit_force_kernels: true,
        m_step: MLEOptions::default().with_max_iter(50).expect("valid cap"),
        ..EmOptions::default()
    };

    // Act
    let result = fit_em(&model, &opts).expect("EM fit runs");

    // Assert
    let psi = &result.params.force_log_params;
    assert!(psi.iter().flatten().all(|p| p.is_finite()));
    assert_ne!(*psi, start.force_log_params);
    let moved = result.params.forces.iter().fold(0.0_f64, |m, g| m.max(g.abs()));
    assert!(moved > 0.1, "forces barely moved: max |g| = {moved}");
    assert_eq!(result.params.state_log_params, start.state_log_params);
}

#[test]
// Purpose
// -------
// EM with free data precisions updates τ in closed form.
//
// Given
// -----
// - Rotation model with τ and the forces free, at most 5 iterations.
//
// Expect
// ------
// - Positive finite τ that differ from the starting values; γ and the
//   kernel hyperparameters untouched.
fn em_updates_free_tau_in_closed_form() {
    // Arrange
    let model = rotation_model(15, 4.0, 1e-2, 1e2, 1e-4);
    let start = model.initial_params();
    let targets = FitTargets { tau: Target::Free, ..FitTargets::forces_only(&model) };
    let opts = EmOptions {
        targets,
        max_iter: 5,
        m_step: MLEOptions::default().with_max_iter(30).expect("valid cap"),
        ..EmOptions::default()
    };

    // Act
    let result = fit_em(&model, &opts).expect("EM fit runs");

    // Assert
    assert!(result.params.tau.iter().all(|t| t.is_finite() && *t > 0.0));
    assert_ne!(result.params.tau, start.tau);
    assert_eq!(result.params.gamma, start.gamma);
    assert_eq!(result.params.force_log_params, start.force_log_params);
}

#[test]
// Purpose
// -------
// The variational method recovers the rotation rate and returns a proper
// q(g).
//
// Given
// -----
// - The 20-point rotation model with γ = 1e-2, τ = 1e3, default options.
//
// Expect
// ------
// - One trace entry per sweep, a force covariance with one block of size
//   N and positive variances, and a mean of the q(g) mean within 0.05
//   of 1.
fn variational_fit_recovers_rotation_force() {
    // Arrange
    let model = rotation_model(20, 5.0, 1e-2, 1e3, 1e-4);
    let opts = VariationalOptions::default();

    // Act
    let result = fit_variational(&model, &opts).expect("variational fit runs");

    // Assert
    assert_eq!(result.trace.len(), result.iterations);
    assert!(result.trace.iter().all(|v| v.is_finite()));
    let cov = result.force_covariance.as_ref().expect("q(g) covariance");
    assert_eq!((cov.block_count(), cov.block_size()), (1, 20));
    let diag = cov.diagonal_block(0).expect("block");
    assert!(diag.diag().iter().all(|v| *v > 0.0));
    let g_bar = mean_force(result.forces());
    assert!((g_bar - 1.0).abs() < 0.05, "mean of g = {g_bar}");
    assert!(matches!(result.status, FitStatus::Converged | FitStatus::MaxIterationsReached));
}

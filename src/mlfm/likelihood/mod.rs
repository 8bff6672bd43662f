//! mlfm::likelihood — marginal likelihood, priors and analytic gradients.
//!
//! Purpose
//! -------
//! Evaluate the objectives of all three fitting methods for one
//! [`MlfmModel`] and return exactly the outputs the caller asked for:
//!
//! - the marginal log-likelihood of the observations
//!   `y ~ N(0, Λ⁻¹ + diag(1/τ))` (stacked state-major),
//! - the GP log prior of the forces and optional Gamma hyperpriors,
//! - the expected complete-data log-likelihood used by the EM M-step,
//! - Gaussian conditionals of the states given the forces (or given a
//!   Gaussian `q(g)`) and of the forces given state moments.
//!
//! Key behaviors
//! -------------
//! - One Cholesky of `Λ` and one of `K = Λ⁻¹ + D` per evaluation;
//!   gradients use `α = K⁻¹y`, `W = ½(ααᵀ − K⁻¹)`, `V = Λ⁻¹ W Λ⁻¹` and
//!   `dℓ/dp = −tr(V dΛ/dp) + tr(W dD/dp)`.
//! - Every gradient is with respect to the forces directly and to the
//!   *logarithm* of every positive parameter.
//! - Gradients in [`LikelihoodOutputs`] are gradients of the sum of all
//!   returned values (likelihood + force prior + hyperprior).
//!
//! Invariants & assumptions
//! ------------------------
//! - Parameters are validated against the model on entry.
//! - A non positive definite matrix anywhere in the evaluation yields
//!   `MlfmError::LinearAlgebra`; optimizers treat it as a penalty.
//!
//! Conventions
//! -----------
//! - Stacked vectors use `x[k·N + n] = X[n, k]`.
//! - Heavy algebra runs on `nalgebra::DMatrix`; all public values are
//!   `ndarray` arrays.
//!
//! Downstream usage
//! ----------------
//! - `fit::map` maximizes [`LikelihoodOutputs::log_posterior`] from
//!   [`LikelihoodEngine::evaluate`].
//! - `fit::em` uses [`LikelihoodEngine::expected_complete`] and
//!   [`LikelihoodEngine::state_posterior`].
//! - `fit::variational` alternates [`LikelihoodEngine::force_posterior`]
//!   and [`LikelihoodEngine::state_posterior`] with a force covariance.
//!
//! Testing notes
//! -------------
//! - Unit tests compare `evaluate` against a dense multivariate normal
//!   density, check the shared trace gradient by finite differences, and
//!   verify the γ relaxation of the per-state precision contributions.
//! - The integration suite compares all analytic gradients with centered
//!   finite differences on a K = 2, R = 1, N = 20 problem.

mod force_prior;
mod moments;
mod precision;

pub(crate) use self::force_prior::force_log_density;
pub use self::moments::{ForcePosterior, StatePosterior};

use crate::{
    gp::{
        block_covariance::BlockCovariance,
        covariance_handler::LatentStateCovarianceHandler,
        linalg::{CholeskyFactor, frobenius_dot, symmetrize, to_array1, to_array2, to_dmatrix, to_dvector},
    },
    mlfm::{
        errors::MlfmResult,
        model::MlfmModel,
        params::{FreeGroups, MlfmParams},
    },
};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2};
use std::f64::consts::PI;

use self::{
    force_prior::force_prior,
    precision::{TraceRequest, TrajectoryPrecision, trace_gradient},
};

/// Named selection of the outputs an evaluation should produce.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OutputSelection {
    pub log_likelihood: bool,
    pub grad_g: bool,
    pub grad_theta: bool,
    pub grad_gamma: bool,
    pub grad_psi: bool,
    pub grad_tau: bool,
}

impl OutputSelection {
    pub fn value_only() -> Self {
        Self { log_likelihood: true, ..Self::default() }
    }

    pub fn all() -> Self {
        Self {
            log_likelihood: true,
            grad_g: true,
            grad_theta: true,
            grad_gamma: true,
            grad_psi: true,
            grad_tau: true,
        }
    }

    /// Gradients for exactly the free groups of an optimizer layout.
    pub fn for_groups(groups: FreeGroups, log_likelihood: bool) -> Self {
        Self {
            log_likelihood,
            grad_g: groups.forces,
            grad_theta: groups.state_log_params,
            grad_gamma: groups.gamma,
            grad_psi: groups.force_log_params,
            grad_tau: groups.tau,
        }
    }

    fn needs_trace(&self) -> bool {
        self.grad_g || self.grad_theta || self.grad_gamma
    }
}

/// Outputs of one evaluation; a field is `Some` iff it was selected.
///
/// - `log_likelihood`: marginal log-likelihood (or, from
///   [`LikelihoodEngine::expected_complete`], the expected complete-data
///   log-likelihood).
/// - `log_force_prior`: `Σ_r log N(g_r | 0, Cg_r)`.
/// - `log_hyper_prior`: Gamma hyperpriors (0 when the model has none).
/// - `grad_*`: gradients of the sum of the three values, with respect to
///   the forces (`R×N`), `log θ`, `log γ`, `log ψ` and `log τ`.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LikelihoodOutputs {
    pub log_likelihood: Option<f64>,
    pub log_force_prior: Option<f64>,
    pub log_hyper_prior: Option<f64>,
    pub grad_g: Option<Array2<f64>>,
    pub grad_theta: Option<Vec<Array1<f64>>>,
    pub grad_gamma: Option<Array1<f64>>,
    pub grad_psi: Option<Vec<Array1<f64>>>,
    pub grad_tau: Option<Array1<f64>>,
}

impl LikelihoodOutputs {
    /// Likelihood plus priors, when the value was selected.
    pub fn log_posterior(&self) -> Option<f64> {
        self.log_likelihood.map(|ll| {
            ll + self.log_force_prior.unwrap_or(0.0) + self.log_hyper_prior.unwrap_or(0.0)
        })
    }
}

/// Evaluates MLFM objectives for one model. Cheap to construct.
#[derive(Debug, Clone, Copy)]
pub struct LikelihoodEngine<'m> {
    model: &'m MlfmModel,
}

impl<'m> LikelihoodEngine<'m> {
    pub fn new(model: &'m MlfmModel) -> Self {
        Self { model }
    }

    pub fn model(&self) -> &'m MlfmModel {
        self.model
    }

    /// Marginal log-likelihood, force prior and hyperprior with the selected
    /// gradients.
    ///
    /// Errors
    /// ------
    /// - Validation errors for `params`.
    /// - `MlfmError::LinearAlgebra` when `Cxx_k`, `S_k`, `Λ`, `K` or `Cg_r`
    ///   is not positive definite.
    pub fn evaluate(
        &self, params: &MlfmParams, sel: &OutputSelection,
    ) -> MlfmResult<LikelihoodOutputs> {
        self.model.validate_params(params)?;
        let dims = self.model.dims();
        let (n, k_states) = (dims.n_times, dims.n_states);
        let nk = dims.stacked_len();
        let mut out = LikelihoodOutputs::default();

        let prec = TrajectoryPrecision::build(self.model, params, sel.grad_theta)?;
        let lam_chol = CholeskyFactor::new(prec.lambda.clone(), "Lambda", 0)?;
        let lam_inv = lam_chol.inverse();
        let mut kmat = lam_inv.clone();
        for k in 0..k_states {
            for t in 0..n {
                kmat[(k * n + t, k * n + t)] += 1.0 / params.tau[k];
            }
        }
        let k_chol = CholeskyFactor::new(kmat, "marginal covariance", 0)?;
        let y = to_dvector(self.model.observations().stacked().view());
        let alpha = k_chol.solve_vec(&y);
        if sel.log_likelihood {
            let ll = -0.5 * y.dot(&alpha)
                - 0.5 * k_chol.log_det()
                - 0.5 * nk as f64 * (2.0 * PI).ln();
            out.log_likelihood = Some(ll);
        }

        if sel.needs_trace() || sel.grad_tau {
            let mut w = &alpha * alpha.transpose() - k_chol.inverse();
            w *= 0.5;
            if sel.needs_trace() {
                let mut v = &lam_inv * &w * &lam_inv;
                symmetrize(&mut v);
                let req = TraceRequest {
                    forces: sel.grad_g,
                    state_log_params: sel.grad_theta,
                    log_gamma: sel.grad_gamma,
                };
                let tg = trace_gradient(&prec, self.model.structure(), &params.gamma, &v, req);
                out.grad_g = tg.forces.map(|g| -g);
                out.grad_theta = tg.state_log_params.map(negate_all);
                out.grad_gamma = tg.log_gamma.map(|g| -g);
            }
            if sel.grad_tau {
                let grad = Array1::from_shape_fn(k_states, |k| {
                    let tr: f64 = (0..n).map(|t| w[(k * n + t, k * n + t)]).sum();
                    -tr / params.tau[k]
                });
                out.grad_tau = Some(grad);
            }
        }

        self.add_priors(params, sel, &mut out)?;
        Ok(out)
    }

    /// Marginal log-likelihood of the observations only.
    ///
    /// Errors
    /// ------
    /// - As [`evaluate`](Self::evaluate).
    pub fn log_likelihood(&self, params: &MlfmParams) -> MlfmResult<f64> {
        let out = self.evaluate(params, &OutputSelection::value_only())?;
        Ok(out.log_likelihood.unwrap_or(f64::NAN))
    }

    /// Marginal log-likelihood plus the force prior; the quantity EM tracks
    /// for monotonicity.
    ///
    /// Errors
    /// ------
    /// - As [`evaluate`](Self::evaluate).
    pub fn joint_log_likelihood(&self, params: &MlfmParams) -> MlfmResult<f64> {
        let out = self.evaluate(params, &OutputSelection::value_only())?;
        Ok(out.log_likelihood.unwrap_or(f64::NAN) + out.log_force_prior.unwrap_or(0.0))
    }

    /// Expected complete-data log-likelihood under state moments `moments`:
    ///
    /// ```text
    /// Q = −½ tr(E[xxᵀ] Λ) − ½ Σ_k log|S_k| − ½ Σ_k log|Cxx_k|
    ///     + Σ_k [N/2 log τ_k − N/2 log 2π − τ_k/2 (‖y_k − E x_k‖² + tr Cov_kk)]
    /// ```
    ///
    /// reported in `log_likelihood`, with the force prior and hyperpriors
    /// added as in [`evaluate`](Self::evaluate).
    ///
    /// Errors
    /// ------
    /// - As [`evaluate`](Self::evaluate).
    pub fn expected_complete(
        &self, params: &MlfmParams, moments: &StatePosterior, sel: &OutputSelection,
    ) -> MlfmResult<LikelihoodOutputs> {
        self.model.validate_params(params)?;
        let dims = self.model.dims();
        let (n, k_states) = (dims.n_times, dims.n_states);
        let mut out = LikelihoodOutputs::default();

        let prec = TrajectoryPrecision::build(self.model, params, sel.grad_theta)?;
        let m2 = moments.second_moment();
        let states = prec.handler.states();

        // Squared residual plus posterior variance, per state.
        let values = self.model.observations().values();
        let resid: Vec<f64> = (0..k_states)
            .map(|k| {
                let cov_kk = moments.covariance.diagonal_block(k).map(|b| b.diag().sum());
                let sq: f64 =
                    (0..n).map(|t| (values[[t, k]] - moments.mean[[t, k]]).powi(2)).sum();
                cov_kk.map(|c| sq + c)
            })
            .collect::<MlfmResult<_>>()?;

        if sel.log_likelihood {
            let mut q = -0.5 * frobenius_dot(&m2, &prec.lambda);
            for (k, st) in states.iter().enumerate() {
                let tau = params.tau[k];
                q -= 0.5 * st.s_log_det() + 0.5 * st.cxx_log_det();
                q += 0.5 * n as f64 * (tau.ln() - (2.0 * PI).ln()) - 0.5 * tau * resid[k];
            }
            out.log_likelihood = Some(q);
        }

        if sel.needs_trace() {
            let req = TraceRequest {
                forces: sel.grad_g,
                state_log_params: sel.grad_theta,
                log_gamma: sel.grad_gamma,
            };
            let tg = trace_gradient(&prec, self.model.structure(), &params.gamma, &m2, req);
            out.grad_g = tg.forces.map(|g| g * -0.5);
            out.grad_theta = tg.state_log_params.map(|per_state| {
                per_state
                    .into_iter()
                    .zip(states.iter())
                    .map(|(tr_grad, st)| {
                        Array1::from_shape_fn(tr_grad.len(), |p| {
                            let hg = &st.gradients[p];
                            -0.5 * tr_grad[p]
                                - 0.5 * frobenius_dot(&st.s_inv, &hg.d_s)
                                - 0.5 * frobenius_dot(&st.cxx_inv, &hg.d_cxx)
                        })
                    })
                    .collect()
            });
            out.grad_gamma = tg.log_gamma.map(|tr_grad| {
                Array1::from_shape_fn(k_states, |k| {
                    -0.5 * tr_grad[k] - 0.5 * params.gamma[k] * states[k].s_inv.trace()
                })
            });
        }
        if sel.grad_tau {
            out.grad_tau = Some(Array1::from_shape_fn(k_states, |k| {
                0.5 * n as f64 - 0.5 * params.tau[k] * resid[k]
            }));
        }

        self.add_priors(params, sel, &mut out)?;
        Ok(out)
    }

    /// `B_kᵀ S_k⁻¹ B_k` (`NK×NK`) for every state; how strongly state `k`'s
    /// gradient-matching term constrains the trajectory.
    ///
    /// Errors
    /// ------
    /// - As [`evaluate`](Self::evaluate).
    pub fn state_precision_contributions(&self, params: &MlfmParams) -> MlfmResult<Vec<Array2<f64>>> {
        self.model.validate_params(params)?;
        let prec = TrajectoryPrecision::build(self.model, params, false)?;
        Ok(prec.contributions().iter().map(to_array2).collect())
    }

    /// Gaussian posterior of the states given the observations and either
    /// the point forces in `params` (`force_cov = None`) or a Gaussian
    /// `q(g)` with mean `params.forces` and covariance `force_cov`.
    ///
    /// Precision `P = E[Σ_k B_kᵀ S_k⁻¹ B_k] + blockdiag(Cxx_k⁻¹) + diag(τ)`,
    /// mean `P⁻¹ diag(τ) y`, covariance `P⁻¹`.
    ///
    /// Errors
    /// ------
    /// - As [`evaluate`](Self::evaluate), plus block-covariance shape errors
    ///   if `force_cov` is not `R` blocks of size `N`.
    pub fn state_posterior(
        &self, params: &MlfmParams, force_cov: Option<&BlockCovariance>,
    ) -> MlfmResult<StatePosterior> {
        self.model.validate_params(params)?;
        let dims = self.model.dims();
        let (n, k_states) = (dims.n_times, dims.n_states);
        let structure = self.model.structure();
        let prec = TrajectoryPrecision::build(self.model, params, false)?;
        let mut p = prec.lambda.clone();

        if let Some(cov) = force_cov {
            for (k, st) in prec.handler.states().iter().enumerate() {
                for i in 0..k_states {
                    let wi = structure.force_weights(k, i);
                    if wi.iter().all(|&w| w == 0.0) {
                        continue;
                    }
                    for j in 0..k_states {
                        let wj = structure.force_weights(k, j);
                        if wj.iter().all(|&w| w == 0.0) {
                            continue;
                        }
                        let e = to_dmatrix(cov.weighted_block_sum(wi.view(), wj.view())?.view());
                        let mut blk = p.view_mut((i * n, j * n), (n, n));
                        blk += st.s_inv.component_mul(&e);
                    }
                }
            }
            symmetrize(&mut p);
        }

        let y = self.model.observations().stacked();
        let mut rhs = DVector::zeros(dims.stacked_len());
        for k in 0..k_states {
            for t in 0..n {
                let idx = k * n + t;
                p[(idx, idx)] += params.tau[k];
                rhs[idx] = params.tau[k] * y[idx];
            }
        }
        let chol = CholeskyFactor::new(p, "state posterior precision", 0)?;
        let mean = to_array1(&chol.solve_vec(&rhs));
        let cov = to_array2(&chol.inverse());
        StatePosterior::from_stacked(&mean, &cov, n, k_states)
    }

    /// Gaussian `q(g)` given state moments, with the kernel hyperparameters,
    /// γ and the force kernels of `params`.
    ///
    /// Precision `blockdiag(Cg_r⁻¹) + Σ_k S_k⁻¹ ∘ E[h_kr h_ksᵀ]` and linear
    /// term `−Σ_k rowsum(S_k⁻¹ ∘ E[h_kr c_kᵀ])`, where
    /// `h_kr = Σ_i A_r[k,i] x_i` and `c_k = Σ_i A_0[k,i] x_i − Mdx_k x_k`.
    ///
    /// Errors
    /// ------
    /// - As [`evaluate`](Self::evaluate).
    pub fn force_posterior(
        &self, params: &MlfmParams, moments: &StatePosterior,
    ) -> MlfmResult<ForcePosterior> {
        self.model.validate_params(params)?;
        let dims = self.model.dims();
        let (n, k_states, r_forces) = (dims.n_times, dims.n_states, dims.n_forces);
        let structure = self.model.structure();
        let handler = LatentStateCovarianceHandler::new(
            self.model.state_kernels(),
            &params.state_log_params,
            params.gamma.view(),
            self.model.times(),
            self.model.jitter(),
            false,
        )?;
        let m2 = moments.second_moment();
        let rn = r_forces * n;
        let mut prec = DMatrix::zeros(rn, rn);
        let mut lin = DVector::zeros(rn);

        let times = self.model.times();
        for (r, kernel) in self.model.force_kernels().iter().enumerate() {
            let mut c = to_dmatrix(
                kernel.cov_xx(params.force_log_params[r].view(), times, times).view(),
            );
            for t in 0..n {
                c[(t, t)] += self.model.jitter();
            }
            let cinv = CholeskyFactor::new(c, "Cg", r)?.inverse();
            let mut blk = prec.view_mut((r * n, r * n), (n, n));
            blk += &cinv;
        }

        for (k, st) in handler.states().iter().enumerate() {
            let lm: Vec<DMatrix<f64>> = (0..r_forces)
                .map(|r| selector(n, k_states, |i| structure.coefficient(r + 1, k, i)) * &m2)
                .collect();
            let mut c_k = selector(n, k_states, |i| structure.coefficient(0, k, i));
            let mut own = c_k.view_mut((0, k * n), (n, n));
            own -= &st.mdx;
            for r in 0..r_forces {
                for s in 0..r_forces {
                    let l_s = selector(n, k_states, |i| structure.coefficient(s + 1, k, i));
                    let e = &lm[r] * l_s.transpose();
                    let mut blk = prec.view_mut((r * n, s * n), (n, n));
                    blk += st.s_inv.component_mul(&e);
                }
                let f = &lm[r] * c_k.transpose();
                let row_sums = st.s_inv.component_mul(&f).column_sum();
                let mut seg = lin.rows_mut(r * n, n);
                seg -= &row_sums;
            }
        }
        symmetrize(&mut prec);

        let chol = CholeskyFactor::new(prec, "force posterior precision", 0)?;
        let mean_flat = chol.solve_vec(&lin);
        let cov = to_array2(&chol.inverse());
        let mean = Array2::from_shape_fn((r_forces, n), |(r, t)| mean_flat[r * n + t]);
        let covariance = BlockCovariance::from_dense_symmetrized(cov.view(), r_forces, n)?;
        Ok(ForcePosterior { mean, covariance })
    }

    fn add_priors(
        &self, params: &MlfmParams, sel: &OutputSelection, out: &mut LikelihoodOutputs,
    ) -> MlfmResult<()> {
        if sel.log_likelihood || sel.grad_g || sel.grad_psi {
            let fp = force_prior(self.model, params, sel.grad_g, sel.grad_psi)?;
            if sel.log_likelihood {
                out.log_force_prior = Some(fp.value);
            }
            if let (Some(g), Some(gp)) = (out.grad_g.as_mut(), fp.grad_forces.as_ref()) {
                *g += gp;
            }
            if sel.grad_psi {
                out.grad_psi = fp.grad_log_params;
            }
        }

        let hp = self.model.hyper_priors();
        if sel.log_likelihood {
            let state = hp.state.map_or(0.0, |p| p.log_density(&params.state_log_params));
            let force = hp.force.map_or(0.0, |p| p.log_density(&params.force_log_params));
            out.log_hyper_prior = Some(state + force);
        }
        if let (Some(prior), Some(grads)) = (hp.state, out.grad_theta.as_mut()) {
            for (g, pg) in grads.iter_mut().zip(prior.grad_log_params(&params.state_log_params)) {
                *g += &pg;
            }
        }
        if let (Some(prior), Some(grads)) = (hp.force, out.grad_psi.as_mut()) {
            for (g, pg) in grads.iter_mut().zip(prior.grad_log_params(&params.force_log_params)) {
                *g += &pg;
            }
        }
        Ok(())
    }
}

fn negate_all(v: Vec<Array1<f64>>) -> Vec<Array1<f64>> {
    v.into_iter().map(|a| -a).collect()
}

/// `N×NK` matrix whose block `i` is `weight(i) · I`.
fn selector(n: usize, k_states: usize, weight: impl Fn(usize) -> f64) -> DMatrix<f64> {
    let mut m = DMatrix::zeros(n, n * k_states);
    for i in 0..k_states {
        let w = weight(i);
        if w != 0.0 {
            for t in 0..n {
                m[(t, i * n + t)] = w;
            }
        }
    }
    m
}

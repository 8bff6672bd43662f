//! Trajectory precision `Λ` and the shared trace-gradient kernel.
//!
//! For each state `k` the gradient-matching residual is `B_k x` with
//!
//! ```text
//! B_k = [diag(u_k1) − δ_k1 Mdx_k, …, diag(u_kK) − δ_kK Mdx_k]   (N × NK)
//! u_ki = A_0[k,i] 1 + Σ_r A_r[k,i] g_r
//! ```
//!
//! and the implied precision of the stacked trajectory `x` is
//! `Λ = Σ_k B_kᵀ S_k⁻¹ B_k + blockdiag(Cxx_k⁻¹)`.
//!
//! [`trace_gradient`] differentiates `tr(W Λ)` for any symmetric `W`; the
//! marginal likelihood uses it with `W = Λ⁻¹ (½(ααᵀ − K⁻¹)) Λ⁻¹`, the EM
//! M-step with `W = E[xxᵀ]`.
use crate::{
    gp::{covariance_handler::LatentStateCovarianceHandler, linalg::symmetrize},
    mlfm::{errors::MlfmResult, model::MlfmModel, params::MlfmParams, structure::StructuralModel},
};
use nalgebra::{DMatrix, DVector};
use ndarray::{Array1, Array2, ArrayView2};

/// `Λ` together with the per-state pieces it was assembled from.
#[derive(Debug, Clone)]
pub(crate) struct TrajectoryPrecision {
    pub handler: LatentStateCovarianceHandler,
    pub b: Vec<DMatrix<f64>>,
    pub sinv_b: Vec<DMatrix<f64>>,
    pub lambda: DMatrix<f64>,
}

impl TrajectoryPrecision {
    /// Assemble `Λ` at `params`.
    ///
    /// Errors
    /// ------
    /// - `MlfmError::LinearAlgebra` from the covariance handler.
    pub fn build(model: &MlfmModel, params: &MlfmParams, with_gradients: bool) -> MlfmResult<Self> {
        let dims = model.dims();
        let (n, k_states) = (dims.n_times, dims.n_states);
        let handler = LatentStateCovarianceHandler::new(
            model.state_kernels(),
            &params.state_log_params,
            params.gamma.view(),
            model.times(),
            model.jitter(),
            with_gradients,
        )?;
        let nk = dims.stacked_len();
        let mut lambda = DMatrix::zeros(nk, nk);
        let mut b = Vec::with_capacity(k_states);
        let mut sinv_b = Vec::with_capacity(k_states);
        for (k, st) in handler.states().iter().enumerate() {
            let bk = residual_operator(model.structure(), params.forces.view(), &st.mdx, k);
            let sbk = st.s_chol.solve(&bk);
            lambda += bk.transpose() * &sbk;
            let mut diag = lambda.view_mut((k * n, k * n), (n, n));
            diag += &st.cxx_inv;
            b.push(bk);
            sinv_b.push(sbk);
        }
        symmetrize(&mut lambda);
        Ok(Self { handler, b, sinv_b, lambda })
    }

    /// `B_kᵀ S_k⁻¹ B_k` for every state.
    pub fn contributions(&self) -> Vec<DMatrix<f64>> {
        self.b
            .iter()
            .zip(self.sinv_b.iter())
            .map(|(bk, sbk)| {
                let mut c = bk.transpose() * sbk;
                symmetrize(&mut c);
                c
            })
            .collect()
    }
}

/// `u_ki = A_0[k,i] 1 + Σ_r A_r[k,i] g_r` for `i = 0..K`.
pub(crate) fn coupling_vectors(
    structure: &StructuralModel, forces: ArrayView2<f64>, k: usize,
) -> Vec<DVector<f64>> {
    let (r_forces, n) = forces.dim();
    (0..structure.n_states())
        .map(|i| {
            let base = structure.coefficient(0, k, i);
            DVector::from_fn(n, |t, _| {
                base + (0..r_forces)
                    .map(|r| structure.coefficient(r + 1, k, i) * forces[[r, t]])
                    .sum::<f64>()
            })
        })
        .collect()
}

/// `B_k` at the given forces.
pub(crate) fn residual_operator(
    structure: &StructuralModel, forces: ArrayView2<f64>, mdx: &DMatrix<f64>, k: usize,
) -> DMatrix<f64> {
    let n = forces.ncols();
    let u = coupling_vectors(structure, forces, k);
    let mut bk = DMatrix::zeros(n, n * u.len());
    for (i, ui) in u.iter().enumerate() {
        for t in 0..n {
            bk[(t, i * n + t)] = ui[t];
        }
    }
    let mut own = bk.view_mut((0, k * n), (n, n));
    own -= mdx;
    bk
}

/// Which pieces of a trace gradient to compute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub(crate) struct TraceRequest {
    pub forces: bool,
    pub state_log_params: bool,
    pub log_gamma: bool,
}

/// Gradient of `tr(W Λ)`.
#[derive(Debug, Clone, Default)]
pub(crate) struct TraceGradient {
    pub forces: Option<Array2<f64>>,
    pub state_log_params: Option<Vec<Array1<f64>>>,
    pub log_gamma: Option<Array1<f64>>,
}

/// Differentiate `tr(W Λ)` with respect to the forces, the state log
/// hyperparameters and `log γ`, for symmetric `weight = W`.
///
/// With `Y_k = S_k⁻¹ B_k W` and `Z_k = Y_k B_kᵀ S_k⁻¹`:
/// - `∂/∂g_r[n] = 2 Σ_k Σ_i A_r[k,i] Y_k[n, iN + n]`,
/// - `∂/∂log θ_kp = −2 ⟨Y_k[:, kk], dMdx⟩ − ⟨Z_k, dS⟩ − ⟨Cxx⁻¹ W_kk Cxx⁻¹, dCxx⟩`,
/// - `∂/∂log γ_k = −γ_k tr(Z_k)`.
///
/// State hyperparameter gradients require a precision built with
/// gradients.
pub(crate) fn trace_gradient(
    prec: &TrajectoryPrecision, structure: &StructuralModel, gamma: &Array1<f64>,
    weight: &DMatrix<f64>, req: TraceRequest,
) -> TraceGradient {
    let k_states = prec.b.len();
    let n = prec.lambda.nrows() / k_states.max(1);
    let r_forces = structure.n_forces();
    let mut g_forces = Array2::<f64>::zeros((r_forces, n));
    let mut g_state = Vec::with_capacity(k_states);
    let mut g_gamma = Array1::<f64>::zeros(k_states);

    for k in 0..k_states {
        let y = &prec.sinv_b[k] * weight;
        if req.forces {
            for r in 0..r_forces {
                for i in 0..k_states {
                    let a = structure.coefficient(r + 1, k, i);
                    if a == 0.0 {
                        continue;
                    }
                    for t in 0..n {
                        g_forces[[r, t]] += 2.0 * a * y[(t, i * n + t)];
                    }
                }
            }
        }
        if req.state_log_params || req.log_gamma {
            let z = &y * prec.sinv_b[k].transpose();
            if req.log_gamma {
                g_gamma[k] = -gamma[k] * z.trace();
            }
            if req.state_log_params {
                let st = prec.handler.state(k);
                let y_kk = y.columns(k * n, n);
                let w_kk = weight.view((k * n, k * n), (n, n));
                let cw = &st.cxx_inv * w_kk * &st.cxx_inv;
                let grads: Vec<f64> = st
                    .gradients
                    .iter()
                    .map(|hg| {
                        -2.0 * y_kk.component_mul(&hg.d_mdx).sum()
                            - z.component_mul(&hg.d_s).sum()
                            - cw.component_mul(&hg.d_cxx).sum()
                    })
                    .collect();
                g_state.push(Array1::from(grads));
            }
        }
    }

    TraceGradient {
        forces: req.forces.then_some(g_forces),
        state_log_params: req.state_log_params.then_some(g_state),
        log_gamma: req.log_gamma.then_some(g_gamma),
    }
}

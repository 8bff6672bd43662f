//! gp::covariance_handler — per-state covariance terms of the gradient
//! matching model.
//!
//! Purpose
//! -------
//! For every latent state `k` turn the state kernel evaluated on the time
//! grid into the quantities the likelihood needs:
//!
//! - `Cxx` (with jitter) and its Cholesky factor `Lxx`,
//! - `Mdx = Cxdxᵀ Cxx⁻¹`, the GP conditional mean map from states to
//!   derivatives,
//! - `S_k = Cdxdx − Cxdxᵀ Cxx⁻¹ Cxdx + γ_k I` and its Cholesky factor,
//!
//! and, on request, the derivatives of `Cxx`, `Mdx` and `S_k` with respect
//! to each log hyperparameter of the kernel.
//!
//! Key behaviors
//! -------------
//! - `Mdx` is formed by Cholesky solves, never by an explicit inverse;
//!   `Cxdxᵀ Cxx⁻¹ Cxdx` is formed as `AᵀA` with `A = Lxx⁻¹ Cxdx`.
//! - `dMdx = (dCxdxᵀ − Mdx dCxx) Cxx⁻¹` and
//!   `dS = dCdxdx − dMdx Cxdx − Mdx dCxdx`.
//! - A matrix that is not positive definite is reported as
//!   [`MlfmError::LinearAlgebra`] naming the matrix and the state index.
//!
//! Invariants & assumptions
//! ------------------------
//! - The time grid is strictly increasing and `log_params` has the kernel's
//!   parameter count; both are validated when the model is built.
//! - `S_k` and every `dS` are symmetrized after assembly.
//!
//! Downstream usage
//! ----------------
//! - `mlfm::likelihood` builds a [`LatentStateCovarianceHandler`] for every
//!   evaluation and reads the crate-visible `nalgebra` fields directly.
//!
//! [`MlfmError::LinearAlgebra`]: crate::mlfm::errors::MlfmError::LinearAlgebra
use crate::{
    gp::{
        kernel::StateKernel,
        linalg::{CholeskyFactor, symmetrize, to_array2, to_dmatrix},
    },
    mlfm::errors::{MlfmError, MlfmResult},
};
use nalgebra::DMatrix;
use ndarray::{Array1, Array2, ArrayView1};

/// Derivatives of one state's covariance terms with respect to one log
/// hyperparameter.
#[derive(Debug, Clone)]
pub struct HyperGradient {
    pub(crate) d_cxx: DMatrix<f64>,
    pub(crate) d_mdx: DMatrix<f64>,
    pub(crate) d_s: DMatrix<f64>,
}

impl HyperGradient {
    pub fn d_cxx(&self) -> Array2<f64> {
        to_array2(&self.d_cxx)
    }

    pub fn d_mdx(&self) -> Array2<f64> {
        to_array2(&self.d_mdx)
    }

    pub fn d_s(&self) -> Array2<f64> {
        to_array2(&self.d_s)
    }
}

/// Covariance terms of one latent state.
#[derive(Debug, Clone)]
pub struct StateCovariance {
    pub(crate) cxx_chol: CholeskyFactor,
    pub(crate) cxx_inv: DMatrix<f64>,
    pub(crate) mdx: DMatrix<f64>,
    pub(crate) s: DMatrix<f64>,
    pub(crate) s_chol: CholeskyFactor,
    pub(crate) s_inv: DMatrix<f64>,
    pub(crate) gradients: Vec<HyperGradient>,
}

impl StateCovariance {
    /// Build the covariance terms of state `index`.
    ///
    /// Parameters
    /// ----------
    /// - `kernel`, `log_params`: the state kernel and its log hyperparameters.
    /// - `gamma`: slack variance γ_k added to the diagonal of `S_k`.
    /// - `times`: the shared time grid.
    /// - `jitter`: nugget added to the diagonal of `Cxx`.
    /// - `with_gradients`: also compute one [`HyperGradient`] per
    ///   hyperparameter.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::LinearAlgebra`] with context `"Cxx"` or `"S_k"` when
    ///   the respective matrix is not positive definite.
    pub fn new(
        kernel: &dyn StateKernel, log_params: ArrayView1<f64>, gamma: f64, times: ArrayView1<f64>,
        jitter: f64, index: usize, with_gradients: bool,
    ) -> MlfmResult<Self> {
        let n = times.len();
        let mut cxx = to_dmatrix(kernel.cov_xx(log_params, times, times).view());
        for i in 0..n {
            cxx[(i, i)] += jitter;
        }
        let cxx_chol = CholeskyFactor::new(cxx, "Cxx", index)?;
        let cxdx = to_dmatrix(kernel.cov_x_dx(log_params, times, times).view());
        let cdxdx = to_dmatrix(kernel.cov_dx_dx(log_params, times, times).view());

        let a = cxx_chol.solve_lower(&cxdx, "Cxx", index)?;
        let mdx = cxx_chol.solve(&cxdx).transpose();
        let mut s = cdxdx - a.transpose() * &a;
        for i in 0..n {
            s[(i, i)] += gamma;
        }
        symmetrize(&mut s);
        let s_chol = CholeskyFactor::new(s.clone(), "S_k", index)?;
        let s_inv = s_chol.inverse();
        let cxx_inv = cxx_chol.inverse();

        let gradients = if with_gradients {
            let d_cxx = kernel.grad_cov_xx(log_params, times, times);
            let d_cxdx = kernel.grad_cov_x_dx(log_params, times, times);
            let d_cdxdx = kernel.grad_cov_dx_dx(log_params, times, times);
            d_cxx
                .iter()
                .zip(d_cxdx.iter())
                .zip(d_cdxdx.iter())
                .map(|((dxx, dxdx), ddxdx)| {
                    let d_cxx = to_dmatrix(dxx.view());
                    let d_cxdx = to_dmatrix(dxdx.view());
                    let rhs = d_cxdx.transpose() - &mdx * &d_cxx;
                    let d_mdx = cxx_chol.solve(&rhs.transpose()).transpose();
                    let mut d_s = to_dmatrix(ddxdx.view()) - &d_mdx * &cxdx - &mdx * &d_cxdx;
                    symmetrize(&mut d_s);
                    HyperGradient { d_cxx, d_mdx, d_s }
                })
                .collect()
        } else {
            Vec::new()
        };

        Ok(Self { cxx_chol, cxx_inv, mdx, s, s_chol, s_inv, gradients })
    }

    /// `Mdx = Cxdxᵀ Cxx⁻¹`.
    pub fn mdx(&self) -> Array2<f64> {
        to_array2(&self.mdx)
    }

    /// `S_k`, including the slack variance.
    pub fn s(&self) -> Array2<f64> {
        to_array2(&self.s)
    }

    /// Lower Cholesky factor of `Cxx` (jitter included).
    pub fn lxx(&self) -> Array2<f64> {
        to_array2(self.cxx_chol.l())
    }

    pub fn cxx_log_det(&self) -> f64 {
        self.cxx_chol.log_det()
    }

    pub fn s_log_det(&self) -> f64 {
        self.s_chol.log_det()
    }

    /// Empty unless built with `with_gradients`.
    pub fn gradients(&self) -> &[HyperGradient] {
        &self.gradients
    }
}

/// Covariance terms for all `K` latent states.
#[derive(Debug, Clone)]
pub struct LatentStateCovarianceHandler {
    states: Vec<StateCovariance>,
}

impl LatentStateCovarianceHandler {
    /// Build [`StateCovariance`] for every state.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::ParamShape`] if `kernels`, `log_theta` and `gamma`
    ///   disagree on `K`.
    /// - [`MlfmError::LinearAlgebra`] from the first state that fails.
    pub fn new(
        kernels: &[Box<dyn StateKernel>], log_theta: &[Array1<f64>], gamma: ArrayView1<f64>,
        times: ArrayView1<f64>, jitter: f64, with_gradients: bool,
    ) -> MlfmResult<Self> {
        let k = kernels.len();
        for (name, found) in [("state hyperparameters", log_theta.len()), ("gamma", gamma.len())] {
            if found != k {
                return Err(MlfmError::ParamShape { name, expected: k, found });
            }
        }
        let states = kernels
            .iter()
            .zip(log_theta.iter())
            .enumerate()
            .map(|(idx, (kernel, lp))| {
                StateCovariance::new(
                    kernel.as_ref(),
                    lp.view(),
                    gamma[idx],
                    times,
                    jitter,
                    idx,
                    with_gradients,
                )
            })
            .collect::<MlfmResult<Vec<_>>>()?;
        Ok(Self { states })
    }

    pub fn n_states(&self) -> usize {
        self.states.len()
    }

    pub fn states(&self) -> &[StateCovariance] {
        &self.states
    }

    /// Terms of state `k`.
    ///
    /// # Panics
    /// Panics if `k >= n_states()`.
    pub fn state(&self, k: usize) -> &StateCovariance {
        &self.states[k]
    }
}

//! Gaussian-process prior of the latent forces.
//!
//! `log p(g | ψ) = Σ_r log N(g_r | 0, Cg_r(ψ_r) + jitter·I)`, with
//! gradients `−Cg_r⁻¹ g_r` in the forces and
//! `½ tr((a aᵀ − Cg_r⁻¹) dCg_r)`, `a = Cg_r⁻¹ g_r`, in each log
//! hyperparameter.
use crate::{
    gp::{
        kernel::ForceKernel,
        linalg::{CholeskyFactor, to_array1, to_dmatrix, to_dvector},
    },
    mlfm::{errors::MlfmResult, model::MlfmModel, params::MlfmParams},
};
use ndarray::{Array1, Array2, ArrayView1};
use std::f64::consts::PI;

/// Log density of one force trajectory and, on request, its gradients.
#[derive(Debug, Clone)]
pub(crate) struct ForceDensity {
    pub value: f64,
    pub grad_force: Option<Array1<f64>>,
    pub grad_log_params: Option<Array1<f64>>,
}

/// `log N(g | 0, C(ψ) + jitter·I)` for a single force.
///
/// Errors
/// ------
/// - `MlfmError::LinearAlgebra` (context `"Cg"`, `index`) if the
///   covariance is not positive definite.
pub(crate) fn force_log_density(
    kernel: &dyn ForceKernel, log_params: ArrayView1<f64>, times: ArrayView1<f64>,
    g: ArrayView1<f64>, jitter: f64, index: usize, want_force: bool, want_params: bool,
) -> MlfmResult<ForceDensity> {
    let n = times.len();
    let mut c = to_dmatrix(kernel.cov_xx(log_params, times, times).view());
    for i in 0..n {
        c[(i, i)] += jitter;
    }
    let chol = CholeskyFactor::new(c, "Cg", index)?;
    let gv = to_dvector(g);
    let a = chol.solve_vec(&gv);
    let value = -0.5 * gv.dot(&a) - 0.5 * chol.log_det() - 0.5 * n as f64 * (2.0 * PI).ln();

    let grad_force = want_force.then(|| -to_array1(&a));
    let grad_log_params = want_params.then(|| {
        let mut inner = &a * a.transpose() - chol.inverse();
        inner *= 0.5;
        kernel
            .grad_cov_xx(log_params, times, times)
            .iter()
            .map(|dc| inner.component_mul(&to_dmatrix(dc.view())).sum())
            .collect::<Array1<f64>>()
    });
    Ok(ForceDensity { value, grad_force, grad_log_params })
}

/// Prior of all forces with gradients.
#[derive(Debug, Clone)]
pub(crate) struct ForcePrior {
    pub value: f64,
    pub grad_forces: Option<Array2<f64>>,
    pub grad_log_params: Option<Vec<Array1<f64>>>,
}

pub(crate) fn force_prior(
    model: &MlfmModel, params: &MlfmParams, want_forces: bool, want_params: bool,
) -> MlfmResult<ForcePrior> {
    let dims = model.dims();
    let mut value = 0.0;
    let mut grad_forces = Array2::<f64>::zeros((dims.n_forces, dims.n_times));
    let mut grad_params = Vec::with_capacity(dims.n_forces);
    for (r, kernel) in model.force_kernels().iter().enumerate() {
        let dens = force_log_density(
            kernel.as_ref(),
            params.force_log_params[r].view(),
            model.times(),
            params.forces.row(r),
            model.jitter(),
            r,
            want_forces,
            want_params,
        )?;
        value += dens.value;
        if let Some(gf) = dens.grad_force {
            grad_forces.row_mut(r).assign(&gf);
        }
        if let Some(gp) = dens.grad_log_params {
            grad_params.push(gp);
        }
    }
    Ok(ForcePrior {
        value,
        grad_forces: want_forces.then_some(grad_forces),
        grad_log_params: want_params.then_some(grad_params),
    })
}

//! gp::kernel — Gaussian-process kernel capabilities and the squared
//! exponential kernel.
//!
//! Purpose
//! -------
//! Describe what the MLFM engine needs from a kernel without tying it to a
//! particular family. A [`ForceKernel`] evaluates covariance matrices of a
//! latent force over two time grids; a [`StateKernel`] additionally
//! evaluates the cross-covariances involving the time derivative of the
//! process, which gradient matching needs.
//!
//! Key behaviors
//! -------------
//! - Kernels are stateless families: hyperparameters are passed in on every
//!   call as a vector of **natural logarithms**, so fits can carry them in
//!   their own parameter copies while the model stays immutable.
//! - Every `grad_*` method returns one matrix per hyperparameter, the
//!   derivative with respect to the *log* hyperparameter.
//! - `RbfKernel` clamps log hyperparameters to `±LOG_PARAM_BOUND`; past the
//!   clamp the kernel is flat in that parameter and its gradient is zero.
//!
//! Invariants & assumptions
//! ------------------------
//! - `log_params.len() == n_params()`; callers validate this once when the
//!   model or the parameter set is built.
//! - For `cov_x_dx(t, s)` entry `(i, j)` is `cov(x(t_i), x'(s_j))`; for
//!   `cov_dx_dx(t, s)` it is `cov(x'(t_i), x'(s_j))`.
//!
//! Testing notes
//! -------------
//! - Unit tests check the RBF derivative covariances and all log-parameter
//!   gradients against centered finite differences.
use crate::{
    mlfm::errors::{MlfmError, MlfmResult},
    optimization::numerical_stability::{LOG_PARAM_BOUND, safe_exp},
};
use ndarray::{Array1, Array2, ArrayView1};
use std::fmt::Debug;

/// Covariance of a scalar Gaussian process over time.
pub trait ForceKernel: Debug {
    /// Number of hyperparameters.
    fn n_params(&self) -> usize;

    /// Starting hyperparameters (log scale) used when a model is built
    /// without explicit values.
    fn default_log_params(&self) -> Array1<f64>;

    /// `K[i, j] = k(t_i, s_j)`.
    fn cov_xx(
        &self, log_params: ArrayView1<f64>, t: ArrayView1<f64>, s: ArrayView1<f64>,
    ) -> Array2<f64>;

    /// `∂K/∂ log p` for every hyperparameter `p`.
    fn grad_cov_xx(
        &self, log_params: ArrayView1<f64>, t: ArrayView1<f64>, s: ArrayView1<f64>,
    ) -> Vec<Array2<f64>>;

    /// Natural-scale hyperparameter names, used in error messages.
    fn param_names(&self) -> Vec<&'static str>;
}

/// A [`ForceKernel`] whose sample paths are differentiable, with the
/// derivative cross-covariances used by gradient matching.
pub trait StateKernel: ForceKernel {
    /// `cov(x(t_i), x'(s_j))`.
    fn cov_x_dx(
        &self, log_params: ArrayView1<f64>, t: ArrayView1<f64>, s: ArrayView1<f64>,
    ) -> Array2<f64>;

    /// `cov(x'(t_i), x'(s_j))`.
    fn cov_dx_dx(
        &self, log_params: ArrayView1<f64>, t: ArrayView1<f64>, s: ArrayView1<f64>,
    ) -> Array2<f64>;

    fn grad_cov_x_dx(
        &self, log_params: ArrayView1<f64>, t: ArrayView1<f64>, s: ArrayView1<f64>,
    ) -> Vec<Array2<f64>>;

    fn grad_cov_dx_dx(
        &self, log_params: ArrayView1<f64>, t: ArrayView1<f64>, s: ArrayView1<f64>,
    ) -> Vec<Array2<f64>>;
}

/// Squared exponential kernel `k(s, t) = σ² exp(-(s - t)² / (2ℓ²))`.
///
/// Hyperparameters (log scale): `[ln σ², ln ℓ]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RbfKernel {
    variance: f64,
    length_scale: f64,
}

impl RbfKernel {
    /// Kernel with default hyperparameters `σ²` and `ℓ` (natural scale).
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::InvalidKernelParam`] if either value is non-finite or
    ///   ≤ 0.
    pub fn new(variance: f64, length_scale: f64) -> MlfmResult<Self> {
        if !variance.is_finite() || variance <= 0.0 {
            return Err(MlfmError::InvalidKernelParam { name: "variance", value: variance });
        }
        if !length_scale.is_finite() || length_scale <= 0.0 {
            return Err(MlfmError::InvalidKernelParam {
                name: "length_scale",
                value: length_scale,
            });
        }
        Ok(Self { variance, length_scale })
    }

    /// Natural-scale `(σ², ℓ)`, clamped to `[e^-30, e^30]` so that extreme
    /// line-search steps cannot produce `0 · ∞` in the derivative terms.
    fn unpack(log_params: ArrayView1<f64>) -> (f64, f64) {
        (safe_exp(log_params[0]), safe_exp(log_params[1]))
    }

    /// Zero the gradient of every hyperparameter held at the clamp, where
    /// the kernel no longer depends on it.
    fn mask_clamped(log_params: ArrayView1<f64>, mut grads: Vec<Array2<f64>>) -> Vec<Array2<f64>> {
        for (grad, &lp) in grads.iter_mut().zip(log_params.iter()) {
            if lp.abs() > LOG_PARAM_BOUND {
                grad.fill(0.0);
            }
        }
        grads
    }
}

impl Default for RbfKernel {
    fn default() -> Self {
        Self { variance: 1.0, length_scale: 1.0 }
    }
}

/// Evaluate `f(d, e)` over the grid with `d = t_i - s_j` and
/// `e = exp(-d² / (2ℓ²))`.
fn fill(
    t: ArrayView1<f64>, s: ArrayView1<f64>, ell: f64, f: impl Fn(f64, f64) -> f64,
) -> Array2<f64> {
    let inv_two_ell2 = 0.5 / (ell * ell);
    Array2::from_shape_fn((t.len(), s.len()), |(i, j)| {
        let d = t[i] - s[j];
        f(d, (-d * d * inv_two_ell2).exp())
    })
}

impl ForceKernel for RbfKernel {
    fn n_params(&self) -> usize {
        2
    }

    fn default_log_params(&self) -> Array1<f64> {
        Array1::from(vec![self.variance.ln(), self.length_scale.ln()])
    }

    fn cov_xx(
        &self, log_params: ArrayView1<f64>, t: ArrayView1<f64>, s: ArrayView1<f64>,
    ) -> Array2<f64> {
        let (var, ell) = Self::unpack(log_params);
        fill(t, s, ell, |_, e| var * e)
    }

    fn grad_cov_xx(
        &self, log_params: ArrayView1<f64>, t: ArrayView1<f64>, s: ArrayView1<f64>,
    ) -> Vec<Array2<f64>> {
        let (var, ell) = Self::unpack(log_params);
        let ell2 = ell * ell;
        let d_var = fill(t, s, ell, |_, e| var * e);
        let d_ell = fill(t, s, ell, |d, e| var * e * d * d / ell2);
        Self::mask_clamped(log_params, vec![d_var, d_ell])
    }

    fn param_names(&self) -> Vec<&'static str> {
        vec!["variance", "length_scale"]
    }
}

impl StateKernel for RbfKernel {
    fn cov_x_dx(
        &self, log_params: ArrayView1<f64>, t: ArrayView1<f64>, s: ArrayView1<f64>,
    ) -> Array2<f64> {
        let (var, ell) = Self::unpack(log_params);
        let ell2 = ell * ell;
        fill(t, s, ell, |d, e| var * e * d / ell2)
    }

    fn cov_dx_dx(
        &self, log_params: ArrayView1<f64>, t: ArrayView1<f64>, s: ArrayView1<f64>,
    ) -> Array2<f64> {
        let (var, ell) = Self::unpack(log_params);
        let ell2 = ell * ell;
        fill(t, s, ell, |d, e| var * e / ell2 * (1.0 - d * d / ell2))
    }

    fn grad_cov_x_dx(
        &self, log_params: ArrayView1<f64>, t: ArrayView1<f64>, s: ArrayView1<f64>,
    ) -> Vec<Array2<f64>> {
        let (var, ell) = Self::unpack(log_params);
        let ell2 = ell * ell;
        let d_var = fill(t, s, ell, |d, e| var * e * d / ell2);
        let d_ell = fill(t, s, ell, |d, e| var * e * d / ell2 * (d * d / ell2 - 2.0));
        Self::mask_clamped(log_params, vec![d_var, d_ell])
    }

    fn grad_cov_dx_dx(
        &self, log_params: ArrayView1<f64>, t: ArrayView1<f64>, s: ArrayView1<f64>,
    ) -> Vec<Array2<f64>> {
        let (var, ell) = Self::unpack(log_params);
        let ell2 = ell * ell;
        let d_var = fill(t, s, ell, |d, e| var * e / ell2 * (1.0 - d * d / ell2));
        let d_ell = fill(t, s, ell, |d, e| {
            let u = d * d / ell2;
            var * e / ell2 * (-u * u + 5.0 * u - 2.0)
        });
        Self::mask_clamped(log_params, vec![d_var, d_ell])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn fd_check(
        analytic: &[Array2<f64>], eval: impl Fn(ArrayView1<f64>) -> Array2<f64>,
        log_params: &Array1<f64>,
    ) {
        let h = 1e-6;
        for (p, grad) in analytic.iter().enumerate() {
            let mut up = log_params.clone();
            let mut down = log_params.clone();
            up[p] += h;
            down[p] -= h;
            let fd = (eval(up.view()) - eval(down.view())) / (2.0 * h);
            let err = (&fd - grad).iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            assert!(err < 1e-6, "param {p}: max abs error {err}");
        }
    }

    #[test]
    // Purpose
    // -------
    // Derivative covariances are the mixed partials of the base kernel.
    //
    // Given
    // -----
    // - σ² = 1.5, ℓ = 0.7 and a few time points.
    //
    // Expect
    // ------
    // - `cov_x_dx` matches ∂k/∂s and `cov_dx_dx` matches ∂²k/∂t∂s by
    //   centered differences in time.
    fn rbf_derivative_covariances_match_time_differences() {
        // Arrange
        let kernel = RbfKernel::new(1.5, 0.7).expect("valid kernel");
        let lp = kernel.default_log_params();
        let t = array![0.0, 0.3, 1.1];
        let s = array![0.2, 0.9];
        let h = 1e-5;

        // Act
        let kxdx = kernel.cov_x_dx(lp.view(), t.view(), s.view());
        let kdxdx = kernel.cov_dx_dx(lp.view(), t.view(), s.view());
        let s_up = &s + h;
        let s_down = &s - h;
        let fd_xdx = (kernel.cov_xx(lp.view(), t.view(), s_up.view())
            - kernel.cov_xx(lp.view(), t.view(), s_down.view()))
            / (2.0 * h);
        let t_up = &t + h;
        let t_down = &t - h;
        let fd_dxdx = (kernel.cov_x_dx(lp.view(), t_up.view(), s.view())
            - kernel.cov_x_dx(lp.view(), t_down.view(), s.view()))
            / (2.0 * h);

        // Assert
        assert!((&kxdx - &fd_xdx).iter().all(|v| v.abs() < 1e-7));
        assert!((&kdxdx - &fd_dxdx).iter().all(|v| v.abs() < 1e-7));
    }

    #[test]
    // Purpose
    // -------
    // Log-parameter gradients of all three covariances agree with centered
    // finite differences.
    //
    // Given
    // -----
    // - log params (ln 0.8, ln 1.3) on a small symmetric grid.
    //
    // Expect
    // ------
    // - Max absolute error below 1e-6 for every matrix and parameter.
    fn rbf_log_parameter_gradients_match_finite_differences() {
        // Arrange
        let kernel = RbfKernel::default();
        let lp = array![0.8_f64.ln(), 1.3_f64.ln()];
        let t = array![0.0, 0.4, 1.0, 2.5];

        // Act / Assert
        fd_check(
            &kernel.grad_cov_xx(lp.view(), t.view(), t.view()),
            |p| kernel.cov_xx(p, t.view(), t.view()),
            &lp,
        );
        fd_check(
            &kernel.grad_cov_x_dx(lp.view(), t.view(), t.view()),
            |p| kernel.cov_x_dx(p, t.view(), t.view()),
            &lp,
        );
        fd_check(
            &kernel.grad_cov_dx_dx(lp.view(), t.view(), t.view()),
            |p| kernel.cov_dx_dx(p, t.view(), t.view()),
            &lp,
        );
    }

    #[test]
    // Purpose
    // -------
    // Extreme log hyperparameters reached by a long line-search step still
    // give finite covariances and gradients.
    //
    // Given
    // -----
    // - log params (15.14, −241.93), i.e. a vanishing length scale, and
    //   (−500, 400) on a 20-point grid over [0, 5].
    //
    // Expect
    // ------
    // - Every entry of every covariance and gradient matrix is finite.
    // - Gradients of clamped hyperparameters (|log p| > 30) are zero.
    fn rbf_extreme_log_parameters_stay_finite() {
        // Arrange
        let kernel = RbfKernel::default();
        let t = Array1::linspace(0.0, 5.0, 20);

        for lp in [array![15.14, -241.93], array![-500.0, 400.0]] {
            // Act
            let mut mats = vec![
                kernel.cov_xx(lp.view(), t.view(), t.view()),
                kernel.cov_x_dx(lp.view(), t.view(), t.view()),
                kernel.cov_dx_dx(lp.view(), t.view(), t.view()),
            ];
            mats.extend(kernel.grad_cov_xx(lp.view(), t.view(), t.view()));
            mats.extend(kernel.grad_cov_x_dx(lp.view(), t.view(), t.view()));
            mats.extend(kernel.grad_cov_dx_dx(lp.view(), t.view(), t.view()));

            // Assert
            for (i, m) in mats.iter().enumerate() {
                assert!(m.iter().all(|v| v.is_finite()), "matrix {i} at {lp} has non-finite entries");
            }
            for (i, m) in mats[3..].iter().enumerate() {
                if lp[i % 2].abs() > LOG_PARAM_BOUND {
                    assert!(m.iter().all(|&v| v == 0.0), "gradient {i} at {lp} not masked");
                }
            }
        }
    }

    #[test]
    fn rbf_rejects_non_positive_hyperparameters() {
        assert!(RbfKernel::new(0.0, 1.0).is_err());
        assert!(RbfKernel::new(1.0, f64::NAN).is_err());
    }
}

//! Gaussian moments of the latent trajectories and forces.
use crate::{
    gp::{block_covariance::BlockCovariance, linalg::to_dmatrix},
    mlfm::errors::MlfmResult,
};
use nalgebra::DMatrix;
use ndarray::{Array1, Array2};

/// Gaussian over the stacked states: mean `N×K` and covariance with `K`
/// blocks of size `N`.
#[derive(Debug, Clone, PartialEq)]
pub struct StatePosterior {
    pub mean: Array2<f64>,
    pub covariance: BlockCovariance,
}

impl StatePosterior {
    /// Moments used to start EM and the variational iteration: mean equal
    /// to the observations, covariance `variance · I`.
    pub fn isotropic(values: Array2<f64>, variance: f64) -> Self {
        let (n, k) = values.dim();
        let covariance = BlockCovariance::scaled_identity(k, n, variance);
        Self { mean: values, covariance }
    }

    /// State-major stacking of the mean.
    pub fn stacked_mean(&self) -> Array1<f64> {
        self.mean.t().iter().copied().collect()
    }

    /// `E[x xᵀ] = Cov + E[x] E[x]ᵀ` as a dense `NK×NK` matrix.
    pub(crate) fn second_moment(&self) -> DMatrix<f64> {
        let m = self.stacked_mean();
        let mut m2 = to_dmatrix(self.covariance.to_dense().view());
        let len = m.len();
        for i in 0..len {
            for j in 0..len {
                m2[(i, j)] += m[i] * m[j];
            }
        }
        m2
    }

    /// Split a stacked mean and dense covariance into a posterior.
    pub(crate) fn from_stacked(
        mean: &Array1<f64>, covariance: &Array2<f64>, n: usize, k: usize,
    ) -> MlfmResult<Self> {
        let mean = Array2::from_shape_fn((n, k), |(t, s)| mean[s * n + t]);
        let covariance = BlockCovariance::from_dense_symmetrized(covariance.view(), k, n)?;
        Ok(Self { mean, covariance })
    }
}

/// Gaussian `q(g)` over the forces: mean `R×N` and covariance with `R`
/// blocks of size `N`.
#[derive(Debug, Clone, PartialEq)]
pub struct ForcePosterior {
    pub mean: Array2<f64>,
    pub covariance: BlockCovariance,
}

//! mlfm::model — the immutable MLFM specification handed to every fit.
//!
//! Purpose
//! -------
//! Bundle everything that defines the probabilistic model: observations on
//! a time grid, structural matrices, one kernel per state and per force,
//! starting hyperparameters, slack variances γ, data precisions τ, the
//! GP jitter and optional hyperpriors.
//!
//! Key behaviors
//! -------------
//! - [`MlfmModel::new`] cross-checks observations against the structure and
//!   installs defaults: unit RBF kernels (σ² = 1, ℓ = 1),
//!   γ = [`DEFAULT_GAMMA`], τ = [`DEFAULT_TAU`], jitter = `DEFAULT_JITTER`.
//! - `with_*` builders replace one piece at a time and re-validate it.
//! - [`MlfmModel::initial_params`] returns the starting [`MlfmParams`]
//!   (forces at zero) from which every fit starts its own copy.
//!
//! Invariants & assumptions
//! ------------------------
//! - After construction the model is never mutated; fits take `&MlfmModel`
//!   and return fresh results.
//! - `state_kernels.len() == K`, `force_kernels.len() == R`, and every
//!   stored hyperparameter vector matches its kernel's parameter count.
use crate::{
    gp::kernel::{ForceKernel, RbfKernel, StateKernel},
    mlfm::{
        data::Observations,
        errors::{MlfmError, MlfmResult},
        params::MlfmParams,
        priors::HyperPriors,
        structure::{Dimensions, StructuralModel},
    },
    optimization::numerical_stability::DEFAULT_JITTER,
};
use ndarray::{Array1, Array2, ArrayView1};

/// Default slack variance γ_k of the gradient-matching residual.
pub const DEFAULT_GAMMA: f64 = 0.1;

/// Default data precision τ_k.
pub const DEFAULT_TAU: f64 = 1.0;

#[derive(Debug)]
pub struct MlfmModel {
    observations: Observations,
    structure: StructuralModel,
    state_kernels: Vec<Box<dyn StateKernel>>,
    force_kernels: Vec<Box<dyn ForceKernel>>,
    initial: MlfmParams,
    jitter: f64,
    hyper_priors: HyperPriors,
}

impl MlfmModel {
    /// Model with default kernels and noise settings.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::ObservationShape`] if the observations do not have one
    ///   column per state of `structure`.
    pub fn new(observations: Observations, structure: StructuralModel) -> MlfmResult<Self> {
        let (n, k, r) = (observations.n_times(), structure.n_states(), structure.n_forces());
        if observations.n_states() != k {
            return Err(MlfmError::ObservationShape {
                expected_rows: n,
                expected_cols: k,
                rows: n,
                cols: observations.n_states(),
            });
        }
        let state_kernels: Vec<Box<dyn StateKernel>> =
            (0..k).map(|_| Box::new(RbfKernel::default()) as Box<dyn StateKernel>).collect();
        let force_kernels: Vec<Box<dyn ForceKernel>> =
            (0..r).map(|_| Box::new(RbfKernel::default()) as Box<dyn ForceKernel>).collect();
        let initial = MlfmParams {
            forces: Array2::zeros((r, n)),
            state_log_params: state_kernels.iter().map(|kern| kern.default_log_params()).collect(),
            force_log_params: force_kernels.iter().map(|kern| kern.default_log_params()).collect(),
            gamma: Array1::from_elem(k, DEFAULT_GAMMA),
            tau: Array1::from_elem(k, DEFAULT_TAU),
        };
        Ok(Self {
            observations,
            structure,
            state_kernels,
            force_kernels,
            initial,
            jitter: DEFAULT_JITTER,
            hyper_priors: HyperPriors::default(),
        })
    }

    /// Replace the state kernels; starting hyperparameters are reset to the
    /// kernels' defaults.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::KernelCount`] unless exactly `K` kernels are given.
    pub fn with_state_kernels(mut self, kernels: Vec<Box<dyn StateKernel>>) -> MlfmResult<Self> {
        let k = self.dims().n_states;
        if kernels.len() != k {
            return Err(MlfmError::KernelCount { what: "state", expected: k, found: kernels.len() });
        }
        self.initial.state_log_params = kernels.iter().map(|kern| kern.default_log_params()).collect();
        self.state_kernels = kernels;
        Ok(self)
    }

    /// Replace the force kernels; starting hyperparameters are reset to the
    /// kernels' defaults.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::KernelCount`] unless exactly `R` kernels are given.
    pub fn with_force_kernels(mut self, kernels: Vec<Box<dyn ForceKernel>>) -> MlfmResult<Self> {
        let r = self.dims().n_forces;
        if kernels.len() != r {
            return Err(MlfmError::KernelCount { what: "force", expected: r, found: kernels.len() });
        }
        self.initial.force_log_params = kernels.iter().map(|kern| kern.default_log_params()).collect();
        self.force_kernels = kernels;
        Ok(self)
    }

    /// Starting log hyperparameters of the state kernels.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::KernelCount`] / [`MlfmError::KernelParamCount`] /
    ///   [`MlfmError::NonFiniteParam`].
    pub fn with_state_log_params(mut self, log_params: Vec<Array1<f64>>) -> MlfmResult<Self> {
        let counts: Vec<usize> = self.state_kernels.iter().map(|k| k.n_params()).collect();
        check_log_params("state", &counts, &log_params)?;
        self.initial.state_log_params = log_params;
        Ok(self)
    }

    /// Starting log hyperparameters of the force kernels.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::KernelCount`] / [`MlfmError::KernelParamCount`] /
    ///   [`MlfmError::NonFiniteParam`].
    pub fn with_force_log_params(mut self, log_params: Vec<Array1<f64>>) -> MlfmResult<Self> {
        let counts: Vec<usize> = self.force_kernels.iter().map(|k| k.n_params()).collect();
        check_log_params("force", &counts, &log_params)?;
        self.initial.force_log_params = log_params;
        Ok(self)
    }

    /// Slack variances γ (length `K`, all > 0).
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::ParamShape`] / [`MlfmError::NonPositiveParam`].
    pub fn with_gamma(mut self, gamma: Array1<f64>) -> MlfmResult<Self> {
        check_positive("gamma", gamma.view(), self.dims().n_states)?;
        self.initial.gamma = gamma;
        Ok(self)
    }

    /// Data precisions τ (length `K`, all > 0).
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::ParamShape`] / [`MlfmError::NonPositiveParam`].
    pub fn with_tau(mut self, tau: Array1<f64>) -> MlfmResult<Self> {
        check_positive("tau", tau.view(), self.dims().n_states)?;
        self.initial.tau = tau;
        Ok(self)
    }

    /// Nugget added to the diagonal of every GP covariance.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::NonPositiveParam`] unless finite and ≥ 0.
    pub fn with_jitter(mut self, jitter: f64) -> MlfmResult<Self> {
        if !jitter.is_finite() || jitter < 0.0 {
            return Err(MlfmError::NonPositiveParam { name: "jitter", index: 0, value: jitter });
        }
        self.jitter = jitter;
        Ok(self)
    }

    pub fn with_hyper_priors(mut self, hyper_priors: HyperPriors) -> Self {
        self.hyper_priors = hyper_priors;
        self
    }

    pub fn dims(&self) -> Dimensions {
        Dimensions {
            n_times: self.observations.n_times(),
            n_states: self.structure.n_states(),
            n_forces: self.structure.n_forces(),
        }
    }

    pub fn observations(&self) -> &Observations {
        &self.observations
    }

    pub fn times(&self) -> ArrayView1<'_, f64> {
        self.observations.times()
    }

    pub fn structure(&self) -> &StructuralModel {
        &self.structure
    }

    pub fn state_kernels(&self) -> &[Box<dyn StateKernel>] {
        &self.state_kernels
    }

    pub fn force_kernels(&self) -> &[Box<dyn ForceKernel>] {
        &self.force_kernels
    }

    pub fn jitter(&self) -> f64 {
        self.jitter
    }

    pub fn hyper_priors(&self) -> &HyperPriors {
        &self.hyper_priors
    }

    /// Starting parameters: forces at zero plus the configured
    /// hyperparameters, γ and τ.
    pub fn initial_params(&self) -> MlfmParams {
        self.initial.clone()
    }

    /// Check that `params` fits this model's dimensions and domains.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::ParamShape`] for wrong force or vector sizes.
    /// - [`MlfmError::KernelParamCount`] for wrong hyperparameter counts.
    /// - [`MlfmError::NonFiniteParam`] / [`MlfmError::NonPositiveParam`].
    pub fn validate_params(&self, params: &MlfmParams) -> MlfmResult<()> {
        let dims = self.dims();
        let (rows, cols) = params.forces.dim();
        if rows != dims.n_forces || cols != dims.n_times {
            return Err(MlfmError::ParamShape {
                name: "forces",
                expected: dims.n_forces * dims.n_times,
                found: rows * cols,
            });
        }
        if let Some((index, &value)) = params.forces.iter().enumerate().find(|(_, v)| !v.is_finite())
        {
            return Err(MlfmError::NonFiniteParam { name: "forces", index, value });
        }
        let state_counts: Vec<usize> = self.state_kernels.iter().map(|k| k.n_params()).collect();
        let force_counts: Vec<usize> = self.force_kernels.iter().map(|k| k.n_params()).collect();
        check_log_params("state", &state_counts, &params.state_log_params)?;
        check_log_params("force", &force_counts, &params.force_log_params)?;
        check_positive("gamma", params.gamma.view(), dims.n_states)?;
        check_positive("tau", params.tau.view(), dims.n_states)?;
        Ok(())
    }
}

fn check_log_params(what: &'static str, counts: &[usize], log_params: &[Array1<f64>]) -> MlfmResult<()> {
    if log_params.len() != counts.len() {
        return Err(MlfmError::KernelCount { what, expected: counts.len(), found: log_params.len() });
    }
    for (index, (lp, &expected)) in log_params.iter().zip(counts.iter()).enumerate() {
        if lp.len() != expected {
            return Err(MlfmError::KernelParamCount { what, index, expected, found: lp.len() });
        }
        if let Some(&value) = lp.iter().find(|v| !v.is_finite()) {
            return Err(MlfmError::NonFiniteParam { name: what, index, value });
        }
    }
    Ok(())
}

fn check_positive(name: &'static str, values: ArrayView1<f64>, expected: usize) -> MlfmResult<()> {
    if values.len() != expected {
        return Err(MlfmError::ParamShape { name, expected, found: values.len() });
    }
    match values.iter().position(|v| !v.is_finite() || *v <= 0.0) {
        Some(index) => Err(MlfmError::NonPositiveParam { name, index, value: values[index] }),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn rotation_model() -> MlfmModel {
        let times = Array1::linspace(0.0, 1.0, 5);
        let values = Array2::from_shape_fn((5, 2), |(n, k)| (n + k) as f64);
        let obs = Observations::new(times, values).expect("valid observations");
        let structure =
            StructuralModel::new(vec![Array2::zeros((2, 2)), array![[0.0, 1.0], [-1.0, 0.0]]])
                .expect("valid structure");
        MlfmModel::new(obs, structure).expect("valid model")
    }

    #[test]
    // Purpose
    // -------
    // A fresh model carries defaults that pass its own validation.
    //
    // Given
    // -----
    // - N = 5, K = 2, R = 1 rotation model.
    //
    // Expect
    // ------
    // - Forces 1×5 zeros, unit RBF log params (0, 0), γ = 0.1, τ = 1.
    fn new_model_installs_valid_defaults() {
        // Arrange
        let model = rotation_model();

        // Act
        let p = model.initial_params();

        // Assert
        assert_eq!(model.dims(), Dimensions { n_times: 5, n_states: 2, n_forces: 1 });
        assert_eq!(p.forces, Array2::<f64>::zeros((1, 5)));
        assert_eq!(p.state_log_params[1], array![0.0, 0.0]);
        assert_eq!(p.gamma, array![DEFAULT_GAMMA, DEFAULT_GAMMA]);
        assert!(model.validate_params(&p).is_ok());
    }

    #[test]
    // Purpose
    // -------
    // Builders reject values that do not fit the model.
    //
    // Given
    // -----
    // - γ with a zero entry, τ of the wrong length, one force kernel too
    //   many, a 3-entry log-parameter vector for an RBF kernel.
    //
    // Expect
    // ------
    // - The matching configuration errors.
    fn builders_reject_inconsistent_values() {
        assert!(matches!(
            rotation_model().with_gamma(array![0.1, 0.0]),
            Err(MlfmError::NonPositiveParam { name: "gamma", index: 1, .. })
        ));
        assert!(matches!(
            rotation_model().with_tau(array![1.0]),
            Err(MlfmError::ParamShape { name: "tau", .. })
        ));
        assert!(matches!(
            rotation_model().with_force_kernels(vec![
                Box::new(RbfKernel::default()),
                Box::new(RbfKernel::default())
            ]),
            Err(MlfmError::KernelCount { what: "force", expected: 1, found: 2 })
        ));
        assert!(matches!(
            rotation_model().with_state_log_params(vec![array![0.0, 0.0], array![0.0, 0.0, 0.0]]),
            Err(MlfmError::KernelParamCount { index: 1, .. })
        ));
    }
}

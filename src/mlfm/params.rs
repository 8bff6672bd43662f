//! mlfm::params — parameter sets, fit targets and optimizer packing.
//!
//! Purpose
//! -------
//! Hold one complete parameter set of the model ([`MlfmParams`]), describe
//! which groups a fit may change ([`Target`], [`FitTargets`]) and map the
//! free groups to and from the flat vector an L-BFGS run works on
//! ([`ParamLayout`]).
//!
//! Key behaviors
//! -------------
//! - Kernel hyperparameters are stored as logarithms; γ and τ are stored on
//!   their natural scale and pass through `safe_log` / `safe_exp` only when
//!   they are free.
//! - [`ParamLayout::unpack`] clones every fixed group from the base set,
//!   so fixed values come back bit-identical.
//!
//! Conventions
//! -----------
//! - Flat layout order: forces (row-major `R×N`), force log
//!   hyperparameters, state log hyperparameters, `log γ`, `log τ`; absent
//!   groups take no space.
//! - Gradients in the flat vector are with respect to the same
//!   coordinates (forces directly, everything else on the log scale).
use crate::{
    mlfm::{
        errors::{MlfmError, MlfmResult},
        likelihood::LikelihoodOutputs,
        model::MlfmModel,
    },
    optimization::numerical_stability::{safe_exp_vec, safe_log_vec},
};
use ndarray::{Array1, Array2};

/// One complete parameter set.
///
/// - `forces`: `R×N` latent force values on the time grid.
/// - `state_log_params` / `force_log_params`: log hyperparameters, one
///   vector per state / force kernel.
/// - `gamma`, `tau`: slack variances and data precisions, length `K`.
#[derive(Debug, Clone, PartialEq)]
pub struct MlfmParams {
    pub forces: Array2<f64>,
    pub state_log_params: Vec<Array1<f64>>,
    pub force_log_params: Vec<Array1<f64>>,
    pub gamma: Array1<f64>,
    pub tau: Array1<f64>,
}

/// Whether a fit may change a parameter group.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Target<T> {
    /// Optimized, starting from the model's initial value.
    #[default]
    Free,
    /// Held at exactly this value.
    Fixed(T),
}

impl<T> Target<T> {
    pub fn is_free(&self) -> bool {
        matches!(self, Target::Free)
    }

    pub fn fixed(&self) -> Option<&T> {
        match self {
            Target::Free => None,
            Target::Fixed(v) => Some(v),
        }
    }
}

/// Per-group targets of a fit. Default: every group free.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FitTargets {
    pub forces: Target<Array2<f64>>,
    pub force_log_params: Target<Vec<Array1<f64>>>,
    pub state_log_params: Target<Vec<Array1<f64>>>,
    pub gamma: Target<Array1<f64>>,
    pub tau: Target<Array1<f64>>,
}

impl FitTargets {
    /// Only the forces are optimized; every other group is fixed at the
    /// model's configured value.
    pub fn forces_only(model: &MlfmModel) -> Self {
        let p = model.initial_params();
        Self {
            forces: Target::Free,
            force_log_params: Target::Fixed(p.force_log_params),
            state_log_params: Target::Fixed(p.state_log_params),
            gamma: Target::Fixed(p.gamma),
            tau: Target::Fixed(p.tau),
        }
    }

    /// Starting parameters of a fit: the model's initial values with every
    /// fixed group overwritten.
    ///
    /// Errors
    /// ------
    /// - Any validation error of [`MlfmModel::validate_params`] caused by a
    ///   fixed value of the wrong shape or domain.
    pub fn starting_params(&self, model: &MlfmModel) -> MlfmResult<MlfmParams> {
        let mut p = model.initial_params();
        if let Some(v) = self.forces.fixed() {
            p.forces = v.clone();
        }
        if let Some(v) = self.force_log_params.fixed() {
            p.force_log_params = v.clone();
        }
        if let Some(v) = self.state_log_params.fixed() {
            p.state_log_params = v.clone();
        }
        if let Some(v) = self.gamma.fixed() {
            p.gamma = v.clone();
        }
        if let Some(v) = self.tau.fixed() {
            p.tau = v.clone();
        }
        model.validate_params(&p)?;
        Ok(p)
    }

    pub fn free_groups(&self) -> FreeGroups {
        FreeGroups {
            forces: self.forces.is_free(),
            force_log_params: self.force_log_params.is_free(),
            state_log_params: self.state_log_params.is_free(),
            gamma: self.gamma.is_free(),
            tau: self.tau.is_free(),
        }
    }
}

/// Which groups occupy the flat optimizer vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FreeGroups {
    pub forces: bool,
    pub force_log_params: bool,
    pub state_log_params: bool,
    pub gamma: bool,
    pub tau: bool,
}

impl FreeGroups {
    pub fn any(&self) -> bool {
        self.forces || self.force_log_params || self.state_log_params || self.gamma || self.tau
    }
}

/// Flat-vector layout of the free groups for one model.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamLayout {
    groups: FreeGroups,
    n_forces: usize,
    n_times: usize,
    n_states: usize,
    force_counts: Vec<usize>,
    state_counts: Vec<usize>,
}

impl ParamLayout {
    pub fn new(model: &MlfmModel, groups: FreeGroups) -> Self {
        let dims = model.dims();
        Self {
            groups,
            n_forces: dims.n_forces,
            n_times: dims.n_times,
            n_states: dims.n_states,
            force_counts: model.force_kernels().iter().map(|k| k.n_params()).collect(),
            state_counts: model.state_kernels().iter().map(|k| k.n_params()).collect(),
        }
    }

    pub fn groups(&self) -> FreeGroups {
        self.groups
    }

    /// Length of the flat vector.
    pub fn len(&self) -> usize {
        let g = &self.groups;
        let mut len = 0;
        if g.forces {
            len += self.n_forces * self.n_times;
        }
        if g.force_log_params {
            len += self.force_counts.iter().sum::<usize>();
        }
        if g.state_log_params {
            len += self.state_counts.iter().sum::<usize>();
        }
        if g.gamma {
            len += self.n_states;
        }
        if g.tau {
            len += self.n_states;
        }
        len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Flatten the free groups of `params`.
    pub fn pack(&self, params: &MlfmParams) -> Array1<f64> {
        let g = &self.groups;
        let mut out = Vec::with_capacity(self.len());
        if g.forces {
            out.extend(params.forces.iter().copied());
        }
        if g.force_log_params {
            out.extend(params.force_log_params.iter().flat_map(|lp| lp.iter().copied()));
        }
        if g.state_log_params {
            out.extend(params.state_log_params.iter().flat_map(|lp| lp.iter().copied()));
        }
        if g.gamma {
            out.extend(safe_log_vec(params.gamma.view()).iter().copied());
        }
        if g.tau {
            out.extend(safe_log_vec(params.tau.view()).iter().copied());
        }
        Array1::from(out)
    }

    /// Rebuild a parameter set from `theta`; fixed groups are cloned from
    /// `base`.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::ParamShape`] if `theta.len() != self.len()`.
    pub fn unpack(&self, theta: &Array1<f64>, base: &MlfmParams) -> MlfmResult<MlfmParams> {
        if theta.len() != self.len() {
            return Err(MlfmError::ParamShape {
                name: "packed parameters",
                expected: self.len(),
                found: theta.len(),
            });
        }
        let g = &self.groups;
        let mut p = base.clone();
        let mut pos = 0;
        let mut take = |len: usize| {
            let slice = theta.slice(ndarray::s![pos..pos + len]).to_owned();
            pos += len;
            slice
        };
        if g.forces {
            let flat = take(self.n_forces * self.n_times);
            p.forces = Array2::from_shape_fn((self.n_forces, self.n_times), |(r, n)| {
                flat[r * self.n_times + n]
            });
        }
        if g.force_log_params {
            p.force_log_params = self.force_counts.iter().map(|&c| take(c)).collect();
        }
        if g.state_log_params {
            p.state_log_params = self.state_counts.iter().map(|&c| take(c)).collect();
        }
        if g.gamma {
            p.gamma = safe_exp_vec(take(self.n_states).view());
        }
        if g.tau {
            p.tau = safe_exp_vec(take(self.n_states).view());
        }
        Ok(p)
    }

    /// Flatten the gradient of the free groups from likelihood outputs.
    ///
    /// Errors
    /// ------
    /// - [`MlfmError::ParamShape`] (named after the group) if a free group's
    ///   gradient was not computed.
    pub fn pack_gradient(&self, outputs: &LikelihoodOutputs) -> MlfmResult<Array1<f64>> {
        let g = &self.groups;
        let missing = |name: &'static str| MlfmError::ParamShape { name, expected: 1, found: 0 };
        let mut out = Vec::with_capacity(self.len());
        if g.forces {
            let gf = outputs.grad_g.as_ref().ok_or_else(|| missing("grad_g"))?;
            out.extend(gf.iter().copied());
        }
        if g.force_log_params {
            let gp = outputs.grad_psi.as_ref().ok_or_else(|| missing("grad_psi"))?;
            out.extend(gp.iter().flat_map(|v| v.iter().copied()));
        }
        if g.state_log_params {
            let gt = outputs.grad_theta.as_ref().ok_or_else(|| missing("grad_theta"))?;
            out.extend(gt.iter().flat_map(|v| v.iter().copied()));
        }
        if g.gamma {
            let gg = outputs.grad_gamma.as_ref().ok_or_else(|| missing("grad_gamma"))?;
            out.extend(gg.iter().copied());
        }
        if g.tau {
            let gt = outputs.grad_tau.as_ref().ok_or_else(|| missing("grad_tau"))?;
            out.extend(gt.iter().copied());
        }
        Ok(Array1::from(out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mlfm::{data::Observations, structure::StructuralModel};
    use ndarray::array;

    fn model() -> MlfmModel {
        let obs = Observations::new(Array1::linspace(0.0, 1.0, 3), Array2::zeros((3, 2)))
            .expect("valid observations");
        let sm = StructuralModel::new(vec![Array2::zeros((2, 2)), array![[0.0, 1.0], [-1.0, 0.0]]])
            .expect("valid structure");
        MlfmModel::new(obs, sm).expect("valid model")
    }

    #[test]
    // Purpose
    // -------
    // Unpacking a perturbed vector changes only the free groups, and fixed
    // groups come back bit-identical.
    //
    // Given
    // -----
    // - Forces and τ free, everything else fixed at awkward values.
    //
    // Expect
    // ------
    // - Layout length R·N + K = 5; γ and hyperparameters equal the fixed
    //   values exactly; forces equal the new entries.
    fn unpack_keeps_fixed_groups_bit_identical() {
        // Arrange
        let m = model();
        let gamma = array![0.1 + 0.2, 1.0 / 3.0];
        let targets = FitTargets {
            gamma: Target::Fixed(gamma.clone()),
            state_log_params: Target::Fixed(vec![array![0.3, -0.7], array![1e-9, 2.5]]),
            force_log_params: Target::Fixed(vec![array![0.1, 0.2]]),
            ..FitTargets::default()
        };
        let base = targets.starting_params(&m).expect("valid fixed values");
        let layout = ParamLayout::new(&m, targets.free_groups());

        // Act
        let mut theta = layout.pack(&base);
        theta[1] = 0.25;
        let back = layout.unpack(&theta, &base).expect("matching length");

        // Assert
        assert_eq!(layout.len(), 5);
        assert_eq!(back.gamma, gamma);
        assert_eq!(back.state_log_params, base.state_log_params);
        assert_eq!(back.forces[[0, 1]], 0.25);
        assert!((back.tau[0] - 1.0).abs() < 1e-15);
        assert!(layout.unpack(&Array1::zeros(4), &base).is_err());
    }
}

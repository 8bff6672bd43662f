//! mlfm — model definition, parameters and the likelihood engine.
//!
//! Purpose
//! -------
//! Describe a multiplicative latent force model
//!
//! ```text
//! dx_k/dt = Σ_i (A_0[k,i] + Σ_r A_r[k,i] g_r(t)) x_i(t)
//! ```
//!
//! observed with Gaussian noise on a time grid, and evaluate the
//! adaptive-gradient-matching objectives that the `fit` layer optimizes.
//!
//! Key behaviors
//! -------------
//! - [`structure`]: [`StructuralModel`] (the `A_r` matrices) and
//!   [`Dimensions`].
//! - [`data`]: validated [`Observations`] on a strictly increasing grid.
//! - [`model`]: the immutable [`MlfmModel`] with kernels, γ, τ, jitter and
//!   hyperpriors.
//! - [`params`]: [`MlfmParams`], [`FitTargets`] and the optimizer packing
//!   [`ParamLayout`].
//! - [`priors`]: optional [`GammaPrior`] hyperpriors.
//! - [`likelihood`]: [`LikelihoodEngine`] with marginal likelihood, force
//!   prior, expected complete-data objective, analytic gradients and the
//!   Gaussian conditionals of states and forces.
//! - [`errors`]: [`MlfmError`] and [`MlfmResult`].
//!
//! Invariants & assumptions
//! ------------------------
//! - `N ≥ 2` strictly increasing finite times, `K ≥ 1` states, `R ≥ 0`
//!   forces, and every structural matrix is `K×K` and finite.
//! - Kernel hyperparameters are carried as logarithms; γ and τ as positive
//!   values.
//!
//! Conventions
//! -----------
//! - Observations and state means are `N×K` (time by state); forces are
//!   `R×N`; stacked vectors are state-major.
//! - This module performs no I/O and no logging.

pub mod data;
pub mod errors;
pub mod likelihood;
pub mod model;
pub mod params;
pub mod priors;
pub mod structure;

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::data::Observations;
pub use self::errors::{MlfmError, MlfmResult};
pub use self::likelihood::{
    ForcePosterior, LikelihoodEngine, LikelihoodOutputs, OutputSelection, StatePosterior,
};
pub use self::model::{DEFAULT_GAMMA, DEFAULT_TAU, MlfmModel};
pub use self::params::{FitTargets, FreeGroups, MlfmParams, ParamLayout, Target};
pub use self::priors::{GammaPrior, HyperPriors};
pub use self::structure::{Dimensions, StructuralModel};

pub mod prelude {
    pub use super::data::Observations;
    pub use super::errors::{MlfmError, MlfmResult};
    pub use super::likelihood::{LikelihoodEngine, OutputSelection, StatePosterior};
    pub use super::model::MlfmModel;
    pub use super::params::{FitTargets, MlfmParams, Target};
    pub use super::priors::{GammaPrior, HyperPriors};
    pub use super::structure::StructuralModel;
}

//! fit — MAP, EM and variational drivers for an [`MlfmModel`].
//!
//! Purpose
//! -------
//! Turn a configured model into an [`MlfmFit`] with one of three methods
//! selected through [`FitMethod`]:
//!
//! - [`FitMethod::Map`]: L-BFGS on the log posterior over the free groups
//!   of [`FitTargets`](crate::mlfm::params::FitTargets).
//! - [`FitMethod::Em`]: exact Gaussian E-steps over the trajectories and
//!   L-BFGS M-steps, with a monotonicity guard.
//! - [`FitMethod::Variational`]: coordinate ascent on Gaussian `q(x) q(g)`.
//!
//! Key behaviors
//! -------------
//! - The model is borrowed immutably; every fit returns fresh parameters.
//! - Running out of iterations and a rejected EM step are reported through
//!   [`FitStatus`], never as errors.
//! - Per-iteration progress is logged only with the `obs_slog` feature and
//!   `verbose` set.
//!
//! Downstream usage
//! ----------------
//! - Call [`fit`] with a method, or the per-method functions [`fit_map`],
//!   [`fit_em`] and [`fit_variational`] directly.
//!
//! Testing notes
//! -------------
//! - End-to-end behavior (rotation recovery, EM trace, frozen groups) is
//!   covered by `tests/integration_mlfm_pipeline.rs`.

pub mod em;
mod force_refit;
pub mod map;
pub mod options;
pub mod result;
pub mod variational;

use crate::mlfm::{errors::MlfmResult, model::MlfmModel};

// ---- Re-exports (primary public surface) ----------------------------------

pub use self::em::fit_em;
pub use self::map::fit_map;
pub use self::options::{DEFAULT_INIT_STATE_VARIANCE, EmOptions, MapOptions, VariationalOptions};
pub use self::result::{AbortReason, FitStatus, MlfmFit};
pub use self::variational::fit_variational;

/// Fitting method and its options.
#[derive(Debug, Clone, PartialEq)]
pub enum FitMethod {
    Map(MapOptions),
    Em(EmOptions),
    Variational(VariationalOptions),
}

/// Fit `model` with `method`.
///
/// Errors
/// ------
/// - As [`fit_map`], [`fit_em`] or [`fit_variational`].
pub fn fit(model: &MlfmModel, method: &FitMethod) -> MlfmResult<MlfmFit> {
    match method {
        FitMethod::Map(opts) => fit_map(model, opts),
        FitMethod::Em(opts) => fit_em(model, opts),
        FitMethod::Variational(opts) => fit_variational(model, opts),
    }
}

pub mod prelude {
    pub use super::{
        EmOptions, FitMethod, FitStatus, MapOptions, MlfmFit, VariationalOptions, fit,
    };
}

//! logging — terminal progress output for the iterative fits.
//!
//! Progress is only ever written when the crate is built with the
//! `obs_slog` feature *and* the caller asked for verbose output. Without
//! the feature every [`ProgressLog`] method compiles to a no-op, so the
//! fitting code can log unconditionally.
//!
//! The L-BFGS runs use the same terminal drain through the argmin slog
//! observer (see `optimization::loglik_optimizer::run`).

/// Asynchronous, human-readable terminal logger.
#[cfg(feature = "obs_slog")]
pub fn term_logger() -> slog::Logger {
    use slog::Drain;
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();
    slog::Logger::root(drain, slog::o!("crate" => env!("CARGO_PKG_NAME")))
}

/// Per-fit progress reporter used by the EM and variational loops.
#[derive(Clone)]
pub(crate) struct ProgressLog {
    #[cfg(feature = "obs_slog")]
    logger: Option<slog::Logger>,
}

impl ProgressLog {
    pub fn new(verbose: bool) -> Self {
        #[cfg(feature = "obs_slog")]
        {
            Self { logger: verbose.then(term_logger) }
        }
        #[cfg(not(feature = "obs_slog"))]
        {
            let _ = verbose;
            Self {}
        }
    }

    /// One outer iteration: the tracked objective and the largest change of
    /// the force estimate.
    pub fn iteration(&self, method: &'static str, iteration: usize, objective: f64, max_step: f64) {
        #[cfg(feature = "obs_slog")]
        if let Some(logger) = &self.logger {
            slog::info!(logger, "iteration";
                "method" => method,
                "iter" => iteration,
                "objective" => objective,
                "max_force_step" => max_step,
            );
        }
        #[cfg(not(feature = "obs_slog"))]
        let _ = (method, iteration, objective, max_step);
    }

    /// Rejected EM step; the previous estimate is kept.
    pub fn rejected(&self, previous: f64, current: f64) {
        #[cfg(feature = "obs_slog")]
        if let Some(logger) = &self.logger {
            slog::warn!(logger, "log-likelihood decreased; stopping";
                "previous" => previous,
                "current" => current,
            );
        }
        #[cfg(not(feature = "obs_slog"))]
        let _ = (previous, current);
    }

    pub fn finished(&self, method: &'static str, status: &str, iterations: usize) {
        #[cfg(feature = "obs_slog")]
        if let Some(logger) = &self.logger {
            slog::info!(logger, "fit finished";
                "method" => method,
                "status" => status,
                "iterations" => iterations,
            );
        }
        #[cfg(not(feature = "obs_slog"))]
        let _ = (method, status, iterations);
    }
}

impl std::fmt::Debug for ProgressLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        #[cfg(feature = "obs_slog")]
        let enabled = self.logger.is_some();
        #[cfg(not(feature = "obs_slog"))]
        let enabled = false;
        f.debug_struct("ProgressLog").field("enabled", &enabled).finish()
    }
}

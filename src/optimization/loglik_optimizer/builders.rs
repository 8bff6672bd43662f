//! loglik_optimizer::builders — L-BFGS solver construction.
//!
//! Purpose
//! -------
//! Build L-BFGS solvers for the two supported line searches and apply the
//! optional gradient / cost-change tolerances from [`MLEOptions`]. Initial
//! parameters and the iteration cap are runtime concerns handled by
//! [`run_lbfgs`](crate::optimization::loglik_optimizer::run::run_lbfgs).
//!
//! Invariants & assumptions
//! ------------------------
//! - History size is `opts.lbfgs_mem` or [`DEFAULT_LBFGS_MEM`].
//! - Tolerances rejected by argmin surface as `OptError` through the
//!   crate's `From<argmin::core::Error>` conversion.
use argmin::solver::quasinewton::LBFGS;

use crate::optimization::{
    errors::OptResult,
    loglik_optimizer::{
        traits::MLEOptions,
        types::{
            Cost, DEFAULT_LBFGS_MEM, Grad, HagerZhangLS, LbfgsHagerZhang, LbfgsMoreThuente,
            MoreThuenteLS, Theta,
        },
    },
};

/// L-BFGS with Hager–Zhang line search and the tolerances in `opts`.
///
/// # Errors
/// Returns an `OptError` if argmin rejects a tolerance.
pub fn build_optimizer_hager_zhang(opts: &MLEOptions) -> OptResult<LbfgsHagerZhang> {
    let mem = opts.lbfgs_mem.unwrap_or(DEFAULT_LBFGS_MEM);
    configure_lbfgs(LbfgsHagerZhang::new(HagerZhangLS::new(), mem), opts)
}

/// L-BFGS with More–Thuente line search and the tolerances in `opts`.
///
/// # Errors
/// Returns an `OptError` if argmin rejects a tolerance.
pub fn build_optimizer_more_thuente(opts: &MLEOptions) -> OptResult<LbfgsMoreThuente> {
    let mem = opts.lbfgs_mem.unwrap_or(DEFAULT_LBFGS_MEM);
    configure_lbfgs(LbfgsMoreThuente::new(MoreThuenteLS::new(), mem), opts)
}

/// Apply the optional `tol_grad` / `tol_cost` of `opts` to any L-BFGS
/// solver. `None` leaves argmin's default in place.
///
/// # Errors
/// Returns an `OptError` if argmin rejects a tolerance.
pub fn configure_lbfgs<L>(
    mut solver: LBFGS<L, Theta, Grad, Cost>, opts: &MLEOptions,
) -> OptResult<LBFGS<L, Theta, Grad, Cost>> {
    if let Some(g) = opts.tols.tol_grad {
        solver = solver.with_tolerance_grad(g)?;
    }
    if let Some(c) = opts.tols.tol_cost {
        solver = solver.with_tolerance_cost(c)?;
    }
    Ok(solver)
}

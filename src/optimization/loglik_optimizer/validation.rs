//! Validation helpers for the L-BFGS maximizer.
//!
//! - **Tolerance checks**: [`verify_tol_grad`], [`verify_tol_cost`].
//! - **Gradient validation**: [`validate_grad`] (dimension, finiteness).
//! - **Inputs and outcomes**: [`validate_theta_input`], [`validate_theta_hat`],
//!   [`validate_value`].
//!
//! All helpers return [`OptError`] variants so callers can propagate them
//! with `?`.
use crate::optimization::{
    errors::{OptError, OptResult},
    loglik_optimizer::{Grad, Theta},
};

/// Validate the optional gradient-norm tolerance (finite, `> 0`).
///
/// # Errors
/// Returns [`OptError::InvalidTolGrad`] if the value is non-finite or ≤ 0.0.
pub fn verify_tol_grad(tol: Option<f64>) -> OptResult<()> {
    if let Some(tol) = tol {
        if !tol.is_finite() {
            return Err(OptError::InvalidTolGrad { tol, reason: "Tolerance must be finite." });
        }
        if tol <= 0.0 {
            return Err(OptError::InvalidTolGrad { tol, reason: "Tolerance must be positive." });
        }
    }
    Ok(())
}

/// Validate the optional cost-change tolerance (finite, `> 0`).
///
/// # Errors
/// Returns [`OptError::InvalidTolCost`] if the value is non-finite or ≤ 0.0.
pub fn verify_tol_cost(tol: Option<f64>) -> OptResult<()> {
    if let Some(tol) = tol {
        if !tol.is_finite() {
            return Err(OptError::InvalidTolCost { tol, reason: "Tolerance must be finite." });
        }
        if tol <= 0.0 {
            return Err(OptError::InvalidTolCost { tol, reason: "Tolerance must be positive." });
        }
    }
    Ok(())
}

/// Validate a gradient vector against dimension and finiteness.
///
/// # Errors
/// - [`OptError::GradientDimMismatch`] if length does not match `dim`.
/// - [`OptError::InvalidGradient`] for the first non-finite element.
pub fn validate_grad(grad: &Grad, dim: usize) -> OptResult<()> {
    if grad.len() != dim {
        return Err(OptError::GradientDimMismatch { expected: dim, found: grad.len() });
    }
    for (index, &value) in grad.iter().enumerate() {
        if !value.is_finite() {
            return Err(OptError::InvalidGradient {
                index,
                value,
                reason: "Gradient elements must be finite.",
            });
        }
    }
    Ok(())
}

/// Validate a packed starting vector: expected length and finite entries.
///
/// # Errors
/// - [`OptError::ThetaLengthMismatch`] on a length mismatch.
/// - [`OptError::InvalidThetaInput`] for the first non-finite entry.
pub fn validate_theta_input(theta: &Theta, expected: usize) -> OptResult<()> {
    if theta.len() != expected {
        return Err(OptError::ThetaLengthMismatch { expected, actual: theta.len() });
    }
    match theta.iter().position(|v| !v.is_finite()) {
        Some(index) => Err(OptError::InvalidThetaInput { index, value: theta[index] }),
        None => Ok(()),
    }
}

/// Validate and unwrap an estimated parameter vector.
///
/// # Errors
/// - [`OptError::MissingThetaHat`] if no vector was provided.
/// - [`OptError::InvalidThetaHat`] if any element is non-finite.
pub fn validate_theta_hat(theta_hat: Option<Theta>) -> OptResult<Theta> {
    match theta_hat {
        Some(t) => {
            for (index, &value) in t.iter().enumerate() {
                if !value.is_finite() {
                    return Err(OptError::InvalidThetaHat {
                        index,
                        value,
                        reason: "Parameter estimates must be finite.",
                    });
                }
            }
            Ok(t)
        }
        None => Err(OptError::MissingThetaHat),
    }
}

/// Validate that an objective value is finite.
///
/// # Errors
/// Returns [`OptError::NonFiniteCost`] if the value is `NaN` or infinite.
pub fn validate_value(value: f64) -> OptResult<()> {
    if !value.is_finite() {
        return Err(OptError::NonFiniteCost { value });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    // Purpose
    // -------
    // Starting vectors of the wrong length or with NaNs are rejected.
    //
    // Given
    // -----
    // - A length-3 vector checked against 4, and one containing NaN.
    //
    // Expect
    // ------
    // - `ThetaLengthMismatch` and `InvalidThetaInput { index: 1 }`.
    fn validate_theta_input_flags_length_and_nan() {
        // Arrange
        let short = array![0.0, 1.0, 2.0];
        let nan = array![0.0, f64::NAN, 2.0];

        // Act / Assert
        assert_eq!(
            validate_theta_input(&short, 4),
            Err(OptError::ThetaLengthMismatch { expected: 4, actual: 3 })
        );
        assert!(matches!(
            validate_theta_input(&nan, 3),
            Err(OptError::InvalidThetaInput { index: 1, .. })
        ));
        assert!(validate_theta_input(&short, 3).is_ok());
    }

    #[test]
    // Purpose
    // -------
    // Gradient validation catches both shape and finiteness problems.
    //
    // Given
    // -----
    // - A gradient with an infinite entry and one of the wrong length.
    //
    // Expect
    // ------
    // - `InvalidGradient` and `GradientDimMismatch`.
    fn validate_grad_reports_first_offender() {
        // Arrange
        let bad = array![1.0, f64::INFINITY];

        // Act / Assert
        assert!(matches!(validate_grad(&bad, 2), Err(OptError::InvalidGradient { index: 1, .. })));
        assert!(matches!(validate_grad(&bad, 3), Err(OptError::GradientDimMismatch { .. })));
        assert_eq!(validate_theta_hat(None), Err(OptError::MissingThetaHat));
    }
}

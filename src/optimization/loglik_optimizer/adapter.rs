//! Adapter that exposes a [`LogLikelihood`] as an argmin problem.
//!
//! Maximizing `ℓ(θ)` becomes minimizing `c(θ) = -ℓ(θ)`. Two MLFM-specific
//! rules live here:
//! - a recoverable [`OptError::LinearAlgebra`], a non-finite value or a
//!   non-finite analytic gradient at a trial point becomes the finite cost
//!   [`PENALTY_COST`] with a zero gradient, so the line search shrinks its
//!   step instead of aborting;
//! - objectives without an analytic gradient are differentiated with
//!   `finitediff`, central first and forward as a fallback.
//!
//! argmin asks for the cost of a trial point before its gradient, so `cost`
//! evaluates both through [`LogLikelihood::value_and_grad`] and parks the
//! gradient for the `gradient` call that follows at the same point.
use std::cell::RefCell;

use crate::optimization::{
    errors::OptError,
    loglik_optimizer::{
        traits::LogLikelihood,
        types::{Cost, Grad, Theta},
        validation::validate_grad,
    },
    numerical_stability::PENALTY_COST,
};
use argmin::core::{CostFunction, Error, Gradient};
use finitediff::FiniteDiff;

/// Gradient of the cost at the last point `cost` saw; `None` when the
/// objective has no analytic gradient.
type CachedGrad = (Theta, Option<Grad>);

/// Bridges a [`LogLikelihood`] to argmin's `CostFunction` and `Gradient`.
#[derive(Debug, Clone)]
pub struct ArgMinAdapter<'a, F: LogLikelihood> {
    pub f: &'a F,
    pub data: &'a F::Data,
    last: RefCell<Option<CachedGrad>>,
}

impl<'a, F: LogLikelihood> ArgMinAdapter<'a, F> {
    pub fn new(f: &'a F, data: &'a F::Data) -> Self {
        Self { f, data, last: RefCell::new(None) }
    }

    /// `(c(θ), ∇c(θ))`, with the penalty rules applied.
    fn evaluate(&self, theta: &Theta) -> Result<(Cost, Option<Grad>), Error> {
        let dim = theta.len();
        match self.f.value_and_grad(theta, self.data) {
            Ok((value, grad)) if value.is_finite() => match grad {
                None => Ok((-value, None)),
                Some(g) => match validate_grad(&g, dim) {
                    Ok(()) => Ok((-value, Some(-g))),
                    Err(OptError::InvalidGradient { .. }) => {
                        Ok((PENALTY_COST, Some(Grad::zeros(dim))))
                    }
                    Err(e) => Err(e.into()),
                },
            },
            Ok(_) | Err(OptError::LinearAlgebra { .. }) => {
                Ok((PENALTY_COST, Some(Grad::zeros(dim))))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Finite-difference gradient of the cost, central then forward.
    ///
    /// The FD closure must return `f64`, so the first hard error raised by
    /// `cost` is parked in `closure_err` and re-raised afterwards.
    fn fd_gradient(&self, theta: &Theta) -> Result<Grad, Error> {
        let dim = theta.len();
        let closure_err: RefCell<Option<Error>> = RefCell::new(None);
        let cost_func = |theta: &Theta| -> f64 {
            match self.evaluate(theta) {
                Ok((val, _)) => val,
                Err(e) => {
                    let mut slot = closure_err.borrow_mut();
                    if slot.is_none() {
                        *slot = Some(e);
                    }
                    f64::NAN
                }
            }
        };
        let central = theta.central_diff(&cost_func);
        if closure_err.borrow().is_none() && validate_grad(&central, dim).is_ok() {
            return Ok(central);
        }
        closure_err.replace(None);
        let forward = theta.forward_diff(&cost_func);
        if let Some(err) = closure_err.take() {
            return Err(err);
        }
        validate_grad(&forward, dim)?;
        Ok(forward)
    }
}

impl<'a, F: LogLikelihood> CostFunction for ArgMinAdapter<'a, F> {
    type Param = Theta;
    type Output = Cost;

    /// Evaluate `c(θ) = -ℓ(θ)`.
    ///
    /// # Errors
    /// Propagates objective errors other than `LinearAlgebra`.
    fn cost(&self, theta: &Self::Param) -> Result<Self::Output, Error> {
        let (cost, grad) = self.evaluate(theta)?;
        self.last.replace(Some((theta.clone(), grad)));
        Ok(cost)
    }
}

impl<'a, F: LogLikelihood> Gradient for ArgMinAdapter<'a, F> {
    type Param = Theta;
    type Gradient = Grad;

    /// Evaluate `∇c(θ) = -∇ℓ(θ)`.
    ///
    /// # Errors
    /// - Propagates objective errors other than `LinearAlgebra` and
    ///   `GradientNotImplemented`.
    /// - Returns validation errors for wrongly sized gradients.
    fn gradient(&self, theta: &Self::Param) -> Result<Self::Gradient, Error> {
        let cached = match self.last.take() {
            Some((at, grad)) if at == *theta => Some(grad),
            _ => None,
        };
        let grad = match cached {
            Some(grad) => grad,
            None => self.evaluate(theta)?.1,
        };
        match grad {
            Some(g) => Ok(g),
            None => self.fd_gradient(theta),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimization::errors::OptResult;
    use ndarray::array;

    /// ℓ(θ) = -(θ₀ - 1)² - 2θ₁², failing with `LinearAlgebra` when θ₀ > 5.
    struct Bowl;

    impl LogLikelihood for Bowl {
        type Data = ();

        fn value(&self, theta: &Theta, _data: &()) -> OptResult<f64> {
            if theta[0] > 5.0 {
                return Err(OptError::LinearAlgebra { context: "test".to_string() });
            }
            Ok(-(theta[0] - 1.0).powi(2) - 2.0 * theta[1].powi(2))
        }

        fn check(&self, _theta: &Theta, _data: &()) -> OptResult<()> {
            Ok(())
        }
    }

    /// ℓ(θ) = -θ₀², finite everywhere, with an analytic gradient that turns
    /// NaN for θ₀ > 3.
    struct Cliff;

    impl LogLikelihood for Cliff {
        type Data = ();

        fn value(&self, theta: &Theta, _data: &()) -> OptResult<f64> {
            Ok(-theta[0] * theta[0])
        }

        fn check(&self, _theta: &Theta, _data: &()) -> OptResult<()> {
            Ok(())
        }

        fn grad(&self, theta: &Theta, _data: &()) -> OptResult<Grad> {
            if theta[0] > 3.0 {
                return Ok(array![f64::NAN]);
            }
            Ok(array![-2.0 * theta[0]])
        }
    }

    #[test]
    // Purpose
    // -------
    // A finite value with a non-finite analytic gradient is treated like a
    // factorization failure, so the line search backtracks.
    //
    // Given
    // -----
    // - `Cliff` at θ = 4 (NaN gradient) and at θ = 1 (regular).
    //
    // Expect
    // ------
    // - θ = 4: `PENALTY_COST` and a zero gradient.
    // - θ = 1: cost 1 and gradient 2 (sign flipped).
    fn non_finite_gradient_is_penalized() {
        // Arrange
        let adapter = ArgMinAdapter::new(&Cliff, &());
        let bad = array![4.0];
        let good = array![1.0];

        // Act
        let bad_cost = adapter.cost(&bad).expect("penalty, not error");
        let bad_grad = adapter.gradient(&bad).expect("zero gradient, not error");
        let good_cost = adapter.cost(&good).expect("cost");
        let good_grad = adapter.gradient(&good).expect("gradient");

        // Assert
        assert_eq!(bad_cost, PENALTY_COST);
        assert_eq!(bad_grad, array![0.0]);
        assert_eq!(good_cost, 1.0);
        assert_eq!(good_grad, array![2.0]);
    }

    #[test]
    // Purpose
    // -------
    // A gradient requested without a preceding cost call at the same point
    // is evaluated fresh, not taken from the cache.
    //
    // Given
    // -----
    // - `Cliff`: cost at θ = 1, then gradient at θ = 2.
    //
    // Expect
    // ------
    // - Gradient 4, the cost gradient at θ = 2.
    fn gradient_cache_is_keyed_by_point() {
        // Arrange
        let adapter = ArgMinAdapter::new(&Cliff, &());

        // Act
        adapter.cost(&array![1.0]).expect("cost");
        let grad = adapter.gradient(&array![2.0]).expect("gradient");

        // Assert
        assert_eq!(grad, array![4.0]);
    }

    #[test]
    // Purpose
    // -------
    // A linear-algebra failure becomes the finite penalty and a zero
    // gradient instead of an error.
    //
    // Given
    // -----
    // - A toy objective that fails for θ₀ > 5.
    //
    // Expect
    // ------
    // - `cost` returns `PENALTY_COST`; `gradient` returns zeros.
    fn linear_algebra_failure_is_penalized() {
        // Arrange
        let adapter = ArgMinAdapter::new(&Bowl, &());
        let theta = array![6.0, 0.0];

        // Act
        let cost = adapter.cost(&theta).expect("penalty, not error");
        let grad = adapter.gradient(&theta).expect("zero gradient, not error");

        // Assert
        assert_eq!(cost, PENALTY_COST);
        assert!(grad.iter().all(|&g| g == 0.0));
    }

    #[test]
    // Purpose
    // -------
    // Without an analytic gradient, the FD fallback returns the gradient of
    // the cost (sign already flipped).
    //
    // Given
    // -----
    // - The toy objective at θ = (0, 1), where ∇ℓ = (2, -4).
    //
    // Expect
    // ------
    // - FD gradient ≈ (-2, 4).
    fn finite_difference_fallback_differentiates_the_cost() {
        // Arrange
        let adapter = ArgMinAdapter::new(&Bowl, &());
        let theta = array![0.0, 1.0];

        // Act
        let grad = adapter.gradient(&theta).expect("fd gradient");

        // Assert
        assert!((grad[0] + 2.0).abs() < 1e-5);
        assert!((grad[1] - 4.0).abs() < 1e-5);
    }
}

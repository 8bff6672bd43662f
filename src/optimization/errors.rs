//! Error surface of the optimization layer.
//!
//! [`OptError`] covers option validation, objective/gradient failures and
//! argmin backend errors. Model-side failures arrive through
//! `From<MlfmError>`: a non positive definite matrix stays recoverable as
//! [`OptError::LinearAlgebra`], everything else becomes
//! [`OptError::ModelFailure`].
use argmin::core::{ArgminError, Error};

use crate::mlfm::errors::MlfmError;

/// Result alias for optimizer operations.
pub type OptResult<T> = Result<T, OptError>;

#[derive(Debug, Clone, PartialEq)]
pub enum OptError {
    // ---- Gradient ----
    /// The objective has no analytic gradient; finite differences are used.
    GradientNotImplemented,

    GradientDimMismatch { expected: usize, found: usize },

    /// A gradient entry is NaN or infinite.
    InvalidGradient { index: usize, value: f64, reason: &'static str },

    // ---- Solver options ----
    InvalidTolGrad { tol: f64, reason: &'static str },
    InvalidTolCost { tol: f64, reason: &'static str },
    InvalidMaxIter { max_iter: usize, reason: &'static str },

    /// Gradient tolerance, cost tolerance and iteration cap are all unset.
    NoTolerancesProvided,

    InvalidLineSearch { name: String, reason: &'static str },
    InvalidLBFGSMem { mem: usize, reason: &'static str },

    // ---- Objective ----
    NonFiniteCost { value: f64 },

    /// A covariance or precision matrix was not positive definite at the
    /// evaluated point. Recoverable: the adapter turns it into a penalty.
    LinearAlgebra { context: String },

    /// Any other model-side failure while evaluating the objective.
    ModelFailure { text: String },

    // ---- Parameter vectors ----
    /// The solver finished with a non-finite best parameter.
    InvalidThetaHat { index: usize, value: f64, reason: &'static str },

    /// The solver finished without a best parameter.
    MissingThetaHat,

    ThetaLengthMismatch { expected: usize, actual: usize },

    /// Starting vectors must be finite.
    InvalidThetaInput { index: usize, value: f64 },

    // ---- Backend ----
    /// argmin failed; `kind` names the argmin error class.
    Backend { kind: &'static str, text: String },
}

impl std::error::Error for OptError {}

impl std::fmt::Display for OptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            // ---- Gradient ----
            OptError::GradientNotImplemented => write!(f, "No analytic gradient available"),
            OptError::GradientDimMismatch { expected, found } => {
                write!(f, "Gradient has length {found}, expected {expected}")
            }
            OptError::InvalidGradient { index, value, reason } => {
                write!(f, "Gradient entry {index} = {value}: {reason}")
            }

            // ---- Solver options ----
            OptError::InvalidTolGrad { tol, reason } => {
                write!(f, "Gradient tolerance {tol} rejected: {reason}")
            }
            OptError::InvalidTolCost { tol, reason } => {
                write!(f, "Cost tolerance {tol} rejected: {reason}")
            }
            OptError::InvalidMaxIter { max_iter, reason } => {
                write!(f, "Iteration cap {max_iter} rejected: {reason}")
            }
            OptError::NoTolerancesProvided => {
                write!(f, "At least one stopping rule (tolerance or iteration cap) is required")
            }
            OptError::InvalidLineSearch { name, reason } => {
                write!(f, "Unknown line search '{name}': {reason}")
            }
            OptError::InvalidLBFGSMem { mem, reason } => {
                write!(f, "L-BFGS memory {mem} rejected: {reason}")
            }

            // ---- Objective ----
            OptError::NonFiniteCost { value } => write!(f, "Objective evaluated to {value}"),
            OptError::LinearAlgebra { context } => {
                write!(f, "Matrix not positive definite: {context}")
            }
            OptError::ModelFailure { text } => write!(f, "Model evaluation failed: {text}"),

            // ---- Parameter vectors ----
            OptError::InvalidThetaHat { index, value, reason } => {
                write!(f, "Estimated parameter {index} = {value}: {reason}")
            }
            OptError::MissingThetaHat => write!(f, "Solver returned no best parameter"),
            OptError::ThetaLengthMismatch { expected, actual } => {
                write!(f, "Parameter vector has length {actual}, expected {expected}")
            }
            OptError::InvalidThetaInput { index, value } => {
                write!(f, "Starting parameter {index} = {value} is not finite")
            }

            // ---- Backend ----
            OptError::Backend { kind, text } => write!(f, "argmin error ({kind}): {text}"),
        }
    }
}

impl From<Error> for OptError {
    fn from(err: Error) -> Self {
        // Objective errors travel through argmin boxed; recover them first.
        let err = match err.downcast::<OptError>() {
            Ok(opt_err) => return opt_err,
            Err(err) => err,
        };
        match err.downcast::<ArgminError>() {
            Ok(argmin_err) => {
                let kind = match &argmin_err {
                    ArgminError::InvalidParameter { .. } => "invalid parameter",
                    ArgminError::NotImplemented { .. } => "not implemented",
                    ArgminError::NotInitialized { .. } => "not initialized",
                    ArgminError::ConditionViolated { .. } => "condition violated",
                    ArgminError::CheckpointNotFound { .. } => "checkpoint not found",
                    ArgminError::PotentialBug { .. } => "potential bug",
                    ArgminError::ImpossibleError { .. } => "impossible error",
                    _ => "unknown",
                };
                OptError::Backend { kind, text: argmin_err.to_string() }
            }
            Err(err) => OptError::Backend { kind: "other", text: err.to_string() },
        }
    }
}

impl From<MlfmError> for OptError {
    fn from(err: MlfmError) -> Self {
        match err {
            MlfmError::LinearAlgebra { context, index } => {
                OptError::LinearAlgebra { context: format!("{context} (index {index})") }
            }
            other => OptError::ModelFailure { text: other.to_string() },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    // Purpose
    // -------
    // Model errors keep their recoverability when entering the optimizer.
    //
    // Given
    // -----
    // - A linear-algebra failure and a validation failure.
    //
    // Expect
    // ------
    // - The first maps to `LinearAlgebra` with the index in the context,
    //   the second to `ModelFailure`.
    fn model_errors_map_by_recoverability() {
        // Arrange
        let la = MlfmError::LinearAlgebra { context: "S_k", index: 1 };
        let shape = MlfmError::TooFewTimes { len: 1 };

        // Act
        let la = OptError::from(la);
        let shape = OptError::from(shape);

        // Assert
        assert_eq!(la, OptError::LinearAlgebra { context: "S_k (index 1)".to_string() });
        assert!(matches!(shape, OptError::ModelFailure { .. }));
    }

    #[test]
    // Purpose
    // -------
    // An objective error boxed inside an argmin error is recovered intact.
    //
    // Given
    // -----
    // - `OptError::NonFiniteCost` converted into `argmin::core::Error`.
    //
    // Expect
    // ------
    // - Converting back yields the original variant.
    fn boxed_objective_errors_are_recovered() {
        // Arrange
        let original = OptError::NonFiniteCost { value: f64::INFINITY };

        // Act
        let boxed: Error = original.clone().into();
        let back = OptError::from(boxed);

        // Assert
        assert_eq!(back, original);
    }
}

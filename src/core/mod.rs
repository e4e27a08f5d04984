//! Core building blocks shared by the optimizer and the fitters
//!
//! - Data covariance representation and weighting
//! - Finite-difference Jacobians
//! - Post-fit statistics (degrees of freedom, correlation, standard errors)

pub mod covariance;
pub mod jacobian;
pub mod statistics;

use thiserror::Error;
use tracing::error;

pub use covariance::DataCovariance;
pub use statistics::FitStatistics;

/// Configuration errors raised before any iteration runs
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Supplied vector or matrix has the wrong length
    #[error("Dimension mismatch for {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: String,
        expected: usize,
        actual: usize,
    },

    /// Not enough observations to constrain the parameters
    #[error(
        "Insufficient degrees of freedom: {observations} observations for {parameters} parameters"
    )]
    InsufficientDegreesOfFreedom {
        observations: usize,
        parameters: usize,
    },

    /// Covariance or variance input is unusable (asymmetric, not SPD, non-positive)
    #[error("Invalid covariance: {0}")]
    InvalidCovariance(String),

    /// A required input was never set
    #[error("Missing input: {0} has not been set")]
    MissingInput(&'static str),

    /// Invalid input parameter or configuration
    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl CoreError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// check_lengths().map_err(|e| e.log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error with the underlying source value
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for core module operations
pub type CoreResult<T> = Result<T, CoreError>;

/// Check that a supplied vector has the length the fit was sized for.
pub(crate) fn check_length(context: &str, expected: usize, actual: usize) -> CoreResult<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(CoreError::DimensionMismatch {
            context: context.to_string(),
            expected,
            actual,
        }
        .log())
    }
}

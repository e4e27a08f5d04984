//! Error types for the asteria-lm library
//!
//! # Error Hierarchy
//!
//! - **`AsteriaError`** is the top-level error exposed by public APIs
//! - **Module errors** (`CoreError`, `OptimizerError`, `LinAlgError`, `ModelError`,
//!   `ObserverError`) are wrapped inside it
//! - **Error sources** are preserved, allowing full error chain inspection
//!
//! Configuration problems (wrong lengths, N ≤ M, a covariance that is not positive
//! definite) are errors. Numerical stalls during a fit are not: they are reported
//! through [`OptimizationStatus`](crate::optimizer::OptimizationStatus).
//!
//! Example error chain:
//! ```text
//! AsteriaError::Optimizer(
//!     OptimizerError::LinAlg(LinAlgError::SingularMatrix)
//! )
//! ```

use crate::{
    core::CoreError, linalg::LinAlgError, models::ModelError, observers::ObserverError,
    optimizer::OptimizerError,
};
use std::error::Error as StdError;
use thiserror::Error;

/// Main result type used throughout the asteria-lm library
pub type AsteriaResult<T> = Result<T, AsteriaError>;

/// Main error type for the asteria-lm library
///
/// ```rust,ignore
/// if let Err(e) = solver.parameter_covariance() {
///     warn!("Full chain: {}", e.chain());
/// }
/// ```
#[derive(Debug, Error)]
pub enum AsteriaError {
    /// Configuration errors (dimensions, degrees of freedom, covariance, missing inputs)
    #[error(transparent)]
    Core(#[from] CoreError),

    /// Optimization algorithm errors
    #[error(transparent)]
    Optimizer(#[from] OptimizerError),

    /// Linear algebra errors
    #[error(transparent)]
    LinearAlgebra(#[from] LinAlgError),

    /// Residual model errors
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Observer errors
    #[error(transparent)]
    Observer(#[from] ObserverError),
}

impl AsteriaError {
    /// Get the full error chain as a string for logging and debugging.
    ///
    /// ```rust,ignore
    /// // Output: "Linear algebra error: Singular matrix detected ...
    /// //            → Singular matrix detected ..."
    /// ```
    pub fn chain(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(format!("  → {}", err));
            source = err.source();
        }

        chain.join("\n")
    }

    /// Get a compact single-line error chain for logging
    pub fn chain_compact(&self) -> String {
        let mut chain = vec![self.to_string()];
        let mut source = self.source();

        while let Some(err) = source {
            chain.push(err.to_string());
            source = err.source();
        }

        chain.join(" → ")
    }
}

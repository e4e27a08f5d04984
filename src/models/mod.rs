//! Residual models fitted by the Levenberg-Marquardt solver.
//!
//! A model maps an M-element parameter vector `P` to N predicted observations
//! `f(P) = [f(x_0, P), ..., f(x_{N-1}, P)]ᵗ`. The solver forms residuals against
//! the observed data, weights them with the data covariance and iterates on `P`.
//!
//! # Fitters
//!
//! - [`PolynomialFitter`]: 1-D polynomial `Σ a_k x^k`
//! - [`CosineFitter`]: `a·cos(ω t)`
//! - [`Gaussian2dFitter`]: elliptical 2-D Gaussian plus background on an image stamp
//! - [`GeoCalFitter`]: camera orientation and pinhole intrinsics from star cross-matches
//!
//! # Jacobians
//!
//! A model may supply the analytic Jacobian `J[i][j] = ∂f(x_i, P)/∂p_j`. Returning
//! `None` from [`ResidualModel::jacobian`] makes the solver fall back to central
//! finite differences with the steps from [`ResidualModel::finite_difference_steps`].

use nalgebra::{DMatrix, DVector};
use thiserror::Error;
use tracing::error;

pub mod cosine;
pub mod gaussian2d;
pub mod geocal;
pub mod polynomial;

pub use cosine::CosineFitter;
pub use gaussian2d::Gaussian2dFitter;
pub use geocal::{CrossMatch, GeoCalFitter, PinholeIntrinsics};
pub use polynomial::PolynomialFitter;

/// Model-specific error types
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    /// Model output or Jacobian has the wrong shape
    #[error("Invalid dimension for {context}: expected {expected}, got {actual}")]
    InvalidDimension {
        context: &'static str,
        expected: usize,
        actual: usize,
    },

    /// Invalid parameter values or finite-difference steps
    #[error("Invalid parameter values: {0}")]
    InvalidParameters(String),

    /// Fitter context cannot be built from the given input
    #[error("Invalid model input: {0}")]
    InvalidInput(String),
}

impl ModelError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }
}

/// Result type for model evaluation
pub type ModelResult<T> = Result<T, ModelError>;

/// Capability a concrete fitter provides to the solver.
///
/// Fitters bind their fixed context (abscissae, pixel coordinates, observation
/// geometry) at construction; the solver owns the parameters and passes them in.
pub trait ResidualModel: Send + Sync {
    /// Number of free parameters M.
    fn num_parameters(&self) -> usize;

    /// Number of observations N.
    fn num_observations(&self) -> usize;

    /// Predicted observations for the given parameters (length N).
    fn model(&self, params: &DVector<f64>) -> DVector<f64>;

    /// Analytic N×M Jacobian, or `None` to use finite differences.
    fn jacobian(&self, _params: &DVector<f64>) -> Option<DMatrix<f64>> {
        None
    }

    /// Per-parameter finite-difference steps (length M).
    ///
    /// Override when parameters live on very different scales and the model relies
    /// on the numeric Jacobian.
    fn finite_difference_steps(&self, default_step: f64) -> DVector<f64> {
        DVector::from_element(self.num_parameters(), default_step)
    }

    /// Constraint enforcement after each trial step and on the perturbed parameters of
    /// a finite-difference Jacobian, e.g. renormalising a quaternion.
    fn post_parameter_update(&self, _params: &mut DVector<f64>) {}

    /// Parameter directions the model output does not depend on at `params`, as the
    /// orthonormal columns of an M×k matrix.
    ///
    /// A model that normalises part of its parameter vector (a quaternion, a unit
    /// vector) leaves `JᵗWJ` singular along that part. The direct covariance is
    /// computed on the complement of these directions.
    fn gauge_directions(&self, _params: &DVector<f64>) -> Option<DMatrix<f64>> {
        None
    }
}

impl<R: ResidualModel + ?Sized> ResidualModel for Box<R> {
    fn num_parameters(&self) -> usize {
        (**self).num_parameters()
    }

    fn num_observations(&self) -> usize {
        (**self).num_observations()
    }

    fn model(&self, params: &DVector<f64>) -> DVector<f64> {
        (**self).model(params)
    }

    fn jacobian(&self, params: &DVector<f64>) -> Option<DMatrix<f64>> {
        (**self).jacobian(params)
    }

    fn finite_difference_steps(&self, default_step: f64) -> DVector<f64> {
        (**self).finite_difference_steps(default_step)
    }

    fn post_parameter_update(&self, params: &mut DVector<f64>) {
        (**self).post_parameter_update(params)
    }

    fn gauge_directions(&self, params: &DVector<f64>) -> Option<DMatrix<f64>> {
        (**self).gauge_directions(params)
    }
}

//! Dense linear algebra for the normal equations.
//!
//! Fits handled by this crate have a handful of parameters, so the normal matrix
//! `JᵗWJ` is a small dense M×M matrix. The solvers here wrap `nalgebra`'s dense
//! factorizations:
//!
//! - [`CholeskySolver`]: fast, requires a symmetric positive-definite system
//! - [`QRSolver`]: slower, tolerates indefinite systems as long as they are non-singular
//!
//! Both apply Marquardt scaling for the augmented system, i.e. the damping term is
//! `λ·diag(JᵗWJ)` rather than `λ·I`.

pub mod cholesky;
pub mod qr;

use nalgebra::{DMatrix, DVector};
use std::{
    fmt,
    fmt::{Display, Formatter},
};
use thiserror::Error;
use tracing::error;

pub use cholesky::CholeskySolver;
pub use qr::QRSolver;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum LinearSolverType {
    #[default]
    Cholesky,
    QR,
}

impl Display for LinearSolverType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LinearSolverType::Cholesky => write!(f, "Dense Cholesky"),
            LinearSolverType::QR => write!(f, "Dense QR"),
        }
    }
}

/// Linear algebra specific error types
#[derive(Debug, Clone, Error)]
pub enum LinAlgError {
    /// Matrix factorization failed (Cholesky, QR)
    #[error("Matrix factorization failed: {0}")]
    FactorizationFailed(String),

    /// Singular or near-singular matrix detected
    #[error("Singular matrix detected (matrix is not invertible)")]
    SingularMatrix,

    /// Operand shapes do not agree
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// Solve produced NaN or Inf entries
    #[error("Linear solve produced non-finite values")]
    NonFiniteSolution,
}

impl LinAlgError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with the value or error that triggered it
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for linear algebra operations
pub type LinAlgResult<T> = Result<T, LinAlgError>;

/// Dense solver for the (possibly damped) normal equations of a least-squares fit.
pub trait DenseLinearSolver: Send + Sync {
    /// Solve `H·dx = g` for the undamped Gauss-Newton step.
    ///
    /// # Errors
    /// Returns `LinAlgError` if the factorization fails or the solution is not finite.
    fn solve_normal_equation(
        &self,
        hessian: &DMatrix<f64>,
        gradient: &DVector<f64>,
    ) -> LinAlgResult<DVector<f64>>;

    /// Solve `(H + λ·diag(H))·dx = g` for the Levenberg-Marquardt step.
    ///
    /// # Errors
    /// Returns `LinAlgError` if the augmented matrix cannot be factorized.
    fn solve_augmented_equation(
        &self,
        hessian: &DMatrix<f64>,
        gradient: &DVector<f64>,
        lambda: f64,
    ) -> LinAlgResult<DVector<f64>> {
        let augmented = augment_marquardt(hessian, lambda);
        self.solve_normal_equation(&augmented, gradient)
    }

    /// Compute `H⁻¹`, the unscaled parameter covariance.
    ///
    /// # Errors
    /// Returns `LinAlgError::SingularMatrix` if `H` is not invertible.
    fn compute_covariance_matrix(&self, hessian: &DMatrix<f64>) -> LinAlgResult<DMatrix<f64>>;
}

/// Create the solver matching the configured back end.
pub fn create_linear_solver(solver_type: LinearSolverType) -> Box<dyn DenseLinearSolver> {
    match solver_type {
        LinearSolverType::Cholesky => Box::new(CholeskySolver::new()),
        LinearSolverType::QR => Box::new(QRSolver::new()),
    }
}

/// `H + λ·diag(H)`
pub fn augment_marquardt(hessian: &DMatrix<f64>, lambda: f64) -> DMatrix<f64> {
    let mut augmented = hessian.clone();
    for i in 0..augmented.nrows().min(augmented.ncols()) {
        augmented[(i, i)] += lambda * hessian[(i, i)];
    }
    augmented
}

/// Shape check shared by the solvers: square `H` whose size matches `g`.
pub(crate) fn check_system(hessian: &DMatrix<f64>, gradient: &DVector<f64>) -> LinAlgResult<()> {
    if hessian.nrows() != hessian.ncols() {
        return Err(LinAlgError::DimensionMismatch {
            expected: hessian.nrows(),
            actual: hessian.ncols(),
        }
        .log());
    }
    if hessian.nrows() != gradient.len() {
        return Err(LinAlgError::DimensionMismatch {
            expected: hessian.nrows(),
            actual: gradient.len(),
        }
        .log());
    }
    Ok(())
}

pub(crate) fn ensure_finite_vector(v: DVector<f64>) -> LinAlgResult<DVector<f64>> {
    if v.iter().all(|x| x.is_finite()) {
        Ok(v)
    } else {
        Err(LinAlgError::NonFiniteSolution)
    }
}

pub(crate) fn ensure_finite_matrix(m: DMatrix<f64>) -> LinAlgResult<DMatrix<f64>> {
    if m.iter().all(|x| x.is_finite()) {
        Ok(m)
    } else {
        Err(LinAlgError::NonFiniteSolution)
    }
}

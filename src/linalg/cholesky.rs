use nalgebra::{DMatrix, DVector};

use crate::linalg::{
    DenseLinearSolver, LinAlgError, LinAlgResult, check_system, ensure_finite_matrix,
    ensure_finite_vector,
};

/// Dense Cholesky (LLᵗ) solver for symmetric positive-definite normal equations.
///
/// A failed factorization means the (augmented) normal matrix is not positive
/// definite; the optimizer treats that as a rejected step and raises the damping.
#[derive(Debug, Clone, Default)]
pub struct CholeskySolver;

impl CholeskySolver {
    pub fn new() -> Self {
        CholeskySolver
    }
}

impl DenseLinearSolver for CholeskySolver {
    fn solve_normal_equation(
        &self,
        hessian: &DMatrix<f64>,
        gradient: &DVector<f64>,
    ) -> LinAlgResult<DVector<f64>> {
        check_system(hessian, gradient)?;
        let cholesky = hessian.clone().cholesky().ok_or_else(|| {
            LinAlgError::FactorizationFailed("matrix is not positive definite".to_string())
        })?;
        ensure_finite_vector(cholesky.solve(gradient))
    }

    fn compute_covariance_matrix(&self, hessian: &DMatrix<f64>) -> LinAlgResult<DMatrix<f64>> {
        let cholesky = hessian
            .clone()
            .cholesky()
            .ok_or(LinAlgError::SingularMatrix)?;
        ensure_finite_matrix(cholesky.inverse())
    }
}

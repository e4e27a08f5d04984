use nalgebra::{DMatrix, DVector};

use crate::linalg::{
    DenseLinearSolver, LinAlgError, LinAlgResult, check_system, ensure_finite_matrix,
    ensure_finite_vector,
};

/// Dense QR solver.
///
/// Does not need positive definiteness, only invertibility, so it keeps stepping on
/// normal matrices that are numerically indefinite because of round-off.
#[derive(Debug, Clone, Default)]
pub struct QRSolver;

impl QRSolver {
    pub fn new() -> Self {
        QRSolver
    }
}

impl DenseLinearSolver for QRSolver {
    fn solve_normal_equation(
        &self,
        hessian: &DMatrix<f64>,
        gradient: &DVector<f64>,
    ) -> LinAlgResult<DVector<f64>> {
        check_system(hessian, gradient)?;
        let qr = hessian.clone().qr();
        if is_rank_deficient(&qr.r()) {
            return Err(LinAlgError::SingularMatrix);
        }
        let dx = qr.solve(gradient).ok_or(LinAlgError::SingularMatrix)?;
        ensure_finite_vector(dx)
    }

    fn compute_covariance_matrix(&self, hessian: &DMatrix<f64>) -> LinAlgResult<DMatrix<f64>> {
        if hessian.nrows() != hessian.ncols() {
            return Err(LinAlgError::DimensionMismatch {
                expected: hessian.nrows(),
                actual: hessian.ncols(),
            }
            .log());
        }
        let qr = hessian.clone().qr();
        if is_rank_deficient(&qr.r()) {
            return Err(LinAlgError::SingularMatrix);
        }
        let inverse = qr.try_inverse().ok_or(LinAlgError::SingularMatrix)?;
        ensure_finite_matrix(inverse)
    }
}

/// Round-off leaves tiny non-zero pivots on singular input, so compare the smallest
/// pivot of R against the largest one instead of testing for exact zeros.
fn is_rank_deficient(r: &DMatrix<f64>) -> bool {
    let n = r.nrows().min(r.ncols());
    if n == 0 {
        return false;
    }
    let pivots = (0..n).map(|i| r[(i, i)].abs());
    let max = pivots.clone().fold(0.0_f64, f64::max);
    let min = pivots.fold(f64::INFINITY, f64::min);
    max == 0.0 || min <= f64::EPSILON * max * n as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::linalg::CholeskySolver;
    use nalgebra::{dmatrix, dvector};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_qr_matches_cholesky_on_spd_system() -> TestResult {
        let h = dmatrix![5.0, 1.0, 0.5; 1.0, 4.0, 0.2; 0.5, 0.2, 3.0];
        let g = dvector![1.0, -2.0, 0.5];
        let qr = QRSolver::new().solve_augmented_equation(&h, &g, 0.1)?;
        let chol = CholeskySolver::new().solve_augmented_equation(&h, &g, 0.1)?;
        assert!((qr - chol).norm() < 1e-10);
        Ok(())
    }

    #[test]
    fn test_qr_handles_indefinite_system() -> TestResult {
        let h = dmatrix![1.0, 2.0; 2.0, 1.0];
        let g = dvector![3.0, 3.0];
        let dx = QRSolver::new().solve_normal_equation(&h, &g)?;
        assert!((dx - dvector![1.0, 1.0]).norm() < 1e-12);
        assert!(CholeskySolver::new().solve_normal_equation(&h, &g).is_err());
        Ok(())
    }

    #[test]
    fn test_qr_singular_inverse_fails() {
        let h = dmatrix![1.0, 1.0; 1.0, 1.0];
        assert!(QRSolver::new().compute_covariance_matrix(&h).is_err());
    }
}

//! Covariance of the observed data and the weighting it induces.
//!
//! The weight matrix of the fit is `W = Cov(Y)⁻¹`. Uncorrelated data only stores the
//! N variances and weights with elementwise reciprocals; correlated data stores the
//! full N×N matrix together with its inverse, computed once through a Cholesky
//! factorization when the covariance is set.

use nalgebra::{DMatrix, DVector};

use super::{CoreError, CoreResult};

/// Relative tolerance for the symmetry check on a full covariance matrix.
const SYMMETRY_TOLERANCE: f64 = 1e-10;

#[derive(Debug, Clone, PartialEq)]
pub enum DataCovariance {
    /// Independent errors: one variance per observation.
    Diagonal(DVector<f64>),
    /// Correlated errors: covariance matrix and its inverse (information matrix).
    Full {
        covariance: DMatrix<f64>,
        information: DMatrix<f64>,
    },
}

impl DataCovariance {
    /// Build a diagonal covariance from per-observation variances.
    ///
    /// # Errors
    /// `CoreError::InvalidCovariance` if any variance is non-positive or not finite.
    pub fn diagonal(variances: DVector<f64>) -> CoreResult<Self> {
        if let Some((index, value)) = variances
            .iter()
            .enumerate()
            .find(|(_, v)| !(v.is_finite() && **v > 0.0))
        {
            return Err(CoreError::InvalidCovariance(format!(
                "variance {index} is {value}, must be positive and finite"
            ))
            .log());
        }
        Ok(DataCovariance::Diagonal(variances))
    }

    /// Build a full covariance, checking symmetry and positive definiteness.
    ///
    /// # Errors
    /// `CoreError::InvalidCovariance` if the matrix is not square, not symmetric,
    /// contains non-finite values or is not positive definite.
    pub fn full(covariance: DMatrix<f64>) -> CoreResult<Self> {
        let n = covariance.nrows();
        if covariance.ncols() != n {
            return Err(CoreError::InvalidCovariance(format!(
                "covariance must be square, got {}x{}",
                n,
                covariance.ncols()
            ))
            .log());
        }
        if covariance.iter().any(|v| !v.is_finite()) {
            return Err(CoreError::InvalidCovariance(
                "covariance contains non-finite entries".to_string(),
            )
            .log());
        }

        let scale = covariance.amax().max(f64::MIN_POSITIVE);
        for i in 0..n {
            for j in (i + 1)..n {
                if (covariance[(i, j)] - covariance[(j, i)]).abs() > SYMMETRY_TOLERANCE * scale {
                    return Err(CoreError::InvalidCovariance(format!(
                        "covariance is not symmetric at ({i}, {j})"
                    ))
                    .log());
                }
            }
        }

        let cholesky = covariance.clone().cholesky().ok_or_else(|| {
            CoreError::InvalidCovariance("covariance is not positive definite".to_string()).log()
        })?;
        let inverse = cholesky.inverse();
        let information = (&inverse + inverse.transpose()) * 0.5;

        Ok(DataCovariance::Full {
            covariance,
            information,
        })
    }

    /// Number of observations this covariance describes.
    pub fn dimension(&self) -> usize {
        match self {
            DataCovariance::Diagonal(variances) => variances.len(),
            DataCovariance::Full { covariance, .. } => covariance.nrows(),
        }
    }

    pub fn is_diagonal(&self) -> bool {
        matches!(self, DataCovariance::Diagonal(_))
    }

    /// `W·r`
    pub fn weigh(&self, residuals: &DVector<f64>) -> DVector<f64> {
        match self {
            DataCovariance::Diagonal(variances) => residuals.component_div(variances),
            DataCovariance::Full { information, .. } => information * residuals,
        }
    }

    /// `W·J`, used to form `JᵗWJ` and `JᵗWr` without materialising a diagonal `W`.
    pub fn weigh_rows(&self, jacobian: &DMatrix<f64>) -> DMatrix<f64> {
        match self {
            DataCovariance::Diagonal(variances) => {
                let mut weighted = jacobian.clone();
                for i in 0..weighted.nrows() {
                    let w = 1.0 / variances[i];
                    for k in 0..weighted.ncols() {
                        weighted[(i, k)] *= w;
                    }
                }
                weighted
            }
            DataCovariance::Full { information, .. } => information * jacobian,
        }
    }

    /// Chi-square of a residual vector, `rᵗ·W·r`.
    pub fn chi2(&self, residuals: &DVector<f64>) -> f64 {
        match self {
            DataCovariance::Diagonal(variances) => residuals
                .iter()
                .zip(variances.iter())
                .map(|(r, v)| r * r / v)
                .sum(),
            DataCovariance::Full { information, .. } => {
                residuals.dot(&(information * residuals))
            }
        }
    }

    /// Propagate the data covariance through a sensitivity matrix `D` (N×M):
    /// returns `Dᵗ·Cov(Y)·D` (M×M).
    pub fn propagate(&self, sensitivity: &DMatrix<f64>) -> DMatrix<f64> {
        match self {
            DataCovariance::Diagonal(variances) => {
                let mut scaled = sensitivity.clone();
                for i in 0..scaled.nrows() {
                    for k in 0..scaled.ncols() {
                        scaled[(i, k)] *= variances[i];
                    }
                }
                sensitivity.transpose() * scaled
            }
            DataCovariance::Full { covariance, .. } => {
                sensitivity.transpose() * covariance * sensitivity
            }
        }
    }

    /// Dense N×N covariance matrix.
    pub fn to_matrix(&self) -> DMatrix<f64> {
        match self {
            DataCovariance::Diagonal(variances) => DMatrix::from_diagonal(variances),
            DataCovariance::Full { covariance, .. } => covariance.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{dmatrix, dvector};

    type TestResult = Result<(), Box<dyn std::error::Error>>;

    #[test]
    fn test_diagonal_rejects_non_positive_variance() {
        assert!(DataCovariance::diagonal(dvector![1.0, 0.0, 2.0]).is_err());
        assert!(DataCovariance::diagonal(dvector![1.0, -3.0]).is_err());
        assert!(DataCovariance::diagonal(dvector![f64::NAN]).is_err());
    }

    #[test]
    fn test_full_rejects_asymmetric_and_indefinite() {
        let asymmetric = dmatrix![1.0, 0.5; 0.2, 1.0];
        assert!(matches!(
            DataCovariance::full(asymmetric),
            Err(CoreError::InvalidCovariance(_))
        ));

        let indefinite = dmatrix![1.0, 2.0; 2.0, 1.0];
        assert!(matches!(
            DataCovariance::full(indefinite),
            Err(CoreError::InvalidCovariance(_))
        ));

        let rectangular = DMatrix::<f64>::zeros(2, 3);
        assert!(DataCovariance::full(rectangular).is_err());
    }

    #[test]
    fn test_diagonal_and_full_weigh_identically() -> TestResult {
        let variances = dvector![0.5, 2.0, 4.0];
        let diagonal = DataCovariance::diagonal(variances.clone())?;
        let full = DataCovariance::full(DMatrix::from_diagonal(&variances))?;
        let r = dvector![1.0, -2.0, 3.0];
        let j = dmatrix![1.0, 0.0; 0.0, 1.0; 1.0, 1.0];

        assert!((diagonal.chi2(&r) - full.chi2(&r)).abs() < 1e-12);
        assert!((diagonal.weigh(&r) - full.weigh(&r)).norm() < 1e-12);
        assert!((diagonal.weigh_rows(&j) - full.weigh_rows(&j)).norm() < 1e-12);
        assert!((diagonal.propagate(&j) - full.propagate(&j)).norm() < 1e-12);
        Ok(())
    }

    #[test]
    fn test_chi2_with_correlated_errors() -> TestResult {
        let cov = DataCovariance::full(dmatrix![2.0, 1.0; 1.0, 2.0])?;
        // inverse = 1/3 * [2 -1; -1 2]
        let r = dvector![1.0, 1.0];
        assert!((cov.chi2(&r) - 2.0 / 3.0).abs() < 1e-12);
        assert_eq!(cov.dimension(), 2);
        assert!(!cov.is_diagonal());
        Ok(())
    }

    #[test]
    fn test_to_matrix_round_trips_diagonal() -> TestResult {
        let cov = DataCovariance::diagonal(dvector![1.0, 3.0])?;
        assert_eq!(cov.to_matrix(), dmatrix![1.0, 0.0; 0.0, 3.0]);
        Ok(())
    }
}

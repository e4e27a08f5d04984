//! Post-fit statistics derived from a parameter covariance matrix.

use nalgebra::{DMatrix, DVector};
use std::{
    fmt,
    fmt::{Display, Formatter},
};

use super::{CoreError, CoreResult};

/// Degrees of freedom `N − M` of a fit.
///
/// # Errors
/// `CoreError::InsufficientDegreesOfFreedom` when `N ≤ M`: the reduced chi-square
/// would be a division by zero or a negative count.
pub fn degrees_of_freedom(observations: usize, parameters: usize) -> CoreResult<usize> {
    if observations <= parameters {
        return Err(CoreError::InsufficientDegreesOfFreedom {
            observations,
            parameters,
        }
        .log());
    }
    Ok(observations - parameters)
}

/// Asymptotic standard errors, `sqrt(cov(i,i))`.
///
/// # Errors
/// `CoreError::InvalidCovariance` if a diagonal entry is negative or not finite.
pub fn standard_errors(covariance: &DMatrix<f64>) -> CoreResult<DVector<f64>> {
    let diagonal = covariance.diagonal();
    if let Some((i, v)) = diagonal
        .iter()
        .enumerate()
        .find(|(_, v)| !(v.is_finite() && **v >= 0.0))
    {
        return Err(CoreError::InvalidCovariance(format!(
            "parameter variance {i} is {v}"
        ))
        .log());
    }
    Ok(diagonal.map(f64::sqrt))
}

/// Correlation matrix, `cov(i,j) / sqrt(cov(i,i)·cov(j,j))`.
///
/// # Errors
/// `CoreError::InvalidCovariance` if any variance is not strictly positive.
pub fn correlation(covariance: &DMatrix<f64>) -> CoreResult<DMatrix<f64>> {
    let sigma = standard_errors(covariance)?;
    if let Some(i) = sigma.iter().position(|s| *s == 0.0) {
        return Err(CoreError::InvalidCovariance(format!(
            "parameter {i} has zero variance, correlation undefined"
        ))
        .log());
    }
    let n = covariance.nrows();
    Ok(DMatrix::from_fn(n, n, |i, j| {
        if i == j {
            1.0
        } else {
            covariance[(i, j)] / (sigma[i] * sigma[j])
        }
    }))
}

/// Snapshot of the goodness-of-fit and uncertainty figures of a fit.
#[derive(Debug, Clone)]
pub struct FitStatistics {
    pub chi2: f64,
    pub reduced_chi2: f64,
    pub degrees_of_freedom: usize,
    /// Parameter covariance (direct estimator)
    pub covariance: DMatrix<f64>,
    pub correlation: DMatrix<f64>,
    pub standard_errors: DVector<f64>,
}

impl Display for FitStatistics {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Chi-square:          {:.6e}", self.chi2)?;
        writeln!(f, "Degrees of freedom:  {}", self.degrees_of_freedom)?;
        writeln!(f, "Reduced chi-square:  {:.6}", self.reduced_chi2)?;
        writeln!(f, "Standard errors:")?;
        for (i, e) in self.standard_errors.iter().enumerate() {
            writeln!(f, "  p{i:<3} {e:.6e}")?;
        }
        writeln!(f, "Correlation:")?;
        for row in self.correlation.row_iter() {
            let line: Vec<String> = row.iter().map(|c| format!("{c:>7.3}")).collect();
            writeln!(f, "  {}", line.join(" "))?;
        }
        Ok(())
    }
}

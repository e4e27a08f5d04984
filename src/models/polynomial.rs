//! Polynomial curve fit.

use nalgebra::{DMatrix, DVector};

use super::{ModelError, ModelResult, ResidualModel};

/// Polynomial of fixed degree in one variable.
///
/// # Mathematical Formulation
///
/// ```text
/// f(x, P) = a_0 + a_1·x + a_2·x² + ... + a_d·x^d
/// ```
///
/// The model is linear in its parameters, so the Jacobian `J[i][k] = x_i^k` does not
/// depend on `P` and a single Gauss-Newton step reaches the least-squares solution.
///
/// # Example
///
/// ```
/// use asteria_lm::models::{PolynomialFitter, ResidualModel};
/// use nalgebra::dvector;
///
/// let fitter = PolynomialFitter::new(vec![0.0, 1.0, 2.0], 1).unwrap();
/// let values = fitter.model(&dvector![1.0, 2.0]);
/// assert_eq!(values, dvector![1.0, 3.0, 5.0]);
/// ```
#[derive(Debug, Clone)]
pub struct PolynomialFitter {
    x: Vec<f64>,
    degree: usize,
}

impl PolynomialFitter {
    /// # Errors
    /// `ModelError::InvalidInput` if any abscissa is not finite.
    pub fn new(x: Vec<f64>, degree: usize) -> ModelResult<Self> {
        if x.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::InvalidInput("abscissae must be finite".to_string()).log());
        }
        Ok(Self { x, degree })
    }

    pub fn degree(&self) -> usize {
        self.degree
    }

    pub fn abscissae(&self) -> &[f64] {
        &self.x
    }

    /// Evaluate the polynomial at an arbitrary point (Horner's scheme).
    pub fn evaluate(coefficients: &DVector<f64>, x: f64) -> f64 {
        coefficients.iter().rev().fold(0.0, |acc, a| acc * x + a)
    }
}

impl ResidualModel for PolynomialFitter {
    fn num_parameters(&self) -> usize {
        self.degree + 1
    }

    fn num_observations(&self) -> usize {
        self.x.len()
    }

    fn model(&self, params: &DVector<f64>) -> DVector<f64> {
        DVector::from_iterator(
            self.x.len(),
            self.x.iter().map(|&x| Self::evaluate(params, x)),
        )
    }

    fn jacobian(&self, _params: &DVector<f64>) -> Option<DMatrix<f64>> {
        Some(DMatrix::from_fn(self.x.len(), self.degree + 1, |i, k| {
            self.x[i].powi(k as i32)
        }))
    }
}

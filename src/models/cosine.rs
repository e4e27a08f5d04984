//! Cosine curve fit, used for periodic signals such as sidereal-rate modulations.

use nalgebra::{DMatrix, DVector};

use super::{ModelError, ModelResult, ResidualModel};

/// Two-parameter cosine `f(t, P) = a·cos(ω·t)` with `P = [a, ω]`.
///
/// Analytic Jacobian:
///
/// ```text
/// ∂f/∂a = cos(ω t)
/// ∂f/∂ω = −a·t·sin(ω t)
/// ```
#[derive(Debug, Clone)]
pub struct CosineFitter {
    t: Vec<f64>,
}

impl CosineFitter {
    /// # Errors
    /// `ModelError::InvalidInput` if any sample time is not finite.
    pub fn new(t: Vec<f64>) -> ModelResult<Self> {
        if t.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::InvalidInput("sample times must be finite".to_string()).log());
        }
        Ok(Self { t })
    }

    pub fn sample_times(&self) -> &[f64] {
        &self.t
    }
}

impl ResidualModel for CosineFitter {
    fn num_parameters(&self) -> usize {
        2
    }

    fn num_observations(&self) -> usize {
        self.t.len()
    }

    fn model(&self, params: &DVector<f64>) -> DVector<f64> {
        let (a, omega) = (params[0], params[1]);
        DVector::from_iterator(self.t.len(), self.t.iter().map(|t| a * (omega * t).cos()))
    }

    fn jacobian(&self, params: &DVector<f64>) -> Option<DMatrix<f64>> {
        let (a, omega) = (params[0], params[1]);
        let mut jac = DMatrix::zeros(self.t.len(), 2);
        for (i, t) in self.t.iter().enumerate() {
            let (sin, cos) = (omega * t).sin_cos();
            jac[(i, 0)] = cos;
            jac[(i, 1)] = -a * t * sin;
        }
        Some(jac)
    }
}

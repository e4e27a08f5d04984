//! Jacobian evaluation: analytic when the model provides it, otherwise central
//! finite differences.
//!
//! ```text
//! J[:, j] = (f(P + h_j·e_j) − f(P − h_j·e_j)) / (2·h_j)
//! ```
//!
//! Each column costs two model evaluations and has O(h²) truncation error. The
//! perturbed parameters pass through [`ResidualModel::post_parameter_update`] before
//! evaluation, so the columns differentiate the constrained model. With the
//! `parallel` feature the columns are evaluated on the rayon thread pool.

use nalgebra::{DMatrix, DVector};

#[cfg(feature = "parallel")]
use rayon::prelude::*;

use crate::models::{ModelError, ModelResult, ResidualModel};

/// Evaluate the model and check it returned N values.
pub fn evaluate_model<R: ResidualModel + ?Sized>(
    model: &R,
    params: &DVector<f64>,
) -> ModelResult<DVector<f64>> {
    let values = model.model(params);
    if values.len() != model.num_observations() {
        return Err(ModelError::InvalidDimension {
            context: "model values",
            expected: model.num_observations(),
            actual: values.len(),
        }
        .log());
    }
    Ok(values)
}

/// N×M Jacobian at `params`, analytic if available.
pub fn evaluate_jacobian<R: ResidualModel + ?Sized>(
    model: &R,
    params: &DVector<f64>,
    default_step: f64,
) -> ModelResult<DMatrix<f64>> {
    match model.jacobian(params) {
        Some(jacobian) => {
            if jacobian.nrows() != model.num_observations() {
                return Err(ModelError::InvalidDimension {
                    context: "jacobian rows",
                    expected: model.num_observations(),
                    actual: jacobian.nrows(),
                }
                .log());
            }
            if jacobian.ncols() != model.num_parameters() {
                return Err(ModelError::InvalidDimension {
                    context: "jacobian columns",
                    expected: model.num_parameters(),
                    actual: jacobian.ncols(),
                }
                .log());
            }
            Ok(jacobian)
        }
        None => {
            let steps = model.finite_difference_steps(default_step);
            finite_difference_jacobian(model, params, &steps)
        }
    }
}

/// Central finite-difference Jacobian with per-parameter steps.
///
/// # Errors
/// `ModelError::InvalidParameters` if a step is zero or not finite, or
/// `ModelError::InvalidDimension` if the steps or model output have the wrong length.
pub fn finite_difference_jacobian<R: ResidualModel + ?Sized>(
    model: &R,
    params: &DVector<f64>,
    steps: &DVector<f64>,
) -> ModelResult<DMatrix<f64>> {
    let m = model.num_parameters();
    if steps.len() != m {
        return Err(ModelError::InvalidDimension {
            context: "finite-difference steps",
            expected: m,
            actual: steps.len(),
        }
        .log());
    }
    if let Some(j) = steps.iter().position(|h| !(h.is_finite() && *h != 0.0)) {
        return Err(ModelError::InvalidParameters(format!(
            "finite-difference step for parameter {j} is {}",
            steps[j]
        ))
        .log());
    }

    let column = |j: usize| -> ModelResult<DVector<f64>> {
        let h = steps[j];
        let mut forward = params.clone();
        forward[j] += h;
        model.post_parameter_update(&mut forward);
        let mut backward = params.clone();
        backward[j] -= h;
        model.post_parameter_update(&mut backward);
        let f_forward = evaluate_model(model, &forward)?;
        let f_backward = evaluate_model(model, &backward)?;
        Ok((f_forward - f_backward) / (2.0 * h))
    };

    #[cfg(feature = "parallel")]
    let columns: Vec<DVector<f64>> = (0..m)
        .into_par_iter()
        .map(column)
        .collect::<ModelResult<_>>()?;

    #[cfg(not(feature = "parallel"))]
    let columns: Vec<DVector<f64>> = (0..m).map(column).collect::<ModelResult<_>>()?;

    if columns.is_empty() {
        return Ok(DMatrix::zeros(model.num_observations(), 0));
    }
    Ok(DMatrix::from_columns(&columns))
}

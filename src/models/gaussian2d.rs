//! Elliptical 2-D Gaussian source fit on an image stamp.
//!
//! ```text
//! f(x, y, P) = A·exp(−((x − x0)²/(2σx²) + (y − y0)²/(2σy²))) + B
//! P = [A, x0, y0, σx, σy, B]
//! ```
//!
//! Pixel coordinates are absolute image coordinates, so the fitted `x0`, `y0` are
//! sub-pixel source positions in the original frame.

use nalgebra::{DMatrix, DVector};

use super::{ModelError, ModelResult, ResidualModel};

/// Parameter indices.
pub const AMPLITUDE: usize = 0;
pub const X0: usize = 1;
pub const Y0: usize = 2;
pub const SIGMA_X: usize = 3;
pub const SIGMA_Y: usize = 4;
pub const BACKGROUND: usize = 5;

/// Smallest width returned by the moment-based initial guess, in pixels.
const MIN_SIGMA_ESTIMATE: f64 = 0.5;

#[derive(Debug, Clone)]
pub struct Gaussian2dFitter {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl Gaussian2dFitter {
    /// Fitter over explicit pixel coordinates.
    ///
    /// # Errors
    /// `ModelError::InvalidDimension` if the coordinate lists differ in length.
    pub fn new(x: Vec<f64>, y: Vec<f64>) -> ModelResult<Self> {
        if x.len() != y.len() {
            return Err(ModelError::InvalidDimension {
                context: "gaussian pixel coordinates",
                expected: x.len(),
                actual: y.len(),
            }
            .log());
        }
        Ok(Self { x, y })
    }

    /// Extract the `(2r+1)²` stamp centred on pixel `(cx, cy)` from a row-major image.
    ///
    /// Returns the fitter and the stamp pixel values in matching order.
    ///
    /// # Errors
    /// `ModelError::InvalidInput` if the image buffer does not match `width × height`
    /// or the stamp does not fit inside the image.
    pub fn from_stamp(
        pixels: &[f64],
        width: usize,
        height: usize,
        cx: usize,
        cy: usize,
        radius: usize,
    ) -> ModelResult<(Self, DVector<f64>)> {
        if width.checked_mul(height) != Some(pixels.len()) {
            return Err(ModelError::InvalidInput(format!(
                "image buffer has {} pixels, expected {width}x{height}",
                pixels.len()
            ))
            .log());
        }
        let inside = |centre: usize, extent: usize| {
            centre >= radius && centre.checked_add(radius).is_some_and(|edge| edge < extent)
        };
        if !(inside(cx, width) && inside(cy, height)) {
            return Err(ModelError::InvalidInput(format!(
                "stamp of radius {radius} at ({cx}, {cy}) leaves the {width}x{height} image"
            ))
            .log());
        }

        let side = 2 * radius + 1;
        let mut x = Vec::with_capacity(side * side);
        let mut y = Vec::with_capacity(side * side);
        let mut values = Vec::with_capacity(side * side);
        for row in (cy - radius)..=(cy + radius) {
            for col in (cx - radius)..=(cx + radius) {
                x.push(col as f64);
                y.push(row as f64);
                values.push(pixels[row * width + col]);
            }
        }
        Ok((Self { x, y }, DVector::from_vec(values)))
    }

    /// Moment-based starting point for a fit of `data`.
    ///
    /// The background is the minimum pixel, the amplitude the peak above it, and the
    /// centre and widths the first and second moments of the background-subtracted
    /// stamp.
    ///
    /// # Errors
    /// `ModelError::InvalidDimension` if `data` does not match the pixel count, or
    /// `ModelError::InvalidInput` for an empty or non-finite stamp.
    pub fn estimate_parameters(&self, data: &DVector<f64>) -> ModelResult<DVector<f64>> {
        if data.len() != self.x.len() {
            return Err(ModelError::InvalidDimension {
                context: "gaussian stamp data",
                expected: self.x.len(),
                actual: data.len(),
            }
            .log());
        }
        if data.is_empty() || data.iter().any(|v| !v.is_finite()) {
            return Err(ModelError::InvalidInput(
                "stamp must be non-empty and finite".to_string(),
            )
            .log());
        }

        let background = data.min();
        let amplitude = data.max() - background;

        let mut total = 0.0;
        let (mut mx, mut my) = (0.0, 0.0);
        for ((x, y), v) in self.x.iter().zip(&self.y).zip(data.iter()) {
            let w = v - background;
            total += w;
            mx += w * x;
            my += w * y;
        }
        if total <= 0.0 {
            // Flat stamp: centre of the window, unit widths.
            let n = self.x.len() as f64;
            let cx = self.x.iter().sum::<f64>() / n;
            let cy = self.y.iter().sum::<f64>() / n;
            return Ok(DVector::from_vec(vec![amplitude, cx, cy, 1.0, 1.0, background]));
        }
        mx /= total;
        my /= total;

        let (mut vx, mut vy) = (0.0, 0.0);
        for ((x, y), v) in self.x.iter().zip(&self.y).zip(data.iter()) {
            let w = v - background;
            vx += w * (x - mx).powi(2);
            vy += w * (y - my).powi(2);
        }
        let sigma_x = (vx / total).sqrt().max(MIN_SIGMA_ESTIMATE);
        let sigma_y = (vy / total).sqrt().max(MIN_SIGMA_ESTIMATE);

        Ok(DVector::from_vec(vec![
            amplitude, mx, my, sigma_x, sigma_y, background,
        ]))
    }

    pub fn num_pixels(&self) -> usize {
        self.x.len()
    }
}

impl ResidualModel for Gaussian2dFitter {
    fn num_parameters(&self) -> usize {
        6
    }

    fn num_observations(&self) -> usize {
        self.x.len()
    }

    fn model(&self, p: &DVector<f64>) -> DVector<f64> {
        let (sx2, sy2) = (p[SIGMA_X] * p[SIGMA_X], p[SIGMA_Y] * p[SIGMA_Y]);
        DVector::from_iterator(
            self.x.len(),
            self.x.iter().zip(&self.y).map(|(x, y)| {
                let dx = x - p[X0];
                let dy = y - p[Y0];
                p[AMPLITUDE] * (-(dx * dx / (2.0 * sx2) + dy * dy / (2.0 * sy2))).exp()
                    + p[BACKGROUND]
            }),
        )
    }

    fn jacobian(&self, p: &DVector<f64>) -> Option<DMatrix<f64>> {
        let (a, sx, sy) = (p[AMPLITUDE], p[SIGMA_X], p[SIGMA_Y]);
        let (sx2, sy2) = (sx * sx, sy * sy);
        let mut jac = DMatrix::zeros(self.x.len(), 6);
        for (i, (x, y)) in self.x.iter().zip(&self.y).enumerate() {
            let dx = x - p[X0];
            let dy = y - p[Y0];
            let e = (-(dx * dx / (2.0 * sx2) + dy * dy / (2.0 * sy2))).exp();
            let ae = a * e;
            jac[(i, AMPLITUDE)] = e;
            jac[(i, X0)] = ae * dx / sx2;
            jac[(i, Y0)] = ae * dy / sy2;
            jac[(i, SIGMA_X)] = ae * dx * dx / (sx2 * sx);
            jac[(i, SIGMA_Y)] = ae * dy * dy / (sy2 * sy);
            jac[(i, BACKGROUND)] = 1.0;
        }
        Some(jac)
    }

    fn post_parameter_update(&self, params: &mut DVector<f64>) {
        // The model only sees σ², keep the reported widths positive.
        params[SIGMA_X] = params[SIGMA_X].abs();
        params[SIGMA_Y] = params[SIGMA_Y].abs();
    }
}

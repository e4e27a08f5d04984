//! # Asteria LM
//!
//! Levenberg-Marquardt nonlinear least-squares fitting with known data covariance,
//! built for a meteor-camera pipeline: camera orientation and intrinsics from star
//! cross-matches, curve fits, and 2-D Gaussian source fits on image stamps.
//!
//! ## Features
//!
//! - **Marquardt-scaled damping** with automatic starting value and damping limit
//! - **Analytic or numeric Jacobians**: models may supply `∂f/∂P`, otherwise central
//!   finite differences with per-parameter steps are used (optionally on the rayon
//!   pool with the `parallel` feature)
//! - **Diagonal or full data covariance** weighting
//! - **Two parameter covariance estimators**: the direct `reduced χ² · (JᵗWJ)⁻¹` and a
//!   propagation of the data covariance through a fourth-order numeric `dP/dY`
//! - **Dense linear algebra backends**: Cholesky and QR over `nalgebra`
//!
//! ## Quick start
//!
//! ```
//! use asteria_lm::{CosineFitter, LevenbergMarquardt, LevenbergMarquardtConfig};
//! use asteria_lm::models::ResidualModel;
//! use nalgebra::{DVector, dvector};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let t: Vec<f64> = (0..40).map(|i| 0.1 * f64::from(i)).collect();
//! let fitter = CosineFitter::new(t)?;
//! let data = fitter.model(&dvector![2.0, 1.5]);
//!
//! let config = LevenbergMarquardtConfig::new().with_exit_tolerance(1e-12);
//! let mut solver = LevenbergMarquardt::with_config(fitter, config)?;
//! solver.set_data(data)?;
//! solver.set_variance(DVector::from_element(40, 1e-4))?;
//! solver.set_parameters(dvector![1.8, 1.4])?;
//! solver.fit(100, false)?;
//!
//! assert!((solver.parameters()[1] - 1.5).abs() < 1e-6);
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod error;
pub mod linalg;
#[cfg(feature = "logging")]
pub mod logger;
pub mod models;
pub mod observers;
pub mod optimizer;

pub use core::{DataCovariance, FitStatistics};
pub use error::{AsteriaError, AsteriaResult};

pub use linalg::{CholeskySolver, DenseLinearSolver, LinearSolverType, QRSolver};
#[cfg(feature = "logging")]
pub use logger::{init_logger, init_logger_with_level};
pub use models::{
    CosineFitter, CrossMatch, Gaussian2dFitter, GeoCalFitter, PinholeIntrinsics,
    PolynomialFitter, ResidualModel,
};
pub use observers::{FitObserver, ParameterHistory};
pub use optimizer::{
    FitSummary, IterationOutcome, IterationStats, LevenbergMarquardt, LevenbergMarquardtConfig,
    OptimizationStatus,
};

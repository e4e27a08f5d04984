//! Levenberg-Marquardt algorithm implementation.
//!
//! The solver minimises the weighted chi-square of a model against observed data
//!
//! ```text
//! χ²(P) = Rᵗ·W·R,   R = Y − f(P),   W = Cov(Y)⁻¹
//! ```
//!
//! # Algorithm Overview
//!
//! Each iteration solves the damped normal equations with Marquardt scaling:
//!
//! ```text
//! (JᵗWJ + λ·diag(JᵗWJ))·Δ = JᵗWR
//! ```
//!
//! where `J` is the N×M Jacobian of the model (analytic or central finite
//! differences). The trial parameters `P + Δ` are passed through the model's
//! post-update hook and accepted only if they lower χ².
//!
//! ## Damping Strategy
//!
//! - The starting damping is `λ₀ = 10⁻³ · mean(diag(JᵗWJ))` at the initial parameters.
//! - Accepted steps divide λ by the boost/shrink factor, rejected steps multiply it.
//! - The fit is stuck once λ exceeds `λ₀ · max_damping`.
//!
//! A failed linear solve (singular or indefinite system) is treated as a rejected step.
//! The linearization at the current parameters is reused until a step is accepted.
//!
//! ## Termination
//!
//! - **Converged**: an accepted step reduced χ² by a relative amount below
//!   `exit_tolerance`, or χ² is exactly zero.
//! - **Damping limit**: λ exceeded its limit.
//! - **Iteration budget**: rejected steps count towards the budget.
//!
//! None of these are errors; the best parameters found are always kept.
//!
//! # Covariance Estimators
//!
//! - [`LevenbergMarquardt::parameter_covariance`]: `reduced χ² · (JᵗWJ)⁻¹`, inverted
//!   on the complement of the model's gauge directions when it declares any.
//! - [`LevenbergMarquardt::fourth_order_covariance`]: propagates `Cov(Y)` through the
//!   numerically differentiated solution `dP/dY`, obtained by re-fitting with each
//!   data point perturbed by `±h, ±2h`. It assumes the model is close to linear
//!   within a couple of standard deviations of the data; for such models it equals
//!   the direct estimate divided by the reduced chi-square.
//!
//! # Example
//!
//! ```
//! use asteria_lm::{LevenbergMarquardt, LevenbergMarquardtConfig, PolynomialFitter};
//! use nalgebra::{DVector, dvector};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let x: Vec<f64> = (0..10).map(f64::from).collect();
//! let y = DVector::from_iterator(10, x.iter().map(|x| 1.0 + 2.0 * x));
//!
//! let config = LevenbergMarquardtConfig::new().with_exit_tolerance(1e-10);
//! let mut solver = LevenbergMarquardt::with_config(PolynomialFitter::new(x, 1)?, config)?;
//! solver.set_data(y)?;
//! solver.set_variance(DVector::from_element(10, 0.01))?;
//! solver.set_parameters(dvector![0.0, 0.0])?;
//!
//! solver.fit(50, false)?;
//! assert!((solver.parameters()[1] - 2.0).abs() < 1e-9);
//! # Ok(())
//! # }
//! ```
//!
//! # References
//!
//! - Marquardt, D. W. (1963). "An Algorithm for Least-Squares Estimation of Nonlinear Parameters".
//! - Press, W. H. et al. (2007). *Numerical Recipes* (3rd ed.), section 15.5.

use crate::core::{
    CoreError, DataCovariance, FitStatistics, check_length,
    jacobian::{evaluate_jacobian, evaluate_model},
    statistics,
};
use crate::error::AsteriaResult;
use crate::linalg::{DenseLinearSolver, LinearSolverType, create_linear_solver};
use crate::models::ResidualModel;
use crate::observers::{FitObserver, FitObserverVec};
use crate::optimizer::{
    FitSummary, IterationOutcome, IterationStats, OptimizationStatus, OptimizerError,
};

use nalgebra::{DMatrix, DVector};
#[cfg(feature = "parallel")]
use rayon::prelude::*;
use tracing::{debug, info};
use web_time::Instant;

/// Starting damping relative to the mean diagonal of `JᵗWJ`.
const INITIAL_DAMPING_SCALE: f64 = 1e-3;

/// Configuration parameters for the Levenberg-Marquardt optimizer.
///
/// ```
/// use asteria_lm::LevenbergMarquardtConfig;
/// use asteria_lm::linalg::LinearSolverType;
///
/// let config = LevenbergMarquardtConfig::new()
///     .with_exit_tolerance(1e-10)
///     .with_boost_shrink_factor(5.0)
///     .with_linear_solver_type(LinearSolverType::QR);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone)]
pub struct LevenbergMarquardtConfig {
    /// Back end for the damped normal equations
    pub linear_solver_type: LinearSolverType,
    /// Iteration budget of the re-fits behind the propagated covariance
    pub max_iterations: usize,
    /// Data perturbation used for `dP/dY`, and the default finite-difference step
    /// for models without an analytic Jacobian
    pub h: f64,
    /// Relative chi-square change below which an accepted step ends the fit
    pub exit_tolerance: f64,
    /// Limit on the damping, as a multiple of the starting damping
    pub max_damping: f64,
    /// Factor by which the damping grows on rejected steps and shrinks on accepted ones
    pub boost_shrink_factor: f64,
}

impl Default for LevenbergMarquardtConfig {
    fn default() -> Self {
        Self {
            linear_solver_type: LinearSolverType::default(),
            max_iterations: 100,
            h: 1e-2,
            exit_tolerance: 1e-32,
            max_damping: 1e32,
            boost_shrink_factor: 10.0,
        }
    }
}

impl LevenbergMarquardtConfig {
    /// Create a new Levenberg-Marquardt configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the linear solver type
    pub fn with_linear_solver_type(mut self, linear_solver_type: LinearSolverType) -> Self {
        self.linear_solver_type = linear_solver_type;
        self
    }

    /// Set the iteration budget of the covariance propagation re-fits
    pub fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Set the finite-difference step
    pub fn with_h(mut self, h: f64) -> Self {
        self.h = h;
        self
    }

    pub fn with_exit_tolerance(mut self, exit_tolerance: f64) -> Self {
        self.exit_tolerance = exit_tolerance;
        self
    }

    /// Set the damping limit relative to the starting damping
    pub fn with_max_damping(mut self, max_damping: f64) -> Self {
        self.max_damping = max_damping;
        self
    }

    pub fn with_boost_shrink_factor(mut self, boost_shrink_factor: f64) -> Self {
        self.boost_shrink_factor = boost_shrink_factor;
        self
    }

    /// Check that every knob is usable.
    ///
    /// # Errors
    /// `CoreError::InvalidInput` naming the first offending value.
    pub fn validate(&self) -> Result<(), CoreError> {
        let invalid = |message: String| Err(CoreError::InvalidInput(message).log());
        if !(self.h.is_finite() && self.h > 0.0) {
            return invalid(format!("h must be positive and finite, got {}", self.h));
        }
        if !(self.exit_tolerance.is_finite() && self.exit_tolerance >= 0.0) {
            return invalid(format!(
                "exit tolerance must be non-negative and finite, got {}",
                self.exit_tolerance
            ));
        }
        if !(self.max_damping.is_finite() && self.max_damping >= 1.0) {
            return invalid(format!(
                "max damping must be at least 1 and finite, got {}",
                self.max_damping
            ));
        }
        if !(self.boost_shrink_factor.is_finite() && self.boost_shrink_factor > 1.0) {
            return invalid(format!(
                "boost/shrink factor must be greater than 1, got {}",
                self.boost_shrink_factor
            ));
        }
        if self.max_iterations == 0 {
            return invalid("propagation re-fits need at least one iteration".to_string());
        }
        Ok(())
    }

    /// Print configuration parameters
    pub fn print_configuration(&self) {
        debug!(
            "Configuration:\n  Solver:              Levenberg-Marquardt (Marquardt scaling)\n  Linear solver:       {}\n  Exit tolerance:      {:.2e}\n  Damping limit:       {:.2e} x initial\n  Boost/shrink factor: {:.2}\n  Step h:              {:.2e}\n  Re-fit iterations:   {}",
            self.linear_solver_type,
            self.exit_tolerance,
            self.max_damping,
            self.boost_shrink_factor,
            self.h,
            self.max_iterations
        );
    }
}

/// Residuals, chi-square and normal equations at one parameter set.
struct Linearization {
    chi2: f64,
    /// `JᵗWJ`
    hessian: DMatrix<f64>,
    /// `JᵗWR`
    gradient: DVector<f64>,
}

/// Everything a fit needs apart from the parameters it updates.
///
/// Borrowed from the solver so that the propagation re-fits can swap in perturbed
/// data without cloning the model.
struct FitProblem<'a, R: ResidualModel + ?Sized> {
    model: &'a R,
    data: &'a DVector<f64>,
    covariance: &'a DataCovariance,
    config: &'a LevenbergMarquardtConfig,
    linear_solver: Box<dyn DenseLinearSolver>,
}

impl<'a, R: ResidualModel + ?Sized> FitProblem<'a, R> {
    fn new(
        model: &'a R,
        data: Option<&'a DVector<f64>>,
        covariance: Option<&'a DataCovariance>,
        config: &'a LevenbergMarquardtConfig,
    ) -> AsteriaResult<Self> {
        let data = data.ok_or_else(|| CoreError::MissingInput("data").log())?;
        let covariance = covariance.ok_or_else(|| CoreError::MissingInput("covariance").log())?;
        Ok(Self {
            model,
            data,
            covariance,
            config,
            linear_solver: create_linear_solver(config.linear_solver_type),
        })
    }

    /// Same fit against different data.
    fn with_data<'b>(&'b self, data: &'b DVector<f64>) -> FitProblem<'b, R> {
        FitProblem {
            model: self.model,
            data,
            covariance: self.covariance,
            config: self.config,
            linear_solver: create_linear_solver(self.config.linear_solver_type),
        }
    }

    fn residuals(&self, params: &DVector<f64>) -> AsteriaResult<DVector<f64>> {
        Ok(self.data - evaluate_model(self.model, params)?)
    }

    fn chi2(&self, params: &DVector<f64>) -> AsteriaResult<f64> {
        Ok(self.covariance.chi2(&self.residuals(params)?))
    }

    fn linearize(&self, params: &DVector<f64>) -> AsteriaResult<Linearization> {
        let residuals = self.residuals(params)?;
        let chi2 = self.covariance.chi2(&residuals);
        if !chi2.is_finite() {
            return Err(OptimizerError::NumericalInstability(format!(
                "chi-square is {chi2} at the current parameters"
            ))
            .log()
            .into());
        }
        let jacobian = evaluate_jacobian(self.model, params, self.config.h)?;
        let weighted = self.covariance.weigh_rows(&jacobian);
        Ok(Linearization {
            chi2,
            hessian: jacobian.transpose() * &weighted,
            gradient: weighted.transpose() * residuals,
        })
    }

    /// Starting damping and the damping limit for a fit linearized at the start.
    fn damping_limits(&self, linearization: &Linearization) -> (f64, f64) {
        let initial = starting_damping(&linearization.hessian);
        (initial, initial * self.config.max_damping)
    }

    /// `(JᵗWJ)⁻¹`, restricted to the complement of the model's gauge directions `G`.
    ///
    /// With gauge directions the inverse is `Q·(H + s·GGᵗ)⁻¹·Q`, `Q = I − GGᵗ`, which
    /// is the pseudo-inverse of `H` when `H·G = 0`.
    fn inverse_normal_matrix(
        &self,
        hessian: &DMatrix<f64>,
        params: &DVector<f64>,
    ) -> AsteriaResult<DMatrix<f64>> {
        let invert = |matrix: &DMatrix<f64>| {
            self.linear_solver
                .compute_covariance_matrix(matrix)
                .map_err(|e| OptimizerError::from(e).log())
        };
        let Some(gauge) = self.model.gauge_directions(params) else {
            return Ok(invert(hessian)?);
        };
        check_length("gauge directions", params.len(), gauge.nrows())?;

        let projector = &gauge * gauge.transpose();
        let scale = starting_damping(hessian) / INITIAL_DAMPING_SCALE;
        let inverse = invert(&(hessian + &projector * scale))?;
        let complement = DMatrix::identity(params.len(), params.len()) - projector;
        Ok(&complement * inverse * &complement)
    }

    /// One damped Gauss-Newton step with accept/reject and damping update.
    ///
    /// `cache` holds the linearization at `params`; it is consumed and handed back
    /// unless the step moves the parameters.
    fn iteration(
        &self,
        params: &mut DVector<f64>,
        lambda: &mut f64,
        max_lambda: f64,
        index: usize,
        cache: &mut Option<Linearization>,
    ) -> AsteriaResult<IterationStats> {
        let start = Instant::now();
        let linearization = match cache.take() {
            Some(linearization) => linearization,
            None => self.linearize(params)?,
        };
        let chi2 = linearization.chi2;
        let gradient_norm = linearization.gradient.norm();
        let damping_before = *lambda;

        if chi2 == 0.0 {
            *cache = Some(linearization);
            return Ok(IterationStats {
                iteration: index,
                chi2,
                trial_chi2: chi2,
                gradient_norm,
                step_norm: 0.0,
                damping_before,
                damping_after: damping_before,
                accepted: false,
                outcome: IterationOutcome::Converged,
                iter_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            });
        }

        let trial = match self.linear_solver.solve_augmented_equation(
            &linearization.hessian,
            &linearization.gradient,
            *lambda,
        ) {
            Ok(step) => {
                let mut trial = &*params + &step;
                self.model.post_parameter_update(&mut trial);
                let trial_chi2 = self.chi2(&trial)?;
                Some((trial, trial_chi2, step.norm()))
            }
            Err(e) => {
                debug!("Iteration {index}: linear solve failed ({e}), rejecting step");
                None
            }
        };

        let boost = self.config.boost_shrink_factor;
        let (accepted, trial_chi2, step_norm) = match trial {
            Some((trial, trial_chi2, step_norm)) if trial_chi2 < chi2 => {
                *params = trial;
                *lambda /= boost;
                (true, trial_chi2, step_norm)
            }
            Some((_, trial_chi2, step_norm)) => {
                *lambda *= boost;
                (false, trial_chi2, step_norm)
            }
            None => {
                *lambda *= boost;
                (false, f64::NAN, 0.0)
            }
        };

        if !accepted {
            *cache = Some(linearization);
        }

        let outcome = if accepted && (chi2 - trial_chi2) / chi2 < self.config.exit_tolerance {
            IterationOutcome::Converged
        } else if *lambda > max_lambda {
            IterationOutcome::Stuck
        } else {
            IterationOutcome::Continue
        };

        Ok(IterationStats {
            iteration: index,
            chi2,
            trial_chi2,
            gradient_norm,
            step_norm,
            damping_before,
            damping_after: *lambda,
            accepted,
            outcome,
            iter_time_ms: start.elapsed().as_secs_f64() * 1000.0,
        })
    }

    /// Iterate from `params` until convergence, the damping limit or the budget.
    fn run<F>(
        &self,
        params: &mut DVector<f64>,
        max_iterations: usize,
        mut on_iteration: F,
    ) -> AsteriaResult<FitSummary>
    where
        F: FnMut(&DVector<f64>, &IterationStats),
    {
        let start = Instant::now();
        let initial = self.linearize(params)?;
        let initial_chi2 = initial.chi2;
        let (initial_damping, damping_limit) = self.damping_limits(&initial);
        let mut cache = Some(initial);
        let mut lambda = initial_damping;
        let mut history = Vec::with_capacity(max_iterations.min(256));
        let mut status = OptimizationStatus::MaxIterationsReached;

        for index in 0..max_iterations {
            let stats = self.iteration(params, &mut lambda, damping_limit, index, &mut cache)?;
            on_iteration(&*params, &stats);
            let outcome = stats.outcome;
            history.push(stats);
            match outcome {
                IterationOutcome::Continue => {}
                IterationOutcome::Converged => {
                    status = OptimizationStatus::Converged;
                    break;
                }
                IterationOutcome::Stuck => {
                    status = OptimizationStatus::DampingLimitReached;
                    break;
                }
            }
        }

        let accepted_steps = history.iter().filter(|s| s.accepted).count();
        Ok(FitSummary {
            status,
            iterations: history.len(),
            accepted_steps,
            rejected_steps: history.len() - accepted_steps,
            initial_chi2,
            final_chi2: self.chi2(params)?,
            initial_damping,
            final_damping: lambda,
            damping_limit,
            total_time: start.elapsed(),
            iteration_history: history,
        })
    }

    /// Solution re-fitted from `params` with data point `index` shifted by `offset`.
    fn refit_with_offset(
        &self,
        params: &DVector<f64>,
        index: usize,
        offset: f64,
    ) -> AsteriaResult<DVector<f64>> {
        let mut data = self.data.clone();
        data[index] += offset;
        let mut refit = params.clone();
        self.with_data(&data)
            .run(&mut refit, self.config.max_iterations, |_, _| {})?;
        Ok(refit)
    }

    /// `dP/dY_index` by the fourth-order central difference
    /// `(−P(+2h) + 8·P(+h) − 8·P(−h) + P(−2h)) / 12h`.
    fn parameter_sensitivity(
        &self,
        params: &DVector<f64>,
        index: usize,
    ) -> AsteriaResult<DVector<f64>> {
        let h = self.config.h;
        let plus_2h = self.refit_with_offset(params, index, 2.0 * h)?;
        let plus_h = self.refit_with_offset(params, index, h)?;
        let minus_h = self.refit_with_offset(params, index, -h)?;
        let minus_2h = self.refit_with_offset(params, index, -2.0 * h)?;
        Ok((plus_h * 8.0 - minus_h * 8.0 - plus_2h + minus_2h) / (12.0 * h))
    }

    /// N×M matrix of `dP/dY`.
    fn jacobian_dpdx(&self, params: &DVector<f64>) -> AsteriaResult<DMatrix<f64>> {
        let n = self.data.len();

        #[cfg(feature = "parallel")]
        let rows: Vec<DVector<f64>> = (0..n)
            .into_par_iter()
            .map(|i| self.parameter_sensitivity(params, i))
            .collect::<AsteriaResult<_>>()?;

        #[cfg(not(feature = "parallel"))]
        let rows: Vec<DVector<f64>> = (0..n)
            .map(|i| self.parameter_sensitivity(params, i))
            .collect::<AsteriaResult<_>>()?;

        let mut dpdx = DMatrix::zeros(n, params.len());
        for (i, row) in rows.iter().enumerate() {
            dpdx.set_row(i, &row.transpose());
        }
        Ok(dpdx)
    }
}

/// `10⁻³ · mean(diag(H))`, falling back to `10⁻³` when the model has no slope.
fn starting_damping(hessian: &DMatrix<f64>) -> f64 {
    let mean = hessian.diagonal().mean();
    let lambda = INITIAL_DAMPING_SCALE * mean;
    if lambda.is_finite() && lambda > 0.0 {
        lambda
    } else {
        INITIAL_DAMPING_SCALE
    }
}

/// Levenberg-Marquardt solver bound to one residual model.
///
/// The model fixes the number of parameters M and observations N. Data, covariance
/// (or variances) and initial parameters are set before calling [`fit`](Self::fit);
/// all statistics are derived on demand from the current parameters, so they can be
/// queried after a fit or after setting parameters by hand.
///
/// # See Also
///
/// - [`LevenbergMarquardtConfig`] - Configuration options
/// - [`ResidualModel`] - What a fitter has to provide
pub struct LevenbergMarquardt<R: ResidualModel> {
    model: R,
    config: LevenbergMarquardtConfig,
    degrees_of_freedom: usize,
    parameters: DVector<f64>,
    data: Option<DVector<f64>>,
    covariance: Option<DataCovariance>,
    /// Damping at the end of the last fit
    damping: Option<f64>,
    /// Iterations taken through [`Self::iteration`] since the parameters were set
    manual_iterations: usize,
    /// Linearization at the current parameters, kept between manual iterations
    linearization: Option<Linearization>,
    observers: FitObserverVec,
}

impl<R: ResidualModel> LevenbergMarquardt<R> {
    /// Create a solver for `model` with the default configuration.
    ///
    /// # Errors
    /// `CoreError::InvalidInput` if the model has no parameters, or
    /// `CoreError::InsufficientDegreesOfFreedom` if `N ≤ M`.
    pub fn new(model: R) -> AsteriaResult<Self> {
        Self::with_config(model, LevenbergMarquardtConfig::default())
    }

    /// Create a solver with the given configuration.
    ///
    /// # Errors
    /// As [`Self::new`], plus `CoreError::InvalidInput` for an invalid configuration.
    pub fn with_config(model: R, config: LevenbergMarquardtConfig) -> AsteriaResult<Self> {
        config.validate()?;
        let m = model.num_parameters();
        if m == 0 {
            return Err(CoreError::InvalidInput("model has no free parameters".to_string())
                .log()
                .into());
        }
        let degrees_of_freedom = statistics::degrees_of_freedom(model.num_observations(), m)?;
        Ok(Self {
            model,
            config,
            degrees_of_freedom,
            parameters: DVector::zeros(m),
            data: None,
            covariance: None,
            damping: None,
            manual_iterations: 0,
            linearization: None,
            observers: FitObserverVec::new(),
        })
    }

    pub fn config(&self) -> &LevenbergMarquardtConfig {
        &self.config
    }

    /// # Errors
    /// `CoreError::InvalidInput` for an invalid configuration; the old one is kept.
    pub fn set_config(&mut self, config: LevenbergMarquardtConfig) -> AsteriaResult<()> {
        config.validate()?;
        self.config = config;
        self.linearization = None;
        Ok(())
    }

    pub fn model(&self) -> &R {
        &self.model
    }

    pub fn num_parameters(&self) -> usize {
        self.model.num_parameters()
    }

    pub fn num_observations(&self) -> usize {
        self.model.num_observations()
    }

    /// Set the observed data (length N).
    ///
    /// # Errors
    /// `CoreError::DimensionMismatch` or `CoreError::InvalidInput` for non-finite data.
    pub fn set_data(&mut self, data: DVector<f64>) -> AsteriaResult<()> {
        check_length("data", self.num_observations(), data.len())?;
        if let Some(i) = data.iter().position(|v| !v.is_finite()) {
            return Err(CoreError::InvalidInput(format!("data point {i} is not finite"))
                .log()
                .into());
        }
        self.data = Some(data);
        self.linearization = None;
        Ok(())
    }

    pub fn data(&self) -> Option<&DVector<f64>> {
        self.data.as_ref()
    }

    /// Set a full N×N data covariance matrix.
    ///
    /// # Errors
    /// `CoreError::DimensionMismatch`, or `CoreError::InvalidCovariance` if the matrix
    /// is not symmetric positive definite.
    pub fn set_covariance(&mut self, covariance: DMatrix<f64>) -> AsteriaResult<()> {
        check_length("covariance rows", self.num_observations(), covariance.nrows())?;
        self.covariance = Some(DataCovariance::full(covariance)?);
        self.linearization = None;
        Ok(())
    }

    /// Set independent per-observation variances (length N).
    ///
    /// # Errors
    /// `CoreError::DimensionMismatch`, or `CoreError::InvalidCovariance` for a
    /// non-positive variance.
    pub fn set_variance(&mut self, variance: DVector<f64>) -> AsteriaResult<()> {
        check_length("variance", self.num_observations(), variance.len())?;
        self.covariance = Some(DataCovariance::diagonal(variance)?);
        self.linearization = None;
        Ok(())
    }

    /// Set an already validated data covariance.
    pub fn set_data_covariance(&mut self, covariance: DataCovariance) -> AsteriaResult<()> {
        check_length("covariance", self.num_observations(), covariance.dimension())?;
        self.covariance = Some(covariance);
        self.linearization = None;
        Ok(())
    }

    pub fn data_covariance(&self) -> Option<&DataCovariance> {
        self.covariance.as_ref()
    }

    /// Set the parameters the next fit starts from (length M).
    ///
    /// # Errors
    /// `CoreError::DimensionMismatch` or `CoreError::InvalidInput` for non-finite values.
    pub fn set_parameters(&mut self, parameters: DVector<f64>) -> AsteriaResult<()> {
        check_length("parameters", self.num_parameters(), parameters.len())?;
        if let Some(i) = parameters.iter().position(|v| !v.is_finite()) {
            return Err(CoreError::InvalidInput(format!("parameter {i} is not finite"))
                .log()
                .into());
        }
        self.parameters = parameters;
        self.manual_iterations = 0;
        self.linearization = None;
        Ok(())
    }

    pub fn parameters(&self) -> &DVector<f64> {
        &self.parameters
    }

    /// Damping at the end of the last call to [`Self::fit`].
    pub fn damping(&self) -> Option<f64> {
        self.damping
    }

    /// Add an observer notified after every iteration of [`Self::fit`].
    pub fn add_observer(&mut self, observer: impl FitObserver + 'static) {
        self.observers.add(observer);
    }

    fn problem(&self) -> AsteriaResult<FitProblem<'_, R>> {
        FitProblem::new(
            &self.model,
            self.data.as_ref(),
            self.covariance.as_ref(),
            &self.config,
        )
    }

    /// Fit the model, starting from the current parameters.
    ///
    /// Iteration lines are logged at `info` level when `verbose`, at `debug` otherwise.
    ///
    /// # Errors
    /// `CoreError::MissingInput` if data or covariance were never set,
    /// `OptimizerError::NumericalInstability` if chi-square is not finite at the
    /// current parameters, or a `ModelError` from a misbehaving model.
    pub fn fit(&mut self, max_iterations: usize, verbose: bool) -> AsteriaResult<FitSummary> {
        let problem = FitProblem::new(
            &self.model,
            self.data.as_ref(),
            self.covariance.as_ref(),
            &self.config,
        )?;

        if verbose || tracing::enabled!(tracing::Level::DEBUG) {
            self.config.print_configuration();
            IterationStats::print_header(verbose);
        }

        let observers = &self.observers;
        let summary = problem.run(&mut self.parameters, max_iterations, |params, stats| {
            stats.print_line(verbose);
            observers.notify(params, stats);
        })?;

        self.damping = Some(summary.final_damping);
        self.manual_iterations = 0;
        self.linearization = None;
        if verbose {
            info!("{}", summary);
        } else {
            debug!("{}", summary);
        }
        Ok(summary)
    }

    /// Starting damping and damping limit for a fit from the current parameters,
    /// for callers driving [`Self::iteration`] themselves.
    pub fn damping_limits(&self) -> AsteriaResult<(f64, f64)> {
        let problem = self.problem()?;
        Ok(problem.damping_limits(&problem.linearize(&self.parameters)?))
    }

    /// Perform a single iteration, updating the parameters if the step is accepted
    /// and `lambda` either way.
    ///
    /// The returned statistics say whether the caller should stop.
    pub fn iteration(
        &mut self,
        lambda: &mut f64,
        max_lambda: f64,
        verbose: bool,
    ) -> AsteriaResult<IterationStats> {
        let problem = FitProblem::new(
            &self.model,
            self.data.as_ref(),
            self.covariance.as_ref(),
            &self.config,
        )?;
        let stats = problem.iteration(
            &mut self.parameters,
            lambda,
            max_lambda,
            self.manual_iterations,
            &mut self.linearization,
        )?;
        self.manual_iterations += 1;
        stats.print_line(verbose);
        Ok(stats)
    }

    /// `N − M`
    pub fn degrees_of_freedom(&self) -> usize {
        self.degrees_of_freedom
    }

    /// Model evaluated at the current parameters.
    pub fn model_values(&self) -> AsteriaResult<DVector<f64>> {
        Ok(evaluate_model(&self.model, &self.parameters)?)
    }

    /// `Y − f(P)` at the current parameters.
    pub fn residuals(&self) -> AsteriaResult<DVector<f64>> {
        self.problem()?.residuals(&self.parameters)
    }

    pub fn chi2(&self) -> AsteriaResult<f64> {
        self.problem()?.chi2(&self.parameters)
    }

    /// `χ² / (N − M)`
    pub fn reduced_chi2(&self) -> AsteriaResult<f64> {
        Ok(self.chi2()? / self.degrees_of_freedom as f64)
    }

    /// Direct parameter covariance, `reduced χ² · (JᵗWJ)⁻¹`.
    ///
    /// Matches the asymptotic standard errors and correlations reported by gnuplot's
    /// `fit`. Gauge directions declared by the model get zero variance.
    ///
    /// # Errors
    /// `OptimizerError::LinAlg` if `JᵗWJ` is singular outside the gauge directions.
    pub fn parameter_covariance(&self) -> AsteriaResult<DMatrix<f64>> {
        let problem = self.problem()?;
        let linearization = problem.linearize(&self.parameters)?;
        let inverse = problem.inverse_normal_matrix(&linearization.hessian, &self.parameters)?;
        Ok(inverse * (linearization.chi2 / self.degrees_of_freedom as f64))
    }

    /// Sensitivity of the fitted parameters to each data point, `dP/dY` (N×M).
    ///
    /// Each row costs four full re-fits from the current parameters.
    pub fn jacobian_dpdx(&self) -> AsteriaResult<DMatrix<f64>> {
        self.problem()?.jacobian_dpdx(&self.parameters)
    }

    /// Parameter covariance propagated from the data covariance,
    /// `(dP/dY)ᵗ·Cov(Y)·(dP/dY)`.
    pub fn fourth_order_covariance(&self) -> AsteriaResult<DMatrix<f64>> {
        let problem = self.problem()?;
        let dpdx = problem.jacobian_dpdx(&self.parameters)?;
        Ok(problem.covariance.propagate(&dpdx))
    }

    /// `sqrt(diag(Cov(P)))` from the direct covariance.
    pub fn asymptotic_standard_error(&self) -> AsteriaResult<DVector<f64>> {
        Ok(statistics::standard_errors(&self.parameter_covariance()?)?)
    }

    /// Correlation matrix from the direct covariance.
    pub fn parameter_correlation(&self) -> AsteriaResult<DMatrix<f64>> {
        Ok(statistics::correlation(&self.parameter_covariance()?)?)
    }

    /// Chi-square, covariance, correlation and standard errors in one go.
    pub fn statistics(&self) -> AsteriaResult<FitStatistics> {
        let chi2 = self.chi2()?;
        let covariance = self.parameter_covariance()?;
        Ok(FitStatistics {
            chi2,
            reduced_chi2: chi2 / self.degrees_of_freedom as f64,
            degrees_of_freedom: self.degrees_of_freedom,
            correlation: statistics::correlation(&covariance)?,
            standard_errors: statistics::standard_errors(&covariance)?,
            covariance,
        })
    }
}

//! Levenberg-Marquardt optimizer and its diagnostics.
//!
//! The solver lives in [`levenberg_marquardt`]; this module holds the types shared by
//! its public surface: the error enum, the termination status, per-iteration statistics
//! and the fit summary.

use crate::linalg;
use std::{
    fmt,
    fmt::{Display, Formatter},
};
use thiserror::Error;
use tracing::{debug, error, info};
use web_time::Duration;

pub mod levenberg_marquardt;

pub use levenberg_marquardt::{LevenbergMarquardt, LevenbergMarquardtConfig};

// Re-export observer types from the observers module
pub use crate::observers::{FitObserver, FitObserverVec};

/// Optimizer-specific error types
#[derive(Debug, Clone, Error)]
pub enum OptimizerError {
    /// Numerical instability detected (NaN, Inf in chi-square at the current parameters)
    #[error("Numerical instability detected: {0}")]
    NumericalInstability(String),

    /// Linear algebra operation failed while deriving fit statistics
    #[error("Linear algebra error: {0}")]
    LinAlg(#[from] linalg::LinAlgError),
}

impl OptimizerError {
    /// Log the error with tracing::error and return self for chaining
    ///
    /// # Example
    /// ```ignore
    /// operation()
    ///     .map_err(|e| OptimizerError::from(e).log())?;
    /// ```
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }

    /// Log the error together with the error that caused it
    #[must_use]
    pub fn log_with_source<E: std::fmt::Debug>(self, source_error: E) -> Self {
        error!("{} | Source: {:?}", self, source_error);
        self
    }
}

/// Result type for optimizer operations
pub type OptimizerResult<T> = Result<T, OptimizerError>;

/// Why a fit stopped. None of these is an error: the best parameters found are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OptimizationStatus {
    /// An accepted step changed chi-square by less than the exit tolerance, or the
    /// fit is exact (chi-square is zero)
    Converged,
    /// Iteration budget exhausted
    MaxIterationsReached,
    /// Damping grew past its limit: no nearby parameter set improves the fit
    DampingLimitReached,
}

impl OptimizationStatus {
    pub fn is_converged(&self) -> bool {
        matches!(self, OptimizationStatus::Converged)
    }
}

impl Display for OptimizationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationStatus::Converged => write!(f, "Converged"),
            OptimizationStatus::MaxIterationsReached => write!(f, "Maximum iterations reached"),
            OptimizationStatus::DampingLimitReached => write!(f, "Damping limit reached"),
        }
    }
}

/// Verdict of a single iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// Keep iterating
    Continue,
    /// Converged; stop with success
    Converged,
    /// Damping exceeded its limit; stop
    Stuck,
}

/// Per-iteration statistics (Ceres-style table).
#[derive(Debug, Clone)]
pub struct IterationStats {
    /// Iteration number (0-indexed)
    pub iteration: usize,
    /// Chi-square at the parameters the iteration started from
    pub chi2: f64,
    /// Chi-square at the trial parameters (NaN if no step could be computed)
    pub trial_chi2: f64,
    /// L2 norm of `JᵗWR`
    pub gradient_norm: f64,
    /// L2 norm of the proposed step (0 if the linear solve failed)
    pub step_norm: f64,
    /// Damping used to compute the step
    pub damping_before: f64,
    /// Damping after the accept/reject update
    pub damping_after: f64,
    /// Whether the trial parameters replaced the current ones
    pub accepted: bool,
    pub outcome: IterationOutcome,
    /// Time taken for this iteration in milliseconds
    pub iter_time_ms: f64,
}

impl IterationStats {
    /// Relative chi-square reduction of an accepted step, zero otherwise.
    pub fn relative_change(&self) -> f64 {
        if self.accepted && self.chi2 > 0.0 {
            (self.chi2 - self.trial_chi2) / self.chi2
        } else {
            0.0
        }
    }

    /// Print table header; `info` level when verbose, `debug` otherwise.
    pub fn print_header(verbose: bool) {
        let header = format!(
            "{:>4}  {:>13}  {:>13}  {:>11}  {:>11}  {:>11}  {:>11}  {:>9}  {:>6}",
            "iter",
            "chi2",
            "trial_chi2",
            "|gradient|",
            "|step|",
            "lambda",
            "lambda_new",
            "iter_time",
            "status"
        );
        if verbose {
            info!("{header}");
        } else {
            debug!("{header}");
        }
    }

    /// Print a single iteration line
    pub fn print_line(&self, verbose: bool) {
        let status = match (self.accepted, self.outcome) {
            (_, IterationOutcome::Converged) => "conv",
            (_, IterationOutcome::Stuck) => "stuck",
            (true, _) => "✓",
            (false, _) => "✗",
        };
        let line = format!(
            "{:>4}  {:>13.6e}  {:>13.6e}  {:>11.2e}  {:>11.2e}  {:>11.2e}  {:>11.2e}  {:>7.2}ms  {:>6}",
            self.iteration,
            self.chi2,
            self.trial_chi2,
            self.gradient_norm,
            self.step_norm,
            self.damping_before,
            self.damping_after,
            self.iter_time_ms,
            status
        );
        if verbose {
            info!("{line}");
        } else {
            debug!("{line}");
        }
    }
}

/// Summary of a call to [`LevenbergMarquardt::fit`].
#[derive(Debug, Clone)]
pub struct FitSummary {
    pub status: OptimizationStatus,
    /// Iterations performed, rejected steps included
    pub iterations: usize,
    pub accepted_steps: usize,
    pub rejected_steps: usize,
    pub initial_chi2: f64,
    pub final_chi2: f64,
    /// Automatically chosen starting damping `1e-3 · mean(diag(JᵗWJ))`
    pub initial_damping: f64,
    pub final_damping: f64,
    /// Damping above which the fit is declared stuck
    pub damping_limit: f64,
    pub total_time: Duration,
    /// Detailed per-iteration statistics history
    pub iteration_history: Vec<IterationStats>,
}

impl Display for FitSummary {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        writeln!(f, "Levenberg-Marquardt Final Result")?;
        if self.status.is_converged() {
            writeln!(f, "CONVERGED ({})", self.status)?;
        } else {
            writeln!(f, "NOT CONVERGED ({})", self.status)?;
        }

        writeln!(f)?;
        writeln!(f, "Chi-square:")?;
        writeln!(f, "  Initial:   {:.6e}", self.initial_chi2)?;
        writeln!(f, "  Final:     {:.6e}", self.final_chi2)?;
        writeln!(
            f,
            "  Reduction: {:.6e} ({:.2}%)",
            self.initial_chi2 - self.final_chi2,
            100.0 * (self.initial_chi2 - self.final_chi2) / self.initial_chi2.max(1e-300)
        )?;
        writeln!(f)?;
        writeln!(f, "Iterations:")?;
        writeln!(f, "  Total:          {}", self.iterations)?;
        writeln!(
            f,
            "  Accepted steps: {} ({:.1}%)",
            self.accepted_steps,
            100.0 * self.accepted_steps as f64 / self.iterations.max(1) as f64
        )?;
        writeln!(
            f,
            "  Rejected steps: {} ({:.1}%)",
            self.rejected_steps,
            100.0 * self.rejected_steps as f64 / self.iterations.max(1) as f64
        )?;
        writeln!(f)?;
        writeln!(f, "Damping:")?;
        writeln!(f, "  Initial: {:.2e}", self.initial_damping)?;
        writeln!(f, "  Final:   {:.2e}", self.final_damping)?;
        writeln!(f, "  Limit:   {:.2e}", self.damping_limit)?;
        writeln!(f)?;
        writeln!(
            f,
            "Total time: {:.2}ms",
            self.total_time.as_secs_f64() * 1000.0
        )?;
        Ok(())
    }
}

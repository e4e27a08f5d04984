//! Observer pattern for fit monitoring.
//!
//! Observers registered with [`LevenbergMarquardt::add_observer`](crate::LevenbergMarquardt::add_observer)
//! are notified after every iteration of a fit with the current parameters and the
//! iteration statistics. Re-fits run internally for covariance propagation do not
//! notify observers.
//!
//! ```text
//! ┌─────────────────────┐
//! │ LevenbergMarquardt  │
//! └──────────┬──────────┘
//!            │ observers.notify(params, stats)
//!            ├───────────────────┐
//!            ▼                   ▼
//!    ┌────────────────┐   ┌──────────┐
//!    │ParameterHistory│   │  Custom  │
//!    └────────────────┘   └──────────┘
//! ```
//!
//! # Custom Observer
//!
//! ```no_run
//! use asteria_lm::observers::FitObserver;
//! use asteria_lm::optimizer::IterationStats;
//! use nalgebra::DVector;
//!
//! struct ProgressPrinter;
//!
//! impl FitObserver for ProgressPrinter {
//!     fn on_iteration(&self, params: &DVector<f64>, stats: &IterationStats) {
//!         println!("{}: chi2 = {:.3e}, p = {}", stats.iteration, stats.chi2, params.transpose());
//!     }
//! }
//! ```

use crate::optimizer::IterationStats;
use nalgebra::DVector;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tracing::error;

/// Observer-specific error types
#[derive(Debug, Clone, Error)]
pub enum ObserverError {
    /// Mutex was poisoned (thread panicked while holding lock)
    #[error("Mutex poisoned in {context}: {reason}")]
    MutexPoisoned { context: String, reason: String },
}

impl ObserverError {
    /// Log the error with tracing::error and return self for chaining
    #[must_use]
    pub fn log(self) -> Self {
        error!("{}", self);
        self
    }
}

/// Result type for observer operations
pub type ObserverResult<T> = Result<T, ObserverError>;

/// Observer trait for monitoring fit progress.
///
/// Observers receive immutable references and cannot alter the fit. They must be
/// `Send` so that a solver carrying them can move between threads; use interior
/// mutability (`Mutex`) to record state.
pub trait FitObserver: Send {
    /// Called after each iteration, with the parameters after the accept/reject
    /// decision.
    fn on_iteration(&self, params: &DVector<f64>, stats: &IterationStats);
}

/// Collection of observers, notified in the order they were added.
#[derive(Default)]
pub struct FitObserverVec {
    observers: Vec<Box<dyn FitObserver>>,
}

impl FitObserverVec {
    pub fn new() -> Self {
        Self {
            observers: Vec::new(),
        }
    }

    pub fn add(&mut self, observer: impl FitObserver + 'static) {
        self.observers.push(Box::new(observer));
    }

    /// Notify all observers. A no-op when none are registered.
    #[inline]
    pub fn notify(&self, params: &DVector<f64>, stats: &IterationStats) {
        for observer in &self.observers {
            observer.on_iteration(params, stats);
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.observers.len()
    }
}

/// One recorded iteration.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub iteration: usize,
    pub chi2: f64,
    pub damping: f64,
    pub accepted: bool,
    pub parameters: DVector<f64>,
}

/// Records the parameter trajectory of a fit.
///
/// Clones share the same record, so keep one clone and hand the other to the solver.
#[derive(Debug, Clone, Default)]
pub struct ParameterHistory {
    entries: Arc<Mutex<Vec<HistoryEntry>>>,
}

impl ParameterHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    ///
    /// # Errors
    /// `ObserverError::MutexPoisoned` if a recording thread panicked.
    pub fn snapshot(&self) -> ObserverResult<Vec<HistoryEntry>> {
        let guard = self.entries.lock().map_err(|e| {
            ObserverError::MutexPoisoned {
                context: "ParameterHistory::snapshot".to_string(),
                reason: e.to_string(),
            }
            .log()
        })?;
        Ok(guard.clone())
    }
}

impl FitObserver for ParameterHistory {
    fn on_iteration(&self, params: &DVector<f64>, stats: &IterationStats) {
        // Poisoning is logged and the entry dropped; observers never abort a fit.
        if let Ok(mut guard) = self.entries.lock().map_err(|e| {
            ObserverError::MutexPoisoned {
                context: "ParameterHistory::on_iteration".to_string(),
                reason: e.to_string(),
            }
            .log()
        }) {
            guard.push(HistoryEntry {
                iteration: stats.iteration,
                chi2: if stats.accepted {
                    stats.trial_chi2
                } else {
                    stats.chi2
                },
                damping: stats.damping_after,
                accepted: stats.accepted,
                parameters: params.clone(),
            });
        }
    }
}

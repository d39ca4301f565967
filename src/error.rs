//! Error types for the simulation core.

use thiserror::Error;

/// Result type alias for simulation-core operations.
pub type Result<T> = std::result::Result<T, SimulationError>;

/// Failures surfaced by the estimator, simulator and summarizer.
///
/// Every precondition violation aborts the run; nothing is replaced by a
/// default value.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SimulationError {
    /// Not enough observations to derive returns or percentiles.
    #[error("Insufficient data: need at least {required} observations, got {available}")]
    InsufficientData { required: usize, available: usize },

    /// Horizon, path count, starting price or volatility out of range.
    #[error("Invalid parameters: {message}")]
    InvalidParameters { message: String },

    /// The ensemble buffer could not be allocated.
    #[error("Out of memory allocating ensemble of {paths} paths x {days} days")]
    OutOfMemory { paths: usize, days: usize },

    /// Price history violates ordering or positivity.
    #[error("Invalid price history: {message}")]
    InvalidHistory { message: String },
}

impl SimulationError {
    pub fn insufficient_data(required: usize, available: usize) -> Self {
        Self::InsufficientData {
            required,
            available,
        }
    }

    pub fn invalid_parameters(message: impl Into<String>) -> Self {
        Self::InvalidParameters {
            message: message.into(),
        }
    }

    pub fn out_of_memory(paths: usize, days: usize) -> Self {
        Self::OutOfMemory { paths, days }
    }

    pub fn invalid_history(message: impl Into<String>) -> Self {
        Self::InvalidHistory {
            message: message.into(),
        }
    }
}

//! Error types for Causify
//!
//! Every estimator validates its own preconditions and fails with a specific
//! kind instead of returning a silently degenerate estimate.

use crate::table::Arm;
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Causify error types
#[derive(Error, Debug)]
pub enum Error {
    /// Bad or empty covariate set, invalid thresholds (fatal to the run)
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Model fitting failed; the stage may be retried with adjusted configuration
    #[error("Estimation error: {0}")]
    Estimation(#[from] EstimationError),

    /// An arm is too small for a valid test (reported as a result-level flag)
    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    /// Table does not match the declared schema descriptor
    #[error("Schema error: {0}")]
    Schema(String),

    /// Storage error (Parquet/Arrow)
    #[error("Storage error: {0}")]
    StorageError(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Arrow error
    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),

    /// Parquet error
    #[error("Parquet error: {0}")]
    Parquet(#[from] parquet::errors::ParquetError),

    /// JSON (config or report) error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Whether the failing stage can be retried with adjusted configuration
    /// without invalidating sibling stages.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Estimation(_))
    }
}

/// Recoverable model-fitting failures
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EstimationError {
    /// Covariate matrix is rank-deficient; `columns` are the collinear ones
    #[error("covariate matrix is rank-deficient; collinear columns: {}", columns.join(", "))]
    RankDeficient {
        /// Columns that are linear combinations of earlier columns
        columns: Vec<String>,
    },

    /// Iterative fit did not converge
    #[error("{model} did not converge after {iterations} iterations")]
    NonConvergence {
        /// Model that failed
        model: String,
        /// Iterations performed
        iterations: usize,
    },

    /// Too few treated units could be matched (poor overlap)
    #[error("only {:.1}% of treated units matched (minimum {:.1}%): poor propensity overlap", match_rate * 100.0, minimum * 100.0)]
    PoorOverlap {
        /// Fraction of treated units matched
        match_rate: f64,
        /// Configured minimum fraction
        minimum: f64,
    },

    /// An arm has too few complete records to fit a stable model
    #[error("{arm} arm has {size} complete records, at least {minimum} required")]
    ArmTooSmall {
        /// Arm that is too small
        arm: Arm,
        /// Complete records in that arm
        size: usize,
        /// Configured minimum
        minimum: usize,
    },

    /// Linear system could not be solved
    #[error("singular matrix in {0}")]
    SingularMatrix(String),
}

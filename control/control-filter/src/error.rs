//! Error types for the control-filter crate.

use thiserror::Error;

/// Errors that can occur while maintaining a hypothesis posterior.
#[derive(Debug, Error)]
pub enum FilterError {
    /// The prior probability vector is malformed.
    #[error("bad prior: {0}")]
    BadPrior(String),

    /// A likelihood was negative or non-finite.
    #[error("bad likelihood at hypothesis {index}: {value}")]
    BadLikelihood {
        /// Index of the offending hypothesis.
        index: usize,
        /// The offending likelihood value.
        value: f64,
    },

    /// An update vector did not match the number of hypotheses.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch {
        /// Number of hypotheses tracked by the filter.
        expected: usize,
        /// Length of the supplied vector.
        got: usize,
    },

    /// Every hypothesis lost all posterior mass.
    #[error("posterior mass vanished: all hypotheses have zero probability")]
    DegeneratePosterior,
}

impl FilterError {
    /// Creates a bad-prior error.
    #[must_use]
    pub fn bad_prior(reason: impl Into<String>) -> Self {
        Self::BadPrior(reason.into())
    }
}

/// Result type for filter operations.
pub type Result<T> = std::result::Result<T, FilterError>;

//! Discrete hypothesis filtering for hindsight planning.
//!
//! A planner that hedges over K dynamics/cost hypotheses needs a posterior
//! over those hypotheses. This crate maintains that posterior:
//!
//! - [`HypothesisFilter`] - log-space Bayesian posterior over hypotheses
//! - [`FilterError`] - validation and update failure modes
//!
//! The filter is deliberately small: it consumes per-hypothesis transition
//! likelihoods (or maximum-entropy action/state values) produced by the
//! caller and hands a normalized probability vector back to the planner.
//!
//! # Example
//!
//! ```
//! use control_filter::HypothesisFilter;
//!
//! let mut filter = HypothesisFilter::new(&[0.5, 0.5]).unwrap();
//!
//! // Observation was far more likely under hypothesis 1.
//! filter.update_from_likelihoods(&[0.05, 0.6]).unwrap();
//!
//! let p = filter.distribution();
//! assert!(p[1] > 0.9);
//! assert!((p[0] + p[1] - 1.0).abs() < 1e-9);
//! ```

// Safety: Deny unwrap/expect in library code. Tests may use them.
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]

mod error;
mod predictor;

pub use error::{FilterError, Result};
pub use predictor::{HypothesisFilter, PRIOR_TOLERANCE};

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::{FilterError, HypothesisFilter};
}

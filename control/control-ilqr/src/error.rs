//! Error types for the control-ilqr crate.

use thiserror::Error;

/// Errors that can occur while constructing or running the solver.
#[derive(Debug, Error)]
pub enum IlqrError {
    /// The branch probability vector is malformed.
    #[error("bad prior: {0}")]
    BadPrior(String),

    /// A user closure returned a non-finite value.
    #[error("closure returned a non-finite value at t = {t}")]
    BadClosure {
        /// Timestep at which the closure was evaluated (`horizon` for the
        /// terminal cost).
        t: usize,
        /// State at the offending evaluation.
        x: Vec<f64>,
        /// Control at the offending evaluation (empty for the terminal
        /// cost).
        u: Vec<f64>,
    },

    /// The Cholesky factorization of the damped control Hessian failed.
    ///
    /// The solver recovers from this internally by escalating the
    /// Levenberg-Marquardt damping; it only appears in results of the
    /// low-level backup entry points.
    #[error("control Hessian not positive definite at t = {t} (mu = {mu:e})")]
    NonPsdControlHessian {
        /// Timestep of the failing backup.
        t: usize,
        /// Damping in effect when the factorization failed.
        mu: f64,
    },

    /// Damping escalation exceeded its ceiling without producing a cost
    /// reduction.
    #[error("stuck at local minimum after {iterations} iterations (cost = {cost})")]
    StuckAtLocalMin {
        /// Best total expected cost reached.
        cost: f64,
        /// Outer iterations completed.
        iterations: usize,
    },

    /// The iteration cap was reached before the convergence ratio was met.
    ///
    /// Only returned when [`SolveParams::strict`](crate::SolveParams) is
    /// set; otherwise the cap is a warning and the best trajectory is
    /// returned.
    #[error("no convergence after {iterations} iterations (cost = {cost})")]
    NotConverged {
        /// Total expected cost at the cap.
        cost: f64,
        /// Outer iterations completed.
        iterations: usize,
    },
}

impl IlqrError {
    /// Creates a bad-prior error.
    #[must_use]
    pub fn bad_prior(reason: impl Into<String>) -> Self {
        Self::BadPrior(reason.into())
    }

    pub(crate) fn bad_closure(
        t: usize,
        x: &nalgebra::DVector<f64>,
        u: Option<&nalgebra::DVector<f64>>,
    ) -> Self {
        Self::BadClosure {
            t,
            x: x.iter().copied().collect(),
            u: u.map(|u| u.iter().copied().collect()).unwrap_or_default(),
        }
    }
}

/// Result type for solver operations.
pub type Result<T> = std::result::Result<T, IlqrError>;

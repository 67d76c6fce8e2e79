//! Solve parameters.

use nalgebra::DVector;
use serde::{Deserialize, Serialize};

/// Initial control used to seed the nominal trajectory.
#[derive(Debug, Clone)]
pub enum InitialControl {
    /// One control vector held for every timestep.
    Hold(DVector<f64>),
    /// A full per-timestep schedule; must have `horizon` entries.
    Schedule(Vec<DVector<f64>>),
}

impl InitialControl {
    pub(crate) fn control_at(&self, t: usize) -> &DVector<f64> {
        match self {
            Self::Hold(u) => u,
            Self::Schedule(us) => &us[t],
        }
    }

    pub(crate) fn validate(&self, horizon: usize, control_dim: usize) {
        match self {
            Self::Hold(u) => assert_eq!(u.len(), control_dim, "initial control dimension"),
            Self::Schedule(us) => {
                assert_eq!(us.len(), horizon, "initial control schedule length");
                for u in us {
                    assert_eq!(u.len(), control_dim, "initial control dimension");
                }
            }
        }
    }
}

/// Parameters for [`HindsightSolver::solve`](crate::HindsightSolver::solve).
///
/// # Example
///
/// ```
/// use control_ilqr::SolveParams;
///
/// let params = SolveParams::new()
///     .with_max_iterations(200)
///     .with_convergence_ratio(1e-6)
///     .with_verbose(true);
/// assert_eq!(params.max_iterations, 200);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveParams {
    /// Initial Levenberg-Marquardt damping (default: 0).
    pub mu: f64,
    /// Cap on outer iterations (default: 1000).
    pub max_iterations: usize,
    /// Relative cost-change threshold for convergence (default: 1e-4).
    pub convergence_ratio: f64,
    /// First line-search step; the search halves from here down to 2⁻¹⁰
    /// (default: 1.0).
    pub initial_alpha: f64,
    /// Emit per-iteration progress at `info` level (default: false).
    pub verbose: bool,
    /// Treat hitting the iteration cap as an error instead of a warning
    /// (default: false).
    pub strict: bool,
}

impl Default for SolveParams {
    fn default() -> Self {
        Self {
            mu: 0.0,
            max_iterations: 1000,
            convergence_ratio: 1e-4,
            initial_alpha: 1.0,
            verbose: false,
            strict: false,
        }
    }
}

impl SolveParams {
    /// Creates parameters with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the initial damping.
    #[must_use]
    pub const fn with_damping(mut self, mu: f64) -> Self {
        self.mu = mu;
        self
    }

    /// Sets the iteration cap.
    #[must_use]
    pub const fn with_max_iterations(mut self, max_iterations: usize) -> Self {
        self.max_iterations = max_iterations;
        self
    }

    /// Sets the convergence ratio.
    #[must_use]
    pub const fn with_convergence_ratio(mut self, ratio: f64) -> Self {
        self.convergence_ratio = ratio;
        self
    }

    /// Sets the first line-search step.
    #[must_use]
    pub const fn with_initial_alpha(mut self, alpha: f64) -> Self {
        self.initial_alpha = alpha;
        self
    }

    /// Enables or disables per-iteration progress output.
    #[must_use]
    pub const fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Makes the iteration cap an error.
    #[must_use]
    pub const fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }
}

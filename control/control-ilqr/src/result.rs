//! Solve diagnostics.

use serde::{Deserialize, Serialize};

/// Result of one [`HindsightSolver::solve`](crate::HindsightSolver::solve)
/// call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolveResult {
    /// Total expected cost of the committed trajectory.
    pub cost: f64,
    /// Total expected cost of the seed rollout, before the first
    /// iteration.
    pub initial_cost: f64,
    /// Outer iterations performed.
    pub iterations: usize,
    /// Whether the relative cost change met the convergence ratio.
    pub converged: bool,
    /// Levenberg-Marquardt damping at exit.
    pub mu: f64,
}

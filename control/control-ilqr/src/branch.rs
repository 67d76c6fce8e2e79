//! Hypothesis branches: closure triples with prior probabilities.

use std::sync::Arc;

use nalgebra::{DMatrix, DVector};

use crate::error::{IlqrError, Result};
use crate::node::{PlanNode, TerminalNode};
use crate::taylor::{CostExpansion, TerminalExpansion};

/// Discrete-time dynamics closure: `(x, u) → x'`.
pub type DynamicsFn = Arc<dyn Fn(&DVector<f64>, &DVector<f64>) -> DVector<f64>>;

/// Running cost closure: `(x, u, t) → cost`.
pub type CostFn = Arc<dyn Fn(&DVector<f64>, &DVector<f64>, usize) -> f64>;

/// Terminal cost closure: `x → cost`.
pub type FinalCostFn = Arc<dyn Fn(&DVector<f64>) -> f64>;

/// Optional analytic dynamics Jacobians: writes `A = ∂f/∂x` and
/// `B = ∂f/∂u` at `(x, u)` into the output matrices.
pub type DynamicsJacobianFn = Arc<dyn Fn(&DVector<f64>, &DVector<f64>, &mut DMatrix<f64>, &mut DMatrix<f64>)>;

/// Optional analytic cost quadraticization: fills `Q`, `R`, `P`, `b_x`,
/// `b_u` of the expansion at `(x, u, t)`. The constant term is always
/// taken from the cost closure itself.
pub type CostQuadraticFn = Arc<dyn Fn(&DVector<f64>, &DVector<f64>, usize, &mut CostExpansion)>;

/// Optional analytic terminal quadraticization: fills `Q` and `b_x` at
/// `x`. The constant term is always taken from the terminal closure.
pub type FinalCostQuadraticFn = Arc<dyn Fn(&DVector<f64>, &mut TerminalExpansion)>;

/// Tolerance on `sum(probabilities) == 1` accepted by the solver.
pub const PROBABILITY_TOLERANCE: f64 = 1e-3;

/// One hypothesis about the true plant: a dynamics/cost closure triple and
/// the prior probability that this hypothesis is the real one.
///
/// Derivatives default to central finite differences; closures with cheap
/// analytic derivatives can supply them through the `with_*` builders and
/// the solver will use those instead, closure by closure.
#[derive(Clone)]
pub struct BranchSpec {
    pub(crate) dynamics: DynamicsFn,
    pub(crate) cost: CostFn,
    pub(crate) final_cost: FinalCostFn,
    pub(crate) probability: f64,
    pub(crate) dynamics_jacobian: Option<DynamicsJacobianFn>,
    pub(crate) cost_quadratic: Option<CostQuadraticFn>,
    pub(crate) final_cost_quadratic: Option<FinalCostQuadraticFn>,
}

impl BranchSpec {
    /// Creates a branch from its closure triple and prior probability.
    pub fn new<D, C, F>(dynamics: D, cost: C, final_cost: F, probability: f64) -> Self
    where
        D: Fn(&DVector<f64>, &DVector<f64>) -> DVector<f64> + 'static,
        C: Fn(&DVector<f64>, &DVector<f64>, usize) -> f64 + 'static,
        F: Fn(&DVector<f64>) -> f64 + 'static,
    {
        Self {
            dynamics: Arc::new(dynamics),
            cost: Arc::new(cost),
            final_cost: Arc::new(final_cost),
            probability,
            dynamics_jacobian: None,
            cost_quadratic: None,
            final_cost_quadratic: None,
        }
    }

    /// Supplies analytic dynamics Jacobians.
    #[must_use]
    pub fn with_dynamics_jacobian<J>(mut self, jacobian: J) -> Self
    where
        J: Fn(&DVector<f64>, &DVector<f64>, &mut DMatrix<f64>, &mut DMatrix<f64>) + 'static,
    {
        self.dynamics_jacobian = Some(Arc::new(jacobian));
        self
    }

    /// Supplies an analytic cost quadraticization.
    #[must_use]
    pub fn with_cost_quadratic<Q>(mut self, quadratic: Q) -> Self
    where
        Q: Fn(&DVector<f64>, &DVector<f64>, usize, &mut CostExpansion) + 'static,
    {
        self.cost_quadratic = Some(Arc::new(quadratic));
        self
    }

    /// Supplies an analytic terminal quadraticization.
    #[must_use]
    pub fn with_final_cost_quadratic<Q>(mut self, quadratic: Q) -> Self
    where
        Q: Fn(&DVector<f64>, &mut TerminalExpansion) + 'static,
    {
        self.final_cost_quadratic = Some(Arc::new(quadratic));
        self
    }

    /// Prior probability of this hypothesis.
    #[must_use]
    pub const fn probability(&self) -> f64 {
        self.probability
    }
}

impl std::fmt::Debug for BranchSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BranchSpec")
            .field("probability", &self.probability)
            .field("analytic_dynamics", &self.dynamics_jacobian.is_some())
            .field("analytic_cost", &self.cost_quadratic.is_some())
            .finish_non_exhaustive()
    }
}

/// A hypothesis together with its plan-node chain.
pub(crate) struct Branch {
    pub spec: BranchSpec,
    /// One node per timestep `t = 0…T−1`.
    pub nodes: Vec<PlanNode>,
    /// Expansion point and value at `t = T`.
    pub terminal: TerminalNode,
}

impl Branch {
    /// Creates a branch with an empty chain; nodes are sized on the first
    /// call to [`Branch::resize_horizon`].
    pub fn new(spec: BranchSpec, state_dim: usize) -> Self {
        Self {
            spec,
            nodes: Vec::new(),
            terminal: TerminalNode::new(state_dim),
        }
    }

    /// Ensures the chain has exactly `horizon` nodes.
    pub fn resize_horizon(&mut self, horizon: usize, state_dim: usize, control_dim: usize) {
        self.nodes
            .resize_with(horizon, || PlanNode::new(state_dim, control_dim));
    }
}

/// Validates a branch probability vector: non-empty, entries in `[0, 1]`,
/// sum within [`PROBABILITY_TOLERANCE`] of one.
pub(crate) fn validate_probabilities(probabilities: &[f64]) -> Result<()> {
    if probabilities.is_empty() {
        return Err(IlqrError::bad_prior("no branches"));
    }
    for (i, &p) in probabilities.iter().enumerate() {
        if !p.is_finite() || p < 0.0 {
            return Err(IlqrError::bad_prior(format!(
                "probability {p} at branch {i} is not in [0, 1]"
            )));
        }
    }
    let sum: f64 = probabilities.iter().sum();
    if (sum - 1.0).abs() > PROBABILITY_TOLERANCE {
        return Err(IlqrError::bad_prior(format!("sum is {sum}, expected 1")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_probabilities_within_tolerance() {
        assert!(validate_probabilities(&[0.5, 0.5]).is_ok());
        assert!(validate_probabilities(&[1.0]).is_ok());
        assert!(validate_probabilities(&[0.9995, 0.0]).is_ok());
        assert!(validate_probabilities(&[1.0, 0.0]).is_ok());
    }

    #[test]
    fn rejects_malformed_probabilities() {
        assert!(validate_probabilities(&[]).is_err());
        assert!(validate_probabilities(&[0.7, 0.2]).is_err());
        assert!(validate_probabilities(&[1.5, -0.5]).is_err());
        assert!(validate_probabilities(&[f64::INFINITY, 0.0]).is_err());
    }
}

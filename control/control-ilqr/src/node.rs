//! Plan nodes: one timestep of one branch.

use nalgebra::{DMatrix, DVector};

use crate::branch::BranchSpec;
use crate::error::{IlqrError, Result};
use crate::taylor::{CostExpansion, DynamicsExpansion, TerminalExpansion};
use crate::value::QuadraticValue;

/// One timestep of one branch: the expansion point, the local Taylor
/// models, the cost-to-go, and the feedback law
/// `u(x) = û + α·k + K·(x − x̂)`.
///
/// All storage is sized at construction; refreshes and backups overwrite
/// in place.
#[derive(Debug, Clone)]
pub(crate) struct PlanNode {
    /// Nominal state x̂.
    pub x_hat: DVector<f64>,
    /// Nominal control û.
    pub u_hat: DVector<f64>,
    /// Dynamics linearization at (x̂, û).
    pub dynamics: DynamicsExpansion,
    /// Cost quadraticization at (x̂, û, t).
    pub cost: CostExpansion,
    /// Cost-to-go J_t from the last backward sweep.
    pub value: QuadraticValue,
    /// Feedback gain K, m×n.
    pub k_fb: DMatrix<f64>,
    /// Feed-forward term k, m.
    pub k_ff: DVector<f64>,
}

impl PlanNode {
    pub fn new(state_dim: usize, control_dim: usize) -> Self {
        Self {
            x_hat: DVector::zeros(state_dim),
            u_hat: DVector::zeros(control_dim),
            dynamics: DynamicsExpansion::zeros(state_dim, control_dim),
            cost: CostExpansion::zeros(state_dim, control_dim),
            value: QuadraticValue::zeros(state_dim),
            k_fb: DMatrix::zeros(control_dim, state_dim),
            k_ff: DVector::zeros(control_dim),
        }
    }

    /// Refreshes both expansions at the current (x̂, û), preferring
    /// analytic derivatives when the branch supplies them.
    pub fn refresh(&mut self, spec: &BranchSpec, t: usize) -> Result<()> {
        match &spec.dynamics_jacobian {
            Some(jac) => jac(&self.x_hat, &self.u_hat, &mut self.dynamics.a, &mut self.dynamics.b),
            None => self
                .dynamics
                .refresh_numeric(&spec.dynamics, &self.x_hat, &self.u_hat)
                .map_err(|_| IlqrError::bad_closure(t, &self.x_hat, Some(&self.u_hat)))?,
        }
        match &spec.cost_quadratic {
            Some(quad) => {
                self.cost.c0 = (spec.cost)(&self.x_hat, &self.u_hat, t);
                if !self.cost.c0.is_finite() {
                    return Err(IlqrError::bad_closure(t, &self.x_hat, Some(&self.u_hat)));
                }
                quad(&self.x_hat, &self.u_hat, t, &mut self.cost);
            }
            None => self
                .cost
                .refresh_numeric(&spec.cost, &self.x_hat, &self.u_hat, t)
                .map_err(|_| IlqrError::bad_closure(t, &self.x_hat, Some(&self.u_hat)))?,
        }
        Ok(())
    }

    /// Feedback control at state `x` with line-search step `alpha`.
    pub fn control(&self, x: &DVector<f64>, alpha: f64) -> DVector<f64> {
        let mut u = self.u_hat.clone();
        u.axpy(alpha, &self.k_ff, 1.0);
        let dx = x - &self.x_hat;
        u.gemv(1.0, &self.k_fb, &dx, 1.0);
        u
    }
}

/// Terminal node: expansion point x̂_T, terminal cost model, and J_T.
#[derive(Debug, Clone)]
pub(crate) struct TerminalNode {
    pub x_hat: DVector<f64>,
    pub cost: TerminalExpansion,
    pub value: QuadraticValue,
}

impl TerminalNode {
    pub fn new(state_dim: usize) -> Self {
        Self {
            x_hat: DVector::zeros(state_dim),
            cost: TerminalExpansion::zeros(state_dim),
            value: QuadraticValue::zeros(state_dim),
        }
    }

    /// Refreshes the terminal expansion and seeds J_T from it.
    ///
    /// `horizon` is only used to report the timestep in errors.
    pub fn refresh(&mut self, spec: &BranchSpec, horizon: usize) -> Result<()> {
        match &spec.final_cost_quadratic {
            Some(quad) => {
                self.cost.c0 = (spec.final_cost)(&self.x_hat);
                if !self.cost.c0.is_finite() {
                    return Err(IlqrError::bad_closure(horizon, &self.x_hat, None));
                }
                quad(&self.x_hat, &mut self.cost);
            }
            None => self
                .cost
                .refresh_numeric(&spec.final_cost, &self.x_hat)
                .map_err(|_| IlqrError::bad_closure(horizon, &self.x_hat, None))?,
        }
        self.value.set_terminal(&self.cost);
        Ok(())
    }
}

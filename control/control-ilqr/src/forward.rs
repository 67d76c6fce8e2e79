//! Forward simulation of a branch under the current feedback law.

use nalgebra::DVector;

use crate::branch::Branch;
use crate::error::{IlqrError, Result};
use crate::params::InitialControl;

/// Storage for one branch's simulated trajectory. Buffers are sized once
/// per horizon and overwritten by every rollout.
#[derive(Debug, Clone)]
pub(crate) struct Rollout {
    /// `x_0 … x_T`.
    pub states: Vec<DVector<f64>>,
    /// `u_0 … u_{T−1}`.
    pub controls: Vec<DVector<f64>>,
    /// Accumulated running + terminal cost.
    pub cost: f64,
}

impl Rollout {
    pub fn new() -> Self {
        Self {
            states: Vec::new(),
            controls: Vec::new(),
            cost: 0.0,
        }
    }

    pub fn resize(&mut self, horizon: usize, state_dim: usize, control_dim: usize) {
        self.states
            .resize_with(horizon + 1, || DVector::zeros(state_dim));
        self.controls
            .resize_with(horizon, || DVector::zeros(control_dim));
    }
}

/// Rolls the branch out from `x0` under
/// `u_t = û_t + α·k_t + K_t·(x_t − x̂_t)`, accumulating cost.
///
/// # Errors
///
/// Returns [`IlqrError::BadClosure`] the moment a dynamics or cost
/// closure produces a non-finite value.
pub(crate) fn rollout_policy(
    branch: &Branch,
    x0: &DVector<f64>,
    alpha: f64,
    out: &mut Rollout,
) -> Result<()> {
    out.states[0].copy_from(x0);
    out.cost = 0.0;
    for t in 0..branch.nodes.len() {
        let u = branch.nodes[t].control(&out.states[t], alpha);
        step(branch, t, u, out)?;
    }
    finish(branch, out)
}

/// Rolls the branch out under a fixed control schedule; used to seed the
/// nominal trajectory before the first backward sweep.
pub(crate) fn rollout_open_loop(
    branch: &Branch,
    x0: &DVector<f64>,
    init: &InitialControl,
    out: &mut Rollout,
) -> Result<()> {
    out.states[0].copy_from(x0);
    out.cost = 0.0;
    for t in 0..branch.nodes.len() {
        let u = init.control_at(t).clone();
        step(branch, t, u, out)?;
    }
    finish(branch, out)
}

fn step(branch: &Branch, t: usize, u: DVector<f64>, out: &mut Rollout) -> Result<()> {
    let x = &out.states[t];
    let c = (branch.spec.cost)(x, &u, t);
    if !c.is_finite() {
        return Err(IlqrError::bad_closure(t, x, Some(&u)));
    }
    let x_next = (branch.spec.dynamics)(x, &u);
    assert_eq!(
        x_next.len(),
        x.len(),
        "dynamics closure changed the state dimension"
    );
    if !x_next.iter().all(|v| v.is_finite()) {
        return Err(IlqrError::bad_closure(t, x, Some(&u)));
    }
    out.cost += c;
    out.controls[t].copy_from(&u);
    out.states[t + 1].copy_from(&x_next);
    Ok(())
}

fn finish(branch: &Branch, out: &mut Rollout) -> Result<()> {
    let horizon = branch.nodes.len();
    let x_final = &out.states[horizon];
    let c = (branch.spec.final_cost)(x_final);
    if !c.is_finite() {
        return Err(IlqrError::bad_closure(horizon, x_final, None));
    }
    out.cost += c;
    Ok(())
}

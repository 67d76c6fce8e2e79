//! Solver driver: the outer iLQR loop over a hindsight branch set.

use nalgebra::{DMatrix, DVector};
use tracing::{debug, info, warn};

use crate::backward::{backup_root, sweep_branch, BackwardScratch};
use crate::branch::{validate_probabilities, Branch, BranchSpec};
use crate::error::{IlqrError, Result};
use crate::forward::{rollout_open_loop, rollout_policy, Rollout};
use crate::node::PlanNode;
use crate::params::{InitialControl, SolveParams};
use crate::result::SolveResult;
use crate::value::QuadraticValue;

/// Smallest line-search step tried before declaring failure (2⁻¹⁰).
const ALPHA_MIN: f64 = 9.765_625e-4;
/// Damping installed when escalation starts from zero.
const MU_SEED: f64 = 1e-6;
/// Escalation / decay factor for the damping.
const MU_SCALE: f64 = 10.0;
/// Damping ceiling; exceeding it means the solver is stuck.
const MU_LIMIT: f64 = 1e6;

/// Iterative LQR solver over K dynamics/cost hypotheses.
///
/// The planner commits to a single first control that hedges across the
/// hypotheses in proportion to their probability, while each branch keeps
/// its own specialized policy from the second step on. A single branch
/// with probability one reduces to ordinary chain iLQR.
///
/// The solver owns its plan tree; it is single-threaded and synchronous.
/// Callers that want to run scenarios in parallel instantiate independent
/// solvers.
///
/// # Example
///
/// ```
/// use control_ilqr::{BranchSpec, HindsightSolver, InitialControl, SolveParams};
/// use nalgebra::{dvector, DVector};
///
/// // 1-D point mass driven to the origin.
/// let spec = BranchSpec::new(
///     |x: &DVector<f64>, u: &DVector<f64>| dvector![x[0] + 0.1 * u[0]],
///     |x: &DVector<f64>, u: &DVector<f64>, _t| x[0] * x[0] + 0.1 * u[0] * u[0],
///     |x: &DVector<f64>| 10.0 * x[0] * x[0],
///     1.0,
/// );
/// let mut solver = HindsightSolver::new(vec![spec], 1, 1).unwrap();
/// let result = solver
///     .solve(
///         20,
///         &dvector![2.0],
///         &InitialControl::Hold(dvector![0.0]),
///         &SolveParams::new(),
///     )
///     .unwrap();
/// assert!(result.cost < result.initial_cost);
/// ```
pub struct HindsightSolver {
    state_dim: usize,
    control_dim: usize,
    branches: Vec<Branch>,
    /// The shared t = 0 node; its expansions are the probability-weighted
    /// mix of the branch expansions.
    root: PlanNode,
    /// Probability-mixed successor value used by the root backup.
    j_mix: QuadraticValue,
    horizon: usize,
    scratch: BackwardScratch,
    /// Candidate-trajectory buffers, one per branch.
    rollouts: Vec<Rollout>,
}

impl HindsightSolver {
    /// Creates a solver over the given hypothesis branches.
    ///
    /// # Errors
    ///
    /// Returns [`IlqrError::BadPrior`] if the branch probabilities are
    /// empty, contain a negative or non-finite entry, or do not sum to one
    /// within [`PROBABILITY_TOLERANCE`](crate::PROBABILITY_TOLERANCE).
    ///
    /// # Panics
    ///
    /// Panics if `state_dim` or `control_dim` is zero.
    pub fn new(
        branches: Vec<BranchSpec>,
        state_dim: usize,
        control_dim: usize,
    ) -> Result<Self> {
        assert!(state_dim > 0, "state dimension must be positive");
        assert!(control_dim > 0, "control dimension must be positive");
        let probabilities: Vec<f64> = branches.iter().map(BranchSpec::probability).collect();
        validate_probabilities(&probabilities)?;

        let branch_count = branches.len();
        Ok(Self {
            state_dim,
            control_dim,
            branches: branches
                .into_iter()
                .map(|spec| Branch::new(spec, state_dim))
                .collect(),
            root: PlanNode::new(state_dim, control_dim),
            j_mix: QuadraticValue::zeros(state_dim),
            horizon: 0,
            scratch: BackwardScratch::new(state_dim, control_dim),
            rollouts: vec![Rollout::new(); branch_count],
        })
    }

    /// Optimizes the plan over `horizon` timesteps from `x0`.
    ///
    /// Seeds every branch's nominal trajectory by rolling out its dynamics
    /// under `initial_control`, then alternates backward sweeps and
    /// line-searched forward passes until the relative cost change drops
    /// below `params.convergence_ratio` or the iteration cap is reached.
    ///
    /// # Errors
    ///
    /// - [`IlqrError::BadClosure`] if a closure returns a non-finite value.
    /// - [`IlqrError::StuckAtLocalMin`] if damping escalation exceeds its
    ///   ceiling without finding a descent step.
    /// - [`IlqrError::NotConverged`] if the iteration cap is reached and
    ///   `params.strict` is set. Without `strict` the cap is logged as a
    ///   warning and the best trajectory is returned.
    ///
    /// # Panics
    ///
    /// Panics if `horizon` is zero, if `x0` or `initial_control` have the
    /// wrong dimension, or if `params.initial_alpha` is outside `(0, 1]`.
    pub fn solve(
        &mut self,
        horizon: usize,
        x0: &DVector<f64>,
        initial_control: &InitialControl,
        params: &SolveParams,
    ) -> Result<SolveResult> {
        assert!(horizon > 0, "horizon must be positive");
        assert_eq!(x0.len(), self.state_dim, "initial state dimension");
        initial_control.validate(horizon, self.control_dim);
        assert!(
            params.initial_alpha > 0.0 && params.initial_alpha <= 1.0,
            "initial_alpha must be in (0, 1]"
        );

        self.horizon = horizon;
        for (branch, rollout) in self.branches.iter_mut().zip(&mut self.rollouts) {
            branch.resize_horizon(horizon, self.state_dim, self.control_dim);
            rollout.resize(horizon, self.state_dim, self.control_dim);
        }

        // Seed the nominal trajectories and the baseline expected cost.
        let mut cost = 0.0;
        for (branch, rollout) in self.branches.iter_mut().zip(&mut self.rollouts) {
            rollout_open_loop(branch, x0, initial_control, rollout)?;
            commit_branch(branch, rollout, horizon);
            cost += branch.spec.probability * rollout.cost;
        }
        let initial_cost = cost;
        debug!(horizon, branches = self.branches.len(), cost, "seeded nominal trajectory");

        let mut mu = params.mu;
        let mut iterations = 0;
        let mut converged = false;

        while iterations < params.max_iterations {
            iterations += 1;
            self.refresh_expansions()?;

            // Backward sweep and line search share a damping-escalation
            // loop: either produces a descent step, detects a stall at the
            // current optimum, or raises mu and tries again without
            // advancing the iteration count.
            let mut step = None;
            loop {
                match self.backward(mu) {
                    Ok(()) => {}
                    Err(IlqrError::NonPsdControlHessian { t, .. }) => {
                        mu = escalate(mu);
                        debug!(mu, t, "control Hessian not positive definite; damping raised");
                        if mu > MU_LIMIT {
                            return Err(IlqrError::StuckAtLocalMin { cost, iterations });
                        }
                        continue;
                    }
                    Err(e) => return Err(e),
                }

                let mut alpha = params.initial_alpha;
                let mut best = f64::INFINITY;
                while alpha >= ALPHA_MIN {
                    let candidate = self.try_rollout(x0, alpha)?;
                    if candidate < cost {
                        step = Some((alpha, candidate));
                        break;
                    }
                    best = best.min(candidate);
                    alpha *= 0.5;
                }
                if step.is_some() {
                    break;
                }

                // No descent step, but the best candidate sits within the
                // convergence ratio of the current cost: the nominal is
                // already a local optimum of the model.
                let stall = (cost - best).abs() / cost.abs().max(1e-10);
                if stall < params.convergence_ratio {
                    converged = true;
                    break;
                }

                mu = escalate(mu);
                warn!(mu, "line search failed; damping raised");
                if mu > MU_LIMIT {
                    return Err(IlqrError::StuckAtLocalMin { cost, iterations });
                }
            }

            let Some((alpha, new_cost)) = step else {
                break;
            };

            self.commit_all();
            let previous = cost;
            cost = new_cost;
            mu = decay(mu);

            if params.verbose {
                info!(iteration = iterations, cost, alpha, mu, "accepted step");
            } else {
                debug!(iteration = iterations, cost, alpha, mu, "accepted step");
            }

            let ratio = (previous - cost).abs() / previous.abs().max(1e-10);
            if ratio < params.convergence_ratio {
                converged = true;
                break;
            }
        }

        if converged {
            info!(iterations, cost, "converged");
        } else {
            if params.strict {
                return Err(IlqrError::NotConverged { cost, iterations });
            }
            warn!(iterations, cost, "iteration cap reached without convergence");
        }

        Ok(SolveResult {
            cost,
            initial_cost,
            iterations,
            converged,
            mu,
        })
    }

    /// Feedback control for `branch` at state `x` and timestep `t`, with
    /// line-search step `alpha` (`alpha = 1` gives the plain feedback
    /// law).
    ///
    /// # Panics
    ///
    /// Panics if `branch` or `t` is out of range or `x` has the wrong
    /// dimension.
    #[must_use]
    pub fn compute_control(
        &self,
        branch: usize,
        x: &DVector<f64>,
        t: usize,
        alpha: f64,
    ) -> DVector<f64> {
        assert!(t < self.horizon, "timestep out of range");
        assert_eq!(x.len(), self.state_dim, "state dimension");
        self.branches[branch].nodes[t].control(x, alpha)
    }

    /// Simulates `branch` from `x0` under the current feedback law with
    /// step `alpha`, returning the visited states, applied controls, and
    /// accumulated cost.
    ///
    /// # Errors
    ///
    /// Returns [`IlqrError::BadClosure`] if a closure produces a
    /// non-finite value along the way.
    ///
    /// # Panics
    ///
    /// Panics if `branch` is out of range, `x0` has the wrong dimension,
    /// or the solver has not been solved yet.
    pub fn forward_pass(
        &self,
        branch: usize,
        x0: &DVector<f64>,
        alpha: f64,
    ) -> Result<(Vec<DVector<f64>>, Vec<DVector<f64>>, f64)> {
        assert!(self.horizon > 0, "no plan yet: call solve first");
        assert_eq!(x0.len(), self.state_dim, "state dimension");
        let mut rollout = Rollout::new();
        rollout.resize(self.horizon, self.state_dim, self.control_dim);
        rollout_policy(&self.branches[branch], x0, alpha, &mut rollout)?;
        Ok((rollout.states, rollout.controls, rollout.cost))
    }

    /// Replaces the branch probabilities, typically with a posterior from
    /// a hypothesis filter. The next backward sweep re-weights the tree.
    ///
    /// # Errors
    ///
    /// Returns [`IlqrError::BadPrior`] if `probabilities` has the wrong
    /// length, contains a negative or non-finite entry, or does not sum to
    /// one within [`PROBABILITY_TOLERANCE`](crate::PROBABILITY_TOLERANCE).
    pub fn set_branch_probabilities(&mut self, probabilities: &[f64]) -> Result<()> {
        if probabilities.len() != self.branches.len() {
            return Err(IlqrError::bad_prior(format!(
                "expected {} probabilities, got {}",
                self.branches.len(),
                probabilities.len()
            )));
        }
        validate_probabilities(probabilities)?;
        for (branch, &p) in self.branches.iter_mut().zip(probabilities) {
            branch.spec.probability = p;
        }
        Ok(())
    }

    /// Number of timesteps planned by the last `solve` call.
    #[must_use]
    pub const fn timesteps(&self) -> usize {
        self.horizon
    }

    /// Number of hypothesis branches.
    #[must_use]
    pub fn branch_count(&self) -> usize {
        self.branches.len()
    }

    /// State dimension n.
    #[must_use]
    pub const fn state_dim(&self) -> usize {
        self.state_dim
    }

    /// Control dimension m.
    #[must_use]
    pub const fn control_dim(&self) -> usize {
        self.control_dim
    }

    /// Current branch probabilities.
    #[must_use]
    pub fn probabilities(&self) -> Vec<f64> {
        self.branches.iter().map(|b| b.spec.probability).collect()
    }

    /// Nominal states `x̂_0 … x̂_T` of `branch`.
    ///
    /// # Panics
    ///
    /// Panics if `branch` is out of range.
    #[must_use]
    pub fn nominal_states(&self, branch: usize) -> Vec<DVector<f64>> {
        let branch = &self.branches[branch];
        let mut states: Vec<DVector<f64>> =
            branch.nodes.iter().map(|n| n.x_hat.clone()).collect();
        states.push(branch.terminal.x_hat.clone());
        states
    }

    /// Nominal controls `û_0 … û_{T−1}` of `branch`.
    ///
    /// # Panics
    ///
    /// Panics if `branch` is out of range.
    #[must_use]
    pub fn nominal_controls(&self, branch: usize) -> Vec<DVector<f64>> {
        self.branches[branch]
            .nodes
            .iter()
            .map(|n| n.u_hat.clone())
            .collect()
    }

    /// Feedback gain `K_t` of `branch`.
    ///
    /// # Panics
    ///
    /// Panics if `branch` or `t` is out of range.
    #[must_use]
    pub fn feedback_gain(&self, branch: usize, t: usize) -> &DMatrix<f64> {
        &self.branches[branch].nodes[t].k_fb
    }

    /// Feed-forward term `k_t` of `branch`.
    ///
    /// # Panics
    ///
    /// Panics if `branch` or `t` is out of range.
    #[must_use]
    pub fn feedforward_gain(&self, branch: usize, t: usize) -> &DVector<f64> {
        &self.branches[branch].nodes[t].k_ff
    }

    /// Cost-to-go of `branch` at timestep `t` (`t = timesteps()` returns
    /// the terminal value).
    ///
    /// # Panics
    ///
    /// Panics if `branch` or `t` is out of range.
    #[must_use]
    pub fn value(&self, branch: usize, t: usize) -> &QuadraticValue {
        let b = &self.branches[branch];
        if t == self.horizon {
            &b.terminal.value
        } else {
            &b.nodes[t].value
        }
    }

    /// Cost-to-go of the shared root under the current probabilities.
    #[must_use]
    pub const fn root_value(&self) -> &QuadraticValue {
        &self.root.value
    }

    /// Refreshes every node's Taylor models at the current nominal and
    /// re-seeds the terminal values.
    fn refresh_expansions(&mut self) -> Result<()> {
        let horizon = self.horizon;
        for branch in &mut self.branches {
            let Branch {
                spec,
                nodes,
                terminal,
            } = branch;
            for (t, node) in nodes.iter_mut().enumerate() {
                node.refresh(spec, t)?;
            }
            terminal.refresh(spec, horizon)?;
        }
        // The shared root mirrors the common (x̂₀, û₀).
        self.root.x_hat.copy_from(&self.branches[0].nodes[0].x_hat);
        self.root.u_hat.copy_from(&self.branches[0].nodes[0].u_hat);
        Ok(())
    }

    /// Backward sweep over every branch chain, then the mixed root backup.
    /// The root's gains and value are copied into each branch's first node
    /// so that every per-branch policy shares the committed first control.
    fn backward(&mut self, mu: f64) -> Result<()> {
        for branch in &mut self.branches {
            sweep_branch(branch, mu, &mut self.scratch)?;
        }
        backup_root(&mut self.root, &mut self.j_mix, &self.branches, mu, &mut self.scratch)?;
        for branch in &mut self.branches {
            let first = &mut branch.nodes[0];
            first.k_fb.copy_from(&self.root.k_fb);
            first.k_ff.copy_from(&self.root.k_ff);
            first.value.v.copy_from(&self.root.value.v);
            first.value.g.copy_from(&self.root.value.g);
            first.value.w = self.root.value.w;
        }
        Ok(())
    }

    /// Rolls out every branch at step `alpha` into the candidate buffers
    /// and returns the candidate expected cost.
    fn try_rollout(&mut self, x0: &DVector<f64>, alpha: f64) -> Result<f64> {
        let mut total = 0.0;
        for (branch, rollout) in self.branches.iter().zip(&mut self.rollouts) {
            rollout_policy(branch, x0, alpha, rollout)?;
            total += branch.spec.probability * rollout.cost;
        }
        Ok(total)
    }

    /// Commits the candidate buffers as the new nominal trajectories.
    fn commit_all(&mut self) {
        let horizon = self.horizon;
        for (branch, rollout) in self.branches.iter_mut().zip(&self.rollouts) {
            commit_branch(branch, rollout, horizon);
        }
    }
}

fn commit_branch(branch: &mut Branch, rollout: &Rollout, horizon: usize) {
    for t in 0..horizon {
        branch.nodes[t].x_hat.copy_from(&rollout.states[t]);
        branch.nodes[t].u_hat.copy_from(&rollout.controls[t]);
    }
    branch.terminal.x_hat.copy_from(&rollout.states[horizon]);
}

fn escalate(mu: f64) -> f64 {
    if mu == 0.0 {
        MU_SEED
    } else {
        mu * MU_SCALE
    }
}

fn decay(mu: f64) -> f64 {
    let mu = mu / MU_SCALE;
    if mu < MU_SEED {
        0.0
    } else {
        mu
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::dvector;

    fn point_mass_spec(probability: f64) -> BranchSpec {
        BranchSpec::new(
            |x: &DVector<f64>, u: &DVector<f64>| dvector![x[0] + 0.1 * u[0]],
            |x: &DVector<f64>, u: &DVector<f64>, _t| x[0] * x[0] + 0.1 * u[0] * u[0],
            |x: &DVector<f64>| 10.0 * x[0] * x[0],
            probability,
        )
    }

    #[test]
    fn rejects_bad_priors_at_construction() {
        let specs = vec![point_mass_spec(0.6), point_mass_spec(0.6)];
        assert!(matches!(
            HindsightSolver::new(specs, 1, 1),
            Err(IlqrError::BadPrior(_))
        ));
        assert!(matches!(
            HindsightSolver::new(vec![], 1, 1),
            Err(IlqrError::BadPrior(_))
        ));
    }

    #[test]
    fn set_branch_probabilities_validates() {
        let specs = vec![point_mass_spec(0.5), point_mass_spec(0.5)];
        let mut solver = HindsightSolver::new(specs, 1, 1).unwrap();
        assert!(solver.set_branch_probabilities(&[0.9, 0.1]).is_ok());
        assert_eq!(solver.probabilities(), vec![0.9, 0.1]);
        assert!(solver.set_branch_probabilities(&[0.9, 0.3]).is_err());
        assert!(solver.set_branch_probabilities(&[1.0]).is_err());
        assert!(solver.set_branch_probabilities(&[1.1, -0.1]).is_err());
        // A rejected update leaves the previous probabilities in place.
        assert_eq!(solver.probabilities(), vec![0.9, 0.1]);
    }

    #[test]
    fn solve_descends_and_reports_timesteps() {
        let mut solver = HindsightSolver::new(vec![point_mass_spec(1.0)], 1, 1).unwrap();
        let result = solver
            .solve(
                30,
                &dvector![3.0],
                &InitialControl::Hold(dvector![0.0]),
                &SolveParams::new(),
            )
            .unwrap();
        assert!(result.converged);
        assert!(result.cost < result.initial_cost);
        assert_eq!(solver.timesteps(), 30);
        assert_eq!(solver.nominal_states(0).len(), 31);
        assert_eq!(solver.nominal_controls(0).len(), 30);
    }

    #[test]
    fn bad_closure_surfaces_with_timestep() {
        let spec = BranchSpec::new(
            |x: &DVector<f64>, u: &DVector<f64>| dvector![x[0] + u[0]],
            |_x: &DVector<f64>, _u: &DVector<f64>, t| {
                if t >= 3 {
                    f64::NAN
                } else {
                    0.0
                }
            },
            |_x: &DVector<f64>| 0.0,
            1.0,
        );
        let mut solver = HindsightSolver::new(vec![spec], 1, 1).unwrap();
        let err = solver
            .solve(
                5,
                &dvector![0.0],
                &InitialControl::Hold(dvector![0.0]),
                &SolveParams::new(),
            )
            .unwrap_err();
        assert!(matches!(err, IlqrError::BadClosure { t: 3, .. }));
    }

    #[test]
    fn schedule_seed_is_used() {
        let mut solver = HindsightSolver::new(vec![point_mass_spec(1.0)], 1, 1).unwrap();
        let schedule: Vec<DVector<f64>> = (0..10).map(|t| dvector![f64::from(t)]).collect();
        let result = solver
            .solve(
                10,
                &dvector![1.0],
                &InitialControl::Schedule(schedule),
                &SolveParams::new().with_max_iterations(1),
            )
            .unwrap();
        assert!(result.cost <= result.initial_cost);
    }

    #[test]
    fn degenerate_second_branch_is_still_rolled_out() {
        let specs = vec![point_mass_spec(1.0), point_mass_spec(0.0)];
        let mut solver = HindsightSolver::new(specs, 1, 1).unwrap();
        let result = solver
            .solve(
                10,
                &dvector![1.0],
                &InitialControl::Hold(dvector![0.0]),
                &SolveParams::new(),
            )
            .unwrap();
        assert!(result.converged);
        // The zero-probability branch keeps a well-defined trajectory.
        let states = solver.nominal_states(1);
        assert_eq!(states.len(), 11);
        assert!(states.iter().all(|x| x[0].is_finite()));
    }
}

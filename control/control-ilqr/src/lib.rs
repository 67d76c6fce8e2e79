//! Iterative LQR with hindsight branching over dynamics hypotheses.
//!
//! This crate solves finite-horizon discrete-time optimal control for
//! nonlinear plants whose model is itself uncertain. The planner holds K
//! hypotheses about the true dynamics/cost, each with a prior probability,
//! and commits to a single first control that hedges across them while
//! every branch stays free to specialize from the second step on.
//!
//! # Pieces
//!
//! - [`BranchSpec`] - one hypothesis: dynamics, running cost, terminal
//!   cost, and prior probability
//! - [`HindsightSolver`] - the solver: Taylor expansion around a nominal
//!   trajectory, Riccati-style backward sweep over the probability-weighted
//!   branch tree, line-searched forward rollout, Levenberg-Marquardt
//!   damping
//! - [`SolveParams`] / [`SolveResult`] - knobs and diagnostics
//! - [`numdiff`] - the central-difference engine behind the expansions
//!
//! Derivatives come from central finite differences by default; closures
//! with cheap analytic derivatives can register them per closure on the
//! [`BranchSpec`].
//!
//! # Example
//!
//! ```
//! use control_ilqr::{BranchSpec, HindsightSolver, InitialControl, SolveParams};
//! use nalgebra::{dvector, DVector};
//!
//! let dt = 0.1;
//! // Two hypotheses about the actuator gain.
//! let branch = |gain: f64, probability: f64| {
//!     BranchSpec::new(
//!         move |x: &DVector<f64>, u: &DVector<f64>| {
//!             dvector![x[0] + dt * x[1], x[1] + dt * gain * u[0]]
//!         },
//!         |x: &DVector<f64>, u: &DVector<f64>, _t| {
//!             x.dot(x) + 0.1 * u.dot(u)
//!         },
//!         |x: &DVector<f64>| 10.0 * x.dot(x),
//!         probability,
//!     )
//! };
//!
//! let mut solver =
//!     HindsightSolver::new(vec![branch(1.0, 0.5), branch(0.5, 0.5)], 2, 1).unwrap();
//! let result = solver
//!     .solve(
//!         40,
//!         &dvector![1.0, 0.0],
//!         &InitialControl::Hold(dvector![0.0]),
//!         &SolveParams::new(),
//!     )
//!     .unwrap();
//! assert!(result.cost < result.initial_cost);
//!
//! // A filter narrowed the hypotheses down; re-weight and re-solve.
//! solver.set_branch_probabilities(&[0.95, 0.05]).unwrap();
//! ```

// Safety: Deny unwrap/expect in library code. Tests may use them.
#![cfg_attr(not(test), deny(clippy::unwrap_used, clippy::expect_used))]
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
// Control-theory notation (A, B, Q, R, K) reads better than prose names.
#![allow(clippy::many_single_char_names)]

mod backward;
mod branch;
mod error;
mod forward;
mod node;
pub mod numdiff;
mod params;
mod result;
mod solver;
mod taylor;
mod value;

pub use branch::{
    BranchSpec, CostFn, CostQuadraticFn, DynamicsFn, DynamicsJacobianFn, FinalCostFn,
    FinalCostQuadraticFn, PROBABILITY_TOLERANCE,
};
pub use error::{IlqrError, Result};
pub use params::{InitialControl, SolveParams};
pub use result::SolveResult;
pub use solver::HindsightSolver;
pub use taylor::{CostExpansion, DynamicsExpansion, TerminalExpansion};
pub use value::QuadraticValue;

/// Prelude for convenient imports.
pub mod prelude {
    pub use super::{
        BranchSpec, HindsightSolver, IlqrError, InitialControl, SolveParams, SolveResult,
    };
}

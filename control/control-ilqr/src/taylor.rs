//! Local Taylor models of dynamics and cost around an expansion point.
//!
//! Every timestep of the plan keeps a [`DynamicsExpansion`] and a
//! [`CostExpansion`] refreshed at the current nominal `(x̂, û)`; the
//! terminal node keeps a [`TerminalExpansion`] at `x̂_T`. The records are
//! allocated once and overwritten in place on every refresh.

use nalgebra::{DMatrix, DVector};

use crate::branch::{CostFn, DynamicsFn, FinalCostFn};
use crate::numdiff::{self, NonFiniteEval};

/// First-order model of the dynamics at `(x̂, û)`:
/// `x' ≈ x̂' + A·(x − x̂) + B·(u − û)`.
#[derive(Debug, Clone)]
pub struct DynamicsExpansion {
    /// State Jacobian `∂f/∂x`, n×n.
    pub a: DMatrix<f64>,
    /// Control Jacobian `∂f/∂u`, n×m.
    pub b: DMatrix<f64>,
}

impl DynamicsExpansion {
    /// Zero-initialized expansion for the given dimensions.
    #[must_use]
    pub fn zeros(state_dim: usize, control_dim: usize) -> Self {
        Self {
            a: DMatrix::zeros(state_dim, state_dim),
            b: DMatrix::zeros(state_dim, control_dim),
        }
    }

    pub(crate) fn set_zero(&mut self) {
        self.a.fill(0.0);
        self.b.fill(0.0);
    }

    /// `self += weight · other`, used to form the expected model at a
    /// branching node.
    pub(crate) fn add_scaled(&mut self, other: &Self, weight: f64) {
        self.a.zip_apply(&other.a, |s, o| *s += weight * o);
        self.b.zip_apply(&other.b, |s, o| *s += weight * o);
    }

    /// Refreshes `A`, `B` by central differences through `dynamics`.
    pub(crate) fn refresh_numeric(
        &mut self,
        dynamics: &DynamicsFn,
        x: &DVector<f64>,
        u: &DVector<f64>,
    ) -> Result<(), NonFiniteEval> {
        let (n, m) = (x.len(), u.len());
        let mut z = DVector::zeros(n + m);
        z.rows_mut(0, n).copy_from(x);
        z.rows_mut(n, m).copy_from(u);
        let mut jac = DMatrix::zeros(n, n + m);
        numdiff::jacobian(
            |z: &DVector<f64>| dynamics(&z.rows(0, n).into_owned(), &z.rows(n, m).into_owned()),
            &z,
            &mut jac,
        )?;
        self.a.copy_from(&jac.columns(0, n));
        self.b.copy_from(&jac.columns(n, m));
        Ok(())
    }
}

/// Second-order model of the running cost at `(x̂, û, t)`:
///
/// ```text
/// c ≈ c₀ + b_xᵀΔx + b_uᵀΔu + ½ΔxᵀQΔx + ΔxᵀPΔu + ½ΔuᵀRΔu
/// ```
#[derive(Debug, Clone)]
pub struct CostExpansion {
    /// State curvature, n×n symmetric.
    pub q: DMatrix<f64>,
    /// Control curvature, m×m symmetric.
    pub r: DMatrix<f64>,
    /// State-control cross term, n×m.
    pub p: DMatrix<f64>,
    /// State gradient.
    pub b_x: DVector<f64>,
    /// Control gradient.
    pub b_u: DVector<f64>,
    /// Cost at the expansion point.
    pub c0: f64,
}

impl CostExpansion {
    /// Zero-initialized expansion for the given dimensions.
    #[must_use]
    pub fn zeros(state_dim: usize, control_dim: usize) -> Self {
        Self {
            q: DMatrix::zeros(state_dim, state_dim),
            r: DMatrix::zeros(control_dim, control_dim),
            p: DMatrix::zeros(state_dim, control_dim),
            b_x: DVector::zeros(state_dim),
            b_u: DVector::zeros(control_dim),
            c0: 0.0,
        }
    }

    pub(crate) fn set_zero(&mut self) {
        self.q.fill(0.0);
        self.r.fill(0.0);
        self.p.fill(0.0);
        self.b_x.fill(0.0);
        self.b_u.fill(0.0);
        self.c0 = 0.0;
    }

    pub(crate) fn add_scaled(&mut self, other: &Self, weight: f64) {
        self.q.zip_apply(&other.q, |s, o| *s += weight * o);
        self.r.zip_apply(&other.r, |s, o| *s += weight * o);
        self.p.zip_apply(&other.p, |s, o| *s += weight * o);
        self.b_x.axpy(weight, &other.b_x, 1.0);
        self.b_u.axpy(weight, &other.b_u, 1.0);
        self.c0 += weight * other.c0;
    }

    /// Refreshes the quadratic model by central differences through `cost`.
    pub(crate) fn refresh_numeric(
        &mut self,
        cost: &CostFn,
        x: &DVector<f64>,
        u: &DVector<f64>,
        t: usize,
    ) -> Result<(), NonFiniteEval> {
        let (n, m) = (x.len(), u.len());
        self.c0 = cost(x, u, t);
        if !self.c0.is_finite() {
            return Err(NonFiniteEval);
        }

        let mut z = DVector::zeros(n + m);
        z.rows_mut(0, n).copy_from(x);
        z.rows_mut(n, m).copy_from(u);
        let packed =
            |z: &DVector<f64>| cost(&z.rows(0, n).into_owned(), &z.rows(n, m).into_owned(), t);

        let mut grad = DVector::zeros(n + m);
        numdiff::gradient(&packed, &z, &mut grad)?;
        self.b_x.copy_from(&grad.rows(0, n));
        self.b_u.copy_from(&grad.rows(n, m));

        let mut hess = DMatrix::zeros(n + m, n + m);
        numdiff::hessian(&packed, &z, &mut hess)?;
        self.q.copy_from(&hess.view((0, 0), (n, n)));
        self.r.copy_from(&hess.view((n, n), (m, m)));
        self.p.copy_from(&hess.view((0, n), (n, m)));
        Ok(())
    }
}

/// Second-order model of the terminal cost at `x̂_T`:
/// `c ≈ c₀ + b_xᵀΔx + ½ΔxᵀQΔx`.
#[derive(Debug, Clone)]
pub struct TerminalExpansion {
    /// State curvature, n×n symmetric.
    pub q: DMatrix<f64>,
    /// State gradient.
    pub b_x: DVector<f64>,
    /// Cost at the expansion point.
    pub c0: f64,
}

impl TerminalExpansion {
    /// Zero-initialized expansion for the given state dimension.
    #[must_use]
    pub fn zeros(state_dim: usize) -> Self {
        Self {
            q: DMatrix::zeros(state_dim, state_dim),
            b_x: DVector::zeros(state_dim),
            c0: 0.0,
        }
    }

    /// Refreshes the quadratic model by central differences through
    /// `final_cost`.
    pub(crate) fn refresh_numeric(
        &mut self,
        final_cost: &FinalCostFn,
        x: &DVector<f64>,
    ) -> Result<(), NonFiniteEval> {
        self.c0 = final_cost(x);
        if !self.c0.is_finite() {
            return Err(NonFiniteEval);
        }
        numdiff::gradient(|x: &DVector<f64>| final_cost(x), x, &mut self.b_x)?;
        numdiff::hessian(|x: &DVector<f64>| final_cost(x), x, &mut self.q)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::{dmatrix, dvector};
    use std::sync::Arc;

    #[test]
    fn linear_dynamics_recover_a_and_b() {
        let a = dmatrix![1.0, 0.1; 0.0, 1.0];
        let b = dmatrix![0.0; 0.1];
        let dynamics: DynamicsFn = {
            let (a, b) = (a.clone(), b.clone());
            Arc::new(move |x: &DVector<f64>, u: &DVector<f64>| &a * x + &b * u)
        };
        let mut exp = DynamicsExpansion::zeros(2, 1);
        exp.refresh_numeric(&dynamics, &dvector![1.0, -2.0], &dvector![0.5])
            .unwrap();
        assert_relative_eq!(exp.a, a, epsilon = 1e-9);
        assert_relative_eq!(exp.b, b, epsilon = 1e-9);
    }

    #[test]
    fn quadratic_cost_recovers_curvature_and_gradient() {
        // c = ½(2x₀² + x₁²) + x₀·u + ½·4u² + 3x₀ + u
        let cost: CostFn = Arc::new(|x: &DVector<f64>, u: &DVector<f64>, _t: usize| {
            0.5 * (2.0 * x[0] * x[0] + x[1] * x[1])
                + x[0] * u[0]
                + 2.0 * u[0] * u[0]
                + 3.0 * x[0]
                + u[0]
        });
        let x = dvector![0.4, -0.3];
        let u = dvector![0.2];
        let mut exp = CostExpansion::zeros(2, 1);
        exp.refresh_numeric(&cost, &x, &u, 7).unwrap();

        assert_relative_eq!(exp.q[(0, 0)], 2.0, epsilon = 1e-4);
        assert_relative_eq!(exp.q[(1, 1)], 1.0, epsilon = 1e-4);
        assert_relative_eq!(exp.r[(0, 0)], 4.0, epsilon = 1e-4);
        assert_relative_eq!(exp.p[(0, 0)], 1.0, epsilon = 1e-4);
        assert_relative_eq!(exp.b_x[0], 2.0 * 0.4 + 0.2 + 3.0, epsilon = 1e-7);
        assert_relative_eq!(exp.b_u[0], 0.4 + 4.0 * 0.2 + 1.0, epsilon = 1e-7);
        assert_relative_eq!(exp.c0, cost(&x, &u, 7), epsilon = 1e-12);
    }

    #[test]
    fn probability_weighted_mix_is_convex() {
        let mut acc = CostExpansion::zeros(1, 1);
        let mut lhs = CostExpansion::zeros(1, 1);
        let mut rhs = CostExpansion::zeros(1, 1);
        lhs.q[(0, 0)] = 2.0;
        lhs.c0 = 1.0;
        rhs.q[(0, 0)] = 6.0;
        rhs.c0 = 3.0;
        acc.add_scaled(&lhs, 0.25);
        acc.add_scaled(&rhs, 0.75);
        assert_relative_eq!(acc.q[(0, 0)], 5.0);
        assert_relative_eq!(acc.c0, 2.5);
    }

    #[test]
    fn terminal_expansion_matches_pure_quadratic() {
        let final_cost: FinalCostFn =
            Arc::new(|x: &DVector<f64>| 5.0 * x[0] * x[0] + 0.5 * x[1] * x[1]);
        let mut exp = TerminalExpansion::zeros(2);
        exp.refresh_numeric(&final_cost, &dvector![1.0, 2.0]).unwrap();
        assert_relative_eq!(exp.q[(0, 0)], 10.0, epsilon = 1e-3);
        assert_relative_eq!(exp.q[(1, 1)], 1.0, epsilon = 1e-4);
        assert_relative_eq!(exp.b_x[0], 10.0, epsilon = 1e-7);
        assert_relative_eq!(exp.b_x[1], 2.0, epsilon = 1e-7);
    }
}

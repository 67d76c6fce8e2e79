//! Quadratic cost-to-go representation.

use nalgebra::{DVector, DMatrix, RowDVector};

use crate::taylor::TerminalExpansion;

/// Cost-to-go in canonical quadratic form
/// `J(x) = ½·ΔxᵀVΔx + G·Δx + W` around the node's expansion point.
///
/// `V` is kept symmetric: every update ends with `V ← ½(V + Vᵀ)`.
#[derive(Debug, Clone)]
pub struct QuadraticValue {
    /// Curvature, n×n symmetric.
    pub v: DMatrix<f64>,
    /// Gradient, stored as a row vector.
    pub g: RowDVector<f64>,
    /// Constant term. Not consulted for convergence; kept for
    /// diagnostics.
    pub w: f64,
}

impl QuadraticValue {
    /// Zero value for the given state dimension.
    #[must_use]
    pub fn zeros(state_dim: usize) -> Self {
        Self {
            v: DMatrix::zeros(state_dim, state_dim),
            g: RowDVector::zeros(state_dim),
            w: 0.0,
        }
    }

    /// Evaluates the quadratic at a displacement `dx` from the expansion
    /// point.
    #[must_use]
    pub fn evaluate(&self, dx: &DVector<f64>) -> f64 {
        0.5 * (&self.v * dx).dot(dx) + (&self.g * dx)[0] + self.w
    }

    pub(crate) fn set_zero(&mut self) {
        self.v.fill(0.0);
        self.g.fill(0.0);
        self.w = 0.0;
    }

    /// `self += weight · other`, the branch-probability mix of successor
    /// values at a split.
    pub(crate) fn add_scaled(&mut self, other: &Self, weight: f64) {
        self.v.zip_apply(&other.v, |s, o| *s += weight * o);
        self.g.zip_apply(&other.g, |s, o| *s += weight * o);
        self.w += weight * other.w;
    }

    /// Seeds the value from a terminal cost expansion.
    pub(crate) fn set_terminal(&mut self, terminal: &TerminalExpansion) {
        self.v.copy_from(&terminal.q);
        self.g.tr_copy_from(&terminal.b_x);
        self.w = terminal.c0;
        self.symmetrize();
    }

    /// `V ← ½(V + Vᵀ)`.
    pub(crate) fn symmetrize(&mut self) {
        let n = self.v.nrows();
        for i in 0..n {
            for j in (i + 1)..n {
                let avg = 0.5 * (self.v[(i, j)] + self.v[(j, i)]);
                self.v[(i, j)] = avg;
                self.v[(j, i)] = avg;
            }
        }
    }

    /// Frobenius asymmetry ratio `‖V − Vᵀ‖_F / ‖V‖_F`; diagnostic.
    #[must_use]
    pub fn asymmetry(&self) -> f64 {
        let norm = self.v.norm();
        if norm == 0.0 {
            return 0.0;
        }
        (&self.v - self.v.transpose()).norm() / norm
    }
}

//! Riccati-style backward sweep over the plan tree.
//!
//! Interior nodes back up through their single successor; the shared root
//! backs up through the probability-weighted mixture of the branch
//! successor values, which is what makes the first control hedge across
//! hypotheses.

use nalgebra::{Cholesky, DMatrix, DVector};

use crate::branch::Branch;
use crate::error::{IlqrError, Result};
use crate::node::PlanNode;
use crate::value::QuadraticValue;

/// Pre-allocated temporaries for the Bellman backup. One instance is
/// shared by every node of every branch; the inner loop allocates nothing
/// beyond the Cholesky factorization.
#[derive(Debug)]
pub(crate) struct BackwardScratch {
    /// `V_{t+1} + μI`.
    v_reg: DMatrix<f64>,
    /// `V_reg · A`.
    va: DMatrix<f64>,
    /// `V_reg · B`.
    vb: DMatrix<f64>,
    q_xx: DMatrix<f64>,
    q_uu: DMatrix<f64>,
    q_ux: DMatrix<f64>,
    q_x: DVector<f64>,
    q_u: DVector<f64>,
    /// `G_{t+1}ᵀ` as a column.
    g_col: DVector<f64>,
    /// `Q_uu · K`.
    kq: DMatrix<f64>,
    /// `Q_uu · k`.
    quu_k: DVector<f64>,
}

impl BackwardScratch {
    pub fn new(state_dim: usize, control_dim: usize) -> Self {
        Self {
            v_reg: DMatrix::zeros(state_dim, state_dim),
            va: DMatrix::zeros(state_dim, state_dim),
            vb: DMatrix::zeros(state_dim, control_dim),
            q_xx: DMatrix::zeros(state_dim, state_dim),
            q_uu: DMatrix::zeros(control_dim, control_dim),
            q_ux: DMatrix::zeros(control_dim, state_dim),
            q_x: DVector::zeros(state_dim),
            q_u: DVector::zeros(control_dim),
            g_col: DVector::zeros(state_dim),
            kq: DMatrix::zeros(control_dim, state_dim),
            quu_k: DVector::zeros(control_dim),
        }
    }
}

/// One Bellman backup: given the successor value `J_{t+1}`, computes the
/// node's gains `(K, k)` and its value `J_t`.
///
/// With damping `mu`, both `R` and `V_{t+1}` receive `+μI` before the
/// control solve; the same regularized terms feed the value update so each
/// backup stays self-consistent.
pub(crate) fn backup_node(
    node: &mut PlanNode,
    next: &QuadraticValue,
    t: usize,
    mu: f64,
    s: &mut BackwardScratch,
) -> Result<()> {
    let n = node.x_hat.len();
    let m = node.u_hat.len();

    s.v_reg.copy_from(&next.v);
    for i in 0..n {
        s.v_reg[(i, i)] += mu;
    }
    s.va.gemm(1.0, &s.v_reg, &node.dynamics.a, 0.0);
    s.vb.gemm(1.0, &s.v_reg, &node.dynamics.b, 0.0);

    // Q_xx = Q + AᵀVA,  Q_uu = R + μI + BᵀVB,  Q_ux = Pᵀ + BᵀVA
    s.q_xx.copy_from(&node.cost.q);
    s.q_xx.gemm_tr(1.0, &node.dynamics.a, &s.va, 1.0);
    s.q_uu.copy_from(&node.cost.r);
    for i in 0..m {
        s.q_uu[(i, i)] += mu;
    }
    s.q_uu.gemm_tr(1.0, &node.dynamics.b, &s.vb, 1.0);
    s.q_ux.tr_copy_from(&node.cost.p);
    s.q_ux.gemm_tr(1.0, &node.dynamics.b, &s.va, 1.0);

    // Q_x = b_x + AᵀG_{t+1}ᵀ,  Q_u = b_u + BᵀG_{t+1}ᵀ
    s.g_col.tr_copy_from(&next.g);
    s.q_x.copy_from(&node.cost.b_x);
    s.q_x.gemv_tr(1.0, &node.dynamics.a, &s.g_col, 1.0);
    s.q_u.copy_from(&node.cost.b_u);
    s.q_u.gemv_tr(1.0, &node.dynamics.b, &s.g_col, 1.0);

    // K = −Q_uu⁻¹ Q_ux,  k = −Q_uu⁻¹ Q_u
    let chol = Cholesky::new(s.q_uu.clone())
        .ok_or(IlqrError::NonPsdControlHessian { t, mu })?;
    node.k_fb.copy_from(&s.q_ux);
    chol.solve_mut(&mut node.k_fb);
    node.k_fb.neg_mut();
    node.k_ff.copy_from(&s.q_u);
    chol.solve_mut(&mut node.k_ff);
    node.k_ff.neg_mut();

    // V_t = Q_xx + KᵀQ_uu K + KᵀQ_ux + Q_uxᵀK
    s.kq.gemm(1.0, &s.q_uu, &node.k_fb, 0.0);
    node.value.v.copy_from(&s.q_xx);
    node.value.v.gemm_tr(1.0, &node.k_fb, &s.kq, 1.0);
    node.value.v.gemm_tr(1.0, &node.k_fb, &s.q_ux, 1.0);
    node.value.v.gemm_tr(1.0, &s.q_ux, &node.k_fb, 1.0);
    node.value.symmetrize();

    // G_t = Q_xᵀ + kᵀQ_uu K + kᵀQ_ux + Q_uᵀK
    s.quu_k.gemv(1.0, &s.q_uu, &node.k_ff, 0.0);
    node.value.g.tr_copy_from(&s.q_x);
    node.value.g.gemm_tr(1.0, &s.quu_k, &node.k_fb, 1.0);
    node.value.g.gemm_tr(1.0, &node.k_ff, &s.q_ux, 1.0);
    node.value.g.gemm_tr(1.0, &s.q_u, &node.k_fb, 1.0);

    // W_t = W_{t+1} + c₀ + ½kᵀQ_uu k + Q_uᵀk
    node.value.w =
        next.w + node.cost.c0 + 0.5 * node.k_ff.dot(&s.quu_k) + s.q_u.dot(&node.k_ff);

    Ok(())
}

/// Backs up the interior of one branch chain, `t = T−1` down to `1`.
///
/// The terminal value `J_T` is seeded during the refresh phase; the root
/// (`t = 0`) is shared between branches and handled by [`backup_root`].
pub(crate) fn sweep_branch(branch: &mut Branch, mu: f64, s: &mut BackwardScratch) -> Result<()> {
    let horizon = branch.nodes.len();
    for t in (1..horizon).rev() {
        if t == horizon - 1 {
            backup_node(&mut branch.nodes[t], &branch.terminal.value, t, mu, s)?;
        } else {
            let (head, tail) = branch.nodes.split_at_mut(t + 1);
            backup_node(&mut head[t], &tail[0].value, t, mu, s)?;
        }
    }
    Ok(())
}

/// Backs up the shared root through the probability-mixed successor value.
///
/// The root's local model is the expected one: expansions of every
/// branch's first node mixed by branch probability, matching the mixture
/// applied to the successor values.
pub(crate) fn backup_root(
    root: &mut PlanNode,
    j_mix: &mut QuadraticValue,
    branches: &[Branch],
    mu: f64,
    s: &mut BackwardScratch,
) -> Result<()> {
    root.dynamics.set_zero();
    root.cost.set_zero();
    j_mix.set_zero();
    for branch in branches {
        let w = branch.spec.probability;
        root.dynamics.add_scaled(&branch.nodes[0].dynamics, w);
        root.cost.add_scaled(&branch.nodes[0].cost, w);
        let next = if branch.nodes.len() > 1 {
            &branch.nodes[1].value
        } else {
            &branch.terminal.value
        };
        j_mix.add_scaled(next, w);
    }
    backup_node(root, j_mix, 0, mu, s)
}

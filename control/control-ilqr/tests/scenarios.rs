//! End-to-end solver scenarios: a linear-quadratic baseline against the
//! Riccati solution, a nonlinear swing-up, hindsight planning with
//! re-weighted hypotheses, a degenerate prior, and an ill-conditioned
//! control cost.

use approx::assert_relative_eq;
use control_filter::HypothesisFilter;
use control_ilqr::{
    BranchSpec, CostExpansion, HindsightSolver, IlqrError, InitialControl, SolveParams,
    TerminalExpansion,
};
use nalgebra::{dmatrix, dvector, DMatrix, DVector};

const DT: f64 = 0.1;

fn double_integrator_matrices() -> (DMatrix<f64>, DMatrix<f64>) {
    (dmatrix![1.0, DT; 0.0, 1.0], dmatrix![0.0; DT])
}

/// Double integrator with quadratic cost, finite differences only.
fn double_integrator_spec(probability: f64, control_gain: f64) -> BranchSpec {
    let (a, b) = double_integrator_matrices();
    let b = b * control_gain;
    BranchSpec::new(
        move |x: &DVector<f64>, u: &DVector<f64>| &a * x + &b * u,
        |x: &DVector<f64>, u: &DVector<f64>, _t| 0.5 * (x.dot(x) + 0.01 * u.dot(u)),
        |x: &DVector<f64>| 0.5 * 10.0 * x.dot(x),
        probability,
    )
}

/// Same plant with analytic Jacobians and quadraticizations registered.
fn double_integrator_spec_analytic(probability: f64) -> BranchSpec {
    let (a, b) = double_integrator_matrices();
    let (a_jac, b_jac) = (a.clone(), b.clone());
    double_integrator_spec(probability, 1.0)
        .with_dynamics_jacobian(
            move |_x: &DVector<f64>,
                  _u: &DVector<f64>,
                  out_a: &mut DMatrix<f64>,
                  out_b: &mut DMatrix<f64>| {
                out_a.copy_from(&a_jac);
                out_b.copy_from(&b_jac);
            },
        )
        .with_cost_quadratic(
            |x: &DVector<f64>, u: &DVector<f64>, _t, out: &mut CostExpansion| {
                out.q = DMatrix::identity(2, 2);
                out.r = DMatrix::identity(1, 1) * 0.01;
                out.p.fill(0.0);
                out.b_x.copy_from(x);
                out.b_u.copy_from(&(u * 0.01));
            },
        )
        .with_final_cost_quadratic(|x: &DVector<f64>, out: &mut TerminalExpansion| {
            out.q = DMatrix::identity(2, 2) * 10.0;
            out.b_x.copy_from(&(x * 10.0));
        })
}

/// Finite-horizon discrete Riccati recursion for
/// `c = ½xᵀQx + ½uᵀRu`, `c_T = ½xᵀQ_Tx`. Returns `(K_t, P_0)` with the
/// `u = −K·x` sign convention.
fn riccati(
    a: &DMatrix<f64>,
    b: &DMatrix<f64>,
    q: &DMatrix<f64>,
    r: &DMatrix<f64>,
    q_terminal: &DMatrix<f64>,
    horizon: usize,
) -> (Vec<DMatrix<f64>>, DMatrix<f64>) {
    let mut p = q_terminal.clone();
    let mut gains = vec![DMatrix::zeros(b.ncols(), a.nrows()); horizon];
    for t in (0..horizon).rev() {
        let quu = r + b.transpose() * &p * b;
        let k = quu.try_inverse().unwrap() * b.transpose() * &p * a;
        p = q + a.transpose() * &p * a - a.transpose() * &p * b * &k;
        gains[t] = k;
    }
    (gains, p)
}

/// S1: the solver on a linear-quadratic plant must match the analytic LQR
/// solution — gains to 1e-6 with analytic derivatives, total cost to 1%.
#[test]
fn s1_double_integrator_matches_lqr() {
    let horizon = 50;
    let x0 = dvector![5.0, 0.0];

    let mut solver =
        HindsightSolver::new(vec![double_integrator_spec_analytic(1.0)], 2, 1).unwrap();
    let result = solver
        .solve(
            horizon,
            &x0,
            &InitialControl::Hold(dvector![0.0]),
            &SolveParams::new(),
        )
        .unwrap();
    assert!(result.converged);

    let (a, b) = double_integrator_matrices();
    let q = DMatrix::identity(2, 2);
    let r = DMatrix::identity(1, 1) * 0.01;
    let q_terminal = DMatrix::identity(2, 2) * 10.0;
    let (gains, p0) = riccati(&a, &b, &q, &r, &q_terminal, horizon);

    // One backward pass on exact expansions reproduces the Riccati gains
    // (the solver's K uses the u = û + K·(x − x̂) convention, hence the
    // sign flip).
    for t in [0, 1, 10, 25, 49] {
        let k_solver = solver.feedback_gain(0, t);
        for i in 0..2 {
            assert_relative_eq!(k_solver[(0, i)], -gains[t][(0, i)], max_relative = 1e-6);
        }
    }

    // Analytic optimal cost ½·x₀ᵀP₀x₀.
    let optimal = 0.5 * (&p0 * &x0).dot(&x0);
    assert_relative_eq!(result.cost, optimal, max_relative = 0.01);

    // The regulator parks the state at the origin.
    let x_final = &solver.nominal_states(0)[horizon];
    assert!(x_final.norm() < 0.05, "‖x_T‖ = {}", x_final.norm());
}

/// S1 with finite differences: same plant, looser gain tolerance (the
/// Hessian stencil cancels to roughly 1e-5 absolute).
#[test]
fn s1_finite_differences_track_riccati() {
    let horizon = 50;
    let x0 = dvector![5.0, 0.0];
    let mut solver = HindsightSolver::new(vec![double_integrator_spec(1.0, 1.0)], 2, 1).unwrap();
    let result = solver
        .solve(
            horizon,
            &x0,
            &InitialControl::Hold(dvector![0.0]),
            &SolveParams::new(),
        )
        .unwrap();
    assert!(result.converged);

    let (a, b) = double_integrator_matrices();
    let (gains, p0) = riccati(
        &a,
        &b,
        &DMatrix::identity(2, 2),
        &(DMatrix::identity(1, 1) * 0.01),
        &(DMatrix::identity(2, 2) * 10.0),
        horizon,
    );
    for t in [0, 25, 49] {
        let k_solver = solver.feedback_gain(0, t);
        for i in 0..2 {
            assert_relative_eq!(k_solver[(0, i)], -gains[t][(0, i)], max_relative = 1e-2);
        }
    }
    let optimal = 0.5 * (&p0 * &x0).dot(&x0);
    assert_relative_eq!(result.cost, optimal, max_relative = 0.01);
}

/// Every value matrix stays symmetric through a full solve.
#[test]
fn value_matrices_stay_symmetric() {
    let horizon = 30;
    let mut solver = HindsightSolver::new(
        vec![double_integrator_spec(0.5, 1.0), double_integrator_spec(0.5, 0.6)],
        2,
        1,
    )
    .unwrap();
    solver
        .solve(
            horizon,
            &dvector![2.0, -1.0],
            &InitialControl::Hold(dvector![0.0]),
            &SolveParams::new(),
        )
        .unwrap();
    for branch in 0..2 {
        for t in 0..=horizon {
            assert!(solver.value(branch, t).asymmetry() <= 1e-8);
        }
    }
    assert!(solver.root_value().asymmetry() <= 1e-8);
}

/// S2: pendulum swing-up from hanging to upright.
#[test]
fn s2_pendulum_swing_up() {
    let dt = 0.05;
    let spec = BranchSpec::new(
        move |x: &DVector<f64>, u: &DVector<f64>| {
            // θ measured from upright; θ̈ = (g/l)·sinθ + u
            dvector![x[0] + dt * x[1], x[1] + dt * (9.81 * x[0].sin() + u[0])]
        },
        |x: &DVector<f64>, u: &DVector<f64>, _t| {
            0.5 * (x[0] * x[0] + 0.1 * x[1] * x[1] + 0.01 * u[0] * u[0])
        },
        |x: &DVector<f64>| 0.5 * 100.0 * (x[0] * x[0] + x[1] * x[1]),
        1.0,
    );
    let mut solver = HindsightSolver::new(vec![spec], 2, 1).unwrap();
    let result = solver
        .solve(
            100,
            &dvector![std::f64::consts::PI, 0.0],
            &InitialControl::Hold(dvector![0.0]),
            &SolveParams::new(),
        )
        .unwrap();

    assert!(result.converged, "swing-up did not converge");
    assert!(result.iterations <= 80, "took {} iterations", result.iterations);
    let theta_final = solver.nominal_states(0)[100][0];
    assert!(theta_final.abs() < 0.1, "θ_T = {theta_final}");
}

/// Differential drive with one soft circular obstacle per hypothesis.
fn diffdrive_spec(probability: f64, obstacle: (f64, f64)) -> BranchSpec {
    let dt = 0.2;
    let (ox, oy) = obstacle;
    let radius = 1.2;
    BranchSpec::new(
        move |x: &DVector<f64>, u: &DVector<f64>| {
            dvector![
                x[0] + dt * u[0] * x[2].cos(),
                x[1] + dt * u[0] * x[2].sin(),
                x[2] + dt * u[1]
            ]
        },
        move |x: &DVector<f64>, u: &DVector<f64>, _t| {
            let goal = x[0] * x[0] + (x[1] - 4.0) * (x[1] - 4.0);
            let d = ((x[0] - ox).powi(2) + (x[1] - oy).powi(2)).sqrt();
            let violation = (radius - d).max(0.0);
            0.02 * goal + 0.1 * u.dot(u) + 50.0 * violation * violation
        },
        |x: &DVector<f64>| 10.0 * (x[0] * x[0] + (x[1] - 4.0) * (x[1] - 4.0)),
        probability,
    )
}

/// S3: with even odds the first control splits the difference between the
/// hypothetical obstacles; once the filter is confident, the plan commits
/// to the free side.
#[test]
fn s3_hindsight_diffdrive_reweights() {
    let left = (-1.0, 2.0);
    let right = (1.0, 2.0);
    let x0 = dvector![0.0, 0.0, std::f64::consts::FRAC_PI_2];
    let seed = InitialControl::Hold(dvector![0.5, 0.0]);
    let params = SolveParams::new().with_max_iterations(300);

    let mut solver = HindsightSolver::new(
        vec![diffdrive_spec(0.5, left), diffdrive_spec(0.5, right)],
        3,
        2,
    )
    .unwrap();
    let result = solver.solve(40, &x0, &seed, &params).unwrap();
    assert!(result.cost < result.initial_cost);

    // Hedged first control: no committed turn while the hypotheses are
    // balanced.
    let omega0 = solver.nominal_controls(0)[0][1];
    assert!(omega0.abs() < 1e-2, "ω₀ = {omega0}");

    // A filter watching transitions becomes confident the obstacle is the
    // left one; the re-weighted plan passes on the right.
    let mut filter = HypothesisFilter::new(&solver.probabilities()).unwrap();
    filter.update_from_likelihoods(&[0.95, 0.05]).unwrap();
    solver.set_branch_probabilities(&filter.distribution()).unwrap();
    let result = solver.solve(40, &x0, &seed, &params).unwrap();
    assert!(result.cost.is_finite());

    let states = solver.nominal_states(0);
    let passing = states
        .iter()
        .min_by(|a, b| {
            (a[1] - 2.0).abs().partial_cmp(&(b[1] - 2.0).abs()).unwrap()
        })
        .unwrap();
    assert!(
        passing[0] > 0.0,
        "expected to pass right of the left obstacle, px = {}",
        passing[0]
    );
}

/// S4: a (1, 0) prior must reproduce the single-branch solution exactly.
#[test]
fn s4_degenerate_prior_matches_single_branch() {
    let horizon = 25;
    let x0 = dvector![3.0, 0.5];
    let seed = InitialControl::Hold(dvector![0.0]);
    let params = SolveParams::new().with_max_iterations(50);

    let mut hindsight = HindsightSolver::new(
        vec![double_integrator_spec(1.0, 1.0), double_integrator_spec(0.0, 0.6)],
        2,
        1,
    )
    .unwrap();
    let mut chain = HindsightSolver::new(vec![double_integrator_spec(1.0, 1.0)], 2, 1).unwrap();

    let cost_hindsight = hindsight.solve(horizon, &x0, &seed, &params).unwrap().cost;
    let cost_chain = chain.solve(horizon, &x0, &seed, &params).unwrap().cost;
    assert!((cost_hindsight - cost_chain).abs() <= 1e-10);

    for t in 0..horizon {
        let (xs_h, xs_c) = (hindsight.nominal_states(0), chain.nominal_states(0));
        let (us_h, us_c) = (hindsight.nominal_controls(0), chain.nominal_controls(0));
        assert!((&xs_h[t] - &xs_c[t]).norm() <= 1e-10);
        assert!((&us_h[t] - &us_c[t]).norm() <= 1e-10);
        let dk = (hindsight.feedback_gain(0, t) - chain.feedback_gain(0, t)).norm();
        let dff = (hindsight.feedforward_gain(0, t) - chain.feedforward_gain(0, t)).norm();
        assert!(dk <= 1e-10 && dff <= 1e-10);
    }
}

/// Identical closures in every branch: the hindsight mixture degenerates
/// and the root policy equals the chain policy for any prior.
#[test]
fn identical_branches_match_chain_for_any_prior() {
    let horizon = 20;
    let x0 = dvector![1.0, -2.0];
    let seed = InitialControl::Hold(dvector![0.0]);
    let params = SolveParams::new().with_max_iterations(1);

    let mut mixed = HindsightSolver::new(
        vec![double_integrator_spec(0.3, 1.0), double_integrator_spec(0.7, 1.0)],
        2,
        1,
    )
    .unwrap();
    let mut chain = HindsightSolver::new(vec![double_integrator_spec(1.0, 1.0)], 2, 1).unwrap();
    mixed.solve(horizon, &x0, &seed, &params).unwrap();
    chain.solve(horizon, &x0, &seed, &params).unwrap();

    let dk = (mixed.feedback_gain(0, 0) - chain.feedback_gain(0, 0)).norm();
    let dff = (mixed.feedforward_gain(0, 0) - chain.feedforward_gain(0, 0)).norm();
    assert!(dk <= 1e-9, "root K drifted by {dk}");
    assert!(dff <= 1e-9, "root k drifted by {dff}");
}

/// Hindsight weighting: raising a branch's probability pulls the root
/// policy monotonically toward that branch's independent optimum.
#[test]
fn root_policy_shifts_toward_dominant_branch() {
    let horizon = 20;
    let x0 = dvector![1.0, 0.0];
    let seed = InitialControl::Hold(dvector![0.0]);
    // A single iteration from a shared seed isolates the root mixing from
    // trajectory divergence.
    let params = SolveParams::new().with_max_iterations(1);

    let mut reference = HindsightSolver::new(vec![double_integrator_spec(1.0, 1.0)], 2, 1).unwrap();
    reference.solve(horizon, &x0, &seed, &params).unwrap();
    let k_ref = reference.feedback_gain(0, 0).clone();

    let mut distances = Vec::new();
    for p in [0.5, 0.75, 0.95] {
        let mut solver = HindsightSolver::new(
            vec![
                double_integrator_spec(p, 1.0),
                double_integrator_spec(1.0 - p, 0.5),
            ],
            2,
            1,
        )
        .unwrap();
        solver.solve(horizon, &x0, &seed, &params).unwrap();
        distances.push((solver.feedback_gain(0, 0) - &k_ref).norm());
    }
    assert!(
        distances[0] > distances[1] && distances[1] > distances[2],
        "distances not monotone: {distances:?}"
    );
}

/// S5: a near-singular control cost either converges (with the damped
/// effective R) or reports a stuck local minimum; it never hangs or
/// panics.
#[test]
fn s5_ill_conditioned_control_cost() {
    let (a, b) = double_integrator_matrices();
    let spec = BranchSpec::new(
        move |x: &DVector<f64>, u: &DVector<f64>| &a * x + &b * u,
        |x: &DVector<f64>, u: &DVector<f64>, _t| 0.5 * (x.dot(x) + 1e-9 * u.dot(u)),
        |x: &DVector<f64>| 0.5 * 10.0 * x.dot(x),
        1.0,
    );
    let mut solver = HindsightSolver::new(vec![spec], 2, 1).unwrap();
    match solver.solve(
        50,
        &dvector![5.0, 0.0],
        &InitialControl::Hold(dvector![0.0]),
        &SolveParams::new().with_max_iterations(200),
    ) {
        Ok(result) => {
            assert!(result.cost.is_finite());
            assert!(result.cost <= result.initial_cost);
        }
        Err(IlqrError::StuckAtLocalMin { cost, .. }) => assert!(cost.is_finite()),
        Err(e) => panic!("unexpected failure mode: {e}"),
    }
}

/// Strict mode turns the iteration cap into an error; default mode
/// returns the best trajectory with `converged = false`.
#[test]
fn iteration_cap_strictness() {
    let make = || HindsightSolver::new(vec![diffdrive_spec(1.0, (-1.0, 2.0))], 3, 2).unwrap();
    let x0 = dvector![0.0, 0.0, std::f64::consts::FRAC_PI_2];
    let seed = InitialControl::Hold(dvector![0.5, 0.0]);
    let tight = SolveParams::new()
        .with_max_iterations(2)
        .with_convergence_ratio(1e-12);

    let lenient = make().solve(40, &x0, &seed, &tight);
    let result = lenient.unwrap();
    assert!(!result.converged);
    assert_eq!(result.iterations, 2);

    let strict = make().solve(40, &x0, &seed, &tight.with_strict(true));
    assert!(matches!(strict, Err(IlqrError::NotConverged { iterations: 2, .. })));
}

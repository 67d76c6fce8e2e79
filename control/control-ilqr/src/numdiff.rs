//! Central-difference derivatives of user closures.
//!
//! The solver treats dynamics and cost functions as black boxes and obtains
//! every derivative it needs numerically:
//!
//! - [`gradient`] - first derivatives of a scalar function
//! - [`jacobian`] - first derivatives of a vector function
//! - [`hessian`] - second derivatives of a scalar function, including mixed
//!   partials
//!
//! All routines use centered differences with a per-coordinate step
//! proportional to the coordinate magnitude and floored at
//! [`FD_MIN_STEP`]. Centered differences are exact on affine functions and
//! quadratic costs up to floating-point roundoff, which is what makes the
//! solver reproduce the Riccati solution on linear-quadratic problems.

use nalgebra::{DMatrix, DVector};
use thiserror::Error;

/// Relative step for finite differences (2⁻¹⁷).
pub const FD_RELATIVE_STEP: f64 = 7.629_394_531_25e-6;

/// Absolute floor on the finite-difference step.
pub const FD_MIN_STEP: f64 = 1e-5;

/// A differentiated closure returned a non-finite value.
///
/// Carries no location context; callers that know the expansion point
/// attach it when converting to [`IlqrError::BadClosure`](crate::IlqrError).
#[derive(Debug, Clone, Copy, Error)]
#[error("function returned a non-finite value")]
pub struct NonFiniteEval;

/// Per-coordinate finite-difference step at coordinate value `z`.
#[must_use]
pub fn step_size(z: f64) -> f64 {
    (FD_RELATIVE_STEP * z.abs()).max(FD_MIN_STEP)
}

/// Gradient of a scalar function by central differences.
///
/// Writes `∂f/∂z_i` into `out[i]`.
///
/// # Errors
///
/// Returns [`NonFiniteEval`] if any evaluation of `f` is non-finite.
///
/// # Panics
///
/// Panics if `out.len() != z.len()`.
pub fn gradient<F>(f: F, z: &DVector<f64>, out: &mut DVector<f64>) -> Result<(), NonFiniteEval>
where
    F: Fn(&DVector<f64>) -> f64,
{
    assert_eq!(out.len(), z.len());
    let mut zp = z.clone();
    for i in 0..z.len() {
        let eps = step_size(z[i]);
        zp[i] = z[i] + eps;
        let f_plus = eval_finite(&f, &zp)?;
        zp[i] = z[i] - eps;
        let f_minus = eval_finite(&f, &zp)?;
        zp[i] = z[i];
        out[i] = (f_plus - f_minus) / (2.0 * eps);
    }
    Ok(())
}

/// Jacobian of a vector function by central differences.
///
/// Writes `∂f/∂z_i` into column `i` of `out`.
///
/// # Errors
///
/// Returns [`NonFiniteEval`] if any evaluation of `f` is non-finite.
///
/// # Panics
///
/// Panics if `out` is not `f_len × z.len()` for the length returned by `f`.
pub fn jacobian<F>(f: F, z: &DVector<f64>, out: &mut DMatrix<f64>) -> Result<(), NonFiniteEval>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    assert_eq!(out.ncols(), z.len());
    let mut zp = z.clone();
    for i in 0..z.len() {
        let eps = step_size(z[i]);
        zp[i] = z[i] + eps;
        let f_plus = eval_finite_vec(&f, &zp, out.nrows())?;
        zp[i] = z[i] - eps;
        let f_minus = eval_finite_vec(&f, &zp, out.nrows())?;
        zp[i] = z[i];
        for r in 0..out.nrows() {
            out[(r, i)] = (f_plus[r] - f_minus[r]) / (2.0 * eps);
        }
    }
    Ok(())
}

/// Hessian of a scalar function by mixed-partial central differences.
///
/// Each entry uses the four-point stencil
///
/// ```text
/// H_ij = [f(z+εᵢeᵢ+εⱼeⱼ) − f(z+εᵢeᵢ−εⱼeⱼ)
///       − f(z−εᵢeᵢ+εⱼeⱼ) + f(z−εᵢeᵢ−εⱼeⱼ)] / (4·εᵢ·εⱼ)
/// ```
///
/// and only the upper triangle is evaluated; the result is symmetric by
/// construction.
///
/// # Errors
///
/// Returns [`NonFiniteEval`] if any evaluation of `f` is non-finite.
///
/// # Panics
///
/// Panics if `out` is not `z.len() × z.len()`.
pub fn hessian<F>(f: F, z: &DVector<f64>, out: &mut DMatrix<f64>) -> Result<(), NonFiniteEval>
where
    F: Fn(&DVector<f64>) -> f64,
{
    let n = z.len();
    assert_eq!((out.nrows(), out.ncols()), (n, n));
    let mut zp = z.clone();
    for i in 0..n {
        let eps_i = step_size(z[i]);
        for j in i..n {
            let eps_j = step_size(z[j]);
            let mut stencil = 0.0;
            for (si, sj, sign) in [
                (eps_i, eps_j, 1.0),
                (eps_i, -eps_j, -1.0),
                (-eps_i, eps_j, -1.0),
                (-eps_i, -eps_j, 1.0),
            ] {
                zp[i] = z[i] + si;
                // For i == j the two displacements land on the same
                // coordinate and must accumulate.
                zp[j] += sj;
                stencil += sign * eval_finite(&f, &zp)?;
                zp[i] = z[i];
                zp[j] = z[j];
            }
            let h = stencil / (4.0 * eps_i * eps_j);
            out[(i, j)] = h;
            out[(j, i)] = h;
        }
    }
    Ok(())
}

fn eval_finite<F>(f: &F, z: &DVector<f64>) -> Result<f64, NonFiniteEval>
where
    F: Fn(&DVector<f64>) -> f64,
{
    let y = f(z);
    if y.is_finite() {
        Ok(y)
    } else {
        Err(NonFiniteEval)
    }
}

fn eval_finite_vec<F>(f: &F, z: &DVector<f64>, rows: usize) -> Result<DVector<f64>, NonFiniteEval>
where
    F: Fn(&DVector<f64>) -> DVector<f64>,
{
    let y = f(z);
    assert_eq!(y.len(), rows, "closure changed its output dimension");
    if y.iter().all(|v| v.is_finite()) {
        Ok(y)
    } else {
        Err(NonFiniteEval)
    }
}

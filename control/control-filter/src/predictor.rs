//! Log-space posterior over a discrete set of hypotheses.
//!
//! The filter tracks `log p_i` rather than `p_i` so that repeated
//! multiplicative updates cannot underflow, and normalizes with
//! max-subtraction so the exponentials stay in range.

use serde::{Deserialize, Serialize};

use crate::error::{FilterError, Result};

/// Tolerance on `sum(prior) == 1` accepted at construction.
pub const PRIOR_TOLERANCE: f64 = 1e-3;

/// Discrete Bayesian posterior over K hypotheses.
///
/// Two update rules are supported:
///
/// - **Transition likelihood** ([`HypothesisFilter::update_from_likelihoods`]):
///   after observing a state transition, the caller supplies the likelihood
///   `L_i` of the observation under each hypothesis and the posterior becomes
///   `p_i ∝ p_i · L_i`.
/// - **Maximum-entropy value update**
///   ([`HypothesisFilter::update_from_values`]): given per-hypothesis
///   action values `Q_i` and state values `V_i` for the observed control,
///   the log-posterior shifts by `Q_i − V_i`. Values follow the
///   reward convention (larger is better); pass negated costs when the
///   planner minimizes.
///
/// # Example
///
/// ```
/// use control_filter::HypothesisFilter;
///
/// let mut filter = HypothesisFilter::new(&[0.5, 0.5]).unwrap();
/// filter.update_from_likelihoods(&[0.9, 0.1]).unwrap();
/// assert!(filter.probability(0) > 0.8);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HypothesisFilter {
    log_probs: Vec<f64>,
}

impl HypothesisFilter {
    /// Creates a filter from a prior distribution.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::BadPrior`] if the prior is empty, contains a
    /// negative or non-finite entry, or does not sum to 1 within
    /// [`PRIOR_TOLERANCE`].
    pub fn new(prior: &[f64]) -> Result<Self> {
        validate_distribution(prior)?;
        Ok(Self {
            log_probs: prior.iter().map(|&p| p.ln()).collect(),
        })
    }

    /// Number of hypotheses tracked.
    #[must_use]
    pub fn len(&self) -> usize {
        self.log_probs.len()
    }

    /// Returns `true` if the filter tracks no hypotheses.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log_probs.is_empty()
    }

    /// Current posterior as a probability vector.
    #[must_use]
    pub fn distribution(&self) -> Vec<f64> {
        self.log_probs.iter().map(|&l| l.exp()).collect()
    }

    /// Posterior probability of hypothesis `i`.
    ///
    /// # Panics
    ///
    /// Panics if `i` is out of range.
    #[must_use]
    pub fn probability(&self, i: usize) -> f64 {
        self.log_probs[i].exp()
    }

    /// Index of the most probable hypothesis.
    ///
    /// # Panics
    ///
    /// Panics if the filter is empty.
    #[must_use]
    pub fn argmax(&self) -> usize {
        let (i, _) = self
            .log_probs
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |best, (i, &l)| {
                if l > best.1 {
                    (i, l)
                } else {
                    best
                }
            });
        i
    }

    /// Replaces the posterior with a new distribution.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::BadPrior`] under the same conditions as
    /// [`HypothesisFilter::new`].
    pub fn reset(&mut self, prior: &[f64]) -> Result<()> {
        validate_distribution(prior)?;
        self.log_probs.clear();
        self.log_probs.extend(prior.iter().map(|&p| p.ln()));
        Ok(())
    }

    /// Bayesian update from per-hypothesis transition likelihoods.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::DimensionMismatch`] if `likelihoods.len()`
    /// differs from the hypothesis count, [`FilterError::BadLikelihood`]
    /// for a negative or non-finite entry, and
    /// [`FilterError::DegeneratePosterior`] if the update removes all
    /// posterior mass.
    pub fn update_from_likelihoods(&mut self, likelihoods: &[f64]) -> Result<()> {
        self.check_len(likelihoods.len())?;
        for (i, &l) in likelihoods.iter().enumerate() {
            if !l.is_finite() || l < 0.0 {
                return Err(FilterError::BadLikelihood { index: i, value: l });
            }
        }
        for (log_p, &l) in self.log_probs.iter_mut().zip(likelihoods) {
            *log_p += l.ln();
        }
        self.normalize()
    }

    /// Maximum-entropy inverse-optimal-control update.
    ///
    /// Shifts each hypothesis by `Q_i − V_i`, the log-likelihood of the
    /// observed control under a soft-optimal policy for that hypothesis.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError::DimensionMismatch`] on length mismatch and
    /// [`FilterError::DegeneratePosterior`] if the update removes all
    /// posterior mass.
    pub fn update_from_values(&mut self, q_values: &[f64], v_values: &[f64]) -> Result<()> {
        self.check_len(q_values.len())?;
        self.check_len(v_values.len())?;
        for (log_p, (&q, &v)) in self.log_probs.iter_mut().zip(q_values.iter().zip(v_values)) {
            *log_p += q - v;
        }
        self.normalize()
    }

    fn check_len(&self, got: usize) -> Result<()> {
        if got == self.log_probs.len() {
            Ok(())
        } else {
            Err(FilterError::DimensionMismatch {
                expected: self.log_probs.len(),
                got,
            })
        }
    }

    /// Normalizes the log-distribution, subtracting the maximum before
    /// exponentiating.
    fn normalize(&mut self) -> Result<()> {
        let max = self.log_probs.iter().fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        if max == f64::NEG_INFINITY || max.is_nan() {
            return Err(FilterError::DegeneratePosterior);
        }
        let sum: f64 = self.log_probs.iter().map(|&l| (l - max).exp()).sum();
        let log_sum = max + sum.ln();
        for log_p in &mut self.log_probs {
            *log_p -= log_sum;
        }
        Ok(())
    }
}

fn validate_distribution(prior: &[f64]) -> Result<()> {
    if prior.is_empty() {
        return Err(FilterError::bad_prior("empty distribution"));
    }
    for (i, &p) in prior.iter().enumerate() {
        if !p.is_finite() || p < 0.0 {
            return Err(FilterError::bad_prior(format!(
                "probability {p} at index {i} is not in [0, 1]"
            )));
        }
    }
    let sum: f64 = prior.iter().sum();
    if (sum - 1.0).abs() > PRIOR_TOLERANCE {
        return Err(FilterError::bad_prior(format!("sum is {sum}, expected 1")));
    }
    Ok(())
}

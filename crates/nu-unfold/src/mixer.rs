//! One Bayes update ("mixing" of the prior with the observed effects).

use nalgebra::DMatrix;
use nu_core::{Efficiency, Error, Histogram, ResponseMatrix, Result};

use crate::covariance::{self, CovarianceType};

/// Output of one Bayes update.
#[derive(Debug, Clone)]
pub struct BayesStep {
    /// Prior used for this update.
    pub prior: Vec<f64>,
    /// Predicted effect probabilities `D_e = Σ_c R[e][c]·p_c`.
    pub predicted: Vec<f64>,
    /// Unfolding matrix `M[e][c] = P(c|e) / ε_c` (effects × causes).
    pub unfolding: DMatrix<f64>,
    /// Unfolded cause counts `n_c = Σ_e d_e·M[e][c]`.
    pub unfolded: Vec<f64>,
}

/// Applies Bayes' theorem with a fixed normalized response and observed data.
#[derive(Debug)]
pub struct Mixer<'a> {
    data: &'a Histogram,
    response: &'a ResponseMatrix,
    efficiencies: &'a Efficiency,
    v_data: DMatrix<f64>,
}

impl<'a> Mixer<'a> {
    /// Create a mixer. `response` must already be normalized; shapes are
    /// checked by the caller.
    pub fn new(
        data: &'a Histogram,
        response: &'a ResponseMatrix,
        efficiencies: &'a Efficiency,
        cov_type: CovarianceType,
    ) -> Self {
        let v_data = covariance::data_covariance(cov_type, data);
        Self { data, response, efficiencies, v_data }
    }

    /// Unfold the data with the given prior.
    pub fn smear(&self, prior: &[f64], iteration: usize) -> Result<BayesStep> {
        let n_e = self.response.n_effects();
        let n_c = self.response.n_causes();

        let mut predicted = Vec::with_capacity(n_e);
        for e in 0..n_e {
            let d: f64 = (0..n_c).map(|c| self.response.value(e, c) * prior[c]).sum();
            if !d.is_finite() || d < 0.0 {
                return Err(Error::NonConvergent {
                    iteration,
                    reason: format!("predicted probability for effect bin {e} is {d}"),
                });
            }
            if d == 0.0 && self.data.values[e] > 0.0 {
                log::debug!(
                    "effect bin {} has {} counts but zero predicted probability; dropped",
                    e,
                    self.data.values[e]
                );
            }
            predicted.push(d);
        }

        let unfolding = DMatrix::from_fn(n_e, n_c, |e, c| {
            if predicted[e] > 0.0 {
                self.response.value(e, c) * prior[c] / (predicted[e] * self.efficiencies.values[c])
            } else {
                0.0
            }
        });

        let unfolded: Vec<f64> = (0..n_c)
            .map(|c| (0..n_e).map(|e| self.data.values[e] * unfolding[(e, c)]).sum())
            .collect();
        if let Some(c) = unfolded.iter().position(|v| !v.is_finite()) {
            return Err(Error::NonConvergent {
                iteration,
                reason: format!("unfolded count for cause bin {c} is not finite"),
            });
        }

        Ok(BayesStep { prior: prior.to_vec(), predicted, unfolding, unfolded })
    }

    /// Statistical covariance of a step.
    pub fn stat_covariance(&self, step: &BayesStep) -> DMatrix<f64> {
        covariance::stat_covariance(&step.unfolding, &self.v_data)
    }

    /// Systematic covariance contributed by this step alone.
    pub fn sys_covariance(&self, step: &BayesStep) -> DMatrix<f64> {
        covariance::sys_covariance(
            self.response,
            self.efficiencies,
            self.data,
            &step.prior,
            &step.predicted,
            &step.unfolding,
            &step.unfolded,
        )
    }

    /// Jacobian of this step with respect to the previous estimate.
    pub fn prior_jacobian(&self, step: &BayesStep, prior_total: f64) -> DMatrix<f64> {
        covariance::prior_jacobian(
            self.response,
            self.efficiencies,
            self.data,
            &step.prior,
            &step.predicted,
            prior_total,
        )
    }
}

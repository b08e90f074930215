//! Iterative Bayesian unfolding.
//!
//! Each iteration applies Bayes' theorem with the current prior, propagates
//! statistical and systematic covariance, runs the regularizer pipeline, and
//! compares the new estimate to the previous one with the configured test
//! statistic. The loop ends when the statistic drops to `ts_stopping`
//! (converged) or after `max_iter` iterations.

use std::fmt;

use nalgebra::DMatrix;
use nu_core::{
    CauseEstimate, Efficiency, Error, Histogram, ResponseMatrix, Result, Smoothed, TestStatistic,
};
use serde::{Deserialize, Serialize};

use crate::callbacks::{Callback, EngineState, IterationSnapshot};
use crate::config::UnfoldConfig;
use crate::covariance::{self, SysCombination};
use crate::mixer::Mixer;
use crate::response::normalize_response;

/// Terminal status of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnfoldStatus {
    /// Test statistic reached the stopping threshold.
    Converged,
    /// Iteration cap reached first; the result is the last iterate.
    MaxIterationsReached,
}

impl fmt::Display for UnfoldStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnfoldStatus::Converged => write!(f, "converged"),
            UnfoldStatus::MaxIterationsReached => write!(f, "max_iterations_reached"),
        }
    }
}

/// One iteration, kept when `return_iterations` is set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationRecord {
    /// 1-based iteration number.
    pub iteration: usize,
    /// Raw unfolded counts.
    pub unfolded: Vec<f64>,
    /// Regularized counts.
    pub smoothed: Vec<f64>,
    /// Statistical uncertainty.
    pub stat_err: Vec<f64>,
    /// Systematic uncertainty.
    pub sys_err: Vec<f64>,
    /// Test statistic.
    pub ts: f64,
}

/// Result of an unfolding run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnfoldResult {
    /// Unfolded counts of the final iteration (unregularized).
    pub unfolded: Vec<f64>,
    /// Statistical uncertainty per cause bin.
    pub stat_err: Vec<f64>,
    /// Systematic uncertainty per cause bin.
    pub sys_err: Vec<f64>,
    /// Regularized counts of the final iteration.
    pub smoothed: Vec<f64>,
    /// Uncertainty of the regularized counts.
    pub smoothed_err: Vec<f64>,
    /// Statistical covariance (row-major, causes × causes).
    pub stat_cov: Vec<f64>,
    /// Systematic covariance (row-major, causes × causes).
    pub sys_cov: Vec<f64>,
    /// Final unfolding matrix `P(c|e)/ε_c`, `[effect][cause]`.
    pub unfolding_matrix: Vec<Vec<f64>>,
    /// Number of iterations run.
    pub num_iterations: usize,
    /// Terminal status.
    pub status: UnfoldStatus,
    /// Test statistic per iteration.
    pub ts_iter: Vec<f64>,
    /// Stopping threshold used.
    pub ts_stopping: f64,
    /// Test statistic name.
    pub test_statistic: String,
    /// Per-iteration records (empty unless requested).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub iterations: Vec<IterationRecord>,
}

impl UnfoldResult {
    /// `true` if the stopping threshold was reached.
    pub fn converged(&self) -> bool {
        self.status == UnfoldStatus::Converged
    }
}

/// Loop state owned by a single run.
struct UnfoldingState {
    state: EngineState,
    iteration: usize,
    /// Counts the current prior was built from.
    prior_counts: Vec<f64>,
    prior: Vec<f64>,
    sys_cov: DMatrix<f64>,
    ts_iter: Vec<f64>,
    records: Vec<IterationRecord>,
}

impl UnfoldingState {
    fn new() -> Self {
        Self {
            state: EngineState::Initialized,
            iteration: 0,
            prior_counts: Vec::new(),
            prior: Vec::new(),
            sys_cov: DMatrix::zeros(0, 0),
            ts_iter: Vec::new(),
            records: Vec::new(),
        }
    }

    fn transition(&mut self, next: EngineState) {
        if self.state != next {
            log::debug!(
                "unfolding state {} -> {} (iteration {})",
                self.state,
                next,
                self.iteration
            );
            self.state = next;
        }
    }
}

/// Iterative Bayesian unfolder.
///
/// ```
/// use nu_core::{Efficiency, Histogram, ResponseMatrix};
/// use nu_unfold::{IterativeUnfolder, UnfoldConfig, UnfoldStatus};
///
/// let data = Histogram::poisson(vec![10.0, 40.0, 20.0]);
/// let response = ResponseMatrix::identity(3).unwrap();
/// let result = IterativeUnfolder::new(UnfoldConfig::default())
///     .run(&data, &response, &Efficiency::ones(3))
///     .unwrap();
/// assert_eq!(result.status, UnfoldStatus::Converged);
/// assert_eq!(result.unfolded, data.values);
/// ```
#[derive(Default)]
pub struct IterativeUnfolder {
    config: UnfoldConfig,
    callbacks: Vec<Callback>,
    statistic: Option<Box<dyn TestStatistic>>,
}

impl fmt::Debug for IterativeUnfolder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IterativeUnfolder")
            .field("config", &self.config)
            .field("callbacks", &self.callbacks)
            .field("statistic", &self.statistic().name())
            .finish()
    }
}

impl IterativeUnfolder {
    /// Create an unfolder with no callbacks.
    pub fn new(config: UnfoldConfig) -> Self {
        Self { config, callbacks: Vec::new(), statistic: None }
    }

    /// Append a callback to the pipeline.
    pub fn with_callback(mut self, callback: impl Into<Callback>) -> Self {
        self.callbacks.push(callback.into());
        self
    }

    /// Append several callbacks, keeping their order.
    pub fn with_callbacks(mut self, callbacks: impl IntoIterator<Item = Callback>) -> Self {
        self.callbacks.extend(callbacks);
        self
    }

    /// Use a custom test statistic instead of `config.ts`.
    pub fn with_test_statistic(mut self, statistic: Box<dyn TestStatistic>) -> Self {
        self.statistic = Some(statistic);
        self
    }

    /// Configuration.
    pub fn config(&self) -> &UnfoldConfig {
        &self.config
    }

    /// Unfold `data` given a raw `response` and per-cause `efficiencies`.
    ///
    /// The response is normalized once (columns sum to the efficiencies)
    /// before iterating.
    pub fn run(
        &self,
        data: &Histogram,
        response: &ResponseMatrix,
        efficiencies: &Efficiency,
    ) -> Result<UnfoldResult> {
        self.run_with_state(&mut UnfoldingState::new(), data, response, efficiencies)
    }

    /// Run on caller-owned loop state; any error leaves it `Failed`.
    fn run_with_state(
        &self,
        st: &mut UnfoldingState,
        data: &Histogram,
        response: &ResponseMatrix,
        efficiencies: &Efficiency,
    ) -> Result<UnfoldResult> {
        self.run_inner(st, data, response, efficiencies).inspect_err(|e| {
            st.transition(EngineState::Failed);
            log::warn!("unfolding {} at iteration {}: {e}", st.state, st.iteration);
        })
    }

    fn statistic(&self) -> &dyn TestStatistic {
        match &self.statistic {
            Some(s) => s.as_ref(),
            None => &self.config.ts,
        }
    }

    fn validate(
        &self,
        data: &Histogram,
        response: &ResponseMatrix,
        efficiencies: &Efficiency,
    ) -> Result<()> {
        self.config.validate()?;
        let n_e = response.n_effects();
        let n_c = response.n_causes();
        if data.values.len() != n_e {
            return Err(Error::shape("observed data", n_e, data.values.len()));
        }
        if data.errors.len() != n_e {
            return Err(Error::shape("observed data errors", n_e, data.errors.len()));
        }
        if efficiencies.values.len() != n_c {
            return Err(Error::shape("efficiencies", n_c, efficiencies.values.len()));
        }
        if efficiencies.errors.len() != n_c {
            return Err(Error::shape("efficiency errors", n_c, efficiencies.errors.len()));
        }
        for cb in &self.callbacks {
            if let Callback::Spline(reg) = cb {
                if let Some(groups) = reg.groups().filter(|g| g.len() != n_c) {
                    return Err(Error::shape("group assignment", n_c, groups.len()));
                }
            }
        }
        data.validate_counts("observed data")?;
        if data.total() <= 0.0 {
            return Err(Error::Validation("observed data has no counts".into()));
        }
        for (c, &eff) in efficiencies.values.iter().enumerate() {
            if !eff.is_finite() || eff <= 0.0 || eff > 1.0 {
                return Err(Error::Validation(format!(
                    "efficiency[{c}] must be in (0, 1], got {eff}"
                )));
            }
        }
        Ok(())
    }

    fn run_inner(
        &self,
        st: &mut UnfoldingState,
        data: &Histogram,
        response: &ResponseMatrix,
        efficiencies: &Efficiency,
    ) -> Result<UnfoldResult> {
        self.validate(data, response, efficiencies)?;
        let n_c = response.n_causes();
        let prior = self.config.prior.resolve(n_c)?;
        let normalized = normalize_response(response, efficiencies)?;
        let mixer = Mixer::new(data, &normalized, efficiencies, self.config.cov_type);
        let statistic = self.statistic();
        let ts_stopping = self.config.ts_stopping;
        let n_obs = data.total();

        st.prior_counts = prior.iter().map(|p| p * n_obs).collect();
        st.prior = prior;
        st.sys_cov = DMatrix::zeros(n_c, n_c);

        loop {
            st.iteration += 1;
            st.transition(EngineState::Iterating);
            let iteration = st.iteration;

            let step = mixer.smear(&st.prior, iteration)?;
            let stat_cov = mixer.stat_covariance(&step);
            let fresh = mixer.sys_covariance(&step);
            let prior_total: f64 = st.prior_counts.iter().sum();
            let sys_cov = match self.config.sys_combination {
                SysCombination::Fresh => fresh,
                SysCombination::Quadrature => &st.sys_cov + fresh,
                SysCombination::Propagated => {
                    let j = mixer.prior_jacobian(&step, prior_total);
                    &j * &st.sys_cov * j.transpose() + fresh
                }
            };
            let stat_err = covariance::diag_sqrt(&stat_cov);
            let sys_err = covariance::diag_sqrt(&sys_cov);

            let smoothed = self.regularize(&step.unfolded, &stat_err, iteration)?;
            let total: f64 = smoothed.values.iter().sum();
            if !total.is_finite() || total <= 0.0 {
                return Err(Error::NonConvergent {
                    iteration,
                    reason: format!("regularized estimate sums to {total}"),
                });
            }

            let ts = statistic.calc(&smoothed.values, &st.prior_counts)?;
            if !ts.is_finite() || ts < 0.0 {
                return Err(Error::NonConvergent {
                    iteration,
                    reason: format!("test statistic {} returned {ts}", statistic.name()),
                });
            }
            st.ts_iter.push(ts);

            let next = if ts <= ts_stopping {
                EngineState::Converged
            } else if iteration >= self.config.max_iter {
                EngineState::MaxIterationsReached
            } else {
                EngineState::Iterating
            };
            st.transition(next);

            let snapshot = IterationSnapshot {
                iteration,
                state: st.state,
                unfolded: &step.unfolded,
                smoothed: &smoothed.values,
                stat_err: &stat_err,
                sys_err: &sys_err,
                ts,
                ts_stopping,
                ts_name: statistic.name(),
            };
            for observer in self.callbacks.iter().filter_map(Callback::as_observer) {
                observer.on_iteration(&snapshot)?;
            }

            if self.config.return_iterations {
                st.records.push(IterationRecord {
                    iteration,
                    unfolded: step.unfolded.clone(),
                    smoothed: smoothed.values.clone(),
                    stat_err: stat_err.clone(),
                    sys_err: sys_err.clone(),
                    ts,
                });
            }

            if st.state.is_terminal() {
                let status = if st.state == EngineState::Converged {
                    UnfoldStatus::Converged
                } else {
                    log::warn!(
                        "unfolding stopped after {} iterations without convergence (ts = {:.4e} > {})",
                        iteration,
                        ts,
                        ts_stopping
                    );
                    UnfoldStatus::MaxIterationsReached
                };
                let n_e = step.unfolding.nrows();
                let estimate = CauseEstimate::new(
                    step.unfolded,
                    covariance::to_row_major(&stat_cov),
                    covariance::to_row_major(&sys_cov),
                )?;
                return Ok(UnfoldResult {
                    stat_err: estimate.stat_err(),
                    sys_err: estimate.sys_err(),
                    unfolded: estimate.unfolded,
                    smoothed: smoothed.values,
                    smoothed_err: smoothed.errors,
                    stat_cov: estimate.stat_cov,
                    sys_cov: estimate.sys_cov,
                    unfolding_matrix: (0..n_e)
                        .map(|e| step.unfolding.row(e).iter().copied().collect())
                        .collect(),
                    num_iterations: iteration,
                    status,
                    ts_iter: std::mem::take(&mut st.ts_iter),
                    ts_stopping,
                    test_statistic: statistic.name().to_string(),
                    iterations: std::mem::take(&mut st.records),
                });
            }

            st.prior = smoothed.values.iter().map(|v| v / total).collect();
            st.prior_counts = smoothed.values;
            st.sys_cov = sys_cov;
        }
    }

    /// Run the regularizer pipeline on a raw estimate.
    fn regularize(&self, unfolded: &[f64], stat_err: &[f64], iteration: usize) -> Result<Smoothed> {
        let n = unfolded.len();
        let mut current = Smoothed { values: unfolded.to_vec(), errors: stat_err.to_vec() };
        for reg in self.callbacks.iter().filter_map(Callback::as_regularizer) {
            let next = reg.regularize(&current.values, &current.errors)?;
            if next.values.len() != n {
                return Err(Error::shape(
                    format!("{} regularizer output", reg.name()),
                    n,
                    next.values.len(),
                ));
            }
            if next.errors.len() != n {
                return Err(Error::shape(
                    format!("{} regularizer errors", reg.name()),
                    n,
                    next.errors.len(),
                ));
            }
            if let Some(c) = next.values.iter().position(|v| !v.is_finite() || *v < 0.0) {
                return Err(Error::NonConvergent {
                    iteration,
                    reason: format!(
                        "{} regularizer produced {} for cause bin {c}",
                        reg.name(),
                        next.values[c]
                    ),
                });
            }
            current = next;
        }
        Ok(current)
    }
}

/// Unfold with a config and callback pipeline in one call.
pub fn iterative_unfold(
    data: &Histogram,
    response: &ResponseMatrix,
    efficiencies: &Efficiency,
    config: UnfoldConfig,
    callbacks: Vec<Callback>,
) -> Result<UnfoldResult> {
    IterativeUnfolder::new(config).with_callbacks(callbacks).run(data, response, efficiencies)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use nu_core::{GroupAssignment, Regularizer};

    use super::*;
    use crate::callbacks::Observer;
    use crate::regularize::SplineRegularizer;
    use crate::test_stat::TestStatKind;

    fn smeared_3x3() -> ResponseMatrix {
        ResponseMatrix::from_rows(
            vec![vec![80.0, 10.0, 0.0], vec![20.0, 80.0, 20.0], vec![0.0, 10.0, 80.0]],
            vec![vec![9.0, 3.0, 0.0], vec![4.5, 9.0, 4.5], vec![0.0, 3.0, 9.0]],
        )
        .unwrap()
    }

    #[test]
    fn test_identity_converges_to_data() {
        let data = Histogram::poisson(vec![100.0, 300.0, 50.0, 25.0]);
        let r = ResponseMatrix::identity(4).unwrap();
        let cfg = UnfoldConfig { return_iterations: true, ..Default::default() };
        let res = IterativeUnfolder::new(cfg).run(&data, &r, &Efficiency::ones(4)).unwrap();
        assert_eq!(res.status, UnfoldStatus::Converged);
        assert_eq!(res.iterations[0].unfolded, data.values);
        assert_eq!(res.num_iterations, 2);
        assert_eq!(res.ts_iter.len(), 2);
        assert_eq!(res.ts_iter[1], 0.0);
        for (e, d) in res.stat_err.iter().zip(&data.errors) {
            assert!((e - d).abs() < 1e-12);
        }
        assert!(res.sys_err.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn test_max_iter_respected() {
        let data = Histogram::poisson(vec![100.0, 300.0, 50.0]);
        let cfg = UnfoldConfig { max_iter: 1, ts_stopping: 1e-12, ..Default::default() };
        let res = IterativeUnfolder::new(cfg)
            .run(&data, &smeared_3x3(), &Efficiency::ones(3))
            .unwrap();
        assert_eq!(res.status, UnfoldStatus::MaxIterationsReached);
        assert_eq!(res.num_iterations, 1);
        assert_eq!(res.ts_iter.len(), 1);
        assert!(!res.converged());
    }

    #[test]
    fn test_result_lengths_and_status() {
        let data = Histogram::poisson(vec![120.0, 300.0, 80.0]);
        let eff = Efficiency::new(vec![0.9, 0.8, 0.7], vec![0.02, 0.02, 0.02]).unwrap();
        for sys in [SysCombination::Quadrature, SysCombination::Fresh, SysCombination::Propagated] {
            let cfg = UnfoldConfig { sys_combination: sys, ..Default::default() };
            let res = IterativeUnfolder::new(cfg).run(&data, &smeared_3x3(), &eff).unwrap();
            assert_eq!(res.unfolded.len(), 3);
            assert_eq!(res.stat_err.len(), 3);
            assert_eq!(res.sys_err.len(), 3);
            assert_eq!(res.stat_cov.len(), 9);
            assert_eq!(res.unfolding_matrix.len(), 3);
            assert!(res.sys_err.iter().all(|&s| s > 0.0 && s.is_finite()), "{:?}", sys);
            let total: f64 = res.unfolded.iter().sum();
            // efficiency correction scales the total up
            assert!(total > data.total());
        }
    }

    #[test]
    fn test_quadrature_accumulates() {
        let data = Histogram::poisson(vec![120.0, 300.0, 80.0]);
        let eff = Efficiency::new(vec![0.9, 0.8, 0.7], vec![0.05, 0.05, 0.05]).unwrap();
        let run = |sys| {
            let cfg = UnfoldConfig {
                sys_combination: sys,
                max_iter: 5,
                ts_stopping: 1e-15,
                ..Default::default()
            };
            IterativeUnfolder::new(cfg).run(&data, &smeared_3x3(), &eff).unwrap()
        };
        let quad = run(SysCombination::Quadrature);
        let fresh = run(SysCombination::Fresh);
        assert_eq!(quad.unfolded, fresh.unfolded);
        for (q, f) in quad.sys_err.iter().zip(&fresh.sys_err) {
            assert!(q > f);
        }
    }

    #[test]
    fn test_shape_mismatch() {
        let data = Histogram::poisson(vec![1.0, 2.0]);
        let err = IterativeUnfolder::default()
            .run(&data, &smeared_3x3(), &Efficiency::ones(3))
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { expected: 3, got: 2, .. }));

        let data = Histogram::poisson(vec![1.0, 2.0, 3.0]);
        let err = IterativeUnfolder::default()
            .run(&data, &smeared_3x3(), &Efficiency::ones(2))
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_group_length_checked_before_iterating() {
        let data = Histogram::poisson(vec![1.0, 2.0, 3.0]);
        let reg = SplineRegularizer::new(1, 1.0).unwrap().with_groups(GroupAssignment::single(4));
        let err = IterativeUnfolder::default()
            .with_callback(reg)
            .run(&data, &smeared_3x3(), &Efficiency::ones(3))
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
    }

    #[test]
    fn test_zero_column_fails() {
        let r = ResponseMatrix::from_rows(
            vec![vec![1.0, 0.0], vec![1.0, 0.0]],
            vec![vec![1.0, 0.0], vec![1.0, 0.0]],
        )
        .unwrap();
        let err = IterativeUnfolder::default()
            .run(&Histogram::poisson(vec![3.0, 4.0]), &r, &Efficiency::ones(2))
            .unwrap_err();
        assert!(matches!(err, Error::UndefinedNormalization { cause: 1, .. }));
    }

    #[test]
    fn test_negative_prior_fails() {
        let cfg = UnfoldConfig {
            prior: crate::priors::PriorSpec::Values(vec![0.5, -0.1, 0.6]),
            ..Default::default()
        };
        let err = IterativeUnfolder::new(cfg)
            .run(&Histogram::poisson(vec![1.0, 2.0, 3.0]), &smeared_3x3(), &Efficiency::ones(3))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidPrior(_)));
    }

    #[test]
    fn test_converged_result_is_prior_independent() {
        let data = Histogram::poisson(vec![120.0, 300.0, 80.0]);
        let base = UnfoldConfig { ts_stopping: 1e-6, max_iter: 500, ..Default::default() };
        let flat = IterativeUnfolder::new(base.clone())
            .run(&data, &smeared_3x3(), &Efficiency::ones(3))
            .unwrap();
        let cfg = UnfoldConfig {
            prior: crate::priors::PriorSpec::Values(vec![1.0, 2.0, 1.0]),
            ..base
        };
        let peaked =
            IterativeUnfolder::new(cfg).run(&data, &smeared_3x3(), &Efficiency::ones(3)).unwrap();
        for (a, b) in flat.unfolded.iter().zip(&peaked.unfolded) {
            assert!((a - b).abs() / a < 1e-2, "{} vs {}", a, b);
        }
    }

    struct Poison;

    impl Regularizer for Poison {
        fn regularize(&self, values: &[f64], errors: &[f64]) -> Result<Smoothed> {
            let mut v = values.to_vec();
            v[0] = f64::NAN;
            Ok(Smoothed { values: v, errors: errors.to_vec() })
        }

        fn name(&self) -> &str {
            "poison"
        }
    }

    #[test]
    fn test_nan_regularizer_is_non_convergent() {
        let err = IterativeUnfolder::default()
            .with_callback(Callback::Regularizer(Box::new(Poison)))
            .run(&Histogram::poisson(vec![1.0, 2.0, 3.0]), &smeared_3x3(), &Efficiency::ones(3))
            .unwrap_err();
        assert!(matches!(err, Error::NonConvergent { iteration: 1, .. }));
    }

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<(usize, EngineState)>>,
    }

    impl Observer for &'static Recorder {
        fn on_iteration(&self, s: &IterationSnapshot<'_>) -> Result<()> {
            self.seen.lock().unwrap().push((s.iteration, s.state));
            Ok(())
        }
    }

    struct FailAt(usize);

    impl Observer for FailAt {
        fn on_iteration(&self, s: &IterationSnapshot<'_>) -> Result<()> {
            if s.iteration == self.0 {
                return Err(Error::Computation("observer gave up".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_observers_see_every_iteration() {
        let rec: &'static Recorder = Box::leak(Box::default());
        let cfg = UnfoldConfig { max_iter: 4, ts_stopping: 1e-15, ..Default::default() };
        let res = IterativeUnfolder::new(cfg)
            .with_callback(Callback::Observer(Box::new(rec)))
            .run(
                &Histogram::poisson(vec![120.0, 300.0, 80.0]),
                &smeared_3x3(),
                &Efficiency::ones(3),
            )
            .unwrap();
        let seen = rec.seen.lock().unwrap();
        assert_eq!(seen.len(), res.num_iterations);
        assert_eq!(seen[0], (1, EngineState::Iterating));
        assert_eq!(seen[3], (4, EngineState::MaxIterationsReached));
    }

    #[test]
    fn test_failing_observer_aborts() {
        let cfg = UnfoldConfig { max_iter: 10, ts_stopping: 1e-15, ..Default::default() };
        let err = IterativeUnfolder::new(cfg)
            .with_callback(Callback::Observer(Box::new(FailAt(2))))
            .run(
                &Histogram::poisson(vec![120.0, 300.0, 80.0]),
                &smeared_3x3(),
                &Efficiency::ones(3),
            )
            .unwrap_err();
        assert!(matches!(err, Error::Computation(_)));
    }

    #[test]
    fn test_errors_leave_state_failed() {
        let data = Histogram::poisson(vec![120.0, 300.0, 80.0]);
        let eff = Efficiency::ones(3);
        let cfg = UnfoldConfig { max_iter: 10, ts_stopping: 1e-15, ..Default::default() };

        let unfolder =
            IterativeUnfolder::new(cfg).with_callback(Callback::Observer(Box::new(FailAt(2))));
        let mut st = UnfoldingState::new();
        assert!(unfolder.run_with_state(&mut st, &data, &smeared_3x3(), &eff).is_err());
        assert_eq!(st.state, EngineState::Failed);
        assert_eq!(st.iteration, 2);

        // rejected before the first iteration
        let mut st = UnfoldingState::new();
        let short = Histogram::poisson(vec![1.0, 2.0]);
        let err = IterativeUnfolder::default()
            .run_with_state(&mut st, &short, &smeared_3x3(), &eff)
            .unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { .. }));
        assert_eq!(st.state, EngineState::Failed);
        assert_eq!(st.iteration, 0);

        let mut st = UnfoldingState::new();
        let res =
            IterativeUnfolder::default().run_with_state(&mut st, &data, &smeared_3x3(), &eff);
        assert!(res.is_ok());
        assert!(matches!(st.state, EngineState::Converged | EngineState::MaxIterationsReached));
    }

    struct Never;

    impl TestStatistic for Never {
        fn calc(&self, _current: &[f64], _previous: &[f64]) -> Result<f64> {
            Ok(1.0)
        }

        fn name(&self) -> &str {
            "never"
        }
    }

    #[test]
    fn test_custom_statistic() {
        let cfg = UnfoldConfig { max_iter: 3, ..Default::default() };
        let res = IterativeUnfolder::new(cfg)
            .with_test_statistic(Box::new(Never))
            .run(&Histogram::poisson(vec![1.0, 2.0, 3.0]), &smeared_3x3(), &Efficiency::ones(3))
            .unwrap();
        assert_eq!(res.ts_iter, vec![1.0; 3]);
        assert_eq!(res.test_statistic, "never");
        assert_eq!(res.status, UnfoldStatus::MaxIterationsReached);
    }

    #[test]
    fn test_regularized_and_raw_both_kept() {
        let data = Histogram::poisson(vec![
            50.0, 180.0, 90.0, 260.0, 120.0, 300.0, 140.0, 220.0, 60.0, 30.0,
        ]);
        let r = ResponseMatrix::identity(10).unwrap();
        let cfg = UnfoldConfig { ts: TestStatKind::Chi2, ..Default::default() };
        let res = IterativeUnfolder::new(cfg)
            .with_callback(SplineRegularizer::new(3, 5.0).unwrap())
            .run(&data, &r, &Efficiency::ones(10))
            .unwrap();
        assert_eq!(res.smoothed.len(), 10);
        assert_ne!(res.smoothed, res.unfolded);
        let rough = |v: &[f64]| v.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>();
        assert!(rough(&res.smoothed) < rough(&res.unfolded));
    }

    #[test]
    fn test_free_function_matches_builder() {
        let data = Histogram::poisson(vec![120.0, 300.0, 80.0]);
        let a = iterative_unfold(
            &data,
            &smeared_3x3(),
            &Efficiency::ones(3),
            UnfoldConfig::default(),
            Vec::new(),
        )
        .unwrap();
        let b =
            IterativeUnfolder::default().run(&data, &smeared_3x3(), &Efficiency::ones(3)).unwrap();
        assert_eq!(a.unfolded, b.unfolded);
        assert_eq!(a.ts_iter, b.ts_iter);
    }
}

//! Unfolding configuration.
//!
//! [`UnfoldConfig`] is the typed configuration used by the engine.
//! [`UnfoldSettings`] is its JSON-facing form: option names are plain strings
//! and are resolved (and rejected) by [`UnfoldSettings::build`] before any
//! iteration runs.

use std::collections::BTreeMap;

use nu_core::{Error, GroupAssignment, Result};
use serde::{Deserialize, Serialize};

use crate::callbacks::{Callback, Logger};
use crate::covariance::{CovarianceType, SysCombination};
use crate::priors::PriorSpec;
use crate::regularize::SplineRegularizer;
use crate::test_stat::TestStatKind;

/// Default iteration cap.
pub const DEFAULT_MAX_ITER: usize = 100;
/// Default stopping threshold.
pub const DEFAULT_TS_STOPPING: f64 = 0.01;

/// Engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UnfoldConfig {
    /// Initial prior.
    pub prior: PriorSpec,
    /// Test statistic for the stopping rule.
    pub ts: TestStatKind,
    /// Stop once the test statistic is at or below this value.
    pub ts_stopping: f64,
    /// Iteration cap.
    pub max_iter: usize,
    /// Covariance model of the observed counts.
    pub cov_type: CovarianceType,
    /// How systematic covariance carries across iterations.
    pub sys_combination: SysCombination,
    /// Keep a record of every iteration in the result.
    pub return_iterations: bool,
}

impl Default for UnfoldConfig {
    fn default() -> Self {
        Self {
            prior: PriorSpec::Uniform,
            ts: TestStatKind::Ks,
            ts_stopping: DEFAULT_TS_STOPPING,
            max_iter: DEFAULT_MAX_ITER,
            cov_type: CovarianceType::Poisson,
            sys_combination: SysCombination::Quadrature,
            return_iterations: false,
        }
    }
}

impl UnfoldConfig {
    /// Check scalar options.
    pub fn validate(&self) -> Result<()> {
        if !self.ts_stopping.is_finite() || self.ts_stopping <= 0.0 {
            return Err(Error::Validation(format!(
                "ts_stopping must be finite and > 0, got {}",
                self.ts_stopping
            )));
        }
        if self.max_iter == 0 {
            return Err(Error::Validation("max_iter must be > 0".into()));
        }
        Ok(())
    }
}

/// JSON-facing regularizer settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegularizerSettings {
    /// Regularizer kind; only `"spline"` is recognized.
    pub kind: String,
    /// Spline degree (default 3).
    #[serde(default)]
    pub degree: Option<usize>,
    /// Penalty weight (default 1.0).
    #[serde(default)]
    pub smooth: Option<f64>,
    /// Group id per cause bin.
    #[serde(default)]
    pub groups: Option<Vec<i64>>,
    /// Anything else; rejected by [`UnfoldSettings::build`].
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl RegularizerSettings {
    fn build(&self) -> Result<SplineRegularizer> {
        if !self.kind.eq_ignore_ascii_case("spline") {
            return Err(Error::UnknownRegularizerConfig(format!("unknown kind {:?}", self.kind)));
        }
        if let Some(key) = self.extra.keys().next() {
            return Err(Error::UnknownRegularizerConfig(format!(
                "unrecognized option {key:?} for spline regularizer"
            )));
        }
        let reg = SplineRegularizer::new(self.degree.unwrap_or(3), self.smooth.unwrap_or(1.0))?;
        Ok(match &self.groups {
            Some(g) => reg.with_groups(GroupAssignment::new(g.clone())),
            None => reg,
        })
    }
}

/// JSON-facing unfolding settings.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UnfoldSettings {
    /// Initial prior.
    pub prior: PriorSpec,
    /// Test statistic name (`ks`, `chi2`, `rmd`/`relative-diff`, `pf`/`p-value`).
    pub ts: Option<String>,
    /// Stopping threshold.
    pub ts_stopping: Option<f64>,
    /// Iteration cap.
    pub max_iter: Option<usize>,
    /// `poisson` or `multinomial`.
    pub cov_type: Option<String>,
    /// `quadrature`, `fresh` or `propagated`.
    pub sys_combination: Option<String>,
    /// Keep per-iteration records.
    pub return_iterations: bool,
    /// Log every iteration.
    pub log_iterations: bool,
    /// Optional regularizer.
    pub regularizer: Option<RegularizerSettings>,
}

impl UnfoldSettings {
    /// Resolve into a typed config and callback pipeline.
    pub fn build(&self) -> Result<(UnfoldConfig, Vec<Callback>)> {
        let defaults = UnfoldConfig::default();
        let config = UnfoldConfig {
            prior: self.prior.clone(),
            ts: match &self.ts {
                Some(s) => s.parse()?,
                None => defaults.ts,
            },
            ts_stopping: self.ts_stopping.unwrap_or(defaults.ts_stopping),
            max_iter: self.max_iter.unwrap_or(defaults.max_iter),
            cov_type: match &self.cov_type {
                Some(s) => s.parse()?,
                None => defaults.cov_type,
            },
            sys_combination: match &self.sys_combination {
                Some(s) => s.parse()?,
                None => defaults.sys_combination,
            },
            return_iterations: self.return_iterations,
        };
        config.validate()?;

        let mut callbacks = Vec::new();
        if let Some(reg) = &self.regularizer {
            callbacks.push(Callback::Spline(reg.build()?));
        }
        if self.log_iterations {
            callbacks.push(Callback::Logger(Logger));
        }
        Ok((config, callbacks))
    }

    /// Parse settings from JSON text.
    pub fn from_json(text: &str) -> Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}

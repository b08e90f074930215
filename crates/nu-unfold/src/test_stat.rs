//! Test statistics comparing successive cause estimates.
//!
//! All statistics are non-negative and exactly zero for identical inputs.

use std::fmt;
use std::str::FromStr;

use nu_core::{Error, Result, TestStatistic};
use serde::{Deserialize, Serialize};

/// Built-in test statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatKind {
    /// Kolmogorov-Smirnov: max deviation between normalized cumulative distributions.
    #[default]
    Ks,
    /// Chi-square per degree of freedom: `Σ (a-b)² / (a+b) / ndf`.
    Chi2,
    /// Relative maximum difference: `max |a-b| / |b|`.
    Rmd,
    /// Bin-wise p-value: `1 - min_i p_i` for `z_i = |a_i-b_i| / sqrt(a_i+b_i)`.
    Pf,
}

impl FromStr for TestStatKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ks" => Ok(TestStatKind::Ks),
            "chi2" => Ok(TestStatKind::Chi2),
            "rmd" | "relative-diff" => Ok(TestStatKind::Rmd),
            "pf" | "p-value" => Ok(TestStatKind::Pf),
            _ => Err(Error::UnknownTestStatistic(s.to_string())),
        }
    }
}

impl fmt::Display for TestStatKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TestStatKind {
    /// Canonical short name.
    pub fn as_str(&self) -> &'static str {
        match self {
            TestStatKind::Ks => "ks",
            TestStatKind::Chi2 => "chi2",
            TestStatKind::Rmd => "rmd",
            TestStatKind::Pf => "pf",
        }
    }
}

impl TestStatistic for TestStatKind {
    fn calc(&self, current: &[f64], previous: &[f64]) -> Result<f64> {
        check_inputs(current, previous)?;
        Ok(match self {
            TestStatKind::Ks => ks(current, previous),
            TestStatKind::Chi2 => chi2(current, previous),
            TestStatKind::Rmd => rmd(current, previous),
            TestStatKind::Pf => pf(current, previous),
        })
    }

    fn name(&self) -> &str {
        self.as_str()
    }
}

fn check_inputs(a: &[f64], b: &[f64]) -> Result<()> {
    if a.len() != b.len() {
        return Err(Error::shape("test statistic input", a.len(), b.len()));
    }
    if a.is_empty() {
        return Err(Error::Validation("test statistic needs at least one bin".into()));
    }
    if a.iter().chain(b).any(|v| !v.is_finite()) {
        return Err(Error::Computation("test statistic input is not finite".into()));
    }
    Ok(())
}

fn ks(a: &[f64], b: &[f64]) -> f64 {
    let ta: f64 = a.iter().sum();
    let tb: f64 = b.iter().sum();
    match (ta > 0.0, tb > 0.0) {
        (false, false) => return 0.0,
        (true, false) | (false, true) => return 1.0,
        _ => {}
    }
    let mut ca = 0.0;
    let mut cb = 0.0;
    let mut d: f64 = 0.0;
    for (x, y) in a.iter().zip(b) {
        ca += x;
        cb += y;
        d = d.max((ca / ta - cb / tb).abs());
    }
    d
}

fn chi2(a: &[f64], b: &[f64]) -> f64 {
    let mut sum = 0.0;
    let mut ndf = 0usize;
    for (x, y) in a.iter().zip(b) {
        let denom = x.abs() + y.abs();
        if denom > 0.0 {
            sum += (x - y).powi(2) / denom;
            ndf += 1;
        }
    }
    if ndf == 0 { 0.0 } else { sum / ndf as f64 }
}

fn rmd(a: &[f64], b: &[f64]) -> f64 {
    a.iter()
        .zip(b)
        .filter(|(x, y)| **x != 0.0 || **y != 0.0)
        .map(|(x, y)| {
            let denom = if *y != 0.0 { y.abs() } else { x.abs() };
            (x - y).abs() / denom
        })
        .fold(0.0, f64::max)
}

fn pf(a: &[f64], b: &[f64]) -> f64 {
    let min_p = a
        .iter()
        .zip(b)
        .filter(|(x, y)| x.abs() + y.abs() > 0.0)
        .map(|(x, y)| {
            let z = (x - y).abs() / (x.abs() + y.abs()).sqrt();
            statrs::function::erf::erfc(z / std::f64::consts::SQRT_2)
        })
        .fold(1.0, f64::min);
    (1.0 - min_p).max(0.0)
}

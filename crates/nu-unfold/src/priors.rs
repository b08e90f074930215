//! Prior distributions over cause bins.
//!
//! Every constructor returns a non-negative vector summing to 1.

use nu_core::{Error, Result};
use serde::{Deserialize, Serialize};

/// How the initial prior is chosen.
///
/// In JSON this is a name (`"uniform"`, `"jeffreys"`), a bare weight array,
/// or one of the tagged forms `{"values": [...]}` and
/// `{"jeffreys": {"limits": [...]}}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "PriorRepr")]
pub enum PriorSpec {
    /// Flat prior, `1/n` per cause bin.
    #[default]
    Uniform,
    /// Jeffreys prior from cause-bin limits.
    ///
    /// `limits` holds either the `n + 1` bin edges or `n` representative
    /// values (one per cause bin). Empty limits use the 1-based bin indices.
    Jeffreys {
        /// Positive, strictly increasing bin limits.
        limits: Vec<f64>,
    },
    /// Caller-supplied weights (renormalized).
    Values(Vec<f64>),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PriorRepr {
    Weights(Vec<f64>),
    Name(String),
    Tagged(TaggedPrior),
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum TaggedPrior {
    Uniform,
    Jeffreys { limits: Vec<f64> },
    Values(Vec<f64>),
}

impl TryFrom<PriorRepr> for PriorSpec {
    type Error = Error;

    fn try_from(repr: PriorRepr) -> Result<Self> {
        Ok(match repr {
            PriorRepr::Weights(v) => PriorSpec::Values(v),
            PriorRepr::Name(name) => match name.to_ascii_lowercase().as_str() {
                "uniform" => PriorSpec::Uniform,
                "jeffreys" => PriorSpec::Jeffreys { limits: Vec::new() },
                _ => {
                    return Err(Error::InvalidPrior(format!(
                        "unknown prior {name:?}; expected uniform, jeffreys or a weight array"
                    )));
                }
            },
            PriorRepr::Tagged(TaggedPrior::Uniform) => PriorSpec::Uniform,
            PriorRepr::Tagged(TaggedPrior::Jeffreys { limits }) => PriorSpec::Jeffreys { limits },
            PriorRepr::Tagged(TaggedPrior::Values(v)) => PriorSpec::Values(v),
        })
    }
}

impl PriorSpec {
    /// Resolve into a normalized prior over `n_causes` bins.
    pub fn resolve(&self, n_causes: usize) -> Result<Vec<f64>> {
        let prior = match self {
            PriorSpec::Uniform => uniform_prior(n_causes)?,
            PriorSpec::Jeffreys { limits } if limits.is_empty() => {
                let indices: Vec<f64> = (1..=n_causes).map(|i| i as f64).collect();
                jeffreys_prior(&indices)?
            }
            PriorSpec::Jeffreys { limits } => {
                if limits.len() == n_causes + 1 {
                    jeffreys_prior_from_edges(limits)?
                } else if limits.len() == n_causes {
                    jeffreys_prior(limits)?
                } else {
                    return Err(Error::shape("jeffreys limits", n_causes + 1, limits.len()));
                }
            }
            PriorSpec::Values(v) => user_prior(v)?,
        };
        if prior.len() != n_causes {
            return Err(Error::shape("prior", n_causes, prior.len()));
        }
        Ok(prior)
    }
}

/// Flat prior over `n` cause bins.
pub fn uniform_prior(n: usize) -> Result<Vec<f64>> {
    if n == 0 {
        return Err(Error::InvalidPrior("need at least one cause bin".into()));
    }
    Ok(vec![1.0 / n as f64; n])
}

/// Jeffreys prior from representative cause values (one per bin).
///
/// `prior[i] ∝ 1 / x_i`, the density of a log-uniform distribution on
/// `[min(x), max(x)]`.
pub fn jeffreys_prior(limits: &[f64]) -> Result<Vec<f64>> {
    check_limits(limits, 1)?;
    let ln_factor = (limits[limits.len() - 1] / limits[0]).ln();
    let raw: Vec<f64> = if ln_factor > 0.0 {
        limits.iter().map(|&x| 1.0 / (ln_factor * x)).collect()
    } else {
        // single bin
        vec![1.0; limits.len()]
    };
    normalize(raw)
}

/// Jeffreys prior from cause-bin edges (`n + 1` values for `n` bins).
///
/// `prior[i] ∝ 1 / (edges[i+1] - edges[i])`.
pub fn jeffreys_prior_from_edges(edges: &[f64]) -> Result<Vec<f64>> {
    check_limits(edges, 2)?;
    let raw = edges.windows(2).map(|w| 1.0 / (w[1] - w[0])).collect();
    normalize(raw)
}

/// Validate and renormalize caller-supplied prior weights.
pub fn user_prior(values: &[f64]) -> Result<Vec<f64>> {
    if values.is_empty() {
        return Err(Error::InvalidPrior("prior is empty".into()));
    }
    if let Some((i, v)) = values.iter().enumerate().find(|(_, v)| !v.is_finite() || **v < 0.0) {
        return Err(Error::InvalidPrior(format!("entry {i} is {v}; must be finite and >= 0")));
    }
    normalize(values.to_vec())
}

/// Concatenate per-group priors and renormalize the result.
///
/// Each part is weighted by its own sum, so equally normalized parts get
/// equal total weight.
pub fn concat_priors(parts: &[Vec<f64>]) -> Result<Vec<f64>> {
    user_prior(&parts.concat())
}

fn check_limits(limits: &[f64], min_len: usize) -> Result<()> {
    if limits.len() < min_len {
        return Err(Error::InvalidPrior(format!(
            "need at least {min_len} limits, got {}",
            limits.len()
        )));
    }
    if limits.iter().any(|&x| !x.is_finite() || x <= 0.0) {
        return Err(Error::InvalidPrior("limits must be finite and > 0".into()));
    }
    if limits.windows(2).any(|w| w[1] <= w[0]) {
        return Err(Error::InvalidPrior("limits must be strictly increasing".into()));
    }
    Ok(())
}

fn normalize(mut v: Vec<f64>) -> Result<Vec<f64>> {
    let total: f64 = v.iter().sum();
    if !total.is_finite() || total <= 0.0 {
        return Err(Error::InvalidPrior(format!("prior sums to {total}; cannot normalize")));
    }
    for x in &mut v {
        *x /= total;
    }
    Ok(v)
}

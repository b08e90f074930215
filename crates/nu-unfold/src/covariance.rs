//! Covariance propagation for the Bayes update.
//!
//! Notation: `R[e][c]` normalized response, `p` prior, `ε` efficiencies,
//! `d` observed counts, `D_e = Σ_c R[e][c]·p_c` and
//! `M[e][c] = R[e][c]·p_c / (D_e·ε_c)` the unfolding matrix, so that
//! `n_c = Σ_e d_e·M[e][c]`.

use std::fmt;
use std::str::FromStr;

use nalgebra::DMatrix;
use nu_core::{Efficiency, Error, Histogram, ResponseMatrix, Result};
use serde::{Deserialize, Serialize};

/// Covariance model of the observed counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CovarianceType {
    /// Independent bins, variance from the supplied data errors.
    #[default]
    Poisson,
    /// Fixed total count: `V[i][j] = N·p_i·(δ_ij - p_j)`.
    Multinomial,
}

/// How the systematic covariance is carried from one iteration to the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SysCombination {
    /// `V(t) = V(t-1) + V_fresh(t)`.
    #[default]
    Quadrature,
    /// `V(t) = V_fresh(t)`.
    Fresh,
    /// `V(t) = J·V(t-1)·Jᵀ + V_fresh(t)`, `J = ∂n(t)/∂n(t-1)` through the prior.
    Propagated,
}

impl FromStr for CovarianceType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "poisson" => Ok(CovarianceType::Poisson),
            "multinomial" => Ok(CovarianceType::Multinomial),
            other => Err(Error::Validation(format!("unknown covariance type {other:?}"))),
        }
    }
}

impl fmt::Display for CovarianceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CovarianceType::Poisson => write!(f, "poisson"),
            CovarianceType::Multinomial => write!(f, "multinomial"),
        }
    }
}

impl FromStr for SysCombination {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "quadrature" => Ok(SysCombination::Quadrature),
            "fresh" => Ok(SysCombination::Fresh),
            "propagated" => Ok(SysCombination::Propagated),
            other => Err(Error::Validation(format!("unknown systematic combination {other:?}"))),
        }
    }
}

impl fmt::Display for SysCombination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SysCombination::Quadrature => write!(f, "quadrature"),
            SysCombination::Fresh => write!(f, "fresh"),
            SysCombination::Propagated => write!(f, "propagated"),
        }
    }
}

/// Covariance of the observed effect counts.
pub fn data_covariance(cov_type: CovarianceType, data: &Histogram) -> DMatrix<f64> {
    let n = data.len();
    match cov_type {
        CovarianceType::Poisson => {
            DMatrix::from_diagonal(&nalgebra::DVector::from_iterator(
                n,
                data.errors.iter().map(|e| e * e),
            ))
        }
        CovarianceType::Multinomial => {
            let total = data.total();
            DMatrix::from_fn(n, n, |i, j| {
                let di = data.values[i];
                let diag = if i == j { di } else { 0.0 };
                if total > 0.0 { diag - di * data.values[j] / total } else { 0.0 }
            })
        }
    }
}

/// Statistical covariance of the unfolded counts, `Mᵀ·V_data·M`.
pub fn stat_covariance(unfolding: &DMatrix<f64>, v_data: &DMatrix<f64>) -> DMatrix<f64> {
    unfolding.transpose() * v_data * unfolding
}

/// Systematic covariance of one Bayes update from response and efficiency errors.
///
/// Response entries and efficiencies are treated as independent. The
/// response term is `Σ_{e,k} σ²_ek·(∂n_c/∂R_ek)(∂n_c'/∂R_ek)` with
/// `∂n_c/∂R_ek = (d_e/D_e)·(δ_ck·p_c/ε_c - M_ec·p_k)`; the efficiency term
/// is `diag((n_c·σ_εc/ε_c)²)`.
pub fn sys_covariance(
    response: &ResponseMatrix,
    efficiencies: &Efficiency,
    data: &Histogram,
    prior: &[f64],
    predicted: &[f64],
    unfolding: &DMatrix<f64>,
    unfolded: &[f64],
) -> DMatrix<f64> {
    let n_c = response.n_causes();
    let mut v = DMatrix::<f64>::zeros(n_c, n_c);
    let q: Vec<f64> = prior.iter().zip(&efficiencies.values).map(|(p, e)| p / e).collect();

    for (e, (&d_e, &pred)) in data.values.iter().zip(predicted).enumerate() {
        if pred <= 0.0 || d_e == 0.0 {
            continue;
        }
        let a2 = (d_e / pred).powi(2);
        let s_e: f64 =
            (0..n_c).map(|k| response.error(e, k).powi(2) * prior[k] * prior[k]).sum();
        if s_e == 0.0 {
            continue;
        }
        for c in 0..n_c {
            let sig_c = response.error(e, c).powi(2);
            let m_c = unfolding[(e, c)];
            for c2 in c..n_c {
                let sig_c2 = response.error(e, c2).powi(2);
                let m_c2 = unfolding[(e, c2)];
                let mut term = m_c * m_c2 * s_e
                    - sig_c * q[c] * m_c2 * prior[c]
                    - sig_c2 * q[c2] * m_c * prior[c2];
                if c == c2 {
                    term += sig_c * q[c] * q[c];
                }
                let add = a2 * term;
                v[(c, c2)] += add;
                if c2 != c {
                    v[(c2, c)] += add;
                }
            }
        }
    }

    for c in 0..n_c {
        let rel = efficiencies.errors[c] / efficiencies.values[c];
        v[(c, c)] += (unfolded[c] * rel).powi(2);
    }
    v
}

/// Jacobian `∂n(t)/∂n(t-1)` of one Bayes update, where the prior is
/// `p = n(t-1) / prior_total`.
pub fn prior_jacobian(
    response: &ResponseMatrix,
    efficiencies: &Efficiency,
    data: &Histogram,
    prior: &[f64],
    predicted: &[f64],
    prior_total: f64,
) -> DMatrix<f64> {
    let n_c = response.n_causes();
    // ∂n_c/∂p_k
    let mut jp = DMatrix::<f64>::zeros(n_c, n_c);
    for (e, (&d_e, &pred)) in data.values.iter().zip(predicted).enumerate() {
        if pred <= 0.0 || d_e == 0.0 {
            continue;
        }
        for c in 0..n_c {
            let w = d_e * response.value(e, c) / (efficiencies.values[c] * pred);
            if w == 0.0 {
                continue;
            }
            for k in 0..n_c {
                let delta = if c == k { 1.0 } else { 0.0 };
                jp[(c, k)] += w * (delta - prior[c] * response.value(e, k) / pred);
            }
        }
    }
    if prior_total <= 0.0 {
        return DMatrix::zeros(n_c, n_c);
    }
    // ∂p_k/∂n_j
    let dp = DMatrix::from_fn(n_c, n_c, |k, j| {
        let delta = if k == j { 1.0 } else { 0.0 };
        (delta - prior[k]) / prior_total
    });
    jp * dp
}

/// Square root of a covariance diagonal.
pub fn diag_sqrt(cov: &DMatrix<f64>) -> Vec<f64> {
    cov.diagonal().iter().map(|v| v.max(0.0).sqrt()).collect()
}

/// Row-major copy of a matrix.
pub fn to_row_major(m: &DMatrix<f64>) -> Vec<f64> {
    m.transpose().as_slice().to_vec()
}

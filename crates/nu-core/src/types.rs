//! Common data types for NextUnfold
//!
//! All containers are plain numeric vectors (or row-major matrices) paired with
//! their uncertainties. Cause-indexed containers share one length; effect-indexed
//! containers share another. Constructors check only internal consistency
//! (value/error pairing); cross-container checks happen once at engine start.

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Binned counts with per-bin uncertainties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    /// Bin contents.
    pub values: Vec<f64>,
    /// Per-bin uncertainties (same length as `values`).
    pub errors: Vec<f64>,
}

impl Histogram {
    /// Create a histogram from contents and uncertainties.
    pub fn new(values: Vec<f64>, errors: Vec<f64>) -> Result<Self> {
        if values.len() != errors.len() {
            return Err(Error::shape("histogram errors", values.len(), errors.len()));
        }
        Ok(Self { values, errors })
    }

    /// Create a histogram with Poisson uncertainties `sqrt(n)`.
    pub fn poisson(values: Vec<f64>) -> Self {
        let errors = values.iter().map(|&v| v.max(0.0).sqrt()).collect();
        Self { values, errors }
    }

    /// Number of bins.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` if there are no bins.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Sum of bin contents.
    pub fn total(&self) -> f64 {
        self.values.iter().sum()
    }

    /// Check that contents and errors are finite and non-negative.
    pub fn validate_counts(&self, what: &str) -> Result<()> {
        for (i, (&v, &e)) in self.values.iter().zip(&self.errors).enumerate() {
            if !v.is_finite() || v < 0.0 {
                return Err(Error::Validation(format!(
                    "{what}[{i}] must be finite and >= 0, got {v}"
                )));
            }
            if !e.is_finite() || e < 0.0 {
                return Err(Error::Validation(format!(
                    "{what} error[{i}] must be finite and >= 0, got {e}"
                )));
            }
        }
        Ok(())
    }
}

/// Effect-by-cause response matrix with an error matrix of identical shape.
///
/// Stored row-major: `values[effect * n_causes + cause]`. Before normalization
/// entries are co-occurrence counts; afterwards column `c` sums to the
/// efficiency of cause `c`, i.e. the entries are `P(effect | cause)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ResponseMatrixRepr")]
pub struct ResponseMatrix {
    n_effects: usize,
    n_causes: usize,
    values: Vec<f64>,
    errors: Vec<f64>,
}

/// Unchecked wire form; deserialization goes through [`ResponseMatrix::new`].
#[derive(Deserialize)]
struct ResponseMatrixRepr {
    n_effects: usize,
    n_causes: usize,
    values: Vec<f64>,
    errors: Vec<f64>,
}

impl TryFrom<ResponseMatrixRepr> for ResponseMatrix {
    type Error = Error;

    fn try_from(r: ResponseMatrixRepr) -> Result<Self> {
        Self::new(r.n_effects, r.n_causes, r.values, r.errors)
    }
}

impl ResponseMatrix {
    /// Create from row-major buffers.
    pub fn new(
        n_effects: usize,
        n_causes: usize,
        values: Vec<f64>,
        errors: Vec<f64>,
    ) -> Result<Self> {
        let n = n_effects * n_causes;
        if n_effects == 0 || n_causes == 0 {
            return Err(Error::Validation("response must have at least one row and column".into()));
        }
        if values.len() != n {
            return Err(Error::shape("response values", n, values.len()));
        }
        if errors.len() != n {
            return Err(Error::shape("response errors", n, errors.len()));
        }
        Ok(Self { n_effects, n_causes, values, errors })
    }

    /// Create from nested rows (`rows[effect][cause]`).
    pub fn from_rows(values: Vec<Vec<f64>>, errors: Vec<Vec<f64>>) -> Result<Self> {
        let n_effects = values.len();
        let n_causes = values.first().map_or(0, Vec::len);
        if errors.len() != n_effects {
            return Err(Error::shape("response error rows", n_effects, errors.len()));
        }
        for (i, (row, erow)) in values.iter().zip(&errors).enumerate() {
            if row.len() != n_causes {
                return Err(Error::shape(format!("response row {i}"), n_causes, row.len()));
            }
            if erow.len() != n_causes {
                return Err(Error::shape(format!("response error row {i}"), n_causes, erow.len()));
            }
        }
        Self::new(n_effects, n_causes, values.concat(), errors.concat())
    }

    /// Square identity response with zero errors.
    pub fn identity(n: usize) -> Result<Self> {
        let mut values = vec![0.0; n * n];
        for i in 0..n {
            values[i * n + i] = 1.0;
        }
        Self::new(n, n, values, vec![0.0; n * n])
    }

    /// Number of effect bins (rows).
    pub fn n_effects(&self) -> usize {
        self.n_effects
    }

    /// Number of cause bins (columns).
    pub fn n_causes(&self) -> usize {
        self.n_causes
    }

    /// Entry `(effect, cause)`.
    #[inline]
    pub fn value(&self, effect: usize, cause: usize) -> f64 {
        self.values[effect * self.n_causes + cause]
    }

    /// Error of entry `(effect, cause)`.
    #[inline]
    pub fn error(&self, effect: usize, cause: usize) -> f64 {
        self.errors[effect * self.n_causes + cause]
    }

    /// Row-major values.
    pub fn values(&self) -> &[f64] {
        &self.values
    }

    /// Row-major errors.
    pub fn errors(&self) -> &[f64] {
        &self.errors
    }

    /// Sum over effects for every cause column.
    pub fn column_sums(&self) -> Vec<f64> {
        let mut sums = vec![0.0; self.n_causes];
        for row in self.values.chunks_exact(self.n_causes) {
            for (s, &v) in sums.iter_mut().zip(row) {
                *s += v;
            }
        }
        sums
    }

    /// Values as nested rows.
    pub fn to_rows(&self) -> Vec<Vec<f64>> {
        self.values.chunks_exact(self.n_causes).map(<[f64]>::to_vec).collect()
    }

    /// Errors as nested rows.
    pub fn error_rows(&self) -> Vec<Vec<f64>> {
        self.errors.chunks_exact(self.n_causes).map(<[f64]>::to_vec).collect()
    }
}

/// Per-cause detection efficiencies with uncertainties.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Efficiency {
    /// Efficiency per cause bin.
    pub values: Vec<f64>,
    /// Uncertainty per cause bin.
    pub errors: Vec<f64>,
}

impl Efficiency {
    /// Create from values and errors.
    pub fn new(values: Vec<f64>, errors: Vec<f64>) -> Result<Self> {
        if values.len() != errors.len() {
            return Err(Error::shape("efficiency errors", values.len(), errors.len()));
        }
        Ok(Self { values, errors })
    }

    /// Perfect efficiency (1 ± 0) for `n` cause bins.
    pub fn ones(n: usize) -> Self {
        Self { values: vec![1.0; n], errors: vec![0.0; n] }
    }

    /// Number of cause bins.
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// `true` if there are no cause bins.
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Partition of the cause axis into independently regularized groups.
///
/// One integer id per cause bin. Groups need not be contiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GroupAssignment(Vec<i64>);

impl GroupAssignment {
    /// Wrap a list of group ids.
    pub fn new(ids: Vec<i64>) -> Self {
        Self(ids)
    }

    /// A single group (id 0) covering `n` cause bins.
    pub fn single(n: usize) -> Self {
        Self(vec![0; n])
    }

    /// Group ids, one per cause bin.
    pub fn ids(&self) -> &[i64] {
        &self.0
    }

    /// Number of cause bins covered.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// `true` if no cause bins are covered.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Bin indices per group, in first-occurrence order of each id.
    pub fn partitions(&self) -> Vec<(i64, Vec<usize>)> {
        let mut parts: Vec<(i64, Vec<usize>)> = Vec::new();
        for (i, &g) in self.0.iter().enumerate() {
            match parts.iter_mut().find(|(id, _)| *id == g) {
                Some((_, idx)) => idx.push(i),
                None => parts.push((g, vec![i])),
            }
        }
        parts
    }
}

/// Unfolded counts with statistical and systematic covariance.
///
/// Covariances are row-major `n × n` buffers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "CauseEstimateRepr")]
pub struct CauseEstimate {
    /// Unfolded counts per cause bin.
    pub unfolded: Vec<f64>,
    /// Statistical covariance from the observed-count uncertainty.
    pub stat_cov: Vec<f64>,
    /// Systematic covariance from response and efficiency uncertainty.
    pub sys_cov: Vec<f64>,
}

#[derive(Deserialize)]
struct CauseEstimateRepr {
    unfolded: Vec<f64>,
    stat_cov: Vec<f64>,
    sys_cov: Vec<f64>,
}

impl TryFrom<CauseEstimateRepr> for CauseEstimate {
    type Error = Error;

    fn try_from(r: CauseEstimateRepr) -> Result<Self> {
        Self::new(r.unfolded, r.stat_cov, r.sys_cov)
    }
}

impl CauseEstimate {
    /// Create from counts and row-major `n × n` covariances.
    pub fn new(unfolded: Vec<f64>, stat_cov: Vec<f64>, sys_cov: Vec<f64>) -> Result<Self> {
        let n2 = unfolded.len() * unfolded.len();
        if stat_cov.len() != n2 {
            return Err(Error::shape("statistical covariance", n2, stat_cov.len()));
        }
        if sys_cov.len() != n2 {
            return Err(Error::shape("systematic covariance", n2, sys_cov.len()));
        }
        Ok(Self { unfolded, stat_cov, sys_cov })
    }

    /// Number of cause bins.
    pub fn len(&self) -> usize {
        self.unfolded.len()
    }

    /// `true` if there are no cause bins.
    pub fn is_empty(&self) -> bool {
        self.unfolded.is_empty()
    }

    /// Square root of the statistical covariance diagonal.
    pub fn stat_err(&self) -> Vec<f64> {
        diag_sqrt(&self.stat_cov, self.len())
    }

    /// Square root of the systematic covariance diagonal.
    pub fn sys_err(&self) -> Vec<f64> {
        diag_sqrt(&self.sys_cov, self.len())
    }
}

/// NaN where the buffer is too short (fields are public and may be edited).
fn diag_sqrt(cov: &[f64], n: usize) -> Vec<f64> {
    (0..n).map(|i| cov.get(i * n + i).map_or(f64::NAN, |v| v.max(0.0).sqrt())).collect()
}

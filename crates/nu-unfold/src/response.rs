//! Response normalization.
//!
//! Turns a raw effect-by-cause co-occurrence matrix into `P(effect | cause)`
//! scaled so that column `c` sums to the efficiency of cause `c`.

use nu_core::{Efficiency, Error, ResponseMatrix, Result};

/// Normalize a raw response so each column sums to its cause efficiency.
///
/// For column `c` with raw sum `S_c`, every entry is scaled by `ε_c / S_c`.
/// Entry errors combine the raw entry's relative error and the efficiency's
/// relative error in quadrature (independent errors). Entries with zero raw
/// content keep their absolute error, scaled by the column factor.
///
/// A column summing to zero has no defined normalization and fails with
/// [`Error::UndefinedNormalization`].
pub fn normalize_response(
    raw: &ResponseMatrix,
    efficiencies: &Efficiency,
) -> Result<ResponseMatrix> {
    let n_effects = raw.n_effects();
    let n_causes = raw.n_causes();
    if efficiencies.len() != n_causes {
        return Err(Error::shape("efficiencies", n_causes, efficiencies.len()));
    }

    for (i, (&v, &e)) in raw.values().iter().zip(raw.errors()).enumerate() {
        if !v.is_finite() || v < 0.0 || !e.is_finite() || e < 0.0 {
            return Err(Error::Validation(format!(
                "response entry ({}, {}) must be finite and >= 0, got {} ± {}",
                i / n_causes,
                i % n_causes,
                v,
                e
            )));
        }
    }

    let col_sums = raw.column_sums();
    let mut scale = Vec::with_capacity(n_causes);
    let mut eff_rel = Vec::with_capacity(n_causes);
    for (c, &sum) in col_sums.iter().enumerate() {
        if sum.is_nan() || sum <= 0.0 {
            return Err(Error::UndefinedNormalization { cause: c, sum });
        }
        let eff = efficiencies.values[c];
        let eff_err = efficiencies.errors[c];
        if !eff.is_finite() || eff < 0.0 || !eff_err.is_finite() || eff_err < 0.0 {
            return Err(Error::Validation(format!(
                "efficiency[{c}] must be finite and >= 0, got {eff} ± {eff_err}"
            )));
        }
        scale.push(eff / sum);
        eff_rel.push(if eff > 0.0 { eff_err / eff } else { 0.0 });
    }

    let mut values = Vec::with_capacity(n_effects * n_causes);
    let mut errors = Vec::with_capacity(n_effects * n_causes);
    for e in 0..n_effects {
        for c in 0..n_causes {
            let v = raw.value(e, c);
            let err = raw.error(e, c);
            let norm = v * scale[c];
            values.push(norm);
            if v > 0.0 {
                let rel = err / v;
                errors.push(norm * (rel * rel + eff_rel[c] * eff_rel[c]).sqrt());
            } else {
                errors.push(err * scale[c]);
            }
        }
    }

    ResponseMatrix::new(n_effects, n_causes, values, errors)
}

/// Largest absolute deviation between column sums and efficiencies.
///
/// Zero (up to rounding) for a properly normalized response.
pub fn efficiency_closure(response: &ResponseMatrix, efficiencies: &Efficiency) -> Result<f64> {
    if efficiencies.len() != response.n_causes() {
        return Err(Error::shape("efficiencies", response.n_causes(), efficiencies.len()));
    }
    Ok(response
        .column_sums()
        .iter()
        .zip(&efficiencies.values)
        .map(|(s, e)| (s - e).abs())
        .fold(0.0, f64::max))
}

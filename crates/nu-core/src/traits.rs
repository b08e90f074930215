//! Extension traits for NextUnfold
//!
//! The engine ships a closed set of built-in regularizers and test statistics.
//! These traits are the open extension point: any type implementing them can be
//! plugged into an unfolding run next to (or instead of) the built-ins.

use crate::Result;

/// Output of a regularization step.
#[derive(Debug, Clone, PartialEq)]
pub struct Smoothed {
    /// Smoothed cause counts (same length as the input).
    pub values: Vec<f64>,
    /// Uncertainty of the smoothed counts.
    pub errors: Vec<f64>,
}

/// Smoothing applied to a raw cause estimate before it becomes the next prior.
///
/// Implementations must be pure functions of their inputs and their own
/// configuration.
pub trait Regularizer: Send + Sync {
    /// Smooth `values` (with per-bin uncertainties `errors`).
    fn regularize(&self, values: &[f64], errors: &[f64]) -> Result<Smoothed>;

    /// Regularizer name, used in log lines.
    fn name(&self) -> &str;
}

/// Scalar divergence between two successive cause estimates.
///
/// Must return a non-negative value that is `0` for identical inputs.
pub trait TestStatistic: Send + Sync {
    /// Compare `current` against `previous` (equal lengths).
    fn calc(&self, current: &[f64], previous: &[f64]) -> Result<f64>;

    /// Statistic name (e.g. "ks").
    fn name(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Identity;

    impl Regularizer for Identity {
        fn regularize(&self, values: &[f64], errors: &[f64]) -> Result<Smoothed> {
            Ok(Smoothed { values: values.to_vec(), errors: errors.to_vec() })
        }

        fn name(&self) -> &str {
            "identity"
        }
    }

    struct MaxAbs;

    impl TestStatistic for MaxAbs {
        fn calc(&self, current: &[f64], previous: &[f64]) -> Result<f64> {
            Ok(current.iter().zip(previous).map(|(a, b)| (a - b).abs()).fold(0.0, f64::max))
        }

        fn name(&self) -> &str {
            "max-abs"
        }
    }

    #[test]
    fn test_trait_objects() {
        let reg: Box<dyn Regularizer> = Box::new(Identity);
        let s = reg.regularize(&[1.0, 2.0], &[0.1, 0.2]).unwrap();
        assert_eq!(s.values, vec![1.0, 2.0]);
        assert_eq!(reg.name(), "identity");

        let ts: Box<dyn TestStatistic> = Box::new(MaxAbs);
        assert_eq!(ts.calc(&[1.0, 2.0], &[1.0, 2.0]).unwrap(), 0.0);
        assert_eq!(ts.calc(&[1.0, 2.5], &[1.0, 2.0]).unwrap(), 0.5);
    }
}

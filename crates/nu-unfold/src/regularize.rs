//! Spline regularization of cause estimates, optionally per group.

use nu_core::{Error, GroupAssignment, Regularizer, Result, Smoothed};

use crate::spline::SmoothingSpline;

/// Smooths a cause estimate with a [`SmoothingSpline`].
///
/// Without groups, one spline is fitted over the whole cause axis. With a
/// [`GroupAssignment`], each group is fitted independently on its own bins
/// (re-indexed from zero) and the results are scattered back to the original
/// positions. Smoothed counts are clipped at zero.
#[derive(Debug, Clone)]
pub struct SplineRegularizer {
    spline: SmoothingSpline,
    groups: Option<GroupAssignment>,
}

impl SplineRegularizer {
    /// Create a regularizer with spline `degree` and penalty weight `smooth`.
    pub fn new(degree: usize, smooth: f64) -> Result<Self> {
        Ok(Self { spline: SmoothingSpline::new(degree, smooth)?, groups: None })
    }

    /// Regularize each group independently.
    pub fn with_groups(mut self, groups: GroupAssignment) -> Self {
        self.groups = Some(groups);
        self
    }

    /// Configured groups, if any.
    pub fn groups(&self) -> Option<&GroupAssignment> {
        self.groups.as_ref()
    }

    /// Underlying spline settings.
    pub fn spline(&self) -> &SmoothingSpline {
        &self.spline
    }

    /// Smooth `values` using an explicit group assignment.
    pub fn smooth(
        &self,
        values: &[f64],
        errors: &[f64],
        groups: Option<&GroupAssignment>,
    ) -> Result<Smoothed> {
        let n = values.len();
        if errors.len() != n {
            return Err(Error::shape("regularizer errors", n, errors.len()));
        }
        let parts = match groups {
            Some(g) if g.len() != n => return Err(Error::shape("group assignment", n, g.len())),
            Some(g) => g.partitions(),
            None => vec![(0, (0..n).collect())],
        };

        let mut out = vec![0.0; n];
        let mut out_err = vec![0.0; n];
        for (group, idx) in parts {
            if idx.len() < self.spline.min_points() {
                return Err(Error::InsufficientGroupSize {
                    group,
                    size: idx.len(),
                    degree: self.spline.degree(),
                    required: self.spline.min_points(),
                });
            }
            let local: Vec<f64> = idx.iter().map(|&j| values[j]).collect();
            let local_err: Vec<f64> = idx.iter().map(|&j| errors[j]).collect();
            let fit = self.spline.fit(&local)?;
            let fit_err = fit.fitted_errors(&local_err)?;
            for (row, &i) in idx.iter().enumerate() {
                out[i] = fit.eval(row as f64).max(0.0);
                out_err[i] = fit_err[row];
            }
        }
        Ok(Smoothed { values: out, errors: out_err })
    }
}

impl Regularizer for SplineRegularizer {
    fn regularize(&self, values: &[f64], errors: &[f64]) -> Result<Smoothed> {
        self.smooth(values, errors, self.groups.as_ref())
    }

    fn name(&self) -> &str {
        "spline"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bumpy(n: usize, offset: f64) -> Vec<f64> {
        (0..n)
            .map(|i| offset + 20.0 * (-(i as f64 - 4.0).powi(2) / 8.0).exp() + (i % 3) as f64)
            .collect()
    }

    #[test]
    fn test_groups_are_independent() {
        let left = bumpy(10, 5.0);
        let right = bumpy(10, 40.0);
        let full = [left.clone(), right.clone()].concat();
        let errs = vec![1.0; 20];
        let groups = GroupAssignment::new([vec![0; 10], vec![1; 10]].concat());

        let reg = SplineRegularizer::new(3, 2.0).unwrap();
        let grouped = reg.smooth(&full, &errs, Some(&groups)).unwrap();
        let l = reg.smooth(&left, &errs[..10], None).unwrap();
        let r = reg.smooth(&right, &errs[10..], None).unwrap();

        for i in 0..10 {
            assert!((grouped.values[i] - l.values[i]).abs() < 1e-10);
            assert!((grouped.values[10 + i] - r.values[i]).abs() < 1e-10);
            assert!((grouped.errors[i] - l.errors[i]).abs() < 1e-10);
        }
    }

    #[test]
    fn test_non_contiguous_groups() {
        let values: Vec<f64> = (0..8).map(|i| if i % 2 == 0 { 10.0 } else { 50.0 }).collect();
        let groups = GroupAssignment::new((0..8).map(|i| (i % 2) as i64).collect());
        let reg = SplineRegularizer::new(1, 5.0).unwrap().with_groups(groups);
        let out = reg.regularize(&values, &vec![1.0; 8]).unwrap();
        // each interleaved group is constant, so smoothing leaves it alone
        for (a, b) in out.values.iter().zip(&values) {
            assert!((a - b).abs() < 1e-9);
        }
    }

    #[test]
    fn test_insufficient_group_size_names_group() {
        let groups = GroupAssignment::new(vec![0, 0, 0, 0, 0, 7, 7]);
        let reg = SplineRegularizer::new(3, 1.0).unwrap();
        let err = reg.smooth(&[1.0; 7], &[1.0; 7], Some(&groups)).unwrap_err();
        assert!(matches!(err, Error::InsufficientGroupSize { group: 7, size: 2, required: 4, .. }));
    }

    #[test]
    fn test_group_length_mismatch() {
        let reg = SplineRegularizer::new(1, 1.0).unwrap().with_groups(GroupAssignment::single(3));
        assert!(matches!(reg.regularize(&[1.0; 4], &[1.0; 4]), Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn test_smoothed_errors_shrink() {
        let values = bumpy(15, 10.0);
        let errs = vec![2.0; 15];
        let out = SplineRegularizer::new(3, 10.0).unwrap().regularize(&values, &errs).unwrap();
        assert!(out.errors.iter().all(|&e| e > 0.0 && e < 2.0 + 1e-9));
        assert!(out.values.iter().all(|&v| v >= 0.0));
    }
}

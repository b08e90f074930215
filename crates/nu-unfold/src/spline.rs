//! Penalized smoothing splines on an integer grid.
//!
//! The spline uses a uniform B-spline basis with as many basis functions as data
//! points over `x = 0, 1, …, n-1`, and a second-order difference penalty on the
//! coefficients (P-spline). `smooth = 0` interpolates; larger values pull the
//! fit toward a straight line. The fit is linear in the data, `ŷ = S·y`, which
//! makes error propagation exact.

use nalgebra::{DMatrix, DVector};
use nu_core::{Error, Result};

/// Largest supported polynomial degree.
pub const MAX_DEGREE: usize = 5;

/// Smoothing spline settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SmoothingSpline {
    degree: usize,
    smooth: f64,
}

/// A fitted spline: knots, B-spline coefficients and the smoother matrix
/// that produced them.
#[derive(Debug, Clone)]
pub struct SplineFit {
    degree: usize,
    knots: Vec<f64>,
    coefficients: Vec<f64>,
    smoother: DMatrix<f64>,
}

impl SmoothingSpline {
    /// Create a spline of polynomial `degree` (1..=5) and penalty weight `smooth` (>= 0).
    pub fn new(degree: usize, smooth: f64) -> Result<Self> {
        if degree == 0 || degree > MAX_DEGREE {
            return Err(Error::Validation(format!(
                "spline degree must be in 1..={MAX_DEGREE}, got {degree}"
            )));
        }
        if !smooth.is_finite() || smooth < 0.0 {
            return Err(Error::Validation(format!("smoothing factor must be >= 0, got {smooth}")));
        }
        Ok(Self { degree, smooth })
    }

    /// Polynomial degree.
    pub fn degree(&self) -> usize {
        self.degree
    }

    /// Penalty weight.
    pub fn smooth(&self) -> f64 {
        self.smooth
    }

    /// Minimum number of points a fit needs.
    pub fn min_points(&self) -> usize {
        self.degree + 1
    }

    /// Fit `y` sampled at `x = 0..y.len()`.
    pub fn fit(&self, y: &[f64]) -> Result<SplineFit> {
        let n = y.len();
        let knots = self.knots(n)?;
        let b = self.design(&knots, n);
        let hat = self.coefficient_map(&b)?;
        let coefficients = &hat * DVector::from_column_slice(y);
        Ok(SplineFit {
            degree: self.degree,
            knots,
            coefficients: coefficients.as_slice().to_vec(),
            smoother: b * hat,
        })
    }

    /// Uniform knot vector on `[0, n-1]`, extended by `degree` knots per side.
    fn knots(&self, n: usize) -> Result<Vec<f64>> {
        let k = self.degree;
        if n < k + 1 {
            return Err(Error::Validation(format!(
                "spline of degree {k} needs at least {} points, got {n}",
                k + 1
            )));
        }
        let segments = n - k;
        let h = (n - 1) as f64 / segments as f64;
        Ok((0..segments + 2 * k + 1).map(|j| (j as f64 - k as f64) * h).collect())
    }

    fn design(&self, knots: &[f64], n: usize) -> DMatrix<f64> {
        let mut b = DMatrix::<f64>::zeros(n, n);
        for i in 0..n {
            let x = i as f64;
            let span = find_span(knots, self.degree, n, x);
            let vals = basis_funs(knots, self.degree, span, x);
            for (r, v) in vals.into_iter().enumerate() {
                b[(i, span - self.degree + r)] = v;
            }
        }
        b
    }

    /// `(BᵀB + λ·DᵀD)⁻¹ Bᵀ`, mapping data to coefficients.
    fn coefficient_map(&self, b: &DMatrix<f64>) -> Result<DMatrix<f64>> {
        let n = b.ncols();
        let bt = b.transpose();
        let mut a = &bt * b;
        let order = 2.min(n - 1);
        if order > 0 && self.smooth > 0.0 {
            let d = difference_matrix(n, order);
            a += (d.transpose() * &d) * self.smooth;
        }
        if let Some(chol) = a.clone().cholesky() {
            return Ok(chol.solve(&bt));
        }
        a.svd(true, true)
            .solve(&bt, 1e-12)
            .map_err(|e| Error::Computation(format!("spline system is singular: {e}")))
    }
}

impl SplineFit {
    /// Evaluate the spline at `x` (clamped to the fitted range).
    pub fn eval(&self, x: f64) -> f64 {
        let n = self.coefficients.len();
        if n == 0 {
            return f64::NAN;
        }
        let x = x.clamp(0.0, (n - 1) as f64);
        let span = find_span(&self.knots, self.degree, n, x);
        basis_funs(&self.knots, self.degree, span, x)
            .iter()
            .enumerate()
            .map(|(r, v)| v * self.coefficients[span - self.degree + r])
            .sum()
    }

    /// Number of fitted points.
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    /// `true` if nothing was fitted.
    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    /// Fitted values at `x = 0..n`.
    pub fn fitted(&self) -> Vec<f64> {
        (0..self.len()).map(|i| self.eval(i as f64)).collect()
    }

    /// Smoother matrix `S` (`n × n`) with `ŷ = S·y`.
    pub fn smoother(&self) -> &DMatrix<f64> {
        &self.smoother
    }

    /// Uncertainty of the fitted values for independent input errors,
    /// `sqrt(diag(S·diag(σ²)·Sᵀ))`.
    pub fn fitted_errors(&self, errors: &[f64]) -> Result<Vec<f64>> {
        let n = self.len();
        if errors.len() != n {
            return Err(Error::shape("spline input errors", n, errors.len()));
        }
        Ok((0..n)
            .map(|i| {
                (0..n)
                    .map(|j| (self.smoother[(i, j)] * errors[j]).powi(2))
                    .sum::<f64>()
                    .sqrt()
            })
            .collect())
    }
}

/// Knot span containing `x` for the uniform layout built by [`SmoothingSpline::knots`].
fn find_span(knots: &[f64], k: usize, n_basis: usize, x: f64) -> usize {
    // valid spans are k..n_basis (exclusive), covering [t_k, t_{n_basis}]
    let last = n_basis - 1;
    let mut span = k;
    while span < last && x >= knots[span + 1] {
        span += 1;
    }
    span
}

/// Non-zero basis functions `N_{span-k..=span}` at `x` (Cox-de Boor).
fn basis_funs(knots: &[f64], k: usize, span: usize, x: f64) -> Vec<f64> {
    let mut n = vec![0.0; k + 1];
    let mut left = vec![0.0; k + 1];
    let mut right = vec![0.0; k + 1];
    n[0] = 1.0;
    for j in 1..=k {
        left[j] = x - knots[span + 1 - j];
        right[j] = knots[span + j] - x;
        let mut saved = 0.0;
        for r in 0..j {
            let temp = n[r] / (right[r + 1] + left[j - r]);
            n[r] = saved + right[r + 1] * temp;
            saved = left[j - r] * temp;
        }
        n[j] = saved;
    }
    n
}

/// `(n - order) × n` finite-difference operator.
fn difference_matrix(n: usize, order: usize) -> DMatrix<f64> {
    let mut d = DMatrix::<f64>::identity(n, n);
    for _ in 0..order {
        let rows = d.nrows() - 1;
        d = DMatrix::from_fn(rows, n, |i, j| d[(i + 1, j)] - d[(i, j)]);
    }
    d
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_settings() {
        assert!(SmoothingSpline::new(0, 1.0).is_err());
        assert!(SmoothingSpline::new(6, 1.0).is_err());
        assert!(SmoothingSpline::new(3, -1.0).is_err());
        assert!(SmoothingSpline::new(3, 0.0).unwrap().fit(&[1.0, 2.0, 3.0]).is_err());
    }

    #[test]
    fn test_basis_partition_of_unity() {
        let s = SmoothingSpline::new(3, 0.0).unwrap();
        let knots = s.knots(9).unwrap();
        for i in 0..=16 {
            let x = i as f64 * 0.5;
            let span = find_span(&knots, 3, 9, x);
            let sum: f64 = basis_funs(&knots, 3, span, x).iter().sum();
            assert!((sum - 1.0).abs() < 1e-12, "x={} sum={}", x, sum);
        }
    }

    #[test]
    fn test_zero_smoothing_interpolates() {
        let y = [3.0, 7.0, 1.0, 8.0, 2.0, 9.0, 4.0];
        for degree in 1..=3 {
            let fit = SmoothingSpline::new(degree, 0.0).unwrap().fit(&y).unwrap();
            for (a, b) in fit.fitted().iter().zip(&y) {
                assert!((a - b).abs() < 1e-8, "degree {}: {} vs {}", degree, a, b);
            }
        }
    }

    #[test]
    fn test_linear_data_is_reproduced() {
        let y: Vec<f64> = (0..12).map(|i| 2.0 + 0.5 * i as f64).collect();
        let fit = SmoothingSpline::new(3, 100.0).unwrap().fit(&y).unwrap();
        for (a, b) in fit.fitted().iter().zip(&y) {
            assert!((a - b).abs() < 1e-8, "{} vs {}", a, b);
        }
        assert!((fit.eval(5.5) - 4.75).abs() < 1e-8);
    }

    #[test]
    fn test_smoothing_reduces_roughness() {
        let y: Vec<f64> = (0..20).map(|i| 10.0 + if i % 2 == 0 { 3.0 } else { -3.0 }).collect();
        let fit = SmoothingSpline::new(3, 50.0).unwrap().fit(&y).unwrap();
        let rough = |v: &[f64]| v.windows(2).map(|w| (w[1] - w[0]).abs()).sum::<f64>();
        assert!(rough(&fit.fitted()) < 0.2 * rough(&y));
        let mean: f64 = fit.fitted().iter().sum::<f64>() / 20.0;
        assert!((mean - 10.0).abs() < 0.5);
    }

    #[test]
    fn test_smoother_matrix_matches_fit() {
        let s = SmoothingSpline::new(2, 3.0).unwrap();
        let y = [1.0, 4.0, 2.0, 6.0, 3.0, 5.0];
        let fit = s.fit(&y).unwrap();
        let via_matrix = fit.smoother() * DVector::from_column_slice(&y);
        let fitted = fit.fitted();
        assert_eq!(fitted.len(), 6);
        for i in 0..6 {
            assert!((via_matrix[i] - fitted[i]).abs() < 1e-10);
        }
    }

    #[test]
    fn test_fitted_errors() {
        // interpolation passes errors through unchanged
        let y = [2.0, 5.0, 3.0, 8.0, 6.0];
        let sigma = [1.0, 2.0, 0.5, 1.5, 1.0];
        let fit = SmoothingSpline::new(2, 0.0).unwrap().fit(&y).unwrap();
        for (a, b) in fit.fitted_errors(&sigma).unwrap().iter().zip(&sigma) {
            assert!((a - b).abs() < 1e-8, "{} vs {}", a, b);
        }
        // heavy smoothing averages errors down
        let fit = SmoothingSpline::new(2, 1e3).unwrap().fit(&y).unwrap();
        assert!(fit.fitted_errors(&[1.0; 5]).unwrap().iter().all(|&e| e < 1.0));
        assert!(fit.fitted_errors(&[1.0; 4]).is_err());
    }

    #[test]
    fn test_difference_matrix_second_order() {
        let d = difference_matrix(4, 2);
        assert_eq!(d.nrows(), 2);
        assert_eq!(d.row(0).iter().copied().collect::<Vec<_>>(), vec![1.0, -2.0, 1.0, 0.0]);
    }
}

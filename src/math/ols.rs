//! Least squares for the directivity regression.
//!
//! Each trial directivity form is a straight line `y = m·x + q` in a
//! transformed azimuth variable, so the systems are tall and two columns
//! wide. We solve through SVD, which copes with the rank-deficient case
//! where every station sees the same `x` (e.g. a single azimuth).

use nalgebra::{DMatrix, DVector};

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    // Try progressively looser tolerances if strict solve fails.
    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// Straight-line fit result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LineFit {
    pub slope: f64,
    pub intercept: f64,
    /// Residual sum of squares.
    pub rss: f64,
}

impl LineFit {
    pub fn predict(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }

    pub fn rss_on(&self, xs: &[f64], ys: &[f64]) -> f64 {
        xs.iter()
            .zip(ys)
            .map(|(x, y)| (y - self.predict(*x)).powi(2))
            .sum()
    }
}

/// Fit `y = slope·x + intercept`.
pub fn fit_line(xs: &[f64], ys: &[f64]) -> Option<LineFit> {
    if xs.len() != ys.len() || xs.len() < 2 {
        return None;
    }
    let n = xs.len();
    let mut design = DMatrix::<f64>::zeros(n, 2);
    for (i, x) in xs.iter().enumerate() {
        design[(i, 0)] = *x;
        design[(i, 1)] = 1.0;
    }
    let y = DVector::from_column_slice(ys);
    let beta = solve_least_squares(&design, &y)?;
    let mut fit = LineFit {
        slope: beta[0],
        intercept: beta[1],
        rss: 0.0,
    };
    fit.rss = fit.rss_on(xs, ys);
    Some(fit)
}

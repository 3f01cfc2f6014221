//! Confidence intervals from bootstrap samples.

use serde::Serialize;

use crate::domain::{ConfidenceLevel, Distribution};
use crate::math::stats;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ConfidenceInterval {
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    pub fn point(value: f64) -> Self {
        Self {
            lower: value,
            upper: value,
        }
    }

    /// `None` for an empty sample.
    ///
    /// - normal: `mean ± k·std` with `k = 1, 2, 3`
    /// - empirical: order statistics at `round(tail·n) - 1` (floored at 0)
    ///   and `n - round(tail·n)` (capped at `n - 1`)
    pub fn from_samples(
        samples: &[f64],
        level: ConfidenceLevel,
        distribution: Distribution,
    ) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }
        match distribution {
            Distribution::Normal => {
                let mean = stats::mean(samples)?;
                let half = level.sigma_factor() * stats::std_dev(samples)?;
                Some(Self {
                    lower: mean - half,
                    upper: mean + half,
                })
            }
            Distribution::Empirical => {
                let mut sorted = samples.to_vec();
                stats::sort_ascending(&mut sorted);
                let n = sorted.len();
                let cut = (level.tail() * n as f64).round() as usize;
                let lo = cut.saturating_sub(1).min(n - 1);
                let hi = n.saturating_sub(cut).min(n - 1);
                Some(Self {
                    lower: sorted[lo],
                    upper: sorted[hi],
                })
            }
        }
    }

    pub fn width(&self) -> f64 {
        self.upper - self.lower
    }

    /// Raise the lower bound to a physical minimum.
    pub fn floor_lower(self, min: f64) -> Self {
        Self {
            lower: self.lower.max(min),
            ..self
        }
    }

    /// Raise the upper bound to at least `min`.
    pub fn floor_upper(self, min: f64) -> Self {
        Self {
            upper: self.upper.max(min),
            ..self
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empirical_95_uses_order_statistics() {
        let samples: Vec<f64> = (1..=200).map(f64::from).collect();
        let ci = ConfidenceInterval::from_samples(&samples, ConfidenceLevel::P95, Distribution::Empirical)
            .unwrap();
        // round(0.025 * 200) = 5 → indices 4 and 195
        assert_eq!(ci.lower, 5.0);
        assert_eq!(ci.upper, 196.0);
    }

    #[test]
    fn empirical_small_sample_clamps_indices() {
        let ci = ConfidenceInterval::from_samples(&[3.0, 1.0], ConfidenceLevel::P99, Distribution::Empirical)
            .unwrap();
        assert_eq!(ci.lower, 1.0);
        assert_eq!(ci.upper, 3.0);
    }

    #[test]
    fn normal_uses_k_sigma() {
        let samples = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        let ci = ConfidenceInterval::from_samples(&samples, ConfidenceLevel::P68, Distribution::Normal)
            .unwrap();
        assert!((ci.lower - 3.0).abs() < 1e-12);
        assert!((ci.upper - 7.0).abs() < 1e-12);
        let ci99 = ConfidenceInterval::from_samples(&samples, ConfidenceLevel::P99, Distribution::Normal)
            .unwrap();
        assert!((ci99.width() - 12.0).abs() < 1e-12);
    }

    #[test]
    fn constant_sample_degenerates_to_a_point() {
        let samples = vec![7000.0; 100];
        for dist in [Distribution::Normal, Distribution::Empirical] {
            let ci = ConfidenceInterval::from_samples(&samples, ConfidenceLevel::P95, dist).unwrap();
            assert_eq!(ci, ConfidenceInterval::point(7000.0));
        }
        assert!(ConfidenceInterval::from_samples(&[], ConfidenceLevel::P95, Distribution::Normal).is_none());
    }

    #[test]
    fn floors_apply_to_each_bound() {
        let ci = ConfidenceInterval {
            lower: -200.0,
            upper: 0.5,
        }
        .floor_lower(0.0)
        .floor_upper(1.0);
        assert_eq!(ci, ConfidenceInterval { lower: 0.0, upper: 1.0 });
    }
}

//! Trace resampling.
//!
//! Each draw picks `n_traces` trace indices with replacement. A candidate's
//! misfit under a draw is the L2 ratio over the picked traces:
//!
//! ```text
//! sqrt( Σ misfit_i² / Σ normcoef_i² )
//! ```
//!
//! and the draw is won by the candidate with the smallest value (first one
//! on ties). All index vectors are drawn up front from the injected RNG, so
//! evaluating the draws in parallel does not change the result.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution as _, Uniform};
use rayon::prelude::*;

use crate::domain::MISFIT_SENTINEL;
use crate::error::{AppError, Result};
use crate::math::stats;
use crate::solver::output::parse_floats;

/// Per-trace `(misfit, normcoef)` pairs from one `get_misfits` line.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceMisfits {
    pub misfits: Vec<f64>,
    pub normcoefs: Vec<f64>,
}

impl TraceMisfits {
    pub fn parse(line: &str) -> Result<Self> {
        let values = parse_floats(line)?;
        if values.len() % 2 != 0 {
            return Err(AppError::malformed(line, "odd number of misfit/normcoef values"));
        }
        let (misfits, normcoefs): (Vec<f64>, Vec<f64>) = values.chunks(2).map(|p| (p[0], p[1])).unzip();
        Ok(Self { misfits, normcoefs })
    }

    pub fn len(&self) -> usize {
        self.misfits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.misfits.is_empty()
    }

    /// Misfit over the selected traces; the sentinel when the normalization vanishes.
    pub fn resampled(&self, indices: &[usize]) -> f64 {
        let (mut m, mut n) = (0.0, 0.0);
        for &i in indices {
            m += self.misfits[i] * self.misfits[i];
            n += self.normcoefs[i] * self.normcoefs[i];
        }
        if n > 0.0 { (m / n).sqrt() } else { MISFIT_SENTINEL }
    }

    /// Per-trace ratio `misfit / normcoef` (0 where the normalization is 0).
    pub fn ratios(&self) -> Vec<f64> {
        self.misfits
            .iter()
            .zip(&self.normcoefs)
            .map(|(m, n)| if *n > 0.0 { m / n } else { 0.0 })
            .collect()
    }
}

/// Runs the resampling draws with an injected RNG.
pub struct BootstrapEstimator {
    draws: usize,
    rng: StdRng,
}

impl BootstrapEstimator {
    pub fn new(draws: usize, rng: StdRng) -> Self {
        Self { draws, rng }
    }

    pub fn seeded(draws: usize, seed: u64) -> Self {
        Self::new(draws, StdRng::seed_from_u64(seed))
    }

    pub fn draws(&self) -> usize {
        self.draws
    }

    /// Index of the winning candidate for every draw.
    pub fn winners(&mut self, candidates: &[TraceMisfits]) -> Result<Vec<usize>> {
        let all: Vec<usize> = (0..candidates.len()).collect();
        let mut groups = self.winners_in_groups(candidates, &[all])?;
        Ok(groups.pop().unwrap_or_default())
    }

    /// Winners restricted to each group of candidate indices, sharing the
    /// same draws across groups. An empty group has no winners.
    pub fn winners_in_groups(
        &mut self,
        candidates: &[TraceMisfits],
        groups: &[Vec<usize>],
    ) -> Result<Vec<Vec<usize>>> {
        let Some(first) = candidates.first() else {
            return Err(AppError::Bootstrap("no candidates to resample".into()));
        };
        let n_traces = first.len();
        if n_traces == 0 {
            return Err(AppError::Bootstrap("candidates carry no per-trace misfits".into()));
        }
        if let Some(bad) = candidates.iter().position(|c| c.len() != n_traces) {
            return Err(AppError::Bootstrap(format!(
                "candidate {bad} has {} traces, expected {n_traces}",
                candidates[bad].len()
            )));
        }
        if let Some(i) = groups.iter().flatten().find(|i| **i >= candidates.len()) {
            return Err(AppError::Bootstrap(format!("candidate index {i} out of range")));
        }

        let pick = Uniform::new(0, n_traces);
        let draws: Vec<Vec<usize>> = (0..self.draws)
            .map(|_| (0..n_traces).map(|_| pick.sample(&mut self.rng)).collect())
            .collect();

        let per_draw: Vec<Vec<Option<usize>>> = draws
            .par_iter()
            .map(|indices| {
                let scores: Vec<f64> = candidates.iter().map(|c| c.resampled(indices)).collect();
                groups
                    .iter()
                    .map(|g| {
                        let local: Vec<f64> = g.iter().map(|i| scores[*i]).collect();
                        stats::argmin(&local).map(|k| g[k])
                    })
                    .collect()
            })
            .collect();

        Ok((0..groups.len())
            .map(|gi| per_draw.iter().filter_map(|w| w[gi]).collect())
            .collect())
    }
}

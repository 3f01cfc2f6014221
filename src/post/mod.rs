//! Post-processing of stage results.
//!
//! - alternative planes handed to the next stage (`planes`)
//! - apparent durations and directivity after stage 1 (`duration`)
//! - rupture area and average slip after stage 3 (`rupture`)

pub mod duration;
pub mod planes;
pub mod rupture;

pub use duration::*;
pub use planes::*;
pub use rupture::*;

use tracing::{info, warn};

use crate::domain::{InversionConfig, SolutionRecord};
use crate::error::Result;
use crate::math::moment_magnitude;
use crate::solver::{MinimizerBridge, StageSession};

/// Crust–mantle boundary assumed when the solver was never asked for it.
pub const DEFAULT_MOHO_M: f64 = 30000.0;

pub struct SolutionPostProcessor<'a> {
    config: &'a InversionConfig,
    bridge: &'a MinimizerBridge<'a>,
}

impl<'a> SolutionPostProcessor<'a> {
    pub fn new(config: &'a InversionConfig, bridge: &'a MinimizerBridge<'a>) -> Self {
        Self { config, bridge }
    }

    /// Moment magnitude of a solver moment.
    pub fn magnitude(&self, moment: f64) -> f64 {
        moment_magnitude(self.config.scaling_factor * moment)
    }

    pub fn alternatives(&self, best: &SolutionRecord) -> Vec<SolutionRecord> {
        auxiliary_candidates(best)
    }

    /// Rise-time line search and directivity regression around `planes[0]`.
    ///
    /// `planes` are the best solution and its auxiliary plane. Returns `None`
    /// when the analysis is disabled.
    pub fn durations(
        &self,
        session: &StageSession<'_>,
        planes: &[SolutionRecord],
    ) -> Result<Option<DurationAnalysis>> {
        if !self.config.duration.enabled {
            return Ok(None);
        }
        let Some(best) = planes.first() else {
            return Ok(None);
        };
        let stations = &self.config.duration.station_receivers;
        let trials = trial_rise_times(self.magnitude(best.base.moment));
        let script = duration_script(session, best, &trials, stations);
        let slots = self.bridge.run_single("minimizer1-duration", script)?;
        let bests = best_trials(&slots, &trials, 1 + stations.len())?;
        let rise_time = bests.first().copied().unwrap_or(best.base.rise_time);
        info!(rise_time, stations = stations.len(), "apparent duration");

        let per_station: Vec<ApparentDuration> = stations
            .iter()
            .zip(bests.iter().skip(1))
            .map(|(s, d)| ApparentDuration {
                station: s.station.clone(),
                azimuth: s.azimuth,
                duration: *d,
            })
            .collect();

        let directivity = match (best.mechanism(), planes.get(1).and_then(|p| p.mechanism())) {
            (Some(p1), Some(p2)) => {
                let azimuths: Vec<f64> = per_station.iter().map(|s| s.azimuth).collect();
                let durations: Vec<f64> = per_station.iter().map(|s| s.duration).collect();
                Directivity::regress(&azimuths, &durations, [p1, p2], &self.config.bootstrap)
            }
            _ => None,
        };
        if directivity.is_none() && !per_station.is_empty() {
            warn!(stations = per_station.len(), "directivity regression needs at least three stations");
        }
        Ok(Some(DurationAnalysis {
            rise_time,
            stations: per_station,
            directivity,
        }))
    }

    /// Area and average slip of a kinematic solution.
    pub fn rupture(&self, best: &SolutionRecord, moho_m: Option<f64>) -> Option<RuptureSummary> {
        let r = best.rupture()?;
        let crust = self.config.kinematic.crust;
        let area = rupture_area(
            best.base.depth,
            r.radius,
            r.mechanism.dip,
            moho_m.unwrap_or(DEFAULT_MOHO_M),
        );
        let mu = crust.shear_modulus();
        Some(RuptureSummary {
            area_km2: area * 1e-6,
            average_slip_m: average_slip(self.config.scaling_factor * best.base.moment, area, mu),
            shear_modulus: mu,
        })
    }
}

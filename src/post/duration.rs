//! Apparent duration and rupture directivity.
//!
//! The best stage-1 mechanism is re-evaluated with 40 trial rise times, once
//! over all stations and once per station subset. The trial with the lowest
//! misfit is the (apparent) duration. Apparent durations are then regressed
//! against station azimuth with ten trial forms:
//!
//! ```text
//! y = m·(-cos(az - strike_k - offset)) + q    offset ∈ {0, 45, 90, 135}
//! y = m·|cos(az - strike_k)| + q
//! ```
//!
//! for both nodal planes `k`. Offsets other than 0 describe up/down-dip
//! propagation and are only tried on planes dipping less than 30°. The
//! best form (lowest residual sum of squares) is compared with the constant
//! model through `F = (RSS_0 - RSS) / (RSS / (n - 2))`.

use serde::Serialize;

use crate::bootstrap::ConfidenceInterval;
use crate::domain::{BootstrapConfig, MISFIT_SENTINEL, SolutionRecord, StationReceivers};
use crate::error::{AppError, Result};
use crate::math::{Mechanism, fit_line, stats};
use crate::solver::output::parse_floats;
use crate::solver::protocol::source_values;
use crate::solver::{Command, Script, Slot, StageSession};

/// Number of trial rise times of the line search.
pub const DURATION_TRIALS: usize = 40;

/// Planes dipping less than this allow dip-direction forms.
const SHALLOW_DIP: f64 = 30.0;

/// `c·(i + 1)` for `i < 40`, with the step `c` chosen by magnitude.
pub fn trial_rise_times(mw: f64) -> Vec<f64> {
    let c = if mw < 3.0 {
        0.01
    } else if mw > 8.0 {
        1.0
    } else {
        0.5
    };
    (0..DURATION_TRIALS).map(|i| c * (i + 1) as f64).collect()
}

/// Line-search script: the global block first, then one block per station subset.
///
/// Every trial is a `set_source_params` + `get_global_misfit` pair, so the
/// solver answers with `trials × (1 + stations)` data lines. The search runs
/// with the kinematic band-pass.
pub fn duration_script(
    session: &StageSession<'_>,
    best: &SolutionRecord,
    trials: &[f64],
    stations: &[StationReceivers],
) -> Script {
    let config = session.config;
    let filter = config.kinematic.solver.filter;
    let mut script = Script::default();
    script.extend(session.header().into_iter().map(|c| match c {
        Command::SetMisfitFilter(_) => Command::SetMisfitFilter(filter),
        other => other,
    }));
    script.extend(session.tapers_at(best.base.depth));

    let block = |script: &mut Script| {
        for &rise in trials {
            let mut trial = *best;
            trial.base.rise_time = rise;
            script.push(Command::SetSourceParams {
                kind: trial.kind(),
                values: source_values(&trial, config.source.point_rupture_velocity),
            });
            script.push(Command::GetGlobalMisfit);
        }
    };
    block(&mut script);
    for station in stations {
        script.push(Command::SetReceivers(station.receivers.clone()));
        script.push(Command::SetRefSeismograms {
            path: config.data.ref_seismograms.clone(),
            format: config.data.format.clone(),
        });
        block(&mut script);
    }
    script
}

/// Best trial of each block. Tolerated failures rank last.
pub fn best_trials(slots: &[Slot], trials: &[f64], blocks: usize) -> Result<Vec<f64>> {
    let expected = trials.len() * blocks;
    if slots.len() != expected {
        return Err(AppError::ProtocolDesync {
            mode: "duration",
            expected,
            found: slots.len(),
        });
    }
    if trials.is_empty() {
        return Ok(Vec::new());
    }
    slots
        .chunks(trials.len())
        .map(|block| {
            let misfits = block
                .iter()
                .map(|slot| match slot {
                    Slot::Data(line) => parse_floats(line)?
                        .first()
                        .copied()
                        .ok_or_else(|| AppError::malformed(line, "empty misfit line")),
                    Slot::Soft(_) => Ok(MISFIT_SENTINEL),
                })
                .collect::<Result<Vec<f64>>>()?;
            Ok(stats::argmin(&misfits).map_or(trials[0], |i| trials[i]))
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DirectivityShape {
    /// `-cos(az - strike - offset)`: unilateral rupture towards `strike + offset`.
    Cosine { offset: f64 },
    /// `|cos(az - strike)|`: bilateral rupture along strike.
    AbsCosine,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DirectivityForm {
    /// 0 = best plane, 1 = auxiliary plane.
    pub plane: usize,
    pub shape: DirectivityShape,
}

impl DirectivityForm {
    pub const ALL: [DirectivityForm; 10] = [
        Self::cos(0, 0.0),
        Self::cos(1, 0.0),
        Self::cos(0, 90.0),
        Self::cos(1, 90.0),
        Self::abs(0),
        Self::abs(1),
        Self::cos(0, 45.0),
        Self::cos(1, 45.0),
        Self::cos(0, 135.0),
        Self::cos(1, 135.0),
    ];

    const fn cos(plane: usize, offset: f64) -> Self {
        Self {
            plane,
            shape: DirectivityShape::Cosine { offset },
        }
    }

    const fn abs(plane: usize) -> Self {
        Self {
            plane,
            shape: DirectivityShape::AbsCosine,
        }
    }

    pub fn regressor(&self, azimuth: f64, strikes: [f64; 2]) -> f64 {
        let strike = strikes[self.plane];
        match self.shape {
            DirectivityShape::Cosine { offset } => -(azimuth - (strike + offset)).to_radians().cos(),
            DirectivityShape::AbsCosine => (azimuth - strike).to_radians().cos().abs(),
        }
    }

    pub fn eligible(&self, dips: [f64; 2]) -> bool {
        match self.shape {
            DirectivityShape::Cosine { offset } if offset != 0.0 => dips[self.plane] < SHALLOW_DIP,
            _ => true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FormFit {
    pub form: DirectivityForm,
    pub slope: f64,
    pub intercept: f64,
    pub rss: f64,
    pub eligible: bool,
}

/// Outcome of the azimuthal regression of apparent durations.
#[derive(Debug, Clone, Serialize)]
pub struct Directivity {
    pub mean: f64,
    pub std_dev: f64,
    pub interval: ConfidenceInterval,
    pub fits: Vec<FormFit>,
    /// Residual sum of squares of the constant (non-directive) model.
    pub constant_rss: f64,
    /// Index into `fits`.
    pub chosen: usize,
    pub f_statistic: f64,
    #[serde(skip)]
    strikes: [f64; 2],
}

impl Directivity {
    /// `None` with fewer than three stations (no degrees of freedom left).
    pub fn regress(
        azimuths: &[f64],
        durations: &[f64],
        planes: [Mechanism; 2],
        ci: &BootstrapConfig,
    ) -> Option<Self> {
        let n = durations.len();
        if n < 3 || azimuths.len() != n {
            return None;
        }
        let strikes = planes.map(|p| p.strike);
        let dips = planes.map(|p| p.dip);
        let mean = stats::mean(durations)?;
        let std_dev = stats::std_dev(durations)?;
        let interval = ConfidenceInterval::from_samples(durations, ci.confidence, ci.distribution)?
            .floor_lower(0.5);
        let constant_rss: f64 = durations.iter().map(|d| (d - mean).powi(2)).sum();

        let mut fits = Vec::with_capacity(DirectivityForm::ALL.len());
        for form in DirectivityForm::ALL {
            let xs: Vec<f64> = azimuths.iter().map(|az| form.regressor(*az, strikes)).collect();
            let Some(mut line) = fit_line(&xs, durations) else {
                continue;
            };
            if form.shape == DirectivityShape::AbsCosine && line.slope < 0.0 {
                // report bilateral forms with a non-negative amplitude
                line.slope = -line.slope;
                line.intercept -= line.slope;
                line.rss = line.rss_on(&xs, durations);
            }
            fits.push(FormFit {
                form,
                slope: line.slope,
                intercept: line.intercept,
                rss: line.rss,
                eligible: form.eligible(dips),
            });
        }

        let chosen = fits
            .iter()
            .enumerate()
            .filter(|(_, f)| f.eligible)
            .fold(None::<(usize, f64)>, |best, (i, f)| match best {
                Some((_, rss)) if f.rss >= rss => best,
                _ => Some((i, f.rss)),
            })?
            .0;
        let rss = fits[chosen].rss;
        let f_statistic = (constant_rss - rss) / (rss / (n - 2) as f64);
        Some(Self {
            mean,
            std_dev,
            interval,
            fits,
            constant_rss,
            chosen,
            f_statistic,
            strikes,
        })
    }

    pub fn chosen(&self) -> &FormFit {
        &self.fits[self.chosen]
    }

    /// Chosen form sampled every degree of azimuth from -180 to 180.
    pub fn curve(&self) -> Vec<(f64, f64)> {
        let fit = self.chosen();
        (-180..=180)
            .map(|az| {
                let az = f64::from(az);
                (az, fit.slope * fit.form.regressor(az, self.strikes) + fit.intercept)
            })
            .collect()
    }

    /// Text of `directivity.dat`.
    pub fn render(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!("AVERAGE {}\n", self.mean));
        out.push_str(&format!("ST.DEV. {}\n", self.std_dev));
        out.push_str(&format!("CONFINT {} {}\n", self.interval.lower, self.interval.upper));
        for (k, f) in self.fits.iter().enumerate() {
            out.push_str(&format!("{:<7} {} {}\n", format!("MINMAX{}", k + 1), f.slope, f.intercept));
        }
        for (k, f) in self.fits.iter().enumerate() {
            out.push_str(&format!("{:<7} {}\n", format!("MISF{}", k + 1), f.rss));
        }
        out.push_str(&format!("MISFA   {}\n", self.constant_rss));
        out.push_str(&format!("F-TEST  {}\n", self.f_statistic));
        out.push_str(&format!("CHOSEN  {}\n", self.chosen + 1));
        out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApparentDuration {
    pub station: String,
    pub azimuth: f64,
    pub duration: f64,
}

/// Result of the rise-time line search.
#[derive(Debug, Clone, Serialize)]
pub struct DurationAnalysis {
    /// Best rise time over all stations.
    pub rise_time: f64,
    pub stations: Vec<ApparentDuration>,
    pub directivity: Option<Directivity>,
}

impl DurationAnalysis {
    /// Text of `apparent-durations.dat`: `station azimuth duration` per line.
    pub fn render_stations(&self) -> String {
        self.stations
            .iter()
            .map(|s| format!("{} {} {}\n", s.station, s.azimuth, s.duration))
            .collect()
    }
}

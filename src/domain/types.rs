//! Shared domain types.
//!
//! These types are kept small and serializable so they can be:
//!
//! - passed between the stages of one run
//! - written to the per-stage artifact files
//! - reloaded from the trace table prepared outside the optimizer

use std::fmt;

use serde::{Deserialize, Serialize};

/// Misfit of a candidate that has not been evaluated, or that the solver rejected.
pub const MISFIT_SENTINEL: f64 = 99999.0;

/// Added to the misfit of a candidate whose depth falls outside the configured limits.
pub const DEPTH_PENALTY: f64 = 99999.0;

/// The three sequential inversion stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Point-source double-couple mechanism, depth and moment.
    PointSource,
    /// Centroid relocation in time, north, east and depth.
    Relocation,
    /// Finite (eikonal) rupture.
    Kinematic,
}

impl Stage {
    pub const ALL: [Stage; 3] = [Stage::PointSource, Stage::Relocation, Stage::Kinematic];

    pub fn number(self) -> u8 {
        match self {
            Stage::PointSource => 1,
            Stage::Relocation => 2,
            Stage::Kinematic => 3,
        }
    }

    pub fn from_number(n: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.number() == n)
    }

    pub fn label(self) -> &'static str {
        match self {
            Stage::PointSource => "point source",
            Stage::Relocation => "relocation",
            Stage::Kinematic => "kinematic rupture",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.number())
    }
}

/// Per-trace data-quality verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum QualityTag {
    #[default]
    #[serde(rename = "ok")]
    Ok,
    /// Amplitude far below the population median.
    #[serde(rename = "nok-small")]
    NokSmall,
    /// Amplitude far above the population median.
    #[serde(rename = "nok-large")]
    NokLarge,
    /// Noise window carries too much energy relative to the signal.
    #[serde(rename = "nok-noise")]
    NokNoise,
}

impl QualityTag {
    pub fn is_ok(self) -> bool {
        self == QualityTag::Ok
    }

    pub fn as_str(self) -> &'static str {
        match self {
            QualityTag::Ok => "ok",
            QualityTag::NokSmall => "nok-small",
            QualityTag::NokLarge => "nok-large",
            QualityTag::NokNoise => "nok-noise",
        }
    }
}

/// One waveform trace (station component) known to the solver.
///
/// `index` is the 1-based receiver number used in `set_misfit_taper`; it never
/// changes during a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceMetadata {
    pub index: usize,
    pub station: String,
    pub latitude: f64,
    pub longitude: f64,
    /// Epicentral distance in km.
    pub distance_km: f64,
    /// Source-to-station azimuth in degrees.
    pub azimuth: f64,
    pub components: String,
    #[serde(default)]
    pub quality: QualityTag,
}

/// A four-corner trapezoidal misfit window: `(time, amplitude)` per corner.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TaperWindow {
    pub times: [f64; 4],
    pub amplitudes: [f64; 4],
}

impl TaperWindow {
    /// Same window shape with every amplitude scaled.
    pub fn weighted(self, weight: f64) -> Self {
        Self {
            times: self.times,
            amplitudes: self.amplitudes.map(|a| a * weight),
        }
    }

    /// Window of equal shape ending at the onset of this one.
    pub fn noise_before(self, origin_time: f64) -> Self {
        let end = self.times[3];
        Self {
            times: [
                origin_time - (end - self.times[0]),
                origin_time - (end - self.times[1]),
                origin_time - (end - self.times[2]),
                origin_time,
            ],
            amplitudes: self.amplitudes,
        }
    }

    /// Window of equal shape starting where this one ends.
    pub fn noise_after(self) -> Self {
        let end = self.times[3];
        let t0 = self.times[0];
        Self {
            times: [
                end,
                end + (self.times[1] - t0),
                end + (self.times[2] - t0),
                end + (end - t0),
            ],
            amplitudes: self.amplitudes,
        }
    }
}

/// How a search axis is stepped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AxisScale {
    /// `min, min + step, ...`
    #[default]
    Linear,
    /// `min, min * step, ...` (scalar moment).
    Geometric,
}

/// One `(min, max, step)` axis of a search grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
    pub step: f64,
    #[serde(default)]
    pub scale: AxisScale,
}

impl ParamRange {
    pub fn linear(min: f64, max: f64, step: f64) -> Self {
        Self {
            min,
            max,
            step,
            scale: AxisScale::Linear,
        }
    }

    pub fn geometric(min: f64, max: f64, factor: f64) -> Self {
        Self {
            min,
            max,
            step: factor,
            scale: AxisScale::Geometric,
        }
    }

    pub fn fixed(value: f64) -> Self {
        Self::linear(value, value, 1.0)
    }

    pub fn is_fixed(&self) -> bool {
        self.min == self.max
    }

    /// Axis values in ascending order, endpoints included.
    ///
    /// A collapsed axis (`min == max`) always yields exactly one value whatever
    /// its step.
    pub fn values(&self) -> Vec<f64> {
        if self.is_fixed() {
            return vec![self.min];
        }
        match self.scale {
            AxisScale::Linear => {
                let step = if self.step > 0.0 { self.step } else { 1.0 };
                let count = ((self.max - self.min) / step + 1e-9).floor() as usize + 1;
                (0..count).map(|i| self.min + step * i as f64).collect()
            }
            AxisScale::Geometric => {
                if self.step <= 1.0 || self.min <= 0.0 {
                    return vec![self.min];
                }
                let mut out = Vec::new();
                let mut v = self.min;
                while v <= self.max * (1.0 + 1e-9) {
                    out.push(v);
                    v *= self.step;
                }
                out
            }
        }
    }

    /// Shift both ends by `offset` (relative axes anchored on a value).
    pub fn shifted(self, offset: f64) -> Self {
        Self {
            min: self.min + offset,
            max: self.max + offset,
            ..self
        }
    }

    pub fn validate(&self, name: &str) -> Result<(), String> {
        if !(self.min.is_finite() && self.max.is_finite() && self.step.is_finite()) {
            return Err(format!("{name}: range values must be finite"));
        }
        if self.min > self.max {
            return Err(format!("{name}: min {} exceeds max {}", self.min, self.max));
        }
        if self.is_fixed() {
            return Ok(());
        }
        match self.scale {
            AxisScale::Linear if self.step <= 0.0 => {
                Err(format!("{name}: step must be > 0 when min < max"))
            }
            AxisScale::Geometric if self.step <= 1.0 || self.min <= 0.0 => Err(format!(
                "{name}: geometric axes need min > 0 and a factor > 1"
            )),
            _ => Ok(()),
        }
    }
}

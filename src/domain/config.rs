//! Run configuration.
//!
//! One JSON document describes a whole inversion. It is deserialized into
//! [`InversionConfig`] and validated once, before any solver process is
//! started. Unknown modes, confidence levels and distribution kinds are
//! rejected by serde; range and ordering rules by [`InversionConfig::validate`].
//!
//! Units follow the solver: metres for location offsets, seconds for time,
//! solver moment units for moment (see `scaling_factor`), km where the field
//! name says so.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::mode::{KinematicMode, MomentTensorMode, PointSourceMode, RelocationMode};
use super::types::{ParamRange, Stage};
use crate::error::AppError;

/// Environment override for the solver executable.
pub const ENV_MINIMIZER: &str = "RAPIDINV_MINIMIZER";
/// Environment override for the inversion working directory.
pub const ENV_WORKDIR: &str = "RAPIDINV_WORKDIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct InversionConfig {
    /// Working directory owned by this run (solver scripts, outputs, artifacts).
    pub inversion_dir: PathBuf,
    /// Solver executable; reads a command script on stdin.
    pub minimizer: PathBuf,
    #[serde(default = "default_num_stages")]
    pub num_stages: u8,
    #[serde(default = "default_one")]
    pub num_processors: usize,
    /// Solver moment units to N·m.
    #[serde(default = "default_scaling_factor")]
    pub scaling_factor: f64,
    pub source: SourceConfig,
    pub data: DataConfig,
    pub depth_limits: DepthLimits,
    pub point_source: PointSourceConfig,
    pub relocation: RelocationConfig,
    pub kinematic: KinematicConfig,
    #[serde(default)]
    pub moment_tensor: Option<MomentTensorConfig>,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub duration: DurationConfig,
    #[serde(default)]
    pub quality: QualityConfig,
}

/// Epicentre and origin of the event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SourceConfig {
    pub latitude: f64,
    pub longitude: f64,
    #[serde(default)]
    pub origin_time: f64,
    #[serde(default)]
    pub origin_north: f64,
    #[serde(default)]
    pub origin_east: f64,
    /// Rupture-velocity slot of the point (bilateral) source.
    #[serde(default = "default_point_velocity")]
    pub point_rupture_velocity: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    /// Reference seismograms as understood by `set_ref_seismograms`.
    pub ref_seismograms: PathBuf,
    #[serde(default = "default_data_format")]
    pub format: String,
    /// Trace table (CSV) prepared upstream.
    pub traces: PathBuf,
    /// Per-trace taper windows (CSV); without it no tapers are sent.
    #[serde(default)]
    pub tapers: Option<PathBuf>,
    #[serde(default = "default_interpolation")]
    pub interpolation: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DepthLimits {
    pub upper_km: f64,
    pub lower_km: f64,
}

impl DepthLimits {
    /// Depth in metres inside `[upper_km, lower_km]`.
    pub fn contains_m(&self, depth_m: f64) -> bool {
        let km = depth_m / 1000.0;
        km >= self.upper_km && km <= self.lower_km
    }
}

/// Solver session settings shared by every stage.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SolverSetup {
    /// Green's function database prefix.
    pub database: PathBuf,
    pub effective_dt: f64,
    pub receivers: PathBuf,
    #[serde(default = "default_misfit_method")]
    pub misfit_method: String,
    /// Band-pass corners `f1 f2 f3 f4` in Hz.
    pub filter: [f64; 4],
    /// Traces farther than this are left untapered for the stage.
    #[serde(default)]
    pub max_distance_km: Option<f64>,
    /// Window for `autoshift_ref_seismogram`.
    #[serde(default = "default_cc_shift")]
    pub cc_shift: [f64; 2],
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PointSourceConfig {
    pub solver: SolverSetup,
    #[serde(default)]
    pub mode: PointSourceMode,
    #[serde(default = "default_one_u32")]
    pub loops: u32,
    #[serde(default = "default_reduction")]
    pub reduction: f64,
    /// Ten canonical mechanisms instead of the strike/dip/rake walk.
    #[serde(default)]
    pub rapid: bool,
    pub depth_km: ParamRange,
    /// Geometric axis: `step` is a multiplicative factor.
    pub moment: ParamRange,
    pub rise_time: ParamRange,
    pub strike: ParamRange,
    pub dip: ParamRange,
    pub rake: ParamRange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelocationConfig {
    pub solver: SolverSetup,
    #[serde(default)]
    pub mode: RelocationMode,
    #[serde(default = "default_one_u32")]
    pub loops: u32,
    #[serde(default = "default_reduction")]
    pub reduction: f64,
    /// Seconds relative to the origin time.
    pub rel_time: ParamRange,
    /// Metres relative to the origin north shift.
    pub rel_north_m: ParamRange,
    pub rel_east_m: ParamRange,
    /// Metres relative to the stage-1 depth.
    pub rel_depth_m: ParamRange,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct KinematicConfig {
    pub solver: SolverSetup,
    #[serde(default)]
    pub mode: KinematicMode,
    #[serde(default = "default_one_u32")]
    pub loops: u32,
    #[serde(default = "default_reduction")]
    pub reduction: f64,
    pub rel_rupture_velocity: ParamRange,
    /// Refinement steps (metres).
    pub radius_step_m: f64,
    pub nucleation_x_step_m: f64,
    pub nucleation_y_step_m: f64,
    /// Also scan 0.5–1.5 × M0.
    #[serde(default)]
    pub scan_moment: bool,
    /// Derive the rise time from the point-source solution.
    #[serde(default = "default_true")]
    pub auto_rise_time: bool,
    /// Rise time used when `auto_rise_time` is off.
    #[serde(default = "default_kinematic_rise_time")]
    pub rise_time: f64,
    /// Clamp the rise time into the band-pass resolution `[1/(3·f3), 2/f3]`.
    #[serde(default)]
    pub bandpass_rise_time: bool,
    /// Use the relocated centroid rather than the origin.
    #[serde(default = "default_true")]
    pub relocate: bool,
    /// Minimum bottom of the depth constraint (km).
    #[serde(default = "default_min_bottom_km")]
    pub min_bottom_km: f64,
    /// Drop traces fitting worse than mean + std before this stage.
    #[serde(default)]
    pub good_stations_only: bool,
    #[serde(default)]
    pub crust: CrustConfig,
}

/// Elastic parameters for the average-slip estimate.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CrustConfig {
    pub vs_m_s: f64,
    pub density_kg_m3: f64,
}

impl Default for CrustConfig {
    fn default() -> Self {
        Self {
            vs_m_s: 3500.0,
            density_kg_m3: 2800.0,
        }
    }
}

impl CrustConfig {
    pub fn shear_modulus(&self) -> f64 {
        self.density_kg_m3 * self.vs_m_s * self.vs_m_s
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MomentTensorConfig {
    #[serde(default)]
    pub mode: MomentTensorMode,
}

/// Confidence level of reported intervals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ConfidenceLevel {
    #[serde(rename = "68")]
    P68,
    #[default]
    #[serde(rename = "95")]
    P95,
    #[serde(rename = "99")]
    P99,
}

impl ConfidenceLevel {
    /// Multiplier of the standard deviation under a normal assumption.
    pub fn sigma_factor(self) -> f64 {
        match self {
            Self::P68 => 1.0,
            Self::P95 => 2.0,
            Self::P99 => 3.0,
        }
    }

    /// Probability mass left out on each side.
    pub fn tail(self) -> f64 {
        match self {
            Self::P68 => 0.16,
            Self::P95 => 0.025,
            Self::P99 => 0.005,
        }
    }

    pub fn percent(self) -> u8 {
        match self {
            Self::P68 => 68,
            Self::P95 => 95,
            Self::P99 => 99,
        }
    }
}

/// How confidence intervals are derived from bootstrap winners.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Distribution {
    /// mean ± k·std
    Normal,
    /// Order statistics of the empirical distribution.
    #[default]
    #[serde(alias = "unknown")]
    Empirical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BootstrapConfig {
    #[serde(default = "default_draws")]
    pub draws: usize,
    #[serde(default)]
    pub confidence: ConfidenceLevel,
    #[serde(default)]
    pub distribution: Distribution,
    /// Seed of the resampling RNG; the CLI `--seed` wins over this.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            draws: default_draws(),
            confidence: ConfidenceLevel::default(),
            distribution: Distribution::default(),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct DurationConfig {
    /// Run the rise-time line search and directivity regression after stage 1.
    #[serde(default)]
    pub enabled: bool,
    /// Receiver files, one per station subset, for per-station searches.
    #[serde(default)]
    pub station_receivers: Vec<StationReceivers>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StationReceivers {
    pub station: String,
    pub azimuth: f64,
    pub receivers: PathBuf,
}

/// Where the noise window of the quality check sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NoiseWindow {
    #[default]
    Before,
    After,
    /// Fixed window from 240 s to 0 s before the origin.
    Fixed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QualityConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Accepted band is `median / level ..= median * level`.
    #[serde(default = "default_level_relamp")]
    pub level_relamp: f64,
    /// Maximum noise-to-signal ratio.
    #[serde(default = "default_level_s2n")]
    pub level_s2n: f64,
    #[serde(default)]
    pub noise_window: NoiseWindow,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level_relamp: default_level_relamp(),
            level_s2n: default_level_s2n(),
            noise_window: NoiseWindow::default(),
        }
    }
}

fn default_num_stages() -> u8 {
    3
}
fn default_one() -> usize {
    1
}
fn default_one_u32() -> u32 {
    1
}
fn default_true() -> bool {
    true
}
fn default_scaling_factor() -> f64 {
    1.0
}
fn default_point_velocity() -> f64 {
    3500.0
}
fn default_data_format() -> String {
    "mseed".to_string()
}
fn default_interpolation() -> String {
    "bilinear".to_string()
}
fn default_misfit_method() -> String {
    "l2norm".to_string()
}
fn default_cc_shift() -> [f64; 2] {
    [-10.0, 10.0]
}
fn default_reduction() -> f64 {
    2.0
}
fn default_kinematic_rise_time() -> f64 {
    1.0
}
fn default_min_bottom_km() -> f64 {
    20.0
}
fn default_draws() -> usize {
    1000
}
fn default_level_relamp() -> f64 {
    10.0
}
fn default_level_s2n() -> f64 {
    0.5
}

impl InversionConfig {
    /// Read, apply environment overrides, and validate.
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let text = fs::read_to_string(path)
            .map_err(|e| AppError::io(format!("failed to read config '{}': {e}", path.display())))?;
        let mut config = Self::from_json(&text)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(text: &str) -> Result<Self, AppError> {
        serde_json::from_str(text).map_err(|e| AppError::config(format!("invalid config: {e}")))
    }

    /// `RAPIDINV_MINIMIZER` / `RAPIDINV_WORKDIR` take precedence over the file.
    pub fn apply_env(&mut self) {
        if let Ok(bin) = std::env::var(ENV_MINIMIZER) {
            if !bin.trim().is_empty() {
                self.minimizer = PathBuf::from(bin);
            }
        }
        if let Ok(dir) = std::env::var(ENV_WORKDIR) {
            if !dir.trim().is_empty() {
                self.inversion_dir = PathBuf::from(dir);
            }
        }
    }

    pub fn stages(&self) -> impl Iterator<Item = Stage> + '_ {
        Stage::ALL
            .into_iter()
            .filter(move |s| s.number() <= self.num_stages)
    }

    pub fn solver(&self, stage: Stage) -> &SolverSetup {
        match stage {
            Stage::PointSource => &self.point_source.solver,
            Stage::Relocation => &self.relocation.solver,
            Stage::Kinematic => &self.kinematic.solver,
        }
    }

    pub fn seed(&self) -> u64 {
        self.bootstrap.seed.unwrap_or(0x5eed_1234)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        let fail = |msg: String| Err(AppError::config(msg));

        if !(1..=3).contains(&self.num_stages) {
            return fail(format!("num_stages must be 1, 2 or 3 (got {})", self.num_stages));
        }
        if self.num_processors == 0 {
            return fail("num_processors must be >= 1".into());
        }
        if !(self.scaling_factor > 0.0) {
            return fail("scaling_factor must be > 0".into());
        }
        let limits = self.depth_limits;
        if limits.upper_km > limits.lower_km {
            return fail(format!(
                "depth upper limit {} km lies below the lower limit {} km",
                limits.upper_km, limits.lower_km
            ));
        }

        let ps = &self.point_source;
        let ranges = [
            ("point_source.depth_km", &ps.depth_km),
            ("point_source.moment", &ps.moment),
            ("point_source.rise_time", &ps.rise_time),
            ("point_source.strike", &ps.strike),
            ("point_source.dip", &ps.dip),
            ("point_source.rake", &ps.rake),
            ("relocation.rel_time", &self.relocation.rel_time),
            ("relocation.rel_north_m", &self.relocation.rel_north_m),
            ("relocation.rel_east_m", &self.relocation.rel_east_m),
            ("relocation.rel_depth_m", &self.relocation.rel_depth_m),
            ("kinematic.rel_rupture_velocity", &self.kinematic.rel_rupture_velocity),
        ];
        for (name, range) in ranges {
            range.validate(name).map_err(AppError::config)?;
        }
        if ps.moment.scale != super::types::AxisScale::Geometric && !ps.moment.is_fixed() {
            return fail("point_source.moment must use the geometric scale".into());
        }

        for (name, loops, reduction) in [
            ("point_source", ps.loops, ps.reduction),
            ("relocation", self.relocation.loops, self.relocation.reduction),
            ("kinematic", self.kinematic.loops, self.kinematic.reduction),
        ] {
            if loops == 0 {
                return fail(format!("{name}.loops must be >= 1"));
            }
            if !(reduction > 0.0) {
                return fail(format!("{name}.reduction must be > 0"));
            }
        }

        for stage in Stage::ALL {
            let f = self.solver(stage).filter;
            if !(f[0] < f[1] && f[1] <= f[2] && f[2] < f[3] && f[0] >= 0.0) {
                return fail(format!("stage {stage}: filter corners must ascend (got {f:?})"));
            }
            let cc = self.solver(stage).cc_shift;
            if cc[0] > cc[1] {
                return fail(format!("stage {stage}: cc_shift window is inverted"));
            }
        }

        let k = &self.kinematic;
        for (name, v) in [
            ("kinematic.radius_step_m", k.radius_step_m),
            ("kinematic.nucleation_x_step_m", k.nucleation_x_step_m),
            ("kinematic.nucleation_y_step_m", k.nucleation_y_step_m),
        ] {
            if !(v > 0.0) {
                return fail(format!("{name} must be > 0"));
            }
        }
        if !(k.crust.vs_m_s > 0.0 && k.crust.density_kg_m3 > 0.0) {
            return fail("kinematic.crust needs positive vs and density".into());
        }

        if self.bootstrap.draws == 0 {
            return fail("bootstrap.draws must be >= 1".into());
        }
        if self.quality.enabled && !(self.quality.level_relamp > 1.0 && self.quality.level_s2n > 0.0) {
            return fail("quality levels must be level_relamp > 1 and level_s2n > 0".into());
        }
        Ok(())
    }
}

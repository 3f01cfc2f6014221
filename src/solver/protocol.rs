//! Solver command protocol.
//!
//! The solver reads one command per line on stdin. Commands are built as
//! typed [`Command`] values and only turned into text when a [`Script`] is
//! rendered, so tests can interpret a script without parsing it.

use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};

use crate::domain::{
    InversionConfig, ModePlan, SolutionRecord, SourceKind, SourceParam, Stage, TaperWindow,
    TraceMetadata,
};

/// Which seismograms an output command refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Seismograms {
    Synthetics,
    References,
}

impl Seismograms {
    fn as_str(self) -> &'static str {
        match self {
            Seismograms::Synthetics => "synthetics",
            Seismograms::References => "references",
        }
    }
}

/// Processing state of dumped seismograms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Processing {
    Plain,
    Filtered,
    Tapered,
}

impl Processing {
    fn as_str(self) -> &'static str {
        match self {
            Processing::Plain => "plain",
            Processing::Filtered => "filtered",
            Processing::Tapered => "tapered",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetDatabase(PathBuf),
    SetEffectiveDt(f64),
    SetReceivers(PathBuf),
    SetSourceLocation { latitude: f64, longitude: f64 },
    SetSourceConstraints(Vec<f64>),
    SetRefSeismograms { path: PathBuf, format: String },
    SetLocalInterpolation(String),
    SetMisfitMethod(String),
    SetMisfitFilter([f64; 4]),
    SetMisfitTaper { trace: usize, window: TaperWindow },
    SetSourceParams { kind: SourceKind, values: Vec<f64> },
    SetSourceParamsMask { kind: SourceKind, free: Vec<bool> },
    MinimizeLm,
    GetSourceSubparams,
    GetMisfits,
    GetGlobalMisfit,
    /// Shift every reference trace (`0`) within the window by cross-correlation.
    AutoshiftRefSeismogram { trace: usize, window: [f64; 2] },
    GetSourceCrustalThickness,
    OutputSeismograms { path: PathBuf, which: Seismograms, processing: Processing },
    OutputSeismogramSpectra { path: PathBuf, which: Seismograms },
    OutputSourceModel(PathBuf),
}

impl Command {
    /// `true` for commands answered by a data line rather than an acknowledgement.
    pub fn yields_data(&self) -> bool {
        matches!(
            self,
            Command::MinimizeLm
                | Command::GetSourceSubparams
                | Command::GetMisfits
                | Command::GetGlobalMisfit
                | Command::AutoshiftRefSeismogram { .. }
                | Command::GetSourceCrustalThickness
        )
    }
}

fn join(values: &[f64]) -> String {
    values
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Command::SetDatabase(p) => write!(f, "set_database {}", p.display()),
            Command::SetEffectiveDt(dt) => write!(f, "set_effective_dt {dt}"),
            Command::SetReceivers(p) => write!(f, "set_receivers {}", p.display()),
            Command::SetSourceLocation {
                latitude,
                longitude,
            } => write!(f, "set_source_location {latitude} {longitude} 0"),
            Command::SetSourceConstraints(v) => write!(f, "set_source_constraints {}", join(v)),
            Command::SetRefSeismograms { path, format } => {
                write!(f, "set_ref_seismograms {} {format}", path.display())
            }
            Command::SetLocalInterpolation(s) => write!(f, "set_local_interpolation {s}"),
            Command::SetMisfitMethod(s) => write!(f, "set_misfit_method {s}"),
            Command::SetMisfitFilter(c) => {
                write!(f, "set_misfit_filter {} 0 {} 1 {} 1 {} 0", c[0], c[1], c[2], c[3])
            }
            Command::SetMisfitTaper { trace, window } => {
                write!(f, "set_misfit_taper {trace}")?;
                for (t, a) in window.times.iter().zip(window.amplitudes.iter()) {
                    write!(f, " {t} {a}")?;
                }
                Ok(())
            }
            Command::SetSourceParams { kind, values } => {
                write!(f, "set_source_params {} {}", kind.protocol_name(), join(values))
            }
            Command::SetSourceParamsMask { free, .. } => {
                let mask: Vec<&str> = free.iter().map(|b| if *b { "T" } else { "F" }).collect();
                write!(f, "set_source_params_mask {}", mask.join(" "))
            }
            Command::MinimizeLm => f.write_str("minimize_lm"),
            Command::GetSourceSubparams => f.write_str("get_source_subparams"),
            Command::GetMisfits => f.write_str("get_misfits"),
            Command::GetGlobalMisfit => f.write_str("get_global_misfit"),
            Command::AutoshiftRefSeismogram { trace, window } => {
                write!(f, "autoshift_ref_seismogram {trace} {} {}", window[0], window[1])
            }
            Command::GetSourceCrustalThickness => f.write_str("get_source_crustal_thickness"),
            Command::OutputSeismograms {
                path,
                which,
                processing,
            } => write!(
                f,
                "output_seismograms {} table {} {}",
                path.display(),
                which.as_str(),
                processing.as_str()
            ),
            Command::OutputSeismogramSpectra { path, which } => write!(
                f,
                "output_seismogram_spectra {} {} filtered",
                path.display(),
                which.as_str()
            ),
            Command::OutputSourceModel(p) => write!(f, "output_source_model {}", p.display()),
        }
    }
}

/// An ordered command list for one solver process.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Script {
    pub commands: Vec<Command>,
}

impl Script {
    pub fn push(&mut self, command: Command) {
        self.commands.push(command);
    }

    pub fn extend(&mut self, commands: impl IntoIterator<Item = Command>) {
        self.commands.extend(commands);
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for c in &self.commands {
            out.push_str(&c.to_string());
            out.push('\n');
        }
        out
    }

    /// Number of data lines a well-behaved solver answers with.
    pub fn expected_data_lines(&self) -> usize {
        self.commands.iter().filter(|c| c.yields_data()).count()
    }
}

/// Supplies misfit windows; travel-time computation lives outside the optimizer.
pub trait TaperProvider: Sync {
    fn taper(&self, trace: &TraceMetadata, stage: Stage, depth_m: f64) -> Option<TaperWindow>;
}

/// `set_source_params` values in the canonical order of the record's kind.
pub fn source_values(record: &SolutionRecord, point_rupture_velocity: f64) -> Vec<f64> {
    record
        .kind()
        .parameters()
        .iter()
        .map(|p| match (record.get(*p), p) {
            (Some(v), _) => v,
            (None, SourceParam::RuptureVelocity) => point_rupture_velocity,
            (None, _) => 0.0,
        })
        .collect()
}

pub fn mask(kind: SourceKind, free: &[SourceParam]) -> Command {
    Command::SetSourceParamsMask {
        kind,
        free: kind.parameters().iter().map(|p| free.contains(p)).collect(),
    }
}

/// Everything needed to talk to the solver during one stage.
#[derive(Clone)]
pub struct StageSession<'a> {
    pub config: &'a InversionConfig,
    pub stage: Stage,
    pub traces: &'a [TraceMetadata],
    pub tapers: Option<&'a dyn TaperProvider>,
    /// Trace indices kept out of the misfit (zero-weight taper).
    pub excluded: BTreeSet<usize>,
    /// Crust–mantle boundary depth (m); enables kinematic depth constraints.
    pub moho_m: Option<f64>,
    /// Replaces the stage receiver file (per-station duration searches).
    pub receivers: Option<PathBuf>,
}

impl<'a> StageSession<'a> {
    pub fn new(config: &'a InversionConfig, stage: Stage, traces: &'a [TraceMetadata]) -> Self {
        Self {
            config,
            stage,
            traces,
            tapers: None,
            excluded: BTreeSet::new(),
            moho_m: None,
            receivers: None,
        }
    }

    pub fn with_tapers(mut self, tapers: &'a dyn TaperProvider) -> Self {
        self.tapers = Some(tapers);
        self
    }

    pub fn with_excluded(mut self, excluded: impl IntoIterator<Item = usize>) -> Self {
        self.excluded.extend(excluded);
        self
    }

    /// Session header shared by every script of the stage.
    pub fn header(&self) -> Vec<Command> {
        let solver = self.config.solver(self.stage);
        let src = &self.config.source;
        let data = &self.config.data;
        vec![
            Command::SetDatabase(solver.database.join("db")),
            Command::SetEffectiveDt(solver.effective_dt),
            Command::SetReceivers(
                self.receivers
                    .clone()
                    .unwrap_or_else(|| solver.receivers.clone()),
            ),
            Command::SetSourceLocation {
                latitude: src.latitude,
                longitude: src.longitude,
            },
            Command::SetSourceConstraints(vec![0.0, 0.0, 0.0, 0.0, 0.0, -1.0]),
            Command::SetRefSeismograms {
                path: data.ref_seismograms.clone(),
                format: data.format.clone(),
            },
            Command::SetLocalInterpolation(data.interpolation.clone()),
            Command::SetMisfitMethod(solver.misfit_method.clone()),
            Command::SetMisfitFilter(solver.filter),
        ]
    }

    /// Weight of a trace in this stage: 0 for excluded, flagged or out-of-range traces.
    pub fn trace_weight(&self, trace: &TraceMetadata) -> f64 {
        let max = self.config.solver(self.stage).max_distance_km;
        let in_range = max.is_none_or(|m| trace.distance_km <= m);
        if self.excluded.contains(&trace.index) || !trace.quality.is_ok() || !in_range {
            0.0
        } else {
            1.0
        }
    }

    /// Misfit windows for a source at `depth_m`.
    pub fn tapers_at(&self, depth_m: f64) -> Vec<Command> {
        let Some(provider) = self.tapers else {
            return Vec::new();
        };
        self.traces
            .iter()
            .filter_map(|t| {
                provider
                    .taper(t, self.stage, depth_m)
                    .map(|w| Command::SetMisfitTaper {
                        trace: t.index,
                        window: w.weighted(self.trace_weight(t)),
                    })
            })
            .collect()
    }

    /// Kinematic depth constraint relative to the Moho.
    pub fn depth_constraint(&self, depth_m: f64) -> Option<Command> {
        if self.stage != Stage::Kinematic {
            return None;
        }
        let moho = self.moho_m?;
        let constraint = |bottom: f64| {
            Command::SetSourceConstraints(vec![
                0.0, 0.0, 0.0, 0.0, 0.0, -1.0, 0.0, 0.0, bottom, 0.0, 0.0, 1.0,
            ])
        };
        if depth_m >= moho {
            return Some(constraint(95000.0));
        }
        let bottom = (2.0 * depth_m).max(1000.0 * self.config.kinematic.min_bottom_km);
        (bottom < moho).then(|| constraint(bottom))
    }

    /// Commands for one candidate under `plan`. Depth-dependent setup is
    /// re-sent only when the depth changes from the previous candidate.
    pub fn candidate(
        &self,
        record: &SolutionRecord,
        plan: &ModePlan,
        prev_depth: &mut Option<f64>,
        out: &mut Script,
    ) {
        let depth = record.base.depth;
        if *prev_depth != Some(depth) {
            out.extend(self.depth_constraint(depth));
            out.extend(self.tapers_at(depth));
            *prev_depth = Some(depth);
        }
        let kind = record.kind();
        out.push(Command::SetSourceParams {
            kind,
            values: source_values(record, self.config.source.point_rupture_velocity),
        });
        if plan.autoshift {
            out.push(Command::AutoshiftRefSeismogram {
                trace: 0,
                window: self.config.solver(self.stage).cc_shift,
            });
        }
        for free in plan.steps {
            out.push(mask(kind, free));
            out.push(Command::MinimizeLm);
            out.push(Command::GetSourceSubparams);
        }
        if plan.per_trace {
            out.push(Command::GetMisfits);
        }
        out.push(Command::GetGlobalMisfit);
    }

    /// Header plus one block per candidate.
    pub fn evaluation(&self, candidates: &[SolutionRecord], plan: &ModePlan) -> Script {
        let mut script = Script::default();
        script.extend(self.header());
        let mut prev_depth = None;
        for c in candidates {
            self.candidate(c, plan, &mut prev_depth, &mut script);
        }
        script
    }

    /// Dump synthetic and reference seismograms for the best solution.
    pub fn synthetics(&self, best: &SolutionRecord, dir: &Path) -> Script {
        let n = self.stage.number();
        let mut script = Script::default();
        script.extend(self.header());
        script.extend(self.depth_constraint(best.base.depth));
        script.extend(self.tapers_at(best.base.depth));
        script.push(Command::SetSourceParams {
            kind: best.kind(),
            values: source_values(best, self.config.source.point_rupture_velocity),
        });
        let dumps = [
            ("sseis", Seismograms::Synthetics, Processing::Plain),
            ("dseis", Seismograms::References, Processing::Plain),
            ("sfseis", Seismograms::Synthetics, Processing::Filtered),
            ("dfseis", Seismograms::References, Processing::Filtered),
            ("stseis", Seismograms::Synthetics, Processing::Tapered),
            ("dtseis", Seismograms::References, Processing::Tapered),
        ];
        for (prefix, which, processing) in dumps {
            script.push(Command::OutputSeismograms {
                path: dir.join(format!("{prefix}{n}")),
                which,
                processing,
            });
        }
        script.push(Command::OutputSeismogramSpectra {
            path: dir.join(format!("samsp{n}")),
            which: Seismograms::Synthetics,
        });
        script.push(Command::OutputSeismogramSpectra {
            path: dir.join(format!("damsp{n}")),
            which: Seismograms::References,
        });
        if self.stage == Stage::Kinematic {
            script.push(Command::OutputSourceModel(dir.join("best_eikonal")));
        }
        script
    }
}

/// Query the crust–mantle boundary depth below the epicentre.
pub fn crustal_thickness(config: &InversionConfig) -> Script {
    Script {
        commands: vec![
            Command::SetSourceLocation {
                latitude: config.source.latitude,
                longitude: config.source.longitude,
            },
            Command::GetSourceCrustalThickness,
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::tests::sample_json;
    use crate::domain::{PointSourceMode, QualityTag, SourceBase};
    use crate::math::Mechanism;

    struct FlatTaper;

    impl TaperProvider for FlatTaper {
        fn taper(&self, _: &TraceMetadata, _: Stage, _: f64) -> Option<TaperWindow> {
            Some(TaperWindow {
                times: [1.0, 2.0, 3.0, 4.0],
                amplitudes: [0.0, 1.0, 1.0, 0.0],
            })
        }
    }

    fn trace(index: usize, quality: QualityTag) -> TraceMetadata {
        TraceMetadata {
            index,
            station: format!("ST{index}"),
            latitude: 0.0,
            longitude: 0.0,
            distance_km: 50.0,
            azimuth: 0.0,
            components: "Z".into(),
            quality,
        }
    }

    fn dc(depth: f64) -> SolutionRecord {
        let mut base = SourceBase::new(Stage::PointSource);
        base.depth = depth;
        base.moment = 1e17;
        base.rise_time = 1.0;
        SolutionRecord::double_couple(base, Mechanism::new(10.0, 45.0, 90.0))
    }

    #[test]
    fn bilateral_source_line_has_fourteen_values() {
        let cfg = InversionConfig::from_json(&sample_json()).unwrap();
        let values = source_values(&dc(5000.0), 3500.0);
        assert_eq!(values.len(), 14);
        let line = Command::SetSourceParams {
            kind: SourceKind::Bilateral,
            values,
        }
        .to_string();
        assert_eq!(
            line,
            "set_source_params bilateral 0 0 0 5000 100000000000000000 10 45 90 0 0 0 0 3500 1"
        );
        assert_eq!(cfg.source.point_rupture_velocity, 3500.0);
    }

    #[test]
    fn mask_marks_free_parameters_in_canonical_order() {
        let line = mask(SourceKind::Bilateral, &[SourceParam::Moment, SourceParam::Depth]).to_string();
        assert_eq!(line, "set_source_params_mask F F F T T F F F F F F F F F");
    }

    #[test]
    fn evaluation_counts_data_lines_per_plan() {
        let cfg = InversionConfig::from_json(&sample_json()).unwrap();
        let traces = vec![trace(1, QualityTag::Ok), trace(2, QualityTag::NokNoise)];
        let session = StageSession::new(&cfg, Stage::PointSource, &traces).with_tapers(&FlatTaper);
        let cands = vec![dc(5000.0), dc(5000.0), dc(10000.0)];
        let plan = PointSourceMode::InvertDm.plan();
        let script = session.evaluation(&cands, &plan);
        assert_eq!(script.expected_data_lines(), 3 * plan.lines_per_candidate());

        // tapers re-sent only on depth change: two depths x two traces
        let tapers: Vec<&Command> = script
            .commands
            .iter()
            .filter(|c| matches!(c, Command::SetMisfitTaper { .. }))
            .collect();
        assert_eq!(tapers.len(), 4);
        // flagged trace is kept with zero weight
        let rendered = tapers[1].to_string();
        assert_eq!(rendered, "set_misfit_taper 2 1 0 2 0 3 0 4 0");
    }

    #[test]
    fn header_uses_database_prefix_and_filter_corners() {
        let cfg = InversionConfig::from_json(&sample_json()).unwrap();
        let session = StageSession::new(&cfg, Stage::PointSource, &[]);
        let text: Vec<String> = session.header().iter().map(|c| c.to_string()).collect();
        assert_eq!(text[0], "set_database gfdb/local/db");
        assert_eq!(text[8], "set_misfit_filter 0.02 0 0.03 1 0.08 1 0.1 0");
    }

    #[test]
    fn kinematic_depth_constraint_follows_moho() {
        let cfg = InversionConfig::from_json(&sample_json()).unwrap();
        let mut session = StageSession::new(&cfg, Stage::Kinematic, &[]);
        session.moho_m = Some(30000.0);
        // 2 x 5 km = 10 km, raised to the 20 km minimum
        assert_eq!(
            session.depth_constraint(5000.0).map(|c| c.to_string()),
            Some("set_source_constraints 0 0 0 0 0 -1 0 0 20000 0 0 1".to_string())
        );
        // 2 x 20 km reaches below the moho: no constraint
        assert_eq!(session.depth_constraint(20000.0), None);
        assert_eq!(
            session.depth_constraint(31000.0).map(|c| c.to_string()),
            Some("set_source_constraints 0 0 0 0 0 -1 0 0 95000 0 0 1".to_string())
        );
    }
}

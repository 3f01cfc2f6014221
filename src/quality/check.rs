//! Data-quality check before stage 1.
//!
//! The solver evaluates the ten rapid mechanisms, a zero source and a
//! noise-window copy of every taper, each followed by `get_misfits`. With the
//! `peak` misfit method the normalization coefficient of a trace is its peak
//! amplitude, so:
//!
//! - the mean normcoef over the ten mechanisms is the expected signal size
//! - the noise normcoef divided by the zero-source normcoef is a noise/signal ratio
//!
//! Traces whose expected size lies outside `median / level ..= median · level`
//! or whose noise ratio exceeds `level_s2n` are flagged.

use tracing::{info, warn};

use crate::bootstrap::TraceMisfits;
use crate::domain::{
    InversionConfig, NoiseWindow, QualityTag, SolutionRecord, SourceBase, SourceKind, Stage,
    TaperWindow, TraceMetadata,
};
use crate::error::{AppError, Result};
use crate::math::{Mechanism, stats};
use crate::search::grid::RAPID_MECHANISMS;
use crate::solver::protocol::source_values;
use crate::solver::{Command, Script, Slot, StageSession};

const DATA_LINES: usize = RAPID_MECHANISMS.len() + 2;
const FIXED_NOISE: TaperWindow = TaperWindow {
    times: [-240.0, -220.0, -20.0, 0.0],
    amplitudes: [0.0, 1.0, 1.0, 0.0],
};

fn noise_window(window: TaperWindow, kind: NoiseWindow, origin_time: f64) -> TaperWindow {
    match kind {
        NoiseWindow::Before => window.noise_before(origin_time),
        NoiseWindow::After => window.noise_after(),
        NoiseWindow::Fixed => TaperWindow {
            times: FIXED_NOISE.times,
            amplitudes: window.amplitudes,
        },
    }
}

fn probe(config: &InversionConfig, mechanism: Mechanism, moment: f64) -> SolutionRecord {
    let src = &config.source;
    let mut base = SourceBase::new(Stage::PointSource);
    base.time = src.origin_time;
    base.north = src.origin_north;
    base.east = src.origin_east;
    base.depth = config.point_source.depth_km.min * 1000.0;
    base.moment = moment;
    base.rise_time = 1.0;
    SolutionRecord::double_couple(base, mechanism)
}

/// Solver script of the quality check; answers with twelve data lines.
pub fn quality_script(session: &StageSession<'_>) -> Script {
    let config = session.config;
    let depth = config.point_source.depth_km.min * 1000.0;
    let velocity = config.source.point_rupture_velocity;
    let mut script = Script::default();
    script.extend(session.header().into_iter().map(|c| match c {
        Command::SetMisfitMethod(_) => Command::SetMisfitMethod("peak".to_string()),
        other => other,
    }));
    script.extend(session.tapers_at(depth));

    let moment = config.point_source.moment.min;
    for m in RAPID_MECHANISMS {
        script.push(Command::SetSourceParams {
            kind: SourceKind::Bilateral,
            values: source_values(&probe(config, m, moment), velocity),
        });
        script.push(Command::GetMisfits);
    }
    script.push(Command::SetSourceParams {
        kind: SourceKind::Bilateral,
        values: source_values(&probe(config, Mechanism::new(0.0, 0.0, 0.0), 0.0), velocity),
    });
    script.push(Command::GetMisfits);

    if let Some(provider) = session.tapers {
        for t in session.traces {
            if let Some(w) = provider.taper(t, session.stage, depth) {
                let noise = noise_window(w, config.quality.noise_window, config.source.origin_time);
                script.push(Command::SetMisfitTaper {
                    trace: t.index,
                    window: noise.weighted(session.trace_weight(t)),
                });
            }
        }
    }
    script.push(Command::GetMisfits);
    script
}

/// Per-trace outcome of the check.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceVerdict {
    pub index: usize,
    pub expected_amplitude: f64,
    pub noise_ratio: f64,
    pub tag: QualityTag,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QualityReport {
    pub median: f64,
    pub min_accepted: f64,
    pub max_accepted: f64,
    pub verdicts: Vec<TraceVerdict>,
}

impl QualityReport {
    /// Tag `traces` in place; returns the number of flagged traces.
    pub fn apply(&self, traces: &mut [TraceMetadata]) -> usize {
        let mut flagged = 0;
        for v in &self.verdicts {
            if let Some(t) = traces.iter_mut().find(|t| t.index == v.index) {
                t.quality = v.tag;
                flagged += usize::from(!v.tag.is_ok());
            }
        }
        flagged
    }

    pub fn flagged(&self) -> impl Iterator<Item = &TraceVerdict> {
        self.verdicts.iter().filter(|v| !v.tag.is_ok())
    }
}

/// `station components tag` lines for every flagged trace.
pub fn unused_stations(traces: &[TraceMetadata]) -> String {
    let mut out = String::new();
    for t in traces.iter().filter(|t| !t.quality.is_ok()) {
        out.push_str(&format!("{} {} {} \n", t.station, t.components, t.quality.as_str()));
    }
    out
}

fn misfits_line(slot: &Slot, traces: usize) -> Result<TraceMisfits> {
    let Slot::Data(line) = slot else {
        return Err(AppError::malformed(
            "",
            "tolerated failure where the quality check needs misfits",
        ));
    };
    let parsed = TraceMisfits::parse(line)?;
    if parsed.len() != traces {
        return Err(AppError::malformed(
            line,
            format!("expected {traces} traces, found {}", parsed.len()),
        ));
    }
    Ok(parsed)
}

/// Classify every trace from the twelve `get_misfits` lines.
pub fn assess(
    slots: &[Slot],
    traces: &[TraceMetadata],
    level_relamp: f64,
    level_s2n: f64,
) -> Result<QualityReport> {
    if slots.len() != DATA_LINES {
        return Err(AppError::ProtocolDesync {
            mode: "quality",
            expected: DATA_LINES,
            found: slots.len(),
        });
    }
    let n = traces.len();
    let lines = slots
        .iter()
        .map(|s| misfits_line(s, n))
        .collect::<Result<Vec<_>>>()?;

    let mut expected = vec![0.0; n];
    for line in &lines[..RAPID_MECHANISMS.len()] {
        for (acc, c) in expected.iter_mut().zip(&line.normcoefs) {
            *acc += 0.1 * c;
        }
    }
    let Some(median) = stats::median(&expected) else {
        return Err(AppError::config("quality check needs at least one trace"));
    };
    let min_accepted = median / level_relamp;
    let max_accepted = median * level_relamp;

    let zero = &lines[RAPID_MECHANISMS.len()];
    let noise = &lines[RAPID_MECHANISMS.len() + 1];
    let verdicts = traces
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let signal = zero.normcoefs[i];
            let noise_ratio = if signal > 0.0 {
                noise.normcoefs[i] / signal
            } else {
                f64::INFINITY
            };
            let tag = if expected[i] < min_accepted {
                QualityTag::NokSmall
            } else if expected[i] > max_accepted {
                QualityTag::NokLarge
            } else if noise_ratio > level_s2n {
                QualityTag::NokNoise
            } else {
                QualityTag::Ok
            };
            TraceVerdict {
                index: t.index,
                expected_amplitude: expected[i],
                noise_ratio,
                tag,
            }
        })
        .collect::<Vec<_>>();

    let report = QualityReport {
        median,
        min_accepted,
        max_accepted,
        verdicts,
    };
    info!(median, min_accepted, max_accepted, traces = n, "quality check");
    for v in report.flagged() {
        warn!(trace = v.index, tag = v.tag.as_str(), "trace excluded");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::tests::sample_json;
    use crate::solver::TaperProvider;

    struct Window;

    impl TaperProvider for Window {
        fn taper(&self, _: &TraceMetadata, _: Stage, _: f64) -> Option<TaperWindow> {
            Some(TaperWindow {
                times: [100.0, 110.0, 150.0, 160.0],
                amplitudes: [0.0, 1.0, 1.0, 0.0],
            })
        }
    }

    fn traces(n: usize) -> Vec<TraceMetadata> {
        (1..=n)
            .map(|i| TraceMetadata {
                index: i,
                station: format!("S{i:02}"),
                latitude: 0.0,
                longitude: 0.0,
                distance_km: 100.0,
                azimuth: 0.0,
                components: "Z".into(),
                quality: QualityTag::Ok,
            })
            .collect()
    }

    fn line(normcoefs: &[f64]) -> Slot {
        let text: Vec<String> = normcoefs.iter().map(|c| format!("0.5 {c}")).collect();
        Slot::Data(text.join(" "))
    }

    #[test]
    fn script_has_twelve_data_lines_and_peak_method() {
        let cfg = InversionConfig::from_json(&sample_json()).unwrap();
        let tr = traces(2);
        let session = StageSession::new(&cfg, Stage::PointSource, &tr).with_tapers(&Window);
        let script = quality_script(&session);
        assert_eq!(script.expected_data_lines(), 12);
        let text = script.render();
        assert!(text.contains("set_misfit_method peak\n"));
        // the noise window before the origin at t = 0 ends at 0
        assert!(text.contains("set_misfit_taper 1 -60 0 -50 1 -10 1 0 0\n"));
    }

    #[test]
    fn traces_outside_the_band_or_noisy_are_flagged() {
        let tr = traces(4);
        let mut slots: Vec<Slot> = (0..10).map(|_| line(&[1.0, 1.0, 50.0, 1.0])).collect();
        slots.push(line(&[1.0, 0.02, 1.0, 1.0]));
        slots.push(line(&[0.1, 0.001, 0.1, 0.9]));
        let report = assess(&slots, &tr, 10.0, 0.5).unwrap();
        assert!((report.median - 1.0).abs() < 1e-12);
        let tags: Vec<QualityTag> = report.verdicts.iter().map(|v| v.tag).collect();
        assert_eq!(
            tags,
            vec![QualityTag::Ok, QualityTag::Ok, QualityTag::NokLarge, QualityTag::NokNoise]
        );
    }

    #[test]
    fn small_amplitude_wins_over_noise() {
        let tr = traces(3);
        let mut slots: Vec<Slot> = (0..10).map(|_| line(&[1.0, 1.0, 0.01])).collect();
        slots.push(line(&[1.0, 1.0, 1.0]));
        slots.push(line(&[0.0, 0.0, 5.0]));
        let report = assess(&slots, &tr, 10.0, 0.5).unwrap();
        assert_eq!(report.verdicts[2].tag, QualityTag::NokSmall);
    }

    #[test]
    fn applied_tags_are_listed_as_unused() {
        let mut tr = traces(2);
        let mut slots: Vec<Slot> = (0..10).map(|_| line(&[1.0, 1.0])).collect();
        slots.push(line(&[1.0, 1.0]));
        slots.push(line(&[0.1, 0.9]));
        let report = assess(&slots, &tr, 10.0, 0.5).unwrap();
        assert_eq!(report.apply(&mut tr), 1);
        assert_eq!(unused_stations(&tr), "S02 Z nok-noise \n");
    }

    #[test]
    fn wrong_line_count_is_a_desync() {
        let tr = traces(1);
        let slots = vec![line(&[1.0]); 11];
        let err = assess(&slots, &tr, 10.0, 0.5).unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }
}

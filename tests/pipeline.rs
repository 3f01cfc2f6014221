//! End-to-end runs against a scripted solver.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rapidinv::app::run_inversion;
use rapidinv::domain::{InversionConfig, QualityTag, SourceKind, SourceParam, Stage, TraceMetadata};
use rapidinv::error::{AppError, Result};
use rapidinv::io::{StaticTapers, read_traces};
use rapidinv::solver::{Command, Minimizer, Script, TaperProvider};

const TRACES: &str = "\
index,station,latitude,longitude,distance_km,azimuth,components
1,AQU,42.35,13.40,12.0,40.0,ZNE
2,CAMP,42.54,13.41,35.0,10.0,ZNE
3,FIAM,42.27,13.12,48.0,250.0,ZNE
4,GUAR,41.79,13.31,95.0,190.0,ZNE
5,INTR,42.01,13.90,60.0,130.0,ZNE
6,LATB,42.10,12.70,70.0,280.0,ZNE
";

const TAPERS: &str = "\
index,t1,a1,t2,a2,t3,a3,t4,a4
1,5,0,6,1,40,1,41,0
2,8,0,9,1,50,1,51,0
3,10,0,11,1,55,1,56,0
4,15,0,16,1,70,1,71,0
5,12,0,13,1,60,1,61,0
6,13,0,14,1,65,1,66,0
";

/// Misfit bowl centred on strike 30°, depth 10 km, time 1 s and radius 1 km.
///
/// Every `get_misfits` line has a trace ratio growing with the trace
/// position, so the last trace always fits worst. A noise-window taper
/// (ending at or before the origin) turns the normalization of a trace into
/// its noise level; trace 3 is noisy.
struct Bowl {
    traces: usize,
    labels: Mutex<Vec<String>>,
    /// Label prefix answered with a hard failure.
    fail_on: Option<&'static str>,
}

impl Bowl {
    fn new(traces: usize) -> Self {
        Self {
            traces,
            labels: Mutex::new(Vec::new()),
            fail_on: None,
        }
    }

    fn misfit(kind: SourceKind, values: &[f64]) -> f64 {
        let params = kind.parameters();
        let get = |p: SourceParam| {
            params
                .iter()
                .position(|q| *q == p)
                .and_then(|i| values.get(i).copied())
                .unwrap_or(0.0)
        };
        let mut m = 0.2
            + (get(SourceParam::Strike) - 30.0).abs() / 300.0
            + (get(SourceParam::Depth) - 10000.0).abs() / 1e5
            + (get(SourceParam::Time) - 1.0).abs() / 50.0;
        if kind == SourceKind::Eikonal {
            m += (get(SourceParam::Radius) - 1000.0).abs() / 1e5;
        }
        m
    }

    fn answer(&self, script: &Script) -> Vec<String> {
        let mut kind = SourceKind::Bilateral;
        let mut values: Vec<f64> = Vec::new();
        let mut free: Vec<bool> = Vec::new();
        let mut noise: HashMap<usize, bool> = HashMap::new();
        let mut out = Vec::new();
        for c in &script.commands {
            match c {
                Command::SetSourceParams { kind: k, values: v } => {
                    kind = *k;
                    values = v.clone();
                    out.push("ok".to_string());
                }
                Command::SetSourceParamsMask { free: f, .. } => {
                    free = f.clone();
                    out.push("ok".to_string());
                }
                Command::SetMisfitTaper { trace, window } => {
                    noise.insert(*trace, window.times[3] <= 0.0);
                    out.push("ok".to_string());
                }
                Command::MinimizeLm | Command::GetGlobalMisfit => {
                    out.push(format!("{}", Self::misfit(kind, &values)));
                }
                Command::GetSourceSubparams => {
                    let line: Vec<String> = values
                        .iter()
                        .zip(&free)
                        .filter(|(_, f)| **f)
                        .map(|(v, _)| v.to_string())
                        .collect();
                    out.push(line.join(" "));
                }
                Command::GetMisfits => {
                    let m = Self::misfit(kind, &values);
                    let line: Vec<String> = (0..self.traces)
                        .map(|i| {
                            let index = i + 1;
                            let norm = match noise.get(&index) {
                                Some(true) if index == 3 => 0.8,
                                Some(true) => 0.1,
                                _ => 1.0,
                            };
                            format!("{} {norm}", m * (1.0 + 0.05 * i as f64))
                        })
                        .collect();
                    out.push(line.join(" "));
                }
                Command::AutoshiftRefSeismogram { .. } => out.push("0.5".to_string()),
                Command::GetSourceCrustalThickness => out.push("31000".to_string()),
                _ => out.push("ok".to_string()),
            }
        }
        out
    }

    fn labels(&self) -> Vec<String> {
        self.labels.lock().unwrap().clone()
    }
}

impl Minimizer for Bowl {
    fn run(&self, label: &str, scripts: &[Script]) -> Result<Vec<Vec<String>>> {
        self.labels.lock().unwrap().push(label.to_string());
        if self.fail_on.is_some_and(|p| label.starts_with(p)) {
            return Ok(scripts
                .iter()
                .map(|_| vec!["set_source_params: nok".to_string()])
                .collect());
        }
        Ok(scripts.iter().map(|s| self.answer(s)).collect())
    }
}

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("rapidinv-it-{name}-{}", std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    dir
}

fn config(dir: &Path) -> InversionConfig {
    let json = format!(
        r#"{{
            "inversion_dir": "{}",
            "minimizer": "minimizer",
            "num_stages": 3,
            "num_processors": 3,
            "source": {{ "latitude": 42.35, "longitude": 13.38 }},
            "data": {{ "ref_seismograms": "data/ref", "traces": "traces.csv" }},
            "depth_limits": {{ "upper_km": 1.0, "lower_km": 30.0 }},
            "point_source": {{
                "solver": {{ "database": "gfdb/local", "effective_dt": 0.5, "receivers": "rec.mec", "filter": [0.02, 0.03, 0.08, 0.1] }},
                "mode": "invert_dm",
                "loops": 2,
                "depth_km": {{ "min": 5.0, "max": 15.0, "step": 5.0 }},
                "moment": {{ "min": 1e17, "max": 1e17, "step": 1.0, "scale": "geometric" }},
                "rise_time": {{ "min": 1.0, "max": 1.0, "step": 1.0 }},
                "strike": {{ "min": 0.0, "max": 90.0, "step": 45.0 }},
                "dip": {{ "min": 45.0, "max": 45.0, "step": 0.0 }},
                "rake": {{ "min": 90.0, "max": 90.0, "step": 0.0 }}
            }},
            "relocation": {{
                "solver": {{ "database": "gfdb/local", "effective_dt": 0.5, "receivers": "rec.loc", "filter": [0.02, 0.03, 0.08, 0.1] }},
                "rel_time": {{ "min": -1.0, "max": 1.0, "step": 1.0 }},
                "rel_north_m": {{ "min": -1000.0, "max": 1000.0, "step": 1000.0 }},
                "rel_east_m": {{ "min": -1000.0, "max": 1000.0, "step": 1000.0 }},
                "rel_depth_m": {{ "min": -1000.0, "max": 1000.0, "step": 1000.0 }}
            }},
            "kinematic": {{
                "solver": {{ "database": "gfdb/local", "effective_dt": 0.25, "receivers": "rec.kin", "filter": [0.02, 0.05, 0.2, 0.25] }},
                "rel_rupture_velocity": {{ "min": 0.7, "max": 0.9, "step": 0.1 }},
                "radius_step_m": 500.0,
                "nucleation_x_step_m": 500.0,
                "nucleation_y_step_m": 500.0,
                "good_stations_only": true
            }},
            "moment_tensor": {{ "mode": "invert_mt" }},
            "bootstrap": {{ "draws": 100, "confidence": "95", "seed": 7 }},
            "duration": {{ "enabled": true }},
            "quality": {{ "enabled": true }}
        }}"#,
        dir.display()
    );
    let config = InversionConfig::from_json(&json).unwrap();
    config.validate().unwrap();
    config
}

fn traces() -> Vec<TraceMetadata> {
    let ingest = read_traces(TRACES.as_bytes()).unwrap();
    assert!(ingest.row_errors.is_empty());
    ingest.traces
}

#[test]
fn three_stages_converge_and_write_artifacts() {
    let dir = scratch("full");
    let cfg = config(&dir);
    let tapers = StaticTapers::read(TAPERS.as_bytes()).unwrap();
    let bowl = Bowl::new(6);

    let output = run_inversion(&cfg, &bowl, Some(&tapers as &dyn TaperProvider), traces()).unwrap();
    let summary = &output.summary;

    // quality: only the noisy trace is tagged
    assert_eq!(summary.flagged_traces, 1);
    assert_eq!(output.traces[2].quality, QualityTag::NokNoise);
    assert!(output.traces.iter().filter(|t| t.index != 3).all(|t| t.quality.is_ok()));
    let unused = fs::read_to_string(dir.join("stations.unused")).unwrap();
    assert_eq!(unused, "FIAM ZNE nok-noise \n");

    assert_eq!(summary.stages.len(), 3);
    let s1 = summary.stage(Stage::PointSource).unwrap();
    let m1 = s1.best.mechanism().unwrap();
    assert!((m1.strike - 30.0).abs() <= 15.0, "strike {}", m1.strike);
    assert_eq!(s1.best.base.depth, 10000.0);
    assert_eq!(s1.passes, 2);
    let report = s1.bootstrap.as_ref().unwrap();
    assert!(report.estimate("DEPTH").is_some());
    assert!(report.estimate("STRIKE").is_some());

    let s2 = summary.stage(Stage::Relocation).unwrap();
    assert_eq!(s2.best.base.time, 1.0);
    assert!(s2.bootstrap.is_some());

    let s3 = summary.stage(Stage::Kinematic).unwrap();
    assert_eq!(s3.best.rupture().unwrap().radius, 1000.0);
    assert_eq!(summary.moho_m, Some(31000.0));
    // the last trace always fits worst
    assert_eq!(summary.excluded_kinematic, vec![6]);
    let rupture = summary.rupture.as_ref().unwrap();
    assert!(rupture.area_km2 > 3.0 && rupture.area_km2 <= std::f64::consts::PI + 1e-9);

    assert!(summary.moment_tensor.is_some());
    assert!(summary.durations.is_some());

    for name in [
        "step1-solutions.dat",
        "step1-mt-solutions.dat",
        "step1-depth.boot",
        "step1-smom.prob",
        "step1-sds.boot",
        "step2-solutions.dat",
        "step2-centroid.boot",
        "step3-solutions.dat",
        "step3-eikonal.boot",
        "step3-eikonal-plane1.prob",
        "apparent-durations.dat",
        "summary.json",
    ] {
        assert!(dir.join(name).exists(), "missing {name}");
    }
    let boot = fs::read_to_string(dir.join("bootstrap.dat")).unwrap();
    let steps: Vec<&str> = boot.lines().filter(|l| l.starts_with("INVERSION STEP")).collect();
    assert_eq!(steps, ["INVERSION STEP 1", "INVERSION STEP 2", "INVERSION STEP 3"]);

    let json: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(dir.join("summary.json")).unwrap()).unwrap();
    assert_eq!(json["stages"].as_array().unwrap().len(), 3);
    assert_eq!(json["moho_m"], 31000.0);

    let labels = bowl.labels();
    assert_eq!(labels.first().map(String::as_str), Some("minimizer-qualitycheck"));
    assert!(labels.iter().any(|l| l == "minimizer3-evalstat"));
    assert!(labels.iter().any(|l| l == "minimizer3-synthetics"));
    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn bootstrap_is_reproducible_for_a_fixed_seed() {
    let run = |name: &str| {
        let dir = scratch(name);
        let mut cfg = config(&dir);
        cfg.num_stages = 1;
        cfg.quality.enabled = false;
        cfg.moment_tensor = None;
        cfg.duration.enabled = false;
        let output = run_inversion(&cfg, &Bowl::new(6), None, traces()).unwrap();
        let text = fs::read_to_string(dir.join("step1-sds.boot")).unwrap();
        let _ = fs::remove_dir_all(&dir);
        (output.summary, text)
    };
    let (a, boot_a) = run("seed-a");
    let (b, boot_b) = run("seed-b");
    assert_eq!(boot_a, boot_b);
    assert_eq!(a.stages[0].best, b.stages[0].best);
    assert!(a.moho_m.is_none());
}

#[test]
fn solver_failure_in_stage_two_aborts_the_run() {
    let dir = scratch("abort");
    let mut cfg = config(&dir);
    cfg.quality.enabled = false;
    cfg.duration.enabled = false;
    cfg.moment_tensor = None;
    let bowl = Bowl {
        fail_on: Some("minimizer2"),
        ..Bowl::new(6)
    };

    let err = run_inversion(&cfg, &bowl, None, traces()).unwrap_err();
    assert_eq!(err.exit_code(), 4);
    assert!(matches!(
        err,
        AppError::Stage {
            stage: Stage::Relocation,
            ..
        }
    ));
    assert!(dir.join("step1-solutions.dat").exists());
    assert!(!dir.join("step2-solutions.dat").exists());
    assert!(!dir.join("summary.json").exists());
    assert!(!bowl.labels().iter().any(|l| l.starts_with("minimizer3")));
    let _ = fs::remove_dir_all(&dir);
}

//! Stage-specific bootstrap families.
//!
//! A family is a set of tested candidates with per-trace misfits plus the
//! winner of every draw. Stage 1 builds three linearization sets around the
//! best point source (depth, moment, mechanism) and has them evaluated with
//! `get_misfits`; stages 2 and 3 reuse the per-trace lines of their last
//! grid pass. Stage 3 is split by nodal plane.

use serde::Serialize;

use super::interval::ConfidenceInterval;
use super::resample::{BootstrapEstimator, TraceMisfits};
use crate::domain::{BootstrapConfig, DepthLimits, SolutionRecord, SourceParam, Stage};
use crate::error::{AppError, Result};

#[derive(Debug, Clone)]
pub struct Family {
    /// File stem of the `.boot` / `.prob` artifacts.
    pub name: &'static str,
    pub tested: Vec<SolutionRecord>,
    /// Index into `tested` of each draw's winner.
    pub winners: Vec<usize>,
}

impl Family {
    /// Resample `tested`; candidates without a per-trace line are left out.
    pub fn run(
        name: &'static str,
        tested: &[SolutionRecord],
        lines: &[Option<String>],
        estimator: &mut BootstrapEstimator,
    ) -> Result<Self> {
        let (tested, misfits) = usable(tested, lines)?;
        let winners = estimator.winners(&misfits)?;
        Ok(Self {
            name,
            tested,
            winners,
        })
    }

    pub fn winning(&self) -> impl Iterator<Item = &SolutionRecord> {
        self.winners.iter().map(|i| &self.tested[*i])
    }

    pub fn samples(&self, param: SourceParam) -> Vec<f64> {
        self.winning().filter_map(|r| r.get(param)).collect()
    }

    /// Percentage of draws won by each tested candidate.
    pub fn probabilities(&self) -> Vec<f64> {
        let mut counts = vec![0usize; self.tested.len()];
        for w in &self.winners {
            counts[*w] += 1;
        }
        let total = self.winners.len().max(1) as f64;
        counts.iter().map(|c| 100.0 * *c as f64 / total).collect()
    }

    /// One line per draw with the winner's `columns`.
    pub fn boot_text(&self, columns: &[SourceParam]) -> String {
        self.winning()
            .map(|r| format!("{}\n", join_columns(r, columns)))
            .collect()
    }

    /// One line per tested candidate: `columns` then the win percentage.
    pub fn prob_text(&self, columns: &[SourceParam]) -> String {
        self.tested
            .iter()
            .zip(self.probabilities())
            .map(|(r, p)| format!("{} {p}\n", join_columns(r, columns)))
            .collect()
    }
}

fn join_columns(r: &SolutionRecord, columns: &[SourceParam]) -> String {
    columns
        .iter()
        .map(|p| r.get(*p).unwrap_or(0.0).to_string())
        .collect::<Vec<_>>()
        .join(" ")
}

fn usable(
    tested: &[SolutionRecord],
    lines: &[Option<String>],
) -> Result<(Vec<SolutionRecord>, Vec<TraceMisfits>)> {
    if tested.len() != lines.len() {
        return Err(AppError::Bootstrap(format!(
            "{} candidates but {} per-trace misfit lines",
            tested.len(),
            lines.len()
        )));
    }
    let mut records = Vec::with_capacity(tested.len());
    let mut misfits = Vec::with_capacity(tested.len());
    for (record, line) in tested.iter().zip(lines) {
        if let Some(line) = line {
            records.push(*record);
            misfits.push(TraceMisfits::parse(line)?);
        }
    }
    Ok((records, misfits))
}

/// How an estimate is printed in `bootstrap.dat`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ValueFormat {
    Decimal,
    Scientific,
}

/// Best value of one parameter and its interval, already in display units.
#[derive(Debug, Clone, Serialize)]
pub struct Estimate {
    pub label: &'static str,
    pub unit: &'static str,
    pub best: f64,
    pub interval: ConfidenceInterval,
    #[serde(skip)]
    pub format: ValueFormat,
}

impl Estimate {
    /// Interval from `samples` (native units) scaled by `scale` for display.
    pub fn from_samples(
        label: &'static str,
        unit: &'static str,
        best: f64,
        samples: &[f64],
        scale: f64,
        ci: &BootstrapConfig,
    ) -> Self {
        let interval = ConfidenceInterval::from_samples(samples, ci.confidence, ci.distribution)
            .unwrap_or(ConfidenceInterval::point(best));
        Self {
            label,
            unit,
            best: best * scale,
            interval: ConfidenceInterval {
                lower: interval.lower * scale,
                upper: interval.upper * scale,
            },
            format: ValueFormat::Decimal,
        }
    }

    pub fn scientific(mut self) -> Self {
        self.format = ValueFormat::Scientific;
        self
    }

    fn line(&self) -> String {
        let (b, lo, hi) = match self.format {
            ValueFormat::Decimal => (
                format!("{:.1}", self.best),
                format!("{:.1}", self.interval.lower),
                format!("{:.1}", self.interval.upper),
            ),
            ValueFormat::Scientific => (
                format!("{:.3e}", self.best),
                format!("{:.3e}", self.interval.lower),
                format!("{:.3e}", self.interval.upper),
            ),
        };
        format!("{:<11}{b} [{lo}, {hi}] {}", self.label, self.unit)
            .trim_end()
            .to_string()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReportBlock {
    pub title: Option<String>,
    pub estimates: Vec<Estimate>,
}

/// One stage's section of `bootstrap.dat`.
#[derive(Debug, Clone, Serialize)]
pub struct BootstrapReport {
    pub stage: Stage,
    pub confidence_pct: u8,
    pub blocks: Vec<ReportBlock>,
}

impl BootstrapReport {
    pub fn render(&self) -> String {
        let mut out = format!("INVERSION STEP {}\n", self.stage.number());
        for block in &self.blocks {
            if let Some(title) = &block.title {
                out.push_str(title);
                out.push('\n');
            }
            for e in &block.estimates {
                out.push_str(&e.line());
                out.push('\n');
            }
        }
        out
    }

    pub fn estimate(&self, label: &str) -> Option<&Estimate> {
        self.blocks
            .iter()
            .flat_map(|b| b.estimates.iter())
            .find(|e| e.label == label)
    }
}

pub const DEPTH_COLUMNS: &[SourceParam] = &[SourceParam::Depth];
pub const MOMENT_COLUMNS: &[SourceParam] = &[SourceParam::Moment];
pub const SDS_COLUMNS: &[SourceParam] = &[SourceParam::Strike, SourceParam::Dip, SourceParam::SlipRake];
pub const CENTROID_COLUMNS: &[SourceParam] =
    &[SourceParam::NorthShift, SourceParam::EastShift, SourceParam::Time];
pub const EIKONAL_COLUMNS: &[SourceParam] = &[
    SourceParam::Strike,
    SourceParam::Dip,
    SourceParam::SlipRake,
    SourceParam::Radius,
    SourceParam::RelRuptureVelocity,
    SourceParam::NucleationX,
    SourceParam::NucleationY,
];

/// Stage-1 linearization sets around `best`: depth ±3 km (inside the
/// limits), moment `M0·(1 + k/10)` for `k = -10..=10`, and strike/dip/rake
/// ±60° every 20°.
pub fn point_source_sets(
    best: &SolutionRecord,
    limits: DepthLimits,
) -> Vec<(&'static str, Vec<SolutionRecord>)> {
    let anchor = best.normalized().as_candidate(Stage::PointSource);
    let depth = anchor.base.depth;
    let moment = anchor.base.moment;

    let depths = (-3..=3)
        .map(|k| depth + f64::from(k) * 1000.0)
        .filter(|d| limits.contains_m(*d))
        .map(|d| {
            let mut c = anchor;
            c.base.depth = d;
            c
        })
        .collect();

    let moments = (-10..=10)
        .map(|k| {
            let mut c = anchor;
            c.base.moment = moment + f64::from(k) * moment / 10.0;
            c
        })
        .collect();

    let mut mechanisms = Vec::with_capacity(343);
    if let Some(m) = anchor.mechanism() {
        for ds in -3..=3 {
            for dd in -3..=3 {
                for dr in -3..=3 {
                    let mut c = anchor;
                    c.set(SourceParam::Strike, m.strike + f64::from(ds) * 20.0);
                    c.set(SourceParam::Dip, m.dip + f64::from(dd) * 20.0);
                    c.set(SourceParam::SlipRake, m.rake + f64::from(dr) * 20.0);
                    mechanisms.push(c);
                }
            }
        }
    }

    vec![("depth", depths), ("smom", moments), ("sds", mechanisms)]
}

/// Stage-1 report from the depth, moment and mechanism families (in that order).
pub fn point_source_report(
    best: &SolutionRecord,
    families: &[Family],
    ci: &BootstrapConfig,
) -> BootstrapReport {
    let best = best.normalized();
    let m = best.mechanism().unwrap_or(crate::math::Mechanism::new(0.0, 0.0, 0.0));
    let find = |name: &str| families.iter().find(|f| f.name == name);
    let samples = |name: &str, p: SourceParam| find(name).map(|f| f.samples(p)).unwrap_or_default();

    let estimates = vec![
        Estimate::from_samples("DEPTH", "km", best.base.depth, &samples("depth", SourceParam::Depth), 1e-3, ci),
        Estimate::from_samples("SC.MOMENT", "Nm", best.base.moment, &samples("smom", SourceParam::Moment), 1.0, ci)
            .scientific(),
        Estimate::from_samples("STRIKE", "deg", m.strike, &samples("sds", SourceParam::Strike), 1.0, ci),
        Estimate::from_samples("DIP", "deg", m.dip, &samples("sds", SourceParam::Dip), 1.0, ci),
        Estimate::from_samples("RAKE", "deg", m.rake, &samples("sds", SourceParam::SlipRake), 1.0, ci),
    ];
    BootstrapReport {
        stage: Stage::PointSource,
        confidence_pct: ci.confidence.percent(),
        blocks: vec![ReportBlock {
            title: None,
            estimates,
        }],
    }
}

/// Stage-2 report: centroid north/east (km) and time (s).
pub fn relocation_report(best: &SolutionRecord, family: &Family, ci: &BootstrapConfig) -> BootstrapReport {
    let b = &best.base;
    let estimates = vec![
        Estimate::from_samples("REL LAT N", "km", b.north, &family.samples(SourceParam::NorthShift), 1e-3, ci),
        Estimate::from_samples("REL LON E", "km", b.east, &family.samples(SourceParam::EastShift), 1e-3, ci),
        Estimate::from_samples("REL TIME", "s", b.time, &family.samples(SourceParam::Time), 1.0, ci),
    ];
    BootstrapReport {
        stage: Stage::Relocation,
        confidence_pct: ci.confidence.percent(),
        blocks: vec![ReportBlock {
            title: None,
            estimates,
        }],
    }
}

/// Stage-3 families: one per nodal plane plus the combined one, all sharing the same draws.
///
/// Plane 1 is the plane of the best record (same strike); every other record
/// belongs to plane 2.
pub fn kinematic_families(
    tested: &[SolutionRecord],
    lines: &[Option<String>],
    estimator: &mut BootstrapEstimator,
) -> Result<Vec<Family>> {
    let (tested, misfits) = usable(tested, lines)?;
    let best_strike = tested
        .iter()
        .min_by(|a, b| a.misfit().total_cmp(&b.misfit()))
        .and_then(|r| r.mechanism())
        .map(|m| m.strike)
        .ok_or_else(|| AppError::Bootstrap("no kinematic candidates with per-trace misfits".into()))?;

    let same_plane = |r: &SolutionRecord| {
        r.mechanism()
            .is_some_and(|m| (m.strike - best_strike).abs() < 1e-6)
    };
    let plane1: Vec<usize> = (0..tested.len()).filter(|i| same_plane(&tested[*i])).collect();
    let plane2: Vec<usize> = (0..tested.len()).filter(|i| !same_plane(&tested[*i])).collect();
    let all: Vec<usize> = (0..tested.len()).collect();

    let groups = estimator.winners_in_groups(&misfits, &[plane1, plane2, all])?;
    Ok(["eikonal-plane1", "eikonal-plane2", "eikonal"]
        .into_iter()
        .zip(groups)
        .map(|(name, winners)| Family {
            name,
            tested: tested.clone(),
            winners,
        })
        .collect())
}

/// Stage-3 report, one block per nodal plane that won any draw.
pub fn kinematic_report(families: &[Family], ci: &BootstrapConfig) -> BootstrapReport {
    let mut blocks = Vec::new();
    for (k, family) in families.iter().filter(|f| f.name != "eikonal").enumerate() {
        let Some(best) = family
            .winners
            .iter()
            .map(|i| &family.tested[*i])
            .min_by(|a, b| a.misfit().total_cmp(&b.misfit()))
            .copied()
        else {
            continue;
        };
        // reference is the best of the plane over all tested candidates
        let reference = family
            .tested
            .iter()
            .filter(|r| r.mechanism().map(|m| m.strike) == best.mechanism().map(|m| m.strike))
            .min_by(|a, b| a.misfit().total_cmp(&b.misfit()))
            .copied()
            .unwrap_or(best);
        let (Some(m), Some(r)) = (reference.mechanism(), reference.rupture()) else {
            continue;
        };
        // floors apply in metres: radius >= 0, upper bound >= 1 m
        let mut radius =
            Estimate::from_samples("RADIUS", "km", r.radius, &family.samples(SourceParam::Radius), 1.0, ci);
        let iv = radius.interval.floor_lower(0.0).floor_upper(1.0);
        radius.best *= 1e-3;
        radius.interval = ConfidenceInterval {
            lower: iv.lower * 1e-3,
            upper: iv.upper * 1e-3,
        };
        blocks.push(ReportBlock {
            title: Some(format!("SOLUTION {} > {} {} {}", k + 1, m.strike, m.dip, m.rake)),
            estimates: vec![
                radius,
                Estimate::from_samples(
                    "RELRUPTVEL",
                    "",
                    r.rel_rupture_velocity,
                    &family.samples(SourceParam::RelRuptureVelocity),
                    1.0,
                    ci,
                ),
                Estimate::from_samples("NUCLEAT X", "km", r.nucleation_x, &family.samples(SourceParam::NucleationX), 1e-3, ci),
                Estimate::from_samples("NUCLEAT Y", "km", r.nucleation_y, &family.samples(SourceParam::NucleationY), 1e-3, ci),
            ],
        });
    }
    BootstrapReport {
        stage: Stage::Kinematic,
        confidence_pct: ci.confidence.percent(),
        blocks,
    }
}

//! The three-stage inversion.
//!
//! ```text
//! [quality check] → stage 1 (point source) → [moment tensor] → [durations]
//!                 → stage 2 (relocation, anchored on the better stage-1 plane in time)
//!                 → stage 3 (kinematic, both stage-2 planes, optional good stations)
//! ```
//!
//! Every stage converges through the [`IterativeRefiner`], then runs its
//! bootstrap once, dumps synthetics for its best solution and writes its
//! artifacts. A fatal error anywhere aborts the run; later stages never start.

use chrono::{DateTime, Utc};
use tracing::{info, info_span, warn};

use crate::analysis::{ResultAnalyzer, ScoreField};
use crate::bootstrap::{
    self, BootstrapEstimator, BootstrapReport, CENTROID_COLUMNS, DEPTH_COLUMNS, EIKONAL_COLUMNS,
    Family, MOMENT_COLUMNS, SDS_COLUMNS,
};
use crate::domain::{
    InversionConfig, PER_TRACE_ONLY, SolutionRecord, SourceParam, Stage, TIME_COMPARISON,
    TraceMetadata, sort_by_misfit_shift,
};
use crate::error::{AppError, Result, StageContext};
use crate::io::ArtifactWriter;
use crate::post::{DurationAnalysis, SolutionPostProcessor};
use crate::quality;
use crate::report::{RunSummary, StageSummary};
use crate::search::{GridWalkGenerator, IterativeRefiner, Refined};
use crate::solver::output::parse_floats;
use crate::solver::protocol::crustal_thickness;
use crate::solver::{Minimizer, MinimizerBridge, Slot, StageSession, TaperProvider};

/// Everything a finished run produced.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub summary: RunSummary,
    /// Traces with the quality tags of the run.
    pub traces: Vec<TraceMetadata>,
}

/// Result of one converged stage handed to the next one.
struct StageOutcome {
    summary: StageSummary,
    /// Best solution first, then its alternatives (auxiliary plane, reversed slip).
    alternatives: Vec<SolutionRecord>,
}

fn seconds_since(t0: DateTime<Utc>) -> f64 {
    (Utc::now() - t0).num_milliseconds() as f64 / 1000.0
}

pub struct Pipeline<'a> {
    config: &'a InversionConfig,
    bridge: MinimizerBridge<'a>,
    tapers: Option<&'a dyn TaperProvider>,
    writer: ArtifactWriter,
    estimator: BootstrapEstimator,
}

impl<'a> Pipeline<'a> {
    pub fn new(
        config: &'a InversionConfig,
        minimizer: &'a dyn Minimizer,
        tapers: Option<&'a dyn TaperProvider>,
    ) -> Result<Self> {
        Ok(Self {
            config,
            bridge: MinimizerBridge::new(minimizer, config.num_processors),
            tapers,
            writer: ArtifactWriter::new(&config.inversion_dir)?,
            estimator: BootstrapEstimator::seeded(config.bootstrap.draws, config.seed()),
        })
    }

    fn session<'s>(&self, stage: Stage, traces: &'s [TraceMetadata]) -> StageSession<'s>
    where
        'a: 's,
    {
        let session = StageSession::new(self.config, stage, traces);
        match self.tapers {
            Some(t) => session.with_tapers(t),
            None => session,
        }
    }

    pub fn run(mut self, mut traces: Vec<TraceMetadata>) -> Result<RunOutput> {
        let started_at = Utc::now();
        let flagged_traces = if self.config.quality.enabled {
            self.quality_check(&mut traces)
                .stage_context(Stage::PointSource, "data-quality check")?
        } else {
            0
        };

        let mut stages = Vec::new();
        let mut moment_tensor = None;
        let mut durations = None;
        let mut moho_m = None;
        let mut excluded_kinematic = Vec::new();
        let mut rupture = None;

        let first = self.point_source(&traces)?;
        if self.config.moment_tensor.is_some() {
            moment_tensor = Some(
                self.moment_tensor(&traces, &first.summary.best)
                    .stage_context(Stage::PointSource, "moment-tensor pass")?,
            );
        }
        if self.config.duration.enabled {
            durations = self
                .durations(&traces, &first.alternatives)
                .stage_context(Stage::PointSource, "duration search")?;
        }
        let mut previous = first.alternatives.clone();
        stages.push(first.summary);

        if self.config.num_stages >= 2 {
            let second = self.relocation(&traces, &previous)?;
            previous = second.alternatives.clone();
            stages.push(second.summary);
        }

        if self.config.num_stages >= 3 {
            let moho = self.moho_depth().stage_context(Stage::Kinematic, "crustal thickness")?;
            moho_m = Some(moho);
            if self.config.kinematic.good_stations_only {
                excluded_kinematic = self
                    .good_stations(&traces, &previous, moho)
                    .stage_context(Stage::Kinematic, "good-station selection")?;
            }
            let third = self.kinematic(&traces, &previous, moho, &excluded_kinematic)?;
            let post = SolutionPostProcessor::new(self.config, &self.bridge);
            rupture = post.rupture(&third.summary.best, moho_m);
            stages.push(third.summary);
        }

        let summary = RunSummary {
            started_at,
            finished_at: Utc::now(),
            traces: traces.len(),
            flagged_traces,
            excluded_kinematic,
            moho_m,
            stages,
            moment_tensor,
            durations,
            rupture,
        };
        self.writer.summary(&summary)?;
        info!(elapsed_s = summary.elapsed_s(), "inversion finished");
        Ok(RunOutput { summary, traces })
    }

    fn quality_check(&self, traces: &mut [TraceMetadata]) -> Result<usize> {
        let q = &self.config.quality;
        let report = {
            let session = self.session(Stage::PointSource, traces);
            let slots = self
                .bridge
                .run_single("minimizer-qualitycheck", quality::quality_script(&session))?;
            quality::assess(&slots, traces, q.level_relamp, q.level_s2n)?
        };
        let flagged = report.apply(traces);
        self.writer.stations_unused(traces)?;
        Ok(flagged)
    }

    /// Runs the refiner and writes `step{n}-solutions.dat`.
    fn converge<F>(
        &self,
        session: &StageSession<'_>,
        plan: crate::domain::ModePlan,
        loops: u32,
        initial: Vec<SolutionRecord>,
        narrow: F,
    ) -> Result<Refined>
    where
        F: FnMut(&SolutionRecord, u32) -> Vec<SolutionRecord>,
    {
        let refiner = IterativeRefiner {
            bridge: &self.bridge,
            session,
            plan,
            loops,
        };
        let refined = refiner.run(initial, narrow)?;
        self.writer
            .solutions(session.stage, &refined.all, self.config.scaling_factor)?;
        Ok(refined)
    }

    fn synthetics(&self, session: &StageSession<'_>, best: &SolutionRecord) -> Result<()> {
        let label = format!("minimizer{}-synthetics", session.stage.number());
        let script = session.synthetics(best, self.writer.dir());
        self.bridge.run_single(&label, script)?;
        Ok(())
    }

    fn stage_summary(
        &self,
        stage: Stage,
        mode: &'static str,
        refined: &Refined,
        best: SolutionRecord,
        started: DateTime<Utc>,
        bootstrap: Option<BootstrapReport>,
    ) -> StageSummary {
        StageSummary {
            stage,
            mode,
            best,
            mw: crate::math::moment_magnitude(self.config.scaling_factor * best.base.moment),
            evaluated: refined.all.len(),
            passes: refined.passes,
            elapsed_s: seconds_since(started),
            bootstrap,
        }
    }

    fn point_source(&mut self, traces: &[TraceMetadata]) -> Result<StageOutcome> {
        let stage = Stage::PointSource;
        let span = info_span!("stage", stage = stage.number());
        let _guard = span.enter();
        let started = Utc::now();
        let config = self.config;
        let ps = &config.point_source;
        let plan = ps.mode.plan();
        let grid = GridWalkGenerator::new(config);
        let session = self.session(stage, traces);

        let refined = self
            .converge(&session, plan, ps.loops, grid.point_source(), |b, irun| {
                grid.refine_point_source(b, irun)
            })
            .stage_context(stage, "grid search")?;
        let best = best_of(&refined, stage)?;
        info!(misfit = best.misfit(), depth = best.base.depth, "stage 1 converged");

        let report = self
            .point_source_bootstrap(&session, &best)
            .stage_context(stage, "bootstrap")?;
        self.synthetics(&session, &best).stage_context(stage, "synthetics")?;

        let post = SolutionPostProcessor::new(self.config, &self.bridge);
        let alternatives = post.alternatives(&best);
        Ok(StageOutcome {
            summary: self.stage_summary(stage, plan.name, &refined, best, started, Some(report)),
            alternatives,
        })
    }

    /// Depth, moment and mechanism linearization sets through `get_misfits`.
    fn point_source_bootstrap(
        &mut self,
        session: &StageSession<'_>,
        best: &SolutionRecord,
    ) -> Result<BootstrapReport> {
        let limits = self.config.depth_limits;
        let analyzer = ResultAnalyzer::new(&PER_TRACE_ONLY, limits);
        let mut families = Vec::new();
        for (name, set) in bootstrap::point_source_sets(best, limits) {
            if set.is_empty() {
                warn!(family = name, "empty bootstrap set");
                continue;
            }
            let label = format!("minimizer1-boot-{name}");
            let slots = self.bridge.evaluate(&label, session, &set, &PER_TRACE_ONLY)?;
            let pass = analyzer.analyze(&set, &slots)?;
            let family = Family::run(name, &pass.records, &pass.per_trace, &mut self.estimator)?;
            let columns = match name {
                "depth" => DEPTH_COLUMNS,
                "smom" => MOMENT_COLUMNS,
                _ => SDS_COLUMNS,
            };
            self.writer.family(Stage::PointSource, &family, columns)?;
            families.push(family);
        }
        let report = bootstrap::point_source_report(best, &families, &self.config.bootstrap);
        self.writer.bootstrap(&report)?;
        Ok(report)
    }

    fn moment_tensor(&self, traces: &[TraceMetadata], best: &SolutionRecord) -> Result<StageSummary> {
        let span = info_span!("moment_tensor");
        let _guard = span.enter();
        let started = Utc::now();
        let Some(mt) = &self.config.moment_tensor else {
            return Err(AppError::config("moment-tensor pass is not configured"));
        };
        let Some(anchor) = GridWalkGenerator::to_moment_tensor(best) else {
            return Err(AppError::config("moment-tensor pass needs a double-couple anchor"));
        };
        let plan = mt.mode.plan();
        let session = self.session(Stage::PointSource, traces);
        let refiner = IterativeRefiner {
            bridge: &self.bridge,
            session: &session,
            plan,
            loops: 1,
        };
        let refined = refiner.run(GridWalkGenerator::moment_tensor(&anchor), |_, _| Vec::new())?;
        let best = best_of(&refined, Stage::PointSource)?;
        let lines: Vec<String> = refined
            .all
            .iter()
            .map(|r| crate::io::solution_line(r, self.config.scaling_factor))
            .collect();
        self.writer
            .write_text("step1-mt-solutions.dat", &(lines.join("\n") + "\n"))?;
        Ok(self.stage_summary(Stage::PointSource, plan.name, &refined, best, started, None))
    }

    fn durations(
        &self,
        traces: &[TraceMetadata],
        planes: &[SolutionRecord],
    ) -> Result<Option<DurationAnalysis>> {
        let session = self.session(Stage::PointSource, traces);
        let post = SolutionPostProcessor::new(self.config, &self.bridge);
        let analysis = post.durations(&session, planes)?;
        if let Some(a) = &analysis {
            self.writer.durations(a)?;
        }
        Ok(analysis)
    }

    /// The better of the two stage-1 planes under a time-domain comparison.
    fn relocation_anchor(
        &self,
        session: &StageSession<'_>,
        planes: &[SolutionRecord],
    ) -> Result<SolutionRecord> {
        let candidates: Vec<SolutionRecord> = planes
            .iter()
            .take(2)
            .map(|p| p.as_candidate(Stage::Relocation))
            .collect();
        let slots = self
            .bridge
            .evaluate("minimizer2-compare", session, &candidates, &TIME_COMPARISON)?;
        let mut compared = ResultAnalyzer::new(&TIME_COMPARISON, self.config.depth_limits)
            .scoring(ScoreField::MisfitShift)
            .analyze(&candidates, &slots)?
            .records;
        sort_by_misfit_shift(&mut compared);
        compared
            .first()
            .copied()
            .ok_or_else(|| AppError::config("no stage-1 solution to relocate"))
    }

    fn relocation(&mut self, traces: &[TraceMetadata], planes: &[SolutionRecord]) -> Result<StageOutcome> {
        let stage = Stage::Relocation;
        let span = info_span!("stage", stage = stage.number());
        let _guard = span.enter();
        let started = Utc::now();
        let config = self.config;
        let rc = &config.relocation;
        let plan = rc.mode.plan();
        let grid = GridWalkGenerator::new(config);
        let session = self.session(stage, traces);

        let anchor = self
            .relocation_anchor(&session, planes)
            .stage_context(stage, "plane comparison")?;
        info!(
            strike = anchor.mechanism().map(|m| m.strike),
            misfit_shift = anchor.base.misfit_shift,
            "relocating the better plane"
        );
        let refined = self
            .converge(&session, plan, rc.loops, grid.relocation(&anchor), |b, irun| {
                grid.refine_relocation(b, irun)
            })
            .stage_context(stage, "grid search")?;
        let best = best_of(&refined, stage)?;

        let report = if refined.last_pass.per_trace.iter().any(Option::is_some) {
            let family = Family::run(
                "centroid",
                &refined.last_pass.records,
                &refined.last_pass.per_trace,
                &mut self.estimator,
            )
            .stage_context(stage, "bootstrap")?;
            self.writer.family(stage, &family, CENTROID_COLUMNS)?;
            let report = bootstrap::relocation_report(&best, &family, &self.config.bootstrap);
            self.writer.bootstrap(&report)?;
            Some(report)
        } else {
            info!(mode = plan.name, "no per-trace misfits in this mode; bootstrap skipped");
            None
        };
        self.synthetics(&session, &best).stage_context(stage, "synthetics")?;

        let post = SolutionPostProcessor::new(self.config, &self.bridge);
        let alternatives = post.alternatives(&best);
        Ok(StageOutcome {
            summary: self.stage_summary(stage, plan.name, &refined, best, started, report),
            alternatives,
        })
    }

    fn moho_depth(&self) -> Result<f64> {
        let slots = self
            .bridge
            .run_single("minimizer3-moho", crustal_thickness(self.config))?;
        let [Slot::Data(line)] = slots.as_slice() else {
            return Err(AppError::ProtocolDesync {
                mode: "crustal_thickness",
                expected: 1,
                found: slots.len(),
            });
        };
        let moho = parse_floats(line)?
            .first()
            .copied()
            .ok_or_else(|| AppError::malformed(line, "empty crustal thickness"))?;
        info!(moho_m = moho, "crustal thickness");
        Ok(moho)
    }

    fn good_stations(
        &self,
        traces: &[TraceMetadata],
        planes: &[SolutionRecord],
        moho: f64,
    ) -> Result<Vec<usize>> {
        let grid = GridWalkGenerator::new(self.config);
        let Some(probe) = planes.first().and_then(|p| grid.to_kinematic(p)) else {
            return Ok(Vec::new());
        };
        let mut session = self.session(Stage::Kinematic, traces);
        session.moho_m = Some(moho);
        let slots = self.bridge.run_single(
            "minimizer3-evalstat",
            quality::good_station_script(&session, &probe),
        )?;
        quality::poorly_fitting(&slots, &session)
    }

    fn kinematic(
        &mut self,
        traces: &[TraceMetadata],
        planes: &[SolutionRecord],
        moho: f64,
        excluded: &[usize],
    ) -> Result<StageOutcome> {
        let stage = Stage::Kinematic;
        let span = info_span!("stage", stage = stage.number());
        let _guard = span.enter();
        let started = Utc::now();
        let config = self.config;
        let k = &config.kinematic;
        let plan = k.mode.plan();
        let grid = GridWalkGenerator::new(config);
        let mut session = self.session(stage, traces).with_excluded(excluded.iter().copied());
        session.moho_m = Some(moho);

        let references: Vec<SolutionRecord> = planes.iter().take(2).copied().collect();
        let refined = self
            .converge(&session, plan, k.loops, grid.kinematic(&references, moho), |b, irun| {
                grid.refine_kinematic(b, irun)
            })
            .stage_context(stage, "grid search")?;
        let best = best_of(&refined, stage)?;

        let report = if refined.last_pass.per_trace.iter().any(Option::is_some) {
            let families = bootstrap::kinematic_families(
                &refined.last_pass.records,
                &refined.last_pass.per_trace,
                &mut self.estimator,
            )
            .stage_context(stage, "bootstrap")?;
            for family in &families {
                self.writer.family(stage, family, EIKONAL_COLUMNS)?;
            }
            let report = bootstrap::kinematic_report(&families, &self.config.bootstrap);
            self.writer.bootstrap(&report)?;
            Some(report)
        } else {
            info!(mode = plan.name, "no per-trace misfits in this mode; bootstrap skipped");
            None
        };
        self.synthetics(&session, &best).stage_context(stage, "synthetics")?;
        if let Some(r) = best.rupture() {
            info!(
                radius = r.radius,
                velocity = best.get(SourceParam::RelRuptureVelocity),
                "stage 3 converged"
            );
        }
        Ok(StageOutcome {
            summary: self.stage_summary(stage, plan.name, &refined, best, started, report),
            alternatives: vec![best],
        })
    }
}

fn best_of(refined: &Refined, stage: Stage) -> Result<SolutionRecord> {
    refined
        .best()
        .copied()
        .ok_or_else(|| AppError::config(format!("stage {stage} produced no solution")))
}

/// Run every configured stage against `minimizer`.
pub fn run_inversion(
    config: &InversionConfig,
    minimizer: &dyn Minimizer,
    tapers: Option<&dyn TaperProvider>,
    traces: Vec<TraceMetadata>,
) -> Result<RunOutput> {
    Pipeline::new(config, minimizer, tapers)?.run(traces)
}

//! Iterative refinement.
//!
//! One stage is a fixed number of passes through
//! `GenerateCandidates → Evaluate → Analyze → {Narrow | Converged}`.
//! Every analyzed record is kept; the best is the lowest misfit over all
//! passes, and the next pass is generated around it.

use tracing::{debug, info, info_span, warn};

use crate::analysis::{AnalyzedPass, ResultAnalyzer};
use crate::domain::{ModePlan, SolutionRecord, sort_by_misfit};
use crate::error::{AppError, Result};
use crate::solver::{MinimizerBridge, Slot, StageSession};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefineState {
    GenerateCandidates,
    Evaluate,
    Analyze,
    Narrow,
    Converged,
}

/// Outcome of a converged stage.
#[derive(Debug, Clone)]
pub struct Refined {
    /// Every analyzed record of every pass, ascending misfit.
    pub all: Vec<SolutionRecord>,
    /// Candidates of the final pass in evaluation order, with their per-trace lines.
    pub last_candidates: Vec<SolutionRecord>,
    pub last_pass: AnalyzedPass,
    pub passes: u32,
}

impl Refined {
    pub fn best(&self) -> Option<&SolutionRecord> {
        self.all.first()
    }
}

pub struct IterativeRefiner<'a> {
    pub bridge: &'a MinimizerBridge<'a>,
    pub session: &'a StageSession<'a>,
    pub plan: ModePlan,
    pub loops: u32,
}

impl<'a> IterativeRefiner<'a> {
    /// Run all passes. `narrow(best, irun)` builds the candidates of the pass
    /// following pass `irun` (1-based).
    pub fn run<F>(&self, initial: Vec<SolutionRecord>, mut narrow: F) -> Result<Refined>
    where
        F: FnMut(&SolutionRecord, u32) -> Vec<SolutionRecord>,
    {
        let stage = self.session.stage;
        let limits = self.session.config.depth_limits;
        let analyzer = ResultAnalyzer::new(&self.plan, limits);

        let mut state = RefineState::GenerateCandidates;
        let mut irun = 1u32;
        let mut candidates = Vec::new();
        let mut slots: Vec<Slot> = Vec::new();
        let mut all: Vec<SolutionRecord> = Vec::new();
        let mut last_pass = AnalyzedPass::default();
        let mut pending = Some(initial);

        loop {
            let span = info_span!("pass", stage = stage.number(), irun);
            let _guard = span.enter();
            debug!(?state, "refiner step");
            state = match state {
                RefineState::GenerateCandidates => {
                    candidates = pending.take().unwrap_or_default();
                    if candidates.is_empty() {
                        return Err(AppError::config(format!(
                            "stage {stage}: the search grid produced no candidates"
                        )));
                    }
                    RefineState::Evaluate
                }
                RefineState::Evaluate => {
                    let label = format!("minimizer{}-run{irun}", stage.number());
                    info!(candidates = candidates.len(), mode = self.plan.name, "evaluating pass");
                    slots = self.bridge.evaluate(&label, self.session, &candidates, &self.plan)?;
                    RefineState::Analyze
                }
                RefineState::Analyze => {
                    last_pass = analyzer.analyze(&candidates, &slots)?;
                    all.extend(last_pass.records.iter().copied());
                    sort_by_misfit(&mut all);
                    if let Some(best) = all.first() {
                        info!(misfit = best.misfit(), depth = best.base.depth, "best so far");
                    }
                    if irun >= self.loops {
                        RefineState::Converged
                    } else {
                        RefineState::Narrow
                    }
                }
                RefineState::Narrow => {
                    let Some(best) = all.first().copied() else {
                        break;
                    };
                    let next = narrow(&best, irun);
                    if next.is_empty() {
                        warn!("refinement produced no candidates; stopping early");
                        RefineState::Converged
                    } else {
                        irun += 1;
                        candidates = next;
                        RefineState::Evaluate
                    }
                }
                RefineState::Converged => break,
            };
        }

        Ok(Refined {
            all,
            last_candidates: candidates,
            last_pass,
            passes: irun,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::tests::sample_json;
    use crate::domain::{InversionConfig, PointSourceMode, Stage};
    use crate::search::GridWalkGenerator;
    use crate::solver::{Command, Minimizer, Script};
    use std::sync::Mutex;

    /// Grid-mode fake: misfit is the distance of the strike from 30°.
    struct StrikeBowl {
        calls: Mutex<u32>,
    }

    impl Minimizer for StrikeBowl {
        fn run(&self, _: &str, scripts: &[Script]) -> Result<Vec<Vec<String>>> {
            *self.calls.lock().unwrap() += 1;
            Ok(scripts
                .iter()
                .map(|s| {
                    let mut strike = 0.0;
                    let mut out = Vec::new();
                    for c in &s.commands {
                        match c {
                            Command::SetSourceParams { values, .. } => strike = values[5],
                            Command::GetGlobalMisfit => out.push(format!("{}", (strike - 30.0f64).abs() / 100.0)),
                            _ => out.push("ok".into()),
                        }
                    }
                    out
                })
                .collect())
        }
    }

    #[test]
    fn passes_narrow_toward_the_minimum() {
        let mut cfg = InversionConfig::from_json(&sample_json()).unwrap();
        cfg.point_source.mode = PointSourceMode::Grid;
        cfg.point_source.loops = 3;
        let fake = StrikeBowl {
            calls: Mutex::new(0),
        };
        let bridge = MinimizerBridge::new(&fake, 2);
        let session = StageSession::new(&cfg, Stage::PointSource, &[]);
        let grid = GridWalkGenerator::new(&cfg);
        let refiner = IterativeRefiner {
            bridge: &bridge,
            session: &session,
            plan: cfg.point_source.mode.plan(),
            loops: cfg.point_source.loops,
        };
        let refined = refiner
            .run(grid.point_source(), |best, irun| grid.refine_point_source(best, irun))
            .unwrap();

        assert_eq!(refined.passes, 3);
        assert_eq!(*fake.calls.lock().unwrap(), 3);
        let best = refined.best().unwrap();
        assert!((best.mechanism().unwrap().strike - 30.0).abs() <= 12.0);
        // ascending over all passes
        assert!(refined.all.windows(2).all(|w| w[0].misfit() <= w[1].misfit()));
    }
}

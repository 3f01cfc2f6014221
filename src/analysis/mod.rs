//! Result analysis.
//!
//! Turns the ordered data slots of one evaluation back into one
//! [`SolutionRecord`] per candidate:
//!
//! - the slot count must equal `candidates × lines_per_candidate`
//! - each `get_source_subparams` line overwrites the step's free parameters
//! - the last line of a candidate is its global misfit
//! - depth is rounded to whole metres and angles are normalized
//! - candidates outside the depth limits get [`DEPTH_PENALTY`] added

use tracing::{debug, warn};

use crate::domain::{
    DEPTH_PENALTY, DepthLimits, MISFIT_SENTINEL, ModePlan, SolutionRecord, SourceModel,
    SourceParam,
};
use crate::error::{AppError, Result};
use crate::math::mechanism;
use crate::solver::Slot;
use crate::solver::output::parse_floats;

/// Analyzed records plus the raw `get_misfits` line of each candidate
/// (empty unless the plan asks for per-trace misfits; `None` on a tolerated failure).
#[derive(Debug, Clone, Default)]
pub struct AnalyzedPass {
    pub records: Vec<SolutionRecord>,
    pub per_trace: Vec<Option<String>>,
}

/// Where the final misfit of a candidate is stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreField {
    #[default]
    Misfit,
    /// Time-domain comparison: the score goes to `misfit_shift`, `misfit` is reset.
    MisfitShift,
}

pub struct ResultAnalyzer<'a> {
    plan: &'a ModePlan,
    limits: DepthLimits,
    score: ScoreField,
}

impl<'a> ResultAnalyzer<'a> {
    pub fn new(plan: &'a ModePlan, limits: DepthLimits) -> Self {
        Self {
            plan,
            limits,
            score: ScoreField::Misfit,
        }
    }

    pub fn scoring(mut self, score: ScoreField) -> Self {
        self.score = score;
        self
    }

    pub fn analyze(&self, candidates: &[SolutionRecord], slots: &[Slot]) -> Result<AnalyzedPass> {
        let lpc = self.plan.lines_per_candidate();
        let expected = candidates.len() * lpc;
        if slots.len() != expected {
            return Err(AppError::ProtocolDesync {
                mode: self.plan.name,
                expected,
                found: slots.len(),
            });
        }

        let mut out = AnalyzedPass {
            records: Vec::with_capacity(candidates.len()),
            per_trace: Vec::new(),
        };
        let mut soft = 0usize;
        for (candidate, chunk) in candidates.iter().zip(slots.chunks(lpc)) {
            let (record, trace_line, failed) = self.analyze_one(candidate, chunk)?;
            soft += usize::from(failed);
            out.records.push(record);
            if self.plan.per_trace {
                out.per_trace.push(trace_line);
            }
        }
        if soft > 0 {
            debug!(soft, mode = self.plan.name, "tolerated solver failures scored with the sentinel");
        }
        Ok(out)
    }

    fn analyze_one(
        &self,
        candidate: &SolutionRecord,
        chunk: &[Slot],
    ) -> Result<(SolutionRecord, Option<String>, bool)> {
        let mut record = *candidate;
        let mut failed = false;
        let mut slots = chunk.iter();
        let mut next = || slots.next().ok_or_else(|| AppError::malformed("", "missing data line"));

        if self.plan.autoshift {
            failed |= next()?.is_soft();
        }
        for free in self.plan.steps {
            // minimize_lm reports its own misfit; the global one below is authoritative
            failed |= next()?.is_soft();
            match next()? {
                Slot::Data(line) => apply_subparams(&mut record, free, line)?,
                Slot::Soft(_) => failed = true,
            }
        }
        let trace_line = if self.plan.per_trace {
            match next()? {
                Slot::Data(line) => Some(line.clone()),
                Slot::Soft(_) => {
                    failed = true;
                    None
                }
            }
        } else {
            None
        };
        let score = match next()? {
            Slot::Data(line) => parse_misfit(line)?,
            Slot::Soft(_) => {
                failed = true;
                MISFIT_SENTINEL
            }
        };
        if !failed && score >= DEPTH_PENALTY {
            warn!(score, "misfit reaches the depth penalty; ranking may be ambiguous");
        }

        record.base.depth = record.base.depth.round();
        record.normalize();
        if let SourceModel::MomentTensor(mt) = &mut record.model {
            let (iso, dc, clvd) = mechanism::decompose(&mt.components);
            mt.iso_pct = iso;
            mt.dc_pct = dc;
            mt.clvd_pct = clvd;
            record.base.moment = mechanism::scalar_moment(&mt.components);
        }

        let score = if failed { MISFIT_SENTINEL } else { score };
        match self.score {
            ScoreField::Misfit => {
                record.base.misfit = score;
                if !self.limits.contains_m(record.base.depth) {
                    record.base.misfit += DEPTH_PENALTY;
                }
            }
            ScoreField::MisfitShift => {
                record.base.misfit = MISFIT_SENTINEL;
                record.base.misfit_shift = score;
            }
        }
        Ok((record, trace_line, failed))
    }
}

fn parse_misfit(line: &str) -> Result<f64> {
    parse_floats(line)?
        .first()
        .copied()
        .ok_or_else(|| AppError::malformed(line, "empty misfit line"))
}

/// Free parameters come back in the canonical order of the record's source type.
fn apply_subparams(record: &mut SolutionRecord, free: &[SourceParam], line: &str) -> Result<()> {
    let values = parse_floats(line)?;
    let order: Vec<SourceParam> = record
        .kind()
        .parameters()
        .iter()
        .copied()
        .filter(|p| free.contains(p))
        .collect();
    if values.len() != order.len() {
        return Err(AppError::malformed(
            line,
            format!("expected {} sub-parameters, got {}", order.len(), values.len()),
        ));
    }
    for (param, value) in order.into_iter().zip(values) {
        record.set(param, value);
    }
    Ok(())
}

//! Run summary: what `summary.json` holds and what the terminal shows.

pub mod format;

pub use format::*;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::bootstrap::BootstrapReport;
use crate::domain::{SolutionRecord, Stage};
use crate::post::{DurationAnalysis, RuptureSummary};

/// Best solution and bookkeeping of one stage (or of the moment-tensor pass).
#[derive(Debug, Clone, Serialize)]
pub struct StageSummary {
    pub stage: Stage,
    pub mode: &'static str,
    pub best: SolutionRecord,
    pub mw: f64,
    /// Records analyzed over all passes.
    pub evaluated: usize,
    pub passes: u32,
    pub elapsed_s: f64,
    pub bootstrap: Option<BootstrapReport>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub traces: usize,
    /// Traces tagged by the data-quality check.
    pub flagged_traces: usize,
    /// Traces left out of stage 3 by the good-station selection.
    pub excluded_kinematic: Vec<usize>,
    pub moho_m: Option<f64>,
    pub stages: Vec<StageSummary>,
    pub moment_tensor: Option<StageSummary>,
    pub durations: Option<DurationAnalysis>,
    pub rupture: Option<RuptureSummary>,
}

impl RunSummary {
    pub fn elapsed_s(&self) -> f64 {
        (self.finished_at - self.started_at).num_milliseconds() as f64 / 1000.0
    }

    pub fn stage(&self, stage: Stage) -> Option<&StageSummary> {
        self.stages.iter().find(|s| s.stage == stage)
    }
}

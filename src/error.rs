//! Error taxonomy for the inversion run.
//!
//! Every fatal condition aborts the whole multi-stage run. The binary maps
//! each variant to a process exit code:
//!
//! - `2` configuration / input violations (caught before any solver call)
//! - `3` protocol desynchronization between candidates and solver output
//! - `4` solver hard failures and subprocess problems
//! - `5` filesystem I/O
//! - `6` numeric / resampling failures

use thiserror::Error;

use crate::domain::Stage;

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    /// Observed result-line count does not match the active mode.
    #[error(
        "protocol desynchronization in mode '{mode}': expected {expected} data lines, solver returned {found}"
    )]
    ProtocolDesync {
        mode: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("malformed solver line '{line}': {reason}")]
    MalformedLine { line: String, reason: String },

    /// A "nok" line that is not on the tolerated list.
    #[error("solver reported failure: {line}")]
    SolverFailure { line: String },

    #[error("solver process error: {0}")]
    Process(String),

    #[error("bootstrap error: {0}")]
    Bootstrap(String),

    #[error("stage {stage} failed during {operation}: {source}")]
    Stage {
        stage: Stage,
        operation: &'static str,
        #[source]
        source: Box<AppError>,
    },
}

impl AppError {
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    pub fn malformed(line: &str, reason: impl Into<String>) -> Self {
        Self::MalformedLine {
            line: line.to_string(),
            reason: reason.into(),
        }
    }

    /// Attach the failing stage and operation. Already-tagged errors are kept as-is.
    pub fn in_stage(self, stage: Stage, operation: &'static str) -> Self {
        match self {
            tagged @ Self::Stage { .. } => tagged,
            other => Self::Stage {
                stage,
                operation,
                source: Box::new(other),
            },
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Config(_) => 2,
            Self::ProtocolDesync { .. } | Self::MalformedLine { .. } => 3,
            Self::SolverFailure { .. } | Self::Process(_) => 4,
            Self::Io(_) => 5,
            Self::Bootstrap(_) => 6,
            Self::Stage { source, .. } => source.exit_code(),
        }
    }
}

/// Extension used at stage boundaries: `op().stage_context(Stage::Relocation, "analysis")?`.
pub trait StageContext<T> {
    fn stage_context(self, stage: Stage, operation: &'static str) -> Result<T>;
}

impl<T> StageContext<T> for Result<T> {
    fn stage_context(self, stage: Stage, operation: &'static str) -> Result<T> {
        self.map_err(|e| e.in_stage(stage, operation))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_wrapper_keeps_inner_exit_code_and_names_the_stage() {
        let err = AppError::ProtocolDesync {
            mode: "invert_dm",
            expected: 18,
            found: 17,
        }
        .in_stage(Stage::PointSource, "result analysis");

        assert_eq!(err.exit_code(), 3);
        let msg = err.to_string();
        assert!(msg.contains("stage 1"));
        assert!(msg.contains("result analysis"));
        assert!(msg.contains("expected 18"));
    }

    #[test]
    fn stage_tag_is_not_applied_twice() {
        let err = AppError::config("x")
            .in_stage(Stage::Relocation, "grid walk")
            .in_stage(Stage::Kinematic, "pipeline");
        match err {
            AppError::Stage { stage, operation, .. } => {
                assert_eq!(stage, Stage::Relocation);
                assert_eq!(operation, "grid walk");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}

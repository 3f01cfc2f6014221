//! Solver output classification.
//!
//! Every stdout line is one of:
//!
//! - an acknowledgement (contains `ok`), dropped
//! - a hard failure (contains `nok`), fatal
//! - a tolerated failure, which still occupies one data slot
//! - a data line, consumed in order by the analyzer

use crate::error::{AppError, Result};

/// Warning the eikonal source prints instead of data for an impossible rupture.
pub const SOFT_NUCLEATION: &str = "nucleation point is outside";
/// Failed global misfit; tolerated and scored with the sentinel.
pub const SOFT_GLOBAL_MISFIT: &str = "get_global_misfit: nok";

/// One position in the ordered data stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Slot {
    Data(String),
    /// The solver answered with a tolerated failure instead of data.
    Soft(String),
}

impl Slot {
    pub fn is_soft(&self) -> bool {
        matches!(self, Slot::Soft(_))
    }
}

/// Classify one raw line. `Ok(None)` means the line carries no data.
pub fn classify(line: &str) -> Result<Option<Slot>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    if line.contains("nok") {
        if line.contains(SOFT_GLOBAL_MISFIT) {
            return Ok(Some(Slot::Soft(line.to_string())));
        }
        return Err(AppError::SolverFailure {
            line: line.to_string(),
        });
    }
    if line.contains(SOFT_NUCLEATION) {
        return Ok(Some(Slot::Soft(line.to_string())));
    }
    if line.contains("ok") {
        return Ok(None);
    }
    Ok(Some(Slot::Data(line.to_string())))
}

/// Data slots of a whole output, in order.
pub fn data_slots<S: AsRef<str>>(lines: &[S]) -> Result<Vec<Slot>> {
    let mut out = Vec::new();
    for line in lines {
        if let Some(slot) = classify(line.as_ref())? {
            out.push(slot);
        }
    }
    Ok(out)
}

/// Whitespace-separated floats of a data line.
pub fn parse_floats(line: &str) -> Result<Vec<f64>> {
    line.split_whitespace()
        .map(|tok| {
            tok.parse::<f64>()
                .map_err(|_| AppError::malformed(line, format!("'{tok}' is not a number")))
        })
        .collect()
}

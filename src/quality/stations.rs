//! Good-station selection before the kinematic stage.
//!
//! The best point source is evaluated once as an eikonal source of zero
//! radius. Traces whose `misfit / normcoef` exceeds the mean plus one
//! standard deviation of all ratios are kept out of stage 3.

use tracing::{info, warn};

use crate::bootstrap::TraceMisfits;
use crate::domain::{SolutionRecord, SourceParam, Stage};
use crate::error::{AppError, Result};
use crate::math::stats;
use crate::solver::protocol::source_values;
use crate::solver::{Command, Script, Slot, StageSession};

/// Relative rupture velocity of the probe source.
const PROBE_VELOCITY: f64 = 0.9;

/// One autoshift line, then one `get_misfits` line.
pub fn good_station_script(session: &StageSession<'_>, kinematic: &SolutionRecord) -> Script {
    let mut probe = *kinematic;
    probe.set(SourceParam::Radius, 0.0);
    probe.set(SourceParam::NucleationX, 0.0);
    probe.set(SourceParam::NucleationY, 0.0);
    probe.set(SourceParam::RelRuptureVelocity, PROBE_VELOCITY);

    let depth = probe.base.depth;
    let mut script = Script::default();
    script.extend(session.header());
    script.extend(session.depth_constraint(depth));
    script.extend(session.tapers_at(depth));
    script.push(Command::SetSourceParams {
        kind: probe.kind(),
        values: source_values(&probe, session.config.source.point_rupture_velocity),
    });
    script.push(Command::AutoshiftRefSeismogram {
        trace: 0,
        window: session.config.solver(Stage::Kinematic).cc_shift,
    });
    script.push(Command::GetMisfits);
    script
}

/// Trace indices fitting worse than mean + std; empty when the probe failed.
pub fn poorly_fitting(slots: &[Slot], session: &StageSession<'_>) -> Result<Vec<usize>> {
    if slots.len() != 2 {
        return Err(AppError::ProtocolDesync {
            mode: "good-stations",
            expected: 2,
            found: slots.len(),
        });
    }
    let line = match &slots[1] {
        Slot::Data(line) => line,
        Slot::Soft(reason) => {
            warn!(%reason, "station fit probe failed; keeping every trace");
            return Ok(Vec::new());
        }
    };
    let misfits = TraceMisfits::parse(line)?;
    let ratios = misfits.ratios();
    let (Some(mean), Some(std)) = (stats::mean(&ratios), stats::std_dev(&ratios)) else {
        return Ok(Vec::new());
    };
    let threshold = mean + std;
    let excluded: Vec<usize> = session
        .traces
        .iter()
        .zip(&ratios)
        .filter(|(_, r)| **r > threshold)
        .map(|(t, _)| t.index)
        .collect();
    info!(mean, threshold, excluded = excluded.len(), "good-station selection");
    Ok(excluded)
}

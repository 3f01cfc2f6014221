//! Taper windows precomputed outside the optimizer.
//!
//! Travel times are not computed here. The taper table lists, per trace and
//! optionally per stage and source depth, the four `(time, amplitude)`
//! corners of the misfit window:
//!
//! ```text
//! index[,stage][,depth_km],t1,a1,t2,a2,t3,a3,t4,a4
//! ```
//!
//! A row without `stage` applies to every stage. Among the matching rows the
//! one whose depth is closest to the source depth wins.

use std::collections::HashMap;
use std::fs::File;
use std::path::Path;

use crate::domain::{Stage, TaperWindow, TraceMetadata};
use crate::error::AppError;
use crate::io::ingest::{build_header_map, field, number};
use crate::solver::TaperProvider;

#[derive(Debug, Clone, PartialEq)]
struct TaperRow {
    stage: Option<Stage>,
    depth_km: Option<f64>,
    window: TaperWindow,
}

#[derive(Debug, Clone, Default)]
pub struct StaticTapers {
    rows: HashMap<usize, Vec<TaperRow>>,
}

impl StaticTapers {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        let file = File::open(path)
            .map_err(|e| AppError::config(format!("failed to open taper table '{}': {e}", path.display())))?;
        Self::read(file)
    }

    pub fn read<R: std::io::Read>(source: R) -> Result<Self, AppError> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(source);
        let headers = reader
            .headers()
            .map_err(|e| AppError::config(format!("failed to read taper table headers: {e}")))?
            .clone();
        let header_map = build_header_map(&headers);

        let mut rows: HashMap<usize, Vec<TaperRow>> = HashMap::new();
        for (idx, result) in reader.records().enumerate() {
            let line = idx + 2;
            let record = result.map_err(|e| AppError::config(format!("taper table line {line}: {e}")))?;
            let bad = |message: String| AppError::config(format!("taper table line {line}: {message}"));

            let index = number(&record, &header_map, "index").map_err(bad)? as usize;
            let stage = match field(&record, &header_map, "stage") {
                Some(raw) => Some(
                    raw.parse::<u8>()
                        .ok()
                        .and_then(Stage::from_number)
                        .ok_or_else(|| bad(format!("unknown stage '{raw}'")))?,
                ),
                None => None,
            };
            let depth_km = match field(&record, &header_map, "depth_km") {
                Some(_) => Some(number(&record, &header_map, "depth_km").map_err(bad)?),
                None => None,
            };
            let mut times = [0.0; 4];
            let mut amplitudes = [0.0; 4];
            for k in 0..4 {
                times[k] = number(&record, &header_map, &format!("t{}", k + 1)).map_err(bad)?;
                amplitudes[k] = number(&record, &header_map, &format!("a{}", k + 1)).map_err(bad)?;
            }
            if times.windows(2).any(|w| w[1] < w[0]) {
                return Err(bad("corner times must not decrease".into()));
            }
            rows.entry(index).or_default().push(TaperRow {
                stage,
                depth_km,
                window: TaperWindow { times, amplitudes },
            });
        }
        Ok(Self { rows })
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

impl TaperProvider for StaticTapers {
    fn taper(&self, trace: &TraceMetadata, stage: Stage, depth_m: f64) -> Option<TaperWindow> {
        let depth_km = depth_m / 1000.0;
        let distance = |r: &TaperRow| r.depth_km.map_or(0.0, |d| (d - depth_km).abs());
        self.rows
            .get(&trace.index)?
            .iter()
            .filter(|r| r.stage.is_none_or(|s| s == stage))
            .min_by(|a, b| distance(a).total_cmp(&distance(b)))
            .map(|r| r.window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::QualityTag;

    fn trace(index: usize) -> TraceMetadata {
        TraceMetadata {
            index,
            station: "AQU".into(),
            latitude: 0.0,
            longitude: 0.0,
            distance_km: 10.0,
            azimuth: 0.0,
            components: "Z".into(),
            quality: QualityTag::Ok,
        }
    }

    const TABLE: &str = "index,stage,depth_km,t1,a1,t2,a2,t3,a3,t4,a4\n\
        1,,5,1,0,2,1,8,1,9,0\n\
        1,,15,3,0,4,1,10,1,11,0\n\
        1,3,,0,0,1,1,5,1,6,0\n";

    #[test]
    fn nearest_depth_row_is_chosen() {
        let tapers = StaticTapers::read(TABLE.as_bytes()).unwrap();
        let w = tapers.taper(&trace(1), Stage::PointSource, 12000.0).unwrap();
        assert_eq!(w.times, [3.0, 4.0, 10.0, 11.0]);
        let w = tapers.taper(&trace(1), Stage::Relocation, 4000.0).unwrap();
        assert_eq!(w.times[0], 1.0);
    }

    #[test]
    fn stage_specific_rows_only_serve_their_stage() {
        let tapers = StaticTapers::read(TABLE.as_bytes()).unwrap();
        // the depth-less stage-3 row is always at distance 0
        let w = tapers.taper(&trace(1), Stage::Kinematic, 15000.0).unwrap();
        assert_eq!(w.times[3], 6.0);
        assert!(tapers.taper(&trace(2), Stage::Kinematic, 0.0).is_none());
    }

    #[test]
    fn decreasing_corners_are_rejected() {
        let table = "index,t1,a1,t2,a2,t3,a3,t4,a4\n1,5,0,4,1,8,1,9,0\n";
        assert!(StaticTapers::read(table.as_bytes()).is_err());
    }
}

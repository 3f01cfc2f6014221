//! Trace table ingest.
//!
//! The trace table is prepared upstream (station selection, distances,
//! azimuths). One row per trace, receiver order, with the columns:
//!
//! ```text
//! index,station,latitude,longitude,distance_km,azimuth,components[,quality]
//! ```
//!
//! Bad rows are skipped and reported; an empty result or a duplicated index
//! is a configuration error (exit code 2).

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::path::Path;

use csv::StringRecord;
use tracing::warn;

use crate::domain::{QualityTag, TraceMetadata};
use crate::error::AppError;

const REQUIRED: [&str; 7] = [
    "index",
    "station",
    "latitude",
    "longitude",
    "distance_km",
    "azimuth",
    "components",
];

/// A row-level error encountered during ingest.
#[derive(Debug, Clone)]
pub struct RowError {
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct IngestedTraces {
    pub traces: Vec<TraceMetadata>,
    pub row_errors: Vec<RowError>,
    pub rows_read: usize,
}

pub fn load_traces(path: &Path) -> Result<IngestedTraces, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::config(format!("failed to open trace table '{}': {e}", path.display())))?;
    read_traces(file)
}

pub fn read_traces<R: std::io::Read>(source: R) -> Result<IngestedTraces, AppError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(source);
    let headers = reader
        .headers()
        .map_err(|e| AppError::config(format!("failed to read trace table headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);
    if let Some(missing) = REQUIRED.iter().find(|c| !header_map.contains_key(**c)) {
        return Err(AppError::config(format!("trace table lacks column `{missing}`")));
    }

    let mut traces = Vec::new();
    let mut row_errors = Vec::new();
    let mut rows_read = 0usize;
    let mut seen = BTreeSet::new();
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        rows_read += 1;
        let parsed = result
            .map_err(|e| format!("CSV parse error: {e}"))
            .and_then(|record| parse_row(&record, &header_map));
        match parsed {
            Ok(trace) => {
                if !seen.insert(trace.index) {
                    return Err(AppError::config(format!(
                        "trace index {} appears twice (line {line})",
                        trace.index
                    )));
                }
                traces.push(trace);
            }
            Err(message) => {
                warn!(line, %message, "skipping trace row");
                row_errors.push(RowError { line, message });
            }
        }
    }
    if traces.is_empty() {
        return Err(AppError::config("no valid traces in the trace table"));
    }
    Ok(IngestedTraces {
        traces,
        row_errors,
        rows_read,
    })
}

pub(crate) fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.trim().trim_start_matches('\u{feff}').to_ascii_lowercase(), idx))
        .collect()
}

pub(crate) fn field<'r>(
    record: &'r StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Option<&'r str> {
    header_map
        .get(name)
        .and_then(|i| record.get(*i))
        .filter(|s| !s.is_empty())
}

pub(crate) fn number(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Result<f64, String> {
    let raw = field(record, header_map, name).ok_or_else(|| format!("missing `{name}`"))?;
    raw.parse::<f64>()
        .map_err(|_| format!("`{name}` is not a number: '{raw}'"))
}

fn parse_quality(raw: &str) -> Result<QualityTag, String> {
    match raw.to_ascii_lowercase().as_str() {
        "ok" => Ok(QualityTag::Ok),
        "nok-small" => Ok(QualityTag::NokSmall),
        "nok-large" => Ok(QualityTag::NokLarge),
        "nok-noise" => Ok(QualityTag::NokNoise),
        other => Err(format!("unknown quality tag '{other}'")),
    }
}

fn parse_row(record: &StringRecord, header_map: &HashMap<String, usize>) -> Result<TraceMetadata, String> {
    let index = field(record, header_map, "index")
        .ok_or("missing `index`")?
        .parse::<usize>()
        .map_err(|_| "`index` must be a positive integer".to_string())?;
    if index == 0 {
        return Err("`index` is 1-based".into());
    }
    let components = field(record, header_map, "components").ok_or("trace has no active component")?;
    let quality = match field(record, header_map, "quality") {
        Some(raw) => parse_quality(raw)?,
        None => QualityTag::Ok,
    };
    Ok(TraceMetadata {
        index,
        station: field(record, header_map, "station")
            .ok_or("missing `station`")?
            .to_string(),
        latitude: number(record, header_map, "latitude")?,
        longitude: number(record, header_map, "longitude")?,
        distance_km: number(record, header_map, "distance_km")?,
        azimuth: number(record, header_map, "azimuth")?,
        components: components.to_string(),
        quality,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "index,station,latitude,longitude,distance_km,azimuth,components,quality\n\
        1,AQU,42.35,13.40,5.2,10.0,ZNE,\n\
        2,CAMP,42.53,13.41,21.0,3.5,Z,nok-noise\n\
        3,BAD,x,13.0,1.0,1.0,Z,\n";

    #[test]
    fn rows_are_parsed_and_bad_ones_reported() {
        let out = read_traces(TABLE.as_bytes()).unwrap();
        assert_eq!(out.rows_read, 3);
        assert_eq!(out.traces.len(), 2);
        assert_eq!(out.row_errors.len(), 1);
        assert_eq!(out.row_errors[0].line, 4);
        assert_eq!(out.traces[0].quality, QualityTag::Ok);
        assert_eq!(out.traces[1].quality, QualityTag::NokNoise);
        assert!((out.traces[1].distance_km - 21.0).abs() < 1e-12);
    }

    #[test]
    fn duplicate_index_is_rejected() {
        let table = "index,station,latitude,longitude,distance_km,azimuth,components\n\
            1,A,0,0,1,0,Z\n1,B,0,0,1,0,Z\n";
        let err = read_traces(table.as_bytes()).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn missing_column_is_a_config_error() {
        let err = read_traces("index,station\n1,A\n".as_bytes()).unwrap_err();
        assert!(err.to_string().contains("latitude"));
    }
}

//! Run artifacts in the inversion directory.
//!
//! Plain-text `.dat` files keep the whitespace-separated layout downstream
//! plotting scripts expect; the run summary is JSON.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::bootstrap::{BootstrapReport, Family};
use crate::domain::{SolutionRecord, SourceModel, SourceParam, Stage, TraceMetadata};
use crate::error::AppError;
use crate::math::{mechanism, moment_magnitude};
use crate::post::DurationAnalysis;
use crate::quality::unused_stations;

/// One line of `step{n}-solutions.dat`.
///
/// ```text
/// misfit depth_km moment mw time north east rise_time <model columns>
/// ```
///
/// where the model columns are strike/dip/rake for a double couple, the
/// same plus radius, nucleation x/y and relative rupture velocity for a
/// kinematic rupture, and the six components plus ISO/DC/CLVD percentages
/// for a moment tensor.
pub fn solution_line(record: &SolutionRecord, scaling_factor: f64) -> String {
    let b = &record.base;
    let moment = match record.model {
        SourceModel::MomentTensor(mt) => mechanism::scalar_moment(&mt.components),
        _ => b.moment,
    };
    let mut line = format!(
        "{:.6} {:.3} {:e} {:.2} {} {} {} {}",
        b.misfit,
        b.depth / 1000.0,
        moment,
        moment_magnitude(scaling_factor * moment),
        b.time,
        b.north,
        b.east,
        b.rise_time
    );
    match record.model {
        SourceModel::DoubleCouple(m) => {
            line.push_str(&format!(" {} {} {}", m.strike, m.dip, m.rake));
        }
        SourceModel::KinematicRupture(r) => {
            let m = r.mechanism;
            line.push_str(&format!(
                " {} {} {} {} {} {} {}",
                m.strike, m.dip, m.rake, r.radius, r.nucleation_x, r.nucleation_y, r.rel_rupture_velocity
            ));
        }
        SourceModel::MomentTensor(mt) => {
            for c in mt.components {
                line.push_str(&format!(" {c:e}"));
            }
            line.push_str(&format!(" {:.1} {:.1} {:.1}", mt.iso_pct, mt.dc_pct, mt.clvd_pct));
        }
    }
    line
}

/// Writes artifacts below one directory.
#[derive(Debug, Clone)]
pub struct ArtifactWriter {
    dir: PathBuf,
}

impl ArtifactWriter {
    pub fn new(dir: &Path) -> Result<Self, AppError> {
        fs::create_dir_all(dir)
            .map_err(|e| AppError::io(format!("failed to create '{}': {e}", dir.display())))?;
        Ok(Self {
            dir: dir.to_path_buf(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    pub fn write_text(&self, name: &str, text: &str) -> Result<PathBuf, AppError> {
        let path = self.path(name);
        fs::write(&path, text)
            .map_err(|e| AppError::io(format!("failed to write '{}': {e}", path.display())))?;
        Ok(path)
    }

    pub fn append_text(&self, name: &str, text: &str) -> Result<PathBuf, AppError> {
        let path = self.path(name);
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| AppError::io(format!("failed to open '{}': {e}", path.display())))?;
        file.write_all(text.as_bytes())
            .map_err(|e| AppError::io(format!("failed to append to '{}': {e}", path.display())))?;
        Ok(path)
    }

    /// `step{n}-solutions.dat`, records in the given (ascending misfit) order.
    pub fn solutions(
        &self,
        stage: Stage,
        records: &[SolutionRecord],
        scaling_factor: f64,
    ) -> Result<PathBuf, AppError> {
        let path = self.path(&format!("step{}-solutions.dat", stage.number()));
        let mut file = File::create(&path)
            .map_err(|e| AppError::io(format!("failed to create '{}': {e}", path.display())))?;
        for r in records {
            writeln!(file, "{}", solution_line(r, scaling_factor))
                .map_err(|e| AppError::io(format!("failed to write '{}': {e}", path.display())))?;
        }
        Ok(path)
    }

    /// `step{n}-{family}.boot` and `.prob`.
    pub fn family(
        &self,
        stage: Stage,
        family: &Family,
        columns: &[SourceParam],
    ) -> Result<(), AppError> {
        let stem = format!("step{}-{}", stage.number(), family.name);
        self.write_text(&format!("{stem}.boot"), &family.boot_text(columns))?;
        self.write_text(&format!("{stem}.prob"), &family.prob_text(columns))?;
        Ok(())
    }

    /// Appends one stage section to `bootstrap.dat`.
    pub fn bootstrap(&self, report: &BootstrapReport) -> Result<PathBuf, AppError> {
        self.append_text("bootstrap.dat", &report.render())
    }

    /// `apparent-durations.dat` and, with a regression, `directivity.dat`.
    pub fn durations(&self, analysis: &DurationAnalysis) -> Result<(), AppError> {
        self.write_text("apparent-durations.dat", &analysis.render_stations())?;
        if let Some(d) = &analysis.directivity {
            self.write_text("directivity.dat", &d.render())?;
        }
        Ok(())
    }

    pub fn stations_unused(&self, traces: &[TraceMetadata]) -> Result<PathBuf, AppError> {
        self.write_text("stations.unused", &unused_stations(traces))
    }

    pub fn summary<T: Serialize>(&self, summary: &T) -> Result<PathBuf, AppError> {
        let path = self.path("summary.json");
        let file = File::create(&path)
            .map_err(|e| AppError::io(format!("failed to create '{}': {e}", path.display())))?;
        serde_json::to_writer_pretty(file, summary)
            .map_err(|e| AppError::io(format!("failed to write summary JSON: {e}")))?;
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::SourceBase;
    use crate::math::Mechanism;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rapidinv-export-{name}-{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    fn dc() -> SolutionRecord {
        let mut base = SourceBase::new(Stage::PointSource);
        base.misfit = 0.42;
        base.depth = 9000.0;
        base.moment = 1e17;
        base.rise_time = 1.0;
        SolutionRecord::double_couple(base, Mechanism::new(130.0, 45.0, -90.0))
    }

    #[test]
    fn double_couple_line_layout() {
        let line = solution_line(&dc(), 1.0);
        let cols: Vec<&str> = line.split_whitespace().collect();
        assert_eq!(cols.len(), 11);
        assert_eq!(cols[0], "0.420000");
        assert_eq!(cols[1], "9.000");
        assert_eq!(&cols[8..], ["130", "45", "-90"]);
    }

    #[test]
    fn solutions_and_bootstrap_files_are_written() {
        let dir = scratch("files");
        let w = ArtifactWriter::new(&dir).unwrap();
        let path = w.solutions(Stage::PointSource, &[dc(), dc()], 1.0).unwrap();
        assert!(path.ends_with("step1-solutions.dat"));
        let text = fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);

        w.append_text("bootstrap.dat", "INVERSION STEP 1\n").unwrap();
        w.append_text("bootstrap.dat", "INVERSION STEP 2\n").unwrap();
        let text = fs::read_to_string(w.path("bootstrap.dat")).unwrap();
        assert_eq!(text, "INVERSION STEP 1\nINVERSION STEP 2\n");
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn summary_is_json() {
        let dir = scratch("summary");
        let w = ArtifactWriter::new(&dir).unwrap();
        let path = w.summary(&dc()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(value["model"]["type"], "double_couple");
        let _ = fs::remove_dir_all(&dir);
    }
}

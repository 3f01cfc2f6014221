//! Terminal formatting of the run summary.
//!
//! Formatting lives here so the pipeline only assembles data.

use super::{RunSummary, StageSummary};
use crate::domain::SourceModel;

fn format_model(model: &SourceModel) -> String {
    match model {
        SourceModel::DoubleCouple(m) => {
            format!("strike={:.0} dip={:.0} rake={:.0}", m.strike, m.dip, m.rake)
        }
        SourceModel::KinematicRupture(r) => format!(
            "strike={:.0} dip={:.0} rake={:.0} radius={:.2}km nucl=({:.2}, {:.2})km vr={:.2}",
            r.mechanism.strike,
            r.mechanism.dip,
            r.mechanism.rake,
            r.radius / 1000.0,
            r.nucleation_x / 1000.0,
            r.nucleation_y / 1000.0,
            r.rel_rupture_velocity
        ),
        SourceModel::MomentTensor(mt) => format!(
            "ISO={:.1}% DC={:.1}% CLVD={:.1}%",
            mt.iso_pct, mt.dc_pct, mt.clvd_pct
        ),
    }
}

pub fn format_stage(s: &StageSummary) -> String {
    let b = &s.best.base;
    let mut out = String::new();
    out.push_str(&format!(
        "Stage {} ({}) mode={} passes={} evaluated={} time={:.1}s\n",
        s.stage.number(),
        s.stage.label(),
        s.mode,
        s.passes,
        s.evaluated,
        s.elapsed_s
    ));
    out.push_str(&format!(
        "  misfit={:.4} depth={:.1}km Mw={:.2} M0={:.3e}\n",
        b.misfit,
        b.depth / 1000.0,
        s.mw,
        b.moment
    ));
    out.push_str(&format!("  {}\n", format_model(&s.best.model)));
    if b.north != 0.0 || b.east != 0.0 || b.time != 0.0 {
        out.push_str(&format!(
            "  centroid: north={:.1}km east={:.1}km time={:.2}s\n",
            b.north / 1000.0,
            b.east / 1000.0,
            b.time
        ));
    }
    if let Some(report) = &s.bootstrap {
        out.push_str(&format!("  bootstrap ({}%):\n", report.confidence_pct));
        for line in report.render().lines().skip(1) {
            out.push_str(&format!("    {line}\n"));
        }
    }
    out
}

pub fn format_run_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    out.push_str("=== rapidinv - source inversion ===\n");
    out.push_str(&format!(
        "Started: {} | elapsed {:.1}s\n",
        summary.started_at.format("%Y-%m-%d %H:%M:%S UTC"),
        summary.elapsed_s()
    ));
    out.push_str(&format!(
        "Traces: n={} | flagged={} | excluded from stage 3={}\n",
        summary.traces,
        summary.flagged_traces,
        summary.excluded_kinematic.len()
    ));
    if let Some(moho) = summary.moho_m {
        out.push_str(&format!("Moho: {:.1}km\n", moho / 1000.0));
    }
    out.push('\n');

    for s in &summary.stages {
        out.push_str(&format_stage(s));
    }
    if let Some(mt) = &summary.moment_tensor {
        out.push_str("\nMoment tensor:\n");
        out.push_str(&format_stage(mt));
    }
    if let Some(d) = &summary.durations {
        out.push_str(&format!(
            "\nApparent duration: {:.2}s over {} stations\n",
            d.rise_time,
            d.stations.len()
        ));
        if let Some(dir) = &d.directivity {
            out.push_str(&format!(
                "  directivity: form {} F={:.2} mean={:.2}s [{:.2}, {:.2}]\n",
                dir.chosen + 1,
                dir.f_statistic,
                dir.mean,
                dir.interval.lower,
                dir.interval.upper
            ));
        }
    }
    if let Some(r) = &summary.rupture {
        out.push_str(&format!("\nRupture area: {:.2}km2", r.area_km2));
        match r.average_slip_m {
            Some(slip) => out.push_str(&format!(" | average slip {slip:.3}m\n")),
            None => out.push('\n'),
        }
    }
    out
}

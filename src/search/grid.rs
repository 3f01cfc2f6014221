//! Grid walks.
//!
//! Every stage searches a Cartesian product of parameter axes. A
//! [`SearchGrid`] lists the axes outermost first; [`SearchGrid::walk`] copies
//! the anchor record and overwrites the walked parameters, so fixed
//! parameters always come from the anchor. Output order is the nested-loop
//! order and nothing here sorts.
//!
//! The refinement walks re-centre a shrinking window on the current best:
//! the window spans `best ± span` and is sampled every `stride`, where
//! `stride = step / (irun · reduction)` is floored at 1.

use tracing::debug;

use crate::domain::{
    InversionConfig, MomentTensor, ParamRange, Rupture, SolutionRecord, SourceBase, SourceModel,
    SourceParam, Stage,
};
use crate::math::mechanism::{self, Mechanism};

/// The ten canonical mechanisms of the rapid stage-1 mode.
pub const RAPID_MECHANISMS: [Mechanism; 10] = [
    Mechanism::new(0.0, 90.0, 0.0),
    Mechanism::new(0.0, 45.0, 90.0),
    Mechanism::new(45.0, 45.0, 90.0),
    Mechanism::new(90.0, 45.0, 90.0),
    Mechanism::new(135.0, 45.0, 90.0),
    Mechanism::new(45.0, 90.0, 0.0),
    Mechanism::new(0.0, 90.0, 90.0),
    Mechanism::new(45.0, 90.0, 90.0),
    Mechanism::new(90.0, 90.0, 90.0),
    Mechanism::new(135.0, 90.0, 90.0),
];

/// Ordered `(parameter, range)` axes; the first axis is the outermost loop.
#[derive(Debug, Clone, Default)]
pub struct SearchGrid {
    pub axes: Vec<(SourceParam, ParamRange)>,
}

impl SearchGrid {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn axis(mut self, param: SourceParam, range: ParamRange) -> Self {
        self.axes.push((param, range));
        self
    }

    pub fn size(&self) -> usize {
        self.axes.iter().map(|(_, r)| r.values().len()).product()
    }

    /// Cartesian product of the axes applied on top of `anchor`.
    pub fn walk(&self, anchor: &SolutionRecord, stage: Stage) -> Vec<SolutionRecord> {
        let values: Vec<Vec<f64>> = self.axes.iter().map(|(_, r)| r.values()).collect();
        if values.iter().any(Vec::is_empty) {
            return Vec::new();
        }

        let template = anchor.as_candidate(stage);
        let mut idx = vec![0usize; values.len()];
        let mut out = Vec::with_capacity(self.size());
        loop {
            let mut candidate = template;
            for (k, (param, _)) in self.axes.iter().enumerate() {
                candidate.set(*param, values[k][idx[k]]);
            }
            out.push(candidate);

            // odometer: advance the innermost axis first
            let mut k = values.len();
            loop {
                if k == 0 {
                    return out;
                }
                k -= 1;
                idx[k] += 1;
                if idx[k] < values[k].len() {
                    break;
                }
                idx[k] = 0;
            }
        }
    }
}

/// Shrinking window of one refinement axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RefineAxis {
    pub span: f64,
    pub stride: f64,
}

impl RefineAxis {
    /// Window `± round(step / irun)` sampled every `round(step / (irun · reduction))`.
    pub fn shrinking(step: f64, irun: u32, reduction: f64) -> Self {
        let irun = f64::from(irun.max(1));
        Self {
            span: (step / irun).round().max(1.0),
            stride: (step / (irun * reduction)).round().max(1.0),
        }
    }

    /// Window `± step` (not shrinking) sampled every `step / (irun · reduction)`.
    pub fn fixed_span(step: f64, irun: u32, reduction: f64) -> Self {
        let irun = f64::from(irun.max(1));
        Self {
            span: step.trunc().max(1.0),
            stride: (step / (irun * reduction)).trunc().max(1.0),
        }
    }

    pub fn around(self, center: f64) -> ParamRange {
        ParamRange::linear(center - self.span, center + self.span, self.stride)
    }
}

/// Builds candidate sets for each stage from the run configuration.
pub struct GridWalkGenerator<'a> {
    config: &'a InversionConfig,
}

impl<'a> GridWalkGenerator<'a> {
    pub fn new(config: &'a InversionConfig) -> Self {
        Self { config }
    }

    fn origin_base(&self, stage: Stage) -> SourceBase {
        let src = &self.config.source;
        let mut base = SourceBase::new(stage);
        base.north = src.origin_north;
        base.east = src.origin_east;
        base.time = src.origin_time;
        base
    }

    /// Stage 1 entry: depth → moment → rise time → strike → dip → rake, or the
    /// ten rapid mechanisms at the shallowest depth and smallest moment.
    pub fn point_source(&self) -> Vec<SolutionRecord> {
        let ps = &self.config.point_source;
        let mut base = self.origin_base(Stage::PointSource);
        base.depth = ps.depth_km.min * 1000.0;
        base.moment = ps.moment.min;
        base.rise_time = ps.rise_time.min;

        if ps.rapid {
            debug!("rapid mode: ten canonical mechanisms");
            return RAPID_MECHANISMS
                .iter()
                .map(|m| SolutionRecord::double_couple(base, *m))
                .collect();
        }

        let anchor = SolutionRecord::double_couple(base, Mechanism::new(0.0, 0.0, 0.0));
        let depth_m = ParamRange {
            min: ps.depth_km.min * 1000.0,
            max: ps.depth_km.max * 1000.0,
            step: ps.depth_km.step * 1000.0,
            scale: ps.depth_km.scale,
        };
        SearchGrid::new()
            .axis(SourceParam::Depth, depth_m)
            .axis(SourceParam::Moment, ps.moment)
            .axis(SourceParam::RiseTime, ps.rise_time)
            .axis(SourceParam::Strike, ps.strike)
            .axis(SourceParam::Dip, ps.dip)
            .axis(SourceParam::SlipRake, ps.rake)
            .walk(&anchor, Stage::PointSource)
    }

    /// Stage 1 refinement: depth and moment fixed at the best, mechanism re-walked.
    pub fn refine_point_source(&self, best: &SolutionRecord, irun: u32) -> Vec<SolutionRecord> {
        let ps = &self.config.point_source;
        let Some(m) = best.mechanism() else {
            return Vec::new();
        };
        let mut anchor = best.as_candidate(Stage::PointSource);
        anchor.base.depth = best.base.depth.round();
        anchor.base.rise_time = ps.rise_time.min;
        anchor.base.north = self.config.source.origin_north;
        anchor.base.east = self.config.source.origin_east;
        anchor.base.time = self.config.source.origin_time;

        let axis = |step: f64| RefineAxis::shrinking(step, irun, ps.reduction);
        SearchGrid::new()
            .axis(SourceParam::Strike, axis(ps.strike.step).around(m.strike.round()))
            .axis(SourceParam::Dip, axis(ps.dip.step).around(m.dip.round()))
            .axis(SourceParam::SlipRake, axis(ps.rake.step).around(m.rake.round()))
            .walk(&anchor, Stage::PointSource)
    }

    /// Stage 2 entry: the anchor itself, then time → north → east → depth.
    pub fn relocation(&self, anchor: &SolutionRecord) -> Vec<SolutionRecord> {
        let rc = &self.config.relocation;
        let src = &self.config.source;
        let grid = SearchGrid::new()
            .axis(SourceParam::Time, rc.rel_time.shifted(src.origin_time))
            .axis(SourceParam::NorthShift, rc.rel_north_m.shifted(src.origin_north))
            .axis(SourceParam::EastShift, rc.rel_east_m.shifted(src.origin_east))
            .axis(SourceParam::Depth, rc.rel_depth_m.shifted(anchor.base.depth.round()));

        let mut out = Vec::with_capacity(grid.size() + 1);
        out.push(anchor.as_candidate(Stage::Relocation));
        out.extend(grid.walk(anchor, Stage::Relocation));
        out
    }

    /// Stage 2 refinement: depth, north and east around the best; time fixed.
    pub fn refine_relocation(&self, best: &SolutionRecord, irun: u32) -> Vec<SolutionRecord> {
        let rc = &self.config.relocation;
        let axis = |step: f64| RefineAxis::fixed_span(step, irun, rc.reduction);
        SearchGrid::new()
            .axis(SourceParam::Depth, axis(rc.rel_depth_m.step).around(best.base.depth.trunc()))
            .axis(SourceParam::NorthShift, axis(rc.rel_north_m.step).around(best.base.north.trunc()))
            .axis(SourceParam::EastShift, axis(rc.rel_east_m.step).around(best.base.east.trunc()))
            .walk(best, Stage::Relocation)
    }

    /// Kinematic starting record derived from a point-source solution.
    pub fn to_kinematic(&self, point: &SolutionRecord) -> Option<SolutionRecord> {
        let k = &self.config.kinematic;
        let src = &self.config.source;
        let mechanism = point.mechanism()?;
        let mut base = point.base;
        base.stage = Stage::Kinematic;
        if !k.relocate {
            base.north = src.origin_north;
            base.east = src.origin_east;
            base.time = src.origin_time;
        }
        if !k.auto_rise_time {
            base.rise_time = k.rise_time;
        }
        let rupture = Rupture {
            mechanism,
            nucleation_x: 0.0,
            nucleation_y: 0.0,
            radius: 0.0,
            rel_rupture_velocity: k.rel_rupture_velocity.min,
            border_x: 0.0,
            border_y: 0.0,
        };
        Some(
            SolutionRecord {
                base,
                model: SourceModel::KinematicRupture(rupture),
            }
            .as_candidate(Stage::Kinematic),
        )
    }

    /// Rise time of the kinematic grid given the point-source one.
    pub fn kinematic_rise_time(&self, point_rise_time: f64) -> f64 {
        let k = &self.config.kinematic;
        let mut rise = if k.auto_rise_time {
            point_rise_time / 3.0
        } else {
            point_rise_time
        };
        if k.bandpass_rise_time {
            let f3 = k.solver.filter[2];
            let (lo, hi) = (1.0 / (3.0 * f3), 2.0 / f3);
            rise = rise.clamp(lo, hi);
        }
        rise
    }

    /// Stage 3 entry for every reference record: radius → nucleation →
    /// rupture velocity → (moment). Radii and nucleation layout depend on the
    /// magnitude of the first reference; `moho_m` bounds the down-dip extent.
    pub fn kinematic(&self, references: &[SolutionRecord], moho_m: f64) -> Vec<SolutionRecord> {
        let k = &self.config.kinematic;
        let Some(first) = references.first() else {
            return Vec::new();
        };
        let mw = mechanism::moment_magnitude(self.config.scaling_factor * first.base.moment);
        let radii = radii_for_magnitude(mw);
        let rise_time = self.kinematic_rise_time(first.base.rise_time);
        let center_depth = first.base.depth;
        let velocities = k.rel_rupture_velocity.values();

        let mut out = Vec::new();
        for reference in references {
            let Some(mut template) = self.to_kinematic(reference) else {
                continue;
            };
            template.base.rise_time = rise_time;
            let moments = if k.scan_moment {
                let m0 = reference.base.moment;
                (0..=10).map(|i| m0 * (0.5 + 0.1 * f64::from(i))).collect()
            } else {
                vec![reference.base.moment]
            };

            for &radius in radii {
                let down_dip = radius.min(center_depth).min((moho_m - center_depth).abs());
                for (nx, ny) in nucleation_points(mw, radius, down_dip) {
                    for &v in &velocities {
                        for &moment in &moments {
                            let mut c = template;
                            c.set(SourceParam::Radius, radius);
                            c.set(SourceParam::NucleationX, nx);
                            c.set(SourceParam::NucleationY, ny);
                            c.set(SourceParam::RelRuptureVelocity, v);
                            c.base.moment = moment;
                            out.push(c);
                        }
                    }
                }
            }
        }
        debug!(candidates = out.len(), mw, "kinematic grid");
        out
    }

    /// Stage 3 refinement: radius and nucleation around the best, full velocity range.
    pub fn refine_kinematic(&self, best: &SolutionRecord, irun: u32) -> Vec<SolutionRecord> {
        let k = &self.config.kinematic;
        let Some(r) = best.rupture() else {
            return Vec::new();
        };
        let axis = |step: f64| RefineAxis::fixed_span(step, irun, k.reduction);
        SearchGrid::new()
            .axis(SourceParam::Radius, axis(k.radius_step_m).around(r.radius.trunc()))
            .axis(SourceParam::NucleationX, axis(k.nucleation_x_step_m).around(r.nucleation_x.trunc()))
            .axis(SourceParam::NucleationY, axis(k.nucleation_y_step_m).around(r.nucleation_y.trunc()))
            .axis(SourceParam::RelRuptureVelocity, k.rel_rupture_velocity)
            .walk(best, Stage::Kinematic)
            .into_iter()
            .filter(|c| c.rupture().is_some_and(|r| r.radius > 0.0))
            .collect()
    }

    /// Moment-tensor record equivalent to a double couple.
    pub fn to_moment_tensor(point: &SolutionRecord) -> Option<SolutionRecord> {
        let m = point.mechanism()?;
        let components = mechanism::to_moment_tensor(m, point.base.moment);
        Some(SolutionRecord {
            base: point.base,
            model: SourceModel::MomentTensor(MomentTensor {
                components,
                iso_pct: 0.0,
                dc_pct: 100.0,
                clvd_pct: 0.0,
            }),
        })
    }

    /// 64 tensors: each component of `anchor` either kept or lowered by the scalar moment.
    pub fn moment_tensor(anchor: &SolutionRecord) -> Vec<SolutionRecord> {
        let SourceModel::MomentTensor(mt) = anchor.model else {
            return Vec::new();
        };
        let m0 = mechanism::scalar_moment(&mt.components);
        let mut out = Vec::with_capacity(64);
        for mask in 0..64u32 {
            let mut c = anchor.as_candidate(anchor.base.stage);
            if let SourceModel::MomentTensor(t) = &mut c.model {
                for (i, comp) in t.components.iter_mut().enumerate() {
                    // bit 5 is m11, the outermost loop
                    if mask & (1 << (5 - i)) == 0 {
                        *comp -= m0;
                    }
                }
            }
            out.push(c);
        }
        out
    }
}

/// Candidate rupture radii (m) by magnitude band.
pub fn radii_for_magnitude(mw: f64) -> &'static [f64] {
    if mw < 3.0 {
        &[50.0, 100.0, 150.0, 200.0, 250.0, 350.0]
    } else if mw < 5.1 {
        &[500.0, 1000.0, 2000.0, 3000.0, 5000.0]
    } else if mw < 5.6 {
        &[500.0, 1000.0, 2000.0]
    } else if mw < 6.1 {
        &[1000.0, 2500.0, 5000.0, 7500.0, 10000.0, 15000.0]
    } else if mw < 6.6 {
        &[2000.0, 5000.0, 7500.0, 10000.0, 15000.0, 20000.0, 25000.0]
    } else if mw < 7.1 {
        &[2500.0, 5000.0, 10000.0]
    } else if mw < 7.6 {
        &[7500.0, 15000.0, 25000.0, 35000.0, 50000.0]
    } else {
        &[10000.0, 25000.0, 50000.0, 100000.0]
    }
}

/// Nucleation points along strike (x) and dip (y).
pub fn nucleation_points(mw: f64, radius: f64, down_dip: f64) -> Vec<(f64, f64)> {
    const F: [f64; 5] = [-0.9, -0.45, 0.0, 0.45, 0.9];
    let bx = F.map(|f| f * radius);
    let by = F.map(|f| f * down_dip);
    if mw < 5.6 {
        vec![(bx[0], by[2]), (bx[2], by[2]), (bx[4], by[2])]
    } else if mw < 6.1 {
        bx.iter().map(|x| (*x, by[2])).collect()
    } else {
        let mut v = vec![(bx[2], by[0])];
        v.extend(bx.iter().map(|x| (*x, by[2])));
        v.push((bx[2], by[4]));
        v
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::config::tests::sample_json;

    fn config() -> InversionConfig {
        InversionConfig::from_json(&sample_json()).unwrap()
    }

    #[test]
    fn stage_one_grid_is_depth_major_strike_minor() {
        let cfg = config();
        let cands = GridWalkGenerator::new(&cfg).point_source();
        assert_eq!(cands.len(), 9);
        let got: Vec<(f64, f64)> = cands
            .iter()
            .map(|c| (c.base.depth, c.mechanism().unwrap().strike))
            .collect();
        assert_eq!(
            got,
            vec![
                (5000.0, 0.0),
                (5000.0, 45.0),
                (5000.0, 90.0),
                (10000.0, 0.0),
                (10000.0, 45.0),
                (10000.0, 90.0),
                (15000.0, 0.0),
                (15000.0, 45.0),
                (15000.0, 90.0),
            ]
        );
        for c in &cands {
            let m = c.mechanism().unwrap();
            assert_eq!((m.dip, m.rake), (45.0, 90.0));
            assert_eq!(c.base.misfit, crate::domain::MISFIT_SENTINEL);
            assert_eq!(c.base.stage, Stage::PointSource);
        }
    }

    #[test]
    fn rapid_mode_emits_ten_mechanisms() {
        let mut cfg = config();
        cfg.point_source.rapid = true;
        let cands = GridWalkGenerator::new(&cfg).point_source();
        assert_eq!(cands.len(), 10);
        assert_eq!(cands[1].mechanism().unwrap(), Mechanism::new(0.0, 45.0, 90.0));
        assert!(cands.iter().all(|c| c.base.depth == 5000.0));
    }

    #[test]
    fn walk_without_axes_returns_the_anchor() {
        let anchor = SolutionRecord::double_couple(
            SourceBase::new(Stage::PointSource),
            Mechanism::new(10.0, 20.0, 30.0),
        );
        let out = SearchGrid::new().walk(&anchor, Stage::Relocation);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].base.stage, Stage::Relocation);
    }

    #[test]
    fn refinement_window_shrinks_and_never_drops_below_one() {
        let mut prev = RefineAxis::shrinking(30.0, 1, 2.0);
        for irun in 2..40 {
            let next = RefineAxis::shrinking(30.0, irun, 2.0);
            assert!(next.span <= prev.span && next.stride <= prev.stride);
            assert!(next.span >= 1.0 && next.stride >= 1.0);
            prev = next;
        }
    }

    #[test]
    fn point_source_refinement_centres_on_best() {
        let cfg = config();
        let mut base = SourceBase::new(Stage::PointSource);
        base.depth = 10000.4;
        base.moment = 2e17;
        let best = SolutionRecord::double_couple(base, Mechanism::new(45.0, 45.0, 90.0));
        // strike step 45 at irun 1, reduction 2: span 45, stride 23 (rounded 22.5)
        let cands = GridWalkGenerator::new(&cfg).refine_point_source(&best, 1);
        let strikes: Vec<f64> = cands
            .iter()
            .map(|c| c.mechanism().unwrap().strike)
            .collect::<Vec<_>>();
        assert_eq!(strikes.first(), Some(&0.0));
        assert!(strikes.contains(&46.0));
        assert!(cands.iter().all(|c| c.base.depth == 10000.0 && c.base.moment == 2e17));
    }

    #[test]
    fn relocation_grid_starts_with_the_anchor() {
        let cfg = config();
        let mut base = SourceBase::new(Stage::PointSource);
        base.depth = 9999.6;
        base.misfit = 0.3;
        let anchor = SolutionRecord::double_couple(base, Mechanism::new(10.0, 50.0, -90.0));
        let cands = GridWalkGenerator::new(&cfg).relocation(&anchor);
        // 5 times x 5 north x 5 east x 3 depths, plus the anchor
        assert_eq!(cands.len(), 1 + 5 * 5 * 5 * 3);
        assert_eq!(cands[0].base.depth, 9999.6);
        assert_eq!(cands[0].base.misfit, crate::domain::MISFIT_SENTINEL);
        assert_eq!(cands[1].base.depth, 9000.0);
        assert_eq!(cands[1].base.time, -2.0);
        assert!(cands.iter().all(|c| c.mechanism() == anchor.mechanism()));
    }

    #[test]
    fn kinematic_grid_size_follows_magnitude_band() {
        let cfg = config();
        let mut base = SourceBase::new(Stage::Relocation);
        base.depth = 10000.0;
        base.moment = 1e17; // Mw ~ 5.23: three radii, three nucleations
        base.rise_time = 3.0;
        let refs = [
            SolutionRecord::double_couple(base, Mechanism::new(10.0, 50.0, -90.0)),
            SolutionRecord::double_couple(base, Mechanism::new(190.0, 40.0, -90.0)),
        ];
        let cands = GridWalkGenerator::new(&cfg).kinematic(&refs, 30000.0);
        // 2 refs x 3 radii x 3 nucleations x 3 velocities
        assert_eq!(cands.len(), 2 * 3 * 3 * 3);
        assert!(cands.iter().all(|c| (c.base.rise_time - 1.0).abs() < 1e-12));
        assert_eq!(cands[0].rupture().unwrap().nucleation_x, -450.0);
    }

    #[test]
    fn nucleation_layout_for_large_events_has_seven_points() {
        let pts = nucleation_points(6.5, 10000.0, 5000.0);
        assert_eq!(pts.len(), 7);
        assert_eq!(pts[0], (0.0, -4500.0));
        assert_eq!(pts[6], (0.0, 4500.0));
    }

    #[test]
    fn moment_tensor_walk_has_64_distinct_candidates() {
        let mut base = SourceBase::new(Stage::PointSource);
        base.moment = 1.0;
        let dc = SolutionRecord::double_couple(base, Mechanism::new(30.0, 60.0, 90.0));
        let mt = GridWalkGenerator::to_moment_tensor(&dc).unwrap();
        let cands = GridWalkGenerator::moment_tensor(&mt);
        assert_eq!(cands.len(), 64);
        assert_ne!(cands[0], cands[63]);
        // last mask keeps every component
        assert_eq!(cands[63].model, mt.model);
    }
}

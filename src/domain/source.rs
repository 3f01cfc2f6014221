//! Candidate source models.
//!
//! A [`SolutionRecord`] is a shared [`SourceBase`] (location, time, moment,
//! misfit, ...) plus one [`SourceModel`] variant per source parameterization.
//! The solver protocol addresses parameters by name; [`SourceParam`] is the
//! closed list of those names and [`SourceKind::parameters`] gives the
//! canonical order used in `set_source_params` and `get_source_subparams`.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use super::types::{MISFIT_SENTINEL, Stage};
use crate::math::mechanism::{self, Mechanism};

/// Source parameter names understood by the solver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SourceParam {
    Time,
    NorthShift,
    EastShift,
    Depth,
    Moment,
    Strike,
    Dip,
    SlipRake,
    RuptureRake,
    LengthA,
    LengthB,
    Width,
    RuptureVelocity,
    RiseTime,
    BorderX,
    BorderY,
    Radius,
    NucleationX,
    NucleationY,
    RelRuptureVelocity,
    M11,
    M12,
    M13,
    M22,
    M23,
    M33,
}

impl SourceParam {
    pub fn protocol_name(self) -> &'static str {
        match self {
            SourceParam::Time => "time",
            SourceParam::NorthShift => "north-shift",
            SourceParam::EastShift => "east-shift",
            SourceParam::Depth => "depth",
            SourceParam::Moment => "moment",
            SourceParam::Strike => "strike",
            SourceParam::Dip => "dip",
            SourceParam::SlipRake => "slip-rake",
            SourceParam::RuptureRake => "rupture-rake",
            SourceParam::LengthA => "length-a",
            SourceParam::LengthB => "length-b",
            SourceParam::Width => "width",
            SourceParam::RuptureVelocity => "rupture-velocity",
            SourceParam::RiseTime => "rise-time",
            SourceParam::BorderX => "bordx",
            SourceParam::BorderY => "bordy",
            SourceParam::Radius => "radius",
            SourceParam::NucleationX => "nuklx",
            SourceParam::NucleationY => "nukly",
            SourceParam::RelRuptureVelocity => "relruptvel",
            SourceParam::M11 => "m11",
            SourceParam::M12 => "m12",
            SourceParam::M13 => "m13",
            SourceParam::M22 => "m22",
            SourceParam::M23 => "m23",
            SourceParam::M33 => "m33",
        }
    }
}

/// Source type keyword of `set_source_params`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SourceKind {
    Bilateral,
    MomentTensor,
    Eikonal,
}

const BILATERAL_PARAMS: [SourceParam; 14] = [
    SourceParam::Time,
    SourceParam::NorthShift,
    SourceParam::EastShift,
    SourceParam::Depth,
    SourceParam::Moment,
    SourceParam::Strike,
    SourceParam::Dip,
    SourceParam::SlipRake,
    SourceParam::RuptureRake,
    SourceParam::LengthA,
    SourceParam::LengthB,
    SourceParam::Width,
    SourceParam::RuptureVelocity,
    SourceParam::RiseTime,
];

const EIKONAL_PARAMS: [SourceParam; 15] = [
    SourceParam::Time,
    SourceParam::NorthShift,
    SourceParam::EastShift,
    SourceParam::Depth,
    SourceParam::Moment,
    SourceParam::Strike,
    SourceParam::Dip,
    SourceParam::SlipRake,
    SourceParam::BorderX,
    SourceParam::BorderY,
    SourceParam::Radius,
    SourceParam::NucleationX,
    SourceParam::NucleationY,
    SourceParam::RelRuptureVelocity,
    SourceParam::RiseTime,
];

const MOMENT_TENSOR_PARAMS: [SourceParam; 11] = [
    SourceParam::Time,
    SourceParam::NorthShift,
    SourceParam::EastShift,
    SourceParam::Depth,
    SourceParam::M11,
    SourceParam::M12,
    SourceParam::M13,
    SourceParam::M22,
    SourceParam::M23,
    SourceParam::M33,
    SourceParam::RiseTime,
];

impl SourceKind {
    pub fn protocol_name(self) -> &'static str {
        match self {
            SourceKind::Bilateral => "bilateral",
            SourceKind::MomentTensor => "moment_tensor",
            SourceKind::Eikonal => "eikonal",
        }
    }

    /// Canonical parameter order for this source type.
    pub fn parameters(self) -> &'static [SourceParam] {
        match self {
            SourceKind::Bilateral => &BILATERAL_PARAMS,
            SourceKind::MomentTensor => &MOMENT_TENSOR_PARAMS,
            SourceKind::Eikonal => &EIKONAL_PARAMS,
        }
    }
}

/// Fields shared by every source parameterization.
///
/// Units: metres for `north`, `east` and `depth`; seconds for `time` and
/// `rise_time`; N·m (times the configured scaling factor) for `moment`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SourceBase {
    pub stage: Stage,
    pub misfit: f64,
    /// Time-domain cross-correlation score, used when comparing planes.
    pub misfit_shift: f64,
    pub north: f64,
    pub east: f64,
    pub time: f64,
    pub depth: f64,
    pub moment: f64,
    pub rise_time: f64,
}

impl SourceBase {
    pub fn new(stage: Stage) -> Self {
        Self {
            stage,
            misfit: MISFIT_SENTINEL,
            misfit_shift: MISFIT_SENTINEL,
            north: 0.0,
            east: 0.0,
            time: 0.0,
            depth: 0.0,
            moment: 0.0,
            rise_time: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MomentTensor {
    /// `m11, m12, m13, m22, m23, m33` (north, east, down).
    pub components: [f64; 6],
    pub iso_pct: f64,
    pub dc_pct: f64,
    pub clvd_pct: f64,
}

/// Eikonal finite-rupture geometry on top of a double couple.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Rupture {
    pub mechanism: Mechanism,
    pub nucleation_x: f64,
    pub nucleation_y: f64,
    pub radius: f64,
    pub rel_rupture_velocity: f64,
    pub border_x: f64,
    pub border_y: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceModel {
    DoubleCouple(Mechanism),
    MomentTensor(MomentTensor),
    KinematicRupture(Rupture),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolutionRecord {
    pub base: SourceBase,
    pub model: SourceModel,
}

impl SolutionRecord {
    pub fn double_couple(base: SourceBase, mechanism: Mechanism) -> Self {
        Self {
            base,
            model: SourceModel::DoubleCouple(mechanism),
        }
    }

    pub fn kind(&self) -> SourceKind {
        match self.model {
            SourceModel::DoubleCouple(_) => SourceKind::Bilateral,
            SourceModel::MomentTensor(_) => SourceKind::MomentTensor,
            SourceModel::KinematicRupture(_) => SourceKind::Eikonal,
        }
    }

    pub fn misfit(&self) -> f64 {
        self.base.misfit
    }

    /// Strike/dip/rake for the variants that carry one.
    pub fn mechanism(&self) -> Option<Mechanism> {
        match self.model {
            SourceModel::DoubleCouple(m) => Some(m),
            SourceModel::KinematicRupture(r) => Some(r.mechanism),
            SourceModel::MomentTensor(_) => None,
        }
    }

    pub fn mechanism_mut(&mut self) -> Option<&mut Mechanism> {
        match &mut self.model {
            SourceModel::DoubleCouple(m) => Some(m),
            SourceModel::KinematicRupture(r) => Some(&mut r.mechanism),
            SourceModel::MomentTensor(_) => None,
        }
    }

    pub fn rupture(&self) -> Option<&Rupture> {
        match &self.model {
            SourceModel::KinematicRupture(r) => Some(r),
            _ => None,
        }
    }

    pub fn with_stage(mut self, stage: Stage) -> Self {
        self.base.stage = stage;
        self
    }

    /// Reset scores so the record can be re-submitted as a fresh candidate.
    pub fn as_candidate(mut self, stage: Stage) -> Self {
        self.base.stage = stage;
        self.base.misfit = MISFIT_SENTINEL;
        self.base.misfit_shift = MISFIT_SENTINEL;
        self
    }

    /// Read a protocol parameter. Parameters the variant does not carry yield `None`.
    pub fn get(&self, param: SourceParam) -> Option<f64> {
        let b = &self.base;
        match param {
            SourceParam::Time => return Some(b.time),
            SourceParam::NorthShift => return Some(b.north),
            SourceParam::EastShift => return Some(b.east),
            SourceParam::Depth => return Some(b.depth),
            SourceParam::RiseTime => return Some(b.rise_time),
            _ => {}
        }
        match (&self.model, param) {
            (SourceModel::DoubleCouple(_) | SourceModel::KinematicRupture(_), SourceParam::Moment) => {
                Some(b.moment)
            }
            (SourceModel::DoubleCouple(m), p) => mechanism_param(m, p),
            (SourceModel::KinematicRupture(r), p) => match p {
                SourceParam::BorderX => Some(r.border_x),
                SourceParam::BorderY => Some(r.border_y),
                SourceParam::Radius => Some(r.radius),
                SourceParam::NucleationX => Some(r.nucleation_x),
                SourceParam::NucleationY => Some(r.nucleation_y),
                SourceParam::RelRuptureVelocity => Some(r.rel_rupture_velocity),
                other => mechanism_param(&r.mechanism, other),
            },
            (SourceModel::MomentTensor(mt), p) => tensor_slot(p).map(|i| mt.components[i]),
        }
    }

    /// Write a protocol parameter. Returns `false` when the variant has no such field.
    pub fn set(&mut self, param: SourceParam, value: f64) -> bool {
        let b = &mut self.base;
        match param {
            SourceParam::Time => b.time = value,
            SourceParam::NorthShift => b.north = value,
            SourceParam::EastShift => b.east = value,
            SourceParam::Depth => b.depth = value,
            SourceParam::RiseTime => b.rise_time = value,
            SourceParam::Moment if !matches!(self.model, SourceModel::MomentTensor(_)) => {
                b.moment = value
            }
            _ => {
                return match &mut self.model {
                    SourceModel::DoubleCouple(m) => set_mechanism_param(m, param, value),
                    SourceModel::KinematicRupture(r) => match param {
                        SourceParam::BorderX => {
                            r.border_x = value;
                            true
                        }
                        SourceParam::BorderY => {
                            r.border_y = value;
                            true
                        }
                        SourceParam::Radius => {
                            r.radius = value;
                            true
                        }
                        SourceParam::NucleationX => {
                            r.nucleation_x = value;
                            true
                        }
                        SourceParam::NucleationY => {
                            r.nucleation_y = value;
                            true
                        }
                        SourceParam::RelRuptureVelocity => {
                            r.rel_rupture_velocity = value;
                            true
                        }
                        other => set_mechanism_param(&mut r.mechanism, other, value),
                    },
                    SourceModel::MomentTensor(mt) => match tensor_slot(param) {
                        Some(i) => {
                            mt.components[i] = value;
                            true
                        }
                        None => false,
                    },
                };
            }
        }
        true
    }

    /// Fold a negative moment into the rake and bring angles into canonical ranges.
    pub fn normalize(&mut self) {
        let moment = self.base.moment;
        if let Some(m) = self.mechanism_mut() {
            let (folded, moment) = mechanism::normalize(*m, moment);
            *m = folded;
            self.base.moment = moment;
        }
    }

    pub fn normalized(mut self) -> Self {
        self.normalize();
        self
    }
}

fn mechanism_param(m: &Mechanism, p: SourceParam) -> Option<f64> {
    match p {
        SourceParam::Strike => Some(m.strike),
        SourceParam::Dip => Some(m.dip),
        SourceParam::SlipRake => Some(m.rake),
        _ => None,
    }
}

fn set_mechanism_param(m: &mut Mechanism, p: SourceParam, value: f64) -> bool {
    match p {
        SourceParam::Strike => m.strike = value,
        SourceParam::Dip => m.dip = value,
        SourceParam::SlipRake => m.rake = value,
        _ => return false,
    }
    true
}

fn tensor_slot(p: SourceParam) -> Option<usize> {
    match p {
        SourceParam::M11 => Some(0),
        SourceParam::M12 => Some(1),
        SourceParam::M13 => Some(2),
        SourceParam::M22 => Some(3),
        SourceParam::M23 => Some(4),
        SourceParam::M33 => Some(5),
        _ => None,
    }
}

/// Stable ascending sort by misfit. NaN misfits compare equal.
pub fn sort_by_misfit(records: &mut [SolutionRecord]) {
    records.sort_by(|a, b| a.base.misfit.partial_cmp(&b.base.misfit).unwrap_or(Ordering::Equal));
}

/// Stable ascending sort by the time-domain score.
pub fn sort_by_misfit_shift(records: &mut [SolutionRecord]) {
    records.sort_by(|a, b| {
        a.base
            .misfit_shift
            .partial_cmp(&b.base.misfit_shift)
            .unwrap_or(Ordering::Equal)
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dc(misfit: f64, strike: f64) -> SolutionRecord {
        let mut base = SourceBase::new(Stage::PointSource);
        base.misfit = misfit;
        SolutionRecord::double_couple(base, Mechanism::new(strike, 45.0, 90.0))
    }

    #[test]
    fn sort_is_stable_for_equal_misfits() {
        let mut v = vec![dc(0.5, 1.0), dc(0.2, 2.0), dc(0.5, 3.0), dc(0.2, 4.0)];
        sort_by_misfit(&mut v);
        let strikes: Vec<f64> = v.iter().filter_map(|r| r.mechanism()).map(|m| m.strike).collect();
        assert_eq!(strikes, vec![2.0, 4.0, 1.0, 3.0]);

        let again = v.clone();
        sort_by_misfit(&mut v);
        assert_eq!(v, again);
    }

    #[test]
    fn get_and_set_follow_the_variant() {
        let mut r = dc(1.0, 10.0);
        assert!(r.set(SourceParam::Strike, 33.0));
        assert_eq!(r.get(SourceParam::Strike), Some(33.0));
        assert!(!r.set(SourceParam::Radius, 1000.0));
        assert_eq!(r.get(SourceParam::M11), None);
        assert!(r.set(SourceParam::Depth, 7000.0));
        assert_eq!(r.base.depth, 7000.0);
    }

    #[test]
    fn every_canonical_parameter_is_readable_on_its_variant() {
        let r = dc(1.0, 10.0);
        let readable = SourceKind::Bilateral
            .parameters()
            .iter()
            .filter(|p| r.get(**p).is_some())
            .count();
        // rupture-rake, length-a/b, width and rupture-velocity are not carried by a point source
        assert_eq!(readable, 9);
    }

    #[test]
    fn normalize_folds_negative_moment() {
        let mut r = dc(1.0, 10.0);
        r.base.moment = -2.0e17;
        r.normalize();
        assert_eq!(r.base.moment, 2.0e17);
        let m = r.mechanism().unwrap();
        assert!((m.rake - -90.0).abs() < 1e-9);
    }
}

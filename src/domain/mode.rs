//! Inversion modes.
//!
//! A mode decides what the solver does with each candidate: either just
//! report misfits (grid scan) or run one or more local Levenberg–Marquardt
//! minimizations over a subset of free parameters. Every mode maps to a
//! [`ModePlan`] whose shape fixes the number of data lines per candidate:
//!
//! ```text
//! [autoshift line]  (mode-dependent)
//! minimize_lm line, get_source_subparams line   (once per step)
//! [get_misfits line] (mode-dependent)
//! get_global_misfit line
//! ```

use serde::{Deserialize, Serialize};

use super::source::SourceParam::{self, *};

const SDS: &[SourceParam] = &[Strike, Dip, SlipRake];
const M: &[SourceParam] = &[Moment];
const M_SDS: &[SourceParam] = &[Moment, Strike, Dip, SlipRake];
const D_SDS: &[SourceParam] = &[Depth, Strike, Dip, SlipRake];
const DM: &[SourceParam] = &[Moment, Depth];
const DM_SDS: &[SourceParam] = &[Moment, Depth, Strike, Dip, SlipRake];
const D: &[SourceParam] = &[Depth];
const T: &[SourceParam] = &[Time];
const NE: &[SourceParam] = &[NorthShift, EastShift];
const RNV: &[SourceParam] = &[Radius, NucleationX, NucleationY, RelRuptureVelocity];
const R: &[SourceParam] = &[Radius];
const RT: &[SourceParam] = &[Radius, RiseTime];
const MT: &[SourceParam] = &[M11, M12, M13, M22, M23, M33];

/// Shape of the solver work per candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ModePlan {
    pub name: &'static str,
    /// Free-parameter set of each `set_source_params_mask` + `minimize_lm` step.
    pub steps: &'static [&'static [SourceParam]],
    /// Starts with `autoshift_ref_seismogram`, which yields one data line.
    pub autoshift: bool,
    /// Ends with `get_misfits` (per-trace misfit/normalization pairs).
    pub per_trace: bool,
}

impl ModePlan {
    pub fn lines_per_candidate(&self) -> usize {
        usize::from(self.autoshift) + 2 * self.steps.len() + usize::from(self.per_trace) + 1
    }

    pub fn is_grid_scan(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Stage 1 (point-source double couple).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PointSourceMode {
    Grid,
    InvertDmsdsok,
    #[default]
    InvertDmsds,
    InvertDmsdst,
    InvertDmsdst2x,
    InvertMsds,
    InvertDm,
    InvertDmt,
    InvertDsds,
    InvertSds,
    InvertM,
}

impl PointSourceMode {
    pub fn plan(self) -> ModePlan {
        let (name, steps): (&'static str, &'static [&'static [SourceParam]]) = match self {
            Self::Grid => ("grid", &[]),
            Self::InvertDmsdsok => ("invert_dmsdsok", &[M, M_SDS, D_SDS, DM_SDS]),
            Self::InvertDmsds => ("invert_dmsds", &[M, DM_SDS]),
            Self::InvertDmsdst => ("invert_dmsdst", &[DM, DM_SDS]),
            Self::InvertDmsdst2x => ("invert_dmsdst2x", &[DM, DM_SDS, SDS]),
            Self::InvertMsds => ("invert_msds", &[M, M_SDS]),
            Self::InvertDm => ("invert_dm", &[DM]),
            Self::InvertDmt => ("invert_dmt", &[DM]),
            Self::InvertDsds => ("invert_dsds", &[D, D_SDS]),
            Self::InvertSds => ("invert_sds", &[SDS]),
            Self::InvertM => ("invert_m", &[M]),
        };
        ModePlan {
            name,
            steps,
            autoshift: false,
            per_trace: false,
        }
    }
}

/// Stage 2 (relocation).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelocationMode {
    #[default]
    Grid,
    InvertTnem,
    InvertTne,
    InvertM,
}

impl RelocationMode {
    pub fn plan(self) -> ModePlan {
        let (name, steps, per_trace): (&'static str, &'static [&'static [SourceParam]], bool) =
            match self {
                Self::Grid => ("grid", &[], true),
                Self::InvertTnem => ("invert_tnem", &[T, NE, M], false),
                Self::InvertTne => ("invert_tne", &[T, NE], false),
                Self::InvertM => ("invert_m", &[M], false),
            };
        ModePlan {
            name,
            steps,
            autoshift: false,
            per_trace,
        }
    }
}

/// Stage 3 (kinematic rupture).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KinematicMode {
    #[default]
    Grid,
    Ccgrid,
    InvertRnv,
    InvertR,
    InvertRt,
}

impl KinematicMode {
    pub fn plan(self) -> ModePlan {
        let (name, steps, per_trace): (&'static str, &'static [&'static [SourceParam]], bool) =
            match self {
                Self::Grid => ("grid", &[], true),
                Self::Ccgrid => ("ccgrid", &[], true),
                Self::InvertRnv => ("invert_rnv", &[RNV], false),
                Self::InvertR => ("invert_r", &[R], false),
                Self::InvertRt => ("invert_rt", &[RT], false),
            };
        ModePlan {
            name,
            steps,
            autoshift: self == Self::Ccgrid,
            per_trace,
        }
    }
}

/// Optional full moment-tensor pass after stage 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MomentTensorMode {
    Grid,
    #[default]
    InvertMt,
}

impl MomentTensorMode {
    pub fn plan(self) -> ModePlan {
        match self {
            Self::Grid => ModePlan {
                name: "grid",
                steps: &[],
                autoshift: false,
                per_trace: false,
            },
            Self::InvertMt => ModePlan {
                name: "invert_mt",
                steps: &[MT],
                autoshift: false,
                per_trace: false,
            },
        }
    }
}

/// Any stage's mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InversionMode {
    PointSource(PointSourceMode),
    Relocation(RelocationMode),
    Kinematic(KinematicMode),
    MomentTensor(MomentTensorMode),
}

impl InversionMode {
    pub fn plan(self) -> ModePlan {
        match self {
            Self::PointSource(m) => m.plan(),
            Self::Relocation(m) => m.plan(),
            Self::Kinematic(m) => m.plan(),
            Self::MomentTensor(m) => m.plan(),
        }
    }

    pub fn lines_per_candidate(self) -> usize {
        self.plan().lines_per_candidate()
    }
}

/// Plan for a plain `get_misfits` evaluation (bootstrap linearization sets).
pub const PER_TRACE_ONLY: ModePlan = ModePlan {
    name: "get_misfits",
    steps: &[],
    autoshift: false,
    per_trace: true,
};

/// Plan for the time-domain comparison of nodal planes.
pub const TIME_COMPARISON: ModePlan = ModePlan {
    name: "compare_in_time",
    steps: &[],
    autoshift: true,
    per_trace: false,
};

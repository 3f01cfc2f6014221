//! Bootstrap uncertainty estimation.
//!
//! - `resample`: per-trace misfits, seeded draws, winners per draw
//! - `interval`: normal / empirical confidence intervals
//! - `families`: stage-specific tested sets and `bootstrap.dat` sections

pub mod families;
pub mod interval;
pub mod resample;

pub use families::*;
pub use interval::*;
pub use resample::*;

//! Numerical helpers: double-couple geometry, least squares, statistics.

pub mod mechanism;
pub mod ols;
pub mod stats;

pub use mechanism::{Mechanism, moment_magnitude};
pub use ols::*;

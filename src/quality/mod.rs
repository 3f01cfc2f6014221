//! Trace screening.
//!
//! - data-quality tags from amplitude and noise probes (`check`)
//! - exclusion of poorly fitting traces before stage 3 (`stations`)

pub mod check;
pub mod stations;

pub use check::*;
pub use stations::*;

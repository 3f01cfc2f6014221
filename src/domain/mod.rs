//! Domain types used throughout the inversion.
//!
//! This module defines:
//!
//! - stages, traces, taper windows and search axes (`types`)
//! - candidate source models (`source`)
//! - per-stage inversion modes and their solver plans (`mode`)
//! - the validated run configuration (`config`)

pub mod config;
pub mod mode;
pub mod source;
pub mod types;

pub use config::*;
pub use mode::*;
pub use source::*;
pub use types::*;

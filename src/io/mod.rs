//! Input/output helpers.
//!
//! - trace table ingest + validation (`ingest`)
//! - precomputed taper windows (`tapers`)
//! - run artifacts and the JSON summary (`export`)

pub mod export;
pub mod ingest;
pub mod tapers;

pub use export::*;
pub use ingest::*;
pub use tapers::*;

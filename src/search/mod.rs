//! Candidate generation and the per-stage refinement loop.

pub mod grid;
pub mod refine;

pub use grid::*;
pub use refine::*;

//! `rapidinv` library crate.
//!
//! A staged seismic source inversion driven through an external waveform
//! misfit solver:
//!
//! - stage 1: point-source depth, moment and mechanism
//! - stage 2: centroid relocation in time and space
//! - stage 3: kinematic (eikonal) rupture
//!
//! The binary (`rapidinv`) is a thin wrapper so the pipeline can be driven by
//! tests with a scripted solver.

pub mod analysis;
pub mod app;
pub mod bootstrap;
pub mod cli;
pub mod domain;
pub mod error;
pub mod io;
pub mod math;
pub mod post;
pub mod quality;
pub mod report;
pub mod search;
pub mod solver;

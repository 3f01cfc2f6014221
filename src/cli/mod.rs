//! Command-line parsing for the `rapidinv` source inversion.
//!
//! Parsing and dispatch stay here; everything the commands do lives in the
//! library modules.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "rapidinv", version, about = "Rapid three-stage seismic source inversion")]
pub struct Cli {
    /// More log output (`-v` debug, `-vv` trace). `RUST_LOG` overrides.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Mirror the log into this file (plain text).
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run every configured stage and write the artifacts.
    Run(RunArgs),
    /// Validate a configuration and its input tables; print the planned grid sizes.
    Check(ConfigArgs),
    /// Moment magnitude of a scalar moment (N·m).
    Mw(MwArgs),
}

#[derive(Debug, Args, Clone)]
pub struct ConfigArgs {
    /// Inversion configuration (JSON).
    #[arg(short, long, default_value = "rapidinv.json")]
    pub config: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct RunArgs {
    #[command(flatten)]
    pub config: ConfigArgs,

    /// Seed of the bootstrap resampling; overrides the configuration.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override the inversion (output) directory.
    #[arg(long)]
    pub inversion_dir: Option<PathBuf>,

    /// Override the number of stages to run (1-3).
    #[arg(long)]
    pub stages: Option<u8>,
}

#[derive(Debug, Args, Clone)]
pub struct MwArgs {
    /// Scalar moment in N·m.
    pub moment: f64,

    /// Factor applied to the moment first (synthetic database units).
    #[arg(long, default_value_t = 1.0)]
    pub scaling_factor: f64,
}

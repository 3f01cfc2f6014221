//! Top-level application orchestration.
//!
//! `src/main.rs` only maps errors to exit codes; this module:
//! - parses CLI arguments and sets up logging
//! - loads the configuration, trace table and taper table
//! - drives the staged inversion against the solver binary
//! - prints the run summary

use std::fs::File;
use std::sync::Mutex;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::MakeWriterExt;

use crate::cli::{Cli, Command, ConfigArgs, MwArgs, RunArgs};
use crate::domain::InversionConfig;
use crate::error::AppError;
use crate::io::{StaticTapers, load_traces};
use crate::search::GridWalkGenerator;
use crate::solver::{ProcessMinimizer, TaperProvider};

pub mod pipeline;

pub use pipeline::{Pipeline, RunOutput, run_inversion};

/// Entry point for the `rapidinv` binary.
pub fn run() -> Result<(), AppError> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_file.as_deref())?;

    match cli.command {
        Command::Run(args) => handle_run(args),
        Command::Check(args) => handle_check(args),
        Command::Mw(args) => handle_mw(args),
    }
}

fn init_logging(verbose: u8, log_file: Option<&std::path::Path>) -> Result<(), AppError> {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_target(false);
    let installed = match log_file {
        Some(path) => {
            let file = File::create(path).map_err(|e| {
                AppError::io(format!("failed to create log file '{}': {e}", path.display()))
            })?;
            builder
                .with_ansi(false)
                .with_writer(std::io::stderr.and(Mutex::new(file)))
                .try_init()
        }
        None => builder.with_writer(std::io::stderr).try_init(),
    };
    // a subscriber installed by an embedding program wins
    if let Err(e) = installed {
        debug!("keeping the existing tracing subscriber: {e}");
    }
    Ok(())
}

fn load_config(args: &ConfigArgs) -> Result<InversionConfig, AppError> {
    let config = InversionConfig::load(&args.config)?;
    info!(
        config = %args.config.display(),
        stages = config.num_stages,
        processors = config.num_processors,
        "configuration loaded"
    );
    Ok(config)
}

fn handle_run(args: RunArgs) -> Result<(), AppError> {
    let mut config = load_config(&args.config)?;
    if let Some(seed) = args.seed {
        config.bootstrap.seed = Some(seed);
    }
    if let Some(dir) = args.inversion_dir {
        config.inversion_dir = dir;
    }
    if let Some(n) = args.stages {
        config.num_stages = n;
    }
    config.validate()?;

    let ingest = load_traces(&config.data.traces)?;
    for e in &ingest.row_errors {
        tracing::warn!(line = e.line, "skipped trace row: {}", e.message);
    }
    info!(
        traces = ingest.traces.len(),
        rows = ingest.rows_read,
        skipped = ingest.row_errors.len(),
        "trace table loaded"
    );

    let tapers = match &config.data.tapers {
        Some(path) => {
            let t = StaticTapers::load(path)?;
            info!(traces = t.len(), "taper table loaded");
            Some(t)
        }
        None => None,
    };
    let minimizer = ProcessMinimizer::new(&config.minimizer, &config.inversion_dir);
    let output = run_inversion(
        &config,
        &minimizer,
        tapers.as_ref().map(|t| t as &dyn TaperProvider),
        ingest.traces,
    )?;

    println!("{}", crate::report::format_run_summary(&output.summary));
    Ok(())
}

fn handle_check(args: ConfigArgs) -> Result<(), AppError> {
    let config = load_config(&args)?;
    let ingest = load_traces(&config.data.traces)?;
    let grid = GridWalkGenerator::new(&config);
    let initial = grid.point_source();
    println!("configuration '{}' is valid", args.config.display());
    println!(
        "traces: {} usable of {} rows",
        ingest.traces.len(),
        ingest.rows_read
    );
    for e in &ingest.row_errors {
        println!("  line {}: {}", e.line, e.message);
    }
    if let Some(path) = &config.data.tapers {
        let tapers = StaticTapers::load(path)?;
        println!("tapers: {} traces", tapers.len());
    }
    println!(
        "stage 1: {} initial candidates, mode {}, {} loops",
        initial.len(),
        config.point_source.mode.plan().name,
        config.point_source.loops
    );
    if config.num_stages >= 2 {
        let n = initial.first().map_or(0, |best| grid.relocation(best).len());
        println!(
            "stage 2: {n} initial candidates, mode {}, {} loops",
            config.relocation.mode.plan().name,
            config.relocation.loops
        );
    }
    if config.num_stages >= 3 {
        println!(
            "stage 3: mode {}, {} loops (grid depends on the stage-2 solution)",
            config.kinematic.mode.plan().name,
            config.kinematic.loops
        );
    }
    Ok(())
}

fn handle_mw(args: MwArgs) -> Result<(), AppError> {
    if !(args.moment.is_finite() && args.moment > 0.0) {
        return Err(AppError::config(format!(
            "moment must be positive (got {})",
            args.moment
        )));
    }
    let mw = crate::math::moment_magnitude(args.scaling_factor * args.moment);
    println!("{mw:.2}");
    Ok(())
}

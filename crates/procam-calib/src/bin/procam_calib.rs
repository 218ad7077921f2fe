use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::{info, LevelFilter};
use procam_calib::{read_measurements, CalibrationConfig, CalibrationReport, ReprojectionSolver};

#[cfg(feature = "tracing")]
use tracing_log::LogTracer;

#[derive(Parser, Debug)]
#[command(name = "procam-calib", version, about = "Projector-camera calibration tools")]
struct Cli {
    /// Verbose logging (debug level). Otherwise `PROCAM_CALIB_LOG` picks the level.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted tracing output (tracing builds only).
    #[arg(long, global = true)]
    json_log: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit the camera-to-projector matrix to saved measurements.
    Solve {
        /// Measurements JSON (array of `{ camera_points, board_points }`).
        measurements: PathBuf,
        /// Calibration config; only the `solver` section is used.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Write the report JSON here.
        #[arg(long, short)]
        output: Option<PathBuf>,
        /// Fail if the optimizer did not converge.
        #[arg(long)]
        require_convergence: bool,
    },
    /// Write the default configuration.
    DefaultConfig {
        /// Output path; prints to stdout when omitted.
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    match cli.command {
        Command::Solve {
            measurements,
            config,
            output,
            require_convergence,
        } => run_solve(measurements, config, output, require_convergence),
        Command::DefaultConfig { output } => run_default_config(output),
    }
}

#[cfg(not(feature = "tracing"))]
fn init_logging(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        procam_calib::core::level_from_env(LevelFilter::Info)
    };
    procam_calib::core::init_with_level(level)?;
    if cli.json_log {
        log::warn!("--json-log requires a build with the `tracing` feature");
    }
    Ok(())
}

#[cfg(feature = "tracing")]
fn init_logging(cli: &Cli) -> Result<(), Box<dyn std::error::Error>> {
    procam_calib::core::init_tracing(cli.json_log);
    // The subscriber may already have bridged `log`; ignore that case.
    let _ = LogTracer::init();
    if cli.verbose {
        log::set_max_level(LevelFilter::Debug);
    }
    Ok(())
}

fn run_solve(
    measurements: PathBuf,
    config: Option<PathBuf>,
    output: Option<PathBuf>,
    require_convergence: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut cfg = match config {
        Some(path) => CalibrationConfig::load_json(path)?,
        None => CalibrationConfig::default(),
    };
    cfg.solver.require_convergence |= require_convergence;

    let snapshot = read_measurements(&measurements)?;
    info!(
        "loaded {} measurements ({} points) from {}",
        snapshot.len(),
        snapshot.point_count(),
        measurements.display()
    );

    let fit = ReprojectionSolver::new(cfg.solver).solve_snapshot(&snapshot)?;
    let report = CalibrationReport::new(&snapshot, fit);

    println!("rms: {:.6}", report.fit.rms);
    println!(
        "converged: {} ({})",
        report.fit.report.converged, report.fit.report.termination
    );
    for row in &report.matrix {
        println!("{:>14.8} {:>14.8} {:>14.8} {:>14.8}", row[0], row[1], row[2], row[3]);
    }

    if let Some(path) = output {
        report.write_json(&path)?;
        info!("report written to {}", path.display());
    }
    Ok(())
}

fn run_default_config(output: Option<PathBuf>) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = CalibrationConfig::default();
    match output {
        Some(path) => {
            cfg.write_json(&path)?;
            info!("default config written to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&cfg)?),
    }
    Ok(())
}

//! Runs the self locator against a simulated robot walking on the field.
//!
//! Without `--config` the default estimator configuration is used. Results are written as one
//! CSV row per frame and a short error summary is logged at the end.
use std::error::Error;
use std::io::Write;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::{error, info};

use selflocator::sim::{FieldSimulator, SimulationConfig, SimulationRecord, SimulationSummary, run_simulation};
use selflocator::{PoseCalculatorType, SelfLocator, SelfLocatorConfig};

const LONG_ABOUT: &str = "Particle filter self-localization on a simulated field.

A robot walks a circle around the center spot while a simulated camera reports goal posts, the \
center circle, field lines and their intersections. The estimator processes one frame at a \
time and the estimated pose is compared against the ground truth. Use --kidnap-at to teleport \
the robot mid-run and watch the filter recover.";

#[derive(Parser)]
#[command(author, version, about = "Particle filter self-localization for legged robots.", long_about = LONG_ABOUT)]
struct Cli {
    /// Estimator configuration file (TOML/JSON/YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,

    /// Number of frames to simulate
    #[arg(short, long, default_value_t = 600)]
    frames: usize,

    /// Seed for both the simulator and the estimator
    #[arg(short, long, default_value_t = 42)]
    seed: u64,

    /// Pose extraction strategy, overrides the configuration file
    #[arg(short, long)]
    pose_calculator: Option<String>,

    /// Frame at which the robot is kidnapped
    #[arg(short, long)]
    kidnap_at: Option<usize>,

    /// CSV file for the per-frame results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,
}

#[derive(Subcommand, Clone)]
enum Command {
    #[command(name = "config", about = "Write the default configuration to a file")]
    CreateConfig {
        /// Target path, the format follows the extension
        #[arg(value_parser)]
        path: PathBuf,
    },
}

fn parse_level(log_level: &str) -> log::LevelFilter {
    match log_level.parse::<log::LevelFilter>() {
        Ok(level) => level,
        Err(_) => {
            eprintln!("Unknown log level '{log_level}', using info");
            log::LevelFilter::Info
        }
    }
}

/// Log at `log_level` for this crate and at warn for dependencies. Timestamps are wall clock,
/// frame times appear in the messages themselves.
fn init_logger(log_level: &str, log_file: Option<&PathBuf>) -> Result<(), Box<dyn Error>> {
    let level = parse_level(log_level);
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(log::LevelFilter::Warn.min(level))
        .filter_module(env!("CARGO_CRATE_NAME"), level)
        .format(|buf, record| {
            let module = record
                .module_path()
                .and_then(|path| path.rsplit("::").next())
                .unwrap_or_default();
            writeln!(
                buf,
                "{} {:<5} {:>14}: {}",
                chrono::Local::now().format("%H:%M:%S%.3f"),
                record.level(),
                module,
                record.args()
            )
        });

    if let Some(path) = log_file {
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }

    builder.try_init()?;
    Ok(())
}

fn run(cli: &Cli) -> Result<(), Box<dyn Error>> {
    if let Some(Command::CreateConfig { path }) = &cli.command {
        SelfLocatorConfig::default().to_file(path)?;
        info!("Wrote default configuration to {}", path.display());
        return Ok(());
    }

    let mut config = match &cli.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            SelfLocatorConfig::from_file(path)?
        }
        None => SelfLocatorConfig::default(),
    };
    if let Some(name) = &cli.pose_calculator {
        config.pose_calculator = name.parse::<PoseCalculatorType>()?;
    }

    let simulation = SimulationConfig {
        frames: cli.frames,
        seed: cli.seed,
        kidnap_at: cli.kidnap_at,
        ..Default::default()
    };
    info!(
        "Simulating {} frames with {} particles, pose calculator {}",
        simulation.frames, config.number_of_samples, config.pose_calculator
    );

    let mut simulator = FieldSimulator::new(&config.field, &simulation);
    let mut locator = SelfLocator::new_with_seed(config, cli.seed)?;
    let records = run_simulation(&mut locator, &mut simulator, simulation.frames);

    if let Some(output) = &cli.output {
        SimulationRecord::to_csv(&records, output)?;
        info!("Results written to {}", output.display());
    }

    let summary = SimulationSummary::from_records(&records);
    let mut report = Vec::new();
    summary.write_report(&mut report)?;
    for line in String::from_utf8_lossy(&report).lines() {
        info!("{line}");
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = init_logger(&cli.log_level, cli.log_file.as_ref()) {
        eprintln!("Failed to initialize logger: {}", e);
    }
    if let Err(e) = run(&cli) {
        error!("{e}");
        std::process::exit(1);
    }
}

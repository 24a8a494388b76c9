//! Daily reanalysis archiver.
//!
//! Regrids daily lat-lon fields onto HEALPix and appends them to a Zarr
//! archive, one day at a time, skipping anything already archived.

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use grid_processor::ArchiveInspector;
use ingestion::{
    source, Ledger, PipelineConfig, PipelineDriver, Request, RunReport, Scheduler, SourceConfig,
    SyntheticFieldSource,
};
use serde::Serialize;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "archiver")]
#[command(about = "Regrid daily reanalysis fields onto HEALPix and archive them in Zarr")]
struct Args {
    /// Configuration file path
    #[arg(short, long, env = "ARCHIVER_CONFIG")]
    config: Option<PathBuf>,

    /// Log level
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Log format: json or pretty
    #[arg(long, default_value = "json")]
    log_format: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Process one day, a date range, or resume (the default)
    Process {
        /// Single day (YYYY-MM-DD)
        #[arg(conflicts_with_all = ["start", "resume"])]
        day: Option<NaiveDate>,

        /// First day of a range
        #[arg(long, requires = "end", conflicts_with = "resume")]
        start: Option<NaiveDate>,

        /// Last day of a range (inclusive)
        #[arg(long, requires = "start")]
        end: Option<NaiveDate>,

        /// Resume from the earliest incomplete day
        #[arg(long)]
        resume: bool,
    },

    /// Show archive contents and ledger statistics
    Status,

    /// Write synthetic raw daily stores for testing
    Synthesize {
        #[arg(long)]
        start: NaiveDate,

        #[arg(long)]
        end: NaiveDate,

        /// Output directory (default: the configured raw data directory)
        #[arg(long)]
        out_dir: Option<PathBuf>,

        /// Mesh spacing in degrees
        #[arg(long, default_value = "2.5")]
        grid_step: f64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment from .env file if present
    dotenvy::dotenv().ok();

    let args = Args::parse();
    init_tracing(&args.log_level, &args.log_format)?;

    let config = PipelineConfig::load(args.config.as_deref())
        .context("Failed to load configuration")?;

    match args.command {
        Command::Process {
            day,
            start,
            end,
            resume: _,
        } => {
            let request = match (day, start, end) {
                (Some(day), _, _) => Request::Day(day),
                (None, Some(start), Some(end)) => Request::Range { start, end },
                _ => Request::Resume,
            };
            let report = process(&config, request).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.is_success() {
                std::process::exit(1);
            }
        }
        Command::Status => status(&config).await?,
        Command::Synthesize {
            start,
            end,
            out_dir,
            grid_step,
        } => synthesize(&config, start, end, out_dir, grid_step)?,
    }

    Ok(())
}

fn init_tracing(log_level: &str, log_format: &str) -> Result<()> {
    let level = match log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    let builder = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr);

    match log_format {
        "pretty" => tracing::subscriber::set_global_default(builder.pretty().finish())?,
        _ => tracing::subscriber::set_global_default(
            builder.with_thread_ids(true).json().finish(),
        )?,
    }
    Ok(())
}

async fn process(config: &PipelineConfig, request: Request) -> Result<RunReport> {
    info!(request = ?request, "Starting archiver");

    let driver = PipelineDriver::from_config(config).await?;
    let report = driver.run(request).await.context("Run aborted")?;

    for (day, reason) in &report.failed {
        warn!(day = %day, reason = %reason, "Day not archived");
    }
    Ok(report)
}

#[derive(Debug, Serialize)]
struct StatusReport {
    archive: PathBuf,
    groups: Vec<serde_json::Value>,
    outstanding_days: Vec<NaiveDate>,
    ledger: Option<ingestion::LedgerStats>,
}

async fn status(config: &PipelineConfig) -> Result<()> {
    let inspector = ArchiveInspector::new(config.archive_path.clone());
    let scheduler = Scheduler::from_config(config)?;

    let mut groups = Vec::new();
    for level in scheduler.levels() {
        match inspector.summary(level)? {
            Some(summary) => groups.push(serde_json::to_value(&summary)?),
            None => groups.push(serde_json::json!({
                "nside": level.nside(),
                "time_count": 0,
            })),
        }
    }

    let state = inspector.snapshot(scheduler.levels())?;
    let today = chrono::Utc::now().date_naive();
    let outstanding_days = scheduler
        .outstanding_days(Request::Resume, &state, today)?
        .into_iter()
        .filter(|p| !p.is_satisfied())
        .map(|p| p.day)
        .collect();

    let ledger = match &config.ledger_path {
        Some(path) if path.exists() => Some(Ledger::open(path).await?.stats().await?),
        _ => None,
    };

    let report = StatusReport {
        archive: config.archive_path.clone(),
        groups,
        outstanding_days,
        ledger,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn synthesize(
    config: &PipelineConfig,
    start: NaiveDate,
    end: NaiveDate,
    out_dir: Option<PathBuf>,
    grid_step: f64,
) -> Result<()> {
    if start > end {
        bail!("start {} is after end {}", start, end);
    }
    let out_dir = match (out_dir, &config.source) {
        (Some(dir), _) => dir,
        (None, SourceConfig::Zarr { raw_dir }) => raw_dir.clone(),
        (None, SourceConfig::Synthetic { .. }) => {
            bail!("--out-dir is required when the configured source is synthetic")
        }
    };
    std::fs::create_dir_all(&out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;

    let generator = SyntheticFieldSource::new(
        config.variable.clone(),
        config.units.clone(),
        config.hours.clone(),
        config.pressure_levels.clone(),
        grid_step,
    );
    let target = ingestion::ZarrFieldSource::new(out_dir, config.variable.clone());

    for day in start.iter_days().take_while(|d| *d <= end) {
        let field = generator.generate(day)?;
        source::write_raw_field(&target.path_for(day), &field)?;
    }
    info!(start = %start, end = %end, "Synthesized raw stores");
    Ok(())
}

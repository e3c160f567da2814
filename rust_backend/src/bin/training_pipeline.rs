//! Training pipeline command line.
//!
//! # Usage
//!
//! ```bash
//! # Build the feature dataset
//! training-pipeline run --source data/records.jsonl --destination data/features
//!
//! # Read records from standard input with a 30 second I/O limit
//! cat records.jsonl | training-pipeline run --source - --destination out --timeout 30s
//!
//! # Check an artifact
//! training-pipeline inspect data/features
//!
//! # Consolidate one device export
//! training-pipeline summarize --summary summary.json --laps laps.json \
//!     --samples samples.json --output training_summary.json
//! ```
//!
//! # Environment Variables
//!
//! - `RUST_LOG`: Log filter directives, e.g. `debug` or
//!   `training_analytics=debug` (default: info)

use std::env;
use std::path::PathBuf;
use std::process;
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use training_analytics::activity::{
    export_summary, ActivityConsolidator, ActivityExport, ConsolidationSettings,
};
use training_analytics::config::{parse_duration, PipelineConfig};
use training_analytics::io::manifest::{read_manifest, SCHEMA_VERSION};
use training_analytics::{ErrorKind, PipelineRun, PipelineRunner, RunState};

/// How long to wait for an abandoned blocking read before exiting anyway
const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

#[derive(Parser, Debug)]
#[command(
    name = "training-pipeline",
    version,
    about = "Turn training-activity logs into a feature dataset"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Load, validate and aggregate records, then publish the dataset
    Run(RunArgs),
    /// Print an artifact's manifest and whether this build can read it
    Inspect {
        /// Artifact directory
        dir: PathBuf,
    },
    /// Consolidate one activity export into a heart-rate summary
    Summarize(SummarizeArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Record file (.jsonl, .ndjson, .json, .csv) or `-` for stdin
    #[arg(long)]
    source: Option<String>,

    /// Output directory
    #[arg(long)]
    destination: Option<PathBuf>,

    /// Configuration file (default: pipeline.toml if present)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bucket width, e.g. 1d, 12h, 3600
    #[arg(long, value_parser = parse_duration)]
    bucket_width: Option<Duration>,

    /// Number of buckets in the trailing window
    #[arg(long)]
    rolling_window: Option<usize>,

    /// Fail when no record passes validation
    #[arg(long)]
    strict: bool,

    /// Limit for loading and writing, or `off`
    #[arg(long, value_parser = parse_limit)]
    timeout: Option<Limit>,

    /// Compute features on the calling thread only
    #[arg(long)]
    sequential: bool,
}

#[derive(Args, Debug)]
struct SummarizeArgs {
    #[arg(long)]
    summary: PathBuf,

    #[arg(long)]
    laps: PathBuf,

    #[arg(long)]
    samples: PathBuf,

    /// Where to write the training summary JSON
    #[arg(long)]
    output: PathBuf,

    /// Largest accepted jump between neighbouring heart-rate values
    #[arg(long)]
    outlier_threshold: Option<f64>,

    /// Heart-rate streams per lap
    #[arg(long, default_value = "2")]
    samples_per_lap: usize,
}

#[derive(Debug, Clone, Copy)]
struct Limit(Option<Duration>);

fn parse_limit(text: &str) -> Result<Limit, String> {
    match text.trim().to_lowercase().as_str() {
        "off" | "none" => Ok(Limit(None)),
        other => parse_duration(other).map(|d| Limit((!d.is_zero()).then_some(d))),
    }
}

/// Filter from `RUST_LOG`-style directives, falling back to INFO when unset or invalid
fn log_filter(directives: Option<&str>) -> EnvFilter {
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new("info"))
}

fn main() {
    let directives = env::var(EnvFilter::DEFAULT_ENV).ok();
    FmtSubscriber::builder()
        .with_env_filter(log_filter(directives.as_deref()))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let code = match cli.command {
        Command::Run(args) => run_command(args),
        Command::Inspect { dir } => inspect_command(dir),
        Command::Summarize(args) => summarize_command(args),
    };
    process::exit(code);
}

fn run_command(args: RunArgs) -> i32 {
    let config = match build_config(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!(
                "error: stage={} kind={}: {:#}",
                RunState::Idle,
                ErrorKind::InvalidConfiguration,
                e
            );
            return 1;
        }
    };

    let runner = match PipelineRunner::new(config) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("error: stage={} kind={}: {}", RunState::Idle, e.kind(), e);
            return 1;
        }
    };

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("error: failed to start runtime: {}", e);
            return 1;
        }
    };

    let run = runtime.block_on(runner.run());
    // A timed-out stdin read may still hold a blocking thread
    runtime.shutdown_timeout(SHUTDOWN_GRACE);

    report(&run)
}

fn build_config(args: &RunArgs) -> anyhow::Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::from_file(path)?,
        None => PipelineConfig::from_default_location()?.unwrap_or_default(),
    };

    if let Some(source) = &args.source {
        config.pipeline.source = source.clone();
    }
    if let Some(destination) = &args.destination {
        config.pipeline.destination = destination.clone();
    }
    if let Some(width) = args.bucket_width {
        config.features.bucket_width = width;
    }
    if let Some(window) = args.rolling_window {
        config.features.rolling_window = window;
    }
    if let Some(Limit(limit)) = args.timeout {
        config.pipeline.timeout = limit;
    }
    if args.strict {
        config.pipeline.strict = true;
    }
    if args.sequential {
        config.features.parallel = false;
    }

    config.validate().context("invalid pipeline configuration")?;
    Ok(config)
}

fn report(run: &PipelineRun) -> i32 {
    let stats = run.stats();
    let counts = format!(
        "read={} skipped={} valid={} rejected={} (missing_required_field={} out_of_range_timestamp={} non_positive_duration={} unknown_activity_type={})",
        stats.read,
        stats.skipped,
        stats.valid,
        stats.rejected,
        stats.rejections.missing_required_field,
        stats.rejections.out_of_range_timestamp,
        stats.rejections.non_positive_duration,
        stats.rejections.unknown_activity_type,
    );

    if let Some(failure) = run.failure() {
        eprintln!(
            "run {} failed: stage={} kind={}: {}",
            run.run_id(),
            failure.stage,
            failure.kind,
            failure.message
        );
        eprintln!("counts so far: {}", counts);
        return 1;
    }

    for warning in run.warnings() {
        eprintln!("warning: kind={}: {}", warning.kind, warning.message);
    }

    println!("run {} {}", run.run_id(), run.state());
    println!("{}", counts);
    println!("feature rows: {}", run.feature_rows());
    if let Some(artifact) = run.artifact() {
        println!("artifact: {}", artifact.display());
    }
    0
}

fn inspect_command(dir: PathBuf) -> i32 {
    let manifest = match read_manifest(&dir) {
        Ok(manifest) => manifest,
        Err(e) => {
            eprintln!("error: kind={}: {}", e.kind(), e);
            return 1;
        }
    };

    match serde_json::to_string_pretty(&manifest) {
        Ok(json) => println!("{}", json),
        Err(e) => {
            eprintln!("error: failed to render manifest: {}", e);
            return 1;
        }
    }

    match manifest.check_compatible(SCHEMA_VERSION) {
        Ok(()) => {
            println!("compatible: yes (schema version {})", SCHEMA_VERSION);
            0
        }
        Err(e) => {
            println!("compatible: no ({})", e);
            1
        }
    }
}

fn summarize_command(args: SummarizeArgs) -> i32 {
    match summarize(&args) {
        Ok(laps) => {
            info!("Consolidated {} laps into {}", laps, args.output.display());
            0
        }
        Err(e) => {
            eprintln!("error: {:#}", e);
            1
        }
    }
}

fn summarize(args: &SummarizeArgs) -> anyhow::Result<usize> {
    let export = ActivityExport::load(&args.summary, &args.laps, &args.samples)
        .context("failed to load activity export")?;

    let settings = ConsolidationSettings {
        outlier_threshold: args.outlier_threshold.unwrap_or(f64::INFINITY),
        samples_per_lap: args.samples_per_lap,
    };
    let summary = ActivityConsolidator::new(settings)?.consolidate(&export);
    export_summary(&summary, &args.output)?;

    Ok(summary.laps.len())
}

//! Trainlog CLI: run and inspect crash-resilient training experiments.

mod commands;
mod demo;
mod logging;

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Trainlog: experiment directories that survive crashes
#[derive(Parser, Debug)]
#[command(name = "trainlog", version, about, long_about = None)]
struct Cli {
    /// Workspace directory (experiments and trainlog.toml are resolved against it)
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start or resume an experiment driven by the built-in regression loop
    Run(RunArgs),
    /// Show checkpoints, progress and the latest pointer of an experiment
    Status {
        /// Experiment root directory
        path: PathBuf,
    },
    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args, Debug, Clone, PartialEq)]
struct RunArgs {
    /// Experiment name, created inside the configured experiments directory
    name: String,

    /// Total number of iterations
    #[arg(long)]
    max_iters: Option<u64>,

    /// Log losses every N iterations
    #[arg(long)]
    tick: Option<u64>,

    /// Re-render plots every N iterations
    #[arg(long)]
    progress: Option<u64>,

    /// Write a checkpoint every N iterations
    #[arg(long)]
    checkpoint: Option<u64>,

    /// Comment describing what changed since the previous run
    #[arg(short, long)]
    comment: Option<String>,

    /// Seed for the synthetic dataset
    #[arg(long, default_value = "0")]
    seed: u64,
}

#[derive(clap::Subcommand, Debug, PartialEq)]
enum ConfigAction {
    /// Write a default trainlog.toml into the workspace
    Init,
    /// Print the effective configuration
    Show,
}

fn main() -> anyhow::Result<()> {
    // Load .env file if present
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();

    // Set up tracing: human-readable stderr + JSON file logging
    let filter = match cli.verbose {
        0 if cli.quiet => "error",
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let stderr_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));
    let stderr_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(stderr_filter);

    let log_dir = directories::ProjectDirs::from("dev", "trainlog", "trainlog")
        .map(|d| d.data_dir().join("logs"))
        .unwrap_or_else(|| PathBuf::from("."));
    let _ = std::fs::create_dir_all(&log_dir);
    let file_appender = tracing_appender::rolling::daily(&log_dir, "trainlog.log");
    let (non_blocking, _guard) = tracing_appender::non_blocking(file_appender);
    let json_layer = tracing_subscriber::fmt::layer()
        .json()
        .with_writer(non_blocking)
        .with_filter(EnvFilter::new("debug"));

    // Filled in with `<root>/trainlog.log` once a run has opened its experiment.
    let (experiment_layer, experiment_log) = logging::ExperimentLog::layer();

    tracing_subscriber::registry()
        .with(experiment_layer)
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let workspace = cli
        .workspace
        .canonicalize()
        .unwrap_or_else(|_| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

    commands::handle_command(cli.command, &workspace, Some(&experiment_log))
}

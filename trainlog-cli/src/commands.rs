//! CLI subcommand handlers.

use anyhow::Context;
use serde::Serialize;
use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use trainlog_core::artifacts::{PROGRESS_FILE, TRAINING_STATE_FILE};
use trainlog_core::config::WORKSPACE_CONFIG_FILE;
use trainlog_core::session::CHECKPOINTS_DIR;
use trainlog_core::{
    DirStack, ExperimentSession, TrainingState, TrainlogConfig, TrainlogError, latest_checkpoint,
    list_checkpoints, load_config, resolve_latest,
};

use crate::demo::{self, HeldOut, LinearRegression, Weights};
use crate::logging::ExperimentLog;
use crate::{Commands, ConfigAction, RunArgs};

/// Handle a CLI subcommand.
pub fn handle_command(
    command: Commands,
    workspace: &Path,
    log: Option<&ExperimentLog>,
) -> anyhow::Result<()> {
    match command {
        Commands::Run(args) => handle_run(args, workspace, log),
        Commands::Status { path } => handle_status(&workspace.join(path)),
        Commands::Config { action } => handle_config(action, workspace),
    }
}

/// Command-line flags layered over the loaded configuration. Unset flags are
/// left out so they do not shadow lower layers.
#[derive(Debug, Default, Serialize, PartialEq)]
struct RunOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_iters: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    comment: Option<String>,
    #[serde(skip_serializing_if = "FrequencyOverrides::is_empty")]
    frequencies: FrequencyOverrides,
}

#[derive(Debug, Default, Serialize, PartialEq)]
struct FrequencyOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    tick: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    progress: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    checkpoint: Option<u64>,
}

impl FrequencyOverrides {
    fn is_empty(&self) -> bool {
        self.tick.is_none() && self.progress.is_none() && self.checkpoint.is_none()
    }
}

impl From<&RunArgs> for RunOverrides {
    fn from(args: &RunArgs) -> Self {
        Self {
            max_iters: args.max_iters,
            comment: args.comment.clone(),
            frequencies: FrequencyOverrides {
                tick: args.tick,
                progress: args.progress,
                checkpoint: args.checkpoint,
            },
        }
    }
}

fn handle_run(args: RunArgs, workspace: &Path, log: Option<&ExperimentLog>) -> anyhow::Result<()> {
    let overrides = RunOverrides::from(&args);
    let config = load_config(Some(workspace), Some(&overrides)).context("Failed to load config")?;
    let settings = config.run_settings(&args.name);

    let (train, held_out) = demo::dataset(args.seed);
    let weights = Rc::new(RefCell::new(Weights::zeros()));
    let training = LinearRegression::new(weights.clone(), train, args.seed);
    let validation = HeldOut::new(weights, held_out, args.seed);
    let mut session = ExperimentSession::new(settings, training).with_validation(validation);

    let mut ctx = DirStack::new(workspace);
    let mut events = session.events(&mut ctx)?;
    println!("Experiment: {}", events.root().display());
    let _attached = match log.map(|log| log.attach(events.root())) {
        Some(Ok(attached)) => Some(attached),
        Some(Err(e)) => {
            tracing::warn!(error = %e, "Experiment log unavailable");
            None
        }
        None => None,
    };

    while let Some(event) = events.next() {
        let event = event?;
        println!("{:>8}  {event}", events.event_iteration());
    }
    Ok(())
}

fn handle_status(root: &Path) -> anyhow::Result<()> {
    if !root.is_dir() {
        anyhow::bail!("No experiment directory at '{}'", root.display());
    }
    println!("Experiment: {}", root.display());

    let checkpoints = list_checkpoints(&root.join(CHECKPOINTS_DIR))?;
    if checkpoints.is_empty() {
        println!("Checkpoints: none");
    } else {
        println!("Checkpoints:");
        for entry in &checkpoints {
            let name = entry
                .path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            println!("  {name:<20} {}", entry.status);
        }
    }

    match latest_checkpoint(root) {
        Ok(path) => {
            println!("Latest complete: {}", path.display());
            if let Some(state) = read_training_state(&path) {
                println!(
                    "  saved at iteration {} of {} ({})",
                    state.iteration,
                    state.max_iters,
                    state.saved_at.to_rfc3339()
                );
            }
        }
        Err(TrainlogError::NoCheckpoint { .. }) => println!("Latest complete: none"),
        Err(e) => return Err(e.into()),
    }

    match std::fs::read_to_string(root.join(PROGRESS_FILE)) {
        Ok(text) => println!("Progress: {}", text.split_whitespace().collect::<Vec<_>>().join(" ")),
        Err(_) => println!("Progress: not started"),
    }

    let parent = root.parent().unwrap_or(root);
    match resolve_latest(parent) {
        Some(target) => {
            let this = same_dir(&target, root);
            println!(
                "Latest pointer: {}{}",
                target.display(),
                if this { " (this experiment)" } else { "" }
            );
        }
        None => println!("Latest pointer: not set"),
    }
    Ok(())
}

fn read_training_state(checkpoint: &Path) -> Option<TrainingState> {
    let text = std::fs::read_to_string(checkpoint.join(TRAINING_STATE_FILE)).ok()?;
    match serde_json::from_str(&text) {
        Ok(state) => Some(state),
        Err(e) => {
            tracing::warn!(error = %e, "Unreadable training state");
            None
        }
    }
}

fn same_dir(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => a == b,
    }
}

fn handle_config(action: ConfigAction, workspace: &Path) -> anyhow::Result<()> {
    match action {
        ConfigAction::Init => {
            let config_path = workspace.join(WORKSPACE_CONFIG_FILE);
            if config_path.exists() {
                println!(
                    "Configuration file already exists at: {}",
                    config_path.display()
                );
                return Ok(());
            }

            let toml_str = toml::to_string_pretty(&TrainlogConfig::default())?;
            std::fs::write(&config_path, &toml_str)?;
            println!(
                "Created default configuration at: {}",
                config_path.display()
            );
            Ok(())
        }
        ConfigAction::Show => {
            let config = load_config::<RunOverrides>(Some(workspace), None)
                .context("Failed to load config")?;
            let toml_str = toml::to_string_pretty(&config)?;
            println!("{}", toml_str);
            Ok(())
        }
    }
}

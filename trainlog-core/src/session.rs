//! Experiment sessions.
//!
//! An [`ExperimentSession`] owns one run's settings and collaborators. Calling
//! [`ExperimentSession::events`] opens the experiment root (initializing it, or
//! rolling back to the last complete checkpoint when it already exists) and
//! returns a lazy [`Events`] stream. Every `next()` drives the training loop as far
//! as the next event and performs that event's side effects before yielding it.
//! Dropping the stream closes the root scope.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};

use crate::artifacts::{
    self, EPOCH_LOSSES, MetricLog, PredictionSink, ProgressFile, SCORES, TRAINING_LOSSES,
    TRAINING_STATE_FILE, VALIDATION_LOSSES,
};
use crate::checkpoint::atomic_checkpoint;
use crate::error::{Result, TrainlogError};
use crate::hooks::{Losses, MemoryProbe, NoPlots, Plotter, ProcStatusProbe, TrainingLoop, ValidationLoop};
use crate::latest::update_latest;
use crate::schedule::{Frequencies, LogEvent, events_for};
use crate::scope::{DirStack, ScopedDir};
use crate::sequence::{checkpoint_dir_name, latest_number};

/// Directory under the experiment root that holds numbered checkpoints.
pub const CHECKPOINTS_DIR: &str = "checkpoints";

/// Directory inside a checkpoint that holds validation predictions.
pub const PREDICTIONS_DIR: &str = "predictions";

/// Settings for one run. Snapshotted into `config.toml` when the root is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSettings {
    /// Experiment root, relative to the working context it is opened in.
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub max_iters: u64,
    #[serde(default)]
    pub frequencies: Frequencies,
}

impl RunSettings {
    pub fn new(path: impl Into<PathBuf>, max_iters: u64) -> Self {
        Self {
            path: path.into(),
            comment: None,
            max_iters,
            frequencies: Frequencies::default(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_frequencies(mut self, frequencies: Frequencies) -> Self {
        self.frequencies = frequencies;
        self
    }

    pub fn validate(&self) -> Result<()> {
        self.frequencies.validate()?;
        if self.max_iters == 0 {
            return Err(crate::error::ConfigError::InvalidMaxIters.into());
        }
        Ok(())
    }
}

/// Loop position written to `training.json` in every checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingState {
    pub iteration: u64,
    pub max_iters: u64,
    pub frequencies: Frequencies,
    pub saved_at: DateTime<Utc>,
}

/// One training run and the collaborators it reports through.
pub struct ExperimentSession<L> {
    settings: RunSettings,
    training: L,
    validation: Option<Box<dyn ValidationLoop>>,
    plotter: Box<dyn Plotter>,
    memory: Box<dyn MemoryProbe>,
}

impl<L: TrainingLoop> ExperimentSession<L> {
    pub fn new(settings: RunSettings, training: L) -> Self {
        Self {
            settings,
            training,
            validation: None,
            plotter: Box::new(NoPlots),
            memory: Box::new(ProcStatusProbe),
        }
    }

    pub fn with_validation(mut self, validation: impl ValidationLoop + 'static) -> Self {
        self.validation = Some(Box::new(validation));
        self
    }

    pub fn with_plotter(mut self, plotter: impl Plotter + 'static) -> Self {
        self.plotter = Box::new(plotter);
        self
    }

    pub fn with_memory_probe(mut self, probe: impl MemoryProbe + 'static) -> Self {
        self.memory = Box::new(probe);
        self
    }

    pub fn settings(&self) -> &RunSettings {
        &self.settings
    }

    pub fn training(&self) -> &L {
        &self.training
    }

    pub fn training_mut(&mut self) -> &mut L {
        &mut self.training
    }

    /// Latest complete checkpoint of this experiment, resolved against `ctx`.
    pub fn latest_checkpoint_path(&self, ctx: &DirStack) -> Result<PathBuf> {
        latest_checkpoint(&ctx.resolve(&self.settings.path))
    }

    /// Opens the experiment root inside `ctx` and returns the event stream.
    ///
    /// A fresh root is initialized and the stream starts with INIT; an existing
    /// root is rolled back to its latest complete checkpoint and the stream starts
    /// with RESUME. An unchanged comment is rejected before anything is created.
    pub fn events<'a>(&'a mut self, ctx: &'a mut DirStack) -> Result<Events<'a, L>> {
        self.settings.validate()?;

        let target = ctx.resolve(&self.settings.path);
        if !target.exists() {
            if let Some(comment) = &self.settings.comment {
                let experiments_dir = target.parent().unwrap_or(&target);
                artifacts::check_comment_changed(experiments_dir, comment)?;
            }
        }

        let scope = ctx.enter(&self.settings.path)?;
        let root = scope.path().to_path_buf();
        tracing::info!(root = %root.display(), "Starting training");
        artifacts::write_process_id(&root)?;

        let opening = if scope.exists_already() {
            self.rollback(&root)?;
            LogEvent::Resume
        } else {
            self.init_logging(&root)?;
            LogEvent::Init
        };

        let progress = ProgressFile::new(&root, self.settings.max_iters);
        Ok(Events {
            scope,
            session: self,
            root,
            progress,
            opening: Some(opening),
            pending: VecDeque::new(),
            iteration: 0,
            event_iteration: 0,
            steps_in_epoch: 0,
            finishing: false,
            done: false,
        })
    }

    fn init_logging(&mut self, root: &Path) -> Result<()> {
        tracing::info!("Logging init");
        artifacts::snapshot_launch_config(root, &self.settings)?;
        artifacts::write_peak_memory(root, self.memory.peak_memory_bytes())?;
        artifacts::write_model_architecture(root, &self.training.architecture())?;
        if let Some(comment) = &self.settings.comment {
            artifacts::write_comment(root, comment)?;
        }
        update_latest(root)?;
        Ok(())
    }

    fn rollback(&mut self, root: &Path) -> Result<()> {
        tracing::info!("Performing rollback");
        let parent = root.join(CHECKPOINTS_DIR);
        let Some(number) = latest_number(&parent)? else {
            tracing::info!("No checkpoint found - training normally");
            return Ok(());
        };

        let checkpoint = parent.join(checkpoint_dir_name(number));
        tracing::warn!(path = %checkpoint.display(), "Resuming from checkpoint");
        artifacts::restore_metric_history(&checkpoint, root)?;
        self.training
            .restore(&checkpoint)
            .map_err(|e| TrainlogError::collaborator("Restoring training state", e))?;
        self.plotter
            .plot_losses(root, self.settings.frequencies.progress)
            .map_err(|e| TrainlogError::collaborator("Plotting losses", e))?;
        Ok(())
    }
}

/// Path of the latest complete checkpoint under an experiment root.
pub fn latest_checkpoint(root: &Path) -> Result<PathBuf> {
    let parent = root.join(CHECKPOINTS_DIR);
    match latest_number(&parent)? {
        Some(number) => Ok(parent.join(checkpoint_dir_name(number))),
        None => Err(TrainlogError::NoCheckpoint { parent }),
    }
}

#[derive(Debug, Clone, Copy)]
enum Pending {
    Event(LogEvent),
    Advance,
}

/// Lazy, forward-only stream of the events of one run.
///
/// Ends after `max_iters` iterations (closing the last epoch) or after the first
/// error. The experiment root stays the current scope until the stream is dropped.
pub struct Events<'a, L> {
    scope: ScopedDir<'a>,
    session: &'a mut ExperimentSession<L>,
    root: PathBuf,
    progress: ProgressFile,
    opening: Option<LogEvent>,
    pending: VecDeque<Pending>,
    iteration: u64,
    event_iteration: u64,
    steps_in_epoch: u64,
    finishing: bool,
    done: bool,
}

impl<L: TrainingLoop> Events<'_, L> {
    /// Absolute path of the experiment root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Iterations completed since this stream was opened. `progress.txt` is
    /// always up to date with this count when an event is handed out.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    /// Iteration the most recently yielded event was fired on.
    pub fn event_iteration(&self) -> u64 {
        self.event_iteration
    }

    fn advance(&mut self) -> Result<Option<LogEvent>> {
        loop {
            match self.pending.pop_front() {
                Some(Pending::Event(event)) => {
                    self.event_iteration = self.iteration;
                    self.perform(event)?;
                    // Finish the iteration before handing out its last event, so a
                    // caller that stops here leaves progress.txt current.
                    if matches!(self.pending.front(), Some(Pending::Advance)) {
                        self.pending.pop_front();
                        self.complete_iteration()?;
                    }
                    return Ok(Some(event));
                }
                Some(Pending::Advance) => {
                    self.complete_iteration()?;
                    continue;
                }
                None => {}
            }

            if self.finishing {
                return Ok(None);
            }

            if self.iteration >= self.session.settings.max_iters {
                self.finishing = true;
                if self.steps_in_epoch > 0 {
                    self.session.training.end_epoch();
                    self.pending.push_back(Pending::Event(LogEvent::Epoch));
                }
                continue;
            }

            let stepped = self
                .session
                .training
                .step()
                .map_err(|e| TrainlogError::collaborator("Training step", e))?;

            if stepped {
                self.steps_in_epoch += 1;
                let due = events_for(self.iteration, &self.session.settings.frequencies);
                self.pending.extend(due.iter().map(Pending::Event));
                self.pending.push_back(Pending::Advance);
            } else if self.steps_in_epoch == 0 {
                return Err(TrainlogError::invalid_input(
                    "training loop ended an epoch without running a step",
                ));
            } else {
                self.pending.push_back(Pending::Event(LogEvent::Epoch));
            }
        }
    }

    fn complete_iteration(&mut self) -> Result<()> {
        self.iteration += 1;
        self.progress.record(self.iteration)
    }

    fn perform(&mut self, event: LogEvent) -> Result<()> {
        match event {
            LogEvent::Tick => self.tick_logging(),
            LogEvent::Progress => self.progress_logging(),
            LogEvent::Checkpoint => self.checkpoint_logging(),
            LogEvent::Epoch => self.epoch_logging(),
            LogEvent::Init | LogEvent::Resume => Ok(()),
        }
    }

    fn tick_logging(&mut self) -> Result<()> {
        tracing::debug!(iteration = self.iteration, "Logging tick");
        let session = &mut *self.session;

        let losses = session
            .training
            .evaluate()
            .map_err(|e| TrainlogError::collaborator("Evaluating training batch", e))?;
        MetricLog::in_dir(&self.root, TRAINING_LOSSES).append(&losses)?;

        if let Some(validation) = session.validation.as_mut() {
            let losses = validation
                .evaluate()
                .map_err(|e| TrainlogError::collaborator("Evaluating validation batch", e))?;
            MetricLog::in_dir(&self.root, VALIDATION_LOSSES).append(&losses)?;
        }

        artifacts::write_peak_memory(&self.root, session.memory.peak_memory_bytes())?;
        Ok(())
    }

    fn progress_logging(&mut self) -> Result<()> {
        tracing::info!(iteration = self.iteration, "Logging progress");
        self.session
            .plotter
            .plot_losses(&self.root, self.session.settings.frequencies.progress)
            .map_err(|e| TrainlogError::collaborator("Plotting losses", e))
    }

    fn checkpoint_logging(&mut self) -> Result<()> {
        tracing::info!(iteration = self.iteration, "Logging checkpoint");
        let session = &mut *self.session;
        let training = &session.training;
        let validation = &mut session.validation;
        let root = &self.root;
        let batches = validation.as_ref().and_then(|v| v.batch_count());
        let state = TrainingState {
            iteration: self.iteration,
            max_iters: session.settings.max_iters,
            frequencies: session.settings.frequencies,
            saved_at: Utc::now(),
        };

        let committed = atomic_checkpoint(&mut self.scope, CHECKPOINTS_DIR, |dir| -> Result<Option<Losses>> {
            training
                .save(dir.path())
                .map_err(|e| TrainlogError::collaborator("Saving model", e))?;

            let state_path = dir.resolve(TRAINING_STATE_FILE);
            let json = serde_json::to_vec_pretty(&state)?;
            std::fs::write(&state_path, json)
                .map_err(|e| TrainlogError::fs("write training state", &state_path, e))?;

            artifacts::backup_metric_history(root, dir.path())?;

            match validation.as_mut() {
                Some(validation) => {
                    let checkpoint_dir = dir.path().to_path_buf();
                    let predictions = dir.enter(PREDICTIONS_DIR)?;
                    let mut sink = PredictionSink::new(predictions.path());
                    if let Some(total) = batches {
                        sink = sink.with_progress(ProgressFile::new(&checkpoint_dir, total));
                    }
                    let scores = validation
                        .predict(&mut sink)
                        .map_err(|e| TrainlogError::collaborator("Running validation", e))?;
                    tracing::debug!(predictions = sink.written(), "Logged predictions");
                    Ok(Some(scores))
                }
                None => Ok(None),
            }
        })?;

        if let Some(scores) = committed.value {
            self.record_scores(&scores)?;
        }
        Ok(())
    }

    fn record_scores(&mut self, scores: &Losses) -> Result<()> {
        tracing::info!("Logging scores");
        MetricLog::in_dir(&self.root, SCORES).append(scores)?;
        self.session
            .plotter
            .plot_scores(&self.root)
            .map_err(|e| TrainlogError::collaborator("Plotting scores", e))
    }

    fn epoch_logging(&mut self) -> Result<()> {
        tracing::info!(iteration = self.iteration, "Logging end of epoch");
        self.steps_in_epoch = 0;
        let Some(losses) = self.session.training.last_epoch_losses() else {
            tracing::debug!("Training loop reported no epoch losses");
            return Ok(());
        };
        MetricLog::in_dir(&self.root, EPOCH_LOSSES).append(&losses)?;
        self.session
            .plotter
            .plot_epoch_losses(&self.root)
            .map_err(|e| TrainlogError::collaborator("Plotting epoch losses", e))
    }
}

impl<L: TrainingLoop> Iterator for Events<'_, L> {
    type Item = Result<LogEvent>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        if let Some(opening) = self.opening.take() {
            return Some(Ok(opening));
        }
        match self.advance() {
            Ok(Some(event)) => Some(Ok(event)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<L: TrainingLoop> FusedIterator for Events<'_, L> {}

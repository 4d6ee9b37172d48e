//! End-to-end tests for experiment sessions.
//!
//! These drive full runs through fake collaborators and check the directory
//! layout left behind: fresh init, resume, comment guard, failed checkpoints and
//! early cancellation.

use pretty_assertions::assert_eq;
use std::cell::Cell;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

use trainlog_core::artifacts::{self, PredictionSink};
use trainlog_core::error::{BoxError, ConfigError, TrainlogError};
use trainlog_core::{
    CheckpointStatus, DirStack, ExperimentSession, Frequencies, LogEvent, Losses, MemoryProbe,
    Plotter, RunSettings, TrainingLoop, TrainingState, ValidationLoop, latest_checkpoint,
    latest_number, list_checkpoints, resolve_latest,
};

/// Shared record of collaborator calls.
#[derive(Debug, Clone, Default)]
struct Journal(Arc<Mutex<Vec<String>>>);

impl Journal {
    fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }
}

struct FakeTraining {
    epoch_len: u64,
    position: u64,
    steps: u64,
    saves: Cell<u32>,
    fail_on_save: Option<u32>,
    journal: Journal,
}

impl FakeTraining {
    fn new(epoch_len: u64, journal: &Journal) -> Self {
        Self {
            epoch_len,
            position: 0,
            steps: 0,
            saves: Cell::new(0),
            fail_on_save: None,
            journal: journal.clone(),
        }
    }

    fn failing_on_save(mut self, save: u32) -> Self {
        self.fail_on_save = Some(save);
        self
    }
}

impl TrainingLoop for FakeTraining {
    fn step(&mut self) -> Result<bool, BoxError> {
        if self.position == self.epoch_len {
            self.position = 0;
            return Ok(false);
        }
        self.position += 1;
        self.steps += 1;
        Ok(true)
    }

    fn evaluate(&mut self) -> Result<Losses, BoxError> {
        Ok(Losses::from([("mse".to_string(), 1.0 / self.steps as f64)]))
    }

    fn last_epoch_losses(&self) -> Option<Losses> {
        Some(Losses::from([("mse".to_string(), 0.25)]))
    }

    fn architecture(&self) -> String {
        "Linear(in=2, out=1)".to_string()
    }

    fn save(&self, dir: &Path) -> Result<(), BoxError> {
        let save = self.saves.get();
        self.saves.set(save + 1);
        std::fs::write(dir.join("model.json"), format!("{{\"steps\":{}", self.steps))?;
        if self.fail_on_save == Some(save) {
            return Err("weights contain NaN".into());
        }
        std::fs::write(dir.join("model.json"), format!("{{\"steps\":{}}}", self.steps))?;
        Ok(())
    }

    fn restore(&mut self, dir: &Path) -> Result<(), BoxError> {
        self.journal.push(format!(
            "restore {}",
            dir.file_name().unwrap().to_string_lossy()
        ));
        Ok(())
    }
}

struct FakeValidation;

impl ValidationLoop for FakeValidation {
    fn evaluate(&mut self) -> Result<Losses, BoxError> {
        Ok(Losses::from([("mse".to_string(), 0.5)]))
    }

    fn predict(&mut self, sink: &mut PredictionSink) -> Result<Losses, BoxError> {
        for item in 0..3 {
            let path = sink.path_for(0, 3, item, "", "txt")?;
            std::fs::write(path, item.to_string())?;
        }
        sink.finish_batch()?;
        Ok(Losses::from([("accuracy".to_string(), 0.75)]))
    }

    fn batch_count(&self) -> Option<u64> {
        Some(1)
    }
}

struct RecordingPlotter(Journal);

impl Plotter for RecordingPlotter {
    fn plot_losses(&self, _root: &Path, iters_per_tick: u64) -> Result<(), BoxError> {
        self.0.push(format!("plot_losses {iters_per_tick}"));
        Ok(())
    }

    fn plot_scores(&self, _root: &Path) -> Result<(), BoxError> {
        self.0.push("plot_scores");
        Ok(())
    }

    fn plot_epoch_losses(&self, _root: &Path) -> Result<(), BoxError> {
        self.0.push("plot_epoch_losses");
        Ok(())
    }
}

struct FixedMemory;

impl MemoryProbe for FixedMemory {
    fn peak_memory_bytes(&self) -> Option<u64> {
        Some(4096)
    }
}

fn settings(name: &str, max_iters: u64) -> RunSettings {
    RunSettings::new(PathBuf::from("experiments").join(name), max_iters)
        .with_frequencies(Frequencies::new(5, 5, 10))
}

fn session(
    settings: RunSettings,
    training: FakeTraining,
    journal: &Journal,
) -> ExperimentSession<FakeTraining> {
    ExperimentSession::new(settings, training)
        .with_validation(FakeValidation)
        .with_plotter(RecordingPlotter(journal.clone()))
        .with_memory_probe(FixedMemory)
}

fn collect(
    session: &mut ExperimentSession<FakeTraining>,
    ctx: &mut DirStack,
) -> Vec<LogEvent> {
    session
        .events(ctx)
        .unwrap()
        .collect::<trainlog_core::Result<_>>()
        .unwrap()
}

#[test]
fn test_fresh_run_writes_full_layout() {
    let dir = TempDir::new().unwrap();
    let mut ctx = DirStack::new(dir.path());
    let journal = Journal::default();
    let mut run = session(
        settings("mnist", 12).with_comment("baseline"),
        FakeTraining::new(100, &journal),
        &journal,
    );

    let events = collect(&mut run, &mut ctx);
    assert_eq!(
        events,
        vec![
            LogEvent::Init,
            LogEvent::Tick,
            LogEvent::Progress,
            LogEvent::Checkpoint,
            LogEvent::Tick,
            LogEvent::Progress,
            LogEvent::Tick,
            LogEvent::Progress,
            LogEvent::Checkpoint,
            LogEvent::Epoch,
        ]
    );
    assert_eq!(ctx.current(), dir.path());

    let experiments = dir.path().join("experiments");
    let root = experiments.join("mnist");
    for name in [
        artifacts::PID_FILE,
        artifacts::CONFIG_FILE,
        artifacts::COMMENT_FILE,
        artifacts::ARCHITECTURE_FILE,
        artifacts::MAX_MEMORY_FILE,
        artifacts::PROGRESS_FILE,
        artifacts::TRAINING_LOSSES,
        artifacts::VALIDATION_LOSSES,
        artifacts::EPOCH_LOSSES,
        artifacts::SCORES,
    ] {
        assert!(root.join(name).is_file(), "missing {name}");
    }

    assert_eq!(std::fs::read_to_string(root.join("max_memory.txt")).unwrap(), "4096");
    assert_eq!(resolve_latest(&experiments), Some(root.clone()));
    assert_eq!(
        std::fs::read_to_string(root.join(artifacts::TRAINING_LOSSES))
            .unwrap()
            .lines()
            .count(),
        4 // header + ticks at 0, 5, 10
    );
    assert_eq!(
        std::fs::read_to_string(root.join(artifacts::SCORES)).unwrap(),
        "accuracy\n0.75\n0.75\n"
    );

    let checkpoints = root.join("checkpoints");
    assert_eq!(latest_number(&checkpoints).unwrap(), Some(1));
    let second = checkpoints.join("00001");
    assert!(second.join("model.json").is_file());
    assert!(second.join("predictions/0000/000002.txt").is_file());
    assert!(second.join(artifacts::TRAINING_LOSSES).is_file());
    let validated = std::fs::read_to_string(second.join(artifacts::PROGRESS_FILE)).unwrap();
    assert!(validated.ends_with("100.0000%\n"), "{validated}");

    let state: TrainingState =
        serde_json::from_str(&std::fs::read_to_string(second.join("training.json")).unwrap())
            .unwrap();
    assert_eq!(state.iteration, 10);
    assert_eq!(state.max_iters, 12);
    assert_eq!(state.frequencies, Frequencies::new(5, 5, 10));

    assert_eq!(
        journal.entries(),
        vec![
            "plot_losses 5",
            "plot_scores",
            "plot_losses 5",
            "plot_losses 5",
            "plot_scores",
            "plot_epoch_losses",
        ]
    );
}

#[test]
fn test_resume_with_empty_checkpoints_proceeds_fresh() {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("experiments/mnist");
    std::fs::create_dir_all(root.join("checkpoints")).unwrap();

    let mut ctx = DirStack::new(dir.path());
    let journal = Journal::default();
    let mut run = session(settings("mnist", 3), FakeTraining::new(100, &journal), &journal);

    let mut events = run.events(&mut ctx).unwrap();
    assert_eq!(events.next().unwrap().unwrap(), LogEvent::Resume);
    assert!(!root.join(artifacts::TRAINING_LOSSES).exists());
    assert!(root.join(artifacts::PID_FILE).is_file());
    assert!(!root.join(artifacts::CONFIG_FILE).exists());
    drop(events);

    assert!(journal.entries().is_empty());
    assert_eq!(ctx.depth(), 0);
}

#[test]
fn test_resume_restores_history_from_latest_checkpoint() {
    let dir = TempDir::new().unwrap();
    let mut ctx = DirStack::new(dir.path());
    let journal = Journal::default();
    let root = dir.path().join("experiments/mnist");

    let mut first = session(settings("mnist", 12), FakeTraining::new(100, &journal), &journal);
    collect(&mut first, &mut ctx);
    let backup =
        std::fs::read_to_string(root.join("checkpoints/00001").join(artifacts::TRAINING_LOSSES))
            .unwrap();

    // Rows written by iterations after the last checkpoint, lost in the crash.
    let log = root.join(artifacts::TRAINING_LOSSES);
    let mut text = std::fs::read_to_string(&log).unwrap();
    text.push_str("0.001\n0.001\n");
    std::fs::write(&log, text).unwrap();

    let resumed_journal = Journal::default();
    let mut second = session(
        settings("mnist", 12),
        FakeTraining::new(100, &resumed_journal),
        &resumed_journal,
    );
    let mut events = second.events(&mut ctx).unwrap();
    assert_eq!(events.next().unwrap().unwrap(), LogEvent::Resume);
    assert_eq!(std::fs::read_to_string(&log).unwrap(), backup);
    drop(events);

    assert_eq!(
        resumed_journal.entries(),
        vec!["restore 00001", "plot_losses 5"]
    );
    assert_eq!(
        second.latest_checkpoint_path(&ctx).unwrap(),
        root.join("checkpoints/00001")
    );
}

#[test]
fn test_unchanged_comment_is_rejected_before_side_effects() {
    let dir = TempDir::new().unwrap();
    let mut ctx = DirStack::new(dir.path());
    let journal = Journal::default();

    let mut first = session(
        settings("run-a", 1).with_comment("lr=1e-3"),
        FakeTraining::new(10, &journal),
        &journal,
    );
    collect(&mut first, &mut ctx);

    let mut repeat = session(
        settings("run-b", 1).with_comment("lr=1e-3"),
        FakeTraining::new(10, &journal),
        &journal,
    );
    let err = repeat.events(&mut ctx).err().unwrap();
    assert!(matches!(
        err,
        TrainlogError::Config(ConfigError::UnchangedComment { .. })
    ));
    assert!(!dir.path().join("experiments/run-b").exists());
    assert_eq!(ctx.depth(), 0);

    let mut changed = session(
        settings("run-b", 1).with_comment("lr=3e-4"),
        FakeTraining::new(10, &journal),
        &journal,
    );
    assert_eq!(collect(&mut changed, &mut ctx)[0], LogEvent::Init);
    assert_eq!(
        resolve_latest(&dir.path().join("experiments")),
        Some(dir.path().join("experiments/run-b"))
    );
}

#[test]
fn test_failed_checkpoint_is_marked_incomplete_and_skipped_on_resume() {
    let dir = TempDir::new().unwrap();
    let mut ctx = DirStack::new(dir.path());
    let journal = Journal::default();
    let root = dir.path().join("experiments/mnist");

    let mut run = session(
        settings("mnist", 30),
        FakeTraining::new(100, &journal).failing_on_save(1),
        &journal,
    );
    let results: Vec<_> = run.events(&mut ctx).unwrap().collect();
    let (last, ok) = results.split_last().unwrap();
    assert!(ok.iter().all(|r| r.is_ok()));
    assert!(matches!(
        last,
        Err(TrainlogError::Collaborator { action: "Saving model", .. })
    ));
    assert_eq!(ctx.depth(), 0);

    let entries = list_checkpoints(&root.join("checkpoints")).unwrap();
    let summary: Vec<_> = entries.iter().map(|e| (e.number, e.status)).collect();
    assert_eq!(
        summary,
        vec![
            (0, CheckpointStatus::Complete),
            (1, CheckpointStatus::Incomplete)
        ]
    );
    assert_eq!(latest_checkpoint(&root).unwrap(), root.join("checkpoints/00000"));

    let resumed_journal = Journal::default();
    let mut resumed = session(
        settings("mnist", 30),
        FakeTraining::new(100, &resumed_journal),
        &resumed_journal,
    );
    let events = collect(&mut resumed, &mut ctx);
    assert_eq!(events[0], LogEvent::Resume);
    assert_eq!(resumed_journal.entries()[0], "restore 00000");

    // Number 1 is reused; the old marker stays next to the complete directory.
    let entries = list_checkpoints(&root.join("checkpoints")).unwrap();
    assert!(
        entries
            .iter()
            .any(|e| e.number == 1 && e.status == CheckpointStatus::Complete)
    );
    assert!(
        entries
            .iter()
            .any(|e| e.number == 1 && e.status == CheckpointStatus::Incomplete)
    );
}

#[test]
fn test_cancelling_the_stream_restores_context() {
    let dir = TempDir::new().unwrap();
    let mut ctx = DirStack::new(dir.path());
    let journal = Journal::default();
    let mut run = session(settings("mnist", 1_000), FakeTraining::new(100, &journal), &journal);

    {
        let mut events = run.events(&mut ctx).unwrap();
        let first: Vec<_> = events.by_ref().take(4).map(|e| e.unwrap()).collect();
        assert_eq!(first.last(), Some(&LogEvent::Checkpoint));
        assert_eq!(events.root(), dir.path().join("experiments/mnist"));
    }

    assert_eq!(ctx.current(), dir.path());
    assert_eq!(ctx.depth(), 0);
}

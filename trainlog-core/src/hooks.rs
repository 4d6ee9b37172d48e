//! Collaborator interfaces the session drives.
//!
//! Everything model-specific (stepping the optimizer, evaluating, serializing
//! weights, drawing charts) lives behind these traits. Errors are boxed so callers
//! can use `anyhow` or their own types.

use std::collections::BTreeMap;
use std::path::Path;

use crate::artifacts::PredictionSink;
use crate::error::BoxError;

/// Named scalar values for one row of a metric log (losses, scores).
pub type Losses = BTreeMap<String, f64>;

/// The caller's training loop.
pub trait TrainingLoop {
    /// Runs one optimization step. Returns `Ok(false)` once the data source is
    /// exhausted for the current epoch; the next call starts a new epoch.
    fn step(&mut self) -> Result<bool, BoxError>;

    /// Losses on a training batch, recorded on every tick.
    fn evaluate(&mut self) -> Result<Losses, BoxError>;

    /// Accumulated losses for the epoch that just ended.
    fn last_epoch_losses(&self) -> Option<Losses>;

    /// Called when the session closes an epoch the data source did not end,
    /// i.e. the partial epoch cut off by `max_iters`. Implementations should
    /// finalize what [`TrainingLoop::last_epoch_losses`] reports.
    fn end_epoch(&mut self) {}

    /// Human-readable description of the model, written to `architecture.txt`.
    fn architecture(&self) -> String;

    /// Writes the model payload into a checkpoint directory.
    fn save(&self, dir: &Path) -> Result<(), BoxError>;

    /// Loads state back from the latest complete checkpoint when resuming.
    fn restore(&mut self, _dir: &Path) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Optional evaluation on held-out data.
pub trait ValidationLoop {
    /// Losses on a validation batch, recorded next to the training losses on every tick.
    fn evaluate(&mut self) -> Result<Losses, BoxError>;

    /// Runs one pass over the validation set at checkpoint time, writing
    /// predictions through `sink`, and returns the scores for that pass.
    /// Call [`PredictionSink::finish_batch`] after each batch to report progress.
    fn predict(&mut self, sink: &mut PredictionSink) -> Result<Losses, BoxError>;

    /// Number of batches in one prediction pass, if known. Enables the
    /// checkpoint's own `progress.txt`.
    fn batch_count(&self) -> Option<u64> {
        None
    }
}

/// Chart rendering. All paths passed in are experiment roots.
pub trait Plotter {
    fn plot_losses(&self, _root: &Path, _iters_per_tick: u64) -> Result<(), BoxError> {
        Ok(())
    }

    fn plot_scores(&self, _root: &Path) -> Result<(), BoxError> {
        Ok(())
    }

    fn plot_epoch_losses(&self, _root: &Path) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Plotter that draws nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPlots;

impl Plotter for NoPlots {}

/// Source of the peak resident memory figure written to `max_memory.txt`.
pub trait MemoryProbe {
    fn peak_memory_bytes(&self) -> Option<u64>;
}

/// Reads the process high-water mark (`VmHWM`) from `/proc/self/status`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcStatusProbe;

impl MemoryProbe for ProcStatusProbe {
    fn peak_memory_bytes(&self) -> Option<u64> {
        let status = std::fs::read_to_string("/proc/self/status").ok()?;
        parse_vm_hwm(&status)
    }
}

fn parse_vm_hwm(status: &str) -> Option<u64> {
    let line = status.lines().find(|l| l.starts_with("VmHWM:"))?;
    let kib: u64 = line
        .trim_start_matches("VmHWM:")
        .trim()
        .trim_end_matches("kB")
        .trim()
        .parse()
        .ok()?;
    Some(kib * 1024)
}

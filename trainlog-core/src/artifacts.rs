//! Artifact files written into experiment and checkpoint directories.

use serde::Serialize;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result, TrainlogError};
use crate::hooks::Losses;
use crate::latest::LATEST_NAME;

pub const PID_FILE: &str = "pid.txt";
pub const CONFIG_FILE: &str = "config.toml";
pub const COMMENT_FILE: &str = "comment.txt";
pub const ARCHITECTURE_FILE: &str = "architecture.txt";
pub const MAX_MEMORY_FILE: &str = "max_memory.txt";
pub const PROGRESS_FILE: &str = "progress.txt";
pub const TRAINING_STATE_FILE: &str = "training.json";
pub const TRAINING_LOSSES: &str = "training_losses.csv";
pub const VALIDATION_LOSSES: &str = "validation_losses.csv";
pub const EPOCH_LOSSES: &str = "epoch_losses.csv";
pub const SCORES: &str = "scores.csv";

/// Metric logs snapshotted into each checkpoint so a resume can discard the rows
/// written by iterations that were lost in the crash.
pub const METRIC_HISTORY: [&str; 2] = [TRAINING_LOSSES, VALIDATION_LOSSES];

/// Writes `data` to a `.tmp` sibling, then renames it over `path`.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, data).map_err(|e| TrainlogError::fs("write", &tmp, e))?;
    std::fs::rename(&tmp, path).map_err(|e| TrainlogError::fs("rename", path, e))?;
    Ok(())
}

fn write_text(dir: &Path, name: &str, text: &str) -> Result<PathBuf> {
    let path = dir.join(name);
    std::fs::write(&path, text).map_err(|e| TrainlogError::fs("write", &path, e))?;
    Ok(path)
}

pub fn write_process_id(dir: &Path) -> Result<PathBuf> {
    tracing::info!("Logging PID");
    write_text(dir, PID_FILE, &std::process::id().to_string())
}

/// Snapshots the launch configuration as TOML.
pub fn snapshot_launch_config<T: Serialize>(dir: &Path, settings: &T) -> Result<PathBuf> {
    tracing::info!("Logging launch configuration");
    write_text(dir, CONFIG_FILE, &toml::to_string_pretty(settings)?)
}

pub fn write_peak_memory(dir: &Path, bytes: Option<u64>) -> Result<PathBuf> {
    tracing::debug!(bytes, "Logging max memory usage");
    let text = bytes.map_or_else(|| "unknown".to_string(), |b| b.to_string());
    write_text(dir, MAX_MEMORY_FILE, &text)
}

pub fn write_model_architecture(dir: &Path, description: &str) -> Result<PathBuf> {
    tracing::info!("Logging architecture");
    let mut text = description.to_string();
    if !text.ends_with('\n') {
        text.push('\n');
    }
    write_text(dir, ARCHITECTURE_FILE, &text)
}

/// Fails when the run the `latest` pointer in `experiments_dir` refers to was
/// launched with exactly the same comment.
pub fn check_comment_changed(experiments_dir: &Path, comment: &str) -> Result<()> {
    let previous = experiments_dir.join(LATEST_NAME).join(COMMENT_FILE);
    match std::fs::read_to_string(&previous) {
        Ok(text) if text == comment => {
            Err(ConfigError::UnchangedComment { path: previous }.into())
        }
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(TrainlogError::fs("read previous comment", &previous, e)),
    }
}

/// Writes `comment.txt` after checking it differs from the previous run's comment.
pub fn write_comment(dir: &Path, comment: &str) -> Result<PathBuf> {
    tracing::info!("Logging comment");
    let experiments_dir = dir.parent().unwrap_or(dir);
    check_comment_changed(experiments_dir, comment)?;
    write_text(dir, COMMENT_FILE, comment)
}

/// Append-only CSV log of named scalar rows.
///
/// The first row written fixes the header; later rows are written in header order
/// and must carry exactly the same columns.
#[derive(Debug, Clone)]
pub struct MetricLog {
    path: PathBuf,
}

impl MetricLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn in_dir(dir: &Path, name: &str) -> Self {
        Self::new(dir.join(name))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, row: &Losses) -> Result<()> {
        let header = self.header()?;
        let columns: Vec<String> = match &header {
            Some(columns) => {
                let matches = columns.len() == row.len()
                    && columns.iter().all(|c| row.contains_key(c));
                if !matches {
                    return Err(TrainlogError::invalid_input(format!(
                        "row columns {:?} do not match header {:?} of '{}'",
                        row.keys().collect::<Vec<_>>(),
                        columns,
                        self.path.display()
                    )));
                }
                columns.clone()
            }
            None => row.keys().cloned().collect(),
        };

        let mut out = String::new();
        if header.is_none() {
            out.push_str(&columns.join(","));
            out.push('\n');
        }
        let values: Vec<String> = columns.iter().map(|c| format!("{:?}", row[c])).collect();
        out.push_str(&values.join(","));
        out.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| TrainlogError::fs("open metric log", &self.path, e))?;
        file.write_all(out.as_bytes())
            .map_err(|e| TrainlogError::fs("append metric log", &self.path, e))?;
        Ok(())
    }

    fn header(&self) -> Result<Option<Vec<String>>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(TrainlogError::fs("open metric log", &self.path, e)),
        };
        let mut line = String::new();
        BufReader::new(file)
            .read_line(&mut line)
            .map_err(|e| TrainlogError::fs("read metric log", &self.path, e))?;
        let line = line.trim_end();
        if line.is_empty() {
            return Ok(None);
        }
        Ok(Some(line.split(',').map(str::to_string).collect()))
    }
}

/// Copies the metric history files that exist in `root` into `checkpoint`.
pub fn backup_metric_history(root: &Path, checkpoint: &Path) -> Result<Vec<PathBuf>> {
    copy_metric_history(root, checkpoint)
}

/// Copies the metric history saved in `checkpoint` back over the files in `root`.
pub fn restore_metric_history(checkpoint: &Path, root: &Path) -> Result<Vec<PathBuf>> {
    copy_metric_history(checkpoint, root)
}

/// Copies each [`METRIC_HISTORY`] file present in `src` into `dst`; absent files are skipped.
pub fn copy_metric_history(src: &Path, dst: &Path) -> Result<Vec<PathBuf>> {
    let mut copied = Vec::new();
    for name in METRIC_HISTORY {
        let from = src.join(name);
        if !from.is_file() {
            tracing::debug!(path = %from.display(), "No metric history to copy");
            continue;
        }
        let to = dst.join(name);
        std::fs::copy(&from, &to).map_err(|e| TrainlogError::fs("copy metric history", &from, e))?;
        copied.push(to);
    }
    Ok(copied)
}

/// `progress.txt`: a timestamp line and a percent-complete line, rewritten on every update.
#[derive(Debug, Clone)]
pub struct ProgressFile {
    path: PathBuf,
    total: u64,
}

impl ProgressFile {
    /// The path is fixed here, so later updates land in `dir` whatever scope is open.
    pub fn new(dir: &Path, total: u64) -> Self {
        Self {
            path: dir.join(PROGRESS_FILE),
            total,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, done: u64) -> Result<()> {
        let timestamp = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S");
        let text = format!("{timestamp}\n{:.4}%\n", percent(done, self.total));
        atomic_write(&self.path, text.as_bytes())
    }
}

fn percent(done: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    let raw = done as f64 / total as f64 * 100.0;
    (raw * 10_000.0).round() / 10_000.0
}

/// Where a validation pass writes its predictions.
///
/// Predictions are numbered globally (`batch * batch_size + item`, six digits) and
/// bucketed into subdirectories named by the first four digits, so no directory
/// grows past a hundred entries.
///
/// When a [`ProgressFile`] is attached, each [`PredictionSink::finish_batch`]
/// rewrites it, so a long validation pass can be followed from outside.
#[derive(Debug)]
pub struct PredictionSink {
    dir: PathBuf,
    written: usize,
    progress: Option<ProgressFile>,
    batches_done: u64,
}

impl PredictionSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            written: 0,
            progress: None,
            batches_done: 0,
        }
    }

    pub fn with_progress(mut self, progress: ProgressFile) -> Self {
        self.progress = Some(progress);
        self
    }

    /// Marks one batch as done and updates the attached progress file, if any.
    pub fn finish_batch(&mut self) -> Result<()> {
        self.batches_done += 1;
        match &self.progress {
            Some(progress) => progress.record(self.batches_done),
            None => Ok(()),
        }
    }

    pub fn batches_done(&self) -> u64 {
        self.batches_done
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Number of paths handed out so far.
    pub fn written(&self) -> usize {
        self.written
    }

    /// Path for one prediction, creating its bucket directory.
    pub fn path_for(
        &mut self,
        batch: usize,
        batch_size: usize,
        item: usize,
        suffix: &str,
        extension: &str,
    ) -> Result<PathBuf> {
        let number = format!("{:06}", batch * batch_size + item);
        let bucket = self.dir.join(&number[..4]);
        std::fs::create_dir_all(&bucket)
            .map_err(|e| TrainlogError::fs("create prediction directory", &bucket, e))?;

        let mut file_name = number;
        if !suffix.is_empty() {
            file_name.push('_');
            file_name.push_str(suffix);
        }
        file_name.push('.');
        file_name.push_str(extension);

        self.written += 1;
        Ok(bucket.join(file_name))
    }
}

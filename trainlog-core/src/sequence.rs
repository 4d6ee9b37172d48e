//! Numbered directory sequences.
//!
//! Checkpoints live in directories named by a zero-padded number. A purely numeric
//! name is the completion marker; a failed attempt is renamed to
//! `<number>.incomplete`, which takes it out of the sequence.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::{Result, TrainlogError};

/// Width checkpoint numbers are padded to.
pub const CHECKPOINT_WIDTH: usize = 5;

/// Suffix appended to a checkpoint directory whose write failed.
pub const INCOMPLETE_SUFFIX: &str = ".incomplete";

/// Lifecycle state of a checkpoint directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckpointStatus {
    InProgress,
    Complete,
    Incomplete,
}

impl CheckpointStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CheckpointStatus::InProgress => "in_progress",
            CheckpointStatus::Complete => "complete",
            CheckpointStatus::Incomplete => "incomplete",
        }
    }
}

impl fmt::Display for CheckpointStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A checkpoint directory found under a parent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointEntry {
    pub number: u64,
    pub status: CheckpointStatus,
    pub path: PathBuf,
}

/// Formats `number` as a checkpoint directory name (`7` -> `00007`).
pub fn checkpoint_dir_name(number: u64) -> String {
    format!("{number:0width$}", width = CHECKPOINT_WIDTH)
}

/// Name of the marker a failed attempt at `number` is renamed to.
pub fn incomplete_marker_name(number: u64) -> String {
    format!("{}{INCOMPLETE_SUFFIX}", checkpoint_dir_name(number))
}

/// Parses a purely numeric directory name. Signs, whitespace and suffixes are rejected.
pub fn parse_number(name: &str) -> Option<u64> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    name.parse().ok()
}

fn parse_entry(name: &str) -> Option<(u64, CheckpointStatus)> {
    if let Some(number) = parse_number(name) {
        return Some((number, CheckpointStatus::Complete));
    }
    name.strip_suffix(INCOMPLETE_SUFFIX)
        .and_then(parse_number)
        .map(|number| (number, CheckpointStatus::Incomplete))
}

/// Highest purely numeric subdirectory of `parent`, or `None` when there is none
/// (including when `parent` does not exist).
///
/// Only directory names matter; creation order and timestamps are ignored.
pub fn latest_number(parent: &Path) -> Result<Option<u64>> {
    let entries = match std::fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(TrainlogError::fs("list directory", parent, e)),
    };

    let mut latest = None;
    for entry in entries {
        let entry = entry.map_err(|e| TrainlogError::fs("list directory", parent, e))?;
        if !entry.path().is_dir() {
            continue;
        }
        let Some(number) = entry.file_name().to_str().and_then(parse_number) else {
            continue;
        };
        latest = latest.max(Some(number));
    }
    Ok(latest)
}

/// Number the next checkpoint under `parent` should use.
pub fn next_number(parent: &Path) -> Result<u64> {
    Ok(latest_number(parent)?.map_or(0, |n| n + 1))
}

/// Lists complete checkpoints and incomplete markers under `parent`, ordered by
/// number with the complete directory first on ties.
pub fn list_checkpoints(parent: &Path) -> Result<Vec<CheckpointEntry>> {
    let entries = match std::fs::read_dir(parent) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(TrainlogError::fs("list directory", parent, e)),
    };

    let mut checkpoints = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| TrainlogError::fs("list directory", parent, e))?;
        let path = entry.path();
        if !path.is_dir() {
            continue;
        }
        if let Some((number, status)) = entry.file_name().to_str().and_then(parse_entry) {
            checkpoints.push(CheckpointEntry {
                number,
                status,
                path,
            });
        }
    }
    checkpoints.sort_by(|a, b| a.number.cmp(&b.number).then(a.status.cmp(&b.status)));
    Ok(checkpoints)
}

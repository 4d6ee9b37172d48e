//! Atomic checkpoint transactions.
//!
//! A checkpoint is written inside a freshly allocated numbered directory. If the
//! body fails (returns `Err` or panics) the directory is renamed to
//! `<number>.incomplete`, so it can never be picked up as the latest checkpoint.
//! Cleanup problems are logged and swallowed; the body's own error is what the
//! caller sees.

use std::path::{Path, PathBuf};

use crate::error::{Result, TrainlogError};
use crate::scope::{DirStack, ScopedDir};
use crate::sequence::{checkpoint_dir_name, incomplete_marker_name, next_number};

/// A checkpoint whose body finished without fault.
#[derive(Debug, Clone, PartialEq)]
pub struct Committed<T> {
    pub number: u64,
    pub path: PathBuf,
    pub value: T,
}

/// Runs `body` inside a new numbered directory under `parent`.
///
/// `parent` is resolved against the current context and created if missing. The
/// next number is `latest_number(parent) + 1`. On success the numeric directory
/// stays in place; on failure it is demoted to its incomplete marker.
pub fn atomic_checkpoint<T, E, F>(
    ctx: &mut DirStack,
    parent: impl AsRef<Path>,
    body: F,
) -> std::result::Result<Committed<T>, E>
where
    F: FnOnce(&mut ScopedDir<'_>) -> std::result::Result<T, E>,
    E: From<TrainlogError>,
{
    // Entered separately so the parent exists before numbering on the first checkpoint.
    let mut parent_scope = ctx.enter(parent)?;
    let number = next_number(parent_scope.path())?;
    let name = checkpoint_dir_name(number);

    let mut demotion = DemoteOnFailure::new(parent_scope.resolve(&name), number);
    let mut scope = parent_scope.enter(&name)?;
    demotion.arm();
    tracing::debug!(number, path = %scope.path().display(), "Checkpoint in progress");

    let value = body(&mut scope)?;

    demotion.disarm();
    let path = scope.path().to_path_buf();
    tracing::info!(number, path = %path.display(), "Checkpoint committed");
    Ok(Committed {
        number,
        path,
        value,
    })
}

/// Renames checkpoint `number` under `parent` to its incomplete marker, replacing
/// any stale marker left by an earlier failed attempt at the same number.
pub fn mark_incomplete(parent: &Path, number: u64) -> Result<PathBuf> {
    demote(&parent.join(checkpoint_dir_name(number)), number)
}

fn demote(path: &Path, number: u64) -> Result<PathBuf> {
    let marker = path.with_file_name(incomplete_marker_name(number));
    if marker.exists() {
        std::fs::remove_dir_all(&marker)
            .map_err(|e| TrainlogError::fs("remove stale incomplete marker", &marker, e))?;
    }
    std::fs::rename(path, &marker)
        .map_err(|e| TrainlogError::fs("rename to incomplete marker", path, e))?;
    Ok(marker)
}

/// Demotes the checkpoint directory when dropped while armed.
struct DemoteOnFailure {
    path: PathBuf,
    number: u64,
    armed: bool,
}

impl DemoteOnFailure {
    fn new(path: PathBuf, number: u64) -> Self {
        Self {
            path,
            number,
            armed: false,
        }
    }

    fn arm(&mut self) {
        self.armed = true;
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for DemoteOnFailure {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        match demote(&self.path, self.number) {
            Ok(marker) => {
                tracing::warn!(number = self.number, marker = %marker.display(), "Checkpoint marked incomplete");
            }
            Err(e) => {
                tracing::warn!(number = self.number, error = %e, "Could not mark checkpoint incomplete");
            }
        }
    }
}

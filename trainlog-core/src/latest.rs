//! The sibling-level `latest` pointer to the most recently started experiment.
//!
//! `latest` is a relative symbolic link next to the experiment directory whose
//! target is the experiment's own directory name, so the whole experiments folder
//! can be moved without breaking it.

use std::path::{Path, PathBuf};

use crate::error::{Result, TrainlogError};

/// Name of the pointer created next to experiment roots.
pub const LATEST_NAME: &str = "latest";

/// Points `<parent of root>/latest` at `root`, replacing any previous pointer.
///
/// A dangling link is still replaced: presence is checked with `symlink_metadata`,
/// which does not follow the link.
pub fn update_latest(root: &Path) -> Result<PathBuf> {
    let (parent, name) = split_root(root)?;
    let link = parent.join(LATEST_NAME);

    match std::fs::symlink_metadata(&link) {
        Ok(meta) if meta.is_dir() => {
            return Err(TrainlogError::invalid_input(format!(
                "'{}' is a real directory, refusing to replace it with a link",
                link.display()
            )));
        }
        Ok(_) => remove_link(&link)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(TrainlogError::fs("inspect latest pointer", &link, e)),
    }

    create_link(Path::new(name), &link)?;
    tracing::info!(link = %link.display(), target = %name.display(), "Updated latest pointer");
    Ok(link)
}

/// Directory the `latest` pointer in `parent` resolves to, if it exists and is live.
pub fn resolve_latest(parent: &Path) -> Option<PathBuf> {
    let link = parent.join(LATEST_NAME);
    let target = std::fs::read_link(&link).ok()?;
    let resolved = if target.is_absolute() {
        target
    } else {
        parent.join(target)
    };
    resolved.is_dir().then_some(resolved)
}

fn split_root(root: &Path) -> Result<(&Path, &Path)> {
    let name = root.file_name().ok_or_else(|| {
        TrainlogError::invalid_input(format!(
            "experiment root '{}' has no directory name",
            root.display()
        ))
    })?;
    let parent = root.parent().unwrap_or_else(|| Path::new("."));
    Ok((parent, Path::new(name)))
}

fn remove_link(link: &Path) -> Result<()> {
    #[cfg(windows)]
    {
        // Directory symlinks on Windows are removed like directories.
        if std::fs::remove_dir(link).is_ok() {
            return Ok(());
        }
    }
    std::fs::remove_file(link).map_err(|e| TrainlogError::fs("remove latest pointer", link, e))
}

#[cfg(unix)]
fn create_link(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link)
        .map_err(|e| TrainlogError::fs("create latest pointer", link, e))
}

#[cfg(windows)]
fn create_link(target: &Path, link: &Path) -> Result<()> {
    std::os::windows::fs::symlink_dir(target, link)
        .map_err(|e| TrainlogError::fs("create latest pointer", link, e))
}

//! Scoped directory navigation.
//!
//! A [`DirStack`] is the working context every artifact writer resolves paths
//! against. Entering a directory pushes a frame and hands back a [`ScopedDir`]
//! guard; dropping the guard pops the frame again, whether the scope ended
//! normally, through `?`, or by unwinding.
//!
//! Nested scopes are opened from the guard itself (it derefs to the stack), so
//! the innermost scope always has to be closed first:
//!
//! ```
//! use trainlog_core::scope::DirStack;
//!
//! let tmp = tempfile::tempdir()?;
//! let mut ctx = DirStack::new(tmp.path());
//! {
//!     let mut run = ctx.enter("run")?;
//!     let ckpt = run.enter("checkpoints")?;
//!     assert!(ckpt.current().ends_with("run/checkpoints"));
//! }
//! assert_eq!(ctx.current(), tmp.path());
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::ops::{Deref, DerefMut};
use std::path::{Path, PathBuf};

use crate::error::{Result, TrainlogError};

/// Stack of absolute directories; the innermost one is the current working context.
#[derive(Debug, Clone)]
pub struct DirStack {
    base: PathBuf,
    frames: Vec<PathBuf>,
}

impl DirStack {
    /// Creates a context rooted at `base`. Relative bases are resolved against the
    /// process working directory once, here.
    pub fn new(base: impl AsRef<Path>) -> Self {
        let base = base.as_ref();
        let base = if base.is_absolute() {
            base.to_path_buf()
        } else {
            std::env::current_dir()
                .map(|cwd| cwd.join(base))
                .unwrap_or_else(|_| base.to_path_buf())
        };
        Self {
            base,
            frames: Vec::new(),
        }
    }

    /// Creates a context rooted at the process working directory.
    pub fn from_current_dir() -> Result<Self> {
        let cwd = std::env::current_dir()
            .map_err(|e| TrainlogError::fs("read current directory", ".", e))?;
        Ok(Self::new(cwd))
    }

    /// The directory paths are currently resolved against.
    pub fn current(&self) -> &Path {
        self.frames.last().unwrap_or(&self.base)
    }

    /// Number of open scopes.
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Resolves `path` against the current directory.
    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.current().join(path)
    }

    /// Enters `path`, creating it (and any missing ancestors) first if needed.
    pub fn enter(&mut self, path: impl AsRef<Path>) -> Result<ScopedDir<'_>> {
        let exists_already = self.push(path.as_ref())?;
        Ok(ScopedDir {
            stack: self,
            exists_already,
        })
    }

    pub(crate) fn push(&mut self, path: &Path) -> Result<bool> {
        let target = self.resolve(path);
        let exists_already = target.exists();
        if !exists_already {
            std::fs::create_dir_all(&target)
                .map_err(|e| TrainlogError::fs("create directory", &target, e))?;
        }
        tracing::debug!(path = %target.display(), exists_already, "Opening directory");
        self.frames.push(target);
        Ok(exists_already)
    }

    pub(crate) fn pop(&mut self) {
        self.frames.pop();
    }
}

/// Guard for one open directory scope. Dropping it restores the previous context.
#[derive(Debug)]
pub struct ScopedDir<'a> {
    stack: &'a mut DirStack,
    exists_already: bool,
}

impl ScopedDir<'_> {
    /// Whether the directory was already present before this scope opened it.
    pub fn exists_already(&self) -> bool {
        self.exists_already
    }

    /// Absolute path of this scope.
    pub fn path(&self) -> &Path {
        self.stack.current()
    }
}

impl Deref for ScopedDir<'_> {
    type Target = DirStack;

    fn deref(&self) -> &DirStack {
        &*self.stack
    }
}

impl DerefMut for ScopedDir<'_> {
    fn deref_mut(&mut self) -> &mut DirStack {
        &mut *self.stack
    }
}

impl Drop for ScopedDir<'_> {
    fn drop(&mut self) {
        self.stack.pop();
    }
}

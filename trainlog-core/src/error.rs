//! Error types for trainlog.
//!
//! Filesystem faults are fatal and carry the failing operation and path.
//! Configuration faults are raised before any side effect is committed.
//! Collaborator faults wrap whatever the caller's training code returned.

use std::path::PathBuf;

/// Error type returned by caller-supplied collaborators (training loops, plotters).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Top-level error type for the trainlog core library.
#[derive(Debug, thiserror::Error)]
pub enum TrainlogError {
    #[error("Filesystem error: {op} '{}': {source}", .path.display())]
    Filesystem {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("{action} failed: {source}")]
    Collaborator {
        action: &'static str,
        #[source]
        source: BoxError,
    },

    #[error("No checkpoint found under '{}'", .parent.display())]
    NoCheckpoint { parent: PathBuf },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML serialization error: {0}")]
    Toml(#[from] toml::ser::Error),
}

/// Errors from configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error(
        "Comment did not change between runs ({}). Write a new comment or delete the old one.",
        .path.display()
    )]
    UnchangedComment { path: PathBuf },

    #[error("Frequency '{name}' must be a positive integer")]
    InvalidFrequency { name: &'static str },

    #[error("max_iters must be a positive integer")]
    InvalidMaxIters,

    #[error("Failed to load configuration: {0}")]
    Load(String),
}

impl TrainlogError {
    /// Wraps an I/O error with the operation and path that produced it.
    pub fn fs(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Filesystem {
            op,
            path: path.into(),
            source,
        }
    }

    pub fn collaborator(action: &'static str, source: impl Into<BoxError>) -> Self {
        Self::Collaborator {
            action,
            source: source.into(),
        }
    }

    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }
}

/// A type alias for results using [`TrainlogError`].
pub type Result<T> = std::result::Result<T, TrainlogError>;

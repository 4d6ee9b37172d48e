//! Per-experiment log file.
//!
//! The subscriber is installed before any experiment root exists, so the layer
//! that writes `<root>/trainlog.log` starts empty and is filled in through a
//! reload handle once the session has opened the root.

use std::path::Path;

use anyhow::Context;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{Layer, Registry, reload};

/// Log file written inside every experiment root.
pub const EXPERIMENT_LOG_FILE: &str = "trainlog.log";

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Layer slot for the current experiment's JSON log.
#[derive(Clone)]
pub struct ExperimentLog {
    handle: reload::Handle<Option<BoxedLayer>, Registry>,
}

/// Keeps the experiment log attached. Dropping it detaches the layer and flushes
/// the file.
pub struct AttachedLog {
    handle: reload::Handle<Option<BoxedLayer>, Registry>,
    _worker: WorkerGuard,
}

impl ExperimentLog {
    /// An empty slot and the layer to install directly on the registry.
    pub fn layer() -> (reload::Layer<Option<BoxedLayer>, Registry>, Self) {
        let (layer, handle) = reload::Layer::new(None);
        (layer, Self { handle })
    }

    /// Starts mirroring all events as JSON into `root/trainlog.log`, appending
    /// to what earlier launches of the same experiment wrote.
    pub fn attach(&self, root: &Path) -> anyhow::Result<AttachedLog> {
        let appender = RollingFileAppender::builder()
            .rotation(Rotation::NEVER)
            .filename_prefix(EXPERIMENT_LOG_FILE)
            .build(root)
            .with_context(|| format!("Failed to open log file in '{}'", root.display()))?;
        let (writer, worker) = tracing_appender::non_blocking(appender);
        let layer: BoxedLayer = tracing_subscriber::fmt::layer()
            .json()
            .with_writer(writer)
            .boxed();

        self.handle
            .reload(Some(layer))
            .context("Failed to attach experiment log")?;
        Ok(AttachedLog {
            handle: self.handle.clone(),
            _worker: worker,
        })
    }
}

impl Drop for AttachedLog {
    fn drop(&mut self) {
        if let Err(e) = self.handle.reload(None::<BoxedLayer>) {
            eprintln!("Failed to detach experiment log: {e}");
        }
    }
}

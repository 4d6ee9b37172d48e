//! # Trainlog Core
//!
//! Crash-resilient bookkeeping for long-running training jobs.
//! Provides scoped working directories, numbered checkpoint sequences, atomic
//! checkpoint transactions, and an experiment session that either initializes a
//! fresh experiment or resumes from the last complete checkpoint, reporting its
//! progress as a lazy stream of events.
//!
//! ```no_run
//! use trainlog_core::{DirStack, ExperimentSession, LogEvent, RunSettings};
//! # fn demo(training: impl trainlog_core::TrainingLoop) -> trainlog_core::Result<()> {
//! let mut ctx = DirStack::from_current_dir()?;
//! let mut session = ExperimentSession::new(RunSettings::new("experiments/mnist", 10_000), training);
//! for event in session.events(&mut ctx)? {
//!     if event? == LogEvent::Checkpoint {
//!         println!("saved a checkpoint");
//!     }
//! }
//! # Ok(())
//! # }
//! ```

pub mod artifacts;
pub mod checkpoint;
pub mod config;
pub mod error;
pub mod hooks;
pub mod latest;
pub mod schedule;
pub mod scope;
pub mod sequence;
pub mod session;

// Re-export commonly used types at the crate root.
pub use checkpoint::{Committed, atomic_checkpoint};
pub use config::{TrainlogConfig, load_config};
pub use error::{BoxError, ConfigError, Result, TrainlogError};
pub use hooks::{Losses, MemoryProbe, NoPlots, Plotter, ProcStatusProbe, TrainingLoop, ValidationLoop};
pub use latest::{resolve_latest, update_latest};
pub use schedule::{EventSet, Frequencies, LogEvent, events_for};
pub use scope::{DirStack, ScopedDir};
pub use sequence::{CheckpointEntry, CheckpointStatus, latest_number, list_checkpoints, next_number};
pub use session::{Events, ExperimentSession, RunSettings, TrainingState, latest_checkpoint};

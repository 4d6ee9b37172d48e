//! Event scheduling: which periodic actions fire on a given iteration.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::ConfigError;

/// Something the session did (or is about to do) for the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogEvent {
    Init,
    Resume,
    Tick,
    Progress,
    Checkpoint,
    Epoch,
}

impl LogEvent {
    pub const ALL: [LogEvent; 6] = [
        LogEvent::Init,
        LogEvent::Resume,
        LogEvent::Tick,
        LogEvent::Progress,
        LogEvent::Checkpoint,
        LogEvent::Epoch,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            LogEvent::Init => "INIT",
            LogEvent::Resume => "RESUME",
            LogEvent::Tick => "TICK",
            LogEvent::Progress => "PROGRESS",
            LogEvent::Checkpoint => "CHECKPOINT",
            LogEvent::Epoch => "EPOCH",
        }
    }

    fn bit(self) -> u8 {
        1 << self as u8
    }
}

impl fmt::Display for LogEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A set of events. Iterates in declaration order (TICK before PROGRESS before CHECKPOINT).
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EventSet(u8);

impl EventSet {
    pub const fn new() -> Self {
        Self(0)
    }

    pub fn insert(&mut self, event: LogEvent) {
        self.0 |= event.bit();
    }

    pub fn contains(&self, event: LogEvent) -> bool {
        self.0 & event.bit() != 0
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn iter(&self) -> impl Iterator<Item = LogEvent> + '_ {
        LogEvent::ALL.into_iter().filter(|e| self.contains(*e))
    }
}

impl FromIterator<LogEvent> for EventSet {
    fn from_iter<I: IntoIterator<Item = LogEvent>>(iter: I) -> Self {
        let mut set = EventSet::new();
        for event in iter {
            set.insert(event);
        }
        set
    }
}

impl<const N: usize> From<[LogEvent; N]> for EventSet {
    fn from(events: [LogEvent; N]) -> Self {
        events.into_iter().collect()
    }
}

impl fmt::Debug for EventSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

/// How often (in iterations) each periodic action runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frequencies {
    #[serde(default = "default_tick")]
    pub tick: u64,
    #[serde(default = "default_progress")]
    pub progress: u64,
    #[serde(default = "default_checkpoint")]
    pub checkpoint: u64,
}

impl Default for Frequencies {
    fn default() -> Self {
        Self {
            tick: default_tick(),
            progress: default_progress(),
            checkpoint: default_checkpoint(),
        }
    }
}

fn default_tick() -> u64 {
    20
}

fn default_progress() -> u64 {
    200
}

fn default_checkpoint() -> u64 {
    1000
}

impl Frequencies {
    pub fn new(tick: u64, progress: u64, checkpoint: u64) -> Self {
        Self {
            tick,
            progress,
            checkpoint,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("tick", self.tick),
            ("progress", self.progress),
            ("checkpoint", self.checkpoint),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidFrequency { name });
            }
        }
        Ok(())
    }
}

/// Periodic events due on `iteration`. INIT, RESUME and EPOCH are never included:
/// they are driven by the session and the data source, not the counter.
///
/// A zero frequency never fires.
pub fn events_for(iteration: u64, frequencies: &Frequencies) -> EventSet {
    let due = |every: u64| iteration.checked_rem(every) == Some(0);

    let mut events = EventSet::new();
    if due(frequencies.tick) {
        events.insert(LogEvent::Tick);
    }
    if due(frequencies.progress) {
        events.insert(LogEvent::Progress);
    }
    if due(frequencies.checkpoint) {
        events.insert(LogEvent::Checkpoint);
    }
    events
}

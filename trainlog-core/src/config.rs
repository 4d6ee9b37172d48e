//! Configuration for trainlog.
//!
//! Uses `figment` for layered configuration: defaults -> user config file ->
//! workspace `trainlog.toml` -> environment -> explicit overrides.

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{ConfigError, Result};
use crate::schedule::Frequencies;
use crate::session::RunSettings;

/// Name of the workspace-level configuration file.
pub const WORKSPACE_CONFIG_FILE: &str = "trainlog.toml";

/// Top-level trainlog configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainlogConfig {
    /// Directory experiment roots are created in.
    #[serde(default = "default_experiments_dir")]
    pub experiments_dir: PathBuf,
    #[serde(default = "default_max_iters")]
    pub max_iters: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    #[serde(default)]
    pub frequencies: Frequencies,
}

fn default_experiments_dir() -> PathBuf {
    PathBuf::from("experiments")
}

fn default_max_iters() -> u64 {
    10_000
}

impl Default for TrainlogConfig {
    fn default() -> Self {
        Self {
            experiments_dir: default_experiments_dir(),
            max_iters: default_max_iters(),
            comment: None,
            frequencies: Frequencies::default(),
        }
    }
}

impl TrainlogConfig {
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if self.max_iters == 0 {
            return Err(ConfigError::InvalidMaxIters);
        }
        self.frequencies.validate()
    }

    /// Settings for a run named `name` inside [`Self::experiments_dir`].
    pub fn run_settings(&self, name: &str) -> RunSettings {
        RunSettings {
            path: self.experiments_dir.join(name),
            comment: self.comment.clone(),
            max_iters: self.max_iters,
            frequencies: self.frequencies,
        }
    }
}

/// Path of the user-level config file, if a home directory can be determined.
pub fn user_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "trainlog", "trainlog")
        .map(|dirs| dirs.config_dir().join("config.toml"))
}

/// Load configuration from all layers and validate the result.
///
/// `overrides` is merged last, so only the keys it actually carries win; pass a
/// `Serialized`-able map or struct with the flags the caller set.
pub fn load_config<T: Serialize>(
    workspace: Option<&Path>,
    overrides: Option<&T>,
) -> Result<TrainlogConfig> {
    let mut figment = Figment::from(Serialized::defaults(TrainlogConfig::default()));

    // User-level config
    if let Some(user_config) = user_config_path() {
        if user_config.exists() {
            figment = figment.merge(Toml::file(&user_config));
        }
    }

    // Workspace-level config
    if let Some(ws) = workspace {
        let ws_config = ws.join(WORKSPACE_CONFIG_FILE);
        if ws_config.exists() {
            figment = figment.merge(Toml::file(&ws_config));
        }
    }

    // Environment variables (TRAINLOG_MAX_ITERS, TRAINLOG_FREQUENCIES__TICK, etc.)
    figment = figment.merge(Env::prefixed("TRAINLOG_").split("__"));

    if let Some(overrides) = overrides {
        figment = figment.merge(Serialized::defaults(overrides));
    }

    extract(figment)
}

fn extract(figment: Figment) -> Result<TrainlogConfig> {
    let config: TrainlogConfig = figment
        .extract()
        .map_err(|e| ConfigError::Load(e.to_string()))?;
    config.validate()?;
    Ok(config)
}

//! Engine-wide configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, File};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::constants::{CONFIG_DIR_NAME, DEFAULT_SAVE_DELAY};
use crate::error::{ResourceError, ResourceResult};

/// How to resolve two resources claiming to be standard for the same alarm
/// type when the resource configuration is read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StandardConflictPolicy {
    /// The resource read first keeps the standard flag
    #[default]
    FirstLoadedWins,
    /// The resource read last keeps the standard flag
    LastLoadedWins,
}

fn default_base_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join(CONFIG_DIR_NAME)
}

fn default_resources_file() -> PathBuf {
    default_base_config_dir().join("resources.toml")
}

fn default_cache_dir() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("~/.cache"))
        .join(CONFIG_DIR_NAME)
}

fn default_save_delay() -> String {
    humantime::format_duration(DEFAULT_SAVE_DELAY).to_string()
}

fn default_watch_files() -> bool {
    true
}

/// Configuration at ~/.config/alarmcal/engine.toml
///
/// Every key is optional. The per-resource configuration lives in the
/// separate resources file managed by `ConfigManager`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_resources_file")]
    pub resources_file: PathBuf,

    /// Where local copies of remote calendars are kept
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Debounce interval for saves triggered by event changes, e.g. "1s"
    #[serde(default = "default_save_delay")]
    pub save_delay: String,

    #[serde(default = "default_watch_files")]
    pub watch_files: bool,

    #[serde(default)]
    pub standard_conflict: StandardConflictPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            resources_file: default_resources_file(),
            cache_dir: default_cache_dir(),
            save_delay: default_save_delay(),
            watch_files: default_watch_files(),
            standard_conflict: StandardConflictPolicy::default(),
        }
    }
}

impl EngineConfig {
    pub fn config_path() -> ResourceResult<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| ResourceError::Config("Could not determine config directory".into()))?
            .join(CONFIG_DIR_NAME);

        Ok(config_dir.join("engine.toml"))
    }

    /// Load from the default location; a missing file yields the defaults.
    pub fn load() -> ResourceResult<Self> {
        Self::load_from(&Self::config_path()?)
    }

    pub fn load_from(path: &Path) -> ResourceResult<Self> {
        Config::builder()
            .add_source(File::from(path.to_path_buf()).required(false))
            .build()
            .map_err(|e| ResourceError::Config(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ResourceError::Config(e.to_string()))
    }

    /// Configuration rooted in explicit directories instead of the user's.
    pub fn in_dirs(config_dir: &Path, cache_dir: &Path) -> Self {
        EngineConfig {
            resources_file: config_dir.join("resources.toml"),
            cache_dir: cache_dir.to_path_buf(),
            ..EngineConfig::default()
        }
    }

    pub fn resources_path(&self) -> PathBuf {
        expand(&self.resources_file)
    }

    pub fn cache_path(&self) -> PathBuf {
        expand(&self.cache_dir)
    }

    pub fn save_delay(&self) -> Duration {
        humantime::parse_duration(&self.save_delay).unwrap_or_else(|e| {
            warn!(save_delay = %self.save_delay, "Invalid save delay, using default: {}", e);
            DEFAULT_SAVE_DELAY
        })
    }
}

fn expand(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).into_owned())
}

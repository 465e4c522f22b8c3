//! Engine settings and their YAML persistence.

use crate::defaults;
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Tunables of the folder synchronization engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Whether the emulator reports paused/waiting edges on this platform.
    ///
    /// Selects the debounce interval and relaxes config-file parsing while a
    /// VM runs when the edges are not available.
    #[serde(default = "crate::defaults::pause_events")]
    pub pause_events: bool,

    /// Explicit debounce interval in milliseconds (overrides the platform default).
    #[serde(default)]
    pub debounce_ms: Option<u64>,

    /// Minimum time between folder size checks while the VM is running.
    #[serde(default = "crate::defaults::running_size_check_ms")]
    pub running_size_check_ms: u64,

    /// Interval of the clock that refreshes elapsed-time strings.
    #[serde(default = "crate::defaults::clock_tick_secs")]
    pub clock_tick_secs: u64,

    /// Config files larger than this are skipped.
    #[serde(default = "crate::defaults::max_config_bytes")]
    pub max_config_bytes: u64,

    /// Poll interval of the fallback watcher backend.
    #[serde(default = "crate::defaults::poll_fallback_ms")]
    pub poll_fallback_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pause_events: defaults::pause_events(),
            debounce_ms: None,
            running_size_check_ms: defaults::running_size_check_ms(),
            clock_tick_secs: defaults::clock_tick_secs(),
            max_config_bytes: defaults::max_config_bytes(),
            poll_fallback_ms: defaults::poll_fallback_ms(),
        }
    }
}

impl EngineConfig {
    /// Effective debounce interval.
    ///
    /// Without pause edges the emulator gives fewer hints about when its
    /// writes are done, so the shorter interval is used.
    pub fn debounce_interval(&self) -> Duration {
        let ms = self.debounce_ms.unwrap_or(if self.pause_events {
            defaults::DEBOUNCE_WITH_PAUSE_EVENTS_MS
        } else {
            defaults::DEBOUNCE_WITHOUT_PAUSE_EVENTS_MS
        });
        Duration::from_millis(ms)
    }

    pub fn running_size_check_interval(&self) -> Duration {
        Duration::from_millis(self.running_size_check_ms)
    }

    pub fn clock_tick(&self) -> Duration {
        Duration::from_secs(self.clock_tick_secs)
    }

    pub fn poll_fallback_interval(&self) -> Duration {
        Duration::from_millis(self.poll_fallback_ms)
    }

    /// Reject values that would make the engine spin or skip every config file.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.debounce_ms == Some(0) {
            return Err(ConfigError::Validation(
                "debounce_ms must be greater than 0".to_string(),
            ));
        }
        if self.clock_tick_secs == 0 {
            return Err(ConfigError::Validation(
                "clock_tick_secs must be greater than 0".to_string(),
            ));
        }
        if self.poll_fallback_ms == 0 {
            return Err(ConfigError::Validation(
                "poll_fallback_ms must be greater than 0".to_string(),
            ));
        }
        if self.max_config_bytes == 0 {
            return Err(ConfigError::Validation(
                "max_config_bytes must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Directory holding vmdeck configuration files.
    pub fn config_dir() -> PathBuf {
        match dirs::config_dir() {
            Some(dir) => dir.join("vmdeck"),
            None => PathBuf::from("."),
        }
    }

    /// Default location of the engine configuration file.
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("engine.yaml")
    }

    /// Load configuration from the default location, or defaults if absent.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from `path`.
    ///
    /// A missing file yields the defaults; a present but invalid file is an error.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            log::info!(
                "Engine config {} not found, using defaults",
                path.display()
            );
            return Ok(Self::default());
        }

        log::info!("Loading engine config from {}", path.display());
        let contents = fs::read_to_string(path)?;
        let config: EngineConfig = if contents.trim().is_empty() {
            Self::default()
        } else {
            serde_yaml_ng::from_str(&contents)?
        };
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let yaml = serde_yaml_ng::to_string(self)?;

        // Atomic save: write to temp file then rename to prevent corruption on crash
        let temp_path = path.with_extension("yaml.tmp");
        fs::write(&temp_path, &yaml)?;
        fs::rename(&temp_path, path)?;

        Ok(())
    }
}

//! Configuration types for the visual timeout manager.

use crate::error::{Result, TimeoutError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Worker executor settings.
    pub executor: ExecutorConfig,
    /// Countdown timer settings.
    pub timer: TimerConfig,
    /// Default timeouts per presentation lifespan.
    pub presentation: LifespanTimeoutConfig,
}

/// Executor configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    /// Name of the worker thread that serializes all state changes.
    pub thread_name: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            thread_name: "visual-timeout".to_owned(),
        }
    }
}

/// Which clock drives the countdown.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerBackend {
    /// A named std thread per countdown.
    #[default]
    Thread,
    /// A task on the surrounding tokio runtime.
    Tokio,
}

/// Timer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    pub backend: TimerBackend,
    /// Thread name for countdowns (thread backend only).
    pub thread_name: String,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            backend: TimerBackend::default(),
            thread_name: "visual-timeout-timer".to_owned(),
        }
    }
}

/// Default visual timeouts, in milliseconds, keyed by presentation lifespan.
///
/// Permanent presentations never time out and have no entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LifespanTimeoutConfig {
    pub transient_ms: u64,
    pub short_ms: u64,
    pub long_ms: u64,
}

impl Default for LifespanTimeoutConfig {
    fn default() -> Self {
        Self {
            transient_ms: 10_000,
            short_ms: 30_000,
            long_ms: 40_000,
        }
    }
}

impl LifespanTimeoutConfig {
    pub fn transient(&self) -> Duration {
        Duration::from_millis(self.transient_ms)
    }

    pub fn short(&self) -> Duration {
        Duration::from_millis(self.short_ms)
    }

    pub fn long(&self) -> Duration {
        Duration::from_millis(self.long_ms)
    }
}

impl TimeoutConfig {
    /// Load configuration from a TOML file, falling back to defaults for missing fields.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| TimeoutError::Config(e.to_string()))
    }

    /// Save configuration to a TOML file, creating parent directories as needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written or the config cannot be serialized.
    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| TimeoutError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Returns the default config file path: `~/.config/visual-timeout/config.toml`.
    pub fn default_config_path() -> PathBuf {
        if let Some(config) = std::env::var_os("XDG_CONFIG_HOME") {
            PathBuf::from(config)
                .join("visual-timeout")
                .join("config.toml")
        } else if let Some(home) = std::env::var_os("HOME") {
            PathBuf::from(home)
                .join(".config")
                .join("visual-timeout")
                .join("config.toml")
        } else {
            PathBuf::from("/tmp/visual-timeout-config/config.toml")
        }
    }
}

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::MonitorError;

/// Engine configuration. Every field falls back to its default when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Minimum age before a cached snapshot is re-probed
    pub update_interval_ms: u64,
    /// Upper bound for a single probe call
    pub probe_timeout_ms: u64,
    /// Scheduler tick (the critical tier's period)
    pub tick_ms: u64,
    /// Sleep between registry checks while no client is connected
    pub idle_poll_ms: u64,
    /// Sleep after a failed cycle
    pub error_backoff_ms: u64,
    /// Size of the top-process list
    pub top_processes: usize,
    pub collect_gpu: bool,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: 2000,
            probe_timeout_ms: 3000,
            tick_ms: 1000,
            idle_poll_ms: 2000,
            error_backoff_ms: 5000,
            top_processes: 10,
            collect_gpu: true,
        }
    }
}

impl MonitorConfig {
    /// Load from the user config directory, defaulting when no file exists
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;
        Self::load_from(&config_path)
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        if data.trim().is_empty() {
            return Ok(Self::default());
        }

        let config: Self = serde_json::from_str(&data)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let data = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, data).with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir().context("Could not determine config directory")?;

        Ok(config_dir.join("whybusy").join("config.json"))
    }

    /// Reject values that would make the scheduler spin or never sample
    pub fn validate(&self) -> crate::error::Result<()> {
        if self.tick_ms == 0 {
            return Err(MonitorError::config("tick_ms must be greater than zero"));
        }
        if self.probe_timeout_ms == 0 {
            return Err(MonitorError::config("probe_timeout_ms must be greater than zero"));
        }
        if self.top_processes == 0 {
            return Err(MonitorError::config("top_processes must be greater than zero"));
        }
        Ok(())
    }

    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn idle_poll(&self) -> Duration {
        Duration::from_millis(self.idle_poll_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }
}

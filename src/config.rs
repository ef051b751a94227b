//! Configuration loading and persistence.
//!
//! Reads `config.json` from the pendant config directory, falls back to
//! defaults, then applies `PENDANT_*` environment overrides. Every timing is
//! a separate per-domain field in milliseconds.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;
use std::time::Duration;
use std::{fs, path::Path, path::PathBuf};

use crate::constants;
use crate::sync::polling::PollPolicy;
use crate::sync::{SyncConfig, SyncMode};
use crate::ws;

/// Configuration for the pendant client.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    /// Base URL of the pendant server.
    pub server_url: String,
    /// Path of the WebSocket event channel.
    pub event_path: String,
    /// Update mechanisms used by `watch`.
    pub sync_mode: SyncMode,
    /// Keep-alive period on the event channel.
    pub heartbeat_interval_ms: u64,
    /// Delay before each reconnect attempt.
    pub reconnect_delay_ms: u64,
    /// Status polling cadence.
    pub status_poll_ms: u64,
    /// Wait after a failed status fetch.
    pub status_backoff_ms: u64,
    /// Settings polling cadence.
    pub settings_poll_ms: u64,
    /// Wait after a failed settings fetch.
    pub settings_backoff_ms: u64,
    /// File status cadence while running.
    pub file_status_poll_ms: u64,
    /// Wait after a failed file status fetch.
    pub file_status_backoff_ms: u64,
    /// Quiet period for change signals.
    pub debounce_ms: u64,
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: constants::DEFAULT_SERVER_URL.to_string(),
            event_path: constants::DEFAULT_EVENT_PATH.to_string(),
            sync_mode: SyncMode::default(),
            heartbeat_interval_ms: millis(constants::HEARTBEAT_INTERVAL),
            reconnect_delay_ms: millis(constants::RECONNECT_DELAY),
            status_poll_ms: millis(constants::STATUS_POLL_INTERVAL),
            status_backoff_ms: millis(constants::STATUS_FAILURE_BACKOFF),
            settings_poll_ms: millis(constants::SETTINGS_POLL_INTERVAL),
            settings_backoff_ms: millis(constants::SETTINGS_FAILURE_BACKOFF),
            file_status_poll_ms: millis(constants::FILE_STATUS_POLL_INTERVAL),
            file_status_backoff_ms: millis(constants::FILE_STATUS_FAILURE_BACKOFF),
            debounce_ms: millis(constants::DEBOUNCE_QUIET_PERIOD),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// Directory selection priority:
    /// 1. `#[cfg(test)]` (unit tests): `tmp/pendant-test`
    /// 2. `PENDANT_CONFIG_DIR` env var: explicit override
    /// 3. Default: platform config dir (Linux: ~/.config/pendant-link)
    pub fn config_dir() -> Result<PathBuf> {
        let dir = {
            #[cfg(test)]
            {
                PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("tmp/pendant-test")
            }

            #[cfg(not(test))]
            {
                if let Ok(dir) = std::env::var("PENDANT_CONFIG_DIR") {
                    PathBuf::from(dir)
                } else {
                    dirs::config_dir()
                        .context("Could not determine config directory")?
                        .join("pendant-link")
                }
            }
        };
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        Ok(dir)
    }

    /// Path of the config file.
    pub fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing file means defaults. An unreadable or invalid file is an
    /// error rather than a silent fallback.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            Self::load_from_file(&path)?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    /// Reads one config file.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        serde_json::from_str(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    /// Applies `PENDANT_*` environment variables.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies overrides from `lookup`. Unparseable values are logged and
    /// ignored.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(server_url) = lookup("PENDANT_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Some(event_path) = lookup("PENDANT_EVENT_PATH") {
            self.event_path = event_path;
        }

        if let Some(mode) = lookup("PENDANT_SYNC_MODE") {
            match mode.parse() {
                Ok(mode) => self.sync_mode = mode,
                Err(e) => log::warn!("Ignoring PENDANT_SYNC_MODE: {e}"),
            }
        }

        let millis_overrides: [(&str, &mut u64); 3] = [
            ("PENDANT_STATUS_POLL_MS", &mut self.status_poll_ms),
            ("PENDANT_SETTINGS_POLL_MS", &mut self.settings_poll_ms),
            ("PENDANT_RECONNECT_DELAY_MS", &mut self.reconnect_delay_ms),
        ];
        for (key, field) in millis_overrides {
            if let Some(value) = lookup(key) {
                match value.trim().parse::<u64>() {
                    Ok(ms) if ms > 0 => *field = ms,
                    _ => log::warn!("Ignoring {key}={value:?}, expected milliseconds > 0"),
                }
            }
        }
    }

    /// Rejects settings that would make a loop spin or the URL unusable.
    pub fn validate(&self) -> Result<()> {
        if self.server_url.trim().is_empty() {
            anyhow::bail!("server_url is empty");
        }
        let timings = [
            ("heartbeat_interval_ms", self.heartbeat_interval_ms),
            ("reconnect_delay_ms", self.reconnect_delay_ms),
            ("status_poll_ms", self.status_poll_ms),
            ("status_backoff_ms", self.status_backoff_ms),
            ("settings_poll_ms", self.settings_poll_ms),
            ("settings_backoff_ms", self.settings_backoff_ms),
            ("file_status_poll_ms", self.file_status_poll_ms),
            ("file_status_backoff_ms", self.file_status_backoff_ms),
        ];
        if let Some((name, _)) = timings.iter().find(|(_, ms)| *ms == 0) {
            anyhow::bail!("{name} must be greater than zero");
        }
        Ok(())
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    /// Writes the configuration to `path`.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)
            .with_context(|| format!("Failed to write {}", path.display()))?;

        // Owner read/write only
        #[cfg(unix)]
        fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;

        Ok(())
    }

    /// WebSocket URL of the event channel.
    pub fn event_url(&self) -> String {
        ws::event_url(&self.server_url, &self.event_path)
    }

    /// Synchronizer settings derived from this configuration.
    pub fn sync_config(&self) -> SyncConfig {
        SyncConfig {
            event_url: self.event_url(),
            mode: self.sync_mode,
            heartbeat_interval: Duration::from_millis(self.heartbeat_interval_ms),
            reconnect_delay: Duration::from_millis(self.reconnect_delay_ms),
            status: PollPolicy {
                interval: Duration::from_millis(self.status_poll_ms),
                failure_backoff: Duration::from_millis(self.status_backoff_ms),
            },
            settings: PollPolicy {
                interval: Duration::from_millis(self.settings_poll_ms),
                failure_backoff: Duration::from_millis(self.settings_backoff_ms),
            },
            file_status: PollPolicy {
                interval: Duration::from_millis(self.file_status_poll_ms),
                failure_backoff: Duration::from_millis(self.file_status_backoff_ms),
            },
            debounce_quiet: Duration::from_millis(self.debounce_ms),
        }
    }
}

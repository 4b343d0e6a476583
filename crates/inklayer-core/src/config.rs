//! Session configuration.
//!
//! Loaded from JSON. Every field has a default, so a partial or missing
//! file is fine.

use crate::history::DEFAULT_HISTORY_DEPTH;
use crate::layer::SurfaceGeometry;
use crate::metrics::DEFAULT_METRICS_INTERVAL_MS;
use crate::presence::DEFAULT_CURSOR_INTERVAL_MS;
use crate::sync::ReconnectPolicy;
use kurbo::Size;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Invalid configuration: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("Could not determine the configuration directory")]
    NoConfigDir,
}

/// Result type for configuration loading.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Tunables for a drawing session and its relay connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct SessionConfig {
    /// WebSocket URL of the relay.
    pub relay_url: String,
    /// Room to join on connect.
    pub room: String,
    /// Canvas width in logical pixels.
    pub canvas_width: f64,
    /// Canvas height in logical pixels.
    pub canvas_height: f64,
    /// Device pixel ratio.
    pub scale_factor: f64,
    /// Maximum undo depth.
    pub history_depth: usize,
    /// Minimum interval between cursor broadcasts.
    pub cursor_interval_ms: u64,
    /// Interval between conflict metric samples.
    pub metrics_interval_ms: u64,
    /// Reconnect attempts before giving up (0 disables reconnect).
    pub reconnect_attempts: u32,
    /// Delay before the first reconnect attempt.
    pub reconnect_backoff_ms: u64,
    /// Upper bound for the doubled reconnect delay.
    pub reconnect_max_backoff_ms: u64,
    /// Preferred username; a random one is generated when absent.
    pub username: Option<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            relay_url: "ws://localhost:3030/ws".to_string(),
            room: "lobby".to_string(),
            canvas_width: 1280.0,
            canvas_height: 720.0,
            scale_factor: 1.0,
            history_depth: DEFAULT_HISTORY_DEPTH,
            cursor_interval_ms: DEFAULT_CURSOR_INTERVAL_MS,
            metrics_interval_ms: DEFAULT_METRICS_INTERVAL_MS,
            reconnect_attempts: 5,
            reconnect_backoff_ms: 1000,
            reconnect_max_backoff_ms: 30_000,
            username: None,
        }
    }
}

impl SessionConfig {
    /// Load from a JSON file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let json = fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    /// Parse from a JSON string.
    pub fn from_json(json: &str) -> ConfigResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Default config file location.
    ///
    /// On Unix: `~/.local/share/inklayer/config.json`
    /// On Windows: `%LOCALAPPDATA%\inklayer\config.json`
    pub fn default_path() -> ConfigResult<PathBuf> {
        let base = dirs::data_local_dir()
            .or_else(dirs::home_dir)
            .ok_or(ConfigError::NoConfigDir)?;
        Ok(base.join("inklayer").join("config.json"))
    }

    /// Load from the default location, falling back to defaults if the file
    /// does not exist.
    pub fn load_default() -> ConfigResult<Self> {
        let path = Self::default_path()?;
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        Self::load(&path)
    }

    /// Write as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn geometry(&self) -> SurfaceGeometry {
        SurfaceGeometry::new(Size::new(self.canvas_width, self.canvas_height), self.scale_factor)
    }

    pub fn cursor_interval(&self) -> Duration {
        Duration::from_millis(self.cursor_interval_ms)
    }

    pub fn metrics_interval(&self) -> Duration {
        Duration::from_millis(self.metrics_interval_ms)
    }

    pub fn reconnect_policy(&self) -> ReconnectPolicy {
        ReconnectPolicy {
            max_attempts: self.reconnect_attempts,
            initial_backoff: Duration::from_millis(self.reconnect_backoff_ms),
            max_backoff: Duration::from_millis(self.reconnect_max_backoff_ms),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let config = SessionConfig::default();
        assert_eq!(config.history_depth, 50);
        assert_eq!(config.cursor_interval(), Duration::from_millis(50));
        assert_eq!(config.metrics_interval(), Duration::from_millis(200));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SessionConfig::from_json(r#"{"room":"design","historyDepth":10}"#).unwrap();
        assert_eq!(config.room, "design");
        assert_eq!(config.history_depth, 10);
        assert_eq!(config.relay_url, SessionConfig::default().relay_url);
    }

    #[test]
    fn test_invalid_json() {
        assert!(matches!(
            SessionConfig::from_json("{ nope"),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = SessionConfig {
            username: Some("Ann".to_string()),
            scale_factor: 2.0,
            ..SessionConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(SessionConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn test_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            SessionConfig::load(&dir.path().join("absent.json")),
            Err(ConfigError::Io(_))
        ));
    }

    #[test]
    fn test_geometry_and_policy() {
        let config = SessionConfig::default();
        assert_eq!(config.geometry().device_size(), (1280, 720));
        let policy = config.reconnect_policy();
        assert_eq!(policy.max_attempts, 5);
        assert_eq!(policy.initial_backoff, Duration::from_secs(1));
    }
}

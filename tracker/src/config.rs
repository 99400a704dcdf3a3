//! Tracker configuration.
//!
//! Values come from an optional TOML file, then `TRACKER_*` environment
//! variables override individual fields.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default interval between listener probes.
pub const DEFAULT_PROBE_INTERVAL_MS: u64 = 100;

/// Default time allowed for a listener to appear.
pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 10_000;

/// Default lifetime of values written to the cookie backend.
pub const DEFAULT_COOKIE_EXPIRY_DAYS: u32 = 365;

/// Which persistence backend to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// JSON file acting as local storage.
    Local,
    /// Cookie jar with per-entry expiry.
    Cookie,
    /// Process memory only; nothing survives a restart.
    Memory,
}

impl std::fmt::Display for BackendKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Cookie => write!(f, "cookie"),
            Self::Memory => write!(f, "memory"),
        }
    }
}

impl std::str::FromStr for BackendKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "cookie" => Ok(Self::Cookie),
            "memory" => Ok(Self::Memory),
            other => Err(format!("unknown storage backend '{other}'")),
        }
    }
}

/// Storage section of the configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Preferred backend. `Local` falls back to `Cookie` when unavailable.
    pub backend: BackendKind,
    /// Directory holding the backend files.
    pub path: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Local,
            path: PathBuf::from(".tracker"),
        }
    }
}

/// Top-level tracker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Milliseconds between listener probes.
    pub probe_interval_ms: u64,
    /// Milliseconds after construction before discovery gives up.
    pub discovery_timeout_ms: u64,
    /// Days until a cookie-backed value expires.
    pub cookie_expiry_days: u32,
    /// Log every scheduled and sent event at debug level.
    pub debug: bool,
    pub storage: StorageConfig,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            probe_interval_ms: DEFAULT_PROBE_INTERVAL_MS,
            discovery_timeout_ms: DEFAULT_DISCOVERY_TIMEOUT_MS,
            cookie_expiry_days: DEFAULT_COOKIE_EXPIRY_DAYS,
            debug: false,
            storage: StorageConfig::default(),
        }
    }
}

impl TrackerConfig {
    /// Parse a TOML document; missing fields keep their defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Defaults overridden by the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Override fields from `TRACKER_*` variables resolved through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("TRACKER_PROBE_INTERVAL_MS") {
            self.probe_interval_ms = parse_env("TRACKER_PROBE_INTERVAL_MS", &v)?;
        }
        if let Some(v) = lookup("TRACKER_DISCOVERY_TIMEOUT_MS") {
            self.discovery_timeout_ms = parse_env("TRACKER_DISCOVERY_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("TRACKER_COOKIE_EXPIRY_DAYS") {
            self.cookie_expiry_days = parse_env("TRACKER_COOKIE_EXPIRY_DAYS", &v)?;
        }
        if let Some(v) = lookup("TRACKER_DEBUG") {
            self.debug = matches!(v.trim(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = lookup("TRACKER_STORAGE_BACKEND") {
            self.storage.backend = v.parse().map_err(|_| ConfigError::InvalidEnv {
                key: "TRACKER_STORAGE_BACKEND".to_string(),
                value: v.clone(),
            })?;
        }
        if let Some(v) = lookup("TRACKER_STORAGE_PATH") {
            self.storage.path = PathBuf::from(v);
        }
        Ok(())
    }

    pub fn probe_interval(&self) -> Duration {
        // tokio::time::interval panics on a zero period
        Duration::from_millis(self.probe_interval_ms.max(1))
    }

    pub fn discovery_timeout(&self) -> Duration {
        Duration::from_millis(self.discovery_timeout_ms)
    }

    /// Cookie lifetime in milliseconds.
    pub fn cookie_expiry_ms(&self) -> i64 {
        i64::from(self.cookie_expiry_days) * 24 * 60 * 60 * 1000
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        key: key.to_string(),
        value: value.to_string(),
    })
}

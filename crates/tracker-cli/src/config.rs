//! Configuration layering for the command-line host.
//!
//! Precedence: command-line flags, then `TRACKER_*` environment variables,
//! then the optional TOML file, then built-in defaults.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use usage_tracker::{BackendKind, TrackerConfig};

/// Flag overrides collected from the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub backend: Option<BackendKind>,
    pub storage_path: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
    pub debug: bool,
}

/// Resolve the effective configuration.
pub fn resolve(file: Option<&Path>, overrides: &Overrides) -> Result<TrackerConfig> {
    let mut config = match file {
        Some(path) => TrackerConfig::load(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => TrackerConfig::default(),
    };

    config
        .apply_env(|key| std::env::var(key).ok())
        .context("Invalid TRACKER_* environment variable")?;

    apply_overrides(&mut config, overrides);
    Ok(config)
}

fn apply_overrides(config: &mut TrackerConfig, overrides: &Overrides) {
    if let Some(backend) = overrides.backend {
        config.storage.backend = backend;
    }
    if let Some(ref path) = overrides.storage_path {
        config.storage.path = path.clone();
    }
    if let Some(timeout) = overrides.timeout_ms {
        config.discovery_timeout_ms = timeout;
    }
    if overrides.debug {
        config.debug = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let file = dir.path().join("tracker.toml");
        std::fs::write(
            &file,
            "discovery_timeout_ms = 5000\n[storage]\nbackend = \"cookie\"\n",
        )
        .unwrap();

        let mut config = TrackerConfig::load(&file).unwrap();
        apply_overrides(
            &mut config,
            &Overrides {
                backend: Some(BackendKind::Memory),
                timeout_ms: Some(250),
                ..Default::default()
            },
        );

        assert_eq!(config.storage.backend, BackendKind::Memory);
        assert_eq!(config.discovery_timeout_ms, 250);
        assert!(!config.debug);
    }

    #[test]
    fn test_no_overrides_keeps_config() {
        let mut config = TrackerConfig::default();
        apply_overrides(&mut config, &Overrides::default());
        assert_eq!(config, TrackerConfig::default());
    }

    #[test]
    fn test_missing_file_is_error() {
        let err = resolve(Some(Path::new("/nonexistent/tracker.toml")), &Overrides::default())
            .unwrap_err();
        assert!(err.to_string().contains("Failed to load config"));
    }
}

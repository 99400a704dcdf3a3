//! Structured error types for the tracker.
//!
//! Storage failures propagate to callers; listener failures never do (they
//! are logged and dropped by the event buffer).

use std::path::PathBuf;

/// Errors from the persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Failed to read a backing file.
    #[error("Failed to read {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to write a backing file.
    #[error("Failed to write {path}: {source}")]
    FileWrite {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Failed to encode or parse JSON data.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// An export blob could not be decoded.
    #[error("Failed to decode store bundle: {0}")]
    Decode(String),

    /// A backend was requested that is not available here.
    #[error("Storage backend unavailable: {0}")]
    Unavailable(String),

    #[error("Lock poisoned")]
    LockPoisoned,
}

/// Result type alias for storage operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failure reported by a listener callback.
///
/// The buffer swallows these; they exist so callbacks can use `?`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("Listener failed: {0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Errors while loading tracker configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Invalid value for {key}: {value}")]
    InvalidEnv { key: String, value: String },
}

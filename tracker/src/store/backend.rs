//! Key-value backends.
//!
//! Two persistent flavours mirror what a browser host offers: a
//! local-storage style JSON file, and a cookie jar whose entries expire.
//! File backends re-read their file on every access so writers in other
//! processes are visible; there is no locking between processes.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use super::schema::files;
use crate::clock::SharedClock;
use crate::config::{BackendKind, TrackerConfig};
use crate::error::{StoreError, StoreResult};

/// Uniform accessor over a string key-value store.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    fn delete(&self, key: &str) -> StoreResult<()>;

    fn has(&self, key: &str) -> StoreResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    fn kind(&self) -> BackendKind;
}

/// Shared reference to a backend
pub type SharedStore = Arc<dyn KeyValueStore>;

// =========================================================================
// Memory
// =========================================================================

/// In-process store; contents vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedStore {
        Arc::new(self)
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        let entries = self.entries.read().map_err(|_| StoreError::LockPoisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.entries.write().map_err(|_| StoreError::LockPoisoned)?;
        entries.remove(key);
        Ok(())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Memory
    }
}

// =========================================================================
// Local storage
// =========================================================================

/// JSON file holding a flat string map.
#[derive(Debug)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    /// Open (creating the directory if needed) `<dir>/local_storage.json`.
    pub fn open(dir: impl AsRef<Path>) -> StoreResult<Self> {
        let path = prepare_file(dir.as_ref(), files::LOCAL_STORAGE)?;
        Ok(Self { path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> StoreResult<BTreeMap<String, String>> {
        read_json_file(&self.path)
    }
}

impl KeyValueStore for LocalStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.load()?.remove(key))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut entries = self.load()?;
        entries.insert(key.to_string(), value.to_string());
        write_json_file(&self.path, &entries)
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let mut entries = self.load()?;
        if entries.remove(key).is_some() {
            write_json_file(&self.path, &entries)?;
        }
        Ok(())
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Local
    }
}

// =========================================================================
// Cookies
// =========================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct CookieEntry {
    value: String,
    /// Epoch ms after which the cookie is gone.
    expires_at: i64,
}

/// Cookie jar persisted as JSON. Every write refreshes the entry's expiry.
pub struct CookieStore {
    path: PathBuf,
    clock: SharedClock,
    expiry_ms: i64,
}

impl CookieStore {
    /// Open `<dir>/cookies.json`; values live for `expiry_ms` after each write.
    pub fn open(dir: impl AsRef<Path>, clock: SharedClock, expiry_ms: i64) -> StoreResult<Self> {
        let path = prepare_file(dir.as_ref(), files::COOKIE_JAR)?;
        Ok(Self {
            path,
            clock,
            expiry_ms,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the jar with expired cookies removed.
    fn load_live(&self) -> StoreResult<BTreeMap<String, CookieEntry>> {
        let now = self.clock.now_ms();
        let mut jar: BTreeMap<String, CookieEntry> = read_json_file(&self.path)?;
        jar.retain(|_, cookie| cookie.expires_at > now);
        Ok(jar)
    }
}

impl KeyValueStore for CookieStore {
    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        Ok(self.load_live()?.remove(key).map(|cookie| cookie.value))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        let mut jar = self.load_live()?;
        jar.insert(
            key.to_string(),
            CookieEntry {
                value: value.to_string(),
                expires_at: self.clock.now_ms().saturating_add(self.expiry_ms),
            },
        );
        write_json_file(&self.path, &jar)
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        let mut jar = self.load_live()?;
        jar.remove(key);
        write_json_file(&self.path, &jar)
    }

    fn kind(&self) -> BackendKind {
        BackendKind::Cookie
    }
}

// =========================================================================
// Selection
// =========================================================================

/// Open the configured backend.
///
/// A local store that cannot be opened falls back to the cookie jar in the
/// same directory.
pub fn open_backend(config: &TrackerConfig, clock: SharedClock) -> StoreResult<SharedStore> {
    let dir = &config.storage.path;
    let expiry_ms = config.cookie_expiry_ms();

    let store: SharedStore = match config.storage.backend {
        BackendKind::Memory => MemoryStore::new().shared(),
        BackendKind::Cookie => Arc::new(CookieStore::open(dir, clock, expiry_ms)?),
        BackendKind::Local => match LocalStore::open(dir) {
            Ok(local) => Arc::new(local),
            Err(e) => {
                warn!(error = %e, "Local storage unavailable, falling back to cookies");
                Arc::new(CookieStore::open(dir, clock, expiry_ms)?)
            }
        },
    };

    debug!(backend = %store.kind(), path = %dir.display(), "Storage backend opened");
    Ok(store)
}

fn prepare_file(dir: &Path, name: &str) -> StoreResult<PathBuf> {
    std::fs::create_dir_all(dir).map_err(|source| StoreError::FileWrite {
        path: dir.to_path_buf(),
        source,
    })?;
    let path = dir.join(name);
    if path.is_dir() {
        return Err(StoreError::Unavailable(format!(
            "{} is a directory",
            path.display()
        )));
    }
    Ok(path)
}

/// Read a JSON file; a missing file is empty and a corrupt one is treated as
/// empty (with a warning) rather than failing every access.
fn read_json_file<T: DeserializeOwned + Default>(path: &Path) -> StoreResult<T> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(T::default()),
        Err(source) => {
            return Err(StoreError::FileRead {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    match serde_json::from_str(&content) {
        Ok(value) => Ok(value),
        Err(e) => {
            warn!(path = %path.display(), error = %e, "Corrupt storage file, starting empty");
            Ok(T::default())
        }
    }
}

fn write_json_file<T: Serialize>(path: &Path, value: &T) -> StoreResult<()> {
    let json = serde_json::to_string_pretty(value)?;
    std::fs::write(path, json).map_err(|source| StoreError::FileWrite {
        path: path.to_path_buf(),
        source,
    })
}

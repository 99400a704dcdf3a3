//! Persistence bridge: a backend plus change notifications.
//!
//! Every write or delete broadcasts a [`StoreChange`]. Inside a
//! [`PersistenceBridge::batch`] scope per-key notifications are held back
//! and a single [`StoreChange::Batch`] is sent when the scope ends.

use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use super::backend::SharedStore;
use crate::config::BackendKind;
use crate::error::StoreResult;

/// Channel capacity for change notifications
const CHANNEL_CAPACITY: usize = 64;

/// Shared reference to a PersistenceBridge
pub type SharedPersistence = Arc<PersistenceBridge>;

/// A change to persisted data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StoreChange {
    Set { key: String },
    Deleted { key: String },
    /// Several keys written as one logical update.
    Batch { keys: Vec<String> },
}

#[derive(Default)]
struct BatchState {
    depth: usize,
    keys: Vec<String>,
}

/// Backend wrapper broadcasting changes.
pub struct PersistenceBridge {
    backend: SharedStore,
    changes: broadcast::Sender<StoreChange>,
    batch: Mutex<BatchState>,
}

impl PersistenceBridge {
    pub fn new(backend: SharedStore) -> Self {
        let (changes, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            backend,
            changes,
            batch: Mutex::new(BatchState::default()),
        }
    }

    /// Create a shared reference to this bridge
    pub fn shared(self) -> SharedPersistence {
        Arc::new(self)
    }

    pub fn backend_kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.backend.get(key)
    }

    pub fn has(&self, key: &str) -> StoreResult<bool> {
        self.backend.has(key)
    }

    pub fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.backend.set(key, value)?;
        self.notify(StoreChange::Set {
            key: key.to_string(),
        });
        Ok(())
    }

    pub fn delete(&self, key: &str) -> StoreResult<()> {
        self.backend.delete(key)?;
        self.notify(StoreChange::Deleted {
            key: key.to_string(),
        });
        Ok(())
    }

    /// Run `f` as one logical update. Nested batches fold into the outer one.
    ///
    /// The batch notification is sent even if `f` fails part way, listing the
    /// keys that were written before the failure.
    pub fn batch<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Self) -> StoreResult<T>,
    {
        self.lock_batch().depth += 1;
        let result = f(self);

        let finished = {
            let mut batch = self.lock_batch();
            batch.depth -= 1;
            if batch.depth == 0 {
                Some(std::mem::take(&mut batch.keys))
            } else {
                None
            }
        };

        if let Some(keys) = finished {
            if !keys.is_empty() {
                self.broadcast(StoreChange::Batch { keys });
            }
        }
        result
    }

    /// Receive change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreChange> {
        self.changes.subscribe()
    }

    fn notify(&self, change: StoreChange) {
        {
            let mut batch = self.lock_batch();
            if batch.depth > 0 {
                let key = match change {
                    StoreChange::Set { key } | StoreChange::Deleted { key } => key,
                    StoreChange::Batch { .. } => return,
                };
                if !batch.keys.contains(&key) {
                    batch.keys.push(key);
                }
                return;
            }
        }
        self.broadcast(change);
    }

    fn broadcast(&self, change: StoreChange) {
        // No subscribers is fine
        if self.changes.send(change.clone()).is_err() {
            debug!(?change, "Store change (no subscribers)");
        }
    }

    fn lock_batch(&self) -> MutexGuard<'_, BatchState> {
        self.batch.lock().unwrap_or_else(|e| e.into_inner())
    }
}

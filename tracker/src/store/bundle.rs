//! Export/import of all persisted tracker data as one opaque blob.
//!
//! The blob is base64 (standard alphabet) over a JSON document holding the
//! raw stored string of each durable key. Keys with no stored value are
//! left out.

use std::collections::BTreeMap;

use base64::{engine::general_purpose, Engine as _};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::persistence::PersistenceBridge;
use super::schema::{is_known_key, ALL_KEYS};
use crate::error::{StoreError, StoreResult};

/// Current bundle format version.
pub const BUNDLE_VERSION: u8 = 1;

/// Decoded contents of an export blob.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoreBundle {
    pub version: u8,
    pub entries: BTreeMap<String, String>,
}

impl StoreBundle {
    /// Snapshot every durable key present in `store`.
    pub fn capture(store: &PersistenceBridge) -> StoreResult<Self> {
        let mut entries = BTreeMap::new();
        for key in ALL_KEYS {
            if let Some(value) = store.get(key)? {
                entries.insert(key.to_string(), value);
            }
        }
        Ok(Self {
            version: BUNDLE_VERSION,
            entries,
        })
    }

    pub fn encode(&self) -> StoreResult<String> {
        let json = serde_json::to_vec(self)?;
        Ok(general_purpose::STANDARD.encode(json))
    }

    pub fn decode(blob: &str) -> StoreResult<Self> {
        let bytes = general_purpose::STANDARD
            .decode(blob.trim())
            .map_err(|e| StoreError::Decode(e.to_string()))?;
        let bundle: Self =
            serde_json::from_slice(&bytes).map_err(|e| StoreError::Decode(e.to_string()))?;
        if bundle.version > BUNDLE_VERSION {
            return Err(StoreError::Decode(format!(
                "unsupported bundle version {}",
                bundle.version
            )));
        }
        Ok(bundle)
    }

    /// Write every known entry as one batch; returns the number written.
    pub fn apply(&self, store: &PersistenceBridge) -> StoreResult<usize> {
        store.batch(|store| {
            let mut written = 0;
            for (key, value) in &self.entries {
                if !is_known_key(key) {
                    warn!(key = %key, "Skipping unknown key in store bundle");
                    continue;
                }
                store.set(key, value)?;
                written += 1;
            }
            Ok(written)
        })
    }
}

/// Pack the durable keys into an opaque blob.
pub fn export_store(store: &PersistenceBridge) -> StoreResult<String> {
    let bundle = StoreBundle::capture(store)?;
    debug!(keys = bundle.entries.len(), "Exporting store");
    bundle.encode()
}

/// Unpack a blob produced by [`export_store`] into `store`.
///
/// Nothing is written when the blob cannot be decoded.
pub fn import_store(store: &PersistenceBridge, blob: &str) -> StoreResult<usize> {
    let bundle = StoreBundle::decode(blob)?;
    let written = bundle.apply(store)?;
    debug!(keys = written, "Imported store");
    Ok(written)
}

//! Persistent tracking identifier.

use tracing::debug;
use uuid::Uuid;

use super::persistence::PersistenceBridge;
use super::schema::KEY_TRACKING_ID;
use crate::error::StoreResult;

/// Length of a tracking identifier in hex characters.
pub const TRACKING_ID_LEN: usize = 32;

/// Fresh random identifier: 32 lowercase hex characters.
pub fn generate_tracking_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Return the stored identifier, creating and persisting one on first use.
pub fn load_or_create(store: &PersistenceBridge) -> StoreResult<String> {
    if let Some(existing) = store.get(KEY_TRACKING_ID)? {
        let existing = existing.trim();
        if !existing.is_empty() {
            return Ok(existing.to_string());
        }
    }

    let id = generate_tracking_id();
    store.set(KEY_TRACKING_ID, &id)?;
    debug!(tracking_id = %id, "Generated new tracking id");
    Ok(id)
}

//! Durable storage keys.
//!
//! These names are part of the on-disk format shared with existing
//! installations; do not rename them.

/// JSON map of accumulator name to running sum.
pub const KEY_ACCUMULATORS: &str = "_ccl_tracking_accumulators";

/// JSON map of metric name to last observed absolute value.
pub const KEY_DELTAS: &str = "_ccl_tracking_delta";

/// JSON map of property to last emitted threshold.
pub const KEY_INCREMENTAL: &str = "_ccl_tracking_incremental";

/// Raw tracking identifier string.
pub const KEY_TRACKING_ID: &str = "_ccl_tracking_id";

/// Keys holding counter maps (removed by `clear_all`).
pub const COUNTER_KEYS: &[&str] = &[KEY_ACCUMULATORS, KEY_DELTAS, KEY_INCREMENTAL];

/// Every key carried by an export bundle.
pub const ALL_KEYS: &[&str] = &[
    KEY_ACCUMULATORS,
    KEY_DELTAS,
    KEY_INCREMENTAL,
    KEY_TRACKING_ID,
];

/// File names used by the file-backed backends.
pub mod files {
    pub const LOCAL_STORAGE: &str = "local_storage.json";
    pub const COOKIE_JAR: &str = "cookies.json";
}

/// Whether `key` belongs to the tracker's durable format.
pub fn is_known_key(key: &str) -> bool {
    ALL_KEYS.contains(&key)
}

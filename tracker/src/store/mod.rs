//! Persistence for counters and the tracking identifier.
//!
//! # Architecture
//!
//! - `backend`: the `KeyValueStore` trait with local, cookie and memory
//!   implementations, and backend selection.
//! - `persistence`: `PersistenceBridge`, a backend plus change notifications
//!   and batch scopes.
//! - `counters`: accumulators, deltas and incremental thresholds.
//! - `tracking_id`: the persistent per-installation identifier.
//! - `bundle`: export/import of every durable key as one blob.
//! - `schema`: durable key names.

pub mod backend;
pub mod bundle;
pub mod counters;
pub mod persistence;
pub mod schema;
pub mod tracking_id;

pub use backend::{open_backend, CookieStore, KeyValueStore, LocalStore, MemoryStore, SharedStore};
pub use bundle::{export_store, import_store, StoreBundle};
pub use counters::{
    crossed_thresholds, json_number, CounterMap, CounterStore, IncrementalConfig,
    MAX_INCREMENTAL_STEPS,
};
pub use persistence::{PersistenceBridge, SharedPersistence, StoreChange};
pub use tracking_id::{generate_tracking_id, load_or_create};

//! Usage tracker library
//!
//! Buffers analytics events until the host registers a listener, forwards
//! them afterwards, and keeps usage counters that persist across sessions.
//!
//! # Features
//!
//! ## Event delivery
//! - Events fired before a listener exists are queued in FIFO order
//! - A probe looks for a listener every 100ms for up to 10s; on success the
//!   queue is flushed, on timeout it is dropped and delivery stays off
//! - Listeners are either callbacks or a legacy `analytics.<event>` pub/sub
//!   bridge
//!
//! ## Timers
//! - Named wall-clock timers with freeze/thaw around host inactivity
//!
//! ## Persisted counters
//! - Accumulators, deltas and incremental thresholds over a cookie or
//!   local-storage style backend
//! - A persistent tracking identifier
//! - Export/import of all persisted data as one blob
//!
//! # Usage
//!
//! ```ignore
//! use usage_tracker::{Listener, Tracker, TrackerConfig};
//!
//! let tracker = Tracker::open(TrackerConfig::from_env()?)?.shared();
//! let probe = tracker.spawn_probe();
//!
//! tracker.fire_event("app_start", Payload::new(), false);
//! tracker.listeners().register(Listener::callback(|name, data| {
//!     println!("{name}: {data:?}");
//!     Ok(())
//! }));
//! probe.await?;
//! ```

pub mod clock;
pub mod config;
pub mod error;
pub mod events;
pub mod store;
pub mod timers;
pub mod tracker;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{BackendKind, StorageConfig, TrackerConfig};
pub use error::{ConfigError, ListenerError, StoreError, StoreResult};
pub use events::{
    BridgeNotification, DiscoveryState, Event, EventBridge, EventBuffer, FireOutcome, Listener,
    ListenerSlot, Payload, SharedEventBridge,
};
pub use store::{
    CookieStore, CounterStore, IncrementalConfig, KeyValueStore, LocalStore, MemoryStore,
    PersistenceBridge, SharedStore, StoreChange,
};
pub use timers::TimerSet;
pub use tracker::{FocusSignal, SharedTracker, Tracker, TRACKID_GLOBAL};

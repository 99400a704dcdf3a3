//! Event delivery: buffering, listener discovery and the legacy bridge.
//!
//! # Event Flow
//!
//! ```text
//! ┌──────────────┐     ┌──────────────┐  discovered  ┌──────────────────┐
//! │  fire_event  │────▶│ EventBuffer  │─────────────▶│ Listener         │
//! │              │     │ (FIFO queue) │              │  ├─ Callback     │
//! └──────────────┘     └──────┬───────┘              │  └─ LegacyBridge │
//!                             │ probe every 100ms    └──────────────────┘
//!                             ▼
//!                      ┌──────────────┐
//!                      │ ListenerSlot │  (host registers here)
//!                      └──────────────┘
//! ```

pub mod bridge;
pub mod buffer;
pub mod listener;
pub mod probe;
pub mod types;

pub use bridge::{BridgeNotification, EventBridge, FilteredReceiver, SharedEventBridge};
pub use buffer::{DiscoveryState, EventBuffer, FireOutcome};
pub use listener::{Listener, ListenerFn, ListenerSlot, SharedListenerSlot};
pub use probe::spawn_probe;
pub use types::{Event, Payload, TIMESTAMP_KEY};

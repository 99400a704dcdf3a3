//! Host listeners and the slot the host registers them in.
//!
//! The tracker never knows up front what kind of listener the host will
//! provide. The host drops one into the shared [`ListenerSlot`] whenever it is
//! ready; the discovery probe picks it up and binds it for the rest of the
//! tracker's life.

use std::fmt;
use std::sync::{Arc, RwLock};

use super::bridge::SharedEventBridge;
use super::types::Payload;
use crate::error::ListenerError;

/// Callback receiving `(event_name, payload)`.
pub type ListenerFn = dyn Fn(&str, &Payload) -> Result<(), ListenerError> + Send + Sync;

/// A delivery target for tracked events.
#[derive(Clone)]
pub enum Listener {
    /// Direct callback.
    Callback(Arc<ListenerFn>),
    /// Publish `analytics.<event>` on a pub/sub bridge.
    LegacyBridge(SharedEventBridge),
}

impl Listener {
    /// Wrap a closure as a callback listener.
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&str, &Payload) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        Self::Callback(Arc::new(f))
    }

    pub fn legacy(bridge: SharedEventBridge) -> Self {
        Self::LegacyBridge(bridge)
    }

    /// Deliver one event.
    pub fn deliver(&self, event_name: &str, payload: &Payload) -> Result<(), ListenerError> {
        match self {
            Self::Callback(f) => f(event_name, payload),
            Self::LegacyBridge(bridge) => {
                bridge.publish(event_name, payload.clone());
                Ok(())
            }
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Callback(_) => "callback",
            Self::LegacyBridge(_) => "legacy_bridge",
        }
    }
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Listener").field(&self.kind()).finish()
    }
}

/// Shared reference to a ListenerSlot
pub type SharedListenerSlot = Arc<ListenerSlot>;

/// Place where the host announces its listener.
#[derive(Debug, Default)]
pub struct ListenerSlot {
    listener: RwLock<Option<Listener>>,
}

impl ListenerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedListenerSlot {
        Arc::new(self)
    }

    /// Announce a listener, replacing any previous announcement.
    pub fn register(&self, listener: Listener) {
        let mut slot = self.listener.write().unwrap_or_else(|e| e.into_inner());
        *slot = Some(listener);
    }

    /// Withdraw the announcement. Already-bound buffers keep their listener.
    pub fn clear(&self) {
        let mut slot = self.listener.write().unwrap_or_else(|e| e.into_inner());
        *slot = None;
    }

    /// The currently announced listener, if any.
    pub fn current(&self) -> Option<Listener> {
        self.listener
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_registered(&self) -> bool {
        self.listener
            .read()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}

//! Event buffer and listener discovery.
//!
//! ```text
//!             listener registered
//!   Waiting ───────────────────────▶ Enabled   (flush queue, forward directly)
//!      │
//!      │ now > deadline, or disable()
//!      ▼
//!   Expired                                    (queue dropped, events ignored)
//! ```
//!
//! Both `Enabled` and `Expired` are terminal apart from `disable()`, which
//! forces `Expired` from anywhere. Discovery is checked by the periodic probe
//! task and, lazily, at the start of every `fire_event`.
//!
//! Events bound for the listener pass through an outbox drained by one
//! caller at a time with the buffer unlocked. A listener may therefore fire
//! further events; they are delivered after the current one, in order.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::listener::{Listener, SharedListenerSlot};
use super::types::{ensure_timestamp, merge_globals, Event, Payload};
use crate::clock::SharedClock;
use crate::config::TrackerConfig;

/// Listener discovery state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryState {
    /// No listener yet; events are queued.
    Waiting,
    /// Listener bound; events are forwarded immediately.
    Enabled,
    /// Gave up or disabled; events are discarded.
    Expired,
}

impl DiscoveryState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Waiting)
    }
}

impl std::fmt::Display for DiscoveryState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting"),
            Self::Enabled => write!(f, "enabled"),
            Self::Expired => write!(f, "expired"),
        }
    }
}

/// What happened to a fired event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FireOutcome {
    /// Handed to the listener.
    Sent,
    /// Appended to the pending queue.
    Queued,
    /// Overwrote the payload of a pending event with the same name.
    Replaced,
    /// Discarded because delivery is disabled.
    Dropped,
}

struct BufferInner {
    state: DiscoveryState,
    pending: VecDeque<Event>,
    /// Events released to the listener but not yet handed over.
    outbox: VecDeque<Event>,
    /// Set while some caller is draining the outbox.
    delivering: bool,
    listener: Option<Listener>,
    globals: Payload,
    debug: bool,
}

/// FIFO of events awaiting a listener, plus the discovery state machine.
pub struct EventBuffer {
    clock: SharedClock,
    slot: SharedListenerSlot,
    created_at: i64,
    deadline: i64,
    probe_interval: Duration,
    inner: Mutex<BufferInner>,
}

impl EventBuffer {
    /// Create a buffer whose discovery window starts now.
    pub fn new(config: &TrackerConfig, clock: SharedClock, slot: SharedListenerSlot) -> Self {
        let created_at = clock.now_ms();
        let timeout_ms = i64::try_from(config.discovery_timeout_ms).unwrap_or(i64::MAX);
        Self {
            deadline: created_at.saturating_add(timeout_ms),
            created_at,
            probe_interval: config.probe_interval(),
            clock,
            slot,
            inner: Mutex::new(BufferInner {
                state: DiscoveryState::Waiting,
                pending: VecDeque::new(),
                outbox: VecDeque::new(),
                delivering: false,
                listener: None,
                globals: Payload::new(),
                debug: config.debug,
            }),
        }
    }

    /// Run one discovery step and return the resulting state.
    pub fn probe(&self) -> DiscoveryState {
        let state = {
            let mut inner = self.lock();
            self.probe_locked(&mut inner)
        };
        self.drain();
        state
    }

    /// Fire an event: forward it, queue it, or drop it depending on state.
    ///
    /// With `replace`, a pending event of the same name has its payload
    /// overwritten in place instead of a new entry being queued.
    pub fn fire_event(&self, name: &str, mut payload: Payload, replace: bool) -> FireOutcome {
        let mut inner = self.lock();
        let state = self.probe_locked(&mut inner);
        if state == DiscoveryState::Expired {
            return FireOutcome::Dropped;
        }

        merge_globals(&mut payload, &inner.globals);

        if state == DiscoveryState::Enabled {
            inner
                .outbox
                .push_back(Event::new(name, payload, self.clock.now_ms()));
            drop(inner);
            self.drain();
            return FireOutcome::Sent;
        }

        if replace {
            if let Some(existing) = inner.pending.iter_mut().find(|e| e.name == name) {
                existing.payload = payload;
                return FireOutcome::Replaced;
            }
        }

        if inner.debug {
            debug!(event = name, ?payload, "Scheduling event");
        }
        let event = Event::new(name, payload, self.clock.now_ms());
        inner.pending.push_back(event);
        FireOutcome::Queued
    }

    /// Set a property merged into every subsequently fired event.
    pub fn set_global(&self, name: &str, value: Value) {
        self.lock().globals.insert(name.to_string(), value);
    }

    pub fn globals(&self) -> Payload {
        self.lock().globals.clone()
    }

    /// Stop delivering events for good and drop anything pending.
    pub fn disable(&self) {
        let mut inner = self.lock();
        if inner.state != DiscoveryState::Expired {
            info!(from = %inner.state, "Event delivery disabled");
        }
        inner.state = DiscoveryState::Expired;
        inner.pending.clear();
        inner.outbox.clear();
        inner.listener = None;
    }

    pub fn set_debug(&self, debug: bool) {
        self.lock().debug = debug;
    }

    pub fn state(&self) -> DiscoveryState {
        self.lock().state
    }

    pub fn pending_len(&self) -> usize {
        self.lock().pending.len()
    }

    /// Snapshot of the pending queue, oldest first.
    pub fn pending(&self) -> Vec<Event> {
        self.lock().pending.iter().cloned().collect()
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    /// Instant after which discovery gives up.
    pub fn deadline(&self) -> i64 {
        self.deadline
    }

    pub fn probe_interval(&self) -> Duration {
        self.probe_interval
    }

    fn lock(&self) -> MutexGuard<'_, BufferInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn probe_locked(&self, inner: &mut BufferInner) -> DiscoveryState {
        if inner.state.is_terminal() {
            return inner.state;
        }

        if self.clock.now_ms() > self.deadline {
            let dropped = inner.pending.len();
            inner.state = DiscoveryState::Expired;
            inner.pending.clear();
            warn!(dropped, "No analytics listener registered on time; event delivery disabled");
            return inner.state;
        }

        let Some(listener) = self.slot.current() else {
            return inner.state;
        };

        inner.state = DiscoveryState::Enabled;
        info!(
            kind = listener.kind(),
            flushed = inner.pending.len(),
            "Analytics listener registered"
        );
        let pending = std::mem::take(&mut inner.pending);
        inner.outbox.extend(pending);
        inner.listener = Some(listener);
        inner.state
    }

    /// Hand outbox events to the listener until the outbox is empty.
    ///
    /// Only one caller drains at a time; anyone else (including a listener
    /// firing from inside a delivery) just leaves its event in the outbox.
    fn drain(&self) {
        {
            let mut inner = self.lock();
            if inner.delivering || inner.outbox.is_empty() {
                return;
            }
            inner.delivering = true;
        }

        loop {
            let (event, listener, debug) = {
                let mut inner = self.lock();
                let next = match (inner.listener.clone(), inner.outbox.pop_front()) {
                    (Some(listener), Some(event)) => Some((event, listener)),
                    _ => None,
                };
                let Some((event, listener)) = next else {
                    inner.outbox.clear();
                    inner.delivering = false;
                    return;
                };
                (event, listener, inner.debug)
            };
            self.send(&listener, &event.name, event.payload, debug);
        }
    }

    /// Deliver one event. Failures and panics are logged and discarded.
    fn send(&self, listener: &Listener, name: &str, mut payload: Payload, debug: bool) {
        ensure_timestamp(&mut payload, self.clock.now_ms());
        if debug {
            debug!(event = name, ?payload, "Sending event");
        }
        match catch_unwind(AssertUnwindSafe(|| listener.deliver(name, &payload))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(event = name, error = %e, "Listener rejected event"),
            Err(_) => debug!(event = name, "Listener panicked; event discarded"),
        }
    }
}

//! The tracker context object.
//!
//! A host builds one [`Tracker`] at startup, keeps it (usually behind an
//! `Arc`) for its whole life and passes it to whatever needs to record usage.
//! There is no process-wide instance.

use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::clock::{SharedClock, SystemClock};
use crate::config::TrackerConfig;
use crate::error::StoreResult;
use crate::events::{
    spawn_probe, DiscoveryState, EventBuffer, FireOutcome, ListenerSlot, Payload,
    SharedListenerSlot,
};
use crate::store::{
    bundle, json_number, open_backend, tracking_id, CounterStore, IncrementalConfig, MemoryStore,
    PersistenceBridge, SharedPersistence, SharedStore,
};
use crate::timers::TimerSet;

/// Global property carrying the tracking identifier.
pub const TRACKID_GLOBAL: &str = "trackid";

/// Host activity signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FocusSignal {
    /// Host went inactive (window blur, app backgrounded).
    Blur,
    /// Host is active again.
    Focus,
}

/// Shared reference to a Tracker
pub type SharedTracker = Arc<Tracker>;

/// Usage tracker: event delivery, timers and persisted counters.
pub struct Tracker {
    config: TrackerConfig,
    listeners: SharedListenerSlot,
    events: Arc<EventBuffer>,
    timers: Mutex<TimerSet>,
    store: SharedPersistence,
    counters: CounterStore,
    tracking_id: RwLock<String>,
    /// Probe started at construction, until a host takes it.
    probe: Mutex<Option<JoinHandle<DiscoveryState>>>,
}

impl Tracker {
    /// Build a tracker over an already opened backend.
    ///
    /// Loads (or creates) the tracking identifier and publishes it as the
    /// `trackid` global. When called inside a Tokio runtime the listener
    /// probe starts immediately; without one, discovery only happens on
    /// `fire_event` or an explicit [`Tracker::spawn_probe`].
    pub fn new(config: TrackerConfig, clock: SharedClock, backend: SharedStore) -> StoreResult<Self> {
        let store = PersistenceBridge::new(backend).shared();
        let id = tracking_id::load_or_create(&store)?;

        let listeners = ListenerSlot::new().shared();
        let events = Arc::new(EventBuffer::new(&config, clock.clone(), listeners.clone()));
        events.set_global(TRACKID_GLOBAL, Value::String(id.clone()));

        let probe = match tokio::runtime::Handle::try_current() {
            Ok(_) => Some(spawn_probe(events.clone())),
            Err(_) => {
                debug!("No Tokio runtime; listener probe not started");
                None
            }
        };

        info!(
            backend = %store.backend_kind(),
            tracking_id = %id,
            timeout_ms = config.discovery_timeout_ms,
            "Tracker initialised"
        );

        Ok(Self {
            listeners,
            events,
            timers: Mutex::new(TimerSet::new(clock)),
            counters: CounterStore::new(store.clone()),
            store,
            tracking_id: RwLock::new(id),
            probe: Mutex::new(probe),
            config,
        })
    }

    /// Build a tracker on the system clock with the configured backend.
    pub fn open(config: TrackerConfig) -> StoreResult<Self> {
        let clock = SystemClock::shared();
        let backend = open_backend(&config, clock.clone())?;
        Self::new(config, clock, backend)
    }

    /// Build a tracker on the system clock with an in-memory store.
    pub fn with_defaults() -> Self {
        let clock = SystemClock::shared();
        let backend = MemoryStore::new().shared();
        match Self::new(TrackerConfig::default(), clock, backend) {
            Ok(tracker) => tracker,
            // The memory backend has no failing operations
            Err(e) => unreachable!("memory store failed: {e}"),
        }
    }

    /// Create a shared reference to this tracker
    pub fn shared(self) -> SharedTracker {
        Arc::new(self)
    }

    /// Handle to the listener probe, resolving to the settled state.
    ///
    /// Hands over the probe started at construction; if there is none (no
    /// runtime at construction, or already taken) a new one is started.
    /// Requires a Tokio runtime.
    pub fn spawn_probe(&self) -> JoinHandle<DiscoveryState> {
        let running = self
            .probe
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        running.unwrap_or_else(|| spawn_probe(self.events.clone()))
    }

    /// Slot where the host registers its listener.
    pub fn listeners(&self) -> &SharedListenerSlot {
        &self.listeners
    }

    pub fn events(&self) -> &EventBuffer {
        &self.events
    }

    pub fn store(&self) -> &SharedPersistence {
        &self.store
    }

    pub fn counters(&self) -> &CounterStore {
        &self.counters
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn state(&self) -> DiscoveryState {
        self.events.state()
    }

    pub fn tracking_id(&self) -> String {
        self.tracking_id
            .read()
            .map(|id| id.clone())
            .unwrap_or_default()
    }

    // =========================================================================
    // Events
    // =========================================================================

    pub fn fire_event(&self, name: &str, payload: Payload, replace: bool) -> FireOutcome {
        self.events.fire_event(name, payload, replace)
    }

    /// Fire one event per interval boundary crossed since the last call.
    ///
    /// `value` overrides the value from `config`. Each fired event carries a
    /// copy of `payload` with the stepped value under the config's event key.
    /// Returns how many events were fired.
    pub fn fire_incremental_event(
        &self,
        name: &str,
        payload: Payload,
        config: impl Into<IncrementalConfig>,
        value: Option<f64>,
    ) -> StoreResult<usize> {
        let config = config.into();
        let value = value.unwrap_or(config.value);
        let steps = self.counters.advance_incremental(&config, value)?;

        for step in &steps {
            let mut event_payload = payload.clone();
            event_payload.insert(config.event_key().to_string(), json_number(*step));
            self.events.fire_event(name, event_payload, false);
        }
        if !steps.is_empty() {
            debug!(event = name, property = %config.property, fired = steps.len(), "Incremental events fired");
        }
        Ok(steps.len())
    }

    pub fn set_global(&self, name: &str, value: impl Into<Value>) {
        self.events.set_global(name, value.into());
    }

    pub fn set_debug(&self, debug: bool) {
        self.events.set_debug(debug);
    }

    /// Permanently stop event delivery.
    pub fn disable(&self) {
        self.events.disable();
    }

    // =========================================================================
    // Timers
    // =========================================================================

    pub fn start_timer(&self, name: &str) {
        self.lock_timers().start(name);
    }

    pub fn restart_timer(&self, name: &str) -> i64 {
        self.lock_timers().restart(name)
    }

    pub fn get_timer(&self, name: &str) -> i64 {
        self.lock_timers().get(name)
    }

    pub fn stop_timer(&self, name: &str) -> i64 {
        self.lock_timers().stop(name)
    }

    pub fn freeze(&self) {
        self.lock_timers().freeze();
    }

    pub fn thaw(&self) {
        self.lock_timers().thaw();
    }

    /// Route a host activity signal to `freeze`/`thaw`.
    pub fn handle_focus(&self, signal: FocusSignal) {
        debug!(?signal, "Focus signal");
        match signal {
            FocusSignal::Blur => self.freeze(),
            FocusSignal::Focus => self.thaw(),
        }
    }

    // =========================================================================
    // Counters
    // =========================================================================

    pub fn accumulate(&self, name: &str, value: f64) -> StoreResult<f64> {
        self.counters.accumulate(name, value)
    }

    pub fn delta(&self, name: &str, value: f64) -> StoreResult<f64> {
        self.counters.delta(name, value)
    }

    pub fn clear_accum(&self, name: &str) -> StoreResult<()> {
        self.counters.clear_accum(name)
    }

    pub fn clear_delta(&self, name: &str) -> StoreResult<()> {
        self.counters.clear_delta(name)
    }

    pub fn clear_all(&self) -> StoreResult<()> {
        self.counters.clear_all()
    }

    // =========================================================================
    // Export / import
    // =========================================================================

    pub fn export_store(&self) -> StoreResult<String> {
        bundle::export_store(&self.store)
    }

    /// Import a blob from [`Tracker::export_store`]. An imported tracking id
    /// replaces the current one, including the `trackid` global.
    pub fn import_store(&self, blob: &str) -> StoreResult<usize> {
        let written = bundle::import_store(&self.store, blob)?;
        let id = tracking_id::load_or_create(&self.store)?;
        if let Ok(mut current) = self.tracking_id.write() {
            if *current != id {
                info!(tracking_id = %id, "Tracking id replaced by import");
                *current = id.clone();
            }
        }
        self.events.set_global(TRACKID_GLOBAL, Value::String(id));
        Ok(written)
    }

    fn lock_timers(&self) -> MutexGuard<'_, TimerSet> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Drop for Tracker {
    fn drop(&mut self) {
        let probe = match self.probe.get_mut() {
            Ok(probe) => probe.take(),
            Err(e) => e.into_inner().take(),
        };
        if let Some(handle) = probe {
            handle.abort();
        }
    }
}

//! Periodic listener probe.
//!
//! Drives [`EventBuffer::probe`] on a fixed interval until discovery settles.
//! The task ends exactly once, on the first tick that observes a terminal
//! state, and yields that state.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::debug;

use super::buffer::{DiscoveryState, EventBuffer};

/// Spawn the probe loop for `buffer` on the current Tokio runtime.
///
/// The first probe runs one interval after the call.
pub fn spawn_probe(buffer: Arc<EventBuffer>) -> JoinHandle<DiscoveryState> {
    let period = buffer.probe_interval();
    tokio::spawn(async move {
        let mut interval = time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks: u64 = 0;

        loop {
            interval.tick().await;
            ticks += 1;
            let state = buffer.probe();
            if state.is_terminal() {
                debug!(%state, ticks, "Listener probe finished");
                return state;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::TrackerConfig;
    use crate::events::listener::{Listener, ListenerSlot};
    use crate::events::types::Payload;
    use std::time::Duration;

    fn buffer_with(clock: &ManualClock) -> (Arc<ListenerSlot>, Arc<EventBuffer>) {
        let slot = ListenerSlot::new().shared();
        let buffer = EventBuffer::new(&TrackerConfig::default(), clock.shared(), slot.clone());
        (slot, Arc::new(buffer))
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_enables_and_flushes() {
        let clock = ManualClock::new(50_000);
        let (slot, buffer) = buffer_with(&clock);
        let handle = spawn_probe(buffer.clone());

        buffer.fire_event("queued", Payload::new(), false);
        time::sleep(Duration::from_millis(350)).await;
        assert_eq!(buffer.state(), DiscoveryState::Waiting);

        let bridge = crate::events::bridge::EventBridge::new().shared();
        let mut rx = bridge.subscribe();
        slot.register(Listener::legacy(bridge));

        let state = handle.await.unwrap();
        assert_eq!(state, DiscoveryState::Enabled);
        assert_eq!(rx.try_recv().unwrap().topic, "analytics.queued");
        assert_eq!(buffer.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_expires_after_deadline() {
        let clock = ManualClock::new(50_000);
        let (_slot, buffer) = buffer_with(&clock);
        buffer.fire_event("lost", Payload::new(), false);
        let handle = spawn_probe(buffer.clone());

        time::sleep(Duration::from_millis(250)).await;
        assert!(!handle.is_finished());

        clock.advance(10_001);
        let state = handle.await.unwrap();
        assert_eq!(state, DiscoveryState::Expired);
        assert_eq!(buffer.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_stops_after_disable() {
        let clock = ManualClock::new(1);
        let (_slot, buffer) = buffer_with(&clock);
        let handle = spawn_probe(buffer.clone());
        buffer.disable();
        assert_eq!(handle.await.unwrap(), DiscoveryState::Expired);
    }
}

//! Integration tests for event buffering and listener discovery
//!
//! Drives a `Tracker` through the waiting → enabled / expired transitions
//! with a manual clock and checks what the host listener observes.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use usage_tracker::{
    DiscoveryState, EventBridge, FireOutcome, IncrementalConfig, Listener, ManualClock,
    MemoryStore, Payload, Tracker, TrackerConfig,
};

type Delivered = Arc<Mutex<Vec<(String, Payload)>>>;

fn new_tracker(clock: &ManualClock) -> Tracker {
    Tracker::new(
        TrackerConfig::default(),
        clock.shared(),
        MemoryStore::new().shared(),
    )
    .expect("tracker")
}

fn recorder() -> (Delivered, Listener) {
    let delivered: Delivered = Arc::new(Mutex::new(Vec::new()));
    let sink = delivered.clone();
    let listener = Listener::callback(move |name, payload| {
        sink.lock().unwrap().push((name.to_string(), payload.clone()));
        Ok(())
    });
    (delivered, listener)
}

fn names(delivered: &Delivered) -> Vec<String> {
    delivered
        .lock()
        .unwrap()
        .iter()
        .map(|(name, _)| name.clone())
        .collect()
}

fn payload(value: serde_json::Value) -> Payload {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Payload::new(),
    }
}

/// Test: events fired before and after discovery arrive in firing order
#[test]
fn test_fifo_across_discovery() {
    let clock = ManualClock::new(1_700_000_000_000);
    let tracker = new_tracker(&clock);

    tracker.fire_event("first", Payload::new(), false);
    clock.advance(100);
    tracker.fire_event("second", Payload::new(), false);
    clock.advance(100);

    let (delivered, listener) = recorder();
    tracker.listeners().register(listener);

    tracker.fire_event("third", Payload::new(), false);
    tracker.fire_event("fourth", Payload::new(), false);

    assert_eq!(names(&delivered), vec!["first", "second", "third", "fourth"]);
    assert_eq!(tracker.state(), DiscoveryState::Enabled);
}

/// Test: replace keeps queue position and count
#[test]
fn test_replace_keeps_position() {
    let clock = ManualClock::new(1_700_000_000_000);
    let tracker = new_tracker(&clock);

    tracker.fire_event("a", payload(json!({"v": 1})), false);
    tracker.fire_event("b", payload(json!({"v": 1})), false);
    tracker.fire_event("c", payload(json!({"v": 1})), false);
    assert_eq!(
        tracker.fire_event("b", payload(json!({"v": 2})), true),
        FireOutcome::Replaced
    );
    assert_eq!(tracker.events().pending_len(), 3);

    let (delivered, listener) = recorder();
    tracker.listeners().register(listener);
    tracker.events().probe();

    let delivered = delivered.lock().unwrap();
    let order: Vec<&str> = delivered.iter().map(|(n, _)| n.as_str()).collect();
    assert_eq!(order, vec!["a", "b", "c"]);
    assert_eq!(delivered[1].1["v"], json!(2));
}

/// Test: after the deadline buffered events are gone and firing is a no-op
#[test]
fn test_expiry_is_permanent() {
    let clock = ManualClock::new(1_700_000_000_000);
    let tracker = new_tracker(&clock);

    tracker.fire_event("buffered", Payload::new(), false);
    clock.advance(10_001);
    assert_eq!(
        tracker.fire_event("late", Payload::new(), false),
        FireOutcome::Dropped
    );
    assert_eq!(tracker.events().pending_len(), 0);

    let (delivered, listener) = recorder();
    tracker.listeners().register(listener);
    for _ in 0..3 {
        assert_eq!(
            tracker.fire_event("ignored", Payload::new(), false),
            FireOutcome::Dropped
        );
    }
    assert!(delivered.lock().unwrap().is_empty());
    assert_eq!(tracker.state(), DiscoveryState::Expired);
}

/// Test: every delivered payload carries trackid and ts
#[test]
fn test_delivered_payload_shape() {
    let clock = ManualClock::new(1_700_000_000_000);
    let tracker = new_tracker(&clock);
    tracker.set_global("build", "1.2.3");

    let (delivered, listener) = recorder();
    tracker.listeners().register(listener);
    clock.advance(5);
    tracker.fire_event("open", payload(json!({"page": "home"})), false);

    let delivered = delivered.lock().unwrap();
    let data = &delivered[0].1;
    assert_eq!(data["page"], json!("home"));
    assert_eq!(data["build"], json!("1.2.3"));
    assert_eq!(data["trackid"], json!(tracker.tracking_id()));
    assert_eq!(data["ts"], json!(1_700_000_000_005_i64));
}

/// Test: a legacy bridge listener receives analytics.<event> notifications
#[tokio::test]
async fn test_legacy_bridge_delivery() {
    let clock = ManualClock::new(1_700_000_000_000);
    let tracker = new_tracker(&clock);
    tracker.fire_event("queued", Payload::new(), false);

    let bridge = EventBridge::new().shared();
    let mut rx = bridge.subscribe();
    tracker.listeners().register(Listener::legacy(bridge));
    tracker.fire_event("direct", Payload::new(), false);

    assert_eq!(rx.recv().await.unwrap().topic, "analytics.queued");
    assert_eq!(rx.recv().await.unwrap().topic, "analytics.direct");
}

/// Test: incremental events fire once per crossed boundary
#[test]
fn test_incremental_events_delivered() {
    let clock = ManualClock::new(1_700_000_000_000);
    let tracker = new_tracker(&clock);
    let (delivered, listener) = recorder();
    tracker.listeners().register(listener);

    let config = IncrementalConfig::new("p").with_interval(10.0);
    let fired = tracker
        .fire_incremental_event("lvl", Payload::new(), config.clone(), Some(25.0))
        .unwrap();
    assert_eq!(fired, 2);

    let fired = tracker
        .fire_incremental_event("lvl", Payload::new(), config, Some(21.0))
        .unwrap();
    assert_eq!(fired, 0);

    let delivered = delivered.lock().unwrap();
    let values: Vec<f64> = delivered
        .iter()
        .map(|(_, data)| data["p"].as_f64().unwrap())
        .collect();
    assert_eq!(values, vec![10.0, 20.0]);
}

/// Test: the background probe discovers a late listener
#[tokio::test(start_paused = true)]
async fn test_background_probe_discovers_listener() {
    let clock = ManualClock::new(1_700_000_000_000);
    let tracker = new_tracker(&clock).shared();
    let probe = tracker.spawn_probe();

    tracker.fire_event("boot", Payload::new(), false);
    tokio::time::sleep(Duration::from_millis(1_000)).await;
    clock.advance(1_000);

    let (delivered, listener) = recorder();
    tracker.listeners().register(listener);

    assert_eq!(probe.await.unwrap(), DiscoveryState::Enabled);
    assert_eq!(names(&delivered), vec!["boot"]);
}

/// Test: a tracker built inside a runtime discovers its listener on its own
#[tokio::test(start_paused = true)]
async fn test_construction_starts_discovery() {
    let clock = ManualClock::new(1_700_000_000_000);
    let tracker = new_tracker(&clock);

    tracker.fire_event("boot", Payload::new(), false);
    let (delivered, listener) = recorder();
    tracker.listeners().register(listener);

    for _ in 0..25 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        clock.advance(100);
    }

    assert_eq!(names(&delivered), vec!["boot"]);
    assert_eq!(tracker.state(), DiscoveryState::Enabled);
    assert_eq!(tracker.events().pending_len(), 0);
}

/// Test: a tracker built inside a runtime expires on its own at the deadline
#[tokio::test(start_paused = true)]
async fn test_construction_starts_expiry() {
    let clock = ManualClock::new(1_700_000_000_000);
    let tracker = new_tracker(&clock);
    tracker.fire_event("lost", Payload::new(), false);

    for _ in 0..110 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        clock.advance(100);
    }

    assert_eq!(tracker.state(), DiscoveryState::Expired);
    assert_eq!(tracker.events().pending_len(), 0);
}

/// Test: a listener can fire events on the tracker it is listening to
#[test]
fn test_listener_fires_nested_event() {
    let clock = ManualClock::new(1_700_000_000_000);
    let tracker = new_tracker(&clock).shared();
    let (delivered, recording) = recorder();

    let weak = Arc::downgrade(&tracker);
    tracker.listeners().register(Listener::callback(move |name, payload| {
        recording.deliver(name, payload)?;
        if name == "outer" {
            if let Some(tracker) = weak.upgrade() {
                tracker.fire_event("nested", Payload::new(), false);
                tracker
                    .fire_incremental_event("step", Payload::new(), "n", Some(1.0))
                    .unwrap();
            }
        }
        Ok(())
    }));

    tracker.fire_event("outer", Payload::new(), false);
    tracker.fire_event("after", Payload::new(), false);

    assert_eq!(names(&delivered), vec!["outer", "nested", "step", "after"]);
    let delivered = delivered.lock().unwrap();
    assert_eq!(delivered[2].1["n"], json!(1));
}

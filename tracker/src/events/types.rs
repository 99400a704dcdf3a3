//! Event types shared by the buffer, listeners and the legacy bridge.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload of an event: a JSON object.
pub type Payload = Map<String, Value>;

/// Payload key holding the delivery timestamp in epoch milliseconds.
pub const TIMESTAMP_KEY: &str = "ts";

/// A named analytics event waiting for, or on its way to, a listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub name: String,
    pub payload: Payload,
    /// When the event was fired (epoch ms).
    pub timestamp: i64,
}

impl Event {
    pub fn new(name: impl Into<String>, payload: Payload, timestamp: i64) -> Self {
        Self {
            name: name.into(),
            payload,
            timestamp,
        }
    }
}

/// Copy every global into `payload`, overwriting keys that collide.
pub fn merge_globals(payload: &mut Payload, globals: &Payload) {
    for (key, value) in globals {
        payload.insert(key.clone(), value.clone());
    }
}

/// Insert `ts = now_ms` unless the payload already carries one.
pub fn ensure_timestamp(payload: &mut Payload, now_ms: i64) {
    payload
        .entry(TIMESTAMP_KEY.to_string())
        .or_insert_with(|| Value::from(now_ms));
}

/// Build a payload from a JSON value; anything other than an object yields
/// an empty payload.
pub fn payload_from_value(value: Value) -> Payload {
    match value {
        Value::Object(map) => map,
        _ => Payload::new(),
    }
}

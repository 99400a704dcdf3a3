//! Persisted counters: accumulators, deltas and incremental thresholds.
//!
//! Each operation loads the whole map for its key, mutates it, and writes the
//! whole map back. Nothing is cached in memory, so two writers sharing a store
//! can overwrite each other's update (last write wins).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use super::persistence::SharedPersistence;
use super::schema::{COUNTER_KEYS, KEY_ACCUMULATORS, KEY_DELTAS, KEY_INCREMENTAL};
use crate::error::StoreResult;

/// A persisted counter map.
pub type CounterMap = BTreeMap<String, f64>;

/// Most steps a single incremental update may emit.
pub const MAX_INCREMENTAL_STEPS: usize = 1_000;

/// Largest magnitude at which every whole `f64` is an exact integer (2^53).
const MAX_EXACT_INTEGER: f64 = 9_007_199_254_740_992.0;

/// JSON number for a counter value: whole values are written as integers
/// (`8`, not `8.0`).
pub fn json_number(value: f64) -> Value {
    if value.fract() == 0.0 && value.abs() <= MAX_EXACT_INTEGER {
        Value::from(value as i64)
    } else {
        Value::from(value)
    }
}

/// How an incremental event is derived from a growing value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncrementalConfig {
    /// Key under which the last emitted threshold is persisted.
    pub property: String,
    /// Payload key carrying the stepped value; defaults to `property`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_property: Option<String>,
    /// Step size between emitted thresholds.
    #[serde(default = "default_step")]
    pub interval: f64,
    /// Value used when the caller does not pass one.
    #[serde(default = "default_step")]
    pub value: f64,
}

fn default_step() -> f64 {
    1.0
}

impl IncrementalConfig {
    pub fn new(property: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            event_property: None,
            interval: 1.0,
            value: 1.0,
        }
    }

    pub fn with_interval(mut self, interval: f64) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_event_property(mut self, event_property: impl Into<String>) -> Self {
        self.event_property = Some(event_property.into());
        self
    }

    pub fn with_value(mut self, value: f64) -> Self {
        self.value = value;
        self
    }

    /// Payload key for the stepped value.
    pub fn event_key(&self) -> &str {
        self.event_property.as_deref().unwrap_or(&self.property)
    }
}

impl From<&str> for IncrementalConfig {
    fn from(property: &str) -> Self {
        Self::new(property)
    }
}

impl From<String> for IncrementalConfig {
    fn from(property: String) -> Self {
        Self::new(property)
    }
}

/// Thresholds crossed when a metric moves from `last` to `value`.
///
/// Returns the new threshold (`value` rounded down to a multiple of
/// `interval`) and every step from `last + interval` up to it. Nothing is
/// crossed when the rounded value does not exceed `last` or the interval is
/// not a positive number.
///
/// At most [`MAX_INCREMENTAL_STEPS`] steps are returned: the ones closest to
/// the new threshold. Older steps in a larger jump are skipped.
pub fn crossed_thresholds(last: f64, value: f64, interval: f64) -> Option<(f64, Vec<f64>)> {
    if !interval.is_finite() || interval <= 0.0 || !value.is_finite() {
        return None;
    }
    let current = (value / interval).floor() * interval;
    if current <= last {
        return None;
    }

    let span = ((current - last) / interval).floor();
    let limit = MAX_INCREMENTAL_STEPS as f64;
    let mut k = 1.0;
    if span > limit {
        warn!(
            last,
            threshold = current,
            skipped = span - limit,
            "Incremental jump too large; emitting only the latest steps"
        );
        k = span - limit + 1.0;
    }

    let mut steps = Vec::new();
    while steps.len() < MAX_INCREMENTAL_STEPS {
        let step = last + k * interval;
        if step > current {
            break;
        }
        steps.push(step);
        k += 1.0;
    }
    Some((current, steps))
}

/// Counter operations over the persistence bridge.
#[derive(Clone)]
pub struct CounterStore {
    store: SharedPersistence,
}

impl CounterStore {
    pub fn new(store: SharedPersistence) -> Self {
        Self { store }
    }

    /// Add `value` to accumulator `name` and return the new total.
    pub fn accumulate(&self, name: &str, value: f64) -> StoreResult<f64> {
        let mut accumulators = self.load(KEY_ACCUMULATORS)?;
        let total = accumulators.get(name).copied().unwrap_or(0.0) + value;
        accumulators.insert(name.to_string(), total);
        self.save(KEY_ACCUMULATORS, &accumulators)?;
        Ok(total)
    }

    /// Change since the last observed `value` for `name`; records `value`.
    pub fn delta(&self, name: &str, value: f64) -> StoreResult<f64> {
        let mut deltas = self.load(KEY_DELTAS)?;
        let last = deltas.get(name).copied().unwrap_or(0.0);
        deltas.insert(name.to_string(), value);
        self.save(KEY_DELTAS, &deltas)?;
        Ok(value - last)
    }

    pub fn clear_accum(&self, name: &str) -> StoreResult<()> {
        self.remove_entry(KEY_ACCUMULATORS, name)
    }

    pub fn clear_delta(&self, name: &str) -> StoreResult<()> {
        self.remove_entry(KEY_DELTAS, name)
    }

    /// Drop every accumulator, delta and incremental threshold.
    pub fn clear_all(&self) -> StoreResult<()> {
        self.store.batch(|store| {
            for key in COUNTER_KEYS {
                store.delete(key)?;
            }
            Ok(())
        })
    }

    /// Last emitted threshold for `property` (0 when none).
    pub fn incremental_threshold(&self, property: &str) -> StoreResult<f64> {
        Ok(self
            .load(KEY_INCREMENTAL)?
            .get(property)
            .copied()
            .unwrap_or(0.0))
    }

    /// Advance the threshold for `config.property` to `value` and return the
    /// newly crossed steps, oldest first. The new threshold is persisted only
    /// when at least one step was crossed.
    pub fn advance_incremental(&self, config: &IncrementalConfig, value: f64) -> StoreResult<Vec<f64>> {
        let mut incremental = self.load(KEY_INCREMENTAL)?;
        let last = incremental.get(&config.property).copied().unwrap_or(0.0);

        let Some((current, steps)) = crossed_thresholds(last, value, config.interval) else {
            return Ok(Vec::new());
        };

        incremental.insert(config.property.clone(), current);
        self.save(KEY_INCREMENTAL, &incremental)?;
        Ok(steps)
    }

    pub fn accumulators(&self) -> StoreResult<CounterMap> {
        self.load(KEY_ACCUMULATORS)
    }

    pub fn deltas(&self) -> StoreResult<CounterMap> {
        self.load(KEY_DELTAS)
    }

    pub fn incrementals(&self) -> StoreResult<CounterMap> {
        self.load(KEY_INCREMENTAL)
    }

    fn remove_entry(&self, key: &str, name: &str) -> StoreResult<()> {
        let mut map = self.load(key)?;
        if map.remove(name).is_some() {
            self.save(key, &map)?;
        }
        Ok(())
    }

    /// Load a counter map; unparseable data counts as no prior value.
    fn load(&self, key: &str) -> StoreResult<CounterMap> {
        let Some(raw) = self.store.get(key)? else {
            return Ok(CounterMap::new());
        };
        match serde_json::from_str(&raw) {
            Ok(map) => Ok(map),
            Err(e) => {
                warn!(key, error = %e, "Malformed counter map, treating as empty");
                Ok(CounterMap::new())
            }
        }
    }

    fn save(&self, key: &str, map: &CounterMap) -> StoreResult<()> {
        let numbers: serde_json::Map<String, Value> = map
            .iter()
            .map(|(name, value)| (name.clone(), json_number(*value)))
            .collect();
        let json = serde_json::to_string(&numbers)?;
        self.store.set(key, &json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::backend::MemoryStore;
    use crate::store::persistence::PersistenceBridge;

    fn counters() -> (SharedPersistence, CounterStore) {
        let store = PersistenceBridge::new(MemoryStore::new().shared()).shared();
        (store.clone(), CounterStore::new(store))
    }

    #[test]
    fn test_accumulate_sums() {
        let (_, counters) = counters();
        assert_eq!(counters.accumulate("x", 5.0).unwrap(), 5.0);
        assert_eq!(counters.accumulate("x", 3.0).unwrap(), 8.0);
        assert_eq!(counters.accumulate("y", 1.5).unwrap(), 1.5);
    }

    #[test]
    fn test_delta_tracks_last_value() {
        let (_, counters) = counters();
        assert_eq!(counters.delta("x", 8.0).unwrap(), 8.0);
        assert_eq!(counters.delta("x", 10.0).unwrap(), 2.0);
        assert_eq!(counters.deltas().unwrap()["x"], 10.0);
        assert_eq!(counters.delta("x", 4.0).unwrap(), -6.0);
    }

    #[test]
    fn test_clear_single_entries() {
        let (_, counters) = counters();
        counters.accumulate("keep", 1.0).unwrap();
        counters.accumulate("drop", 1.0).unwrap();
        counters.delta("drop", 7.0).unwrap();

        counters.clear_accum("drop").unwrap();
        counters.clear_delta("drop").unwrap();
        counters.clear_accum("missing").unwrap();

        let accumulators = counters.accumulators().unwrap();
        assert!(accumulators.contains_key("keep"));
        assert!(!accumulators.contains_key("drop"));
        assert_eq!(counters.delta("drop", 7.0).unwrap(), 7.0);
    }

    #[test]
    fn test_clear_all_keeps_tracking_id() {
        let (store, counters) = counters();
        store.set(crate::store::schema::KEY_TRACKING_ID, "id").unwrap();
        counters.accumulate("a", 1.0).unwrap();
        counters.delta("b", 1.0).unwrap();
        counters
            .advance_incremental(&IncrementalConfig::new("c"), 3.0)
            .unwrap();

        counters.clear_all().unwrap();
        for key in COUNTER_KEYS {
            assert!(!store.has(key).unwrap());
        }
        assert!(store.has(crate::store::schema::KEY_TRACKING_ID).unwrap());
    }

    #[test]
    fn test_malformed_map_is_no_prior_value() {
        let (store, counters) = counters();
        store.set(KEY_ACCUMULATORS, "[not a map").unwrap();
        assert_eq!(counters.accumulate("x", 2.0).unwrap(), 2.0);
        assert_eq!(counters.accumulate("x", 2.0).unwrap(), 4.0);
    }

    #[test]
    fn test_persisted_format_is_json_map() {
        let (store, counters) = counters();
        counters.accumulate("x", 5.0).unwrap();
        let raw = store.get(KEY_ACCUMULATORS).unwrap().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed["x"].as_f64(), Some(5.0));
    }

    #[test]
    fn test_whole_values_persist_as_integers() {
        let (store, counters) = counters();
        counters.accumulate("x", 5.0).unwrap();
        counters.accumulate("x", 3.0).unwrap();
        counters.accumulate("half", 0.5).unwrap();
        assert_eq!(
            store.get(KEY_ACCUMULATORS).unwrap().as_deref(),
            Some(r#"{"half":0.5,"x":8}"#)
        );
        assert_eq!(counters.accumulate("x", 1.0).unwrap(), 9.0);
    }

    #[test]
    fn test_json_number() {
        assert_eq!(json_number(10.0), serde_json::json!(10));
        assert_eq!(json_number(-3.0), serde_json::json!(-3));
        assert_eq!(json_number(2.5), serde_json::json!(2.5));
        assert_eq!(json_number(1e300), serde_json::json!(1e300));
    }

    #[test]
    fn test_large_jump_is_capped() {
        let (current, steps) = crossed_thresholds(0.0, 5_000.0, 1.0).unwrap();
        assert_eq!(current, 5_000.0);
        assert_eq!(steps.len(), MAX_INCREMENTAL_STEPS);
        assert_eq!(steps.first(), Some(&4_001.0));
        assert_eq!(steps.last(), Some(&5_000.0));

        let (current, steps) = crossed_thresholds(0.0, 1e18, 1.0).unwrap();
        assert_eq!(current, 1e18);
        assert_eq!(steps.len(), MAX_INCREMENTAL_STEPS);
    }

    #[test]
    fn test_crossed_thresholds() {
        assert_eq!(
            crossed_thresholds(0.0, 25.0, 10.0),
            Some((20.0, vec![10.0, 20.0]))
        );
        assert_eq!(crossed_thresholds(20.0, 21.0, 10.0), None);
        assert_eq!(crossed_thresholds(20.0, 20.0, 10.0), None);
        assert_eq!(crossed_thresholds(20.0, 30.0, 10.0), Some((30.0, vec![30.0])));
        assert_eq!(crossed_thresholds(0.0, 3.0, 1.0), Some((3.0, vec![1.0, 2.0, 3.0])));
        assert_eq!(crossed_thresholds(0.0, 5.0, 0.0), None);
        assert_eq!(crossed_thresholds(0.0, 5.0, -1.0), None);
        assert_eq!(crossed_thresholds(0.0, f64::NAN, 1.0), None);
    }

    #[test]
    fn test_advance_incremental_persists_threshold() {
        let (_, counters) = counters();
        let config = IncrementalConfig::new("p").with_interval(10.0);

        assert_eq!(counters.advance_incremental(&config, 25.0).unwrap(), vec![10.0, 20.0]);
        assert_eq!(counters.incremental_threshold("p").unwrap(), 20.0);
        assert!(counters.advance_incremental(&config, 21.0).unwrap().is_empty());
        assert_eq!(counters.advance_incremental(&config, 41.0).unwrap(), vec![30.0, 40.0]);
    }

    #[test]
    fn test_incremental_threshold_keyed_by_property() {
        let (_, counters) = counters();
        let a = IncrementalConfig::new("shared").with_event_property("level");
        let b = IncrementalConfig::new("shared").with_event_property("stage");
        assert_eq!(counters.advance_incremental(&a, 2.0).unwrap(), vec![1.0, 2.0]);
        assert!(counters.advance_incremental(&b, 2.0).unwrap().is_empty());
    }

    #[test]
    fn test_config_event_key_defaults_to_property() {
        let config: IncrementalConfig = "score".into();
        assert_eq!(config.event_key(), "score");
        assert_eq!(config.interval, 1.0);
        assert_eq!(config.with_event_property("pts").event_key(), "pts");
    }

    #[test]
    fn test_config_deserialize_defaults() {
        let config: IncrementalConfig = serde_json::from_str(r#"{"property": "p"}"#).unwrap();
        assert_eq!(config, IncrementalConfig::new("p"));
    }

    /// Two handles on one store interleave read-modify-write and one update
    /// is lost. This is the accepted behaviour, not a bug.
    #[test]
    fn test_interleaved_writers_lose_update() {
        let (store, first) = counters();
        let second = CounterStore::new(store);

        first.accumulate("clicks", 1.0).unwrap();
        let stale = first.accumulators().unwrap();

        second.accumulate("clicks", 10.0).unwrap();

        let mut overwrite = stale;
        *overwrite.get_mut("clicks").unwrap() += 1.0;
        first.save(KEY_ACCUMULATORS, &overwrite).unwrap();

        assert_eq!(first.accumulators().unwrap()["clicks"], 2.0);
    }
}

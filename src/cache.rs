//! # State cache: service key → path → value.
//!
//! The single source of truth for the latest observed values. Every merge is
//! idempotent and last-write-wins per path, which is what makes it safe for a
//! bulk refresh to overlap with live signals.
//!
//! ## Rules
//! - A `(service, path)` key exists iff a value was observed for it.
//! - The first observation of a pair publishes exactly one `PathAdded`.
//! - Empty arrays/objects (the bus's "no value") are stored as `null`.
//! - A bulk refresh may prune paths the service no longer reports (`PathRemoved`).
//! - Values cached under the bare family before the instance resolved move to
//!   the instance key once it is known.

use std::collections::{BTreeMap, HashMap, HashSet};

use parking_lot::RwLock;
use serde_json::Value;

use crate::events::{Bus, Event, StatusKind};
use crate::processor::NormalizedUpdate;

/// Values of one service, ordered by path.
pub type ServiceValues = BTreeMap<String, Value>;

/// What a merge changed structurally.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The service key was seen for the first time.
    pub service_added: bool,
    /// The path was seen for the first time under this service key.
    pub path_added: bool,
}

/// Shared cache of the latest values.
#[derive(Debug)]
pub struct StateCache {
    inner: RwLock<HashMap<String, ServiceValues>>,
    bus: Bus,
}

impl StateCache {
    /// Creates an empty cache publishing structural events on `bus`.
    pub fn new(bus: Bus) -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
            bus,
        }
    }

    /// Merges one update.
    pub fn merge(&self, update: &NormalizedUpdate) -> MergeOutcome {
        let key = update.service_key();
        let value = normalize(update.value.clone());

        let outcome = {
            let mut inner = self.inner.write();
            let service_added = !inner.contains_key(&key);
            let values = inner.entry(key.clone()).or_default();
            let path_added = values.insert(update.path.clone(), value).is_none();
            MergeOutcome {
                service_added,
                path_added,
            }
        };

        if outcome.path_added {
            self.bus.publish(
                Event::new(StatusKind::PathAdded)
                    .with_service(key)
                    .with_path(update.path.as_str())
                    .with_device_instance(update.device_instance),
            );
        }
        outcome
    }

    /// Drops every path of `key` that is not in `present`, publishing `PathRemoved` for each.
    pub fn retain_paths(&self, key: &str, present: &HashSet<String>) -> Vec<String> {
        let removed: Vec<String> = {
            let mut inner = self.inner.write();
            let Some(values) = inner.get_mut(key) else {
                return Vec::new();
            };
            let stale: Vec<String> = values
                .keys()
                .filter(|p| !present.contains(*p))
                .cloned()
                .collect();
            for path in &stale {
                values.remove(path);
            }
            stale
        };

        for path in &removed {
            self.bus.publish(
                Event::new(StatusKind::PathRemoved)
                    .with_service(key)
                    .with_path(path.as_str()),
            );
        }
        removed
    }

    /// Moves the values cached under `from` into `to` once a service's instance is known.
    ///
    /// Paths already present under `to` keep their (newer) value. Every path of
    /// `from` is reported as `PathRemoved`; paths new to `to` as `PathAdded`.
    /// Returns the paths that were moved.
    pub fn adopt(&self, from: &str, to: &str, device_instance: Option<u32>) -> Vec<String> {
        if from == to {
            return Vec::new();
        }
        let (dropped, moved) = {
            let mut inner = self.inner.write();
            let Some(old) = inner.remove(from) else {
                return Vec::new();
            };
            let dropped: Vec<String> = old.keys().cloned().collect();
            let target = inner.entry(to.to_string()).or_default();
            let mut moved = Vec::new();
            for (path, value) in old {
                if !target.contains_key(&path) {
                    target.insert(path.clone(), value);
                    moved.push(path);
                }
            }
            (dropped, moved)
        };

        for path in &dropped {
            self.bus.publish(
                Event::new(StatusKind::PathRemoved)
                    .with_service(from)
                    .with_path(path.as_str()),
            );
        }
        for path in &moved {
            self.bus.publish(
                Event::new(StatusKind::PathAdded)
                    .with_service(to)
                    .with_path(path.as_str())
                    .with_device_instance(device_instance),
            );
        }
        moved
    }

    /// Latest value of one path.
    pub fn get(&self, key: &str, path: &str) -> Option<Value> {
        self.inner.read().get(key).and_then(|v| v.get(path)).cloned()
    }

    /// Copy of one service's values.
    pub fn service(&self, key: &str) -> Option<ServiceValues> {
        self.inner.read().get(key).cloned()
    }

    /// Deep copy of the whole cache.
    pub fn snapshot(&self) -> HashMap<String, ServiceValues> {
        self.inner.read().clone()
    }

    /// Sorted list of known service keys.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.read().keys().cloned().collect();
        keys.sort_unstable();
        keys
    }

    pub fn clear(&self) {
        self.inner.write().clear();
    }
}

/// Maps the bus's empty-collection "no value" to `null`.
pub fn normalize(value: Value) -> Value {
    match value {
        Value::Array(ref a) if a.is_empty() => Value::Null,
        Value::Object(ref o) if o.is_empty() => Value::Null,
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn update(path: &str, value: Value) -> NormalizedUpdate {
        NormalizedUpdate {
            path: path.to_string(),
            value,
            text: None,
            changed: true,
            sender_name: "com.victronenergy.battery".to_string(),
            device_instance: Some(3),
            aux_metadata: None,
        }
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<Event>) -> Vec<Event> {
        let mut out = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            out.push(ev);
        }
        out
    }

    #[test]
    fn test_merge_is_idempotent() {
        let bus = Bus::new(16);
        let mut rx = bus.subscribe();
        let cache = StateCache::new(bus);
        let u = update("/Soc", json!(80));

        let first = cache.merge(&u);
        let after_first = cache.snapshot();
        let second = cache.merge(&u);

        assert!(first.path_added && first.service_added);
        assert!(!second.path_added && !second.service_added);
        assert_eq!(cache.snapshot(), after_first);

        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, StatusKind::PathAdded);
        assert_eq!(events[0].service.as_deref(), Some("com.victronenergy.battery/3"));
    }

    #[test]
    fn test_empty_collection_becomes_null() {
        let cache = StateCache::new(Bus::new(4));
        cache.merge(&update("/Alarms/Low", json!([])));
        cache.merge(&update("/Info", json!({})));
        let svc = cache.service("com.victronenergy.battery/3").expect("service");
        assert_eq!(svc.get("/Alarms/Low"), Some(&Value::Null));
        assert_eq!(svc.get("/Info"), Some(&Value::Null));
    }

    #[test]
    fn test_last_write_wins() {
        let cache = StateCache::new(Bus::new(4));
        cache.merge(&update("/Soc", json!(80)));
        cache.merge(&update("/Soc", json!(79)));
        assert_eq!(cache.get("com.victronenergy.battery/3", "/Soc"), Some(json!(79)));
    }

    #[test]
    fn test_retain_paths_prunes_and_reports() {
        let bus = Bus::new(16);
        let cache = StateCache::new(bus.clone());
        cache.merge(&update("/Soc", json!(80)));
        cache.merge(&update("/Dc/0/Voltage", json!(52.0)));
        let mut rx = bus.subscribe();

        let present: HashSet<String> = ["/Soc".to_string()].into_iter().collect();
        let removed = cache.retain_paths("com.victronenergy.battery/3", &present);

        assert_eq!(removed, vec!["/Dc/0/Voltage".to_string()]);
        let events = drain(&mut rx);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, StatusKind::PathRemoved);
        assert!(cache.retain_paths("com.victronenergy.nope", &present).is_empty());
    }

    #[test]
    fn test_adopt_moves_bare_family_values() {
        let bus = Bus::new(16);
        let cache = StateCache::new(bus.clone());
        let mut early = update("/Soc", json!(80));
        early.device_instance = None;
        cache.merge(&early);
        let mut early_v = update("/Dc/0/Voltage", json!(52.0));
        early_v.device_instance = None;
        cache.merge(&early_v);
        cache.merge(&update("/Soc", json!(70)));
        let mut rx = bus.subscribe();

        let moved = cache.adopt("com.victronenergy.battery", "com.victronenergy.battery/3", Some(3));

        assert_eq!(moved, vec!["/Dc/0/Voltage".to_string()]);
        assert_eq!(cache.keys(), vec!["com.victronenergy.battery/3".to_string()]);
        assert_eq!(cache.get("com.victronenergy.battery/3", "/Soc"), Some(json!(70)));
        assert_eq!(cache.get("com.victronenergy.battery/3", "/Dc/0/Voltage"), Some(json!(52.0)));

        let kinds: Vec<StatusKind> = drain(&mut rx).into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![StatusKind::PathRemoved, StatusKind::PathRemoved, StatusKind::PathAdded]
        );
        assert!(cache.adopt("com.victronenergy.battery", "com.victronenergy.battery/3", Some(3)).is_empty());
    }
}

//! # Message normalization.
//!
//! Turns raw change signals into [`NormalizedUpdate`] records, the only unit
//! that flows on to the cache and the router.
//!
//! ```text
//! Message(sender, Items[(path, {Value, Text})...])
//!   └─► parse_entry() per entry
//!         └─► drop: no path | no value | null value
//!               └─► owner lookup (unknown sender → nothing)
//!                     ├─► "/DeviceInstance" → write instance into registry
//!                     ├─► instance still unknown → resolve by name
//!                     └─► stamp sender_name (family), instance, aux metadata
//! ```
//!
//! Empty collections are *not* dropped here; the cache stores them as null.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::registry::{ServiceRegistry, family_of, service_key};
use crate::transport::{Body, DEVICE_INSTANCE_PATH, Message, RawEntry, TEXT_FIELD, VALUE_FIELD};

/// Fields extracted from one raw entry. Nothing is validated yet.
#[derive(Clone, Debug, PartialEq)]
pub struct ParsedEntry {
    pub path: Option<String>,
    /// `None` when the entry carried no value field.
    pub value: Option<Value>,
    pub text: Option<String>,
    /// Always `true`; every signal entry is a change.
    pub changed: bool,
}

/// A fully-formed value update.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedUpdate {
    pub path: String,
    pub value: Value,
    pub text: Option<String>,
    pub changed: bool,
    /// Family of the emitting service (first three dot-segments).
    pub sender_name: String,
    pub device_instance: Option<u32>,
    pub aux_metadata: Option<BTreeMap<String, Value>>,
}

impl NormalizedUpdate {
    /// Cache/router key of the emitting service.
    pub fn service_key(&self) -> String {
        service_key(&self.sender_name, self.device_instance)
    }
}

/// Extracts `{path, value, text}` from one entry. Never fails.
///
/// ```
/// use busbridge::processor::parse_entry;
/// use busbridge::transport::RawEntry;
///
/// let parsed = parse_entry(&RawEntry { path: Some("/Soc".into()), fields: vec![] });
/// assert_eq!(parsed.path.as_deref(), Some("/Soc"));
/// assert!(parsed.value.is_none());
/// assert!(parsed.changed);
/// ```
pub fn parse_entry(entry: &RawEntry) -> ParsedEntry {
    let text = entry.field(TEXT_FIELD).map(|t| match t {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    });
    ParsedEntry {
        path: entry.path.clone(),
        value: entry.field(VALUE_FIELD).cloned(),
        text,
        changed: true,
    }
}

/// Normalizes an items-changed signal (or any message with an items body).
///
/// `resolve` is consulted with `(registry, service name, None)` when the
/// owning service has no instance yet; see
/// [`resolve_device_instance`](crate::registry::resolve_device_instance).
pub fn process_items_changed<F>(
    msg: &Message,
    registry: &mut ServiceRegistry,
    resolve: F,
) -> Vec<NormalizedUpdate>
where
    F: Fn(&ServiceRegistry, &str, Option<u32>) -> Option<u32>,
{
    match &msg.body {
        Body::Items(entries) => process_entries(&msg.sender, entries, registry, resolve),
        _ => Vec::new(),
    }
}

/// Normalizes a properties-changed signal: one entry for the message's own path.
pub fn process_properties_changed<F>(
    msg: &Message,
    registry: &mut ServiceRegistry,
    resolve: F,
) -> Vec<NormalizedUpdate>
where
    F: Fn(&ServiceRegistry, &str, Option<u32>) -> Option<u32>,
{
    match &msg.body {
        Body::Properties(fields) => {
            let entry = RawEntry {
                path: Some(msg.path.clone()),
                fields: fields.clone(),
            };
            process_entries(&msg.sender, std::slice::from_ref(&entry), registry, resolve)
        }
        _ => Vec::new(),
    }
}

/// Shared core for signals and bulk-read replies sent by `owner`.
pub fn process_entries<F>(
    owner: &str,
    entries: &[RawEntry],
    registry: &mut ServiceRegistry,
    resolve: F,
) -> Vec<NormalizedUpdate>
where
    F: Fn(&ServiceRegistry, &str, Option<u32>) -> Option<u32>,
{
    let survivors: Vec<(String, Value, Option<String>)> = entries
        .iter()
        .map(parse_entry)
        .filter_map(|p| match (p.path, p.value) {
            (Some(path), Some(value)) if !value.is_null() => Some((path, value, p.text)),
            _ => None,
        })
        .collect();
    if survivors.is_empty() {
        return Vec::new();
    }

    let Some(name) = registry.get(owner).map(|s| s.name.clone()) else {
        return Vec::new();
    };

    let observed = survivors
        .iter()
        .rev()
        .find(|(path, _, _)| path == DEVICE_INSTANCE_PATH)
        .and_then(|(_, value, _)| value.as_u64())
        .and_then(|i| u32::try_from(i).ok());

    let mut instance = registry.get(owner).and_then(|s| s.device_instance);
    if observed.is_some() {
        instance = observed;
    } else if instance.is_none() {
        instance = resolve(registry, &name, None);
    }

    let aux = match registry.get_mut(owner) {
        Some(svc) => {
            if instance.is_some() {
                svc.device_instance = instance;
            }
            (!svc.aux_metadata.is_empty()).then(|| svc.aux_metadata.clone())
        }
        None => None,
    };

    let sender_name = family_of(&name).to_string();
    survivors
        .into_iter()
        .map(|(path, value, text)| NormalizedUpdate {
            path,
            value,
            text,
            changed: true,
            sender_name: sender_name.clone(),
            device_instance: instance,
            aux_metadata: aux.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::resolve_device_instance;
    use crate::transport::{ITEM_INTERFACE, member};
    use serde_json::json;

    fn registry() -> ServiceRegistry {
        let mut reg = ServiceRegistry::new("com.victronenergy");
        reg.insert(":1.10", "com.victronenergy.battery.ttyUSB3");
        reg
    }

    fn items(sender: &str, entries: Vec<RawEntry>) -> Message {
        Message {
            sender: sender.to_string(),
            interface: ITEM_INTERFACE.to_string(),
            member: member::ITEMS_CHANGED.to_string(),
            path: "/".to_string(),
            body: Body::Items(entries),
        }
    }

    #[test]
    fn test_parse_entry_tolerates_missing_fields() {
        let cases = [
            RawEntry { path: Some("/A".into()), fields: vec![] },
            RawEntry { path: Some("/A".into()), fields: vec![("Value".into(), json!(1))] },
            RawEntry { path: Some("/A".into()), fields: vec![("Text".into(), json!("1 V"))] },
            RawEntry { path: None, fields: vec![] },
        ];
        for entry in &cases {
            assert!(parse_entry(entry).changed);
        }
        assert_eq!(parse_entry(&cases[1]).value, Some(json!(1)));
        assert_eq!(parse_entry(&cases[2]).text.as_deref(), Some("1 V"));
        assert!(parse_entry(&cases[2]).value.is_none());
    }

    #[test]
    fn test_output_counts_only_valued_entries() {
        let mut reg = registry();
        let msg = items(
            ":1.10",
            vec![
                RawEntry::new("/Dc/0/Voltage", json!(52.1), Some("52.1V")),
                RawEntry::new("/Soc", Value::Null, None),
                RawEntry { path: None, fields: vec![] },
                RawEntry { path: Some("/Alarms/LowVoltage".into()), fields: vec![] },
                RawEntry::new("/Dc/0/Temperature", json!([]), None),
            ],
        );
        let out = process_items_changed(&msg, &mut reg, resolve_device_instance);
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|u| u.changed && u.sender_name == "com.victronenergy.battery"));
        assert_eq!(out[0].text.as_deref(), Some("52.1V"));
    }

    #[test]
    fn test_unknown_sender_yields_nothing() {
        let mut reg = registry();
        let msg = items(":1.99", vec![RawEntry::new("/Soc", json!(80), None)]);
        assert!(process_items_changed(&msg, &mut reg, resolve_device_instance).is_empty());
    }

    #[test]
    fn test_device_instance_is_written_back() {
        let mut reg = registry();
        let msg = items(
            ":1.10",
            vec![
                RawEntry::new("/Soc", json!(80), None),
                RawEntry::new(DEVICE_INSTANCE_PATH, json!(3), None),
            ],
        );
        let out = process_items_changed(&msg, &mut reg, resolve_device_instance);
        assert!(out.iter().all(|u| u.device_instance == Some(3)));
        assert_eq!(out[0].service_key(), "com.victronenergy.battery/3");
        assert_eq!(reg.get(":1.10").and_then(|s| s.device_instance), Some(3));
    }

    #[test]
    fn test_lazy_resolution_uses_callback() {
        let mut reg = registry();
        let msg = items(":1.10", vec![RawEntry::new("/Soc", json!(80), None)]);
        let out = process_items_changed(&msg, &mut reg, |_, name, _| {
            assert_eq!(name, "com.victronenergy.battery.ttyUSB3");
            Some(7)
        });
        assert_eq!(out[0].device_instance, Some(7));
        assert_eq!(reg.get(":1.10").and_then(|s| s.device_instance), Some(7));
    }

    #[test]
    fn test_properties_changed_uses_object_path() {
        let mut reg = registry();
        let msg = Message {
            sender: ":1.10".into(),
            interface: ITEM_INTERFACE.into(),
            member: member::PROPERTIES_CHANGED.into(),
            path: "/Soc".into(),
            body: Body::Properties(vec![("Value".into(), json!(81)), ("Text".into(), json!("81%"))]),
        };
        let out = process_properties_changed(&msg, &mut reg, resolve_device_instance);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].path, "/Soc");
        assert_eq!(out[0].text.as_deref(), Some("81%"));
    }

    #[test]
    fn test_aux_metadata_is_stamped() {
        let mut reg = registry();
        reg.get_mut(":1.10")
            .expect("entry")
            .aux_metadata
            .insert("/ProductName".into(), json!("SmartShunt"));
        let msg = items(":1.10", vec![RawEntry::new("/Soc", json!(80), None)]);
        let out = process_items_changed(&msg, &mut reg, resolve_device_instance);
        let aux = out[0].aux_metadata.as_ref().expect("aux");
        assert_eq!(aux.get("/ProductName"), Some(&json!("SmartShunt")));
    }
}

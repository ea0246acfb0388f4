//! # Service record and name helpers.
//!
//! Bus names look like `com.victronenergy.battery.ttyUSB3`. The first three
//! dot-segments are the service **family** (`com.victronenergy.battery`), which
//! stays stable when a device re-registers under a new suffix; the third
//! segment alone is its **type** (`battery`).

use std::collections::BTreeMap;

use serde_json::Value;

/// One bus-addressable endpoint under the tracked namespace.
#[derive(Clone, Debug, PartialEq)]
pub struct Service {
    /// Full bus name.
    pub name: String,
    /// Transient owner id currently holding the name.
    pub owner: String,
    /// Device instance, once resolved.
    pub device_instance: Option<u32>,
    /// Best-effort metadata (product name, custom name, …).
    pub aux_metadata: BTreeMap<String, Value>,
}

impl Service {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            device_instance: None,
            aux_metadata: BTreeMap::new(),
        }
    }

    /// First three dot-segments of the name.
    pub fn family(&self) -> &str {
        family_of(&self.name)
    }

    /// Key used by the cache and the router (`family/instance`, or the bare family).
    pub fn service_key(&self) -> String {
        service_key(self.family(), self.device_instance)
    }

    /// Short `type/instance` key; the instance part is empty while unknown.
    pub fn short_key(&self) -> String {
        let trail = self
            .device_instance
            .map(|i| i.to_string())
            .unwrap_or_default();
        format!("{}/{}", device_type(&self.name), trail)
    }
}

/// Returns the first three dot-segments of `name` (or the whole name if shorter).
///
/// ```
/// use busbridge::registry::family_of;
///
/// assert_eq!(family_of("com.victronenergy.battery.ttyUSB3"), "com.victronenergy.battery");
/// assert_eq!(family_of("com.victronenergy.system"), "com.victronenergy.system");
/// ```
pub fn family_of(name: &str) -> &str {
    match name.match_indices('.').nth(2) {
        Some((idx, _)) => &name[..idx],
        None => name,
    }
}

/// Returns the third dot-segment of `name` (`battery` for `com.victronenergy.battery.x`).
pub fn device_type(name: &str) -> &str {
    name.split('.').nth(2).unwrap_or(name)
}

/// Builds a routing key from a family and an optional instance.
pub fn service_key(family: &str, instance: Option<u32>) -> String {
    match instance {
        Some(i) => format!("{family}/{i}"),
        None => family.to_string(),
    }
}

//! # Device-instance resolution.
//!
//! Callers usually know a device by its type and instance number
//! (`com.victronenergy.battery/3`), not by its exact bus name
//! (`com.victronenergy.battery.ttyUSB3`). [`resolve_service_name`] bridges the
//! gap with three progressively looser tiers:
//!
//! ```text
//! tier 1: instance == needle && name == prefix
//! tier 2: instance == needle && name starts with "{prefix}."
//! tier 3: instance == needle && name contains ".{last segment of prefix}."
//! none  : prefix unchanged (the transport reports the unknown destination)
//! ```
//!
//! Ties within a tier go to the lexicographically smallest name.
//!
//! Tier 3 can match an unrelated service that happens to share the type
//! segment; callers rely on that looseness.

use super::table::ServiceRegistry;

/// Resolves a family prefix and device instance to a concrete service name.
///
/// # Example
/// ```
/// use busbridge::registry::{ServiceRegistry, resolve_service_name};
///
/// let mut reg = ServiceRegistry::new("com.vendor");
/// reg.insert(":1.5", "com.vendor.battery.ttyUSB3");
/// reg.get_mut(":1.5").unwrap().device_instance = Some(3);
///
/// assert_eq!(resolve_service_name(&reg, 3, "com.vendor.battery"), "com.vendor.battery.ttyUSB3");
/// assert_eq!(resolve_service_name(&reg, 4, "com.vendor.battery"), "com.vendor.battery");
/// ```
pub fn resolve_service_name(registry: &ServiceRegistry, needle: u32, prefix: &str) -> String {
    let dotted = format!("{prefix}.");
    let last = prefix.rsplit('.').next().unwrap_or(prefix);
    let segment = format!(".{last}.");

    let tiers: [&dyn Fn(&str) -> bool; 3] = [
        &|name: &str| name == prefix,
        &|name: &str| name.starts_with(&dotted),
        &|name: &str| name.contains(&segment),
    ];
    tiers
        .iter()
        .find_map(|matches| {
            registry
                .iter()
                .filter(|s| s.device_instance == Some(needle) && matches(s.name.as_str()))
                .min_by(|a, b| a.name.cmp(&b.name))
        })
        .map(|svc| svc.name.clone())
        .unwrap_or_else(|| prefix.to_string())
}

/// Reverse lookup: exact name match only, `fallback` otherwise.
pub fn resolve_device_instance(
    registry: &ServiceRegistry,
    name: &str,
    fallback: Option<u32>,
) -> Option<u32> {
    registry
        .find_by_name(name)
        .and_then(|s| s.device_instance)
        .or(fallback)
}

/// Splits a routing key (`family/instance`) into its parts.
///
/// Keys without a numeric instance are returned whole with `None`.
///
/// ```
/// use busbridge::registry::split_service_key;
///
/// assert_eq!(split_service_key("com.victronenergy.battery/3"), ("com.victronenergy.battery", Some(3)));
/// assert_eq!(split_service_key("com.victronenergy.settings"), ("com.victronenergy.settings", None));
/// ```
pub fn split_service_key(key: &str) -> (&str, Option<u32>) {
    match key.rsplit_once('/') {
        Some((family, instance)) => match instance.parse::<u32>() {
            Ok(i) => (family, Some(i)),
            Err(_) => (key, None),
        },
        None => (key, None),
    }
}

/// Resolves a routing key to the bus name a call should be addressed to.
///
/// Short keys go through [`resolve_service_name`]; anything else is used as-is.
pub fn resolve_destination(registry: &ServiceRegistry, key: &str) -> String {
    match split_service_key(key) {
        (family, Some(instance)) => resolve_service_name(registry, instance, family),
        (name, None) => name.to_string(),
    }
}

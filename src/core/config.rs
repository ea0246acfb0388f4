//! # Bridge configuration.
//!
//! Provides [`Config`], the centralized settings for the bridge runtime.
//!
//! ## Sentinel values
//! - `call_attempts = 0` → treated as 1 (no retry)
//! - `bus_capacity = 0` → clamped to 1
//! - a family missing from `metadata_families` → no metadata queries

use std::collections::BTreeMap;

use crate::policies::{BackoffPolicy, SyncMode};

/// Global configuration for the bridge.
///
/// ## Field semantics
/// - `namespace`: bus-name prefix of tracked services, without trailing dot
/// - `sync`: periodic or one-shot bulk refresh
/// - `reconnect`: delay schedule between sessions (capped at 30s by default)
/// - `call_retry` / `call_attempts`: retry of "service temporarily unavailable" calls
/// - `bus_capacity`: status event ring buffer size
/// - `metadata_families`: service type → paths read once on first sighting
#[derive(Clone, Debug)]
pub struct Config {
    /// Prefix of tracked bus names (e.g. `com.victronenergy`).
    pub namespace: String,

    /// Resync strategy after bootstrap.
    pub sync: SyncMode,

    /// Delay schedule between connection attempts.
    ///
    /// Indexed by the number of consecutive failures; reset after a session
    /// that stayed up for at least `reconnect.max`.
    pub reconnect: BackoffPolicy,

    /// Delay schedule for calls failing with `ServiceUnavailable`.
    pub call_retry: BackoffPolicy,

    /// Maximum tries per call (first try included).
    pub call_attempts: u32,

    /// Capacity of the status event broadcast channel.
    pub bus_capacity: usize,

    /// Paths to read once when a service of the given type is first seen.
    ///
    /// Keys are service types (`switch`, `battery`, …), values are item paths.
    pub metadata_families: BTreeMap<String, Vec<String>>,
}

impl Config {
    /// Tries per call, at least 1.
    #[inline]
    pub fn call_attempts_clamped(&self) -> u32 {
        self.call_attempts.max(1)
    }

    /// Bus capacity, at least 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }

    /// Metadata paths configured for a service type (empty if none).
    pub fn metadata_paths(&self, device_type: &str) -> &[String] {
        self.metadata_families
            .get(device_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }
}

impl Default for Config {
    /// Default configuration:
    ///
    /// - `namespace = "com.victronenergy"`
    /// - `sync = SyncMode::SignalOnly`
    /// - `reconnect = BackoffPolicy::reconnect()` (1s doubling, 30s cap)
    /// - `call_retry = BackoffPolicy::call_retry()`, `call_attempts = 3`
    /// - `bus_capacity = 1024`
    /// - product/custom names for `switch`, `battery` and `solarcharger`
    fn default() -> Self {
        let names = vec!["/ProductName".to_string(), "/CustomName".to_string()];
        let metadata_families = ["switch", "battery", "solarcharger"]
            .into_iter()
            .map(|family| (family.to_string(), names.clone()))
            .collect();

        Self {
            namespace: "com.victronenergy".to_string(),
            sync: SyncMode::default(),
            reconnect: BackoffPolicy::reconnect(),
            call_retry: BackoffPolicy::call_retry(),
            call_attempts: 3,
            bus_capacity: 1024,
            metadata_families,
        }
    }
}

//! # Structural status events emitted by the bridge.
//!
//! The [`StatusKind`] enum has exactly eight values, covering:
//! - **Service events**: a bus name appeared, disappeared or changed owner
//! - **Path events**: a value path appeared in or vanished from the cache
//! - **Provider/plugin events**: connection lifecycle and failures
//!
//! The [`Event`] struct carries the metadata a collaborator needs to index
//! the change (service key, path, device instance, reason, delay).
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use busbridge::{Event, StatusKind};
//!
//! let ev = Event::new(StatusKind::PathAdded)
//!     .with_service("com.victronenergy.battery/3")
//!     .with_path("/Dc/0/Voltage");
//!
//! assert_eq!(ev.kind, StatusKind::PathAdded);
//! assert_eq!(ev.path.as_deref(), Some("/Dc/0/Voltage"));
//! ```

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::{Duration, SystemTime};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of structural status events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusKind {
    /// A namespace-matching service was registered.
    ///
    /// Sets: `service` (full name), `owner`.
    ServiceAdded,

    /// A service's owner disappeared.
    ///
    /// Emitted twice per removal: once with `service` = full name, once with
    /// `service` = short `type/instance` key.
    ServiceRemoved,

    /// First value observed for a (service key, path) pair.
    ///
    /// Sets: `service` (cache key), `path`.
    PathAdded,

    /// A cached path was not reported by a later bulk refresh.
    ///
    /// Sets: `service` (cache key), `path`.
    PathRemoved,

    /// Connection lifecycle notice (`connecting`, `connected`, `disconnected`).
    ///
    /// Sets: `reason`.
    ProviderStatus,

    /// Connection-level failure; a reconnect is scheduled.
    ///
    /// Sets: `reason`, `delay_ms`, `attempt`.
    ProviderError,

    /// A collaborator callback or background job failed.
    ///
    /// Sets: `reason`, optionally `service`/`path`.
    PluginError,

    /// A known service name moved to a new owner.
    ///
    /// Sets: `service`, `owner` (new owner).
    ServiceMigrated,
}

impl StatusKind {
    /// Stable kebab-case label.
    pub fn as_label(&self) -> &'static str {
        match self {
            StatusKind::ServiceAdded => "service-added",
            StatusKind::ServiceRemoved => "service-removed",
            StatusKind::PathAdded => "path-added",
            StatusKind::PathRemoved => "path-removed",
            StatusKind::ProviderStatus => "provider-status",
            StatusKind::ProviderError => "provider-error",
            StatusKind::PluginError => "plugin-error",
            StatusKind::ServiceMigrated => "service-migrated",
        }
    }
}

/// Status event with optional metadata.
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: StatusKind,
    /// Service name or cache key, depending on the kind.
    pub service: Option<Arc<str>>,
    /// Value path, for path events.
    pub path: Option<Arc<str>>,
    /// Current bus owner of the service.
    pub owner: Option<Arc<str>>,
    /// Device instance, when known.
    pub device_instance: Option<u32>,
    /// Human-readable reason (errors, lifecycle notices).
    pub reason: Option<Arc<str>>,
    /// Reconnect delay in milliseconds (compact).
    pub delay_ms: Option<u32>,
    /// Consecutive failure count, for provider errors.
    pub attempt: Option<u32>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: StatusKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            service: None,
            path: None,
            owner: None,
            device_instance: None,
            reason: None,
            delay_ms: None,
            attempt: None,
        }
    }

    #[inline]
    pub fn with_service(mut self, service: impl Into<Arc<str>>) -> Self {
        self.service = Some(service.into());
        self
    }

    #[inline]
    pub fn with_path(mut self, path: impl Into<Arc<str>>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[inline]
    pub fn with_owner(mut self, owner: impl Into<Arc<str>>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    #[inline]
    pub fn with_device_instance(mut self, instance: Option<u32>) -> Self {
        self.device_instance = instance;
        self
    }

    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches a delay (stored as milliseconds).
    #[inline]
    pub fn with_delay(mut self, d: Duration) -> Self {
        let ms = d.as_millis().min(u128::from(u32::MAX)) as u32;
        self.delay_ms = Some(ms);
        self
    }

    #[inline]
    pub fn with_attempt(mut self, n: u32) -> Self {
        self.attempt = Some(n);
        self
    }

    /// Shorthand for a [`StatusKind::ProviderStatus`] notice.
    pub fn provider_status(reason: &'static str) -> Self {
        Event::new(StatusKind::ProviderStatus).with_reason(reason)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequence_is_monotonic() {
        let a = Event::new(StatusKind::PathAdded);
        let b = Event::new(StatusKind::PathAdded);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn test_delay_saturates() {
        let ev = Event::new(StatusKind::ProviderError).with_delay(Duration::from_secs(u64::MAX));
        assert_eq!(ev.delay_ms, Some(u32::MAX));
    }
}

//! Status events: types and broadcast bus.
//!
//! ## Contents
//! - [`StatusKind`], [`Event`] event classification and payload metadata
//! - [`Bus`] thin wrapper over `tokio::sync::broadcast`
//!
//! ## Quick reference
//! - **Publishers**: `Supervisor` (provider status/errors), `Session`
//!   (service added/removed/migrated), `StateCache` (path added/removed),
//!   `SubscriptionRouter` (plugin errors from detached writes).
//! - **Consumers**: the bridge's status listener (fans out to `SubscriberSet`)
//!   and any receiver obtained from `Bridge::status()`.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, StatusKind};

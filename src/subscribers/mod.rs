//! # Status subscribers.
//!
//! Collaborators observe the bridge through [`Subscribe`] implementations fed
//! from the status [`Bus`](crate::events::Bus).
//!
//! ```text
//! Session / StateCache / Supervisor ── publish(Event) ──► Bus
//!                                                          │
//!                                      status listener ◄───┘
//!                                              │
//!                                     SubscriberSet::emit(&Event)
//!                                       ┌──────┼──────────┐
//!                                       ▼      ▼          ▼
//!                                  LogWriter  StatusFn   custom
//! ```
//!
//! ## Implementing custom subscribers
//! ```no_run
//! use async_trait::async_trait;
//! use busbridge::{Event, StatusKind, Subscribe};
//!
//! struct Alerts;
//!
//! #[async_trait]
//! impl Subscribe for Alerts {
//!     async fn on_event(&self, event: &Event) {
//!         if event.kind == StatusKind::ProviderError {
//!             // page someone
//!         }
//!     }
//!     fn name(&self) -> &'static str { "alerts" }
//! }
//! ```

mod embedded;
mod set;
mod status_fn;
mod subscribe;

#[cfg(feature = "logging")]
pub use embedded::LogWriter;
pub use set::SubscriberSet;
pub use status_fn::StatusFn;
pub use subscribe::Subscribe;

//! # busbridge
//!
//! **busbridge** mirrors the services of a device message bus into an
//! in-process cache and routes value changes to subscribers.
//!
//! It discovers every service under a namespace, keeps their values fresh
//! from change signals (and optional polling), resolves the numeric device
//! instance each service is addressed by, and writes values back on request.
//! The bus protocol itself stays behind the [`transport::Connector`] /
//! [`transport::Transport`] traits.
//!
//! ## Architecture
//! ```text
//!                        ┌───────────────────────┐
//!                        │      Connector        │ (bus client, user-provided)
//!                        └───────────┬───────────┘
//!                                    ▼ connect()
//! ┌──────────────────────────────────────────────────────────────────┐
//! │ Supervisor: reconnect forever, backoff 1s → 2s → … → 30s cap     │
//! │   └─► Session (one per connection)                               │
//! │         ├─ ServiceRegistry (owner → service, per session)        │
//! │         ├─ processor: signal → NormalizedUpdate                  │
//! │         └─ background reads (bulk refresh, instance, metadata)   │
//! └──────┬───────────────────────────────┬───────────────────────────┘
//!        ▼ merge                         ▼ dispatch
//! ┌──────────────┐               ┌────────────────────┐
//! │  StateCache  │               │ SubscriptionRouter │──► callbacks
//! │ key→path→val │               │  (key, path) → cbs │◄── publish()/read()
//! └──────┬───────┘               └────────────────────┘
//!        ▼ structural events
//! ┌──────────────┐     ┌─────────────────┐
//! │ Bus (status) │────►│  SubscriberSet  │──► LogWriter / StatusFn / custom
//! └──────────────┘     └─────────────────┘
//! ```
//!
//! ## Keys
//! - **service key**: `"{family}/{instance}"` (e.g. `com.victronenergy.battery/512`),
//!   or the bare family while the instance is unknown.
//! - **short key**: `"{type}/{instance}"` (e.g. `battery/512`), used in removal events.
//!
//! ## Features
//! | Feature   | Description                                   | Default |
//! |-----------|-----------------------------------------------|---------|
//! | `logging` | Exports [`LogWriter`], a `tracing` subscriber  | yes     |
//!
//! ## Example
//! ```no_run
//! use busbridge::{Bridge, Config, SyncMode, transport::Connector};
//! use std::time::Duration;
//! use tokio_util::sync::CancellationToken;
//!
//! async fn serve(connector: impl Connector) {
//!     let cfg = Config {
//!         sync: SyncMode::Poll { interval: Duration::from_secs(60) },
//!         ..Config::default()
//!     };
//!     let bridge = Bridge::builder(cfg).build();
//!     let token = CancellationToken::new();
//!     bridge.run(&connector, token).await;
//! }
//! ```

pub mod cache;
mod core;
mod error;
mod events;
pub mod expand;
mod policies;
pub mod processor;
pub mod registry;
pub mod router;
mod subscribers;
pub mod transport;

pub use crate::core::{Bridge, BridgeBuilder, Config};
pub use error::{BridgeError, CallError};
pub use events::{Bus, Event, StatusKind};
pub use expand::{PathTemplate, expand_wildcard_paths};
pub use policies::{BackoffPolicy, SyncMode};
pub use processor::NormalizedUpdate;
pub use router::{SubscriptionId, WriteCallback};
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
pub use subscribers::{StatusFn, Subscribe, SubscriberSet};

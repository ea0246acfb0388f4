//! # Status bus for broadcasting structural events.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`] used by the
//! session, cache and supervisor to report structural changes.
//!
//! ```text
//! Publishers:                        Consumers:
//!   Supervisor ──┐
//!   Session    ──┼──────► Bus ──────► status listener ────► SubscriberSet
//!   StateCache ──┘  (broadcast chan) └─► Bridge::status() receivers
//! ```
//!
//! ## Rules
//! - **Non-blocking publish**: `publish()` never blocks and never fails.
//! - **Bounded capacity**: slow receivers get `RecvError::Lagged(n)`.
//! - **No persistence**: events are dropped if nobody listens.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for status events.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a new bus with the given channel capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all active receivers.
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver that observes events sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

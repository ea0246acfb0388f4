//! # Core subscriber trait
//!
//! `Subscribe` is the extension point for observing bridge status. Each
//! subscriber is driven by a dedicated worker loop fed by a bounded queue owned
//! by the [`SubscriberSet`](crate::subscribers::SubscriberSet).
//!
//! ## Contract
//! - Implementations may be slow; they block neither the session loop nor
//!   other subscribers.
//! - Each subscriber declares its queue capacity via
//!   [`Subscribe::queue_capacity`]. On overflow, events for that subscriber are
//!   **dropped** (warn).

use async_trait::async_trait;

use crate::events::Event;

/// Contract for status subscribers.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one status event.
    async fn on_event(&self, event: &Event);

    /// Human-readable name (for logs).
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Preferred capacity of this subscriber's queue.
    fn queue_capacity(&self) -> usize {
        1024
    }
}

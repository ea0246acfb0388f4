//! # Closure-backed subscriber (`StatusFn`)
//!
//! [`StatusFn`] wraps a synchronous closure `F: Fn(&Event)`, for callers that
//! only need a quick hook into status events.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use busbridge::{Event, StatusFn, StatusKind, Subscribe};
//!
//! let hook: Arc<dyn Subscribe> = StatusFn::arc("removals", |ev: &Event| {
//!     if ev.kind == StatusKind::ServiceRemoved {
//!         // react
//!     }
//! });
//! assert_eq!(hook.name(), "removals");
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::events::Event;

use super::Subscribe;

/// Function-backed subscriber.
#[derive(Debug)]
pub struct StatusFn<F> {
    name: &'static str,
    f: F,
}

impl<F> StatusFn<F>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    pub fn new(name: &'static str, f: F) -> Self {
        Self { name, f }
    }

    /// Creates the subscriber as a shared handle.
    pub fn arc(name: &'static str, f: F) -> Arc<Self> {
        Arc::new(Self::new(name, f))
    }
}

#[async_trait]
impl<F> Subscribe for StatusFn<F>
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    async fn on_event(&self, event: &Event) {
        (self.f)(event);
    }

    fn name(&self) -> &'static str {
        self.name
    }
}

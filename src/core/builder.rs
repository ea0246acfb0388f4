use std::sync::Arc;

use crate::{
    core::{Bridge, Config},
    subscribers::{Subscribe, SubscriberSet},
};

/// Builder for constructing a [`Bridge`] with optional subscribers.
pub struct BridgeBuilder {
    cfg: Config,
    subscribers: Vec<Arc<dyn Subscribe>>,
}

impl BridgeBuilder {
    pub fn new(cfg: Config) -> Self {
        Self {
            cfg,
            subscribers: Vec::new(),
        }
    }

    /// Sets status subscribers.
    ///
    /// Subscribers receive status events through dedicated workers with
    /// bounded queues while the bridge runs.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Builds the bridge. Must be called within a Tokio runtime when subscribers are set.
    pub fn build(self) -> Bridge {
        let subs = Arc::new(SubscriberSet::new(self.subscribers));
        Bridge::new_internal(self.cfg, subs)
    }
}

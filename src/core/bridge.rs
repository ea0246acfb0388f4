//! # Bridge: the public handle.
//!
//! [`Bridge`] ties the shared pieces together and exposes the operations
//! collaborators use: subscriptions, writes, direct reads, cache queries and
//! the status stream.
//!
//! ```text
//!                   ┌──────────── Bridge ─────────────┐
//! subscribe() ─────►│ SubscriptionRouter ◄── dispatch │
//! publish()   ─────►│        │ (link per session)     │
//! read()      ─────►│        ▼                        │
//!                   │    Supervisor ──► Session ──────┼──► Connector
//! get()/snapshot() ►│ StateCache ◄── merge            │
//! status()    ─────►│ Bus ──► listener ──► SubscriberSet
//!                   └─────────────────────────────────┘
//! ```
//!
//! ## Example
//! ```no_run
//! use std::sync::Arc;
//! use tokio_util::sync::CancellationToken;
//! use busbridge::{Bridge, Config, Subscribe, transport::Connector};
//! #[cfg(feature = "logging")]
//! use busbridge::LogWriter;
//!
//! async fn serve(connector: impl Connector) {
//!     let mut subs: Vec<Arc<dyn Subscribe>> = Vec::new();
//!     #[cfg(feature = "logging")]
//!     subs.push(Arc::new(LogWriter::new()));
//!
//!     let bridge = Bridge::builder(Config::default()).with_subscribers(subs).build();
//!     bridge.subscribe("com.victronenergy.battery/512", "/Soc", |u| {
//!         println!("soc = {}", u.value);
//!     });
//!
//!     let token = CancellationToken::new();
//!     bridge.run(&connector, token).await;
//! }
//! ```

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::select;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::{
    cache::{ServiceValues, StateCache},
    core::{BridgeBuilder, Config},
    error::{BridgeError, CallError},
    events::{Bus, Event},
    expand::{PathTemplate, expand_wildcard_paths},
    processor::NormalizedUpdate,
    registry::{device_type, split_service_key},
    router::{SubscriptionId, SubscriptionRouter, WriteCallback},
    subscribers::SubscriberSet,
    transport::Connector,
};

use super::supervisor::Supervisor;

/// Handle to a running (or runnable) bridge.
pub struct Bridge {
    cfg: Arc<Config>,
    bus: Bus,
    subs: Arc<SubscriberSet>,
    cache: Arc<StateCache>,
    router: Arc<SubscriptionRouter>,
    supervisor: Supervisor,
}

impl Bridge {
    /// Starts building a bridge with `cfg`.
    pub fn builder(cfg: Config) -> BridgeBuilder {
        BridgeBuilder::new(cfg)
    }

    pub(crate) fn new_internal(cfg: Config, subs: Arc<SubscriberSet>) -> Self {
        let cfg = Arc::new(cfg);
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let cache = Arc::new(StateCache::new(bus.clone()));
        let router = Arc::new(SubscriptionRouter::new(
            bus.clone(),
            cfg.call_retry,
            cfg.call_attempts_clamped(),
        ));
        let supervisor = Supervisor::new(
            Arc::clone(&cfg),
            bus.clone(),
            Arc::clone(&cache),
            Arc::clone(&router),
        );
        Self {
            cfg,
            bus,
            subs,
            cache,
            router,
            supervisor,
        }
    }

    pub fn config(&self) -> &Config {
        &self.cfg
    }

    /// Keeps a session alive on `connector` until `token` is cancelled.
    ///
    /// Reconnects forever with the configured backoff.
    pub async fn run(&self, connector: &dyn Connector, token: CancellationToken) {
        let _listener = self.subscriber_listener().drop_guard();
        self.supervisor.run(connector, token).await;
    }

    /// Runs a single session without reconnecting.
    ///
    /// Returns `Ok(())` if `token` was cancelled, the session error otherwise.
    pub async fn run_once(
        &self,
        connector: &dyn Connector,
        token: CancellationToken,
    ) -> Result<(), BridgeError> {
        let _listener = self.subscriber_listener().drop_guard();
        let (res, _) = self.supervisor.run_once(connector, &token).await;
        res
    }

    /// Forwards bus events to the subscriber set until the returned token is cancelled.
    fn subscriber_listener(&self) -> CancellationToken {
        let token = CancellationToken::new();
        if self.subs.is_empty() {
            return token;
        }
        let mut rx = self.bus.subscribe();
        let set = Arc::clone(&self.subs);
        let stop = token.clone();
        tokio::spawn(async move {
            loop {
                select! {
                    _ = stop.cancelled() => break,
                    ev = rx.recv() => match ev {
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(skipped)) => {
                            warn!(skipped, "status listener lagged");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        });
        token
    }

    /// Registers `callback` for updates of `path` on `service` (`family/instance`).
    ///
    /// Subscriptions survive reconnects.
    pub fn subscribe<F>(&self, service: &str, path: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&NormalizedUpdate) + Send + Sync + 'static,
    {
        self.router.subscribe(service, path, callback)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.router.unsubscribe(id)
    }

    /// Writes `value` to `path` on `service` through the current session.
    pub async fn publish(&self, service: &str, path: &str, value: &Value) -> Result<(), CallError> {
        self.router.publish(service, path, value).await
    }

    /// Fire-and-forget variant of [`publish`](Self::publish).
    pub fn publish_detached(
        &self,
        service: &str,
        path: &str,
        value: Value,
        done: Option<WriteCallback>,
    ) {
        self.router.publish_detached(service, path, value, done);
    }

    /// Reads `path` on `service` from the bus, bypassing the cache.
    pub async fn read(&self, service: &str, path: &str) -> Result<Value, CallError> {
        self.router.read(service, path).await
    }

    /// Latest cached value of `path` under the cache key `service`.
    pub fn get(&self, service: &str, path: &str) -> Option<Value> {
        self.cache.get(service, path)
    }

    /// Cached values of one service key.
    pub fn service(&self, service: &str) -> Option<ServiceValues> {
        self.cache.service(service)
    }

    /// Copy of the whole cache.
    pub fn snapshot(&self) -> HashMap<String, ServiceValues> {
        self.cache.snapshot()
    }

    /// Expands `template` against the cached paths of `service`.
    pub fn expand(&self, service: &str, template: &PathTemplate) -> Vec<PathTemplate> {
        let Some(values) = self.cache.service(service) else {
            return Vec::new();
        };
        let (family, _) = split_service_key(service);
        expand_wildcard_paths(template, &values, device_type(family))
    }

    /// Receiver of every status event published from now on.
    pub fn status(&self) -> broadcast::Receiver<Event> {
        self.bus.subscribe()
    }
}

//! # Subscription router and write-back.
//!
//! Subscriptions are keyed by a composite [`SubscriptionKey`] (service key +
//! path), so `("a/1", "/b")` and `("a/1/", "b")` can never collide.
//!
//! ```text
//! dispatch(update)
//!   ├─► key = (update.service_key(), update.path)
//!   ├─► snapshot callbacks for key (lock released)
//!   └─► call each in registration order; a panicking callback → PluginError
//!
//! publish(service, path, value)
//!   ├─► link attached? else NotConnected
//!   ├─► resolve short key via registry (three-tier)
//!   ├─► WireValue::infer(value)
//!   └─► invoke SetValue, retrying ServiceUnavailable with call backoff
//! ```
//!
//! Subscriptions outlive sessions; only the write link is swapped on reconnect.

use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::warn;

use crate::error::CallError;
use crate::events::{Bus, Event, StatusKind};
use crate::policies::BackoffPolicy;
use crate::processor::NormalizedUpdate;
use crate::registry::{ServiceRegistry, resolve_destination};
use crate::transport::{Body, MethodCall, Transport, WireValue, invoke_with_retry};

/// Opaque handle returned by [`SubscriptionRouter::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

/// Composite routing key.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionKey {
    /// Service key (`family/instance`) or bare family.
    pub service: String,
    pub path: String,
}

impl SubscriptionKey {
    pub fn new(service: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            path: path.into(),
        }
    }
}

/// Subscriber callback; runs synchronously inside the dispatch pass.
pub type Callback = Arc<dyn Fn(&NormalizedUpdate) + Send + Sync>;

/// Completion callback for [`SubscriptionRouter::publish_detached`].
pub type WriteCallback = Box<dyn FnOnce(Result<(), CallError>) + Send>;

#[derive(Default)]
struct Table {
    by_key: HashMap<SubscriptionKey, Vec<(SubscriptionId, Callback)>>,
    by_id: HashMap<SubscriptionId, SubscriptionKey>,
}

/// Write path of the current session.
#[derive(Clone)]
pub(crate) struct Link {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) registry: Arc<RwLock<ServiceRegistry>>,
}

/// Pub/sub registry plus write-back through the current session.
pub struct SubscriptionRouter {
    table: RwLock<Table>,
    next_id: AtomicU64,
    link: RwLock<Option<Link>>,
    call_retry: BackoffPolicy,
    call_attempts: u32,
    bus: Bus,
}

impl SubscriptionRouter {
    /// Creates a router; `call_attempts` bounds tries per read/write (min 1).
    pub fn new(bus: Bus, call_retry: BackoffPolicy, call_attempts: u32) -> Self {
        Self {
            table: RwLock::new(Table::default()),
            next_id: AtomicU64::new(1),
            link: RwLock::new(None),
            call_retry,
            call_attempts: call_attempts.max(1),
            bus,
        }
    }

    /// Registers `callback` for updates of `path` on `service`.
    pub fn subscribe<F>(&self, service: &str, path: &str, callback: F) -> SubscriptionId
    where
        F: Fn(&NormalizedUpdate) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let key = SubscriptionKey::new(service, path);
        let mut table = self.table.write();
        table
            .by_key
            .entry(key.clone())
            .or_default()
            .push((id, Arc::new(callback)));
        table.by_id.insert(id, key);
        id
    }

    /// Removes a subscription. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut table = self.table.write();
        let Some(key) = table.by_id.remove(&id) else {
            return false;
        };
        if let Some(entries) = table.by_key.get_mut(&key) {
            entries.retain(|(sid, _)| *sid != id);
            if entries.is_empty() {
                table.by_key.remove(&key);
            }
        }
        true
    }

    /// Number of live subscriptions.
    pub fn len(&self) -> usize {
        self.table.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `update` to every callback registered for its key.
    ///
    /// Returns the number of callbacks invoked.
    pub fn dispatch(&self, update: &NormalizedUpdate) -> usize {
        let key = SubscriptionKey::new(update.service_key(), update.path.as_str());
        let callbacks: Vec<Callback> = match self.table.read().by_key.get(&key) {
            Some(entries) => entries.iter().map(|(_, cb)| Arc::clone(cb)).collect(),
            None => return 0,
        };

        for cb in &callbacks {
            if catch_unwind(AssertUnwindSafe(|| cb(update))).is_err() {
                warn!(service = %key.service, path = %key.path, "subscriber callback panicked");
                self.bus.publish(
                    Event::new(StatusKind::PluginError)
                        .with_service(key.service.as_str())
                        .with_path(key.path.as_str())
                        .with_reason("subscriber callback panicked"),
                );
            }
        }
        callbacks.len()
    }

    pub(crate) fn attach(&self, link: Link) {
        *self.link.write() = Some(link);
    }

    pub(crate) fn detach(&self) {
        *self.link.write() = None;
    }

    /// Writes `value` to `path` on `service` (full name or `family/instance`).
    pub async fn publish(&self, service: &str, path: &str, value: &Value) -> Result<(), CallError> {
        let wire = WireValue::infer(path, value)?;
        self.call(service, |dest| MethodCall::set_value(dest, path, wire))
            .await
            .map(|_| ())
    }

    /// Reads the current value of `path` on `service` directly from the bus.
    pub async fn read(&self, service: &str, path: &str) -> Result<Value, CallError> {
        match self.call(service, |dest| MethodCall::get_value(dest, path)).await? {
            Body::Value(v) => Ok(v),
            other => Err(CallError::Failed {
                reason: format!("unexpected reply to value read: {other:?}"),
            }),
        }
    }

    /// Spawns a write and hands its outcome to `done`.
    ///
    /// Without a callback, failures are logged and reported as `PluginError`.
    pub fn publish_detached(
        self: &Arc<Self>,
        service: &str,
        path: &str,
        value: Value,
        done: Option<WriteCallback>,
    ) {
        let me = Arc::clone(self);
        let service = service.to_string();
        let path = path.to_string();
        tokio::spawn(async move {
            let res = me.publish(&service, &path, &value).await;
            match done {
                Some(cb) => cb(res),
                None => {
                    if let Err(e) = res {
                        warn!(%service, %path, error = %e, "detached write failed");
                        me.bus.publish(
                            Event::new(StatusKind::PluginError)
                                .with_service(service)
                                .with_path(path)
                                .with_reason(e.to_string()),
                        );
                    }
                }
            }
        });
    }

    async fn call<F>(&self, service: &str, build: F) -> Result<Body, CallError>
    where
        F: FnOnce(String) -> MethodCall,
    {
        let (transport, destination) = {
            let link = self.link.read();
            let link = link.as_ref().ok_or(CallError::NotConnected)?;
            let destination = resolve_destination(&link.registry.read(), service);
            (Arc::clone(&link.transport), destination)
        };
        invoke_with_retry(
            transport.as_ref(),
            build(destination),
            &self.call_retry,
            self.call_attempts,
        )
        .await
    }
}

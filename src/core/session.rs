//! # Session: one connected lifetime of the bridge.
//!
//! A [`Session`] owns everything that is only valid while a connection is up:
//! the service registry and the background reads issued on that connection.
//! It is the single place where the registry and cache are mutated.
//!
//! ```text
//! run(connection, token)
//!   ├─► add_match × 3
//!   ├─► list_names ─► namespace filter ─► get_owner ─► register (ServiceAdded)
//!   ├─► cache.clear(), router.attach(link), ProviderStatus("connected")
//!   ├─► bulk refresh (all services, concurrently)
//!   └─► loop select! {
//!         token.cancelled()  → Ok(())
//!         inbound message    → handle_message()
//!         inbound closed     → Err(Disconnected)
//!         background report  → handle_report()   (Lost → Err(Disconnected))
//!         poll tick          → bulk refresh (skipped while one is in flight)
//!       }
//!   └─► router.detach(), background jobs cancelled
//! ```
//!
//! ## Rules
//! - Background reads never touch shared state; they report back through a channel.
//! - A background read failing with a lost connection ends the session.
//! - Other background failures are logged at debug level and dropped.
//! - Large batches are applied in chunks, yielding in between so status
//!   consumers drain the bus before it wraps.
//! - When an owner's instance first becomes known, whatever was cached under
//!   its bare family moves to the instance key.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use futures::future::join_all;
use parking_lot::RwLock;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

use crate::{
    cache::StateCache,
    core::Config,
    error::{BridgeError, CallError},
    events::{Bus, Event, StatusKind},
    policies::BackoffPolicy,
    processor::{
        NormalizedUpdate, process_entries, process_items_changed, process_properties_changed,
    },
    registry::{
        OwnerChange, Service, ServiceRegistry, device_type, family_of, resolve_device_instance,
    },
    router::{Link, SubscriptionRouter},
    transport::{
        BUS_INTERFACE, Body, Connection, DEVICE_INSTANCE_PATH, ITEM_INTERFACE, MatchRule,
        Message, MethodCall, RawEntry, Transport, invoke_with_retry, member,
    },
};

/// Result of a background read, applied by the session loop.
#[derive(Debug)]
enum Report {
    /// Bulk read of one service (the full tree it currently exposes).
    Items { owner: String, entries: Vec<RawEntry> },
    /// Authoritative `/DeviceInstance` of one service.
    Instance { owner: String, instance: u32 },
    /// One metadata path of one service.
    Metadata { owner: String, path: String, value: Value },
    /// A sweep (bulk refresh of every service) finished.
    Swept,
    /// The connection went away under a background read.
    Lost(CallError),
}

/// Spawner for background reads bound to one connection.
#[derive(Clone)]
struct Jobs {
    transport: Arc<dyn Transport>,
    tx: mpsc::UnboundedSender<Report>,
    token: CancellationToken,
    retry: BackoffPolicy,
    attempts: u32,
}

impl Jobs {
    async fn call(&self, call: MethodCall) -> Result<Body, CallError> {
        invoke_with_retry(self.transport.as_ref(), call, &self.retry, self.attempts).await
    }

    /// Runs `job` in the background; its reports are dropped if the session ends first.
    fn spawn<F>(&self, job: F)
    where
        F: Future<Output = Vec<Report>> + Send + 'static,
    {
        let tx = self.tx.clone();
        let token = self.token.clone();
        tokio::spawn(async move {
            let reports = select! {
                reports = job => reports,
                _ = token.cancelled() => return,
            };
            for report in reports {
                if tx.send(report).is_err() {
                    break;
                }
            }
        });
    }

    /// Bulk-reads every `(owner, name)` target concurrently.
    ///
    /// A `sweep` refresh ends with [`Report::Swept`].
    fn refresh(&self, targets: Vec<(String, String)>, sweep: bool) {
        if targets.is_empty() && !sweep {
            return;
        }
        let me = self.clone();
        self.spawn(async move {
            let me = &me;
            let reads = targets.into_iter().map(|(owner, name)| async move {
                let res = me.call(MethodCall::get_items(name.as_str())).await;
                (owner, name, res)
            });
            let mut reports: Vec<Report> = join_all(reads)
                .await
                .into_iter()
                .filter_map(|(owner, name, res)| match res {
                    Ok(Body::Items(entries)) => Some(Report::Items { owner, entries }),
                    Ok(other) => {
                        debug!(service = %name, reply = ?other, "unexpected bulk read reply");
                        None
                    }
                    Err(e) => failed(e, "bulk read", &name),
                })
                .collect();
            if sweep {
                reports.push(Report::Swept);
            }
            reports
        });
    }

    fn query_instance(&self, owner: String, name: String) {
        let me = self.clone();
        self.spawn(async move {
            let res = me
                .call(MethodCall::get_value(name.as_str(), DEVICE_INSTANCE_PATH))
                .await;
            let report = match res {
                Ok(Body::Value(v)) => v
                    .as_u64()
                    .and_then(|i| u32::try_from(i).ok())
                    .map(|instance| Report::Instance { owner, instance }),
                Ok(_) => None,
                Err(e) => failed(e, "device instance query", &name),
            };
            report.into_iter().collect()
        });
    }

    fn query_metadata(&self, owner: String, name: String, paths: Vec<String>) {
        let me = self.clone();
        self.spawn(async move {
            let me = &me;
            let name = name.as_str();
            let reads = paths.into_iter().map(|path| async move {
                let res = me.call(MethodCall::get_value(name, path.as_str())).await;
                (path, res)
            });
            join_all(reads)
                .await
                .into_iter()
                .filter_map(|(path, res)| match res {
                    Ok(Body::Value(value)) => Some(Report::Metadata {
                        owner: owner.clone(),
                        path,
                        value,
                    }),
                    Ok(_) => None,
                    Err(e) => failed(e, "metadata query", name),
                })
                .collect()
        });
    }
}

/// Classifies a background failure: a lost connection is reported, anything else logged.
fn failed(e: CallError, what: &'static str, service: &str) -> Option<Report> {
    if e.is_connection_lost() {
        Some(Report::Lost(e))
    } else {
        debug!(%service, error = %e, what, "background read failed");
        None
    }
}

/// State bound to one connection.
pub(crate) struct Session {
    cfg: Arc<Config>,
    bus: Bus,
    cache: Arc<StateCache>,
    router: Arc<SubscriptionRouter>,
    registry: Arc<RwLock<ServiceRegistry>>,
    ready_at: OnceLock<Instant>,
    sweeping: AtomicBool,
}

impl Session {
    pub(crate) fn new(
        cfg: Arc<Config>,
        bus: Bus,
        cache: Arc<StateCache>,
        router: Arc<SubscriptionRouter>,
    ) -> Self {
        let registry = Arc::new(RwLock::new(ServiceRegistry::new(cfg.namespace.as_str())));
        Self {
            cfg,
            bus,
            cache,
            router,
            registry,
            ready_at: OnceLock::new(),
            sweeping: AtomicBool::new(false),
        }
    }

    /// True once bootstrap completed on this session.
    #[cfg(test)]
    pub(crate) fn is_ready(&self) -> bool {
        self.ready_at.get().is_some()
    }

    /// Time since bootstrap completed, `None` if it never did.
    pub(crate) fn uptime(&self) -> Option<Duration> {
        self.ready_at.get().map(Instant::elapsed)
    }

    /// Drives the session until the connection is lost or `token` is cancelled.
    ///
    /// Returns `Ok(())` only on cancellation.
    pub(crate) async fn run(
        &self,
        conn: Connection,
        token: CancellationToken,
    ) -> Result<(), BridgeError> {
        let Connection {
            transport,
            mut inbound,
        } = conn;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let jobs = Jobs {
            transport: Arc::clone(&transport),
            tx,
            token: token.child_token(),
            retry: self.cfg.call_retry,
            attempts: self.cfg.call_attempts_clamped(),
        };
        let _jobs_guard = jobs.token.clone().drop_guard();

        let res = self.serve(&transport, &jobs, &mut inbound, &mut rx, &token).await;
        self.router.detach();
        res
    }

    async fn serve(
        &self,
        transport: &Arc<dyn Transport>,
        jobs: &Jobs,
        inbound: &mut mpsc::Receiver<Message>,
        reports: &mut mpsc::UnboundedReceiver<Report>,
        token: &CancellationToken,
    ) -> Result<(), BridgeError> {
        select! {
            res = self.bootstrap(transport, jobs) => res?,
            _ = token.cancelled() => return Ok(()),
        }

        let mut poll = self.cfg.sync.poll_interval().map(|every| {
            let mut iv = time::interval_at(Instant::now() + every, every);
            iv.set_missed_tick_behavior(MissedTickBehavior::Skip);
            iv
        });

        loop {
            select! {
                _ = token.cancelled() => return Ok(()),
                msg = inbound.recv() => match msg {
                    Some(msg) => self.handle_message(jobs, msg).await,
                    None => {
                        return Err(BridgeError::Disconnected {
                            reason: "inbound stream closed".to_string(),
                        });
                    }
                },
                Some(report) = reports.recv() => match report {
                    Report::Lost(e) => {
                        return Err(BridgeError::Disconnected { reason: e.to_string() });
                    }
                    other => self.handle_report(jobs, other).await,
                },
                _ = tick(&mut poll) => self.sweep(jobs),
            }
        }
    }

    async fn bootstrap(
        &self,
        transport: &Arc<dyn Transport>,
        jobs: &Jobs,
    ) -> Result<(), BridgeError> {
        for rule in MatchRule::defaults() {
            transport
                .add_match(rule)
                .await
                .map_err(|source| BridgeError::Bootstrap {
                    stage: "add_match",
                    source,
                })?;
        }

        let names = transport
            .list_names()
            .await
            .map_err(|source| BridgeError::Bootstrap {
                stage: "list_names",
                source,
            })?;

        self.cache.clear();
        self.registry.write().clear();

        for name in names {
            if !self.registry.read().in_namespace(&name) {
                continue;
            }
            match transport.get_owner(&name).await {
                Ok(owner) => self.register(jobs, &owner, &name),
                Err(e) if e.is_connection_lost() => {
                    return Err(BridgeError::Bootstrap {
                        stage: "get_owner",
                        source: e,
                    });
                }
                Err(e) => debug!(service = %name, error = %e, "owner lookup failed; skipping"),
            }
        }

        self.router.attach(Link {
            transport: Arc::clone(transport),
            registry: Arc::clone(&self.registry),
        });
        let _ = self.ready_at.set(Instant::now());

        let services = self.registry.read().len();
        info!(services, "bus session ready");
        self.bus.publish(Event::provider_status("connected"));

        self.sweep(jobs);
        Ok(())
    }

    /// Bulk-refreshes every registered service unless a sweep is still running.
    fn sweep(&self, jobs: &Jobs) {
        if self.sweeping.swap(true, Ordering::AcqRel) {
            debug!("previous refresh still running; skipping tick");
            return;
        }
        jobs.refresh(self.targets(), true);
    }

    fn register(&self, jobs: &Jobs, owner: &str, name: &str) {
        let svc = self.registry.write().insert(owner, name).clone();
        self.service_added(jobs, svc);
    }

    fn service_added(&self, jobs: &Jobs, svc: Service) {
        debug!(service = %svc.name, owner = %svc.owner, "service added");
        self.bus.publish(
            Event::new(StatusKind::ServiceAdded)
                .with_service(svc.name.as_str())
                .with_owner(svc.owner.as_str()),
        );
        jobs.query_instance(svc.owner, svc.name);
    }

    /// `(owner, name)` of every registered service.
    fn targets(&self) -> Vec<(String, String)> {
        self.registry
            .read()
            .iter()
            .map(|s| (s.owner.clone(), s.name.clone()))
            .collect()
    }

    async fn handle_message(&self, jobs: &Jobs, msg: Message) {
        let updates = match (msg.interface.as_str(), msg.member.as_str()) {
            (BUS_INTERFACE, member::NAME_OWNER_CHANGED) => {
                if let Body::NameOwnerChanged {
                    name,
                    old_owner,
                    new_owner,
                } = &msg.body
                {
                    self.owner_changed(jobs, name, old_owner, new_owner);
                }
                return;
            }
            (ITEM_INTERFACE, member::ITEMS_CHANGED) => {
                let before = self.instance_of(&msg.sender);
                let updates =
                    process_items_changed(&msg, &mut self.registry.write(), resolve_device_instance);
                self.settle_instance(&msg.sender, before);
                updates
            }
            (ITEM_INTERFACE, member::PROPERTIES_CHANGED) => {
                let before = self.instance_of(&msg.sender);
                let updates = process_properties_changed(
                    &msg,
                    &mut self.registry.write(),
                    resolve_device_instance,
                );
                self.settle_instance(&msg.sender, before);
                updates
            }
            (interface, member) => {
                trace!(%interface, %member, "ignoring message");
                return;
            }
        };
        self.apply(jobs, &msg.sender, updates).await;
    }

    fn owner_changed(&self, jobs: &Jobs, name: &str, old_owner: &str, new_owner: &str) {
        let change = self
            .registry
            .write()
            .apply_owner_change(name, old_owner, new_owner);

        match change {
            OwnerChange::Added(svc) => {
                let target = vec![(svc.owner.clone(), svc.name.clone())];
                self.service_added(jobs, svc);
                jobs.refresh(target, false);
            }
            OwnerChange::Removed(svc) => {
                info!(service = %svc.name, owner = %svc.owner, "service removed");
                for key in [svc.name.clone(), svc.short_key()] {
                    self.bus.publish(
                        Event::new(StatusKind::ServiceRemoved)
                            .with_service(key)
                            .with_owner(svc.owner.as_str())
                            .with_device_instance(svc.device_instance),
                    );
                }
            }
            OwnerChange::Migrated(svc) => {
                info!(service = %svc.name, %old_owner, %new_owner, "service changed owner");
                self.bus.publish(
                    Event::new(StatusKind::ServiceMigrated)
                        .with_service(svc.name.as_str())
                        .with_owner(new_owner)
                        .with_device_instance(svc.device_instance)
                        .with_reason(format!("previous owner {old_owner}")),
                );
            }
            OwnerChange::Ignored => {}
        }
    }

    async fn handle_report(&self, jobs: &Jobs, report: Report) {
        match report {
            Report::Items { owner, entries } => {
                let before = self.instance_of(&owner);
                let updates = process_entries(
                    &owner,
                    &entries,
                    &mut self.registry.write(),
                    resolve_device_instance,
                );
                self.settle_instance(&owner, before);
                self.apply(jobs, &owner, updates).await;

                let Some(key) = self.registry.read().get(&owner).map(Service::service_key) else {
                    return;
                };
                let present: HashSet<String> =
                    entries.iter().filter_map(|e| e.path.clone()).collect();
                self.cache.retain_paths(&key, &present);
            }
            Report::Instance { owner, instance } => {
                let before = self.instance_of(&owner);
                if let Some(svc) = self.registry.write().get_mut(&owner) {
                    svc.device_instance = Some(instance);
                }
                self.settle_instance(&owner, before);
            }
            Report::Metadata { owner, path, value } => {
                if let Some(svc) = self.registry.write().get_mut(&owner) {
                    svc.aux_metadata.insert(path.clone(), value.clone());
                }
                let entry = RawEntry::new(path.as_str(), value, None);
                let before = self.instance_of(&owner);
                let updates = process_entries(
                    &owner,
                    std::slice::from_ref(&entry),
                    &mut self.registry.write(),
                    resolve_device_instance,
                );
                self.settle_instance(&owner, before);
                self.apply(jobs, &owner, updates).await;
            }
            Report::Swept => self.sweeping.store(false, Ordering::Release),
            Report::Lost(_) => {}
        }
    }

    fn instance_of(&self, owner: &str) -> Option<u32> {
        self.registry.read().get(owner).and_then(|s| s.device_instance)
    }

    /// Moves the bare-family cache entry to the instance key if `owner` just resolved.
    ///
    /// Left alone while another service of the same family is still unresolved,
    /// since the bare key is shared with it.
    fn settle_instance(&self, owner: &str, before: Option<u32>) {
        if before.is_some() {
            return;
        }
        let (family, key, instance) = {
            let registry = self.registry.read();
            let Some(svc) = registry.get(owner) else {
                return;
            };
            let Some(instance) = svc.device_instance else {
                return;
            };
            let family = svc.family();
            let shared = registry.iter().any(|s| {
                s.owner != owner && s.device_instance.is_none() && family_of(&s.name) == family
            });
            if shared {
                return;
            }
            (family.to_string(), svc.service_key(), instance)
        };
        let moved = self.cache.adopt(&family, &key, Some(instance));
        if !moved.is_empty() {
            debug!(from = %family, to = %key, paths = moved.len(), "moved early values to instance key");
        }
    }

    /// Cache merge then fan-out. The registry lock is never held here.
    ///
    /// Yields every `chunk` updates so the status listener can keep up.
    async fn apply(&self, jobs: &Jobs, owner: &str, updates: Vec<NormalizedUpdate>) {
        let chunk = apply_chunk(self.cfg.bus_capacity_clamped());
        for (i, update) in updates.iter().enumerate() {
            if i > 0 && i % chunk == 0 {
                tokio::task::yield_now().await;
            }
            let outcome = self.cache.merge(update);
            if outcome.service_added {
                self.first_sighting(jobs, owner);
            }
            self.router.dispatch(update);
        }
    }

    fn first_sighting(&self, jobs: &Jobs, owner: &str) {
        let Some(name) = self.registry.read().get(owner).map(|s| s.name.clone()) else {
            return;
        };
        let paths = self.cfg.metadata_paths(device_type(&name));
        if !paths.is_empty() {
            jobs.query_metadata(owner.to_string(), name, paths.to_vec());
        }
    }
}

/// Updates applied between yields: half the status bus, at most 256.
fn apply_chunk(bus_capacity: usize) -> usize {
    (bus_capacity / 2).clamp(1, 256)
}

/// Waits for the next poll tick, forever if polling is off.
async fn tick(poll: &mut Option<Interval>) {
    match poll {
        Some(iv) => {
            iv.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policies::SyncMode;
    use crate::transport::Connector;
    use crate::transport::memory::{MemoryBus, MemoryConnector};
    use serde_json::json;
    use std::time::Duration;
    use tokio::task::JoinHandle;

    const BATTERY: &str = "com.victronenergy.battery.ttyUSB3";

    struct Harness {
        bus: Arc<MemoryBus>,
        events: Bus,
        cache: Arc<StateCache>,
        router: Arc<SubscriptionRouter>,
        session: Arc<Session>,
        token: CancellationToken,
    }

    impl Harness {
        fn new(cfg: Config) -> Self {
            let events = Bus::new(256);
            let cache = Arc::new(StateCache::new(events.clone()));
            let router = Arc::new(SubscriptionRouter::new(
                events.clone(),
                cfg.call_retry,
                cfg.call_attempts,
            ));
            let session = Arc::new(Session::new(
                Arc::new(cfg),
                events.clone(),
                Arc::clone(&cache),
                Arc::clone(&router),
            ));
            let bus = MemoryBus::new();
            bus.add_service(
                BATTERY,
                ":1.5",
                &[("/DeviceInstance", json!(3)), ("/Soc", json!(80)), ("/Dc/0/Voltage", json!(52.1))],
            );
            bus.add_foreign_name("org.bluez");
            Self {
                bus,
                events,
                cache,
                router,
                session,
                token: CancellationToken::new(),
            }
        }

        async fn start(&self) -> JoinHandle<Result<(), BridgeError>> {
            let conn = MemoryConnector {
                bus: Arc::clone(&self.bus),
            }
            .connect()
            .await
            .expect("connect");
            let session = Arc::clone(&self.session);
            let token = self.token.clone();
            tokio::spawn(async move { session.run(conn, token).await })
        }
    }

    async fn eventually<F: Fn() -> bool>(check: F) {
        for _ in 0..400 {
            if check() {
                return;
            }
            time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_bootstrap_fills_cache_under_instance_key() {
        let h = Harness::new(Config::default());
        let _run = h.start().await;

        eventually(|| h.cache.get("com.victronenergy.battery/3", "/Soc") == Some(json!(80))).await;
        assert!(h.session.is_ready());
        assert_eq!(h.bus.matches().len(), 3);
        assert_eq!(h.session.registry.read().len(), 1);
        h.token.cancel();
    }

    #[tokio::test]
    async fn test_signal_reaches_subscriber() {
        let h = Harness::new(Config::default());
        let _run = h.start().await;
        eventually(|| h.cache.get("com.victronenergy.battery/3", "/Soc").is_some()).await;

        let (tx, mut rx) = mpsc::unbounded_channel();
        h.router.subscribe("com.victronenergy.battery/3", "/Soc", move |u| {
            let _ = tx.send(u.value.clone());
        });
        h.bus
            .emit_items_changed(":1.5", vec![RawEntry::new("/Soc", json!(79), Some("79%"))])
            .await;

        assert_eq!(rx.recv().await, Some(json!(79)));
        assert_eq!(h.cache.get("com.victronenergy.battery/3", "/Soc"), Some(json!(79)));
        h.token.cancel();
    }

    #[tokio::test]
    async fn test_removal_emits_full_name_and_short_key() {
        let h = Harness::new(Config::default());
        let _run = h.start().await;
        eventually(|| h.cache.get("com.victronenergy.battery/3", "/Soc").is_some()).await;
        eventually(|| {
            h.session
                .registry
                .read()
                .get(":1.5")
                .is_some_and(|s| s.device_instance == Some(3))
        })
        .await;

        let mut events = h.events.subscribe();
        h.bus.emit_name_owner_changed(BATTERY, ":1.5", "").await;

        let mut removed = Vec::new();
        while removed.len() < 2 {
            let ev = events.recv().await.expect("event");
            if ev.kind == StatusKind::ServiceRemoved {
                removed.push(ev.service.as_deref().map(str::to_string));
            }
        }
        assert_eq!(
            removed,
            vec![Some(BATTERY.to_string()), Some("battery/3".to_string())]
        );
        h.token.cancel();
    }

    #[tokio::test]
    async fn test_new_owner_is_registered_and_read() {
        let h = Harness::new(Config::default());
        let _run = h.start().await;
        eventually(|| h.session.is_ready()).await;

        h.bus.add_service(
            "com.victronenergy.tank.ttyUSB1",
            ":1.9",
            &[("/DeviceInstance", json!(20)), ("/Level", json!(55))],
        );
        h.bus
            .emit_name_owner_changed("com.victronenergy.tank.ttyUSB1", "", ":1.9")
            .await;

        eventually(|| h.cache.get("com.victronenergy.tank/20", "/Level") == Some(json!(55))).await;
        h.token.cancel();
    }

    #[tokio::test]
    async fn test_switch_metadata_is_attached() {
        let h = Harness::new(Config::default());
        h.bus.add_service(
            "com.victronenergy.switch.ttyUSB0",
            ":1.8",
            &[
                ("/DeviceInstance", json!(1)),
                ("/ProductName", json!("Smart Switch")),
                ("/SwitchableOutput/output_1/State", json!(0)),
            ],
        );
        let _run = h.start().await;

        eventually(|| {
            h.session
                .registry
                .read()
                .get(":1.8")
                .is_some_and(|s| s.aux_metadata.contains_key("/ProductName"))
        })
        .await;
        h.token.cancel();
    }

    #[tokio::test]
    async fn test_disconnect_ends_session_and_detaches_writes() {
        let h = Harness::new(Config::default());
        let run = h.start().await;
        eventually(|| h.session.is_ready()).await;

        h.bus.disconnect();
        let res = run.await.expect("join");
        assert!(matches!(res, Err(BridgeError::Disconnected { .. })));

        let write = h.router.publish("com.victronenergy.battery/3", "/Soc", &json!(1)).await;
        assert_eq!(write, Err(CallError::NotConnected));
    }

    #[tokio::test]
    async fn test_cancel_is_clean_shutdown() {
        let h = Harness::new(Config::default());
        let run = h.start().await;
        eventually(|| h.session.is_ready()).await;

        h.token.cancel();
        assert!(run.await.expect("join").is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_prunes_vanished_paths() {
        let cfg = Config {
            sync: SyncMode::Poll {
                interval: Duration::from_secs(1),
            },
            ..Config::default()
        };
        let h = Harness::new(cfg);
        let _run = h.start().await;
        eventually(|| h.cache.get("com.victronenergy.battery/3", "/Dc/0/Voltage").is_some()).await;

        let mut events = h.events.subscribe();
        h.bus.remove_item(BATTERY, "/Dc/0/Voltage");

        loop {
            let ev = events.recv().await.expect("event");
            if ev.kind == StatusKind::PathRemoved {
                assert_eq!(ev.path.as_deref(), Some("/Dc/0/Voltage"));
                break;
            }
        }
        assert!(h.cache.get("com.victronenergy.battery/3", "/Dc/0/Voltage").is_none());
        assert!(h.cache.get("com.victronenergy.battery/3", "/Soc").is_some());
        h.token.cancel();
    }

    #[tokio::test]
    async fn test_early_values_move_to_instance_key() {
        let h = Harness::new(Config::default());
        h.bus.add_service(
            BATTERY,
            ":1.5",
            &[("/Soc", json!(80)), ("/Dc/0/Voltage", json!(52.1))],
        );
        let _run = h.start().await;
        eventually(|| h.cache.get("com.victronenergy.battery", "/Soc") == Some(json!(80))).await;

        let mut events = h.events.subscribe();
        h.bus
            .emit_items_changed(
                ":1.5",
                vec![
                    RawEntry::new("/DeviceInstance", json!(3), None),
                    RawEntry::new("/Soc", json!(70), None),
                ],
            )
            .await;

        eventually(|| h.cache.get("com.victronenergy.battery/3", "/Soc") == Some(json!(70))).await;
        assert_eq!(h.cache.keys(), vec!["com.victronenergy.battery/3".to_string()]);
        assert_eq!(
            h.cache.get("com.victronenergy.battery/3", "/Dc/0/Voltage"),
            Some(json!(52.1))
        );

        let mut removed = Vec::new();
        while let Ok(ev) = events.try_recv() {
            if ev.kind == StatusKind::PathRemoved {
                assert_eq!(ev.service.as_deref(), Some("com.victronenergy.battery"));
                removed.push(ev.path.as_deref().unwrap_or_default().to_string());
            }
        }
        assert_eq!(removed, vec!["/Dc/0/Voltage".to_string(), "/Soc".to_string()]);
        h.token.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_skips_ticks_while_refresh_runs() {
        let cfg = Config {
            sync: SyncMode::Poll {
                interval: Duration::from_secs(1),
            },
            ..Config::default()
        };
        let h = Harness::new(cfg);
        h.bus.slow_bulk_reads(Duration::from_secs(5));
        let _run = h.start().await;

        time::sleep(Duration::from_millis(12_500)).await;

        let reads = h.bus.bulk_reads();
        assert!((2..=3).contains(&reads), "bulk reads issued: {reads}");
        assert_eq!(h.cache.get("com.victronenergy.battery/3", "/Soc"), Some(json!(80)));
        h.token.cancel();
    }
}

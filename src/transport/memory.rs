//! In-memory bus used by the crate's tests.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;

use super::{
    BUS_INTERFACE, Body, Connection, Connector, ITEM_INTERFACE, MatchRule, Message, MethodCall,
    RawEntry, Transport, member,
};
use crate::error::{BridgeError, CallError};

struct MemService {
    owner: String,
    items: BTreeMap<String, Value>,
}

#[derive(Default)]
struct State {
    services: BTreeMap<String, MemService>,
    extra_names: Vec<String>,
    matches: Vec<MatchRule>,
    calls: Vec<MethodCall>,
    unavailable: u32,
    refuse_connects: u32,
    connects: u32,
    bulk_delay: Option<Duration>,
    bulk_reads: u32,
    inbound: Option<mpsc::Sender<Message>>,
}

/// Fake bus daemon plus services.
#[derive(Default)]
pub(crate) struct MemoryBus {
    state: Mutex<State>,
}

impl MemoryBus {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn add_service(&self, name: &str, owner: &str, items: &[(&str, Value)]) {
        let items = items
            .iter()
            .map(|(p, v)| (p.to_string(), v.clone()))
            .collect();
        self.state.lock().services.insert(
            name.to_string(),
            MemService {
                owner: owner.to_string(),
                items,
            },
        );
    }

    pub(crate) fn remove_item(&self, name: &str, path: &str) {
        if let Some(svc) = self.state.lock().services.get_mut(name) {
            svc.items.remove(path);
        }
    }

    pub(crate) fn add_foreign_name(&self, name: &str) {
        self.state.lock().extra_names.push(name.to_string());
    }

    pub(crate) fn fail_next_calls_unavailable(&self, n: u32) {
        self.state.lock().unavailable = n;
    }

    pub(crate) fn refuse_next_connects(&self, n: u32) {
        self.state.lock().refuse_connects = n;
    }

    /// Makes every bulk read take `delay` before answering.
    pub(crate) fn slow_bulk_reads(&self, delay: Duration) {
        self.state.lock().bulk_delay = Some(delay);
    }

    pub(crate) fn bulk_reads(&self) -> u32 {
        self.state.lock().bulk_reads
    }

    pub(crate) fn connects(&self) -> u32 {
        self.state.lock().connects
    }

    pub(crate) fn matches(&self) -> Vec<MatchRule> {
        self.state.lock().matches.clone()
    }

    pub(crate) fn writes(&self) -> Vec<MethodCall> {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.member == member::SET_VALUE)
            .cloned()
            .collect()
    }

    /// Drops the inbound sender, which the session observes as a disconnect.
    pub(crate) fn disconnect(&self) {
        self.state.lock().inbound = None;
    }

    pub(crate) async fn emit(&self, msg: Message) {
        let tx = self.state.lock().inbound.clone();
        if let Some(tx) = tx {
            let _ = tx.send(msg).await;
        }
    }

    pub(crate) async fn emit_items_changed(&self, owner: &str, entries: Vec<RawEntry>) {
        self.emit(Message {
            sender: owner.to_string(),
            interface: ITEM_INTERFACE.to_string(),
            member: member::ITEMS_CHANGED.to_string(),
            path: "/".to_string(),
            body: Body::Items(entries),
        })
        .await;
    }

    pub(crate) async fn emit_name_owner_changed(&self, name: &str, old: &str, new: &str) {
        self.emit(Message {
            sender: "org.freedesktop.DBus".to_string(),
            interface: BUS_INTERFACE.to_string(),
            member: member::NAME_OWNER_CHANGED.to_string(),
            path: "/org/freedesktop/DBus".to_string(),
            body: Body::NameOwnerChanged {
                name: name.to_string(),
                old_owner: old.to_string(),
                new_owner: new.to_string(),
            },
        })
        .await;
    }
}

#[async_trait]
impl Transport for MemoryBus {
    async fn invoke(&self, call: MethodCall) -> Result<Body, CallError> {
        let delay = {
            let mut state = self.state.lock();
            if call.member == member::GET_ITEMS {
                state.bulk_reads += 1;
                state.bulk_delay
            } else {
                None
            }
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if state.inbound.is_none() {
            return Err(CallError::Disconnected);
        }
        state.calls.push(call.clone());
        if state.unavailable > 0 && call.member != member::GET_ITEMS {
            state.unavailable -= 1;
            return Err(CallError::ServiceUnavailable {
                destination: call.destination,
            });
        }
        let Some(svc) = state.services.get_mut(&call.destination) else {
            return Err(CallError::UnknownDestination {
                destination: call.destination,
            });
        };
        match call.member {
            member::GET_ITEMS => Ok(Body::Items(
                svc.items
                    .iter()
                    .map(|(p, v)| RawEntry::new(p.as_str(), v.clone(), None))
                    .collect(),
            )),
            member::GET_VALUE => svc
                .items
                .get(&call.path)
                .cloned()
                .map(Body::Value)
                .ok_or_else(|| CallError::Failed {
                    reason: format!("no such path {}", call.path),
                }),
            member::SET_VALUE => {
                if let Some(arg) = call.arg {
                    svc.items.insert(call.path, arg.value);
                }
                Ok(Body::Empty)
            }
            other => Err(CallError::Failed {
                reason: format!("unsupported member {other}"),
            }),
        }
    }

    async fn list_names(&self) -> Result<Vec<String>, CallError> {
        let state = self.state.lock();
        if state.inbound.is_none() {
            return Err(CallError::Disconnected);
        }
        let mut names: Vec<String> = state.services.keys().cloned().collect();
        names.extend(state.extra_names.iter().cloned());
        Ok(names)
    }

    async fn get_owner(&self, name: &str) -> Result<String, CallError> {
        self.state
            .lock()
            .services
            .get(name)
            .map(|s| s.owner.clone())
            .ok_or_else(|| CallError::UnknownDestination {
                destination: name.to_string(),
            })
    }

    async fn add_match(&self, rule: MatchRule) -> Result<(), CallError> {
        self.state.lock().matches.push(rule);
        Ok(())
    }
}

/// Connector handing out sessions on a shared [`MemoryBus`].
#[derive(Clone)]
pub(crate) struct MemoryConnector {
    pub(crate) bus: Arc<MemoryBus>,
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self) -> Result<Connection, BridgeError> {
        let mut state = self.bus.state.lock();
        state.connects += 1;
        if state.refuse_connects > 0 {
            state.refuse_connects -= 1;
            return Err(BridgeError::Connect {
                reason: "connection refused".to_string(),
            });
        }
        let (tx, rx) = mpsc::channel(256);
        state.inbound = Some(tx);
        state.matches.clear();
        drop(state);
        Ok(Connection {
            transport: self.bus.clone(),
            inbound: rx,
        })
    }
}

//! # Transport boundary.
//!
//! The bridge does not speak the bus protocol itself. A [`Connector`] produces
//! a [`Connection`]: a [`Transport`] for outbound calls plus a channel of
//! inbound [`Message`]s. The inbound channel closing is how a session learns
//! that the connection is gone.
//!
//! ```text
//! Connector::connect() ──► Connection { transport, inbound }
//!                                 │            │
//!                 invoke/list/owner/add_match  └─► Session loop (signals)
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{BridgeError, CallError};
use crate::policies::BackoffPolicy;

#[cfg(test)]
pub(crate) mod memory;
mod wire;

pub use wire::{
    BUS_INTERFACE, Body, DEVICE_INSTANCE_PATH, ITEM_INTERFACE, MatchRule, Message, MethodCall,
    RawEntry, TEXT_FIELD, VALUE_FIELD, WireType, WireValue, member,
};

/// Outbound half of a bus connection.
///
/// Implementations report a lost connection as [`CallError::Disconnected`]
/// and a missing owner as [`CallError::UnknownDestination`].
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Sends a method call and waits for its reply.
    async fn invoke(&self, call: MethodCall) -> Result<Body, CallError>;

    /// Lists every name currently present on the bus.
    async fn list_names(&self) -> Result<Vec<String>, CallError>;

    /// Returns the transient owner id of `name`.
    async fn get_owner(&self, name: &str) -> Result<String, CallError>;

    /// Installs a signal filter.
    async fn add_match(&self, rule: MatchRule) -> Result<(), CallError>;
}

/// An established bus session.
pub struct Connection {
    pub transport: Arc<dyn Transport>,
    pub inbound: mpsc::Receiver<Message>,
}

/// Opens bus sessions; called once per (re)connect attempt.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self) -> Result<Connection, BridgeError>;
}

/// Invokes `call`, retrying [`CallError::is_retryable`] failures.
///
/// At most `attempts` tries (min 1); the n-th retry waits `policy.next(n)`.
pub async fn invoke_with_retry(
    transport: &dyn Transport,
    call: MethodCall,
    policy: &BackoffPolicy,
    attempts: u32,
) -> Result<Body, CallError> {
    let attempts = attempts.max(1);
    let mut failures = 0u32;
    loop {
        match transport.invoke(call.clone()).await {
            Err(e) if e.is_retryable() && failures + 1 < attempts => {
                let delay = policy.next(failures);
                debug!(destination = %call.destination, error = %e, ?delay, "retrying call");
                tokio::time::sleep(delay).await;
                failures += 1;
            }
            other => return other,
        }
    }
}

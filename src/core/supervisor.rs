//! # Supervisor: keeps a bus session alive.
//!
//! Reconnects forever with capped exponential backoff. The only way out of
//! [`Supervisor::run`] is cancellation of the runtime token.
//!
//! ```text
//! loop {
//!   ├─► ProviderStatus("connecting")
//!   ├─► connector.connect()
//!   │     └─► Err → failure
//!   ├─► Session::run(connection, child token)
//!   │     ├─► Ok   → cancelled, break
//!   │     └─► Err  → failure (counter reset first if the session was stable)
//!   └─► failure:
//!         ├─► ProviderError { reason, delay, attempt }
//!         └─► sleep(reconnect.next(failures)) or cancelled → break
//! }
//! ```
//!
//! ## Rules
//! - Attempts are sequential; at most one session exists at a time.
//! - The delay sequence is non-decreasing and never exceeds `reconnect.max`.
//! - The failure counter resets only after a session that stayed up for at
//!   least `reconnect.max`; a session that bootstraps and drops right away
//!   counts as another failure.
//! - Subscriptions and the cache outlive sessions; the registry does not.

use std::sync::Arc;
use std::time::Duration;

use tokio::{select, time};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    cache::StateCache,
    core::Config,
    error::BridgeError,
    events::{Bus, Event, StatusKind},
    router::SubscriptionRouter,
    transport::Connector,
};

use super::session::Session;

/// Reconnect loop around [`Session`].
pub(crate) struct Supervisor {
    cfg: Arc<Config>,
    bus: Bus,
    cache: Arc<StateCache>,
    router: Arc<SubscriptionRouter>,
}

impl Supervisor {
    pub(crate) fn new(
        cfg: Arc<Config>,
        bus: Bus,
        cache: Arc<StateCache>,
        router: Arc<SubscriptionRouter>,
    ) -> Self {
        Self {
            cfg,
            bus,
            cache,
            router,
        }
    }

    /// Runs one session to completion, without retry.
    ///
    /// Also returns how long the session stayed up after bootstrap.
    pub(crate) async fn run_once(
        &self,
        connector: &dyn Connector,
        token: &CancellationToken,
    ) -> (Result<(), BridgeError>, Option<Duration>) {
        self.bus.publish(Event::provider_status("connecting"));
        let conn = select! {
            res = connector.connect() => match res {
                Ok(conn) => conn,
                Err(e) => return (Err(e), None),
            },
            _ = token.cancelled() => return (Ok(()), None),
        };

        let session = Session::new(
            Arc::clone(&self.cfg),
            self.bus.clone(),
            Arc::clone(&self.cache),
            Arc::clone(&self.router),
        );
        let res = session.run(conn, token.child_token()).await;
        (res, session.uptime())
    }

    /// Supervises sessions until `token` is cancelled.
    pub(crate) async fn run(&self, connector: &dyn Connector, token: CancellationToken) {
        let mut failures: u32 = 0;

        loop {
            if token.is_cancelled() {
                break;
            }

            let (res, uptime) = self.run_once(connector, &token).await;
            let err = match res {
                Ok(()) => break,
                Err(e) => e,
            };

            if let Some(uptime) = uptime {
                self.bus.publish(Event::provider_status("disconnected"));
                if uptime >= self.cfg.reconnect.max {
                    failures = 0;
                }
            }
            let delay = self.cfg.reconnect.next(failures);
            failures = failures.saturating_add(1);

            warn!(error = %err, kind = err.as_label(), ?delay, attempt = failures, "bus session failed; reconnecting");
            self.bus.publish(
                Event::new(StatusKind::ProviderError)
                    .with_reason(err.to_string())
                    .with_delay(delay)
                    .with_attempt(failures),
            );

            select! {
                _ = time::sleep(delay) => {}
                _ = token.cancelled() => break,
            }
        }

        self.router.detach();
        info!("bus supervisor stopped");
    }
}

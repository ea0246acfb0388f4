//! # LogWriter: status events as `tracing` records
//!
//! Lifecycle and structure changes go out at `info`, path churn at `debug`,
//! failures at `warn`.
//!
//! ## Example output (fmt layer)
//! ```text
//! INFO  status: provider reason="connecting"
//! WARN  status: provider error reason="bus refused" delay_ms=2000 attempt=2
//! INFO  status: service added service="com.victronenergy.battery.ttyUSB3" owner=":1.5"
//! DEBUG status: path added service="com.victronenergy.battery/3" path="/Soc"
//! INFO  status: service removed service="battery/3" owner=":1.5"
//! ```

use async_trait::async_trait;
use tracing::{debug, info, warn};

use crate::events::{Event, StatusKind};
use crate::subscribers::Subscribe;

/// Subscriber rendering every status event through `tracing` (target `status`).
#[derive(Default)]
pub struct LogWriter;

impl LogWriter {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let service = e.service.as_deref().unwrap_or("-");
        let path = e.path.as_deref().unwrap_or("-");
        let owner = e.owner.as_deref().unwrap_or("-");
        let reason = e.reason.as_deref().unwrap_or("-");

        match e.kind {
            StatusKind::ServiceAdded => {
                info!(target: "status", service, owner, "service added");
            }
            StatusKind::ServiceRemoved => {
                info!(target: "status", service, owner, instance = ?e.device_instance, "service removed");
            }
            StatusKind::ServiceMigrated => {
                info!(target: "status", service, owner, reason, "service migrated");
            }
            StatusKind::PathAdded => {
                debug!(target: "status", service, path, "path added");
            }
            StatusKind::PathRemoved => {
                debug!(target: "status", service, path, "path removed");
            }
            StatusKind::ProviderStatus => {
                info!(target: "status", reason, "provider");
            }
            StatusKind::ProviderError => {
                warn!(target: "status", reason, delay_ms = ?e.delay_ms, attempt = ?e.attempt, "provider error");
            }
            StatusKind::PluginError => {
                warn!(target: "status", service, path, reason, "plugin error");
            }
        }
    }

    fn name(&self) -> &'static str {
        "LogWriter"
    }
}

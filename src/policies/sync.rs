//! # Resync strategy for a bus session.
//!
//! [`SyncMode`] decides how a session keeps its cache fresh after bootstrap.
//!
//! **Polling** (bounded staleness even if a signal is lost):
//! ```text
//! SyncMode::Poll { interval }  → bulk read of every service, then every `interval`
//! ```
//!
//! **Signal-only** (lower bus load, relies on change signals):
//! ```text
//! SyncMode::SignalOnly         → one bulk read after bootstrap, signals afterwards
//! ```

use std::time::Duration;

/// How a session refreshes its full value set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncMode {
    /// Refresh every known service once, then rely on change signals.
    SignalOnly,
    /// Refresh every known service on a fixed interval.
    Poll {
        /// Time between bulk refreshes (clamped to at least 1s).
        interval: Duration,
    },
}

impl Default for SyncMode {
    /// Returns [`SyncMode::SignalOnly`].
    fn default() -> Self {
        SyncMode::SignalOnly
    }
}

impl SyncMode {
    /// Returns the polling interval, if this mode polls.
    pub fn poll_interval(&self) -> Option<Duration> {
        match self {
            SyncMode::SignalOnly => None,
            SyncMode::Poll { interval } => Some((*interval).max(Duration::from_secs(1))),
        }
    }
}

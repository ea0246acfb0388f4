//! Retry and resync policies.
//!
//! ## Contents
//! - [`BackoffPolicy`] how retry delays evolve (first / factor / max)
//! - [`SyncMode`]      how a session refreshes its cache (poll / signal-only)
//!
//! ## Quick wiring
//! ```text
//! Config { reconnect: BackoffPolicy, call_retry: BackoffPolicy, sync: SyncMode }
//!      ├─► core::supervisor uses reconnect.next(consecutive_failures)
//!      ├─► router uses call_retry.next(n) for ServiceUnavailable writes/reads
//!      └─► core::session uses sync.poll_interval()
//! ```
//!
//! ## Defaults
//! - `BackoffPolicy::reconnect()` → first=1s, factor=2.0, max=30s.
//! - `BackoffPolicy::call_retry()` → first=250ms, factor=2.0, max=5s.
//! - `SyncMode::SignalOnly`.

mod backoff;
mod sync;

pub use backoff::BackoffPolicy;
pub use sync::SyncMode;

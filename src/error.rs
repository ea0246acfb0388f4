//! Error types used by the bridge runtime and its bus calls.
//!
//! This module defines two main error enums:
//!
//! - [`BridgeError`]: connection-level failures that tear a session down.
//! - [`CallError`]: failures of a single bus call (read, write, bulk read).
//!
//! Both types provide `as_label` for logging/metrics, and [`CallError`]
//! exposes [`CallError::is_retryable`] for the narrow "service temporarily
//! unavailable" class.

use thiserror::Error;

/// # Connection-level errors.
///
/// Any of these ends the current session. The supervisor answers every one of
/// them the same way: wait out the backoff delay and rebuild from scratch.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The connector could not establish or authenticate a session.
    #[error("connect failed: {reason}")]
    Connect {
        /// Transport-provided failure text.
        reason: String,
    },

    /// The session was established but discovery could not complete.
    #[error("bootstrap failed at {stage}: {source}")]
    Bootstrap {
        /// Bootstrap step that failed (e.g. `add_match`, `list_names`).
        stage: &'static str,
        /// Underlying call failure.
        #[source]
        source: CallError,
    },

    /// The bus connection went away (inbound stream closed or transport gone).
    #[error("bus disconnected: {reason}")]
    Disconnected {
        /// Human-readable description of how the loss was observed.
        reason: String,
    },
}

impl BridgeError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use busbridge::BridgeError;
    ///
    /// let err = BridgeError::Disconnected { reason: "eof".into() };
    /// assert_eq!(err.as_label(), "bridge_disconnected");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            BridgeError::Connect { .. } => "bridge_connect",
            BridgeError::Bootstrap { .. } => "bridge_bootstrap",
            BridgeError::Disconnected { .. } => "bridge_disconnected",
        }
    }
}

/// # Errors produced by a single bus call.
///
/// Per-call failures never tear down the session; they are reported to the
/// caller. Only [`CallError::Disconnected`] is escalated by the session loop.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CallError {
    /// No session is currently attached (bridge is reconnecting).
    #[error("not connected")]
    NotConnected,

    /// The bus has no owner for the requested destination.
    #[error("unknown destination: {destination}")]
    UnknownDestination {
        /// Service name the call was addressed to.
        destination: String,
    },

    /// The destination exists but could not answer right now.
    #[error("service temporarily unavailable: {destination}")]
    ServiceUnavailable {
        /// Service name the call was addressed to.
        destination: String,
    },

    /// The value has no wire representation (arrays, objects).
    #[error("unsupported value for {path}: {reason}")]
    UnsupportedValue {
        /// Target path of the write.
        path: String,
        /// Why the value was rejected.
        reason: String,
    },

    /// The connection was lost while the call was in flight.
    #[error("connection lost")]
    Disconnected,

    /// Any other failure reported by the transport.
    #[error("call failed: {reason}")]
    Failed {
        /// Transport-provided failure text.
        reason: String,
    },
}

impl CallError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CallError::NotConnected => "call_not_connected",
            CallError::UnknownDestination { .. } => "call_unknown_destination",
            CallError::ServiceUnavailable { .. } => "call_service_unavailable",
            CallError::UnsupportedValue { .. } => "call_unsupported_value",
            CallError::Disconnected => "call_disconnected",
            CallError::Failed { .. } => "call_failed",
        }
    }

    /// Indicates whether the call may succeed if repeated after a delay.
    ///
    /// Only [`CallError::ServiceUnavailable`] qualifies; everything else is
    /// surfaced to the caller as-is.
    ///
    /// # Example
    /// ```
    /// use busbridge::CallError;
    ///
    /// let busy = CallError::ServiceUnavailable { destination: "com.victronenergy.settings".into() };
    /// assert!(busy.is_retryable());
    ///
    /// let gone = CallError::UnknownDestination { destination: "com.victronenergy.nope".into() };
    /// assert!(!gone.is_retryable());
    /// ```
    pub fn is_retryable(&self) -> bool {
        matches!(self, CallError::ServiceUnavailable { .. })
    }

    /// True if the failure means the whole connection is gone.
    pub fn is_connection_lost(&self) -> bool {
        matches!(self, CallError::Disconnected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_unavailable_is_retryable() {
        let cases = [
            CallError::NotConnected,
            CallError::UnknownDestination { destination: "x".into() },
            CallError::UnsupportedValue { path: "/a".into(), reason: "array".into() },
            CallError::Disconnected,
            CallError::Failed { reason: "boom".into() },
        ];
        for err in cases {
            assert!(!err.is_retryable(), "{} must not be retryable", err.as_label());
        }
        assert!(CallError::ServiceUnavailable { destination: "x".into() }.is_retryable());
    }

    #[test]
    fn test_bootstrap_error_keeps_source() {
        let err = BridgeError::Bootstrap {
            stage: "list_names",
            source: CallError::Disconnected,
        };
        assert_eq!(err.as_label(), "bridge_bootstrap");
        assert_eq!(err.to_string(), "bootstrap failed at list_names: connection lost");
        assert!(std::error::Error::source(&err).is_some());
    }
}

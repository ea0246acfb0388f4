//! # Backoff policy for reconnects and retried calls.
//!
//! [`BackoffPolicy`] controls how delays grow after repeated failures.
//! It is parameterized by:
//! - [`BackoffPolicy::first`] the initial delay;
//! - [`BackoffPolicy::factor`] the multiplicative growth factor;
//! - [`BackoffPolicy::max`] the maximum delay cap.
//!
//! The delay for failure `n` (0-indexed) is `first × factor^n`, clamped to `max`.
//! It is derived from the failure count alone, so with `factor >= 1.0` the
//! sequence is non-decreasing and never exceeds `max`.
//!
//! # Example
//! ```rust
//! use std::time::Duration;
//! use busbridge::BackoffPolicy;
//!
//! let backoff = BackoffPolicy::reconnect();
//!
//! assert_eq!(backoff.next(0), Duration::from_secs(1));
//! assert_eq!(backoff.next(1), Duration::from_secs(2));
//! assert_eq!(backoff.next(10), Duration::from_secs(30));
//! ```

use std::time::Duration;

/// Exponential delay schedule with an upper cap.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BackoffPolicy {
    /// Delay after the first failure.
    pub first: Duration,
    /// Upper bound for any delay.
    pub max: Duration,
    /// Multiplicative growth factor (`>= 1.0` keeps the sequence non-decreasing).
    pub factor: f64,
}

impl Default for BackoffPolicy {
    /// Same as [`BackoffPolicy::reconnect`].
    fn default() -> Self {
        Self::reconnect()
    }
}

impl BackoffPolicy {
    /// Connection-level schedule: 1s, 2s, 4s … capped at 30s.
    pub const fn reconnect() -> Self {
        Self {
            first: Duration::from_secs(1),
            max: Duration::from_secs(30),
            factor: 2.0,
        }
    }

    /// Per-call schedule for "service temporarily unavailable": 250ms doubling up to 5s.
    pub const fn call_retry() -> Self {
        Self {
            first: Duration::from_millis(250),
            max: Duration::from_secs(5),
            factor: 2.0,
        }
    }

    /// Computes the delay for the given failure number (0-indexed).
    ///
    /// Overflowing, negative or non-finite intermediate values clamp to [`BackoffPolicy::max`].
    pub fn next(&self, failures: u32) -> Duration {
        let exp = failures.min(i32::MAX as u32) as i32;
        let secs = self.first.as_secs_f64() * self.factor.powi(exp);

        if !secs.is_finite() || secs < 0.0 || secs > self.max.as_secs_f64() {
            self.max
        } else {
            Duration::from_secs_f64(secs)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_sequence_is_monotonic_and_capped() {
        let policy = BackoffPolicy::reconnect();
        let mut prev = Duration::ZERO;
        for failures in 0..200 {
            let delay = policy.next(failures);
            assert!(delay >= prev, "failure {failures}: {delay:?} < {prev:?}");
            assert!(delay <= Duration::from_secs(30), "failure {failures}: {delay:?} over cap");
            prev = delay;
        }
        assert_eq!(prev, Duration::from_secs(30));
    }

    #[test]
    fn test_exponential_growth() {
        let policy = BackoffPolicy::reconnect();
        assert_eq!(policy.next(0), Duration::from_secs(1));
        assert_eq!(policy.next(1), Duration::from_secs(2));
        assert_eq!(policy.next(2), Duration::from_secs(4));
        assert_eq!(policy.next(3), Duration::from_secs(8));
        assert_eq!(policy.next(4), Duration::from_secs(16));
        assert_eq!(policy.next(5), Duration::from_secs(30));
    }

    #[test]
    fn test_first_exceeds_max() {
        let policy = BackoffPolicy {
            first: Duration::from_secs(60),
            max: Duration::from_secs(30),
            factor: 2.0,
        };
        assert_eq!(policy.next(0), Duration::from_secs(30));
    }

    #[test]
    fn test_non_finite_overflow_clamps_to_max() {
        let policy = BackoffPolicy::call_retry();
        assert_eq!(policy.next(u32::MAX), Duration::from_secs(5));
    }
}

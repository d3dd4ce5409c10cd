//! Retry policy.
//!
//! No teacher module covers backoff math directly; this follows the
//! grounding codebase's habit of small, dependency-free pure-function
//! modules (e.g. `durableengine/graph.rs`'s topo helpers) rather than
//! pulling in a crate like `backoff` for four lines of arithmetic.

use crate::model::ErrorKind;
use crate::model::workflow::RetryOverride;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub max_retry_count: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_count: 3,
            initial_delay_ms: 200,
            backoff_multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

impl RetryPolicy {
    /// Apply a task-level override, field by field, over the defaults.
    #[must_use]
    pub fn with_override(mut self, over: Option<&RetryOverride>) -> Self {
        let Some(over) = over else { return self };
        if let Some(v) = over.max_retry_count {
            self.max_retry_count = v;
        }
        if let Some(v) = over.initial_delay_ms {
            self.initial_delay_ms = v;
        }
        if let Some(v) = over.backoff_multiplier {
            self.backoff_multiplier = v;
        }
        if let Some(v) = over.max_delay_ms {
            self.max_delay_ms = v;
        }
        self
    }

    /// Delay before attempt `n` (1-based: the delay preceding the first
    /// retry, i.e. the second attempt overall). `n < 1` is zero. Otherwise
    /// exponential backoff capped at `max_delay_ms`.
    #[must_use]
    pub fn calculate_delay(&self, n: i64) -> Duration {
        if n < 1 {
            return Duration::ZERO;
        }
        let exponent = (n - 1) as i32;
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(exponent);
        let capped = raw.min(self.max_delay_ms as f64).max(0.0);
        Duration::from_millis(capped as u64)
    }

    /// Whether another attempt is permitted at all, irrespective of error
    /// classification.
    #[must_use]
    pub fn has_attempts_remaining(&self, attempts_so_far: u32) -> bool {
        attempts_so_far <= self.max_retry_count
    }

    /// Only network and timeout errors are transient; configuration errors
    /// never retry.
    #[must_use]
    pub fn should_retry_error(kind: ErrorKind) -> bool {
        matches!(kind, ErrorKind::NetworkError | ErrorKind::TimeoutError)
    }

    /// 5xx responses are retried; 4xx are not, since those indicate a
    /// client-side mistake retrying won't fix.
    #[must_use]
    pub fn should_retry_status(status: u16) -> bool {
        (500..600).contains(&status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_grows_exponentially_then_caps() {
        let policy = RetryPolicy {
            max_retry_count: 5,
            initial_delay_ms: 100,
            backoff_multiplier: 2.0,
            max_delay_ms: 500,
        };
        assert_eq!(policy.calculate_delay(1).as_millis(), 100);
        assert_eq!(policy.calculate_delay(2).as_millis(), 200);
        assert_eq!(policy.calculate_delay(3).as_millis(), 400);
        assert_eq!(policy.calculate_delay(4).as_millis(), 500);
        assert_eq!(policy.calculate_delay(5).as_millis(), 500);
        assert_eq!(policy.calculate_delay(0).as_millis(), 0);
        assert_eq!(policy.calculate_delay(-3).as_millis(), 0);
    }

    #[test]
    fn override_replaces_only_set_fields() {
        let over = RetryOverride {
            max_retry_count: Some(7),
            initial_delay_ms: None,
            backoff_multiplier: None,
            max_delay_ms: None,
        };
        let policy = RetryPolicy::default().with_override(Some(&over));
        assert_eq!(policy.max_retry_count, 7);
        assert_eq!(policy.initial_delay_ms, RetryPolicy::default().initial_delay_ms);
    }

    #[test]
    fn classifies_transient_errors() {
        assert!(RetryPolicy::should_retry_error(ErrorKind::NetworkError));
        assert!(RetryPolicy::should_retry_error(ErrorKind::TimeoutError));
        assert!(!RetryPolicy::should_retry_error(ErrorKind::ConfigurationError));
    }

    #[test]
    fn classifies_status_codes() {
        assert!(RetryPolicy::should_retry_status(503));
        assert!(!RetryPolicy::should_retry_status(404));
        assert!(!RetryPolicy::should_retry_status(200));
    }

    #[test]
    fn attempts_remaining_respects_max() {
        let policy = RetryPolicy::default();
        assert!(policy.has_attempts_remaining(3));
        assert!(!policy.has_attempts_remaining(4));
    }
}

//! Circuit breaker.
//!
//! A three-state machine (closed / open / half-open) keyed per task
//! reference, mirroring the registry-of-independent-machines shape the
//! grounding codebase uses for its cache providers (`providers/cache/mem.rs`
//! holds one map behind one lock) rather than one breaker per task id ever
//! touching global state.

use crate::model::workflow::CircuitBreakerOverride;
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub sampling_duration_ms: u64,
    pub break_duration_ms: u64,
    pub half_open_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            sampling_duration_ms: 60_000,
            break_duration_ms: 30_000,
            half_open_requests: 1,
        }
    }
}

impl CircuitBreakerConfig {
    #[must_use]
    pub fn with_override(mut self, over: Option<&CircuitBreakerOverride>) -> Self {
        let Some(over) = over else { return self };
        if let Some(v) = over.failure_threshold {
            self.failure_threshold = v;
        }
        if let Some(v) = over.sampling_duration_ms {
            self.sampling_duration_ms = v;
        }
        if let Some(v) = over.break_duration_ms {
            self.break_duration_ms = v;
        }
        if let Some(v) = over.half_open_requests {
            self.half_open_requests = v;
        }
        self
    }
}

/// Point-in-time view returned to callers that only want to observe, not
/// mutate, a breaker (e.g. a status endpoint outside this crate's scope).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CircuitBreakerSnapshot {
    pub state: CircuitState,
    pub failure_count: usize,
    pub half_open_success_count: u32,
    pub last_failure_time: Option<Instant>,
    pub circuit_opened_at: Option<Instant>,
    pub last_state_transition_at: Option<Instant>,
}

struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    failures: VecDeque<Instant>,
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    half_open_successes: u32,
    last_failure_time: Option<Instant>,
    last_state_transition_at: Option<Instant>,
}

impl CircuitBreaker {
    fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            failures: VecDeque::new(),
            opened_at: None,
            half_open_in_flight: 0,
            half_open_successes: 0,
            last_failure_time: None,
            last_state_transition_at: None,
        }
    }

    fn transition_to(&mut self, state: CircuitState, now: Instant) {
        self.state = state;
        self.last_state_transition_at = Some(now);
    }

    fn prune_window(&mut self, now: Instant) {
        let window = Duration::from_millis(self.config.sampling_duration_ms);
        while let Some(&front) = self.failures.front() {
            if now.duration_since(front) > window {
                self.failures.pop_front();
            } else {
                break;
            }
        }
    }

    /// Advance `Open` -> `HalfOpen` once the break duration has elapsed.
    fn refresh_state(&mut self, now: Instant) {
        if self.state == CircuitState::Open {
            if let Some(opened_at) = self.opened_at {
                let elapsed = now.duration_since(opened_at);
                if elapsed >= Duration::from_millis(self.config.break_duration_ms) {
                    self.transition_to(CircuitState::HalfOpen, now);
                    self.half_open_in_flight = 0;
                    self.half_open_successes = 0;
                }
            }
        }
    }

    fn allow(&mut self, now: Instant) -> bool {
        self.refresh_state(now);
        match self.state {
            CircuitState::Closed => true,
            CircuitState::Open => false,
            CircuitState::HalfOpen => {
                if self.half_open_in_flight < self.config.half_open_requests {
                    self.half_open_in_flight += 1;
                    true
                } else {
                    false
                }
            }
        }
    }

    /// Closes the breaker only once `half_open_requests` *consecutive*
    /// successes have been observed in `HalfOpen`; any intervening failure
    /// resets the counter (see `record_failure`).
    fn record_success(&mut self, now: Instant) {
        match self.state {
            CircuitState::HalfOpen => {
                self.half_open_successes += 1;
                if self.half_open_successes >= self.config.half_open_requests {
                    self.transition_to(CircuitState::Closed, now);
                    self.failures.clear();
                    self.half_open_in_flight = 0;
                    self.half_open_successes = 0;
                }
            }
            CircuitState::Closed => {
                self.prune_window(now);
            }
            CircuitState::Open => {}
        }
    }

    fn record_failure(&mut self, now: Instant) {
        self.last_failure_time = Some(now);
        match self.state {
            CircuitState::HalfOpen => {
                self.transition_to(CircuitState::Open, now);
                self.opened_at = Some(now);
                self.half_open_in_flight = 0;
                self.half_open_successes = 0;
            }
            CircuitState::Closed => {
                self.prune_window(now);
                self.failures.push_back(now);
                if self.failures.len() as u32 >= self.config.failure_threshold {
                    self.transition_to(CircuitState::Open, now);
                    self.opened_at = Some(now);
                }
            }
            CircuitState::Open => {}
        }
    }

    fn snapshot(&self) -> CircuitBreakerSnapshot {
        CircuitBreakerSnapshot {
            state: self.state,
            failure_count: self.failures.len(),
            half_open_success_count: self.half_open_successes,
            last_failure_time: self.last_failure_time,
            circuit_opened_at: self.opened_at,
            last_state_transition_at: self.last_state_transition_at,
        }
    }
}

/// One independent breaker per task reference, scoped to the task the
/// configuration was declared on.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: RwLock<HashMap<String, CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn allow(&self, task_ref: &str, config: CircuitBreakerConfig) -> bool {
        let mut guard = self.breakers.write().await;
        let breaker = guard
            .entry(task_ref.to_string())
            .or_insert_with(|| CircuitBreaker::new(config));
        let allowed = breaker.allow(Instant::now());
        if !allowed {
            debug!(task_ref, "circuit breaker rejected request");
        }
        allowed
    }

    pub async fn record_success(&self, task_ref: &str) {
        if let Some(breaker) = self.breakers.write().await.get_mut(task_ref) {
            breaker.record_success(Instant::now());
        }
    }

    pub async fn record_failure(&self, task_ref: &str) {
        if let Some(breaker) = self.breakers.write().await.get_mut(task_ref) {
            breaker.record_failure(Instant::now());
        }
    }

    pub async fn snapshot(&self, task_ref: &str) -> Option<CircuitBreakerSnapshot> {
        self.breakers.read().await.get(task_ref).map(CircuitBreaker::snapshot)
    }
}

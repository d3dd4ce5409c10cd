//! `EngineConfig` — process-wide tunables.
//!
//! Layered configuration: built-in defaults, then an optional YAML file,
//! then prefixed environment variables via the `config` crate.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Global semaphore width; `None` = unbounded.
    #[serde(default)]
    pub max_concurrent_tasks: Option<usize>,

    #[serde(default)]
    pub retry: RetryDefaults,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerDefaults,

    #[serde(default)]
    pub cache: CacheDefaults,

    /// Binary HTTP response inline-vs-spill threshold.
    #[serde(default = "default_inline_threshold_bytes")]
    pub inline_threshold_bytes: usize,

    /// Sub-workflow call-stack depth cap.
    #[serde(default = "default_max_sub_workflow_depth")]
    pub max_sub_workflow_depth: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_tasks: None,
            retry: RetryDefaults::default(),
            circuit_breaker: CircuitBreakerDefaults::default(),
            cache: CacheDefaults::default(),
            inline_threshold_bytes: default_inline_threshold_bytes(),
            max_sub_workflow_depth: default_max_sub_workflow_depth(),
        }
    }
}

fn default_inline_threshold_bytes() -> usize {
    512 * 1024
}

fn default_max_sub_workflow_depth() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryDefaults {
    pub max_retry_count: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        Self {
            max_retry_count: 3,
            initial_delay_ms: 200,
            backoff_multiplier: 2.0,
            max_delay_ms: 10_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerDefaults {
    pub failure_threshold: u32,
    pub sampling_duration_ms: u64,
    pub break_duration_ms: u64,
    pub half_open_requests: u32,
}

impl Default for CircuitBreakerDefaults {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            sampling_duration_ms: 60_000,
            break_duration_ms: 30_000,
            half_open_requests: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheDefaults {
    pub default_ttl_ms: u64,
    pub default_stale_ttl_ms: u64,
}

impl Default for CacheDefaults {
    fn default() -> Self {
        Self {
            default_ttl_ms: 60_000,
            default_stale_ttl_ms: 0,
        }
    }
}

impl EngineConfig {
    /// Load configuration from, in ascending precedence: built-in defaults,
    /// an optional `corvid-flow.yaml` in the current directory, then
    /// `CORVID_FLOW__*` environment variables (double underscore separates
    /// nesting).
    pub fn load() -> std::result::Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::Config::try_from(&EngineConfig::default())?)
            .add_source(
                config::File::with_name("corvid-flow")
                    .format(config::FileFormat::Yaml)
                    .required(false),
            )
            .add_source(
                config::Environment::with_prefix("CORVID_FLOW")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_values() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_tasks, None);
        assert_eq!(config.retry.max_retry_count, 3);
        assert_eq!(config.circuit_breaker.failure_threshold, 5);
        assert_eq!(config.inline_threshold_bytes, 512 * 1024);
        assert_eq!(config.max_sub_workflow_depth, 10);
    }
}

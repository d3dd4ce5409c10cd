//! Cached HTTP Decorator.
//!
//! Wraps `HttpExecutor` as a single-purpose decorator rather than a
//! registry, since there is exactly one thing to wrap.

use super::http::HttpExecutor;
use crate::cache::{self, CacheEntry, Freshness, TaskCache};
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::model::context::TemplateContext;
use crate::model::task::HttpDefinition;
use crate::model::workflow::CacheOverride;
use crate::model::TaskExecutionResult;
use crate::retry::RetryPolicy;
use crate::template;
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_ms: u64,
    pub stale_ttl_ms: u64,
    pub cacheable_methods: Vec<String>,
    pub cache_only_success: bool,
    pub bypass_when: Option<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_ms: 60_000,
            stale_ttl_ms: 0,
            cacheable_methods: vec!["GET".to_string()],
            cache_only_success: true,
            bypass_when: None,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub fn with_override(mut self, over: Option<&CacheOverride>) -> Self {
        let Some(over) = over else { return self };
        if let Some(v) = over.enabled {
            self.enabled = v;
        }
        if let Some(v) = over.ttl_ms {
            self.ttl_ms = v;
        }
        if let Some(v) = over.stale_ttl_ms {
            self.stale_ttl_ms = v;
        }
        if let Some(v) = &over.cacheable_methods {
            self.cacheable_methods = v.iter().map(|m| m.to_uppercase()).collect();
        }
        if let Some(v) = over.cache_only_success {
            self.cache_only_success = v;
        }
        if over.bypass_when.is_some() {
            self.bypass_when = over.bypass_when.clone();
        }
        self
    }
}

pub struct CachedHttpExecutor {
    inner: Arc<HttpExecutor>,
    cache: Arc<dyn TaskCache>,
}

impl CachedHttpExecutor {
    #[must_use]
    pub fn new(inner: Arc<HttpExecutor>, cache: Arc<dyn TaskCache>) -> Self {
        Self { inner, cache }
    }

    pub async fn execute(
        &self,
        task_ref: &str,
        http: &HttpDefinition,
        ctx: &TemplateContext,
        retry: RetryPolicy,
        breaker_config: CircuitBreakerConfig,
        timeout_spec: Option<&str>,
        cache_config: &CacheConfig,
    ) -> TaskExecutionResult {
        let method = http.method.to_uppercase();

        if !cache_config.enabled || !cache_config.cacheable_methods.contains(&method) {
            return self
                .inner
                .execute(task_ref, http, ctx, retry, breaker_config, timeout_spec)
                .await;
        }

        if self.bypassed(cache_config.bypass_when.as_deref(), ctx).await {
            return self
                .inner
                .execute(task_ref, http, ctx, retry, breaker_config, timeout_spec)
                .await;
        }

        let resolved = match self.inner.resolve_request(http, ctx).await {
            Ok(r) => r,
            Err(_) => {
                // Resolution failures are reported by the inner executor,
                // which redoes the (cheap) resolution and builds the
                // properly-shaped failure result.
                return self
                    .inner
                    .execute(task_ref, http, ctx, retry, breaker_config, timeout_spec)
                    .await;
            }
        };

        let key = cache::compute_cache_key(
            task_ref,
            &resolved.method,
            &resolved.url,
            resolved.body.as_deref(),
        );

        let started_at = Utc::now();
        let timeout = match timeout_spec.map(crate::duration::parse).transpose() {
            Ok(d) => d,
            Err(_) => None,
        };

        if cache_config.stale_ttl_ms > 0 {
            return self
                .execute_stale_while_revalidate(
                    task_ref,
                    &key,
                    resolved,
                    started_at,
                    retry,
                    breaker_config,
                    timeout,
                    cache_config,
                )
                .await;
        }

        if let Ok(Some(entry)) = self.cache.get(&key).await {
            if entry.freshness(Utc::now()) == Freshness::Fresh {
                info!(task_ref, key, "cache hit");
                return result_from_cached(&entry, started_at);
            }
        }

        let result = self
            .inner
            .execute_resolved(task_ref, resolved, started_at, retry, breaker_config, timeout)
            .await;

        if result.success || !cache_config.cache_only_success {
            self.store(&key, &result, cache_config).await;
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_stale_while_revalidate(
        &self,
        task_ref: &str,
        key: &str,
        resolved: super::http::ResolvedRequest,
        started_at: chrono::DateTime<Utc>,
        retry: RetryPolicy,
        breaker_config: CircuitBreakerConfig,
        timeout: Option<std::time::Duration>,
        cache_config: &CacheConfig,
    ) -> TaskExecutionResult {
        let now = Utc::now();
        match self.cache.get(key).await {
            Ok(Some(entry)) => match entry.freshness(now) {
                Freshness::Fresh => result_from_cached(&entry, started_at),
                Freshness::Stale => {
                    self.spawn_background_refresh(
                        task_ref.to_string(),
                        key.to_string(),
                        resolved,
                        retry,
                        breaker_config,
                        timeout,
                        cache_config.clone(),
                    );
                    result_from_cached(&entry, started_at)
                }
                Freshness::Expired => {
                    self.execute_and_store(task_ref, key, resolved, started_at, retry, breaker_config, timeout, cache_config)
                        .await
                }
            },
            _ => {
                self.execute_and_store(task_ref, key, resolved, started_at, retry, breaker_config, timeout, cache_config)
                    .await
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_and_store(
        &self,
        task_ref: &str,
        key: &str,
        resolved: super::http::ResolvedRequest,
        started_at: chrono::DateTime<Utc>,
        retry: RetryPolicy,
        breaker_config: CircuitBreakerConfig,
        timeout: Option<std::time::Duration>,
        cache_config: &CacheConfig,
    ) -> TaskExecutionResult {
        let result = self
            .inner
            .execute_resolved(task_ref, resolved, started_at, retry, breaker_config, timeout)
            .await;
        if result.success || !cache_config.cache_only_success {
            self.store(key, &result, cache_config).await;
        }
        result
    }

    /// Fire-and-forget refresh. Failures are logged, never surfaced.
    #[allow(clippy::too_many_arguments)]
    fn spawn_background_refresh(
        &self,
        task_ref: String,
        key: String,
        resolved: super::http::ResolvedRequest,
        retry: RetryPolicy,
        breaker_config: CircuitBreakerConfig,
        timeout: Option<std::time::Duration>,
        cache_config: CacheConfig,
    ) {
        let inner = Arc::clone(&self.inner);
        let cache = Arc::clone(&self.cache);
        tokio::spawn(async move {
            let started_at = Utc::now();
            let result = inner
                .execute_resolved(&task_ref, resolved, started_at, retry, breaker_config, timeout)
                .await;
            if result.success || !cache_config.cache_only_success {
                let entry = CacheEntry {
                    key: key.clone(),
                    output: result.output_value(),
                    cached_at: Utc::now(),
                    ttl_ms: cache_config.ttl_ms,
                    stale_ttl_ms: cache_config.stale_ttl_ms,
                };
                if let Err(e) = cache.set(entry).await {
                    error!(task_ref, key, error = %e, "background cache refresh failed to store");
                }
            }
        });
    }

    async fn store(&self, key: &str, result: &TaskExecutionResult, cache_config: &CacheConfig) {
        let entry = CacheEntry {
            key: key.to_string(),
            output: result.output_value(),
            cached_at: Utc::now(),
            ttl_ms: cache_config.ttl_ms,
            stale_ttl_ms: cache_config.stale_ttl_ms,
        };
        if let Err(e) = self.cache.set(entry).await {
            error!(key, error = %e, "failed to store cache entry");
        }
    }

    /// `bypassWhen` supports the simple `{{input.<field>}}` form, resolved
    /// for truthiness; any other string is a literal.
    async fn bypassed(&self, bypass_when: Option<&str>, ctx: &TemplateContext) -> bool {
        let Some(expr) = bypass_when else { return false };
        let resolved = if expr.starts_with("{{") {
            template::resolve(expr, ctx).await.unwrap_or_default()
        } else {
            expr.to_string()
        };
        is_truthy(&resolved)
    }
}

fn is_truthy(value: &str) -> bool {
    match value.to_lowercase().as_str() {
        "" | "false" | "0" => false,
        "true" | "1" => true,
        other => other.parse::<f64>().map(|n| n != 0.0).unwrap_or(!other.is_empty()),
    }
}

fn result_from_cached(entry: &CacheEntry, started_at: chrono::DateTime<Utc>) -> TaskExecutionResult {
    let completed_at = Utc::now();
    let output = entry.output.as_object().cloned().unwrap_or_default();
    TaskExecutionResult {
        success: true,
        output,
        errors: Vec::new(),
        error_info: None,
        retry_count: 0,
        started_at,
        completed_at,
        duration_ms: crate::model::duration_since_ms(started_at, completed_at),
        was_skipped: false,
        skip_reason: None,
        resolved_url: None,
        http_method: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::circuit_breaker::CircuitBreakerRegistry;
    use crate::providers::cache_mem::InMemoryCache;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn decorator() -> (CachedHttpExecutor, Arc<InMemoryCache>) {
        let cache = Arc::new(InMemoryCache::new());
        let http = Arc::new(HttpExecutor::new(
            reqwest::Client::new(),
            Arc::new(CircuitBreakerRegistry::new()),
        ));
        (CachedHttpExecutor::new(http, cache.clone()), cache)
    }

    #[tokio::test]
    async fn second_call_is_served_from_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"n": 1})))
            .expect(1)
            .mount(&server)
            .await;

        let http = HttpDefinition {
            method: "GET".to_string(),
            url: server.uri(),
            headers: Default::default(),
            body: None,
        };
        let ctx = TemplateContext::new(serde_json::json!({}));
        let (decorator, _cache) = decorator();
        let config = CacheConfig::default();

        let first = decorator
            .execute("t", &http, &ctx, RetryPolicy::default(), CircuitBreakerConfig::default(), None, &config)
            .await;
        assert!(first.success);

        let second = decorator
            .execute("t", &http, &ctx, RetryPolicy::default(), CircuitBreakerConfig::default(), None, &config)
            .await;
        assert!(second.success);
        assert_eq!(second.output.get("n"), Some(&serde_json::json!(1)));
    }

    #[tokio::test]
    async fn bypass_when_true_skips_cache() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"n": 1})))
            .expect(2)
            .mount(&server)
            .await;

        let http = HttpDefinition {
            method: "GET".to_string(),
            url: server.uri(),
            headers: Default::default(),
            body: None,
        };
        let ctx = TemplateContext::new(serde_json::json!({"skip": true}));
        let (decorator, _cache) = decorator();
        let config = CacheConfig {
            bypass_when: Some("{{input.skip}}".to_string()),
            ..CacheConfig::default()
        };

        decorator
            .execute("t", &http, &ctx, RetryPolicy::default(), CircuitBreakerConfig::default(), None, &config)
            .await;
        decorator
            .execute("t", &http, &ctx, RetryPolicy::default(), CircuitBreakerConfig::default(), None, &config)
            .await;
    }

    #[test]
    fn truthiness_rules() {
        assert!(is_truthy("true"));
        assert!(is_truthy("TRUE"));
        assert!(is_truthy("1"));
        assert!(is_truthy("anything"));
        assert!(!is_truthy("false"));
        assert!(!is_truthy("0"));
        assert!(!is_truthy(""));
    }
}

//! HTTP Task Executor, composed with the circuit breaker and retry policy
//! as "Cache → Breaker → Retry → request" down the call stack.
//!
//! Method-to-builder dispatch, a success/error status split, and a
//! content-type sniff for the response body, wrapped in a typed
//! retry/backoff loop and circuit breaker gate.

use super::response_storage;
use super::{Error, Result};
use crate::circuit_breaker::{CircuitBreakerConfig, CircuitBreakerRegistry};
use crate::model::context::TemplateContext;
use crate::model::task::HttpDefinition;
use crate::model::{ErrorKind, TaskErrorInfo, TaskExecutionResult, duration_since_ms};
use crate::retry::RetryPolicy;
use crate::{duration, template};
use chrono::Utc;
use reqwest::Method;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, warn};

/// Headers that route onto the request "entity" rather than the request
/// line. `reqwest` doesn't distinguish the two, but the split is kept here
/// so request construction reads the way HTTP itself draws the boundary.
const ENTITY_HEADERS: &[&str] = &[
    "content-type",
    "content-length",
    "content-encoding",
    "content-language",
    "content-location",
    "content-md5",
    "content-range",
    "content-disposition",
    "expires",
    "last-modified",
];

pub struct HttpExecutor {
    client: reqwest::Client,
    breakers: Arc<CircuitBreakerRegistry>,
    inline_threshold_bytes: usize,
}

pub(crate) struct ResolvedRequest {
    pub(crate) method: String,
    pub(crate) url: String,
    pub(crate) headers: Vec<(String, String)>,
    pub(crate) body: Option<String>,
}

impl HttpExecutor {
    #[must_use]
    pub fn new(client: reqwest::Client, breakers: Arc<CircuitBreakerRegistry>) -> Self {
        Self {
            client,
            breakers,
            inline_threshold_bytes: response_storage::DEFAULT_INLINE_THRESHOLD_BYTES,
        }
    }

    pub(crate) async fn resolve_request(
        &self,
        http: &HttpDefinition,
        ctx: &TemplateContext,
    ) -> Result<ResolvedRequest> {
        let url = template::resolve(&http.url, ctx).await?;
        let mut headers = Vec::with_capacity(http.headers.len());
        for (name, value_template) in &http.headers {
            headers.push((name.clone(), template::resolve(value_template, ctx).await?));
        }
        let body = match &http.body {
            Some(b) => Some(template::resolve(b, ctx).await?),
            None => None,
        };
        Ok(ResolvedRequest {
            method: http.method.to_uppercase(),
            url,
            headers,
            body,
        })
    }

    /// Resolve templates, then run the retry/breaker loop. Never returns an
    /// `Err`: every failure mode becomes a failed `TaskExecutionResult` with
    /// typed `error_info`.
    #[instrument(skip(self, http, ctx, retry), fields(task_ref))]
    pub async fn execute(
        &self,
        task_ref: &str,
        http: &HttpDefinition,
        ctx: &TemplateContext,
        retry: RetryPolicy,
        breaker_config: CircuitBreakerConfig,
        timeout_spec: Option<&str>,
    ) -> TaskExecutionResult {
        let started_at = Utc::now();

        let resolved = match self.resolve_request(http, ctx).await {
            Ok(r) => r,
            Err(e) => {
                return configuration_failure(started_at, None, None, e.to_string());
            }
        };

        let timeout = match timeout_spec.map(duration::parse).transpose() {
            Ok(d) => d,
            Err(message) => {
                return configuration_failure(
                    started_at,
                    Some(resolved.url.clone()),
                    Some(resolved.method.clone()),
                    message,
                );
            }
        };

        self.execute_resolved(task_ref, resolved, started_at, retry, breaker_config, timeout)
            .await
    }

    /// Run the retry/breaker loop against an already-resolved request. Split
    /// out from `execute` so the cached decorator can compute a cache key
    /// from the resolved url/method/body before deciding whether to run
    /// this loop at all.
    pub(crate) async fn execute_resolved(
        &self,
        task_ref: &str,
        resolved: ResolvedRequest,
        started_at: chrono::DateTime<Utc>,
        retry: RetryPolicy,
        breaker_config: CircuitBreakerConfig,
        timeout: Option<Duration>,
    ) -> TaskExecutionResult {
        let mut attempt: u32 = 1;
        loop {
            if !self.breakers.allow(task_ref, breaker_config).await {
                return TaskExecutionResult {
                    success: false,
                    output: serde_json::Map::new(),
                    errors: vec![format!("circuit breaker open for '{task_ref}'")],
                    error_info: Some(TaskErrorInfo {
                        error_type: ErrorKind::HttpError,
                        error_message: format!("circuit breaker open for '{task_ref}'"),
                        service_url: Some(resolved.url.clone()),
                        http_method: Some(resolved.method.clone()),
                        retry_attempts: attempt - 1,
                        task_started_at: started_at,
                        duration_until_error_ms: duration_since_ms(started_at, Utc::now()),
                        suggestion: Some("wait for the breaker's break duration to elapse".to_string()),
                    }),
                    retry_count: attempt - 1,
                    started_at,
                    completed_at: Utc::now(),
                    duration_ms: duration_since_ms(started_at, Utc::now()),
                    was_skipped: false,
                    skip_reason: None,
                    resolved_url: Some(resolved.url),
                    http_method: Some(resolved.method),
                };
            }

            let attempt_result = self.send_once(&resolved, timeout).await;

            match attempt_result {
                Ok(value) => {
                    self.breakers.record_success(task_ref).await;
                    let completed_at = Utc::now();
                    return TaskExecutionResult {
                        success: true,
                        output: as_output_map(value),
                        errors: Vec::new(),
                        error_info: None,
                        retry_count: attempt - 1,
                        started_at,
                        completed_at,
                        duration_ms: duration_since_ms(started_at, completed_at),
                        was_skipped: false,
                        skip_reason: None,
                        resolved_url: Some(resolved.url),
                        http_method: Some(resolved.method),
                    };
                }
                Err(outcome) => {
                    let retryable = match &outcome {
                        AttemptError::Status { status, .. } => RetryPolicy::should_retry_status(*status),
                        AttemptError::Timeout => RetryPolicy::should_retry_error(ErrorKind::TimeoutError),
                        AttemptError::Network { .. } => RetryPolicy::should_retry_error(ErrorKind::NetworkError),
                    };

                    if retryable && retry.has_attempts_remaining(attempt) {
                        warn!(task_ref, attempt, "http attempt failed, retrying");
                        tokio::time::sleep(retry.calculate_delay(i64::from(attempt))).await;
                        attempt += 1;
                        continue;
                    }

                    self.breakers.record_failure(task_ref).await;
                    let completed_at = Utc::now();
                    let (kind, message) = outcome.classify();
                    return TaskExecutionResult {
                        success: false,
                        output: serde_json::Map::new(),
                        errors: vec![message.clone()],
                        error_info: Some(TaskErrorInfo {
                            error_type: kind,
                            error_message: message,
                            service_url: Some(resolved.url.clone()),
                            http_method: Some(resolved.method.clone()),
                            retry_attempts: attempt - 1,
                            task_started_at: started_at,
                            duration_until_error_ms: duration_since_ms(started_at, completed_at),
                            suggestion: None,
                        }),
                        retry_count: attempt - 1,
                        started_at,
                        completed_at,
                        duration_ms: duration_since_ms(started_at, completed_at),
                        was_skipped: false,
                        skip_reason: None,
                        resolved_url: Some(resolved.url),
                        http_method: Some(resolved.method),
                    };
                }
            }
        }
    }

    async fn send_once(
        &self,
        resolved: &ResolvedRequest,
        timeout: Option<Duration>,
    ) -> std::result::Result<serde_json::Value, AttemptError> {
        let method = Method::from_str(&resolved.method).map_err(|e| AttemptError::Network {
            message: format!("invalid HTTP method '{}': {e}", resolved.method),
        })?;
        let mut builder = self.client.request(method.clone(), &resolved.url);

        let has_content_type = resolved
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("content-type"));
        let body_allowed = matches!(resolved.method.as_str(), "POST" | "PUT" | "PATCH");

        for (name, value) in &resolved.headers {
            builder = builder.header(name, value);
        }
        if body_allowed && resolved.body.is_some() && !has_content_type {
            builder = builder.header("content-type", "application/json");
        }
        if body_allowed {
            if let Some(body) = &resolved.body {
                builder = builder.body(body.clone());
            }
        }

        let send_fut = builder.send();
        let response = match timeout {
            Some(d) => match tokio::time::timeout(d, send_fut).await {
                Ok(r) => r,
                Err(_) => return Err(AttemptError::Timeout),
            },
            None => send_fut.await,
        };

        let response = response.map_err(|e| {
            if e.is_timeout() {
                AttemptError::Timeout
            } else {
                AttemptError::Network { message: e.to_string() }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError::Status {
                status: status.as_u16(),
                body_snippet: response.text().await.unwrap_or_default(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("application/json")
            .to_string();

        if response_storage::is_binary_media_type(&content_type) {
            let bytes = response.bytes().await.map_err(|e| AttemptError::Network {
                message: e.to_string(),
            })?;
            return response_storage::store(&content_type, &bytes, self.inline_threshold_bytes)
                .map_err(|e| AttemptError::Network {
                    message: e.to_string(),
                });
        }

        let text = response.text().await.map_err(|e| AttemptError::Network {
            message: e.to_string(),
        })?;
        let value: serde_json::Value = serde_json::from_str(&text).unwrap_or(serde_json::Value::String(text));
        Ok(value)
    }
}

#[allow(clippy::large_enum_variant)]
enum AttemptError {
    Status { status: u16, body_snippet: String },
    Timeout,
    Network { message: String },
}

impl AttemptError {
    fn classify(&self) -> (ErrorKind, String) {
        match self {
            AttemptError::Status { status, body_snippet } => (
                ErrorKind::HttpError,
                format!("request failed with status {status}: {body_snippet}"),
            ),
            AttemptError::Timeout => (ErrorKind::TimeoutError, "request timed out".to_string()),
            AttemptError::Network { message } => (ErrorKind::NetworkError, message.clone()),
        }
    }
}

/// Wrap a JSON value as the executor's output mapping.
fn as_output_map(value: serde_json::Value) -> serde_json::Map<String, serde_json::Value> {
    match value {
        serde_json::Value::Object(map) => map,
        serde_json::Value::Array(_) => {
            let mut map = serde_json::Map::new();
            map.insert("data".to_string(), value);
            map
        }
        other => {
            let mut map = serde_json::Map::new();
            map.insert("data".to_string(), other);
            map
        }
    }
}

fn configuration_failure(
    started_at: chrono::DateTime<Utc>,
    url: Option<String>,
    method: Option<String>,
    message: String,
) -> TaskExecutionResult {
    let completed_at = Utc::now();
    TaskExecutionResult {
        success: false,
        output: serde_json::Map::new(),
        errors: vec![message.clone()],
        error_info: Some(TaskErrorInfo {
            error_type: ErrorKind::ConfigurationError,
            error_message: message,
            service_url: url.clone(),
            http_method: method.clone(),
            retry_attempts: 0,
            task_started_at: started_at,
            duration_until_error_ms: duration_since_ms(started_at, completed_at),
            suggestion: None,
        }),
        retry_count: 0,
        started_at,
        completed_at,
        duration_ms: duration_since_ms(started_at, completed_at),
        was_skipped: false,
        skip_reason: None,
        resolved_url: url,
        http_method: method,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn executor() -> HttpExecutor {
        HttpExecutor::new(reqwest::Client::new(), Arc::new(CircuitBreakerRegistry::new()))
    }

    #[tokio::test]
    async fn successful_json_object_response_passes_through() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/x"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"a": 1})))
            .mount(&server)
            .await;

        let http = HttpDefinition {
            method: "GET".to_string(),
            url: format!("{}/x", server.uri()),
            headers: Default::default(),
            body: None,
        };
        let ctx = TemplateContext::new(serde_json::json!({}));
        let result = executor()
            .execute("t", &http, &ctx, RetryPolicy::default(), CircuitBreakerConfig::default(), None)
            .await;
        assert!(result.success);
        assert_eq!(result.output.get("a"), Some(&serde_json::json!(1)));
    }

    #[tokio::test]
    async fn json_array_response_wraps_in_data() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([1, 2])))
            .mount(&server)
            .await;

        let http = HttpDefinition {
            method: "GET".to_string(),
            url: server.uri(),
            headers: Default::default(),
            body: None,
        };
        let ctx = TemplateContext::new(serde_json::json!({}));
        let result = executor()
            .execute("t", &http, &ctx, RetryPolicy::default(), CircuitBreakerConfig::default(), None)
            .await;
        assert!(result.success);
        assert_eq!(result.output.get("data"), Some(&serde_json::json!([1, 2])));
    }

    #[tokio::test]
    async fn server_error_retries_then_fails() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let http = HttpDefinition {
            method: "GET".to_string(),
            url: server.uri(),
            headers: Default::default(),
            body: None,
        };
        let ctx = TemplateContext::new(serde_json::json!({}));
        let retry = RetryPolicy {
            max_retry_count: 2,
            initial_delay_ms: 1,
            backoff_multiplier: 1.0,
            max_delay_ms: 5,
        };
        let result = executor()
            .execute("t", &http, &ctx, retry, CircuitBreakerConfig::default(), None)
            .await;
        assert!(!result.success);
        assert_eq!(result.retry_count, 2);
        assert_eq!(result.error_info.unwrap().error_type, ErrorKind::HttpError);
    }

    #[tokio::test]
    async fn not_found_does_not_retry() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let http = HttpDefinition {
            method: "GET".to_string(),
            url: server.uri(),
            headers: Default::default(),
            body: None,
        };
        let ctx = TemplateContext::new(serde_json::json!({}));
        let result = executor()
            .execute("t", &http, &ctx, RetryPolicy::default(), CircuitBreakerConfig::default(), None)
            .await;
        assert!(!result.success);
        assert_eq!(result.retry_count, 0);
    }
}

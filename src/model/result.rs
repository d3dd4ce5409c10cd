//! Result types returned up through the engine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    ConfigurationError,
    NetworkError,
    TimeoutError,
    HttpError,
    UnknownError,
}

/// A structured error attached to a failed task result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskErrorInfo {
    pub error_type: ErrorKind,
    pub error_message: String,
    pub service_url: Option<String>,
    pub http_method: Option<String>,
    pub retry_attempts: u32,
    pub task_started_at: DateTime<Utc>,
    pub duration_until_error_ms: u64,
    pub suggestion: Option<String>,
}

/// The outcome of running a single task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionResult {
    pub success: bool,
    pub output: serde_json::Map<String, serde_json::Value>,
    pub errors: Vec<String>,
    pub error_info: Option<TaskErrorInfo>,
    pub retry_count: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub was_skipped: bool,
    pub skip_reason: Option<String>,
    pub resolved_url: Option<String>,
    pub http_method: Option<String>,
}

impl TaskExecutionResult {
    #[must_use]
    pub fn output_value(&self) -> serde_json::Value {
        serde_json::Value::Object(self.output.clone())
    }

    #[must_use]
    pub fn skipped(started_at: DateTime<Utc>, reason: impl Into<String>) -> Self {
        let completed_at = Utc::now();
        Self {
            success: true,
            output: serde_json::Map::new(),
            errors: Vec::new(),
            error_info: None,
            retry_count: 0,
            started_at,
            completed_at,
            duration_ms: duration_since_ms(started_at, completed_at),
            was_skipped: true,
            skip_reason: Some(reason.into()),
            resolved_url: None,
            http_method: None,
        }
    }

    #[must_use]
    pub fn dependency_failure(started_at: DateTime<Utc>) -> Self {
        let completed_at = Utc::now();
        Self {
            success: false,
            output: serde_json::Map::new(),
            errors: vec!["Task skipped due to failed dependency".to_string()],
            error_info: None,
            retry_count: 0,
            started_at,
            completed_at,
            duration_ms: duration_since_ms(started_at, completed_at),
            was_skipped: true,
            skip_reason: Some("Task skipped due to failed dependency".to_string()),
            resolved_url: None,
            http_method: None,
        }
    }

    #[must_use]
    pub fn failure(started_at: DateTime<Utc>, message: impl Into<String>) -> Self {
        let completed_at = Utc::now();
        Self {
            success: false,
            output: serde_json::Map::new(),
            errors: vec![message.into()],
            error_info: None,
            retry_count: 0,
            started_at,
            completed_at,
            duration_ms: duration_since_ms(started_at, completed_at),
            was_skipped: false,
            skip_reason: None,
            resolved_url: None,
            http_method: None,
        }
    }
}

#[must_use]
pub fn duration_since_ms(start: DateTime<Utc>, end: DateTime<Utc>) -> u64 {
    (end - start).num_milliseconds().max(0) as u64
}

/// Breakdown of where a run's wall-clock time went.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct OrchestrationCost {
    pub setup_ms: u64,
    pub task_execution_ms: u64,
    pub teardown_ms: u64,
    pub scheduling_overhead_ms: u64,
    pub total_ms: u64,
    pub orchestration_cost_percentage: f64,
}

impl OrchestrationCost {
    #[must_use]
    pub fn compute(setup: Duration, teardown: Duration, scheduling_overhead: Duration, total: Duration) -> Self {
        let setup_ms = setup.as_millis() as u64;
        let teardown_ms = teardown.as_millis() as u64;
        let scheduling_overhead_ms = scheduling_overhead.as_millis() as u64;
        let total_ms = total.as_millis() as u64;
        let task_execution_ms = total_ms.saturating_sub(setup_ms + teardown_ms + scheduling_overhead_ms);
        let overhead_ms = setup_ms + teardown_ms + scheduling_overhead_ms;
        let pct = if total_ms > 0 {
            100.0 * overhead_ms as f64 / total_ms as f64
        } else {
            0.0
        };
        Self {
            setup_ms,
            task_execution_ms,
            teardown_ms,
            scheduling_overhead_ms,
            total_ms,
            orchestration_cost_percentage: pct,
        }
    }
}

/// Result of a full `Execute` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecutionResult {
    pub success: bool,
    pub output: serde_json::Value,
    pub task_results: HashMap<String, TaskExecutionResult>,
    pub errors: Vec<String>,
    pub total_duration_ms: u64,
    pub graph_build_duration_ms: u64,
    pub orchestration_cost: OrchestrationCost,
}

impl WorkflowExecutionResult {
    #[must_use]
    pub fn failed(errors: Vec<String>) -> Self {
        Self {
            success: false,
            output: serde_json::Value::Null,
            task_results: HashMap::new(),
            errors,
            total_duration_ms: 0,
            graph_build_duration_ms: 0,
            orchestration_cost: OrchestrationCost::default(),
        }
    }
}

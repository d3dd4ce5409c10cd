//! `WorkflowResource` and `TaskStep` — the declarative workflow definition.
//!
//! Mirrors the shape the grounding codebase gives `WorkflowDefinition` /
//! `TaskDefinition`, adapted to this spec's task-step model (§3): a flat
//! list of steps naming a dependency set via `dependsOn` rather than the
//! grounding codebase's `then`-chained sequential `do` block.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// `document` metadata plus the workflow body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowResource {
    pub metadata: ResourceMetadata,
    pub spec: WorkflowSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceMetadata {
    pub name: String,
    #[serde(default = "default_namespace")]
    pub namespace: String,
    #[serde(default)]
    pub annotations: IndexMap<String, String>,
}

fn default_namespace() -> String {
    "default".to_string()
}

impl ResourceMetadata {
    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.annotations.get("version").map(String::as_str)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSpec {
    pub tasks: Vec<TaskStep>,
    #[serde(default)]
    pub input_schema: Option<serde_json::Value>,
    /// Output field name -> template string, resolved against the final context.
    #[serde(default)]
    pub output: IndexMap<String, String>,
}

/// Exactly one of `task_ref`, `workflow_ref`, or `switch` is set; enforced by
/// the custom `Deserialize` impl below rather than by the validator, since a
/// step with zero or multiple targets isn't a meaningful value to construct.
#[derive(Debug, Clone, Serialize)]
pub enum TaskTarget {
    TaskRef(String),
    WorkflowRef(String),
    Switch(SwitchBlock),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchBlock {
    /// Template string resolved to a string, then compared against each case.
    pub value: String,
    pub cases: Vec<SwitchCase>,
    #[serde(default)]
    pub default: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SwitchCase {
    #[serde(rename = "match")]
    pub match_value: String,
    pub task_ref: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "if")]
    pub if_expr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForEachBlock {
    /// Template string resolved to a JSON array.
    pub items: String,
    #[serde(default = "default_item_var")]
    pub item_var: String,
    #[serde(default = "default_index_var")]
    pub index_var: String,
    #[serde(default)]
    pub max_concurrency: usize,
}

fn default_item_var() -> String {
    "item".to_string()
}

fn default_index_var() -> String {
    "index".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheOverride {
    pub enabled: Option<bool>,
    pub ttl_ms: Option<u64>,
    pub stale_ttl_ms: Option<u64>,
    pub cacheable_methods: Option<Vec<String>>,
    pub cache_only_success: Option<bool>,
    pub bypass_when: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RetryOverride {
    pub max_retry_count: Option<u32>,
    pub initial_delay_ms: Option<u64>,
    pub backoff_multiplier: Option<f64>,
    pub max_delay_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CircuitBreakerOverride {
    pub failure_threshold: Option<u32>,
    pub sampling_duration_ms: Option<u64>,
    pub break_duration_ms: Option<u64>,
    pub half_open_requests: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskStep {
    pub id: String,
    pub target: TaskTarget,
    pub depends_on: Vec<String>,
    /// field -> template string; doubles as the sub-workflow `inputMappings`
    /// when `target` is `WorkflowRef`.
    pub input: IndexMap<String, String>,
    pub condition: Option<Condition>,
    pub for_each: Option<ForEachBlock>,
    pub timeout: Option<String>,
    pub cache: Option<CacheOverride>,
    pub retry: Option<RetryOverride>,
    pub circuit_breaker: Option<CircuitBreakerOverride>,
}

#[derive(Debug, Clone, Deserialize)]
struct TaskStepRaw {
    id: String,
    #[serde(default)]
    task_ref: Option<String>,
    #[serde(default)]
    workflow_ref: Option<String>,
    #[serde(default)]
    switch: Option<SwitchBlock>,
    #[serde(default)]
    depends_on: Vec<String>,
    #[serde(default)]
    input: IndexMap<String, String>,
    #[serde(default)]
    condition: Option<Condition>,
    #[serde(default)]
    for_each: Option<ForEachBlock>,
    #[serde(default)]
    timeout: Option<String>,
    #[serde(default)]
    cache: Option<CacheOverride>,
    #[serde(default)]
    retry: Option<RetryOverride>,
    #[serde(default)]
    circuit_breaker: Option<CircuitBreakerOverride>,
}

impl<'de> Deserialize<'de> for TaskStep {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        use serde::de::Error as _;

        let raw = TaskStepRaw::deserialize(deserializer)?;
        let present = [
            raw.task_ref.is_some(),
            raw.workflow_ref.is_some(),
            raw.switch.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count();

        let target = match (raw.task_ref, raw.workflow_ref, raw.switch) {
            (Some(t), None, None) if present == 1 => TaskTarget::TaskRef(t),
            (None, Some(w), None) if present == 1 => TaskTarget::WorkflowRef(w),
            (None, None, Some(s)) if present == 1 => TaskTarget::Switch(s),
            _ => {
                return Err(D::Error::custom(format!(
                    "task step '{}' must set exactly one of taskRef, workflowRef, switch",
                    raw.id
                )));
            }
        };

        Ok(TaskStep {
            id: raw.id,
            target,
            depends_on: raw.depends_on,
            input: raw.input,
            condition: raw.condition,
            for_each: raw.for_each,
            timeout: raw.timeout,
            cache: raw.cache,
            retry: raw.retry,
            circuit_breaker: raw.circuit_breaker,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_step_with_no_target() {
        let yaml = "id: a\n";
        let err = serde_yaml::from_str::<TaskStep>(yaml).unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn rejects_step_with_two_targets() {
        let yaml = "id: a\ntaskRef: foo\nworkflowRef: bar\n";
        let err = serde_yaml::from_str::<TaskStep>(yaml).unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn accepts_task_ref() {
        let yaml = "id: a\ntaskRef: foo\ndependsOn: [b, c]\n";
        let step: TaskStep = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(step.target, TaskTarget::TaskRef(ref s) if s == "foo"));
        assert_eq!(step.depends_on, vec!["b".to_string(), "c".to_string()]);
    }
}

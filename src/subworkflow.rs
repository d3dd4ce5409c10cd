//! Sub-workflow invocation.
//!
//! A `workflowRef` step resolves the referenced workflow, maps its own
//! inputs into a fresh, isolated context, and recurses into
//! `Orchestrator::run`, guarded against cycles by its own call stack.

use crate::call_stack::CallStack;
use crate::model::{TaskExecutionResult, TaskStep, TemplateContext, duration_since_ms};
use crate::orchestrator::Orchestrator;
use crate::template;
use crate::workflow_ref::WorkflowRef;
use chrono::Utc;
use serde_json::Value;

/// Dispatch a `workflowRef` step. `call_stack` is owned by this call: it was
/// cloned once per sibling task by the wave loop in `Orchestrator::run`, so
/// there is no shared stack to pop back into on return — the branch-local
/// value simply drops at the end of this function, which gives the same
/// isolation an explicit push/pop pair would on a shared stack.
pub(crate) async fn execute(
    orchestrator: &Orchestrator,
    step: &TaskStep,
    reference: &str,
    parent_ctx: &TemplateContext,
    parent_namespace: &str,
    execution_id: &str,
    mut call_stack: CallStack,
) -> TaskExecutionResult {
    let started_at = Utc::now();

    let input = match resolve_inputs(&step.input, parent_ctx).await {
        Ok(v) => v,
        Err(e) => return TaskExecutionResult::failure(started_at, e.to_string()),
    };

    let parsed_ref = WorkflowRef::parse(reference);
    let child_workflow = match parsed_ref.resolve(orchestrator.workflows(), parent_namespace) {
        Ok(wf) => wf,
        Err(e) => return TaskExecutionResult::failure(started_at, e.to_string()),
    };

    let child_name = format!("{}/{}", child_workflow.metadata.namespace, child_workflow.metadata.name);
    if let Err(e) = call_stack.push(child_name) {
        return TaskExecutionResult::failure(started_at, e.to_string());
    }

    let timeout = match step.timeout.as_deref().map(crate::duration::parse).transpose() {
        Ok(d) => d,
        Err(e) => return TaskExecutionResult::failure(started_at, e),
    };

    let child_ctx = TemplateContext::isolated(Value::Object(input));
    let child_execution_id = format!("{execution_id}/{}", child_workflow.metadata.name);

    let run_future = orchestrator.run(child_workflow, child_ctx, call_stack, child_execution_id);

    let outcome = match timeout {
        Some(duration) => match tokio::time::timeout(duration, run_future).await {
            Ok(result) => result,
            Err(_) => return TaskExecutionResult::failure(started_at, "sub-workflow execution timed out"),
        },
        None => run_future.await,
    };

    into_task_result(started_at, outcome)
}

async fn resolve_inputs(
    input: &indexmap::IndexMap<String, String>,
    ctx: &TemplateContext,
) -> template::Result<serde_json::Map<String, Value>> {
    let mut map = serde_json::Map::new();
    for (key, tmpl) in input {
        let resolved = template::resolve(tmpl, ctx).await?;
        map.insert(key.clone(), reparse(&resolved));
    }
    Ok(map)
}

fn reparse(resolved: &str) -> Value {
    let trimmed = resolved.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        serde_json::from_str(resolved).unwrap_or_else(|_| Value::String(resolved.to_string()))
    } else {
        Value::String(resolved.to_string())
    }
}

fn into_task_result(
    started_at: chrono::DateTime<Utc>,
    outcome: crate::model::WorkflowExecutionResult,
) -> TaskExecutionResult {
    let completed_at = Utc::now();
    let output = match outcome.output {
        Value::Object(map) => map,
        other => {
            let mut map = serde_json::Map::new();
            map.insert("output".to_string(), other);
            map
        }
    };
    TaskExecutionResult {
        success: outcome.success,
        output,
        errors: outcome.errors,
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{TaskCatalog, WorkflowCatalog};
    use crate::circuit_breaker::CircuitBreakerRegistry;
    use crate::config::EngineConfig;
    use crate::events::NoopNotifier;
    use crate::executor::cached_http::CachedHttpExecutor;
    use crate::executor::http::HttpExecutor;
    use crate::model::{
        CacheOverride, CircuitBreakerOverride, Condition, ForEachBlock, ResourceMetadata, RetryOverride,
        TaskTarget, WorkflowResource, WorkflowSpec,
    };
    use crate::providers::cache_mem::InMemoryCache;
    use indexmap::IndexMap;
    use std::sync::Arc;

    fn step(id: &str, target: TaskTarget) -> TaskStep {
        TaskStep {
            id: id.to_string(),
            target,
            depends_on: Vec::new(),
            input: IndexMap::new(),
            condition: None::<Condition>,
            for_each: None::<ForEachBlock>,
            timeout: None,
            cache: None::<CacheOverride>,
            retry: None::<RetryOverride>,
            circuit_breaker: None::<CircuitBreakerOverride>,
        }
    }

    fn empty_workflow(name: &str) -> WorkflowResource {
        WorkflowResource {
            metadata: ResourceMetadata { name: name.to_string(), namespace: "default".to_string(), annotations: IndexMap::new() },
            spec: WorkflowSpec { tasks: Vec::new(), input_schema: None, output: IndexMap::new() },
        }
    }

    fn orchestrator(workflows: WorkflowCatalog) -> Orchestrator {
        let http = Arc::new(HttpExecutor::new(reqwest::Client::new(), Arc::new(CircuitBreakerRegistry::new())));
        let cached = Arc::new(CachedHttpExecutor::new(http, Arc::new(InMemoryCache::new())));
        Orchestrator::new(
            cached,
            Arc::new(TaskCatalog::new(vec![])),
            Arc::new(workflows),
            Arc::new(EngineConfig::default()),
            Arc::new(NoopNotifier),
        )
    }

    #[tokio::test]
    async fn self_referencing_workflow_ref_is_a_cycle() {
        let child = empty_workflow("p");
        let workflows = WorkflowCatalog::new(vec![child]);
        let orchestrator = orchestrator(workflows);

        let step = step("call-self", TaskTarget::WorkflowRef("p".to_string()));
        let ctx = TemplateContext::new(serde_json::json!({}));
        let mut call_stack = CallStack::new(10);
        call_stack.push("default/p").unwrap();

        let result = execute(&orchestrator, &step, "p", &ctx, "default", "exec-1", call_stack).await;
        assert!(!result.success);
        assert!(result.errors.iter().any(|e| e.contains("cycle")));
    }

    #[tokio::test]
    async fn resolves_and_runs_empty_child_workflow() {
        let child = empty_workflow("child");
        let workflows = WorkflowCatalog::new(vec![child]);
        let orchestrator = orchestrator(workflows);

        let step = step("call-child", TaskTarget::WorkflowRef("child".to_string()));
        let ctx = TemplateContext::new(serde_json::json!({}));
        let call_stack = CallStack::new(10);

        let result = execute(&orchestrator, &step, "child", &ctx, "default", "exec-1", call_stack).await;
        assert!(result.success);
    }
}

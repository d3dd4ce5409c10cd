//! Workflow Orchestrator.
//!
//! A task graph is walked one "ready set" at a time, each unit dispatched
//! concurrently, outputs folded back into the shared context only after the
//! whole wave joins. Sub-workflow invocation recurses back into `run`
//! through `subworkflow::execute`; rather than `tokio::spawn` (which would
//! force every future in that cycle to be `Send`), wave dispatch uses
//! `futures::future::join_all` over plain async blocks, a non-`Send`
//! recursion shape enabled by `#[async_recursion(?Send)]`.

use crate::call_stack::CallStack;
use crate::catalog::{TaskCatalog, WorkflowCatalog};
use crate::config::EngineConfig;
use crate::control_flow;
use crate::events::{EventNotifier, TaskStatus, WorkflowEvent};
use crate::executor::cached_http::{CacheConfig, CachedHttpExecutor};
use crate::executor::transform;
use crate::graph::ExecutionGraph;
use crate::model::{
    OrchestrationCost, TaskExecutionResult, TaskStep, TaskTarget, TaskType, TemplateContext,
    WorkflowExecutionResult, WorkflowResource, duration_since_ms,
};
use crate::retry::RetryPolicy;
use crate::subworkflow;
use crate::template;
use async_recursion::async_recursion;
use chrono::Utc;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use uuid::Uuid;

enum EffectiveTarget {
    TaskRef(String),
    WorkflowRef(String),
}

pub struct Orchestrator {
    http: Arc<CachedHttpExecutor>,
    tasks: Arc<TaskCatalog>,
    workflows: Arc<WorkflowCatalog>,
    config: Arc<EngineConfig>,
    notifier: Arc<dyn EventNotifier>,
    semaphore: Option<Arc<Semaphore>>,
}

impl Orchestrator {
    #[must_use]
    pub fn new(
        http: Arc<CachedHttpExecutor>,
        tasks: Arc<TaskCatalog>,
        workflows: Arc<WorkflowCatalog>,
        config: Arc<EngineConfig>,
        notifier: Arc<dyn EventNotifier>,
    ) -> Self {
        let semaphore = config.max_concurrent_tasks.map(|n| Arc::new(Semaphore::new(n)));
        Self {
            http,
            tasks,
            workflows,
            config,
            notifier,
            semaphore,
        }
    }

    pub(crate) fn workflows(&self) -> &WorkflowCatalog {
        &self.workflows
    }

    /// Top-level entry point: a fresh call stack seeded with this workflow's
    /// own name, so a workflow that recurses into itself via `workflowRef`
    /// is caught the same way a deeper cycle would be.
    pub async fn execute(&self, workflow: &WorkflowResource, input: Value) -> WorkflowExecutionResult {
        let execution_id = Uuid::new_v4().to_string();
        let mut call_stack = CallStack::new(self.config.max_sub_workflow_depth);
        if let Err(e) = call_stack.push(qualified_name(workflow)) {
            return WorkflowExecutionResult::failed(vec![e.to_string()]);
        }
        let ctx = TemplateContext::new(input);
        self.run(workflow, ctx, call_stack, execution_id).await
    }

    /// The wave-based execution loop: build the graph, then repeatedly
    /// dispatch every task whose dependencies have resolved until none
    /// remain ready. Recurses into itself through `subworkflow::execute`
    /// for `workflowRef` steps;
    /// `?Send` keeps that cycle from requiring every future it touches to be
    /// thread-movable across the recursive engine loop.
    #[async_recursion(?Send)]
    #[tracing::instrument(skip_all, fields(workflow = %qualified_name(workflow)))]
    pub(crate) async fn run(
        &self,
        workflow: &WorkflowResource,
        ctx: TemplateContext,
        call_stack: CallStack,
        execution_id: String,
    ) -> WorkflowExecutionResult {
        let total_start = Instant::now();
        self.notifier
            .notify(WorkflowEvent::WorkflowStarted {
                execution_id: execution_id.clone(),
                workflow_name: qualified_name(workflow),
                started_at: Utc::now(),
            })
            .await;

        let graph_start = Instant::now();
        let graph = match ExecutionGraph::build(workflow) {
            Ok(g) => g,
            Err(e) => {
                self.notifier
                    .notify(WorkflowEvent::WorkflowCompleted {
                        execution_id,
                        workflow_name: qualified_name(workflow),
                        success: false,
                        completed_at: Utc::now(),
                    })
                    .await;
                return WorkflowExecutionResult::failed(vec![e.to_string()]);
            }
        };
        let graph_build_duration = graph_start.elapsed();

        if workflow.spec.tasks.is_empty() {
            let output = self.build_output(workflow, &ctx).await.unwrap_or(Value::Object(Default::default()));
            let total = total_start.elapsed();
            self.notifier
                .notify(WorkflowEvent::WorkflowCompleted {
                    execution_id,
                    workflow_name: qualified_name(workflow),
                    success: true,
                    completed_at: Utc::now(),
                })
                .await;
            return WorkflowExecutionResult {
                success: true,
                output,
                task_results: HashMap::new(),
                errors: Vec::new(),
                total_duration_ms: total.as_millis() as u64,
                graph_build_duration_ms: graph_build_duration.as_millis() as u64,
                orchestration_cost: OrchestrationCost::compute(graph_build_duration, Duration::ZERO, Duration::ZERO, total),
            };
        }

        let mut completed: HashSet<String> = HashSet::new();
        let mut failed: HashSet<String> = HashSet::new();
        let mut results: HashMap<String, TaskExecutionResult> = HashMap::new();

        loop {
            let ready: Vec<&TaskStep> = workflow
                .spec
                .tasks
                .iter()
                .filter(|t| !completed.contains(&t.id) && !failed.contains(&t.id))
                .filter(|t| {
                    graph
                        .dependencies(&t.id)
                        .iter()
                        .all(|d| completed.contains(d) || failed.contains(d))
                })
                .collect();

            if ready.is_empty() {
                break;
            }

            let wave = ready.into_iter().map(|step| {
                let dependency_failed = step.depends_on.iter().any(|d| failed.contains(d));
                let call_stack = call_stack.clone();
                async move {
                    let result = self
                        .execute_unit(
                            step,
                            &ctx,
                            call_stack,
                            dependency_failed,
                            &workflow.metadata.namespace,
                            &execution_id,
                        )
                        .await;
                    (step.id.clone(), result)
                }
            });
            let wave_results = futures::future::join_all(wave).await;

            for (id, result) in wave_results {
                if result.success {
                    completed.insert(id.clone());
                } else {
                    failed.insert(id.clone());
                }
                ctx.insert_output(&id, result.output_value()).await;

                let status = match (result.was_skipped, result.success) {
                    (true, true) => TaskStatus::Skipped,
                    (_, true) => TaskStatus::Succeeded,
                    (true, false) => TaskStatus::Skipped,
                    (false, false) => TaskStatus::Failed,
                };
                self.notifier
                    .notify(WorkflowEvent::TaskCompleted {
                        execution_id: execution_id.clone(),
                        task_id: id.clone(),
                        status,
                        completed_at: result.completed_at,
                    })
                    .await;
                if result.success {
                    for dependent in graph.dependents(&id) {
                        self.notifier
                            .notify(WorkflowEvent::SignalFlow {
                                execution_id: execution_id.clone(),
                                from_task_id: id.clone(),
                                to_task_id: dependent,
                            })
                            .await;
                    }
                }
                results.insert(id, result);
            }
        }

        let teardown_start = Instant::now();
        let output = self.build_output(workflow, &ctx).await;
        let teardown_duration = teardown_start.elapsed();

        let success = failed.is_empty();
        let errors: Vec<String> = results
            .values()
            .filter(|r| !r.success && !r.was_skipped)
            .flat_map(|r| r.errors.clone())
            .collect();
        let total = total_start.elapsed();

        self.notifier
            .notify(WorkflowEvent::WorkflowCompleted {
                execution_id,
                workflow_name: qualified_name(workflow),
                success,
                completed_at: Utc::now(),
            })
            .await;

        WorkflowExecutionResult {
            success,
            output: output.unwrap_or(Value::Object(Default::default())),
            task_results: results,
            errors,
            total_duration_ms: total.as_millis() as u64,
            graph_build_duration_ms: graph_build_duration.as_millis() as u64,
            orchestration_cost: OrchestrationCost::compute(graph_build_duration, teardown_duration, Duration::ZERO, total),
        }
    }

    /// One task unit: dependency-failure skip, condition, switch/taskRef
    /// resolution, then dispatch. The global semaphore is acquired only
    /// around the actual dispatch, after condition/switch evaluation, so
    /// neither counts against the concurrency budget.
    #[allow(clippy::too_many_arguments)]
    async fn execute_unit(
        &self,
        step: &TaskStep,
        ctx: &TemplateContext,
        call_stack: CallStack,
        dependency_failed: bool,
        parent_namespace: &str,
        execution_id: &str,
    ) -> TaskExecutionResult {
        let started_at = Utc::now();
        self.notifier
            .notify(WorkflowEvent::TaskStarted {
                execution_id: execution_id.to_string(),
                task_id: step.id.clone(),
                started_at,
            })
            .await;

        if dependency_failed {
            return TaskExecutionResult::dependency_failure(started_at);
        }

        if let Some(condition) = &step.condition {
            match control_flow::evaluate_condition(&condition.if_expr, ctx).await {
                Ok(outcome) if !outcome.should_execute => {
                    return TaskExecutionResult::skipped(started_at, "condition evaluated to false");
                }
                Ok(_) => {}
                Err(e) => return TaskExecutionResult::failure(started_at, e.to_string()),
            }
        }

        let effective_target = match &step.target {
            TaskTarget::TaskRef(s) => EffectiveTarget::TaskRef(s.clone()),
            TaskTarget::WorkflowRef(r) => EffectiveTarget::WorkflowRef(r.clone()),
            TaskTarget::Switch(switch) => match control_flow::evaluate_switch(switch, ctx).await {
                Ok(r) => EffectiveTarget::TaskRef(r),
                Err(e) => return TaskExecutionResult::failure(started_at, e.to_string()),
            },
        };

        let _permit = match &self.semaphore {
            Some(sem) => Some(sem.clone().acquire_owned().await.expect("semaphore not closed")),
            None => None,
        };

        match effective_target {
            EffectiveTarget::WorkflowRef(reference) => {
                subworkflow::execute(self, step, &reference, ctx, parent_namespace, execution_id, call_stack).await
            }
            EffectiveTarget::TaskRef(task_ref) => {
                if let Some(for_each) = &step.for_each {
                    self.execute_for_each(for_each, &task_ref, step, ctx, started_at).await
                } else {
                    self.dispatch_effective(&task_ref, step, ctx).await
                }
            }
        }
    }

    /// Fan out over `forEach.items`, aggregating per-item outcomes into
    /// `{results, itemCount, successCount, failureCount}`.
    /// Not reachable for `workflowRef` steps — those are handled before this
    /// point, since nesting a sub-workflow invocation in a fan-out would
    /// require `evaluate_for_each`'s body to be `Send`, which the
    /// orchestrator's own recursion deliberately is not.
    async fn execute_for_each(
        &self,
        for_each: &crate::model::ForEachBlock,
        task_ref: &str,
        step: &TaskStep,
        ctx: &TemplateContext,
        started_at: chrono::DateTime<Utc>,
    ) -> TaskExecutionResult {
        let outcomes = control_flow::evaluate_for_each(for_each, ctx, |child_ctx, _index| {
            let task_ref = task_ref.to_string();
            async move { self.dispatch_effective(&task_ref, step, &child_ctx).await }
        })
        .await;

        match outcomes {
            Ok(outcomes) => aggregate_for_each(started_at, outcomes),
            Err(e) => TaskExecutionResult::failure(started_at, e.to_string()),
        }
    }

    /// Resolve `step.input` against `ctx`, then run the task (http or
    /// transform) looked up from the catalog by `task_ref`.
    async fn dispatch_effective(&self, task_ref: &str, step: &TaskStep, ctx: &TemplateContext) -> TaskExecutionResult {
        let started_at = Utc::now();

        let merged_input = match self.resolve_inputs(&step.input, ctx).await {
            Ok(v) => v,
            Err(e) => return TaskExecutionResult::failure(started_at, e.to_string()),
        };
        let task_ctx = ctx.with_input(merged_input);

        let Some(resource) = self.tasks.get(task_ref) else {
            return TaskExecutionResult::failure(started_at, format!("taskRef '{task_ref}' not found in catalog"));
        };

        match resource.spec.task_type {
            TaskType::Http => {
                let Some(http) = &resource.spec.http else {
                    return TaskExecutionResult::failure(
                        started_at,
                        format!("task '{task_ref}' is typed http but declares no http definition"),
                    );
                };
                let retry = RetryPolicy {
                    max_retry_count: self.config.retry.max_retry_count,
                    initial_delay_ms: self.config.retry.initial_delay_ms,
                    backoff_multiplier: self.config.retry.backoff_multiplier,
                    max_delay_ms: self.config.retry.max_delay_ms,
                }
                .with_override(step.retry.as_ref());
                let breaker_config = crate::circuit_breaker::CircuitBreakerConfig {
                    failure_threshold: self.config.circuit_breaker.failure_threshold,
                    sampling_duration_ms: self.config.circuit_breaker.sampling_duration_ms,
                    break_duration_ms: self.config.circuit_breaker.break_duration_ms,
                    half_open_requests: self.config.circuit_breaker.half_open_requests,
                }
                .with_override(step.circuit_breaker.as_ref());
                let cache_config = CacheConfig {
                    ttl_ms: self.config.cache.default_ttl_ms,
                    stale_ttl_ms: self.config.cache.default_stale_ttl_ms,
                    ..CacheConfig::default()
                }
                .with_override(step.cache.as_ref());

                self.http
                    .execute(task_ref, http, &task_ctx, retry, breaker_config, step.timeout.as_deref(), &cache_config)
                    .await
            }
            TaskType::Transform => {
                let Some(transform_def) = &resource.spec.transform else {
                    return TaskExecutionResult::failure(
                        started_at,
                        format!("task '{task_ref}' is typed transform but declares no transform definition"),
                    );
                };
                match transform::execute(transform_def, &task_ctx).await {
                    Ok(value) => {
                        let completed_at = Utc::now();
                        TaskExecutionResult {
                            success: true,
                            output: as_output_map(value),
                            errors: Vec::new(),
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
                    Err(e) => TaskExecutionResult::failure(started_at, e.to_string()),
                }
            }
        }
    }

    async fn resolve_inputs(
        &self,
        input: &indexmap::IndexMap<String, String>,
        ctx: &TemplateContext,
    ) -> template::Result<Value> {
        let mut map = serde_json::Map::new();
        for (key, tmpl) in input {
            let resolved = template::resolve(tmpl, ctx).await?;
            map.insert(key.clone(), reparse(&resolved));
        }
        Ok(Value::Object(map))
    }

    async fn build_output(&self, workflow: &WorkflowResource, ctx: &TemplateContext) -> template::Result<Value> {
        let mut map = serde_json::Map::new();
        for (key, tmpl) in &workflow.spec.output {
            let resolved = template::resolve(tmpl, ctx).await?;
            map.insert(key.clone(), reparse(&resolved));
        }
        Ok(Value::Object(map))
    }
}

fn qualified_name(workflow: &WorkflowResource) -> String {
    format!("{}/{}", workflow.metadata.namespace, workflow.metadata.name)
}

/// Downstream code re-parses strings starting with `{` or `[` to recover
/// structured values, since template resolution always yields a string.
fn reparse(resolved: &str) -> Value {
    let trimmed = resolved.trim_start();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        serde_json::from_str(resolved).unwrap_or_else(|_| Value::String(resolved.to_string()))
    } else {
        Value::String(resolved.to_string())
    }
}

fn as_output_map(value: Value) -> serde_json::Map<String, Value> {
    match value {
        Value::Object(map) => map,
        Value::Array(_) => {
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

fn aggregate_for_each(started_at: chrono::DateTime<Utc>, outcomes: Vec<TaskExecutionResult>) -> TaskExecutionResult {
    let completed_at = Utc::now();
    let success_count = outcomes.iter().filter(|o| o.success).count();
    let failure_count = outcomes.len() - success_count;
    let errors: Vec<String> = outcomes.iter().flat_map(|o| o.errors.clone()).collect();
    let results: Vec<Value> = outcomes.iter().map(TaskExecutionResult::output_value).collect();

    let mut output = serde_json::Map::new();
    output.insert("results".to_string(), Value::Array(results));
    output.insert("itemCount".to_string(), Value::from(outcomes.len()));
    output.insert("successCount".to_string(), Value::from(success_count));
    output.insert("failureCount".to_string(), Value::from(failure_count));

    TaskExecutionResult {
        success: failure_count == 0,
        output,
        errors,
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

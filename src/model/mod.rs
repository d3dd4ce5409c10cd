//! Data model shared by every component of the execution core.
//!
//! Mirrors the grounding codebase's split between a wire-level definition
//! module (`workflow.rs`/`task.rs` here, `serverless_workflow_core` there)
//! and the runtime context/result types the engine mutates during a run.

pub mod context;
pub mod result;
pub mod task;
pub mod workflow;

pub use context::TemplateContext;
pub use result::{
    ErrorKind, OrchestrationCost, TaskErrorInfo, TaskExecutionResult, WorkflowExecutionResult,
    duration_since_ms,
};
pub use task::{
    Aggregation, FilterOp, HttpDefinition, JoinType, SortOrder, TaskResource, TaskResourceSpec,
    TaskType, TransformDefinition, TransformOperation,
};
pub use workflow::{
    CacheOverride, CircuitBreakerOverride, Condition, ForEachBlock, RetryOverride,
    ResourceMetadata, SwitchBlock, SwitchCase, TaskStep, TaskTarget, WorkflowResource, WorkflowSpec,
};

//! `TemplateContext` — the input + task-output bag the template resolver
//! reads against.
//!
//! Mirrors the grounding codebase's `Context` (an `Arc<RwLock<..>>` bag
//! mutated as tasks complete) but holds two separate maps instead of one
//! merged JSON object, since this spec's template grammar distinguishes
//! `input.*` from `tasks.<id>.output.*` rather than addressing one flat
//! document.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Read-mostly after construction; task outputs are inserted only at wave
/// boundaries by the orchestrator.
#[derive(Clone)]
pub struct TemplateContext {
    input: Arc<serde_json::Value>,
    task_outputs: Arc<RwLock<HashMap<String, serde_json::Value>>>,
}

impl TemplateContext {
    #[must_use]
    pub fn new(input: serde_json::Value) -> Self {
        Self {
            input: Arc::new(input),
            task_outputs: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    #[must_use]
    pub fn input(&self) -> &serde_json::Value {
        &self.input
    }

    pub async fn insert_output(&self, task_id: &str, output: serde_json::Value) {
        self.task_outputs
            .write()
            .await
            .insert(task_id.to_string(), output);
    }

    pub async fn get_output(&self, task_id: &str) -> Option<serde_json::Value> {
        self.task_outputs.read().await.get(task_id).cloned()
    }

    pub async fn has_output(&self, task_id: &str) -> bool {
        self.task_outputs.read().await.contains_key(task_id)
    }

    /// A context with a new input but the same shared task-output map —
    /// used by `forEach` iterations, whose items live under `input` while
    /// dependency outputs remain visible.
    #[must_use]
    pub fn with_input(&self, input: serde_json::Value) -> Self {
        Self {
            input: Arc::new(input),
            task_outputs: Arc::clone(&self.task_outputs),
        }
    }

    /// A context with a new input and a brand-new, empty task-output map —
    /// used for sub-workflow invocation, which must not leak the parent's
    /// task outputs into the child.
    #[must_use]
    pub fn isolated(input: serde_json::Value) -> Self {
        Self::new(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn output_round_trips() {
        let ctx = TemplateContext::new(serde_json::json!({"a": 1}));
        assert!(!ctx.has_output("x").await);
        ctx.insert_output("x", serde_json::json!({"y": 2})).await;
        assert_eq!(ctx.get_output("x").await, Some(serde_json::json!({"y": 2})));
    }

    #[tokio::test]
    async fn with_input_shares_outputs() {
        let ctx = TemplateContext::new(serde_json::json!({}));
        ctx.insert_output("a", serde_json::json!(1)).await;
        let child = ctx.with_input(serde_json::json!({"item": 1}));
        assert_eq!(child.get_output("a").await, Some(serde_json::json!(1)));
    }

    #[tokio::test]
    async fn isolated_drops_outputs() {
        let ctx = TemplateContext::new(serde_json::json!({}));
        ctx.insert_output("a", serde_json::json!(1)).await;
        let child = TemplateContext::isolated(serde_json::json!({}));
        assert!(!child.has_output("a").await);
    }
}

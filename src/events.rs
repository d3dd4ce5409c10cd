//! Event Notifier hook interface.
//!
//! Consumed only by external collaborators (dashboards, alerting, anomaly
//! detection — those live outside this crate); the core only defines the
//! shape and guarantees notifier exceptions never abort orchestration. A
//! fire-and-forget callout, awaited sequentially rather than backed by a
//! durable event log.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Succeeded,
    Failed,
    Skipped,
    Cancelled,
}

#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    WorkflowStarted {
        execution_id: String,
        workflow_name: String,
        started_at: DateTime<Utc>,
    },
    WorkflowCompleted {
        execution_id: String,
        workflow_name: String,
        success: bool,
        completed_at: DateTime<Utc>,
    },
    TaskStarted {
        execution_id: String,
        task_id: String,
        started_at: DateTime<Utc>,
    },
    TaskCompleted {
        execution_id: String,
        task_id: String,
        status: TaskStatus,
        completed_at: DateTime<Utc>,
    },
    /// Edge activation: `from_task_id`'s output became available to
    /// `to_task_id`, emitted after the output is inserted into the shared
    /// context, so consumers never observe an edge before its source.
    SignalFlow {
        execution_id: String,
        from_task_id: String,
        to_task_id: String,
    },
    /// Opaque structured payload; anomaly detection lives outside the core
    /// and simply consumes this event.
    AnomalyDetected {
        execution_id: String,
        detail: serde_json::Value,
    },
}

/// Fire-and-forget callout invoked by the orchestrator. Implementations
/// must not let their own errors propagate; the orchestrator does not call
/// this trait's methods inside a `?`-propagating context, so any panic or
/// error here is the implementer's responsibility to contain.
#[async_trait]
pub trait EventNotifier: Send + Sync {
    async fn notify(&self, event: WorkflowEvent);
}

/// Default notifier used when the embedder supplies none; logs at `debug`
/// and otherwise does nothing.
#[derive(Debug, Default)]
pub struct NoopNotifier;

#[async_trait]
impl EventNotifier for NoopNotifier {
    async fn notify(&self, event: WorkflowEvent) {
        tracing::debug!(?event, "workflow event (no notifier configured)");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingNotifier(Arc<AtomicUsize>);

    #[async_trait]
    impl EventNotifier for CountingNotifier {
        async fn notify(&self, _event: WorkflowEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn notifier_is_invoked_for_each_event() {
        let count = Arc::new(AtomicUsize::new(0));
        let notifier = CountingNotifier(count.clone());
        notifier
            .notify(WorkflowEvent::WorkflowStarted {
                execution_id: "e1".to_string(),
                workflow_name: "w".to_string(),
                started_at: Utc::now(),
            })
            .await;
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}

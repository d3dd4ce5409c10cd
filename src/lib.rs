//! # corvid-flow - Declarative Workflow Orchestration Engine
//!
//! corvid-flow executes declaratively-defined workflows as directed acyclic
//! graphs of HTTP calls, transform pipelines, switches, and sub-workflow
//! invocations, with per-task retry, circuit breaking, and response caching.
//!
//! ## Features
//!
//! - **Graph-Based Execution**: Workflows are built into a DAG and run wave
//!   by wave, each wave's ready tasks dispatched concurrently
//! - **Templated Data Flow**: `{{input...}}` / `{{tasks.<id>.output...}}`
//!   expressions wire task outputs into downstream inputs
//! - **Resilient HTTP**: configurable retry with exponential backoff and a
//!   per-taskRef circuit breaker
//! - **Smart Caching**: task outputs are cached by a deterministic key, with
//!   optional stale-while-revalidate
//! - **Control Flow**: conditions, switches, and bounded-concurrency
//!   `forEach` fan-out
//! - **Sub-Workflows**: `workflowRef` steps recurse into another catalog
//!   entry with an isolated context and a cycle/depth-guarded call stack
//!
//! ## Core Modules
//!
//! - [`orchestrator`] - the wave-based execution loop
//! - [`subworkflow`] - `workflowRef` dispatch and recursion
//! - [`graph`] - DAG construction and topological ordering
//! - [`executor`] - per-task-type dispatch (HTTP, transform)
//! - [`cache`] - task-output caching
//! - [`retry`] - backoff policy
//! - [`circuit_breaker`] - per-taskRef circuit breaker state machine
//! - [`control_flow`] - condition/switch/forEach evaluation
//! - [`template`] - `{{...}}` expression parsing and resolution
//! - [`model`] - wire-level resource definitions and runtime result types
//! - [`validator`] - pre-execution structural validation
//! - [`config`] - process-wide tunables
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use corvid_flow::orchestrator::Orchestrator;
//! use corvid_flow::catalog::{TaskCatalog, WorkflowCatalog};
//! use corvid_flow::circuit_breaker::CircuitBreakerRegistry;
//! use corvid_flow::config::EngineConfig;
//! use corvid_flow::events::NoopNotifier;
//! use corvid_flow::executor::cached_http::CachedHttpExecutor;
//! use corvid_flow::executor::http::HttpExecutor;
//! use corvid_flow::providers::cache_mem::InMemoryCache;
//! use std::sync::Arc;
//!
//! # async fn example(workflow: corvid_flow::model::WorkflowResource) {
//! let http = Arc::new(HttpExecutor::new(reqwest::Client::new(), Arc::new(CircuitBreakerRegistry::new())));
//! let cached_http = Arc::new(CachedHttpExecutor::new(http, Arc::new(InMemoryCache::new())));
//!
//! let orchestrator = Orchestrator::new(
//!     cached_http,
//!     Arc::new(TaskCatalog::new(vec![])),
//!     Arc::new(WorkflowCatalog::new(vec![])),
//!     Arc::new(EngineConfig::default()),
//!     Arc::new(NoopNotifier),
//! );
//!
//! let result = orchestrator.execute(&workflow, serde_json::json!({})).await;
//! println!("success: {}", result.success);
//! # }
//! ```
//!
//! ## Configuration
//!
//! corvid-flow can be configured via:
//! - Configuration file (`corvid-flow.yaml`)
//! - Environment variables (prefix: `CORVID_FLOW__`)
//!
//! See [`config::EngineConfig`] for available options.

pub mod cache;
pub mod call_stack;
pub mod catalog;
pub mod circuit_breaker;
pub mod config;
pub mod control_flow;
pub mod duration;
pub mod events;
pub mod executor;
pub mod graph;
pub mod model;
pub mod orchestrator;
pub mod providers;
pub mod retry;
pub mod subworkflow;
pub mod template;
pub mod validator;
pub mod workflow_ref;

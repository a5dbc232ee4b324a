//! # waveflow — an active-path workflow engine
//!
//! `waveflow` executes workflows described as directed graphs of typed nodes.
//! Condition, Switch and Split nodes choose which of their outgoing edges are
//! live for a given run; nodes reachable only through dead edges are skipped,
//! never executed and never reported as failed.
//!
//! - **Validation**: duplicate ids, dangling edges, structural cycles (on every
//!   branch, nested bodies included) and size limits are rejected before a run.
//! - **Scheduling**: independent nodes run concurrently on a tokio `JoinSet`
//!   with an optional engine-wide concurrency cap, whole-run and per-node timeouts,
//!   fail-fast and cooperative cancellation.
//! - **Nodes**: value/transform, control flow, iteration, parallel fan-out and
//!   joins, retry/try-catch/timeout, shared-state and a policy-checked HTTP node.
//! - **Observers**: synchronous lifecycle hooks; failures in an observer never
//!   affect the run.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use serde_json::json;
//! use waveflow::{Graph, NodeType, WorkflowEngine};
//!
//! #[tokio::main]
//! async fn main() {
//!     let graph = Graph::new()
//!         .node("age", NodeType::Number, json!({"value": 25}))
//!         .node("check", NodeType::Condition, json!({"condition": ">=18"}))
//!         .node("adult", NodeType::TextInput, json!({"value": "adult"}))
//!         .node("minor", NodeType::TextInput, json!({"value": "minor"}))
//!         .edge("age", "check")
//!         .handle_edge("check", "true", "adult")
//!         .handle_edge("check", "false", "minor");
//!
//!     let result = WorkflowEngine::new().run(&graph, json!(null)).await.unwrap();
//!     println!("{:?}", result.output("adult"));
//! }
//! ```

pub mod core;
pub mod dsl;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod graph;
pub mod nodes;
pub mod security;
pub mod template;

pub use crate::core::{
    create_event_channel, ChannelObserver, DefaultSubGraphRunner, EngineConfig, ExecutionResult,
    FakeIdGenerator, GraphEngineEvent, HttpClientProvider, HttpPoolConfig, HttpTransportConfig,
    IdGenerator, MergePolicy, NodeStatus, ObserverSet, OverallStatus, RealIdGenerator,
    RuntimeContext, SharedState, StateSnapshot, SubGraphRunner, TracingObserver,
    WorkflowDispatcher, WorkflowObserver,
};
pub use crate::dsl::{parse_workflow, WorkflowFormat};
pub use crate::engine::{WorkflowEngine, WorkflowEngineBuilder};
pub use crate::error::{NodeError, NodeResult, WorkflowError, WorkflowResult};
pub use crate::graph::{build_graph, validate_graph, Edge, EdgeHandle, Graph, Node, NodeType, WorkflowDefinition};
pub use crate::nodes::{ExecutionContext, NodeExecutor, NodeExecutorRegistry, NodeInput, NodeRunResult};
pub use crate::security::{NetworkPolicy, NetworkPolicyMode};

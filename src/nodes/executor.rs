use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;

use crate::core::config::EngineConfig;
use crate::core::runtime_context::RuntimeContext;
use crate::core::shared_state::SharedState;
use crate::error::NodeError;
use crate::graph::{EdgeHandle, Node, NodeType, WorkflowDefinition};
use crate::template::TemplateEngine;

/// Behaviour of one node type.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    async fn execute(
        &self,
        node: &Node,
        input: NodeInput,
        ctx: &ExecutionContext,
    ) -> Result<NodeRunResult, NodeError>;
}

/// What a node receives from its predecessors.
#[derive(Debug, Clone, Default)]
pub struct NodeInput {
    /// Run input for roots, the single live predecessor's output, or an
    /// object keyed by predecessor id when several are live.
    pub value: Value,
    /// Output of every live, succeeded predecessor, by id.
    pub sources: Map<String, Value>,
    /// Predecessors that ended `Failed`.
    pub failed: Vec<String>,
}

impl NodeInput {
    pub fn new(value: Value) -> Self {
        Self {
            value,
            ..Default::default()
        }
    }
}

/// A node's output plus the outgoing handle it selects.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeRunResult {
    pub output: Value,
    pub handle: EdgeHandle,
}

impl NodeRunResult {
    pub fn output(output: Value) -> Self {
        Self {
            output,
            handle: EdgeHandle::Default,
        }
    }

    pub fn branch(output: Value, handle: impl Into<String>) -> Self {
        Self {
            output,
            handle: EdgeHandle::branch(handle),
        }
    }

    /// Like [`NodeRunResult::branch`], but unlabelled edges stay live too.
    pub fn route(output: Value, handle: impl Into<String>) -> Self {
        Self {
            output,
            handle: EdgeHandle::route(handle),
        }
    }

    pub fn with_handle(output: Value, handle: EdgeHandle) -> Self {
        Self { output, handle }
    }
}

/// Everything an executor may touch while it runs.
#[derive(Clone)]
pub struct ExecutionContext {
    pub runtime: Arc<RuntimeContext>,
    pub state: Arc<SharedState>,
    /// Cancelled when the node's work is abandoned (race lost, timeout,
    /// fail-fast). Check it before writing shared state.
    pub cancel: CancellationToken,
    pub definition: Arc<WorkflowDefinition>,
    pub node_id: String,
    /// Scoped id used in observer events: `parent/child` for nested runs.
    pub node_path: String,
    pub depth: usize,
}

impl ExecutionContext {
    pub fn config(&self) -> &EngineConfig {
        &self.runtime.config
    }

    pub fn templates(&self) -> &TemplateEngine {
        &self.runtime.templates
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Prebuilt body graph stored under `slot` of the current node.
    pub fn nested(&self, slot: &str) -> Result<Arc<WorkflowDefinition>, NodeError> {
        self.definition.nested(&self.node_id, slot).ok_or_else(|| {
            NodeError::ConfigError(format!("node '{}' has no '{}' graph", self.node_id, slot))
        })
    }

    /// Run the body graph in `slot` to completion and return its output.
    ///
    /// `token` should be a child of [`ExecutionContext::cancel`] so the
    /// caller can abandon this run alone.
    pub async fn run_sub_graph(
        &self,
        slot: &str,
        input: Value,
        token: CancellationToken,
    ) -> Result<Value, NodeError> {
        let body = self.nested(slot)?;
        let runner = Arc::clone(&self.runtime.sub_graph_runner);
        runner.run_sub_graph(self, body, input, token).await
    }
}

/// Executors keyed by node type.
pub struct NodeExecutorRegistry {
    executors: HashMap<NodeType, Arc<dyn NodeExecutor>>,
}

impl NodeExecutorRegistry {
    /// Registry with every built-in executor.
    pub fn new() -> Self {
        use super::{concurrency, control_flow, http, iteration, resilience, stateful, value};

        let mut registry = Self::empty();
        // Value / transform
        registry.register(NodeType::Number, Arc::new(value::NumberExecutor));
        registry.register(NodeType::TextInput, Arc::new(value::TextInputExecutor));
        registry.register(NodeType::Math, Arc::new(value::MathExecutor));
        registry.register(NodeType::TextOp, Arc::new(value::TextOpExecutor));
        registry.register(NodeType::Extract, Arc::new(value::ExtractExecutor));
        registry.register(NodeType::Transform, Arc::new(value::TransformExecutor));
        registry.register(NodeType::Parse, Arc::new(value::ParseExecutor));
        registry.register(NodeType::Expression, Arc::new(value::ExpressionExecutor));
        registry.register(NodeType::Map, Arc::new(value::MapExecutor));
        registry.register(NodeType::Reduce, Arc::new(value::ReduceExecutor));
        registry.register(NodeType::Filter, Arc::new(value::FilterExecutor));
        registry.register(NodeType::Sort, Arc::new(value::SortExecutor));
        registry.register(NodeType::Slice, Arc::new(value::SliceExecutor));
        // Control flow
        registry.register(NodeType::Condition, Arc::new(control_flow::ConditionExecutor));
        registry.register(NodeType::Switch, Arc::new(control_flow::SwitchExecutor));
        // Iteration
        registry.register(NodeType::ForEach, Arc::new(iteration::ForEachExecutor));
        registry.register(NodeType::WhileLoop, Arc::new(iteration::WhileLoopExecutor));
        // Concurrency
        registry.register(NodeType::Parallel, Arc::new(concurrency::ParallelExecutor));
        registry.register(NodeType::Join, Arc::new(concurrency::JoinExecutor));
        registry.register(NodeType::Split, Arc::new(concurrency::SplitExecutor));
        // Resilience
        registry.register(NodeType::Retry, Arc::new(resilience::RetryExecutor));
        registry.register(NodeType::TryCatch, Arc::new(resilience::TryCatchExecutor));
        registry.register(NodeType::Timeout, Arc::new(resilience::TimeoutExecutor));
        registry.register(NodeType::Delay, Arc::new(resilience::DelayExecutor));
        // Stateful
        registry.register(NodeType::Variable, Arc::new(stateful::VariableExecutor));
        registry.register(NodeType::Accumulator, Arc::new(stateful::AccumulatorExecutor));
        registry.register(NodeType::Counter, Arc::new(stateful::CounterExecutor));
        registry.register(NodeType::Cache, Arc::new(stateful::CacheExecutor));
        // Network
        registry.register(NodeType::Http, Arc::new(http::HttpExecutor));
        registry
    }

    pub fn empty() -> Self {
        NodeExecutorRegistry {
            executors: HashMap::new(),
        }
    }

    /// Register an executor, replacing any previous one for `node_type`.
    pub fn register(&mut self, node_type: NodeType, executor: Arc<dyn NodeExecutor>) {
        self.executors.insert(node_type, executor);
    }

    pub fn get(&self, node_type: NodeType) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(&node_type).cloned()
    }

    pub fn len(&self) -> usize {
        self.executors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl Default for NodeExecutorRegistry {
    fn default() -> Self {
        Self::new()
    }
}

//! Engine facade.
//!
//! [`WorkflowEngine`] owns the services every run shares (config, executor
//! registry, HTTP transports, observers) and turns graph documents into
//! validated [`WorkflowDefinition`]s that can be executed many times.

use std::sync::Arc;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::core::{
    EngineConfig, ExecutionResult, HttpClientProvider, HttpPoolConfig, HttpTransportConfig,
    IdGenerator, ObserverSet, RuntimeContext, SharedState, SubGraphRunner, WorkflowDispatcher,
    WorkflowObserver,
};
use crate::dsl::{parse_workflow, WorkflowFormat};
use crate::error::{WorkflowError, WorkflowResult};
use crate::graph::{build_graph, Graph, NodeType, WorkflowDefinition};
use crate::nodes::{NodeExecutor, NodeExecutorRegistry};
use crate::security::NetworkPolicy;

#[derive(Clone)]
pub struct WorkflowEngine {
    runtime: Arc<RuntimeContext>,
}

impl Default for WorkflowEngine {
    fn default() -> Self {
        Self {
            runtime: Arc::new(RuntimeContext::default()),
        }
    }
}

impl WorkflowEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> WorkflowEngineBuilder {
        WorkflowEngineBuilder::default()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.runtime.config
    }

    pub fn runtime(&self) -> &Arc<RuntimeContext> {
        &self.runtime
    }

    /// Validate `graph` (nested bodies included) and index it for execution.
    pub fn prepare(&self, graph: &Graph) -> WorkflowResult<Arc<WorkflowDefinition>> {
        let definition = build_graph(graph, &self.runtime.config.graph_limits())?;
        tracing::debug!(
            nodes = definition.node_count(),
            edges = definition.edges.len(),
            "workflow prepared"
        );
        Ok(Arc::new(definition))
    }

    /// Parse a YAML or JSON document, then [`prepare`](Self::prepare) it.
    pub fn prepare_document(
        &self,
        content: &str,
        format: WorkflowFormat,
    ) -> WorkflowResult<Arc<WorkflowDefinition>> {
        let graph = parse_workflow(content, format)?;
        self.prepare(&graph)
    }

    /// A dispatcher for one run; use it to grab the cancel token or share
    /// state with a previous run before calling `run`.
    pub fn dispatcher(&self, definition: &Arc<WorkflowDefinition>) -> WorkflowDispatcher {
        WorkflowDispatcher::new(Arc::clone(definition), Arc::clone(&self.runtime))
    }

    pub async fn execute(&self, definition: &Arc<WorkflowDefinition>, input: Value) -> ExecutionResult {
        self.dispatcher(definition).run(input).await
    }

    /// Like [`execute`](Self::execute); cancelling `token` aborts the run.
    pub async fn execute_with_cancel(
        &self,
        definition: &Arc<WorkflowDefinition>,
        input: Value,
        token: CancellationToken,
    ) -> ExecutionResult {
        self.dispatcher(definition)
            .with_cancel_token(token)
            .run(input)
            .await
    }

    /// Run against caller-owned shared state, e.g. to carry counters across runs.
    pub async fn execute_with_state(
        &self,
        definition: &Arc<WorkflowDefinition>,
        input: Value,
        state: Arc<SharedState>,
    ) -> ExecutionResult {
        self.dispatcher(definition).with_state(state).run(input).await
    }

    /// Validate and execute in one go.
    pub async fn run(&self, graph: &Graph, input: Value) -> WorkflowResult<ExecutionResult> {
        let definition = self.prepare(graph)?;
        Ok(self.execute(&definition, input).await)
    }
}

/// Builder for configuring a [`WorkflowEngine`].
#[derive(Default)]
pub struct WorkflowEngineBuilder {
    config: EngineConfig,
    http_pool: HttpPoolConfig,
    network_policy: NetworkPolicy,
    observers: Vec<Arc<dyn WorkflowObserver>>,
    transports: Vec<(String, HttpTransportConfig)>,
    executors: Vec<(NodeType, Arc<dyn NodeExecutor>)>,
    sub_graph_runner: Option<Arc<dyn SubGraphRunner>>,
    id_generator: Option<Arc<dyn IdGenerator>>,
}

impl WorkflowEngineBuilder {
    /// Set the engine configuration (limits, timeouts, merge policy).
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Outbound policy used by the default HTTP transport and by named
    /// transports without their own.
    pub fn network_policy(mut self, policy: NetworkPolicy) -> Self {
        self.network_policy = policy;
        self
    }

    pub fn http_pool(mut self, pool: HttpPoolConfig) -> Self {
        self.http_pool = pool;
        self
    }

    pub fn observer(mut self, observer: Arc<dyn WorkflowObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    /// Register a named HTTP transport for `http` nodes with `transport: <id>`.
    pub fn transport(mut self, id: impl Into<String>, config: HttpTransportConfig) -> Self {
        self.transports.push((id.into(), config));
        self
    }

    /// Replace the built-in executor for `node_type`.
    pub fn executor(mut self, node_type: NodeType, executor: Arc<dyn NodeExecutor>) -> Self {
        self.executors.push((node_type, executor));
        self
    }

    /// Set a custom sub-graph runner for wrapper nodes.
    pub fn sub_graph_runner(mut self, runner: Arc<dyn SubGraphRunner>) -> Self {
        self.sub_graph_runner = Some(runner);
        self
    }

    pub fn id_generator(mut self, generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = Some(generator);
        self
    }

    pub fn build(self) -> WorkflowResult<WorkflowEngine> {
        let http = HttpClientProvider::new(self.http_pool, self.network_policy);
        for (id, config) in self.transports {
            http.register_transport(id, config)
                .map_err(|e| WorkflowError::ConfigError(e.to_string()))?;
        }

        let observers = ObserverSet::new();
        for observer in self.observers {
            observers.register(observer);
        }

        let mut registry = NodeExecutorRegistry::new();
        for (node_type, executor) in self.executors {
            registry.register(node_type, executor);
        }

        let mut runtime = RuntimeContext::new(self.config)
            .with_registry(registry)
            .with_http(Arc::new(http))
            .with_observers(Arc::new(observers));
        if let Some(runner) = self.sub_graph_runner {
            runtime = runtime.with_sub_graph_runner(runner);
        }
        if let Some(generator) = self.id_generator {
            runtime = runtime.with_id_generator(generator);
        }

        Ok(WorkflowEngine {
            runtime: Arc::new(runtime),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{FakeIdGenerator, NodeStatus, OverallStatus};
    use crate::error::NodeError;
    use crate::graph::Node;
    use crate::nodes::{ExecutionContext, NodeInput, NodeRunResult};
    use async_trait::async_trait;
    use serde_json::json;

    #[tokio::test]
    async fn test_run_simple_chain() {
        let graph = Graph::new()
            .node("a", NodeType::Number, json!({"value": 4}))
            .node("b", NodeType::Math, json!({"operation": "power", "operand": 2}))
            .edge("a", "b");
        let result = WorkflowEngine::new().run(&graph, Value::Null).await.unwrap();
        assert_eq!(result.overall, OverallStatus::Succeeded);
        assert_eq!(result.output("b"), Some(&json!(16)));
    }

    #[tokio::test]
    async fn test_prepare_rejects_cycles_before_running() {
        let graph = Graph::new()
            .node("a", NodeType::Number, json!({"value": 1}))
            .node("b", NodeType::Number, json!({"value": 2}))
            .edge("a", "b")
            .edge("b", "a");
        let err = WorkflowEngine::new().run(&graph, Value::Null).await.unwrap_err();
        assert!(matches!(err, WorkflowError::CycleDetected(_)));
        assert!(err.is_structural());
    }

    #[test]
    fn test_prepare_document_yaml() {
        let yaml = r#"
nodes:
  - id: age
    type: number
    config: {value: 30}
  - id: check
    type: condition
    config: {condition: ">=18"}
edges:
  - {source: age, target: check}
"#;
        let def = WorkflowEngine::new()
            .prepare_document(yaml, WorkflowFormat::Yaml)
            .unwrap();
        assert_eq!(def.node_count(), 2);
    }

    struct Constant;

    #[async_trait]
    impl NodeExecutor for Constant {
        async fn execute(
            &self,
            _node: &Node,
            _input: NodeInput,
            _ctx: &ExecutionContext,
        ) -> Result<NodeRunResult, NodeError> {
            Ok(NodeRunResult::output(json!("custom")))
        }
    }

    #[tokio::test]
    async fn test_builder_custom_executor_and_ids() {
        let engine = WorkflowEngine::builder()
            .executor(NodeType::Number, Arc::new(Constant))
            .id_generator(Arc::new(FakeIdGenerator::new("run")))
            .build()
            .unwrap();
        let graph = Graph::new().node("n", NodeType::Number, json!({"value": 1}));
        let result = engine.run(&graph, Value::Null).await.unwrap();
        assert_eq!(result.output("n"), Some(&json!("custom")));
        assert_eq!(result.status_of("n"), Some(NodeStatus::Succeeded));
        assert!(result.run_id.starts_with("run-"));
    }

    #[test]
    fn test_builder_registers_transports() {
        let engine = WorkflowEngine::builder()
            .transport("billing", HttpTransportConfig::default().with_header("x-k", "v"))
            .build()
            .unwrap();
        assert!(engine.runtime().http.has_transport("billing"));
    }
}

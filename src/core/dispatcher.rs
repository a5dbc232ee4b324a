//! Active-path scheduler.
//!
//! One [`WorkflowDispatcher`] drives one run of a [`WorkflowDefinition`]:
//! nodes become ready once every incoming edge is resolved, run concurrently
//! on a `JoinSet`, and on completion resolve their outgoing edges to live or
//! dead. Nodes whose incoming edges are all dead are skipped without running,
//! and the skip cascades downstream.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::core::config::MergePolicy;
use crate::core::execution_state::{
    EdgeLiveness, ExecutionResult, ExecutionState, NodeStatus,
};
use crate::core::runtime_context::RuntimeContext;
use crate::core::shared_state::SharedState;
use crate::error::{NodeError, WorkflowError};
use crate::graph::{EdgeHandle, Node, NodeType, WorkflowDefinition};
use crate::nodes::{ExecutionContext, NodeExecutor, NodeInput, NodeRunResult};

/// How a Join node combines its incoming branches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinStrategy {
    All,
    /// `any` and `race` behave the same: first live branch wins.
    Any,
}

impl JoinStrategy {
    pub fn of(node: &Node) -> Result<Self, NodeError> {
        match node.config.get("strategy").and_then(Value::as_str) {
            None | Some("all") => Ok(JoinStrategy::All),
            Some("any") | Some("race") => Ok(JoinStrategy::Any),
            Some(other) => Err(NodeError::ConfigError(format!(
                "unknown join strategy '{}'",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Readiness {
    Wait,
    Ready,
    Skip,
}

struct NodeOutcome {
    node_id: String,
    result: Result<NodeRunResult, NodeError>,
    elapsed: Duration,
}

struct RunningNode {
    abort: AbortHandle,
    token: CancellationToken,
    started: Instant,
}

enum LoopEvent {
    Cancelled,
    Deadline,
    Joined(Option<Result<(tokio::task::Id, NodeOutcome), JoinError>>),
}

#[derive(Debug, Clone, Copy)]
enum AbortReason {
    Timeout,
    Cancelled,
}

/// Per-run scheduler bookkeeping.
struct RunLoop {
    exec: ExecutionState,
    ready: VecDeque<String>,
    queued: HashSet<String>,
    running: HashMap<String, RunningNode>,
    tasks: HashMap<tokio::task::Id, String>,
    join_set: JoinSet<NodeOutcome>,
    run_input: Value,
}

pub struct WorkflowDispatcher {
    definition: Arc<WorkflowDefinition>,
    runtime: Arc<RuntimeContext>,
    state: Arc<SharedState>,
    cancel: CancellationToken,
    scope: Option<String>,
    run_id: String,
    fail_fast: bool,
    deadline: Option<Duration>,
    emit_workflow_events: bool,
}

impl WorkflowDispatcher {
    /// Dispatcher for a top-level run with fresh shared state.
    pub fn new(definition: Arc<WorkflowDefinition>, runtime: Arc<RuntimeContext>) -> Self {
        let config = &runtime.config;
        let deadline = (config.max_execution_time_ms > 0)
            .then(|| Duration::from_millis(config.max_execution_time_ms));
        let fail_fast = config.fail_fast;
        let run_id = runtime.id_generator.next_id();
        Self {
            definition,
            state: Arc::new(SharedState::new()),
            runtime,
            cancel: CancellationToken::new(),
            scope: None,
            run_id,
            fail_fast,
            deadline,
            emit_workflow_events: true,
        }
    }

    /// Dispatcher for a body graph run on behalf of the node in `parent`.
    ///
    /// Shares the parent's runtime and state, stops at the first failure, and
    /// reports node events under the parent's path.
    pub fn nested(
        parent: &ExecutionContext,
        body: Arc<WorkflowDefinition>,
        token: CancellationToken,
    ) -> Self {
        Self {
            definition: body,
            runtime: Arc::clone(&parent.runtime),
            state: Arc::clone(&parent.state),
            cancel: token,
            scope: Some(parent.node_path.clone()),
            run_id: parent.runtime.id_generator.next_id(),
            fail_fast: true,
            deadline: None,
            emit_workflow_events: false,
        }
    }

    pub fn with_state(mut self, state: Arc<SharedState>) -> Self {
        self.state = state;
        self
    }

    /// Cancelling `token` aborts the run: running nodes are cancelled and
    /// the result carries [`WorkflowError::Cancelled`].
    pub fn with_cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn run(self, input: Value) -> ExecutionResult {
        if self.emit_workflow_events {
            tracing::info!(run_id = %self.run_id, nodes = self.definition.node_count(), "workflow started");
            self.runtime.observers.workflow_start(&self.run_id);
        }

        let mut rl = RunLoop {
            exec: ExecutionState::new(&self.definition),
            ready: VecDeque::new(),
            queued: HashSet::new(),
            running: HashMap::new(),
            tasks: HashMap::new(),
            join_set: JoinSet::new(),
            run_input: input,
        };

        let roots = self.definition.root_ids();
        self.advance(&mut rl, roots);

        let error = self.drive(&mut rl).await;

        // Whatever is still pending was never reached by a live edge.
        for node_id in rl.exec.unfinished() {
            if rl.exec.mark_skipped(&node_id) {
                self.runtime.observers.node_skipped(&self.scoped(&node_id));
            }
        }

        let result = ExecutionResult::from_state(
            self.run_id.clone(),
            rl.exec,
            self.state.snapshot(),
            error,
        );

        if self.emit_workflow_events {
            tracing::info!(
                run_id = %self.run_id,
                overall = ?result.overall,
                "workflow finished"
            );
            self.runtime
                .observers
                .workflow_end(&self.run_id, result.overall);
        }
        result
    }

    async fn drive(&self, rl: &mut RunLoop) -> Option<WorkflowError> {
        let deadline_at = self.deadline.map(|d| Instant::now() + d);

        loop {
            // `max_concurrency` is enforced by the runtime's node permits so
            // the cap also covers nested runs.
            while let Some(node_id) = rl.ready.pop_front() {
                rl.queued.remove(&node_id);
                if rl.exec.status_of(&node_id) != NodeStatus::Pending {
                    continue;
                }
                if let Some(err) = self.spawn_node(rl, &node_id) {
                    self.abort_running(rl, AbortReason::Cancelled).await;
                    return Some(err);
                }
            }

            if rl.join_set.is_empty() {
                return None;
            }

            let event = tokio::select! {
                _ = self.cancel.cancelled() => LoopEvent::Cancelled,
                _ = sleep_until(deadline_at) => LoopEvent::Deadline,
                joined = rl.join_set.join_next_with_id() => LoopEvent::Joined(joined),
            };

            match event {
                LoopEvent::Cancelled => {
                    tracing::warn!(run_id = %self.run_id, "run cancelled");
                    self.abort_running(rl, AbortReason::Cancelled).await;
                    return Some(WorkflowError::Cancelled);
                }
                LoopEvent::Deadline => {
                    let limit = self.deadline.map(|d| d.as_millis() as u64).unwrap_or(0);
                    tracing::warn!(run_id = %self.run_id, limit_ms = limit, "run exceeded its time limit");
                    self.abort_running(rl, AbortReason::Timeout).await;
                    return Some(WorkflowError::ExecutionTimeout(limit));
                }
                LoopEvent::Joined(None) => {}
                LoopEvent::Joined(Some(Ok((task_id, outcome)))) => {
                    rl.tasks.remove(&task_id);
                    rl.running.remove(&outcome.node_id);
                    if let Some(err) = self.on_outcome(rl, outcome) {
                        self.abort_running(rl, AbortReason::Cancelled).await;
                        return Some(err);
                    }
                }
                LoopEvent::Joined(Some(Err(join_err))) => {
                    let Some(node_id) = rl.tasks.remove(&join_err.id()) else {
                        continue;
                    };
                    let Some(running) = rl.running.remove(&node_id) else {
                        // Aborted on purpose; its status is already final.
                        continue;
                    };
                    let error = if join_err.is_panic() {
                        NodeError::ExecutionError(format!("node '{}' panicked", node_id))
                    } else {
                        NodeError::Cancelled
                    };
                    let outcome = NodeOutcome {
                        node_id,
                        result: Err(error),
                        elapsed: running.started.elapsed(),
                    };
                    if let Some(err) = self.on_outcome(rl, outcome) {
                        self.abort_running(rl, AbortReason::Cancelled).await;
                        return Some(err);
                    }
                }
            }
        }
    }

    /// Start `node_id`. Returns a run-level error only under fail-fast.
    fn spawn_node(&self, rl: &mut RunLoop, node_id: &str) -> Option<WorkflowError> {
        let node = match self.definition.get_node(node_id) {
            Ok(node) => node.clone(),
            Err(e) => return Some(WorkflowError::InternalError(e.to_string())),
        };
        let input = self.build_input(rl, node_id);
        let path = self.scoped(node_id);

        rl.exec.mark_running(node_id);
        self.runtime.observers.node_start(&path, node.node_type);
        tracing::debug!(node_id = %path, node_type = %node.node_type, "dispatching node");

        let Some(executor) = self.runtime.registry.get(node.node_type) else {
            let outcome = NodeOutcome {
                node_id: node_id.to_string(),
                result: Err(NodeError::ConfigError(format!(
                    "no executor registered for node type '{}'",
                    node.node_type
                ))),
                elapsed: Duration::ZERO,
            };
            return self.on_outcome(rl, outcome);
        };

        let token = self.cancel.child_token();
        let ctx = ExecutionContext {
            runtime: Arc::clone(&self.runtime),
            state: Arc::clone(&self.state),
            cancel: token.clone(),
            definition: Arc::clone(&self.definition),
            node_id: node_id.to_string(),
            node_path: path.clone(),
            depth: self.definition.depth(),
        };
        let limit = self.runtime.config.max_node_execution_time_ms;
        let per_node = (limit > 0).then(|| Duration::from_millis(limit));
        let task_token = token.clone();
        let span = tracing::debug_span!("node", node_id = %path);
        // Wrappers only wait on their body, whose leaves take permits of
        // their own; holding one here could starve the body.
        let needs_permit = !node.node_type.is_wrapper();

        let abort = rl.join_set.spawn(
            async move {
                let started = Instant::now();
                let result = tokio::select! {
                    biased;
                    _ = task_token.cancelled() => Err(NodeError::Cancelled),
                    r = async {
                        let _permit = if needs_permit {
                            ctx.runtime.acquire_node_permit().await
                        } else {
                            None
                        };
                        invoke(executor, &node, input, &ctx, per_node).await
                    } => r,
                };
                if matches!(result, Err(NodeError::Timeout(_))) {
                    task_token.cancel();
                }
                NodeOutcome {
                    node_id: node.id,
                    result,
                    elapsed: started.elapsed(),
                }
            }
            .instrument(span),
        );

        rl.tasks.insert(abort.id(), node_id.to_string());
        rl.running.insert(
            node_id.to_string(),
            RunningNode {
                abort,
                token,
                started: Instant::now(),
            },
        );
        None
    }

    /// Record a finished node and propagate edge liveness.
    fn on_outcome(&self, rl: &mut RunLoop, outcome: NodeOutcome) -> Option<WorkflowError> {
        let NodeOutcome {
            node_id,
            result,
            elapsed,
        } = outcome;
        let path = self.scoped(&node_id);

        if rl.exec.status_of(&node_id) != NodeStatus::Running {
            tracing::debug!(node_id = %path, "discarding outcome of a cancelled node");
            return None;
        }

        match result {
            Ok(run) => {
                rl.exec.mark_succeeded(&node_id, run.output, elapsed);
                self.runtime
                    .observers
                    .node_end(&path, NodeStatus::Succeeded, elapsed);
                let targets = self.resolve_outgoing(rl, &node_id, &run.handle);
                self.advance(rl, targets);
                None
            }
            Err(NodeError::Cancelled) if self.cancel.is_cancelled() => {
                rl.exec.mark_cancelled(&node_id);
                self.runtime
                    .observers
                    .node_end(&path, NodeStatus::Skipped, elapsed);
                None
            }
            Err(error) => {
                tracing::warn!(node_id = %path, error = %error, "node failed");
                let message = error.to_string();
                rl.exec.mark_failed(&node_id, error, elapsed);
                self.runtime
                    .observers
                    .node_end(&path, NodeStatus::Failed, elapsed);
                let targets = self.kill_outgoing(rl, &node_id);
                if self.fail_fast {
                    return Some(WorkflowError::FailFast {
                        node_id,
                        error: message,
                    });
                }
                self.advance(rl, targets);
                None
            }
        }
    }

    /// Resolve every outgoing edge of a succeeded node; returns the targets.
    fn resolve_outgoing(
        &self,
        rl: &mut RunLoop,
        node_id: &str,
        handle: &EdgeHandle,
    ) -> Vec<String> {
        let mut targets = Vec::new();
        for &index in self.definition.outgoing_edges(node_id) {
            let Some(edge) = self.definition.edge(index) else {
                continue;
            };
            let liveness = if handle.selects(edge.source_handle.as_deref()) {
                EdgeLiveness::Live
            } else {
                EdgeLiveness::Dead
            };
            rl.exec.resolve_edge(index, liveness);
            targets.push(edge.target.clone());
        }
        targets
    }

    fn kill_outgoing(&self, rl: &mut RunLoop, node_id: &str) -> Vec<String> {
        let mut targets = Vec::new();
        for &index in self.definition.outgoing_edges(node_id) {
            if let Some(edge) = self.definition.edge(index) {
                rl.exec.resolve_edge(index, EdgeLiveness::Dead);
                targets.push(edge.target.clone());
            }
        }
        targets
    }

    /// Re-evaluate `candidates`, queueing ready nodes and cascading skips.
    fn advance(&self, rl: &mut RunLoop, candidates: Vec<String>) {
        let mut work: VecDeque<String> = candidates.into();
        while let Some(node_id) = work.pop_front() {
            if rl.exec.status_of(&node_id) != NodeStatus::Pending || rl.queued.contains(&node_id) {
                continue;
            }
            match self.readiness(rl, &node_id) {
                Readiness::Wait => {}
                Readiness::Ready => {
                    rl.queued.insert(node_id.clone());
                    rl.ready.push_back(node_id.clone());
                    if self.is_race_join(&node_id) {
                        let released = self.cancel_exclusive_feeders(rl, &node_id);
                        work.extend(released);
                    }
                }
                Readiness::Skip => {
                    rl.exec.mark_skipped(&node_id);
                    self.runtime.observers.node_skipped(&self.scoped(&node_id));
                    tracing::debug!(node_id = %self.scoped(&node_id), "node skipped");
                    work.extend(self.kill_outgoing(rl, &node_id));
                }
            }
        }
    }

    fn readiness(&self, rl: &RunLoop, node_id: &str) -> Readiness {
        let incoming = self.definition.incoming_edges(node_id);
        if incoming.is_empty() {
            return Readiness::Ready;
        }

        let (mut live, mut dead, mut open) = (0usize, 0usize, 0usize);
        let mut failed_source = false;
        for &index in incoming {
            match rl.exec.edge(index) {
                Some(EdgeLiveness::Live) => live += 1,
                Some(EdgeLiveness::Dead) => {
                    dead += 1;
                    if let Some(edge) = self.definition.edge(index) {
                        failed_source |= rl.exec.status_of(&edge.source) == NodeStatus::Failed;
                    }
                }
                None => open += 1,
            }
        }

        let node = self.definition.get_node(node_id).ok();
        if let Some(node) = node.filter(|n| n.node_type == NodeType::Join) {
            // Malformed strategies surface as a config error from the executor.
            let strategy = JoinStrategy::of(node).unwrap_or(JoinStrategy::All);
            return match strategy {
                JoinStrategy::Any if live > 0 => Readiness::Ready,
                _ if open > 0 => Readiness::Wait,
                JoinStrategy::All if live > 0 || failed_source => Readiness::Ready,
                _ => Readiness::Skip,
            };
        }

        if open > 0 {
            return Readiness::Wait;
        }
        if live == 0 {
            return Readiness::Skip;
        }
        if self.runtime.config.merge_policy == MergePolicy::AllLive && dead > 0 {
            return Readiness::Skip;
        }
        Readiness::Ready
    }

    fn is_race_join(&self, node_id: &str) -> bool {
        self.definition
            .get_node(node_id)
            .ok()
            .filter(|n| n.node_type == NodeType::Join)
            .and_then(|n| JoinStrategy::of(n).ok())
            == Some(JoinStrategy::Any)
    }

    /// Cancel every unfinished node whose work can only reach `join_id`, and
    /// absorb the failures of those that already failed.
    ///
    /// Returns the targets of edges killed along the way so the caller can
    /// re-evaluate them.
    fn cancel_exclusive_feeders(&self, rl: &mut RunLoop, join_id: &str) -> Vec<String> {
        // Finished ancestors stay in the set so a failed branch is judged by
        // where it would have led, not by its already-dead edges.
        let mut feeders: BTreeSet<String> =
            self.definition.ancestors(join_id).into_iter().collect();

        loop {
            let shared: Vec<String> = feeders
                .iter()
                .filter(|id| {
                    self.definition
                        .get_successors(id)
                        .unwrap_or_default()
                        .iter()
                        .any(|s| s != join_id && !feeders.contains(s))
                })
                .cloned()
                .collect();
            if shared.is_empty() {
                break;
            }
            for id in shared {
                feeders.remove(&id);
            }
        }

        let mut released = Vec::new();
        for id in feeders {
            let path = self.scoped(&id);
            if rl.exec.absorb_failure(&id) {
                tracing::debug!(node_id = %path, join = %join_id, "failure absorbed by race join");
                continue;
            }
            let was_running = rl.running.remove(&id);
            if !rl.exec.mark_cancelled(&id) {
                continue;
            }
            match was_running {
                Some(running) => {
                    running.token.cancel();
                    running.abort.abort();
                    self.runtime.observers.node_end(
                        &path,
                        NodeStatus::Skipped,
                        running.started.elapsed(),
                    );
                }
                None => self.runtime.observers.node_skipped(&path),
            }
            tracing::debug!(node_id = %path, join = %join_id, "branch cancelled by race join");
            released.extend(self.kill_outgoing(rl, &id));
        }
        released
    }

    /// Stop everything in flight. Pending nodes are left for the final skip
    /// pass.
    async fn abort_running(&self, rl: &mut RunLoop, reason: AbortReason) {
        let mut running: Vec<(String, RunningNode)> = rl.running.drain().collect();
        running.sort_by(|a, b| a.0.cmp(&b.0));
        for (node_id, node) in running {
            node.token.cancel();
            node.abort.abort();
            let path = self.scoped(&node_id);
            let elapsed = node.started.elapsed();
            match reason {
                AbortReason::Timeout => {
                    let error = NodeError::Timeout("workflow time limit reached".to_string());
                    if rl.exec.mark_failed(&node_id, error, elapsed) {
                        self.runtime
                            .observers
                            .node_end(&path, NodeStatus::Failed, elapsed);
                    }
                }
                AbortReason::Cancelled => {
                    if rl.exec.mark_cancelled(&node_id) {
                        self.runtime
                            .observers
                            .node_end(&path, NodeStatus::Skipped, elapsed);
                    }
                }
            }
        }
        rl.ready.clear();
        rl.queued.clear();
        rl.tasks.clear();
        rl.join_set.shutdown().await;
    }

    fn build_input(&self, rl: &RunLoop, node_id: &str) -> NodeInput {
        let incoming = self.definition.incoming_edges(node_id);
        if incoming.is_empty() {
            return NodeInput::new(rl.run_input.clone());
        }

        let mut sources = Map::new();
        let mut failed = Vec::new();
        for &index in incoming {
            let Some(edge) = self.definition.edge(index) else {
                continue;
            };
            match rl.exec.status_of(&edge.source) {
                NodeStatus::Succeeded if rl.exec.edge(index) == Some(EdgeLiveness::Live) => {
                    if let Some(output) = rl.exec.results.get(&edge.source) {
                        sources.insert(edge.source.clone(), output.clone());
                    }
                }
                NodeStatus::Failed if !failed.contains(&edge.source) => {
                    failed.push(edge.source.clone());
                }
                _ => {}
            }
        }

        let value = if sources.len() == 1 {
            sources.values().next().cloned().unwrap_or(Value::Null)
        } else {
            Value::Object(sources.clone())
        };
        NodeInput {
            value,
            sources,
            failed,
        }
    }

    fn scoped(&self, node_id: &str) -> String {
        match &self.scope {
            Some(prefix) => format!("{}/{}", prefix, node_id),
            None => node_id.to_string(),
        }
    }
}

async fn invoke(
    executor: Arc<dyn NodeExecutor>,
    node: &Node,
    input: NodeInput,
    ctx: &ExecutionContext,
    limit: Option<Duration>,
) -> Result<NodeRunResult, NodeError> {
    match limit {
        Some(limit) => match tokio::time::timeout(limit, executor.execute(node, input, ctx)).await
        {
            Ok(result) => result,
            Err(_) => Err(NodeError::Timeout(format!(
                "node '{}' exceeded {} ms",
                node.id,
                limit.as_millis()
            ))),
        },
        None => executor.execute(node, input, ctx).await,
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

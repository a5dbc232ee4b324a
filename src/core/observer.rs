//! Observer hooks called synchronously by the scheduler.
//!
//! Observers are an event sink, nothing more: whatever they return or however
//! they panic, the run carries on and the failure is logged.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::core::execution_state::{NodeStatus, OverallStatus};
use crate::graph::NodeType;

pub trait WorkflowObserver: Send + Sync {
    fn on_workflow_start(&self, _run_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_node_start(&self, _node_id: &str, _node_type: NodeType) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_node_end(
        &self,
        _node_id: &str,
        _status: NodeStatus,
        _duration: Duration,
    ) -> anyhow::Result<()> {
        Ok(())
    }

    /// A node resolved to `Skipped` without ever starting.
    fn on_node_skipped(&self, _node_id: &str) -> anyhow::Result<()> {
        Ok(())
    }

    fn on_workflow_end(&self, _run_id: &str, _overall: OverallStatus) -> anyhow::Result<()> {
        Ok(())
    }
}

#[derive(Default)]
pub struct ObserverSet {
    observers: RwLock<Vec<Arc<dyn WorkflowObserver>>>,
}

impl ObserverSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, observer: Arc<dyn WorkflowObserver>) {
        self.observers.write().push(observer);
    }

    pub fn len(&self) -> usize {
        self.observers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.read().is_empty()
    }

    pub fn workflow_start(&self, run_id: &str) {
        self.notify("on_workflow_start", |o| o.on_workflow_start(run_id));
    }

    pub fn node_start(&self, node_id: &str, node_type: NodeType) {
        self.notify("on_node_start", |o| o.on_node_start(node_id, node_type));
    }

    pub fn node_end(&self, node_id: &str, status: NodeStatus, duration: Duration) {
        self.notify("on_node_end", |o| o.on_node_end(node_id, status, duration));
    }

    pub fn node_skipped(&self, node_id: &str) {
        self.notify("on_node_skipped", |o| o.on_node_skipped(node_id));
    }

    pub fn workflow_end(&self, run_id: &str, overall: OverallStatus) {
        self.notify("on_workflow_end", |o| o.on_workflow_end(run_id, overall));
    }

    fn notify<F>(&self, hook: &'static str, f: F)
    where
        F: Fn(&dyn WorkflowObserver) -> anyhow::Result<()>,
    {
        let observers = self.observers.read().clone();
        for observer in observers {
            match catch_unwind(AssertUnwindSafe(|| f(observer.as_ref()))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!(hook, error = %e, "observer returned an error");
                }
                Err(_) => {
                    tracing::warn!(hook, "observer panicked");
                }
            }
        }
    }
}

/// Forwards every hook to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl WorkflowObserver for TracingObserver {
    fn on_workflow_start(&self, run_id: &str) -> anyhow::Result<()> {
        tracing::info!(run_id, "workflow started");
        Ok(())
    }

    fn on_node_start(&self, node_id: &str, node_type: NodeType) -> anyhow::Result<()> {
        tracing::debug!(node_id, node_type = %node_type, "node started");
        Ok(())
    }

    fn on_node_end(
        &self,
        node_id: &str,
        status: NodeStatus,
        duration: Duration,
    ) -> anyhow::Result<()> {
        tracing::debug!(
            node_id,
            status = ?status,
            elapsed_ms = duration.as_millis() as u64,
            "node finished"
        );
        Ok(())
    }

    fn on_node_skipped(&self, node_id: &str) -> anyhow::Result<()> {
        tracing::debug!(node_id, "node skipped");
        Ok(())
    }

    fn on_workflow_end(&self, run_id: &str, overall: OverallStatus) -> anyhow::Result<()> {
        tracing::info!(run_id, overall = ?overall, "workflow finished");
        Ok(())
    }
}

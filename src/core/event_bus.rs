use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;

use crate::core::execution_state::{NodeStatus, OverallStatus};
use crate::core::observer::WorkflowObserver;
use crate::graph::NodeType;

/// Engine events as delivered to a channel subscriber.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum GraphEngineEvent {
    WorkflowStarted {
        run_id: String,
        timestamp: DateTime<Utc>,
    },
    NodeStarted {
        node_id: String,
        node_type: NodeType,
        timestamp: DateTime<Utc>,
    },
    NodeFinished {
        node_id: String,
        status: NodeStatus,
        elapsed_ms: u64,
        timestamp: DateTime<Utc>,
    },
    NodeSkipped {
        node_id: String,
        timestamp: DateTime<Utc>,
    },
    WorkflowFinished {
        run_id: String,
        overall: OverallStatus,
        timestamp: DateTime<Utc>,
    },
}

impl GraphEngineEvent {
    pub fn node_id(&self) -> Option<&str> {
        match self {
            GraphEngineEvent::NodeStarted { node_id, .. }
            | GraphEngineEvent::NodeFinished { node_id, .. }
            | GraphEngineEvent::NodeSkipped { node_id, .. } => Some(node_id),
            _ => None,
        }
    }
}

pub type EventSender = mpsc::UnboundedSender<GraphEngineEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<GraphEngineEvent>;

pub fn create_event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Observer that republishes every hook as a [`GraphEngineEvent`].
pub struct ChannelObserver {
    tx: EventSender,
}

impl ChannelObserver {
    pub fn new(tx: EventSender) -> Self {
        Self { tx }
    }

    /// Observer plus the receiving half of a fresh channel.
    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = create_event_channel();
        (Self::new(tx), rx)
    }

    fn send(&self, event: GraphEngineEvent) -> anyhow::Result<()> {
        self.tx
            .send(event)
            .map_err(|_| anyhow::anyhow!("event receiver dropped"))
    }
}

impl WorkflowObserver for ChannelObserver {
    fn on_workflow_start(&self, run_id: &str) -> anyhow::Result<()> {
        self.send(GraphEngineEvent::WorkflowStarted {
            run_id: run_id.to_string(),
            timestamp: Utc::now(),
        })
    }

    fn on_node_start(&self, node_id: &str, node_type: NodeType) -> anyhow::Result<()> {
        self.send(GraphEngineEvent::NodeStarted {
            node_id: node_id.to_string(),
            node_type,
            timestamp: Utc::now(),
        })
    }

    fn on_node_end(
        &self,
        node_id: &str,
        status: NodeStatus,
        duration: std::time::Duration,
    ) -> anyhow::Result<()> {
        self.send(GraphEngineEvent::NodeFinished {
            node_id: node_id.to_string(),
            status,
            elapsed_ms: duration.as_millis() as u64,
            timestamp: Utc::now(),
        })
    }

    fn on_node_skipped(&self, node_id: &str) -> anyhow::Result<()> {
        self.send(GraphEngineEvent::NodeSkipped {
            node_id: node_id.to_string(),
            timestamp: Utc::now(),
        })
    }

    fn on_workflow_end(&self, run_id: &str, overall: OverallStatus) -> anyhow::Result<()> {
        self.send(GraphEngineEvent::WorkflowFinished {
            run_id: run_id.to_string(),
            overall,
            timestamp: Utc::now(),
        })
    }
}

pub mod config;
pub mod dispatcher;
pub mod event_bus;
pub mod execution_state;
pub mod http_client;
pub mod observer;
pub mod runtime_context;
pub mod shared_state;
pub mod sub_graph_runner;

pub use config::{EngineConfig, MergePolicy};
pub use dispatcher::{JoinStrategy, WorkflowDispatcher};
pub use event_bus::{create_event_channel, ChannelObserver, EventReceiver, EventSender, GraphEngineEvent};
pub use execution_state::{
    EdgeLiveness, ExecutionResult, ExecutionState, NodeStatus, OverallStatus,
};
pub use http_client::{HttpClientProvider, HttpPoolConfig, HttpTransport, HttpTransportConfig};
pub use observer::{ObserverSet, TracingObserver, WorkflowObserver};
pub use runtime_context::{FakeIdGenerator, IdGenerator, RealIdGenerator, RuntimeContext};
pub use shared_state::{SharedState, StateSnapshot};
pub use sub_graph_runner::{body_output, DefaultSubGraphRunner, SubGraphRunner};

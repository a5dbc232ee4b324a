use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::core::config::EngineConfig;
use crate::core::http_client::HttpClientProvider;
use crate::core::observer::ObserverSet;
use crate::core::sub_graph_runner::{DefaultSubGraphRunner, SubGraphRunner};
use crate::nodes::NodeExecutorRegistry;
use crate::template::TemplateEngine;

/// Engine services shared by every run, nested runs included.
#[derive(Clone)]
pub struct RuntimeContext {
    pub config: EngineConfig,
    pub registry: Arc<NodeExecutorRegistry>,
    pub http: Arc<HttpClientProvider>,
    pub observers: Arc<ObserverSet>,
    pub templates: Arc<TemplateEngine>,
    pub id_generator: Arc<dyn IdGenerator>,
    pub sub_graph_runner: Arc<dyn SubGraphRunner>,
    /// Engine-wide cap on running leaf nodes, shared by nested runs.
    /// `None` when `max_concurrency` is 0.
    node_permits: Option<Arc<Semaphore>>,
}

impl Default for RuntimeContext {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl RuntimeContext {
    pub fn new(config: EngineConfig) -> Self {
        let node_permits =
            (config.max_concurrency > 0).then(|| Arc::new(Semaphore::new(config.max_concurrency)));
        Self {
            node_permits,
            config,
            registry: Arc::new(NodeExecutorRegistry::new()),
            http: Arc::new(HttpClientProvider::default()),
            observers: Arc::new(ObserverSet::new()),
            templates: Arc::new(TemplateEngine::new()),
            id_generator: Arc::new(RealIdGenerator),
            sub_graph_runner: Arc::new(DefaultSubGraphRunner),
        }
    }

    pub fn with_registry(mut self, registry: NodeExecutorRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_http(mut self, http: Arc<HttpClientProvider>) -> Self {
        self.http = http;
        self
    }

    pub fn with_observers(mut self, observers: Arc<ObserverSet>) -> Self {
        self.observers = observers;
        self
    }

    pub fn with_sub_graph_runner(mut self, runner: Arc<dyn SubGraphRunner>) -> Self {
        self.sub_graph_runner = runner;
        self
    }

    pub fn with_id_generator(mut self, id_generator: Arc<dyn IdGenerator>) -> Self {
        self.id_generator = id_generator;
        self
    }

    /// Wait for a slot under `max_concurrency`. Resolves to `None` when the
    /// engine is unbounded. The slot is freed when the permit drops.
    pub async fn acquire_node_permit(&self) -> Option<OwnedSemaphorePermit> {
        let permits = self.node_permits.clone()?;
        // The semaphore is never closed.
        permits.acquire_owned().await.ok()
    }
}

pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> String;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct RealIdGenerator;

impl IdGenerator for RealIdGenerator {
    fn next_id(&self) -> String {
        uuid::Uuid::new_v4().to_string()
    }
}

/// Deterministic ids for tests: `<prefix>-0`, `<prefix>-1`, ...
pub struct FakeIdGenerator {
    pub prefix: String,
    pub counter: AtomicU64,
}

impl FakeIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            counter: AtomicU64::new(0),
        }
    }
}

impl IdGenerator for FakeIdGenerator {
    fn next_id(&self) -> String {
        let id = self.counter.fetch_add(1, Ordering::SeqCst);
        format!("{}-{}", self.prefix, id)
    }
}

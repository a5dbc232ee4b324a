use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::error::NodeError;
use crate::security::{secure_client_builder, NetworkPolicy};

#[derive(Debug, Clone)]
pub struct HttpPoolConfig {
    pub pool_max_idle_per_host: usize,
    pub pool_idle_timeout: Duration,
    pub default_timeout: Duration,
    pub tcp_keepalive: Option<Duration>,
    pub http2_enabled: bool,
}

impl Default for HttpPoolConfig {
    fn default() -> Self {
        Self {
            pool_max_idle_per_host: 10,
            pool_idle_timeout: Duration::from_secs(90),
            default_timeout: Duration::from_secs(30),
            tcp_keepalive: Some(Duration::from_secs(60)),
            http2_enabled: true,
        }
    }
}

/// Settings for a named outbound transport referenced by node config.
#[derive(Debug, Clone, Default)]
pub struct HttpTransportConfig {
    /// Sent on every request unless the node sets the same header.
    pub default_headers: BTreeMap<String, String>,
    pub timeout: Option<Duration>,
    /// Replaces the engine-wide policy for this transport.
    pub policy: Option<NetworkPolicy>,
}

impl HttpTransportConfig {
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_headers.insert(name.into(), value.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_policy(mut self, policy: NetworkPolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

/// A ready-to-use client bound to the policy it enforces.
#[derive(Debug)]
pub struct HttpTransport {
    pub id: String,
    pub client: reqwest::Client,
    pub policy: NetworkPolicy,
    pub default_headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

#[derive(Debug)]
pub struct HttpClientProvider {
    config: HttpPoolConfig,
    policy: NetworkPolicy,
    default_transport: Mutex<Option<Arc<HttpTransport>>>,
    transports: RwLock<HashMap<String, Arc<HttpTransport>>>,
}

impl Default for HttpClientProvider {
    fn default() -> Self {
        Self::new(HttpPoolConfig::default(), NetworkPolicy::default())
    }
}

impl HttpClientProvider {
    pub fn new(config: HttpPoolConfig, policy: NetworkPolicy) -> Self {
        Self {
            config,
            policy,
            default_transport: Mutex::new(None),
            transports: RwLock::new(HashMap::new()),
        }
    }

    pub fn policy(&self) -> &NetworkPolicy {
        &self.policy
    }

    fn apply_pool_options(
        mut builder: reqwest::ClientBuilder,
        config: &HttpPoolConfig,
        policy: &NetworkPolicy,
        timeout: Duration,
    ) -> reqwest::ClientBuilder {
        if !policy.dns_rebinding_protection {
            builder = builder.pool_max_idle_per_host(config.pool_max_idle_per_host);
        }
        builder = builder
            .pool_idle_timeout(config.pool_idle_timeout)
            .tcp_keepalive(config.tcp_keepalive)
            .connect_timeout(timeout.min(Duration::from_secs(10)))
            .timeout(timeout);

        if !config.http2_enabled {
            builder = builder.http1_only();
        }

        builder
    }

    fn build_transport(
        &self,
        id: &str,
        policy: NetworkPolicy,
        default_headers: BTreeMap<String, String>,
        timeout: Duration,
    ) -> Result<HttpTransport, NodeError> {
        let client = Self::apply_pool_options(
            secure_client_builder(&policy),
            &self.config,
            &policy,
            timeout,
        )
        .build()
        .map_err(|e| NodeError::ConfigError(format!("transport '{}': {}", id, e)))?;
        Ok(HttpTransport {
            id: id.to_string(),
            client,
            policy,
            default_headers,
            timeout,
        })
    }

    /// Register (or replace) a named transport.
    pub fn register_transport(
        &self,
        id: impl Into<String>,
        config: HttpTransportConfig,
    ) -> Result<(), NodeError> {
        let id = id.into();
        let policy = config.policy.unwrap_or_else(|| self.policy.clone());
        let timeout = config.timeout.unwrap_or(self.config.default_timeout);
        let transport = self.build_transport(&id, policy, config.default_headers, timeout)?;
        tracing::debug!(transport = %id, "registered http transport");
        self.transports.write().insert(id, Arc::new(transport));
        Ok(())
    }

    pub fn has_transport(&self, id: &str) -> bool {
        self.transports.read().contains_key(id)
    }

    /// The named transport, or the engine default when `id` is `None`.
    pub fn transport(&self, id: Option<&str>) -> Result<Arc<HttpTransport>, NodeError> {
        match id {
            Some(id) => self
                .transports
                .read()
                .get(id)
                .cloned()
                .ok_or_else(|| NodeError::ConfigError(format!("unknown http transport '{}'", id))),
            None => self.default_transport(),
        }
    }

    fn default_transport(&self) -> Result<Arc<HttpTransport>, NodeError> {
        let mut slot = self.default_transport.lock();
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }
        let transport = Arc::new(self.build_transport(
            "default",
            self.policy.clone(),
            BTreeMap::new(),
            self.config.default_timeout,
        )?);
        *slot = Some(transport.clone());
        Ok(transport)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_transport_is_cached() {
        let provider = HttpClientProvider::default();
        let a = provider.transport(None).unwrap();
        let b = provider.transport(None).unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(a.timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_registered_transport() {
        let provider = HttpClientProvider::default();
        provider
            .register_transport(
                "billing",
                HttpTransportConfig::default()
                    .with_header("x-tenant", "acme")
                    .with_timeout(Duration::from_secs(5))
                    .with_policy(NetworkPolicy::permissive()),
            )
            .unwrap();
        assert!(provider.has_transport("billing"));
        let t = provider.transport(Some("billing")).unwrap();
        assert_eq!(t.default_headers.get("x-tenant").map(String::as_str), Some("acme"));
        assert_eq!(t.timeout, Duration::from_secs(5));
        assert!(!t.policy.block_loopback);
    }

    #[test]
    fn test_unknown_transport_is_config_error() {
        let provider = HttpClientProvider::default();
        let err = provider.transport(Some("nope")).unwrap_err();
        assert!(matches!(err, NodeError::ConfigError(_)));
    }
}

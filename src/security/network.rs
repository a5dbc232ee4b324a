//! Outbound request policy and SSRF prevention.
//!
//! Every URL the HTTP node touches passes [`check_target`] (scheme, port,
//! domain lists). The host is then resolved through [`SafeDnsResolver`], which
//! refuses addresses in blocked ranges. The same resolver is installed in the
//! reqwest client, so the socket only ever connects to an address that was
//! checked. Redirect hops are re-checked by the client's redirect policy;
//! IP-literal hosts never reach a resolver, so their address is checked
//! there directly.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::NodeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPolicyMode {
    /// Any domain (address checks still apply).
    #[default]
    AllowAll,
    /// Only domains matching `allowed_domains`.
    AllowList,
    /// Any domain except those matching `denied_domains`.
    DenyList,
}

/// Caller-supplied outbound policy; tests and production inject different ones.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkPolicy {
    pub mode: NetworkPolicyMode,
    pub allowed_domains: Vec<String>,
    pub denied_domains: Vec<String>,
    pub block_private_ips: bool,
    pub block_loopback: bool,
    pub block_metadata_endpoints: bool,
    pub allowed_schemes: Vec<String>,
    /// Empty = any port.
    pub allowed_ports: Vec<u16>,
    pub max_redirects: usize,
    pub max_response_bytes: usize,
    /// Disable connection reuse so each request re-resolves through the guard.
    pub dns_rebinding_protection: bool,
}

impl Default for NetworkPolicy {
    fn default() -> Self {
        Self {
            mode: NetworkPolicyMode::AllowAll,
            allowed_domains: Vec::new(),
            denied_domains: Vec::new(),
            block_private_ips: true,
            block_loopback: true,
            block_metadata_endpoints: true,
            allowed_schemes: vec!["https".into(), "http".into()],
            allowed_ports: Vec::new(),
            max_redirects: 3,
            max_response_bytes: 10 * 1024 * 1024,
            dns_rebinding_protection: true,
        }
    }
}

impl NetworkPolicy {
    /// No address blocking; scheme and domain checks still apply.
    pub fn permissive() -> Self {
        Self {
            block_private_ips: false,
            block_loopback: false,
            block_metadata_endpoints: false,
            ..Self::default()
        }
    }
}

/// Why an address was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    Loopback,
    Private,
    LinkLocal,
    Unspecified,
    SharedAddressSpace,
    Metadata,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BlockReason::Loopback => "loopback",
            BlockReason::Private => "private",
            BlockReason::LinkLocal => "link-local",
            BlockReason::Unspecified => "unspecified",
            BlockReason::SharedAddressSpace => "shared address space",
            BlockReason::Metadata => "cloud metadata",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum NetworkError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Blocked scheme: {0}")]
    BlockedScheme(String),
    #[error("Blocked port: {0}")]
    BlockedPort(u16),
    #[error("Domain not allowed: {0}")]
    DomainNotAllowed(String),
    #[error("Domain denied: {0}")]
    DomainDenied(String),
    #[error("DNS resolution failed: {0}")]
    DnsResolutionFailed(String),
    #[error("Blocked {reason} address: {host} -> {ip}")]
    BlockedIp {
        host: String,
        ip: IpAddr,
        reason: BlockReason,
    },
    #[error("Redirect blocked: {0}")]
    RedirectBlocked(String),
    #[error("HTTP client build failed: {0}")]
    ClientBuildFailed(String),
}

impl From<NetworkError> for NodeError {
    fn from(e: NetworkError) -> Self {
        match e {
            NetworkError::DnsResolutionFailed(_) => NodeError::HttpError(e.to_string()),
            NetworkError::ClientBuildFailed(_) => NodeError::ConfigError(e.to_string()),
            other => NodeError::Security(other.to_string()),
        }
    }
}

const METADATA_V4: [Ipv4Addr; 3] = [
    Ipv4Addr::new(169, 254, 169, 254),
    Ipv4Addr::new(169, 254, 170, 2),
    Ipv4Addr::new(100, 100, 100, 200),
];

/// Classify `ip` under `policy`; `None` means the address may be contacted.
pub fn blocked_reason(ip: &IpAddr, policy: &NetworkPolicy) -> Option<BlockReason> {
    match ip {
        IpAddr::V4(v4) => blocked_reason_v4(v4, policy),
        IpAddr::V6(v6) => blocked_reason_v6(v6, policy),
    }
}

fn blocked_reason_v4(v4: &Ipv4Addr, policy: &NetworkPolicy) -> Option<BlockReason> {
    // Metadata addresses sit inside link-local/shared ranges; name them first.
    if policy.block_metadata_endpoints && METADATA_V4.contains(v4) {
        return Some(BlockReason::Metadata);
    }
    if policy.block_loopback && v4.is_loopback() {
        return Some(BlockReason::Loopback);
    }
    if !policy.block_private_ips {
        return None;
    }
    let [a, b, ..] = v4.octets();
    if v4.is_private() {
        Some(BlockReason::Private)
    } else if v4.is_link_local() {
        Some(BlockReason::LinkLocal)
    } else if a == 0 || v4.is_broadcast() {
        Some(BlockReason::Unspecified)
    } else if a == 100 && (64..128).contains(&b) {
        Some(BlockReason::SharedAddressSpace)
    } else {
        None
    }
}

fn blocked_reason_v6(v6: &Ipv6Addr, policy: &NetworkPolicy) -> Option<BlockReason> {
    if policy.block_loopback && v6.is_loopback() {
        return Some(BlockReason::Loopback);
    }
    if let Some(v4) = v6.to_ipv4_mapped() {
        return blocked_reason_v4(&v4, policy);
    }
    if !policy.block_private_ips {
        return None;
    }
    let first = v6.segments()[0];
    if v6.is_unspecified() {
        Some(BlockReason::Unspecified)
    } else if first & 0xffc0 == 0xfe80 {
        Some(BlockReason::LinkLocal)
    } else if first & 0xfe00 == 0xfc00 {
        Some(BlockReason::Private)
    } else {
        None
    }
}

pub fn is_blocked_ip(ip: &IpAddr, policy: &NetworkPolicy) -> bool {
    blocked_reason(ip, policy).is_some()
}

/// `*.example.com` matches `example.com` and any subdomain of it.
pub fn domain_matches(host: &str, pattern: &str) -> bool {
    let host = host.trim_end_matches('.');
    match pattern.strip_prefix("*.") {
        Some(base) => {
            let host = host.to_ascii_lowercase();
            let base = base.to_ascii_lowercase();
            host == base || host.ends_with(&format!(".{}", base))
        }
        None => host.eq_ignore_ascii_case(pattern),
    }
}

/// Scheme, port and domain checks shared by the first request and every
/// redirect hop. Returns the host to resolve.
pub fn check_target<'u>(url: &'u Url, policy: &NetworkPolicy) -> Result<&'u str, NetworkError> {
    if !policy
        .allowed_schemes
        .iter()
        .any(|s| s.eq_ignore_ascii_case(url.scheme()))
    {
        return Err(NetworkError::BlockedScheme(url.scheme().to_string()));
    }

    let port = url.port_or_known_default().unwrap_or(0);
    if !policy.allowed_ports.is_empty() && !policy.allowed_ports.contains(&port) {
        return Err(NetworkError::BlockedPort(port));
    }

    let host = url
        .host_str()
        .ok_or_else(|| NetworkError::InvalidUrl(url.to_string()))?;
    let bare = host.trim_start_matches('[').trim_end_matches(']');

    match policy.mode {
        NetworkPolicyMode::AllowList
            if !policy.allowed_domains.iter().any(|d| domain_matches(bare, d)) =>
        {
            Err(NetworkError::DomainNotAllowed(bare.to_string()))
        }
        NetworkPolicyMode::DenyList
            if policy.denied_domains.iter().any(|d| domain_matches(bare, d)) =>
        {
            Err(NetworkError::DomainDenied(bare.to_string()))
        }
        _ => Ok(bare),
    }
}

/// Full pre-flight check: target rules plus address resolution.
pub async fn validate_url(url: &str, policy: &NetworkPolicy) -> Result<Url, NetworkError> {
    let parsed = Url::parse(url).map_err(|_| NetworkError::InvalidUrl(url.to_string()))?;
    let host = check_target(&parsed, policy)?.to_string();
    SafeDnsResolver::new(policy.clone())
        .resolve_and_validate(&host)
        .await?;
    Ok(parsed)
}

/// Check applied to every redirect hop before it is followed.
pub fn check_redirect_target(url: &Url, policy: &NetworkPolicy) -> Result<(), NetworkError> {
    let host = check_target(url, policy)?;
    if let Ok(ip) = host.parse::<IpAddr>() {
        if let Some(reason) = blocked_reason(&ip, policy) {
            tracing::warn!(url = %url, ip = %ip, %reason, "redirect target blocked");
            return Err(NetworkError::BlockedIp {
                host: host.to_string(),
                ip,
                reason,
            });
        }
    }
    Ok(())
}

/// DNS resolver that refuses to hand out blocked addresses.
#[derive(Clone)]
pub struct SafeDnsResolver {
    policy: Arc<NetworkPolicy>,
}

impl SafeDnsResolver {
    pub fn new(policy: NetworkPolicy) -> Self {
        Self {
            policy: Arc::new(policy),
        }
    }

    pub async fn resolve_and_validate(&self, host: &str) -> Result<Vec<IpAddr>, NetworkError> {
        let ips: Vec<IpAddr> = match host.parse::<IpAddr>() {
            Ok(ip) => vec![ip],
            Err(_) => tokio::net::lookup_host((host, 0))
                .await
                .map_err(|_| NetworkError::DnsResolutionFailed(host.to_string()))?
                .map(|a| a.ip())
                .collect(),
        };
        if ips.is_empty() {
            return Err(NetworkError::DnsResolutionFailed(host.to_string()));
        }

        // One bad address poisons the whole answer.
        for ip in &ips {
            if let Some(reason) = blocked_reason(ip, &self.policy) {
                tracing::warn!(host, ip = %ip, %reason, "outbound address blocked");
                return Err(NetworkError::BlockedIp {
                    host: host.to_string(),
                    ip: *ip,
                    reason,
                });
            }
        }
        Ok(ips)
    }
}

impl reqwest::dns::Resolve for SafeDnsResolver {
    fn resolve(&self, name: reqwest::dns::Name) -> reqwest::dns::Resolving {
        let host = name.as_str().to_string();
        let resolver = self.clone();
        Box::pin(async move {
            let ips = resolver.resolve_and_validate(&host).await?;
            let addrs: Vec<SocketAddr> = ips.into_iter().map(|ip| SocketAddr::new(ip, 0)).collect();
            Ok(Box::new(addrs.into_iter()) as reqwest::dns::Addrs)
        })
    }
}

/// Client builder that enforces `policy` on every connection and redirect hop.
/// Pool and timeout options are left to the caller.
pub fn secure_client_builder(policy: &NetworkPolicy) -> reqwest::ClientBuilder {
    let redirect_policy = {
        let policy = policy.clone();
        reqwest::redirect::Policy::custom(move |attempt| {
            if attempt.previous().len() > policy.max_redirects {
                return attempt.error(NetworkError::RedirectBlocked(format!(
                    "more than {} redirects",
                    policy.max_redirects
                )));
            }
            match check_redirect_target(attempt.url(), &policy) {
                Ok(()) => attempt.follow(),
                Err(err) => attempt.error(NetworkError::RedirectBlocked(err.to_string())),
            }
        })
    };

    // A proxy would resolve hosts itself and bypass the resolver below.
    let builder = reqwest::Client::builder()
        .no_proxy()
        .redirect(redirect_policy)
        .dns_resolver(Arc::new(SafeDnsResolver::new(policy.clone())));
    if policy.dns_rebinding_protection {
        builder.pool_max_idle_per_host(0)
    } else {
        builder
    }
}

//! Outbound network policy enforcement.

pub mod network;

pub use network::{
    blocked_reason, check_target, domain_matches, is_blocked_ip,
    secure_client_builder, validate_url, BlockReason, NetworkError, NetworkPolicy, NetworkPolicyMode, SafeDnsResolver,
};

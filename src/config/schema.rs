//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.
//! Allow-list fields also accept their camelCase spellings
//! (`sourceRange`, `ipStrategy`, `excludedIPs`).

use serde::{Deserialize, Serialize};

/// Root configuration for the proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address, TCP allow list).
    pub listener: ListenerConfig,

    /// Backend that authorized requests are forwarded to.
    pub upstream: UpstreamConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,

    /// HTTP allow lists, outermost first.
    pub allow_lists: Vec<NamedIpAllowList>,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,

    /// Optional allow list applied to TCP connections before any HTTP is read.
    #[serde(alias = "ipAllowList")]
    pub ip_allow_list: Option<TcpIpAllowListConfig>,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
            ip_allow_list: None,
        }
    }
}

/// TCP-level allow list. Only the socket peer is available at this layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct TcpIpAllowListConfig {
    #[serde(alias = "sourceRange", default)]
    pub source_range: Vec<String>,
}

/// Upstream backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Backend address (e.g., "127.0.0.1:3000").
    pub address: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:3000".to_string(),
        }
    }
}

/// A named HTTP allow-list middleware declaration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct NamedIpAllowList {
    /// Instance name used in logs, spans and metrics.
    pub name: String,

    #[serde(flatten)]
    pub config: IpAllowListConfig,
}

/// HTTP allow-list configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct IpAllowListConfig {
    /// CIDR blocks or bare addresses. Must not be empty.
    #[serde(alias = "sourceRange", default)]
    pub source_range: Vec<String>,

    /// Client IP derivation. Absent means the socket peer.
    #[serde(alias = "ipStrategy", default, skip_serializing_if = "Option::is_none")]
    pub ip_strategy: Option<IpStrategyConfig>,
}

/// Client IP strategy parameters.
///
/// `depth` and `excluded_ips` are mutually exclusive. Setting both is a
/// validation error; configs that relied on `depth` silently taking
/// precedence must drop one of the two.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct IpStrategyConfig {
    /// Position from the right of the forwarded chain (1 = rightmost). 0 = unused.
    pub depth: u32,

    /// Trusted proxies skipped while walking the forwarded chain.
    #[serde(alias = "excludedIPs", alias = "excludedIps")]
    pub excluded_ips: Vec<String>,

    /// Forwarded-address header; defaults to `X-Forwarded-For`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub header: Option<String>,
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connection establishment timeout in seconds.
    pub connect_secs: u64,

    /// Request timeout (total time for request/response) in seconds.
    pub request_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            request_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}

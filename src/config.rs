//! Configuration types for cdn-router.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Router configuration.
    pub router: RouterConfig,

    /// Telemetry configuration.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Router configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    /// Path to the coverage-zone file mapping client CIDRs to cache groups.
    pub czf_path: PathBuf,

    /// Path to the routing-config document (the CDN service catalog).
    pub routing_config_path: PathBuf,

    /// Path to the cache-state document from the health monitor.
    pub cache_states_path: PathBuf,

    /// Directory of HTTPS certificates, as `fqdn.crt`/`fqdn.key` pairs.
    /// Wildcard certificates use `#` for the wildcard label (since `*` is
    /// not a valid file name everywhere), e.g. `#.example.net.crt`.
    /// HTTPS serving is disabled when unset.
    #[serde(default)]
    pub cert_dir: Option<PathBuf>,

    /// Health monitor FQDNs to poll for routing config and cache states.
    pub monitors: Vec<String>,

    /// Address for the DNS server to listen on (UDP and TCP).
    #[serde(default = "default_dns_listen")]
    pub dns_listen: SocketAddr,

    /// Address for the HTTP redirector to listen on.
    #[serde(default = "default_http_listen")]
    pub http_listen: SocketAddr,

    /// Address for the HTTPS redirector to listen on.
    #[serde(default = "default_https_listen")]
    pub https_listen: SocketAddr,

    /// Interval between routing-config polls, in milliseconds.
    #[serde(default = "default_routing_config_poll_interval_ms")]
    pub routing_config_poll_interval_ms: u64,

    /// Interval between cache-state polls, in milliseconds.
    #[serde(default = "default_cache_states_poll_interval_ms")]
    pub cache_states_poll_interval_ms: u64,

    /// TTL for DNS answers in seconds.
    #[serde(default = "default_ttl")]
    pub ttl: u32,
}

/// Telemetry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Log level filter (e.g., "info", "debug", "cdn_router=debug,warn").
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Prometheus metrics exporter address.
    #[serde(default)]
    pub prometheus_addr: Option<SocketAddr>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            prometheus_addr: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_dns_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 53))
}

fn default_http_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 80))
}

fn default_https_listen() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 443))
}

fn default_routing_config_poll_interval_ms() -> u64 {
    60_000
}

fn default_cache_states_poll_interval_ms() -> u64 {
    5_000
}

fn default_ttl() -> u32 {
    60
}

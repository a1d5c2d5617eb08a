//! Configuration schema types.
//!
//! This module defines the structure of all configuration sections.

use serde::{Deserialize, Serialize};

/// Realtime connection section.
///
/// Controls where endpoints live and how the registry connects to them.
///
/// # Example
///
/// ```
/// use capsule_link_config::RealtimeConfig;
///
/// let config = RealtimeConfig {
///     base_url: "https://api.example.com".to_string(),
///     connect_timeout_ms: 10_000,
///     ..RealtimeConfig::default()
/// };
/// assert_eq!(config.reconnect_delay_ms, 5_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct RealtimeConfig {
    /// Base URL of the API host (`http(s)://` or `ws(s)://`).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Deadline for one connect attempt in milliseconds.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Delay before reconnecting after an unexpected close, in milliseconds.
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,

    /// Outgoing heart-beat interval in milliseconds. 0 disables it.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_outgoing_ms: u64,

    /// Incoming heart-beat interval in milliseconds. 0 disables it.
    #[serde(default = "default_heartbeat")]
    pub heartbeat_incoming_ms: u64,

    /// STOMP versions offered in `accept-version`.
    #[serde(default = "default_accept_version")]
    pub accept_version: String,

    /// Upgrade header carrying the endpoint marker.
    #[serde(default = "default_endpoint_header")]
    pub endpoint_header: String,

    /// Maximum inbound frame size in bytes.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            connect_timeout_ms: default_connect_timeout(),
            reconnect_delay_ms: default_reconnect_delay(),
            heartbeat_outgoing_ms: default_heartbeat(),
            heartbeat_incoming_ms: default_heartbeat(),
            accept_version: default_accept_version(),
            endpoint_header: default_endpoint_header(),
            max_message_size: default_max_message_size(),
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8080".to_string()
}

fn default_connect_timeout() -> u64 {
    15_000
}

fn default_reconnect_delay() -> u64 {
    5_000
}

fn default_heartbeat() -> u64 {
    10_000
}

fn default_accept_version() -> String {
    "1.2,1.1,1.0".to_string()
}

fn default_endpoint_header() -> String {
    "x-capsule-endpoint".to_string()
}

fn default_max_message_size() -> usize {
    16 * 1024 * 1024
}

/// Log format.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON formatted logs (production).
    #[default]
    Json,
    /// Human-readable pretty format (development).
    Pretty,
}

/// Logging section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Enable logging.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level or filter directive (e.g. `info`, `capsule_link=debug`).
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Metrics section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Expose a Prometheus endpoint.
    #[serde(default)]
    pub enabled: bool,

    /// Prometheus listener address.
    #[serde(default = "default_metrics_addr")]
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: default_metrics_addr(),
        }
    }
}

fn default_metrics_addr() -> String {
    "0.0.0.0:9090".to_string()
}

fn default_true() -> bool {
    true
}

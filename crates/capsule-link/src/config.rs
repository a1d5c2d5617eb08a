//! Registry configuration.
//!
//! This module defines the runtime settings shared by every endpoint a
//! [`ConnectionRegistry`](crate::ConnectionRegistry) manages.

use std::time::Duration;

use capsule_link_config::RealtimeConfig;

/// Configuration for a connection registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Base URL of the API host (`http(s)://` or `ws(s)://`).
    pub base_url: String,
    /// Deadline for a single connect attempt (default: 15 seconds).
    pub connect_timeout: Duration,
    /// Delay between an unexpected close and the next attempt (default: 5 seconds).
    pub reconnect_delay: Duration,
    /// Outgoing heart-beat interval offered to the server (default: 10 seconds).
    pub heartbeat_outgoing: Duration,
    /// Incoming heart-beat interval requested from the server (default: 10 seconds).
    pub heartbeat_incoming: Duration,
    /// STOMP versions offered in `accept-version`.
    pub accept_version: String,
    /// Name of the upgrade header carrying the endpoint marker.
    pub endpoint_header: String,
    /// Maximum size of a single inbound frame in bytes (default: 16 MB).
    pub max_message_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            connect_timeout: Duration::from_secs(15),
            reconnect_delay: Duration::from_secs(5),
            heartbeat_outgoing: Duration::from_secs(10),
            heartbeat_incoming: Duration::from_secs(10),
            accept_version: "1.2,1.1,1.0".to_string(),
            endpoint_header: "x-capsule-endpoint".to_string(),
            max_message_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl RegistryConfig {
    /// Create a new default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the base URL.
    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Set the connect deadline.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the reconnect delay.
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Set both heart-beat intervals.
    pub fn heartbeat(mut self, outgoing: Duration, incoming: Duration) -> Self {
        self.heartbeat_outgoing = outgoing;
        self.heartbeat_incoming = incoming;
        self
    }

    /// Set the offered protocol versions.
    pub fn accept_version(mut self, versions: impl Into<String>) -> Self {
        self.accept_version = versions.into();
        self
    }

    /// Set the endpoint marker header name.
    pub fn endpoint_header(mut self, name: impl Into<String>) -> Self {
        self.endpoint_header = name.into();
        self
    }

    /// Set the maximum inbound frame size.
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// The `heart-beat` header value (`outgoing,incoming` in milliseconds).
    pub fn heart_beat_header(&self) -> String {
        format!(
            "{},{}",
            self.heartbeat_outgoing.as_millis(),
            self.heartbeat_incoming.as_millis()
        )
    }

    /// Resolve the socket address for `endpoint`.
    ///
    /// The scheme of the base URL is switched from `http(s)` to `ws(s)` and
    /// the endpoint path is appended.
    pub fn endpoint_url(&self, endpoint: &str) -> String {
        let base = http_to_ws_scheme(self.base_url.trim_end_matches('/'));
        if endpoint.starts_with('/') {
            format!("{base}{endpoint}")
        } else {
            format!("{base}/{endpoint}")
        }
    }
}

impl From<&RealtimeConfig> for RegistryConfig {
    fn from(config: &RealtimeConfig) -> Self {
        Self {
            base_url: config.base_url.clone(),
            connect_timeout: Duration::from_millis(config.connect_timeout_ms),
            reconnect_delay: Duration::from_millis(config.reconnect_delay_ms),
            heartbeat_outgoing: Duration::from_millis(config.heartbeat_outgoing_ms),
            heartbeat_incoming: Duration::from_millis(config.heartbeat_incoming_ms),
            accept_version: config.accept_version.clone(),
            endpoint_header: config.endpoint_header.clone(),
            max_message_size: config.max_message_size,
        }
    }
}

/// Convert an HTTP(S) URL to the WS(S) scheme.
///
/// `ws://` and `wss://` URLs pass through unchanged.
pub fn http_to_ws_scheme(url: &str) -> String {
    if let Some(rest) = url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        url.to_string()
    }
}

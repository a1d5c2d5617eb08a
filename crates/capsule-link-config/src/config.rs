//! Main configuration types.
//!
//! This module provides the top-level [`LinkConfig`] struct.

use std::net::SocketAddr;

use serde::{Deserialize, Serialize};

use crate::{ConfigError, LogFormat, LoggingConfig, MetricsConfig, RealtimeConfig};

const URL_SCHEMES: [&str; 4] = ["http://", "https://", "ws://", "wss://"];

/// Complete configuration for a process embedding the connection registry.
///
/// Use [`ConfigLoader`](crate::ConfigLoader) to load configuration from files
/// and environment variables.
///
/// # Example
///
/// ```
/// use capsule_link_config::LinkConfig;
///
/// let config = LinkConfig::default();
/// assert_eq!(config.realtime.connect_timeout_ms, 15_000);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(deny_unknown_fields)]
pub struct LinkConfig {
    /// Realtime connection settings.
    #[serde(default)]
    pub realtime: RealtimeConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics settings.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl LinkConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The base URL is empty or does not use http, https, ws or wss
    /// - The connect timeout or reconnect delay is zero
    /// - The maximum message size is zero
    /// - Metrics are enabled with an unparseable address
    pub fn validate(&self) -> Result<(), ConfigError> {
        let realtime = &self.realtime;

        if !URL_SCHEMES
            .iter()
            .any(|scheme| realtime.base_url.starts_with(scheme) && realtime.base_url.len() > scheme.len())
        {
            return Err(ConfigError::invalid_value(
                "realtime.base_url",
                format!(
                    "expected an http, https, ws or wss URL, got {:?}",
                    realtime.base_url
                ),
            ));
        }

        if realtime.connect_timeout_ms == 0 {
            return Err(ConfigError::invalid_value(
                "realtime.connect_timeout_ms",
                "must be greater than 0",
            ));
        }

        if realtime.reconnect_delay_ms == 0 {
            return Err(ConfigError::invalid_value(
                "realtime.reconnect_delay_ms",
                "must be greater than 0",
            ));
        }

        if realtime.max_message_size == 0 {
            return Err(ConfigError::invalid_value(
                "realtime.max_message_size",
                "must be greater than 0",
            ));
        }

        if realtime.accept_version.trim().is_empty() {
            return Err(ConfigError::invalid_value(
                "realtime.accept_version",
                "must list at least one version",
            ));
        }

        if self.metrics.enabled && self.metrics.addr.parse::<SocketAddr>().is_err() {
            return Err(ConfigError::invalid_value(
                "metrics.addr",
                format!("invalid socket address: {}", self.metrics.addr),
            ));
        }

        Ok(())
    }

    /// Create a development configuration preset.
    ///
    /// Pretty debug logs, short reconnect delay, metrics off.
    ///
    /// # Example
    ///
    /// ```
    /// use capsule_link_config::LinkConfig;
    ///
    /// let config = LinkConfig::development();
    /// assert_eq!(config.logging.level, "debug");
    /// ```
    #[must_use]
    pub fn development() -> Self {
        let mut config = Self::default();
        config.logging.level = "debug".to_string();
        config.logging.format = LogFormat::Pretty;
        config.realtime.reconnect_delay_ms = 1_000;
        config.metrics.enabled = false;
        config
    }

    /// Create a production configuration preset.
    ///
    /// JSON info logs and a Prometheus endpoint.
    ///
    /// # Example
    ///
    /// ```
    /// use capsule_link_config::{LinkConfig, LogFormat};
    ///
    /// let config = LinkConfig::production();
    /// assert_eq!(config.logging.format, LogFormat::Json);
    /// assert!(config.metrics.enabled);
    /// ```
    #[must_use]
    pub fn production() -> Self {
        let mut config = Self::default();
        config.logging.level = "info".to_string();
        config.logging.format = LogFormat::Json;
        config.metrics.enabled = true;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(LinkConfig::default().validate().is_ok());
    }

    #[test]
    fn test_presets_are_valid() {
        assert!(LinkConfig::development().validate().is_ok());
        assert!(LinkConfig::production().validate().is_ok());
    }

    #[test]
    fn test_invalid_base_url_scheme() {
        let mut config = LinkConfig::default();
        config.realtime.base_url = "ftp://files.example.com".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("realtime.base_url"));
    }

    #[test]
    fn test_scheme_without_host_rejected() {
        let mut config = LinkConfig::default();
        config.realtime.base_url = "https://".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_ws_base_url_accepted() {
        let mut config = LinkConfig::default();
        config.realtime.base_url = "wss://rt.example.com".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_durations_rejected() {
        let mut config = LinkConfig::default();
        config.realtime.connect_timeout_ms = 0;
        assert!(config.validate().is_err());

        let mut config = LinkConfig::default();
        config.realtime.reconnect_delay_ms = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_heartbeat_allowed() {
        let mut config = LinkConfig::default();
        config.realtime.heartbeat_outgoing_ms = 0;
        config.realtime.heartbeat_incoming_ms = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_metrics_addr() {
        let mut config = LinkConfig::default();
        config.metrics.enabled = true;
        config.metrics.addr = "not-an-address".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("metrics.addr"));
    }

    #[test]
    fn test_metrics_addr_ignored_when_disabled() {
        let mut config = LinkConfig::default();
        config.metrics.addr = "not-an-address".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_full_toml_roundtrip_sections() {
        let toml = r#"
            [realtime]
            base_url = "https://api.example.com"

            [logging]
            format = "pretty"

            [metrics]
            enabled = true
            addr = "127.0.0.1:9100"
        "#;
        let config: LinkConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.realtime.base_url, "https://api.example.com");
        assert_eq!(config.logging.format, LogFormat::Pretty);
        assert_eq!(config.metrics.addr, "127.0.0.1:9100");
        assert!(config.validate().is_ok());
    }
}

//! Prometheus exporter setup.
//!
//! Installs the global `metrics` recorder with an HTTP listener. The
//! registry crate records through the `metrics` facade, so nothing here
//! knows individual metric names.
//!
//! # Example
//!
//! ```rust,ignore
//! use capsule_link_telemetry::metrics::{init_metrics, MetricsConfig};
//!
//! init_metrics(&MetricsConfig {
//!     enabled: true,
//!     addr: "127.0.0.1:9090".to_string(),
//! })?;
//! capsule_link::metrics::describe_metrics();
//! ```

use std::net::SocketAddr;

use capsule_link_config::MetricsConfig as MetricsSection;
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Whether the exporter is installed.
    pub enabled: bool,

    /// Listener address (e.g. "0.0.0.0:9090").
    pub addr: String,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            addr: "0.0.0.0:9090".to_string(),
        }
    }
}

impl From<&MetricsSection> for MetricsConfig {
    fn from(section: &MetricsSection) -> Self {
        Self {
            enabled: section.enabled,
            addr: section.addr.clone(),
        }
    }
}

/// Parses the listener address.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` if `addr` is not a socket address.
pub fn parse_addr(addr: &str) -> TelemetryResult<SocketAddr> {
    addr.parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{addr}: {e}")))
}

/// Installs the Prometheus recorder and its HTTP listener.
///
/// Must be called from within a Tokio runtime.
///
/// # Errors
///
/// Returns `TelemetryError::InvalidAddress` for a bad address and
/// `TelemetryError::MetricsInit` if a recorder is already installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr = parse_addr(&config.addr)?;

    let (recorder, exporter) = PrometheusBuilder::new()
        .with_http_listener(addr)
        .build()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    metrics::set_global_recorder(recorder)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    tokio::spawn(async move {
        if let Err(e) = exporter.await {
            tracing::error!(error = ?e, "prometheus exporter stopped");
        }
    });

    tracing::info!(%addr, "prometheus exporter listening");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MetricsConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.addr, "0.0.0.0:9090");
    }

    #[test]
    fn test_from_metrics_section() {
        let section = MetricsSection {
            enabled: true,
            addr: "127.0.0.1:9100".to_string(),
        };
        let config = MetricsConfig::from(&section);
        assert!(config.enabled);
        assert_eq!(config.addr, "127.0.0.1:9100");
    }

    #[test]
    fn test_parse_addr() {
        assert!(parse_addr("127.0.0.1:9090").is_ok());
        let err = parse_addr("localhost").unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidAddress(_)));
    }

    #[test]
    fn test_enabled_metrics_rejects_bad_address() {
        let config = MetricsConfig {
            enabled: true,
            addr: "not-an-address".to_string(),
        };
        let err = init_metrics(&config).unwrap_err();
        assert!(matches!(err, TelemetryError::InvalidAddress(_)));
    }

    #[test]
    fn test_disabled_metrics_is_noop() {
        assert!(init_metrics(&MetricsConfig::default()).is_ok());
    }
}

//! Logging and metrics setup for processes embedding `capsule-link`.
//!
//! - **Logging**: structured JSON or pretty output via `tracing-subscriber`
//! - **Metrics**: a Prometheus exporter for the registry's `metrics` facade
//!
//! # Example
//!
//! ```rust,ignore
//! use capsule_link_config::ConfigLoader;
//! use capsule_link_telemetry::init_telemetry;
//!
//! let config = ConfigLoader::new().with_defaults().load()?;
//! init_telemetry(&config)?;
//! capsule_link::metrics::describe_metrics();
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod logging;
pub mod metrics;

use capsule_link_config::LinkConfig;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{init_metrics, MetricsConfig};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;

/// Installs logging, then the metrics exporter, from the loaded config.
///
/// # Errors
///
/// Returns `TelemetryError` if either subsystem fails to initialize.
pub fn init_telemetry(config: &LinkConfig) -> TelemetryResult<()> {
    init_logging(&LogConfig::from(&config.logging))?;
    init_metrics(&MetricsConfig::from(&config.metrics))?;
    Ok(())
}

//! Typed configuration for the Capsule connection registry.
//!
//! This crate provides a strongly-typed configuration system with support for:
//! - TOML and JSON configuration files
//! - Environment variable overrides
//! - Strict validation (fails on unknown fields)
//! - Layered configuration (defaults → file → env)
//!
//! # Overview
//!
//! The configuration system is built around the [`LinkConfig`] struct:
//!
//! - [`RealtimeConfig`] - Where endpoints live and how to connect to them
//! - [`LoggingConfig`] - Log level and output format
//! - [`MetricsConfig`] - Prometheus exporter settings
//!
//! # Example
//!
//! ```no_run
//! use capsule_link_config::{ConfigLoader, LinkConfig};
//!
//! # fn main() -> Result<(), capsule_link_config::ConfigError> {
//! let config = ConfigLoader::new()
//!     .with_defaults()
//!     .with_file("capsule-link.toml")?
//!     .with_env_prefix("CAPSULE_LINK")
//!     .load()?;
//!
//! println!("Connecting to: {}", config.realtime.base_url);
//! # Ok(())
//! # }
//! ```
//!
//! # Configuration File Format
//!
//! ```toml
//! [realtime]
//! base_url = "https://api.example.com"
//! connect_timeout_ms = 15000
//! reconnect_delay_ms = 5000
//! heartbeat_outgoing_ms = 10000
//! heartbeat_incoming_ms = 10000
//! accept_version = "1.2,1.1,1.0"
//! max_message_size = 16777216
//!
//! [logging]
//! enabled = true
//! level = "info"
//! format = "json"
//!
//! [metrics]
//! enabled = true
//! addr = "0.0.0.0:9090"
//! ```
//!
//! # Environment Variable Overrides
//!
//! All configuration values can be overridden via environment variables using
//! the format `PREFIX__SECTION__KEY`. For example:
//!
//! - `CAPSULE_LINK__REALTIME__BASE_URL=https://api.example.com`
//! - `CAPSULE_LINK__REALTIME__RECONNECT_DELAY_MS=2000`
//! - `CAPSULE_LINK__METRICS__ENABLED=false`

#![warn(missing_docs)]

mod config;
mod error;
mod loader;
mod schema;

pub use config::*;
pub use error::ConfigError;
pub use loader::{ConfigLoader, DEFAULT_ENV_PREFIX};
pub use schema::*;

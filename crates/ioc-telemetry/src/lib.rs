//! # IOC Telemetry
//!
//! Observability for the IOC engine.
//!
//! ## Components
//!
//! - **Logging**: `tracing-subscriber` fmt/JSON output filtered by `EnvFilter`
//! - **Metrics**: Prometheus counters and gauges for the event bus and links
//!
//! ## Usage
//!
//! ```rust,ignore
//! use ioc_telemetry::{init_telemetry, TelemetryConfig};
//!
//! fn main() {
//!     let config = TelemetryConfig::from_env();
//!     let _guard = init_telemetry(&config).expect("Failed to init telemetry");
//!
//!     // Events and link transitions are now logged and counted
//! }
//! ```
//!
//! ## Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `IOC_SERVICE_NAME` | `ioc` | Service name attached to log lines |
//! | `IOC_LOG_LEVEL` | `info` | Log level filter (falls back to `RUST_LOG`) |
//! | `IOC_JSON_LOGS` | `false` | Emit JSON formatted logs |

mod config;
mod logging;
pub mod metrics;

pub use config::TelemetryConfig;
pub use logging::{init_logging, LoggingHandle};
pub use metrics::{
    gather_metrics, register_metrics, MetricsHandle, BUS_EVENTS_DISPATCHED, BUS_EVENTS_POSTED,
    BUS_EVENTS_REJECTED, BUS_SUBSCRIBERS, LINKS_ACCEPTED, LINKS_ACTIVE, LINKS_TORN_DOWN,
    SERVICES_ONLINE,
};

use thiserror::Error;

/// Telemetry initialization errors
#[derive(Error, Debug)]
pub enum TelemetryError {
    #[error("Logging already initialized for this process")]
    AlreadyInitialized,

    #[error("Failed to initialize logging: {0}")]
    LoggingInit(String),

    #[error("Failed to initialize Prometheus metrics: {0}")]
    MetricsInit(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// Initialize logging and metrics.
///
/// Returns a guard that should be held for the lifetime of the application.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<TelemetryGuard, TelemetryError> {
    // Metrics first: registration is idempotent and never touches global logging
    let metrics = register_metrics()?;
    let logging = init_logging(config)?;

    Ok(TelemetryGuard {
        _logging: logging,
        _metrics: metrics,
    })
}

/// Guard that keeps telemetry active.
pub struct TelemetryGuard {
    _logging: LoggingHandle,
    _metrics: MetricsHandle,
}

impl Drop for TelemetryGuard {
    fn drop(&mut self) {
        tracing::info!("Shutting down telemetry");
    }
}

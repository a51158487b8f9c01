//! Telemetry configuration from environment variables or a config file section.

use serde::Deserialize;
use std::env;

/// Configuration for logging output.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Service name attached to every log line
    pub service_name: String,

    /// Log level filter (trace, debug, info, warn, error)
    pub log_level: String,

    /// Whether to enable JSON formatted logs
    pub json_logs: bool,

    /// Whether to include thread ids (useful when debugging producer races)
    pub thread_ids: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "ioc".to_string(),
            log_level: "info".to_string(),
            json_logs: false,
            thread_ids: false,
        }
    }
}

impl TelemetryConfig {
    /// Create configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `IOC_SERVICE_NAME`: Service name (default: ioc)
    /// - `IOC_LOG_LEVEL` or `RUST_LOG`: Log level (default: info)
    /// - `IOC_JSON_LOGS`: Enable JSON logs (default: false)
    /// - `IOC_THREAD_IDS`: Include thread ids (default: false)
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply environment overrides on top of an existing configuration.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(name) = env::var("IOC_SERVICE_NAME") {
            self.service_name = name;
        }
        if let Ok(level) = env::var("IOC_LOG_LEVEL").or_else(|_| env::var("RUST_LOG")) {
            self.log_level = level;
        }
        if let Ok(v) = env::var("IOC_JSON_LOGS") {
            self.json_logs = is_truthy(&v);
        }
        if let Ok(v) = env::var("IOC_THREAD_IDS") {
            self.thread_ids = is_truthy(&v);
        }
        self
    }
}

fn is_truthy(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

//! # IOC Configuration
//!
//! Process-wide limits and timings, loaded from TOML with environment
//! overrides.
//!
//! ```toml
//! [conles]
//! max_subscribers = 16
//! queue_depth = 64
//! auto_dispatch = false
//!
//! [conet]
//! max_links = 64
//!
//! [telemetry]
//! log_level = "debug"
//! ```

use std::env;
use std::path::Path;
use std::time::Duration;

use ioc_telemetry::TelemetryConfig;
use serde::Deserialize;
use thiserror::Error;

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct IocConfig {
    /// Connectionless bus limits.
    pub conles: ConlesConfig,
    /// Connection-oriented link limits.
    pub conet: ConetConfig,
    /// Logging configuration.
    pub telemetry: TelemetryConfig,
}

/// Limits for the connectionless event bus.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConlesConfig {
    /// Maximum registered subscribers.
    pub max_subscribers: usize,
    /// Event descriptor queue depth.
    pub queue_depth: usize,
    /// Start the background dispatcher with the runtime.
    pub auto_dispatch: bool,
    /// How long the idle dispatcher sleeps between wake-up checks.
    pub dispatch_idle_wait_ms: u64,
}

impl Default for ConlesConfig {
    fn default() -> Self {
        Self {
            max_subscribers: 16,
            queue_depth: 64,
            auto_dispatch: false,
            dispatch_idle_wait_ms: 50,
        }
    }
}

impl ConlesConfig {
    /// Idle wait as a `Duration`.
    pub fn dispatch_idle_wait(&self) -> Duration {
        Duration::from_millis(self.dispatch_idle_wait_ms)
    }
}

/// Limits for connection-oriented links.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConetConfig {
    /// Maximum links in a non-terminal state.
    pub max_links: usize,
    /// Terminal link records kept so later operations report `LinkBroken`.
    pub max_tombstones: usize,
    /// Poll interval used by `accept_with_timeout` and command replies.
    pub accept_poll_interval_ms: u64,
    /// Upper bound on waiting for a command reply.
    pub command_timeout_ms: u64,
}

impl Default for ConetConfig {
    fn default() -> Self {
        Self {
            max_links: 64,
            max_tombstones: 1024,
            accept_poll_interval_ms: 5,
            command_timeout_ms: 1000,
        }
    }
}

impl ConetConfig {
    /// Accept poll interval as a `Duration`.
    pub fn accept_poll_interval(&self) -> Duration {
        Duration::from_millis(self.accept_poll_interval_ms.max(1))
    }

    /// Command reply timeout as a `Duration`.
    pub fn command_timeout(&self) -> Duration {
        Duration::from_millis(self.command_timeout_ms)
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    /// The TOML document is malformed.
    #[error("Failed to parse config: {0}")]
    Parse(String),

    /// An environment override is not a number.
    #[error("Invalid value for {var}: {value}")]
    InvalidEnv { var: &'static str, value: String },

    /// A limit that must be positive is zero.
    #[error("{field} must be greater than zero")]
    ZeroLimit { field: &'static str },
}

impl IocConfig {
    /// Parse a TOML document. Missing sections fall back to defaults.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(source).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a TOML file, then apply environment overrides.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Self::from_toml_str(&source)?.with_env_overrides()
    }

    /// Apply environment overrides.
    ///
    /// # Environment Variables
    ///
    /// - `IOC_MAX_SUBSCRIBERS`: Conles subscriber capacity
    /// - `IOC_QUEUE_DEPTH`: Conles queue depth
    /// - `IOC_MAX_LINKS`: live link capacity
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(v) = env_usize("IOC_MAX_SUBSCRIBERS")? {
            self.conles.max_subscribers = v;
        }
        if let Some(v) = env_usize("IOC_QUEUE_DEPTH")? {
            self.conles.queue_depth = v;
        }
        if let Some(v) = env_usize("IOC_MAX_LINKS")? {
            self.conet.max_links = v;
        }
        self.telemetry = self.telemetry.with_env_overrides();
        self.validate()?;
        Ok(self)
    }

    /// Reject zero capacities.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.conles.max_subscribers == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "conles.max_subscribers",
            });
        }
        if self.conles.queue_depth == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "conles.queue_depth",
            });
        }
        if self.conet.max_links == 0 {
            return Err(ConfigError::ZeroLimit {
                field: "conet.max_links",
            });
        }
        Ok(())
    }
}

fn env_usize(var: &'static str) -> Result<Option<usize>, ConfigError> {
    match env::var(var) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { var, value }),
        Err(_) => Ok(None),
    }
}

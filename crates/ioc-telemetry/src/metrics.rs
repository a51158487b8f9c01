//! Prometheus metrics for the IOC engine.
//!
//! All metrics follow the naming convention: `ioc_<area>_<metric>_<unit>`
//!
//! ## Metric Types
//!
//! - **Counter**: Monotonically increasing value (e.g., events_posted_total)
//! - **Gauge**: Value that can go up or down (e.g., links_active)

use lazy_static::lazy_static;
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // CONLES EVENT BUS METRICS
    // =========================================================================

    /// Events accepted by the bus (queued or delivered inline)
    pub static ref BUS_EVENTS_POSTED: IntCounterVec = IntCounterVec::new(
        Opts::new("ioc_bus_events_posted_total", "Events accepted by the Conles bus"),
        &["mode"]  // mode: async/sync
    ).expect("metric creation failed");

    /// Events refused by the bus
    pub static ref BUS_EVENTS_REJECTED: IntCounterVec = IntCounterVec::new(
        Opts::new("ioc_bus_events_rejected_total", "Events refused by the Conles bus"),
        &["reason"]  // reason: no_consumer/too_many_queuing/too_long_emptying
    ).expect("metric creation failed");

    /// Event deliveries to subscriber callbacks
    pub static ref BUS_EVENTS_DISPATCHED: IntCounter = IntCounter::new(
        "ioc_bus_events_dispatched_total",
        "Events handed to subscriber callbacks"
    ).expect("metric creation failed");

    /// Registered subscribers across all buses
    pub static ref BUS_SUBSCRIBERS: IntGauge = IntGauge::new(
        "ioc_bus_subscribers",
        "Number of registered event subscribers"
    ).expect("metric creation failed");

    // =========================================================================
    // CONET LINK METRICS
    // =========================================================================

    /// Links created by accept or connect
    pub static ref LINKS_ACCEPTED: IntCounterVec = IntCounterVec::new(
        Opts::new("ioc_links_established_total", "Connection-oriented links established"),
        &["origin"]  // origin: accepted/connected
    ).expect("metric creation failed");

    /// Links moved to a terminal state
    pub static ref LINKS_TORN_DOWN: IntCounterVec = IntCounterVec::new(
        Opts::new("ioc_links_torn_down_total", "Links moved to Closed or Broken"),
        &["reason"]  // reason: closed/peer_closed/reset/service_offline
    ).expect("metric creation failed");

    /// Links currently connected
    pub static ref LINKS_ACTIVE: IntGauge = IntGauge::new(
        "ioc_links_active",
        "Number of links in the Connected state"
    ).expect("metric creation failed");

    /// Listening services
    pub static ref SERVICES_ONLINE: IntGauge = IntGauge::new(
        "ioc_services_online",
        "Number of services currently listening"
    ).expect("metric creation failed");
}

/// Handle proving the metrics were registered.
pub struct MetricsHandle {
    registry: Registry,
}

impl MetricsHandle {
    /// Registry the metrics live in.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}

/// Register all metrics with the global registry.
///
/// Safe to call more than once: already registered collectors are skipped.
pub fn register_metrics() -> Result<MetricsHandle, TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Event bus
        Box::new(BUS_EVENTS_POSTED.clone()),
        Box::new(BUS_EVENTS_REJECTED.clone()),
        Box::new(BUS_EVENTS_DISPATCHED.clone()),
        Box::new(BUS_SUBSCRIBERS.clone()),
        // Links
        Box::new(LINKS_ACCEPTED.clone()),
        Box::new(LINKS_TORN_DOWN.clone()),
        Box::new(LINKS_ACTIVE.clone()),
        Box::new(SERVICES_ONLINE.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }

    Ok(MetricsHandle {
        registry: REGISTRY.clone(),
    })
}

/// Encode all metrics as Prometheus text format.
pub fn gather_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

//! Static capability limits.
//!
//! The registry is a pure function of the process configuration. Components
//! read their limits from it at construction time and tests read it before
//! asserting boundary behavior.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::IocConfig;

/// Capability categories offered by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum CapabilityId {
    /// Connectionless broadcast events on the auto link
    ConlesModeEvent,
    /// Command execution over a connection-oriented link
    ConetModeCommand,
    /// Data streaming over a connection-oriented link
    ConetModeData,
}

impl CapabilityId {
    /// Every recognized capability.
    pub const ALL: [CapabilityId; 3] = [
        CapabilityId::ConlesModeEvent,
        CapabilityId::ConetModeCommand,
        CapabilityId::ConetModeData,
    ];
}

/// Read-only snapshot of one capability's limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CapabilityDescription {
    pub capability: CapabilityId,
    /// Maximum subscribers (zero where subscriptions do not apply)
    pub max_subscribers: usize,
    /// Event queue depth (zero where no queue is kept)
    pub queue_depth: usize,
    /// Maximum live links (zero for the connectionless bus)
    pub max_links: usize,
}

/// Process-wide capability table.
#[derive(Debug, Clone)]
pub struct CapabilityRegistry {
    entries: BTreeMap<CapabilityId, CapabilityDescription>,
}

impl CapabilityRegistry {
    /// Build the table from configuration.
    pub fn from_config(config: &IocConfig) -> Self {
        let entries = CapabilityId::ALL
            .iter()
            .map(|&capability| {
                let desc = match capability {
                    CapabilityId::ConlesModeEvent => CapabilityDescription {
                        capability,
                        max_subscribers: config.conles.max_subscribers,
                        queue_depth: config.conles.queue_depth,
                        max_links: 0,
                    },
                    CapabilityId::ConetModeCommand | CapabilityId::ConetModeData => {
                        CapabilityDescription {
                            capability,
                            max_subscribers: 0,
                            queue_depth: 0,
                            max_links: config.conet.max_links,
                        }
                    }
                };
                (capability, desc)
            })
            .collect();
        Self { entries }
    }

    /// Look up one capability. Never fails for a variant of [`CapabilityId`].
    pub fn query(&self, capability: CapabilityId) -> CapabilityDescription {
        match self.entries.get(&capability) {
            Some(desc) => *desc,
            None => CapabilityDescription {
                capability,
                max_subscribers: 0,
                queue_depth: 0,
                max_links: 0,
            },
        }
    }

    /// All descriptions in capability order.
    pub fn snapshot(&self) -> Vec<CapabilityDescription> {
        self.entries.values().copied().collect()
    }

    /// The table rendered as JSON, for diagnostics.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.snapshot())
    }
}

impl Default for CapabilityRegistry {
    fn default() -> Self {
        Self::from_config(&IocConfig::default())
    }
}

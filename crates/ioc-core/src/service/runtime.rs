//! Runtime facade tying the auto link and the link manager together.

use std::sync::Arc;

use tracing::info;

use super::conles::ConlesEventBus;
use super::dispatcher::DispatcherHandle;
use super::lifecycle::LinkLifecycleManager;
use crate::adapters::MemoryTransport;
use crate::config::IocConfig;
use crate::domain::{
    CapabilityDescription, CapabilityId, CapabilityRegistry, IocResult, LinkId, LinkState,
};
use crate::ports::TransportAdapter;

/// One IOC instance: the Conles bus behind `LinkId::AUTO` plus the
/// connection-oriented links of transport `T`.
///
/// Construction is explicit so a process (or a test) may build several.
pub struct IocRuntime<T: TransportAdapter> {
    config: IocConfig,
    capabilities: CapabilityRegistry,
    bus: Arc<ConlesEventBus>,
    links: LinkLifecycleManager<T>,
    dispatcher: Option<DispatcherHandle>,
}

impl<T: TransportAdapter> IocRuntime<T> {
    /// Build the runtime and start the dispatcher if `conles.auto_dispatch`
    /// is set.
    pub fn new(config: IocConfig, transport: T) -> IocResult<Self> {
        let capabilities = CapabilityRegistry::from_config(&config);
        let bus = Arc::new(ConlesEventBus::from_config(&config));
        let links = LinkLifecycleManager::new(transport, config.conet.clone());
        let dispatcher = if config.conles.auto_dispatch {
            Some(bus.spawn_dispatcher()?)
        } else {
            None
        };
        info!(
            queue_depth = config.conles.queue_depth,
            max_subscribers = config.conles.max_subscribers,
            max_links = config.conet.max_links,
            auto_dispatch = config.conles.auto_dispatch,
            "IOC runtime started"
        );
        Ok(Self {
            config,
            capabilities,
            bus,
            links,
            dispatcher,
        })
    }

    /// The auto-link event bus.
    pub fn bus(&self) -> &Arc<ConlesEventBus> {
        &self.bus
    }

    pub fn links(&self) -> &LinkLifecycleManager<T> {
        &self.links
    }

    pub fn config(&self) -> &IocConfig {
        &self.config
    }

    pub fn capability(&self, capability: CapabilityId) -> CapabilityDescription {
        self.capabilities.query(capability)
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.capabilities
    }

    /// `LinkId::AUTO` reads the bus; any other id reads the link manager.
    pub fn get_link_state(&self, link: LinkId) -> IocResult<LinkState> {
        if link.is_auto() {
            Ok(self.bus.link_state())
        } else {
            self.links.get_link_state(link)
        }
    }

    pub fn has_dispatcher(&self) -> bool {
        self.dispatcher.is_some()
    }

    /// Stop the dispatcher and close every link and service.
    pub fn shutdown(mut self) -> usize {
        if let Some(handle) = self.dispatcher.take() {
            handle.stop();
        }
        let closed = self.links.shutdown();
        info!(closed, "IOC runtime stopped");
        closed
    }
}

impl IocRuntime<MemoryTransport> {
    /// Runtime over the in-process transport.
    pub fn in_memory(config: IocConfig) -> IocResult<Self> {
        Self::new(config, MemoryTransport::new())
    }
}

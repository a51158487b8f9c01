//! # Inbound Ports
//!
//! Driving APIs exposed by the engine.
//!
//! | Trait | Implemented by | Link domain |
//! |-------|----------------|-------------|
//! | `ConlesApi` | `ConlesEventBus` | `LinkId::AUTO` |
//! | `LinkApi` | `LinkLifecycleManager<T>` | dynamic link ids |

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::domain::{
    CapabilityDescription, EventDesc, EventFilter, IocResult, LinkId, LinkRequest, LinkResponse,
    LinkState, PostOptions, ServiceId, SubscriberId,
};
use crate::ports::outbound::EventConsumer;

/// Arguments for [`ConlesApi::subscribe`].
#[derive(Clone)]
pub struct SubscribeArgs {
    /// Identity token; duplicates are rejected
    pub id: SubscriberId,
    pub consumer: Arc<dyn EventConsumer>,
    pub filter: EventFilter,
}

impl SubscribeArgs {
    /// Subscribe to every event.
    pub fn new(id: SubscriberId, consumer: Arc<dyn EventConsumer>) -> Self {
        Self {
            id,
            consumer,
            filter: EventFilter::All,
        }
    }

    /// Restrict delivery to the filter.
    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }
}

impl fmt::Debug for SubscribeArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscribeArgs")
            .field("id", &self.id)
            .field("filter", &self.filter)
            .finish_non_exhaustive()
    }
}

/// Connectionless broadcast API on the auto link.
///
/// # Errors
/// - `subscribe`: `ConflictConsumer`, `TooManyConsumers`
/// - `unsubscribe`: `NoConsumer` (bus empty), `NotFoundConsumer`
/// - `post`: `NoConsumer`, `TooManyQueuing`, `TooLongEmptying`
pub trait ConlesApi: Send + Sync {
    /// Register a subscriber.
    fn subscribe(&self, args: SubscribeArgs) -> IocResult<()>;

    /// Remove a subscriber by identity.
    fn unsubscribe(&self, id: SubscriberId) -> IocResult<()>;

    /// Post an event. Returns the sequence number stamped on it.
    fn post(&self, event: EventDesc, options: PostOptions) -> IocResult<u64>;

    /// Drain the queue and dispatch every descriptor. Returns how many were drained.
    fn force_process(&self) -> usize;

    /// Current `(Ready, Idle | Locked)` pair.
    fn link_state(&self) -> LinkState;

    /// Limits this bus enforces.
    fn capability(&self) -> CapabilityDescription;
}

/// Connection-oriented link API.
///
/// # Errors
/// Operations on an id that was never allocated (or whose record was
/// evicted) fail with `NotExistLink`. Operations on a link that has been
/// closed or broken fail with `LinkBroken`.
pub trait LinkApi: Send + Sync {
    /// Start listening on `address`.
    fn online_service(&self, address: &str) -> IocResult<ServiceId>;

    /// Close every link accepted by the service, then release the listener.
    /// Returns the number of links closed.
    fn offline_service(&self, service: ServiceId) -> IocResult<usize>;

    /// Accept one pending connection. `Ok(None)` when nothing is pending.
    fn accept_incoming(&self, service: ServiceId) -> IocResult<Option<LinkId>>;

    /// Accept, polling until `timeout` elapses.
    fn accept_with_timeout(&self, service: ServiceId, timeout: Duration) -> IocResult<LinkId>;

    /// Open an outgoing link.
    fn connect(&self, address: &str) -> IocResult<LinkId>;

    /// Close a link from this side.
    fn close_link(&self, link: LinkId) -> IocResult<()>;

    /// Probe the peer. Returns `true` if the link was torn down.
    fn detect_peer_close(&self, link: LinkId) -> IocResult<bool>;

    /// Run one request on the link.
    fn execute_on_link(&self, link: LinkId, request: LinkRequest) -> IocResult<LinkResponse>;

    /// Diagnostic state read; safe under concurrent mutation.
    fn get_link_state(&self, link: LinkId) -> IocResult<LinkState>;
}

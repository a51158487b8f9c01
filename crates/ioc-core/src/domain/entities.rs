//! Core identifiers and value types shared by the bus and the link manager.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// Timestamp in milliseconds since UNIX epoch.
pub type Timestamp = u64;

// =============================================================================
// IDENTIFIERS
// =============================================================================

/// Process-unique link identifier.
///
/// `LinkId::AUTO` names the single connectionless bus. Every other value is
/// allocated by the link manager for one accepted or initiated connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LinkId(u64);

impl LinkId {
    /// The well-known Conles auto link.
    pub const AUTO: LinkId = LinkId(0);

    /// First value handed out for connection-oriented links.
    pub const FIRST_DYNAMIC: u64 = 1024;

    /// Wrap a raw value.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw numeric value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// True for the Conles auto link.
    pub const fn is_auto(self) -> bool {
        self.0 == Self::AUTO.0
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_auto() {
            write!(f, "link#auto")
        } else {
            write!(f, "link#{}", self.0)
        }
    }
}

/// Event identifier used for subscriber filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evt#{}", self.0)
    }
}

/// Caller-assigned subscriber identity token.
///
/// Two subscriptions with the same token are the same logical subscriber,
/// whatever their filters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(pub u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub#{}", self.0)
    }
}

/// Identifier of a listening service owned by the link manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(pub u64);

impl fmt::Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "srv#{}", self.0)
    }
}

// =============================================================================
// EVENT DESCRIPTOR
// =============================================================================

/// Immutable record describing one posted event.
///
/// `seq_id` and `timestamp_ms` are stamped by the bus when the event is
/// accepted; values supplied by the caller are overwritten.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventDesc {
    /// Event identifier
    pub event_id: EventId,
    /// Small inline value carried with the event
    pub value: u64,
    /// Opaque payload, never interpreted by the engine
    pub payload: Arc<[u8]>,
    /// Global acceptance order on the bus (starts at 1)
    pub seq_id: u64,
    /// Acceptance time
    pub timestamp_ms: Timestamp,
}

impl EventDesc {
    /// Create a descriptor with an empty payload.
    pub fn new(event_id: EventId) -> Self {
        Self {
            event_id,
            value: 0,
            payload: Arc::from(Vec::new()),
            seq_id: 0,
            timestamp_ms: 0,
        }
    }

    /// Attach an inline value.
    pub fn with_value(mut self, value: u64) -> Self {
        self.value = value;
        self
    }

    /// Attach an opaque payload.
    pub fn with_payload(mut self, payload: impl Into<Vec<u8>>) -> Self {
        self.payload = Arc::from(payload.into());
        self
    }

    pub(crate) fn stamped(mut self, seq_id: u64, timestamp_ms: Timestamp) -> Self {
        self.seq_id = seq_id;
        self.timestamp_ms = timestamp_ms;
        self
    }
}

// =============================================================================
// SUBSCRIPTION FILTER
// =============================================================================

/// Event-id filter attached to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EventFilter {
    /// Match every event
    #[default]
    All,
    /// Match only the listed ids
    Ids(Vec<EventId>),
}

impl EventFilter {
    /// Match every event.
    pub fn all() -> Self {
        Self::All
    }

    /// Match the given ids. An empty list is a wildcard.
    pub fn ids(ids: impl IntoIterator<Item = EventId>) -> Self {
        let ids: Vec<EventId> = ids.into_iter().collect();
        if ids.is_empty() {
            Self::All
        } else {
            Self::Ids(ids)
        }
    }

    /// Check whether an event id passes the filter.
    pub fn matches(&self, event_id: EventId) -> bool {
        match self {
            Self::All => true,
            Self::Ids(ids) => ids.is_empty() || ids.contains(&event_id),
        }
    }
}

// =============================================================================
// POSTING OPTIONS
// =============================================================================

/// Whether the event is queued or delivered on the caller's thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeliveryMode {
    /// Enqueue and return; delivery happens on the drain path
    #[default]
    Async,
    /// Wait for earlier events to drain, then deliver inline
    Sync,
}

/// What the caller does when the queue condition is not met.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockingPolicy {
    /// Wait until the condition holds
    #[default]
    Blocking,
    /// Fail immediately
    NonBlocking,
    /// Wait at most the given duration
    Timeout(Duration),
}

/// Options for a single `post`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PostOptions {
    pub mode: DeliveryMode,
    pub blocking: BlockingPolicy,
}

impl PostOptions {
    /// Async + Blocking (the default).
    pub fn async_blocking() -> Self {
        Self::default()
    }

    /// Async + NonBlocking.
    pub fn async_nonblock() -> Self {
        Self {
            mode: DeliveryMode::Async,
            blocking: BlockingPolicy::NonBlocking,
        }
    }

    /// Async + Timeout.
    pub fn async_timeout(timeout: Duration) -> Self {
        Self {
            mode: DeliveryMode::Async,
            blocking: BlockingPolicy::Timeout(timeout),
        }
    }

    /// Sync + Blocking.
    pub fn sync_blocking() -> Self {
        Self {
            mode: DeliveryMode::Sync,
            blocking: BlockingPolicy::Blocking,
        }
    }

    /// Sync + NonBlocking.
    pub fn sync_nonblock() -> Self {
        Self {
            mode: DeliveryMode::Sync,
            blocking: BlockingPolicy::NonBlocking,
        }
    }

    /// Sync + Timeout.
    pub fn sync_timeout(timeout: Duration) -> Self {
        Self {
            mode: DeliveryMode::Sync,
            blocking: BlockingPolicy::Timeout(timeout),
        }
    }
}

// =============================================================================
// LINK OPERATIONS
// =============================================================================

/// Operation addressed to a connection-oriented link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkRequest {
    /// Send an opaque data chunk
    SendData(Vec<u8>),
    /// Receive whatever is available, up to `max_len` bytes
    RecvData { max_len: usize },
    /// Send an opaque command and wait for one reply chunk
    ExecCommand(Vec<u8>),
}

/// Result of a successful [`LinkRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkResponse {
    /// Number of bytes written
    Sent(usize),
    /// Bytes read (may be empty when nothing was pending)
    Data(Vec<u8>),
    /// Reply to an `ExecCommand`
    CommandReply(Vec<u8>),
}

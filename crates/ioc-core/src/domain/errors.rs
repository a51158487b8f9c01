//! IOC error types.
//!
//! Every public operation returns one of these discriminants. None of them is
//! fatal: shared state is left consistent and the caller decides what to do.

use thiserror::Error;

use super::entities::{LinkId, ServiceId, SubscriberId};

/// Result alias used throughout the engine.
pub type IocResult<T> = Result<T, IocError>;

/// Error returned by bus and link operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IocError {
    /// Async post found the queue full (immediately or after its timeout).
    #[error("Too many queuing event descriptors (queue depth {depth})")]
    TooManyQueuing { depth: usize },

    /// Sync post found earlier events still queued.
    #[error("Event queue did not finish emptying")]
    TooLongEmptying,

    /// No subscriber matches the posted event, or the bus has no subscriber at all.
    #[error("No event consumer")]
    NoConsumer,

    /// A subscriber with the same identity is already registered.
    #[error("Conflicting event consumer: {0} already subscribed")]
    ConflictConsumer(SubscriberId),

    /// The subscriber table is at capacity.
    #[error("Too many event consumers (max {max})")]
    TooManyConsumers { max: usize },

    /// Unsubscribe of an identity that is not registered.
    #[error("Event consumer {0} not found")]
    NotFoundConsumer(SubscriberId),

    /// The link id was never allocated, or its record has been evicted.
    #[error("Link {0} does not exist")]
    NotExistLink(LinkId),

    /// The link existed and has been closed or broken.
    #[error("Link {0} is broken")]
    LinkBroken(LinkId),

    /// The service id is unknown or already offline.
    #[error("Service {0} does not exist")]
    NotExistService(ServiceId),

    /// The live link table is at capacity.
    #[error("Too many links (max {max})")]
    TooManyLinks { max: usize },

    /// A blocking operation ran out of time.
    #[error("Operation timed out")]
    Timeout,

    /// The operation is not available in the current configuration.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// Caller misuse, e.g. an empty address.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Transport adapter failure that did not map to a link state change.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

/// Error taxonomy shared by all [`IocError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Subscriber table, queue or link table full
    CapacityExceeded,
    /// No subscriber to deliver to
    NoRecipient,
    /// Duplicate identity
    Conflict,
    /// Unknown subscriber, link or service
    NotFound,
    /// Link existed then died
    Broken,
    /// Deadline expired
    Timeout,
    /// Lower layer failure
    Transport,
    /// Programming misuse
    Misuse,
}

impl IocError {
    /// Classify the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TooManyQueuing { .. }
            | Self::TooLongEmptying
            | Self::TooManyConsumers { .. }
            | Self::TooManyLinks { .. } => ErrorKind::CapacityExceeded,
            Self::NoConsumer => ErrorKind::NoRecipient,
            Self::ConflictConsumer(_) => ErrorKind::Conflict,
            Self::NotFoundConsumer(_) | Self::NotExistLink(_) | Self::NotExistService(_) => {
                ErrorKind::NotFound
            }
            Self::LinkBroken(_) => ErrorKind::Broken,
            Self::Timeout => ErrorKind::Timeout,
            Self::Transport(_) => ErrorKind::Transport,
            Self::NotSupported(_) | Self::InvalidArgument(_) => ErrorKind::Misuse,
        }
    }

    /// True when the error says the link can no longer be used.
    pub fn is_link_gone(&self) -> bool {
        matches!(self, Self::NotExistLink(_) | Self::LinkBroken(_))
    }
}

/// Errors reported by a transport adapter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The address is held by another live service.
    #[error("Address in use: {0}")]
    AddressInUse(String),

    /// The address could not be parsed or resolved.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Nobody listens on the address.
    #[error("Connection refused: {0}")]
    ConnectionRefused(String),

    /// The peer reset the connection.
    #[error("Connection reset by peer")]
    Reset,

    /// Writing to a connection whose peer is gone.
    #[error("Broken pipe")]
    BrokenPipe,

    /// Any other I/O failure.
    #[error("I/O error: {0}")]
    Io(String),
}

impl TransportError {
    /// True when the error means the peer is gone.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, Self::Reset | Self::BrokenPipe)
    }
}

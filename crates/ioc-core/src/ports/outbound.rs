//! Outbound (Driven) ports for the IOC engine.
//!
//! These traits define what the engine needs from its surroundings: a
//! transport to carry connection-oriented links, subscriber callbacks to
//! deliver events to, and a clock.

use crate::domain::{EventDesc, Timestamp, TransportError};

// =============================================================================
// EVENT CONSUMER
// =============================================================================

/// Subscriber callback.
///
/// Called on the drain path for queued events and on the posting thread for
/// synchronous events, with no bus lock held. A consumer may subscribe,
/// unsubscribe or post on the same bus. A post from inside `on_event` never
/// waits for the delivery it is part of: Sync + Blocking is delivered nested,
/// other Sync policies fail with `TooLongEmptying`, and an Async post to a
/// full queue fails with `TooManyQueuing`.
pub trait EventConsumer: Send + Sync {
    fn on_event(&self, event: &EventDesc);
}

impl<F> EventConsumer for F
where
    F: Fn(&EventDesc) + Send + Sync,
{
    fn on_event(&self, event: &EventDesc) {
        self(event)
    }
}

// =============================================================================
// TRANSPORT
// =============================================================================

/// Outcome of a non-blocking read or probe.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were read (or are pending, for a probe)
    Data(usize),
    /// Nothing available right now
    WouldBlock,
    /// The peer closed its side in an orderly way
    EndOfStream,
}

/// Transport adapter used by the link lifecycle manager.
///
/// The adapter owns socket-level details, including immediate address reuse
/// after `close_service`. Handles are consumed by the close functions, so a
/// handle can be released at most once.
///
/// # Errors
/// - `TransportError::Reset` / `BrokenPipe`: peer gone, the link becomes `Broken`
/// - `TransportError::AddressInUse`: another live service holds the address
pub trait TransportAdapter: Send + Sync + 'static {
    /// Listening resource.
    type Service: Send + Sync;
    /// One established connection.
    type Connection: Send + Sync;

    /// Start listening on `address`.
    fn listen(&self, address: &str) -> Result<Self::Service, TransportError>;

    /// Address the service actually bound (resolves wildcard ports).
    fn local_address(&self, service: &Self::Service) -> String;

    /// Accept one pending connection. `Ok(None)` means nothing is pending.
    fn accept(&self, service: &Self::Service) -> Result<Option<Self::Connection>, TransportError>;

    /// Open a connection to a listening service.
    fn connect(&self, address: &str) -> Result<Self::Connection, TransportError>;

    /// Non-blocking read into `buf`.
    fn read(&self, conn: &Self::Connection, buf: &mut [u8])
        -> Result<ReadOutcome, TransportError>;

    /// Write all of `data`.
    fn send(&self, conn: &Self::Connection, data: &[u8]) -> Result<usize, TransportError>;

    /// Check liveness without consuming pending bytes.
    fn probe(&self, conn: &Self::Connection) -> Result<ReadOutcome, TransportError>;

    /// Release a connection.
    fn close_connection(&self, conn: Self::Connection);

    /// Release a listening resource.
    fn close_service(&self, service: Self::Service);
}

// =============================================================================
// TIME
// =============================================================================

/// Time source for event timestamps.
///
/// Abstracted to allow testing with deterministic time.
pub trait TimeSource: Send + Sync {
    /// Current time in milliseconds.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time source.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }
}

//! Domain layer: identifiers, limits, the event queue, the subscriber table
//! and the link state machine. No I/O and no threads live here.

pub mod capability;
pub mod entities;
pub mod errors;
pub mod link_state;
pub mod queue;
pub mod registry;

pub use capability::{CapabilityDescription, CapabilityId, CapabilityRegistry};
pub use entities::*;
pub use errors::{ErrorKind, IocError, IocResult, TransportError};
pub use link_state::{
    InvalidTransition, LinkState, LinkStateCell, MainState, SubState, SubStateGuard,
};
pub use queue::{EventDescQueue, QueueFull};
pub use registry::{AddRejection, SubscriberEntry, SubscriberRegistry};

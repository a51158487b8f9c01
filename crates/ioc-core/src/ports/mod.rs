//! Ports layer.
//!
//! - Inbound (Driving) ports: the bus and link APIs
//! - Outbound (Driven) ports: transport, subscriber callbacks, clock

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;

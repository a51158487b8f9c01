//! Adapters layer: transport implementations bundled with the core.
//!
//! The TCP binding lives in the `ioc-transport-tcp` crate.

pub mod memory;

pub use memory::{MemoryConnection, MemoryService, MemoryTransport};

//! # IOC Core - Link Lifecycle & Event Delivery Engine
//!
//! Inter-object communication with three delivery modes:
//!
//! | Mode | Link | Entry point |
//! |------|------|-------------|
//! | Conles events | `LinkId::AUTO` | [`ConlesEventBus`] |
//! | Conet commands | dynamic `LinkId` | [`LinkLifecycleManager::execute_on_link`] |
//! | Conet data | dynamic `LinkId` | [`LinkLifecycleManager::execute_on_link`] |
//!
//! ## Conles Posting
//!
//! ```text
//! producer ──post──► [NoConsumer?] ──Async──► EventDescQueue ──drain──► subscribers
//!                                  └─Sync───► wait for drain ──inline──► subscribers
//! ```
//!
//! ## Conet Link States
//!
//! ```text
//! Connecting ──► Connected ──► Closing ──► Closed
//!                    │
//!                    ├──── peer end-of-stream ──► Closed
//!                    └──── peer reset ──────────► Broken
//! ```
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      OUTER LAYER                                │
//! │  adapters/memory.rs - in-process transport                      │
//! │  service/           - bus, dispatcher, link manager, runtime    │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      MIDDLE LAYER                               │
//! │  ports/inbound.rs  - ConlesApi, LinkApi                         │
//! │  ports/outbound.rs - TransportAdapter, EventConsumer, TimeSource│
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      INNER LAYER                                │
//! │  domain/entities.rs   - ids, EventDesc, PostOptions             │
//! │  domain/capability.rs - CapabilityRegistry                      │
//! │  domain/queue.rs      - EventDescQueue                          │
//! │  domain/registry.rs   - SubscriberRegistry                      │
//! │  domain/link_state.rs - MainState/SubState atomic cell          │
//! │  domain/errors.rs     - IocError, TransportError                │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use ioc_core::{
//!     ConlesEventBus, EventDesc, EventId, IocConfig, PostOptions, SubscribeArgs, SubscriberId,
//! };
//!
//! let bus = ConlesEventBus::from_config(&IocConfig::default());
//! let consumer = Arc::new(|e: &EventDesc| println!("got {}", e.event_id));
//! bus.subscribe(SubscribeArgs::new(SubscriberId(1), consumer)).unwrap();
//! bus.post(EventDesc::new(EventId(7)), PostOptions::default()).unwrap();
//! assert_eq!(bus.force_process(), 1);
//! ```

pub mod adapters;
pub mod config;
pub mod domain;
pub mod ports;
pub mod service;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use adapters::{MemoryConnection, MemoryService, MemoryTransport};
pub use config::{ConetConfig, ConfigError, ConlesConfig, IocConfig};
pub use domain::*;
pub use ports::*;
pub use service::{
    BusStats, ConlesEventBus, DispatcherHandle, IocRuntime, LinkLifecycleManager, LinkOrigin,
};

//! # IOC TCP Transport
//!
//! Binds the `TransportAdapter` port of `ioc-core` to TCP sockets.
//!
//! | Address form | Example |
//! |--------------|---------|
//! | bare socket address | `127.0.0.1:9000` |
//! | with scheme | `tcp://127.0.0.1:9000` |
//! | wildcard port | `tcp://127.0.0.1:0` (resolved by `service_address`) |
//!
//! ```rust,no_run
//! use ioc_core::{ConetConfig, LinkLifecycleManager};
//! use ioc_transport_tcp::TcpTransport;
//!
//! let links = LinkLifecycleManager::new(TcpTransport::new(), ConetConfig::default());
//! let service = links.online_service("tcp://127.0.0.1:0").unwrap();
//! println!("listening on {}", links.service_address(service).unwrap());
//! ```

mod transport;

pub use transport::{strip_scheme, TcpConnection, TcpService, TcpTransport, TCP_SCHEME};

/// Link manager over TCP.
pub type TcpLinkManager = ioc_core::LinkLifecycleManager<TcpTransport>;

/// Runtime over TCP.
pub type TcpRuntime = ioc_core::IocRuntime<TcpTransport>;

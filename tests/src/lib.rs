//! # IOC Test Suite
//!
//! Cross-crate properties of the engine, exercised through its public API.
//!
//! ## Structure
//!
//! ```text
//! tests/src/
//! └── integration/
//!     ├── conles_properties.rs  # subscriber capacity, queue FIFO, posting matrix, substates
//!     ├── link_properties.rs    # teardown, peer close, concurrent link churn
//!     └── tcp_links.rs          # the same link properties over real sockets
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test -p ioc-tests
//! cargo test -p ioc-tests integration::tcp_links::
//! cargo bench -p ioc-tests
//! ```

pub mod integration;

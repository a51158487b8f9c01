//! Test utilities for the IOC engine.
//!
//! Enable with the `test-utils` feature flag.
//!
//! # Example
//!
//! ```rust
//! use ioc_core::test_utils::FixedTimeSource;
//! use ioc_core::TimeSource;
//!
//! let time = FixedTimeSource::new(1000);
//! assert_eq!(time.now(), 1000);
//! time.advance(5);
//! assert_eq!(time.now(), 1005);
//! ```

use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::domain::{EventDesc, Timestamp};
use crate::ports::outbound::{EventConsumer, TimeSource};

/// A time source that returns a controlled timestamp (milliseconds).
#[derive(Debug, Default)]
pub struct FixedTimeSource {
    now: AtomicU64,
}

impl FixedTimeSource {
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            now: AtomicU64::new(timestamp),
        }
    }

    pub fn set(&self, timestamp: Timestamp) {
        self.now.store(timestamp, Ordering::SeqCst);
    }

    pub fn advance(&self, millis: u64) {
        self.now.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for FixedTimeSource {
    fn now(&self) -> Timestamp {
        self.now.load(Ordering::SeqCst)
    }
}

/// Consumer that records every delivered descriptor.
///
/// With a delay configured, each callback sleeps before returning, which
/// keeps the drain path busy for queue-pressure tests.
#[derive(Debug, Default)]
pub struct RecordingConsumer {
    events: Mutex<Vec<EventDesc>>,
    delay: Option<Duration>,
}

impl RecordingConsumer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_delay(delay: Duration) -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            delay: Some(delay),
        }
    }

    /// Copies of every delivered descriptor, in delivery order.
    pub fn events(&self) -> Vec<EventDesc> {
        self.events.lock().clone()
    }

    /// The `value` field of every delivered descriptor.
    pub fn values(&self) -> Vec<u64> {
        self.events.lock().iter().map(|e| e.value).collect()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    /// Poll until at least `count` events arrived. Returns `false` on timeout.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while self.count() < count {
            if Instant::now() >= deadline {
                return false;
            }
            thread::sleep(Duration::from_millis(1));
        }
        true
    }
}

impl EventConsumer for RecordingConsumer {
    fn on_event(&self, event: &EventDesc) {
        if let Some(delay) = self.delay {
            thread::sleep(delay);
        }
        self.events.lock().push(event.clone());
    }
}

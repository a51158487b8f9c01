//! Background drain thread for the Conles bus.
//!
//! The thread runs `force_process` whenever the queue is non-empty, so it
//! shares the bus's drain guard with explicit drains.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, info};

use super::conles::ConlesEventBus;
use crate::domain::{IocError, IocResult};

/// Handle to a running dispatcher. Dropping it stops and joins the thread.
pub struct DispatcherHandle {
    stop: Arc<AtomicBool>,
    bus: Arc<ConlesEventBus>,
    thread: Option<JoinHandle<()>>,
}

impl ConlesEventBus {
    /// Start the background dispatcher.
    ///
    /// # Errors
    /// `NotSupported` if a dispatcher is already running for this bus.
    pub fn spawn_dispatcher(self: &Arc<Self>) -> IocResult<DispatcherHandle> {
        if !self.claim_dispatcher() {
            return Err(IocError::NotSupported(
                "a dispatcher is already running for this bus".to_string(),
            ));
        }

        let stop = Arc::new(AtomicBool::new(false));
        let thread = {
            let bus = Arc::clone(self);
            let stop = Arc::clone(&stop);
            thread::Builder::new()
                .name("ioc-conles-dispatch".to_string())
                .spawn(move || run(&bus, &stop))
        };
        let thread = match thread {
            Ok(handle) => handle,
            Err(e) => {
                self.release_dispatcher();
                return Err(IocError::NotSupported(format!(
                    "failed to spawn dispatcher thread: {e}"
                )));
            }
        };

        info!("Conles dispatcher started");
        Ok(DispatcherHandle {
            stop,
            bus: Arc::clone(self),
            thread: Some(thread),
        })
    }
}

fn run(bus: &ConlesEventBus, stop: &AtomicBool) {
    while !stop.load(Ordering::Acquire) {
        if bus.wait_for_work() {
            bus.force_process();
        }
    }
    // Deliver what was accepted before the stop request.
    let flushed = bus.force_process();
    debug!(flushed, "Conles dispatcher exiting");
}

impl DispatcherHandle {
    /// Stop the thread after a final drain and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    fn shutdown(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        self.stop.store(true, Ordering::Release);
        self.bus.wake_dispatcher();
        if thread.join().is_err() {
            tracing::error!("Conles dispatcher thread panicked");
        }
        self.bus.release_dispatcher();
        info!("Conles dispatcher stopped");
    }
}

impl Drop for DispatcherHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

//! # Conles Event Bus
//!
//! The connectionless broadcast primitive behind `LinkId::AUTO`.
//!
//! ## Posting Matrix
//!
//! | Mode | Queue full / not drained | Success path |
//! |------|--------------------------|--------------|
//! | Async + Blocking | wait for space | enqueue |
//! | Async + NonBlocking | `TooManyQueuing` | enqueue |
//! | Async + Timeout(d) | wait up to `d`, then `TooManyQueuing` | enqueue |
//! | Sync + Blocking | wait for drain | deliver inline |
//! | Sync + NonBlocking | `TooLongEmptying` | deliver inline |
//! | Sync + Timeout(d) | wait up to `d`, then `TooLongEmptying` | deliver inline |
//!
//! `NoConsumer` is checked before any queue interaction.
//!
//! ## Sync Drain Condition
//!
//! A sync post snapshots the sequence number of the last queued descriptor
//! when it is called and waits until the drain path has dispatched up to that
//! number. Descriptors queued by other producers during the wait are not
//! waited for.
//!
//! ## Locking
//!
//! | Lock | Held for |
//! |------|----------|
//! | `registry` (write) | validate identity/capacity then mutate |
//! | `registry` (read) | matching check, consumer snapshot |
//! | `queue` | enqueue, dequeue-all, sequence counters |
//! | `drain_guard` | one drain pass at a time |
//!
//! Consumers are invoked with no lock held.
//!
//! ## Posting From a Consumer
//!
//! The thread running a drain pass or an inline delivery is recorded as the
//! delivering thread. A post made from a consumer on that thread never waits
//! on the delivery it is part of:
//!
//! | Call from a consumer | Result |
//! |----------------------|--------|
//! | Sync + Blocking | delivered inline, nested in the current delivery |
//! | Sync + NonBlocking / Timeout | `TooLongEmptying` at once |
//! | Async, queue full | `TooManyQueuing` at once |
//! | `force_process` | `0`, the outer pass keeps draining |

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use ioc_telemetry::{
    BUS_EVENTS_DISPATCHED, BUS_EVENTS_POSTED, BUS_EVENTS_REJECTED, BUS_SUBSCRIBERS,
};
use parking_lot::{Condvar, Mutex, RwLock};
use tracing::{debug, trace, warn};

use crate::config::IocConfig;
use crate::domain::{
    AddRejection, BlockingPolicy, CapabilityDescription, CapabilityId, CapabilityRegistry,
    DeliveryMode, EventDesc, EventDescQueue, EventId, IocError, IocResult, LinkState,
    LinkStateCell, MainState, PostOptions, SubState, SubStateGuard, SubscriberEntry,
    SubscriberId, SubscriberRegistry,
};
use crate::ports::{ConlesApi, EventConsumer, SubscribeArgs, SystemTimeSource, TimeSource};

type Consumer = Arc<dyn EventConsumer>;

/// Queue plus the sequence counters that must change with it.
struct QueueState {
    queue: EventDescQueue,
    /// Last sequence number handed out (queued or sync)
    next_seq: u64,
    /// Sequence number of the most recently queued descriptor
    last_enqueued: u64,
    /// Sequence number of the most recently dispatched queued descriptor
    last_dispatched: u64,
}

impl QueueState {
    fn fully_drained(&self) -> bool {
        self.queue.is_empty() && self.last_dispatched >= self.last_enqueued
    }
}

/// Marks the current thread as the delivering thread until dropped.
struct DeliveryOwner<'a> {
    slot: &'a Mutex<Option<ThreadId>>,
}

impl<'a> DeliveryOwner<'a> {
    fn claim(slot: &'a Mutex<Option<ThreadId>>) -> Self {
        *slot.lock() = Some(thread::current().id());
        Self { slot }
    }
}

impl Drop for DeliveryOwner<'_> {
    fn drop(&mut self) {
        *self.slot.lock() = None;
    }
}

/// Counters reported by [`ConlesEventBus::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Events accepted (queued or delivered inline)
    pub posted: u64,
    /// Events refused with an error
    pub rejected: u64,
    /// Callback invocations
    pub dispatched: u64,
}

/// Connectionless event bus.
pub struct ConlesEventBus {
    capability: CapabilityDescription,
    registry: RwLock<SubscriberRegistry<Consumer>>,
    state: LinkStateCell,
    queue: Mutex<QueueState>,
    space_available: Condvar,
    drained: Condvar,
    not_empty: Condvar,
    drain_guard: Mutex<()>,
    delivering: Mutex<Option<ThreadId>>,
    time: Arc<dyn TimeSource>,
    idle_wait: Duration,
    dispatcher_running: AtomicBool,
    posted: AtomicU64,
    rejected: AtomicU64,
    dispatched: AtomicU64,
}

impl ConlesEventBus {
    /// Build a bus with the `ConlesModeEvent` limits of `capabilities`.
    pub fn new(capabilities: &CapabilityRegistry) -> Self {
        let capability = capabilities.query(CapabilityId::ConlesModeEvent);
        Self {
            capability,
            registry: RwLock::new(SubscriberRegistry::new(capability.max_subscribers)),
            state: LinkStateCell::new(LinkState::new(MainState::Ready, SubState::Idle)),
            queue: Mutex::new(QueueState {
                queue: EventDescQueue::new(capability.queue_depth),
                next_seq: 0,
                last_enqueued: 0,
                last_dispatched: 0,
            }),
            space_available: Condvar::new(),
            drained: Condvar::new(),
            not_empty: Condvar::new(),
            drain_guard: Mutex::new(()),
            delivering: Mutex::new(None),
            time: Arc::new(SystemTimeSource),
            idle_wait: Duration::from_millis(50),
            dispatcher_running: AtomicBool::new(false),
            posted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            dispatched: AtomicU64::new(0),
        }
    }

    /// Build a bus from configuration.
    pub fn from_config(config: &IocConfig) -> Self {
        Self::new(&CapabilityRegistry::from_config(config))
            .with_idle_wait(config.conles.dispatch_idle_wait())
    }

    /// Replace the clock used for `timestamp_ms`.
    pub fn with_time_source(mut self, time: Arc<dyn TimeSource>) -> Self {
        self.time = time;
        self
    }

    /// How long the background dispatcher sleeps when idle.
    pub fn with_idle_wait(mut self, idle_wait: Duration) -> Self {
        self.idle_wait = idle_wait;
        self
    }

    // =========================================================================
    // SUBSCRIPTIONS
    // =========================================================================

    /// Register a subscriber.
    pub fn subscribe(&self, args: SubscribeArgs) -> IocResult<()> {
        let mut registry = self.registry.write();
        let _locked = SubStateGuard::lock(&self.state);

        let id = args.id;
        let result = registry.add(SubscriberEntry {
            id,
            consumer: args.consumer,
            filter: args.filter,
        });
        match result {
            Ok(()) => {
                BUS_SUBSCRIBERS.inc();
                debug!(subscriber = %id, total = registry.len(), "Subscriber added");
                Ok(())
            }
            Err(AddRejection::Conflict) => {
                debug!(subscriber = %id, "Duplicate subscriber rejected");
                Err(IocError::ConflictConsumer(id))
            }
            Err(AddRejection::TooMany { max }) => {
                warn!(subscriber = %id, max, "Subscriber table full");
                Err(IocError::TooManyConsumers { max })
            }
        }
    }

    /// Remove a subscriber by identity.
    pub fn unsubscribe(&self, id: SubscriberId) -> IocResult<()> {
        let mut registry = self.registry.write();
        let _locked = SubStateGuard::lock(&self.state);

        if registry.is_empty() {
            return Err(IocError::NoConsumer);
        }
        match registry.remove(id) {
            Some(_) => {
                BUS_SUBSCRIBERS.dec();
                debug!(subscriber = %id, total = registry.len(), "Subscriber removed");
                Ok(())
            }
            None => Err(IocError::NotFoundConsumer(id)),
        }
    }

    // =========================================================================
    // POSTING
    // =========================================================================

    /// Post an event. Returns the sequence number stamped on it.
    pub fn post(&self, event: EventDesc, options: PostOptions) -> IocResult<u64> {
        if !self.registry.read().has_match(event.event_id) {
            trace!(event_id = %event.event_id, "No matching subscriber");
            return Err(self.reject(IocError::NoConsumer, "no_consumer"));
        }

        match options.mode {
            DeliveryMode::Async => self.post_async(event, options.blocking),
            DeliveryMode::Sync => self.post_sync(event, options.blocking),
        }
    }

    fn post_async(&self, event: EventDesc, blocking: BlockingPolicy) -> IocResult<u64> {
        let deadline = deadline_for(blocking);
        let depth = self.capability.queue_depth;

        let nested = self.on_delivering_thread();
        let mut q = self.queue.lock();
        while q.queue.is_full() {
            match (blocking, deadline) {
                // Only this thread's delivery can make room.
                _ if nested => {
                    return Err(self.reject(IocError::TooManyQueuing { depth }, "too_many_queuing"));
                }
                (BlockingPolicy::NonBlocking, _) => {
                    return Err(self.reject(IocError::TooManyQueuing { depth }, "too_many_queuing"));
                }
                (BlockingPolicy::Timeout(_), Some(deadline)) => {
                    if self.space_available.wait_until(&mut q, deadline).timed_out()
                        && q.queue.is_full()
                    {
                        return Err(
                            self.reject(IocError::TooManyQueuing { depth }, "too_many_queuing")
                        );
                    }
                }
                _ => self.space_available.wait(&mut q),
            }
        }

        q.next_seq += 1;
        let seq = q.next_seq;
        let desc = event.stamped(seq, self.time.now());
        let event_id = desc.event_id;
        if q.queue.try_enqueue(desc).is_err() {
            return Err(self.reject(IocError::TooManyQueuing { depth }, "too_many_queuing"));
        }
        q.last_enqueued = seq;
        let pending = q.queue.len();
        drop(q);

        self.not_empty.notify_one();
        self.accepted("async");
        trace!(%event_id, seq, pending, "Event queued");
        Ok(seq)
    }

    fn post_sync(&self, event: EventDesc, blocking: BlockingPolicy) -> IocResult<u64> {
        if self.on_delivering_thread() {
            return self.post_sync_nested(event, blocking);
        }
        let deadline = deadline_for(blocking);

        let mut q = self.queue.lock();
        let target = q.last_enqueued;
        while q.last_dispatched < target {
            match (blocking, deadline) {
                (BlockingPolicy::NonBlocking, _) => {
                    return Err(self.reject(IocError::TooLongEmptying, "too_long_emptying"));
                }
                (BlockingPolicy::Timeout(_), Some(deadline)) => {
                    if self.drained.wait_until(&mut q, deadline).timed_out()
                        && q.last_dispatched < target
                    {
                        return Err(self.reject(IocError::TooLongEmptying, "too_long_emptying"));
                    }
                }
                _ => self.drained.wait(&mut q),
            }
        }
        drop(q);

        // Inline delivery never interleaves with a drain pass.
        let _drain = self.drain_guard.lock();
        let _owner = DeliveryOwner::claim(&self.delivering);
        let seq = {
            let mut q = self.queue.lock();
            q.next_seq += 1;
            q.next_seq
        };
        let desc = event.stamped(seq, self.time.now());
        self.accepted("sync");
        let delivered = self.deliver(&desc);
        trace!(event_id = %desc.event_id, seq, delivered, "Event delivered inline");
        Ok(seq)
    }

    /// Sync post from a consumer running on this thread. The delivery in
    /// progress cannot finish before the consumer returns.
    fn post_sync_nested(&self, event: EventDesc, blocking: BlockingPolicy) -> IocResult<u64> {
        if !matches!(blocking, BlockingPolicy::Blocking) {
            return Err(self.reject(IocError::TooLongEmptying, "too_long_emptying"));
        }
        let seq = {
            let mut q = self.queue.lock();
            q.next_seq += 1;
            q.next_seq
        };
        let desc = event.stamped(seq, self.time.now());
        self.accepted("sync");
        let delivered = self.deliver(&desc);
        trace!(event_id = %desc.event_id, seq, delivered, "Nested event delivered inline");
        Ok(seq)
    }

    fn on_delivering_thread(&self) -> bool {
        *self.delivering.lock() == Some(thread::current().id())
    }

    // =========================================================================
    // DRAIN PATH
    // =========================================================================

    /// Drain the queue and dispatch every descriptor in FIFO order.
    ///
    /// Returns the number of descriptors drained. Serialized with the
    /// background dispatcher. Called from a consumer, it returns `0`.
    pub fn force_process(&self) -> usize {
        if self.on_delivering_thread() {
            trace!("Drain requested from a consumer, skipped");
            return 0;
        }
        let _drain = self.drain_guard.lock();
        let _owner = DeliveryOwner::claim(&self.delivering);

        let batch = {
            let mut q = self.queue.lock();
            q.queue.try_dequeue_all()
        };
        if batch.is_empty() {
            return 0;
        }
        self.space_available.notify_all();

        let mut last_seq = 0;
        for desc in &batch {
            self.deliver(desc);
            last_seq = desc.seq_id;
        }

        {
            let mut q = self.queue.lock();
            q.last_dispatched = q.last_dispatched.max(last_seq);
        }
        self.drained.notify_all();
        debug!(count = batch.len(), last_seq, "Drain pass complete");
        batch.len()
    }

    /// Block until everything queued so far has been dispatched.
    ///
    /// From a consumer, fails with `Timeout` at once unless already drained.
    pub fn wait_until_drained(&self, timeout: Duration) -> IocResult<()> {
        let nested = self.on_delivering_thread();
        let deadline = Instant::now() + timeout;
        let mut q = self.queue.lock();
        while !q.fully_drained() {
            if nested {
                return Err(IocError::Timeout);
            }
            if self.drained.wait_until(&mut q, deadline).timed_out() && !q.fully_drained() {
                return Err(IocError::Timeout);
            }
        }
        Ok(())
    }

    /// Wait until the queue is non-empty or `idle_wait` elapses.
    /// Returns `true` if there is work.
    pub(crate) fn wait_for_work(&self) -> bool {
        let mut q = self.queue.lock();
        if q.queue.is_empty() {
            let _ = self.not_empty.wait_for(&mut q, self.idle_wait);
        }
        !q.queue.is_empty()
    }

    pub(crate) fn wake_dispatcher(&self) {
        self.not_empty.notify_all();
    }

    /// Claim the single dispatcher slot. Returns `false` if already claimed.
    pub(crate) fn claim_dispatcher(&self) -> bool {
        self.dispatcher_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub(crate) fn release_dispatcher(&self) {
        self.dispatcher_running.store(false, Ordering::Release);
    }

    fn deliver(&self, desc: &EventDesc) -> usize {
        let consumers = self.registry.read().matching(desc.event_id);
        for consumer in &consumers {
            consumer.on_event(desc);
        }
        let n = consumers.len() as u64;
        self.dispatched.fetch_add(n, Ordering::Relaxed);
        BUS_EVENTS_DISPATCHED.inc_by(n);
        consumers.len()
    }

    fn accepted(&self, mode: &str) {
        self.posted.fetch_add(1, Ordering::Relaxed);
        BUS_EVENTS_POSTED.with_label_values(&[mode]).inc();
    }

    fn reject(&self, err: IocError, reason: &str) -> IocError {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        BUS_EVENTS_REJECTED.with_label_values(&[reason]).inc();
        debug!(reason, "Event rejected");
        err
    }

    // =========================================================================
    // OBSERVABILITY
    // =========================================================================

    /// Descriptors currently queued.
    pub fn pending_count(&self) -> usize {
        self.queue.lock().queue.len()
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.read().len()
    }

    /// True if any subscriber would receive `event_id`.
    pub fn has_consumer_for(&self, event_id: EventId) -> bool {
        self.registry.read().has_match(event_id)
    }

    /// Current `(Ready, Idle | Locked)` pair, read atomically.
    pub fn link_state(&self) -> LinkState {
        self.state.load()
    }

    pub fn capability(&self) -> CapabilityDescription {
        self.capability
    }

    pub fn stats(&self) -> BusStats {
        BusStats {
            posted: self.posted.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            dispatched: self.dispatched.load(Ordering::Relaxed),
        }
    }
}

fn deadline_for(blocking: BlockingPolicy) -> Option<Instant> {
    match blocking {
        BlockingPolicy::Timeout(d) => Instant::now().checked_add(d),
        _ => None,
    }
}

impl Drop for ConlesEventBus {
    fn drop(&mut self) {
        let remaining = self.registry.get_mut().len() as i64;
        BUS_SUBSCRIBERS.sub(remaining);
    }
}

impl ConlesApi for ConlesEventBus {
    fn subscribe(&self, args: SubscribeArgs) -> IocResult<()> {
        ConlesEventBus::subscribe(self, args)
    }

    fn unsubscribe(&self, id: SubscriberId) -> IocResult<()> {
        ConlesEventBus::unsubscribe(self, id)
    }

    fn post(&self, event: EventDesc, options: PostOptions) -> IocResult<u64> {
        ConlesEventBus::post(self, event, options)
    }

    fn force_process(&self) -> usize {
        ConlesEventBus::force_process(self)
    }

    fn link_state(&self) -> LinkState {
        ConlesEventBus::link_state(self)
    }

    fn capability(&self) -> CapabilityDescription {
        ConlesEventBus::capability(self)
    }
}

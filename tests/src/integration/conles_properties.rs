//! # Conles Bus Properties
//!
//! Multi-threaded checks of the connectionless event bus:
//!
//! | Property | Test |
//! |----------|------|
//! | exactly `max` subscribers, any order | `test_capacity_boundary_*` |
//! | second unsubscribe fails | `test_double_unsubscribe` |
//! | duplicate subscribe conflicts | `test_duplicate_subscribe` |
//! | no recipient, never delivered later | `test_no_recipient_is_discarded` |
//! | queue depth D, FIFO drain | `test_queue_depth_and_fifo_drain` |
//! | substates under contention | `test_substates_observed_under_contention` |

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::{Duration, Instant};

    use ioc_core::test_utils::RecordingConsumer;
    use ioc_core::{
        CapabilityId, ConlesEventBus, EventDesc, EventFilter, EventId, IocConfig, IocError,
        IocRuntime, LinkId, LinkState, MainState, PostOptions, SubState, SubscribeArgs,
        SubscriberId,
    };
    use parking_lot::{Condvar, Mutex};
    use rand::seq::SliceRandom;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    fn bus(max_subscribers: usize, queue_depth: usize) -> Arc<ConlesEventBus> {
        let mut config = IocConfig::default();
        config.conles.max_subscribers = max_subscribers;
        config.conles.queue_depth = queue_depth;
        config.conles.dispatch_idle_wait_ms = 5;
        Arc::new(ConlesEventBus::from_config(&config))
    }

    fn recorder(bus: &ConlesEventBus, id: u64) -> Arc<RecordingConsumer> {
        let consumer = Arc::new(RecordingConsumer::new());
        bus.subscribe(SubscribeArgs::new(SubscriberId(id), consumer.clone()))
            .expect("subscribe");
        consumer
    }

    fn event(value: u64) -> EventDesc {
        EventDesc::new(EventId(1)).with_value(value)
    }

    fn noop() -> Arc<dyn ioc_core::EventConsumer> {
        Arc::new(|_: &EventDesc| {})
    }

    /// Closed until `open()`; consumers can park on it.
    #[derive(Default)]
    struct Gate {
        open: Mutex<bool>,
        cv: Condvar,
    }

    impl Gate {
        fn wait(&self) {
            let mut open = self.open.lock();
            while !*open {
                self.cv.wait(&mut open);
            }
        }

        fn open(&self) {
            *self.open.lock() = true;
            self.cv.notify_all();
        }
    }

    // =============================================================================
    // SUBSCRIBER REGISTRY
    // =============================================================================

    #[test]
    fn test_capacity_boundary_shuffled_order() {
        let max = 8;
        let bus = bus(max, 4);
        let capacity = bus.capability().max_subscribers;
        assert_eq!(capacity, max);

        let mut ids: Vec<u64> = (0..20).collect();
        ids.shuffle(&mut rand::thread_rng());

        let mut accepted = 0;
        for (attempt, id) in ids.iter().enumerate() {
            let result = bus.subscribe(SubscribeArgs::new(SubscriberId(*id), noop()));
            if attempt < capacity {
                assert_eq!(result, Ok(()), "attempt {attempt} should fit");
                accepted += 1;
            } else {
                assert_eq!(result, Err(IocError::TooManyConsumers { max }));
            }
        }
        assert_eq!(accepted, max);
        assert_eq!(bus.subscriber_count(), max);
    }

    #[test]
    fn test_capacity_boundary_concurrent_attempts() {
        let max = 6;
        let threads = 24;
        let bus = bus(max, 4);
        let barrier = Arc::new(Barrier::new(threads));

        let handles: Vec<_> = (0..threads as u64)
            .map(|id| {
                let bus = Arc::clone(&bus);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    barrier.wait();
                    bus.subscribe(SubscribeArgs::new(SubscriberId(id), noop()))
                })
            })
            .collect();

        let results: Vec<_> = handles
            .into_iter()
            .map(|h| h.join().expect("subscriber thread"))
            .collect();
        let ok = results.iter().filter(|r| r.is_ok()).count();
        let full = results
            .iter()
            .filter(|r| matches!(r, Err(IocError::TooManyConsumers { .. })))
            .count();
        assert_eq!(ok, max);
        assert_eq!(full, threads - max);
    }

    #[test]
    fn test_double_unsubscribe() {
        let bus = bus(4, 4);
        bus.subscribe(SubscribeArgs::new(SubscriberId(1), noop()))
            .expect("subscribe");
        bus.subscribe(SubscribeArgs::new(SubscriberId(2), noop()))
            .expect("subscribe");

        assert_eq!(bus.unsubscribe(SubscriberId(1)), Ok(()));
        assert_eq!(
            bus.unsubscribe(SubscriberId(1)),
            Err(IocError::NotFoundConsumer(SubscriberId(1)))
        );
    }

    #[test]
    fn test_double_unsubscribe_of_last_subscriber() {
        let bus = bus(4, 4);
        bus.subscribe(SubscribeArgs::new(SubscriberId(1), noop()))
            .expect("subscribe");
        assert_eq!(bus.unsubscribe(SubscriberId(1)), Ok(()));
        let second = bus.unsubscribe(SubscriberId(1)).unwrap_err();
        assert!(matches!(
            second,
            IocError::NoConsumer | IocError::NotFoundConsumer(_)
        ));
    }

    #[test]
    fn test_duplicate_subscribe() {
        let bus = bus(4, 4);
        let first = recorder(&bus, 9);
        let duplicate = SubscribeArgs::new(SubscriberId(9), Arc::new(RecordingConsumer::new()))
            .with_filter(EventFilter::ids([EventId(42)]));
        assert_eq!(
            bus.subscribe(duplicate),
            Err(IocError::ConflictConsumer(SubscriberId(9)))
        );
        assert_eq!(bus.subscriber_count(), 1);

        // The original entry is untouched: it still receives every event.
        bus.post(event(5), PostOptions::sync_blocking()).expect("post");
        assert_eq!(first.values(), vec![5]);

        let outcomes = [
            bus.unsubscribe(SubscriberId(9)),
            bus.unsubscribe(SubscriberId(9)),
        ];
        assert_eq!(outcomes.iter().filter(|r| r.is_ok()).count(), 1);
    }

    // =============================================================================
    // POSTING
    // =============================================================================

    #[test]
    fn test_no_recipient_is_discarded() {
        let bus = bus(4, 4);
        for options in [
            PostOptions::async_blocking(),
            PostOptions::async_nonblock(),
            PostOptions::async_timeout(Duration::from_millis(5)),
            PostOptions::sync_blocking(),
            PostOptions::sync_nonblock(),
            PostOptions::sync_timeout(Duration::from_millis(5)),
        ] {
            assert_eq!(bus.post(event(1), options), Err(IocError::NoConsumer));
        }
        assert_eq!(bus.pending_count(), 0);

        let late = recorder(&bus, 1);
        assert_eq!(bus.force_process(), 0);
        assert_eq!(late.count(), 0);
    }

    #[test]
    fn test_queue_depth_and_fifo_drain() {
        let depth = 16;
        let bus = bus(2, depth);
        let consumer = recorder(&bus, 1);
        assert_eq!(bus.capability().queue_depth, depth);

        for v in 0..depth as u64 {
            bus.post(event(v), PostOptions::async_nonblock())
                .expect("within depth");
        }
        assert_eq!(
            bus.post(event(999), PostOptions::async_nonblock()),
            Err(IocError::TooManyQueuing { depth })
        );

        assert_eq!(bus.force_process(), depth);
        assert_eq!(consumer.values(), (0..depth as u64).collect::<Vec<_>>());
    }

    #[test]
    fn test_blocking_producer_admitted_after_drain() {
        let depth = 4;
        let bus = bus(2, depth);
        let consumer = recorder(&bus, 1);
        for v in 0..depth as u64 {
            bus.post(event(v), PostOptions::async_nonblock())
                .expect("within depth");
        }

        let blocked = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || bus.post(event(100), PostOptions::async_blocking()))
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(bus.pending_count(), depth);

        let first_pass = bus.force_process();
        assert!(blocked.join().expect("producer").is_ok());
        let second_pass = bus.force_process();

        assert_eq!(first_pass + second_pass, depth + 1);
        let mut expected: Vec<u64> = (0..depth as u64).collect();
        expected.push(100);
        assert_eq!(consumer.values(), expected);
    }

    #[test]
    fn test_posting_matrix_under_pressure() {
        let bus = bus(2, 1);
        let _consumer = recorder(&bus, 1);
        bus.post(event(0), PostOptions::async_nonblock()).expect("fill");

        let short = Duration::from_millis(10);
        let cases = [
            (PostOptions::async_nonblock(), IocError::TooManyQueuing { depth: 1 }),
            (PostOptions::async_timeout(short), IocError::TooManyQueuing { depth: 1 }),
            (PostOptions::sync_nonblock(), IocError::TooLongEmptying),
            (PostOptions::sync_timeout(short), IocError::TooLongEmptying),
        ];
        for (options, expected) in cases {
            let start = Instant::now();
            assert_eq!(bus.post(event(1), options), Err(expected.clone()));
            if matches!(
                options.blocking,
                ioc_core::BlockingPolicy::Timeout(_)
            ) {
                assert!(start.elapsed() >= short);
            }
        }
        assert_eq!(bus.pending_count(), 1);
        assert_eq!(bus.stats().rejected, 4);
    }

    #[test]
    fn test_global_fifo_across_producers() {
        let producers = 8u64;
        let per_producer = 200u64;
        let bus = bus(2, 8);
        let consumer = recorder(&bus, 1);
        let dispatcher = bus.spawn_dispatcher().expect("dispatcher");

        let handles: Vec<_> = (0..producers)
            .map(|p| {
                let bus = Arc::clone(&bus);
                thread::spawn(move || {
                    for i in 0..per_producer {
                        bus.post(event(p * 1_000_000 + i), PostOptions::async_blocking())
                            .expect("blocking post");
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().expect("producer");
        }
        bus.wait_until_drained(Duration::from_secs(10))
            .expect("drained");
        dispatcher.stop();

        let events = consumer.events();
        assert_eq!(events.len() as u64, producers * per_producer);
        assert!(events.windows(2).all(|w| w[0].seq_id < w[1].seq_id));

        let mut last_per_producer: HashMap<u64, u64> = HashMap::new();
        for e in &events {
            let (p, i) = (e.value / 1_000_000, e.value % 1_000_000);
            if let Some(prev) = last_per_producer.insert(p, i) {
                assert!(prev < i, "producer {p} reordered");
            }
        }
    }

    #[test]
    fn test_sync_waits_only_for_earlier_events() {
        let bus = bus(2, 8);
        let gate = Arc::new(Gate::default());
        let seen = Arc::new(Mutex::new(Vec::new()));
        let consumer = {
            let gate = Arc::clone(&gate);
            let seen = Arc::clone(&seen);
            move |e: &EventDesc| {
                if e.value == 1 {
                    gate.wait();
                }
                seen.lock().push(e.value);
            }
        };
        bus.subscribe(SubscribeArgs::new(SubscriberId(1), Arc::new(consumer)))
            .expect("subscribe");

        bus.post(event(1), PostOptions::async_nonblock()).expect("A");
        let drainer = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || bus.force_process())
        };
        // Wait until the drain pass holds A inside the consumer.
        let deadline = Instant::now() + Duration::from_secs(5);
        while bus.pending_count() != 0 {
            assert!(Instant::now() < deadline);
            thread::sleep(Duration::from_millis(1));
        }

        // A is dequeued but not delivered yet: still not drained.
        assert_eq!(
            bus.post(event(2), PostOptions::sync_nonblock()),
            Err(IocError::TooLongEmptying)
        );

        let sync_post = {
            let bus = Arc::clone(&bus);
            thread::spawn(move || bus.post(event(3), PostOptions::sync_blocking()))
        };
        thread::sleep(Duration::from_millis(50));
        bus.post(event(4), PostOptions::async_nonblock()).expect("B");

        gate.open();
        assert_eq!(drainer.join().expect("drainer"), 1);
        assert!(sync_post.join().expect("sync").is_ok());

        // B arrived after the sync call and is still queued.
        assert_eq!(bus.pending_count(), 1);
        assert_eq!(*seen.lock(), vec![1, 3]);
        bus.force_process();
        assert_eq!(*seen.lock(), vec![1, 3, 4]);
    }

    // =============================================================================
    // LINK STATE UNDER CONTENTION
    // =============================================================================

    #[test]
    fn test_substates_observed_under_contention() {
        let workers = 12u64;
        let bus = bus(workers as usize, 4);
        let stop = Arc::new(AtomicBool::new(false));

        let handles: Vec<_> = (0..workers)
            .map(|id| {
                let bus = Arc::clone(&bus);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        bus.subscribe(SubscribeArgs::new(SubscriberId(id), noop()))
                            .expect("own slot is free");
                        bus.unsubscribe(SubscriberId(id)).expect("own entry exists");
                    }
                })
            })
            .collect();

        let idle = LinkState::new(MainState::Ready, SubState::Idle);
        let locked = LinkState::new(MainState::Ready, SubState::Locked);
        let (mut saw_idle, mut saw_locked) = (false, false);
        let deadline = Instant::now() + Duration::from_secs(10);
        let mut samples = 0u64;
        while !(saw_idle && saw_locked && samples >= 10_000) && Instant::now() < deadline {
            let state = bus.link_state();
            assert!(state == idle || state == locked, "undefined state {state}");
            saw_idle |= state == idle;
            saw_locked |= state == locked;
            samples += 1;
        }

        stop.store(true, Ordering::Relaxed);
        for h in handles {
            h.join().expect("worker");
        }
        assert!(saw_idle, "Idle never observed in {samples} samples");
        assert!(saw_locked, "Locked never observed in {samples} samples");
        assert_eq!(bus.link_state(), idle);
    }

    #[test]
    fn test_runtime_reports_auto_link_state() {
        let runtime = IocRuntime::in_memory(IocConfig::default()).expect("runtime");
        assert_eq!(
            runtime.get_link_state(LinkId::AUTO),
            Ok(LinkState::new(MainState::Ready, SubState::Idle))
        );
        let caps = runtime.capability(CapabilityId::ConlesModeEvent);
        assert_eq!(caps.max_subscribers, 16);
        assert_eq!(caps.queue_depth, 64);
    }
}

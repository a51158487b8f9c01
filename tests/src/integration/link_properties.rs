//! # Link Lifecycle Properties
//!
//! Link teardown, peer-close detection and handle accounting over the
//! in-process transport.
//!
//! A counting wrapper around `MemoryTransport` records every connection
//! handed to the manager and every release, so tests can assert that each
//! handle is released exactly once whatever the interleaving.

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::{Duration, Instant};

    use ioc_core::{
        CapabilityId, ConetConfig, IocConfig, IocError, IocRuntime, LinkId, LinkLifecycleManager,
        LinkRequest, LinkResponse, LinkState, MainState, MemoryConnection, MemoryService,
        MemoryTransport, ReadOutcome, SubState, TransportAdapter, TransportError,
    };
    use parking_lot::Mutex;
    use rand::Rng;

    // =============================================================================
    // TEST FIXTURES
    // =============================================================================

    /// Memory transport that counts handle creation and release.
    #[derive(Default)]
    struct CountingTransport {
        inner: MemoryTransport,
        opened: AtomicUsize,
        closed: AtomicUsize,
    }

    impl CountingTransport {
        fn opened(&self) -> usize {
            self.opened.load(Ordering::SeqCst)
        }

        fn closed(&self) -> usize {
            self.closed.load(Ordering::SeqCst)
        }
    }

    impl TransportAdapter for CountingTransport {
        type Service = MemoryService;
        type Connection = MemoryConnection;

        fn listen(&self, address: &str) -> Result<MemoryService, TransportError> {
            self.inner.listen(address)
        }

        fn local_address(&self, service: &MemoryService) -> String {
            self.inner.local_address(service)
        }

        fn accept(&self, service: &MemoryService) -> Result<Option<MemoryConnection>, TransportError> {
            let accepted = self.inner.accept(service)?;
            if accepted.is_some() {
                self.opened.fetch_add(1, Ordering::SeqCst);
            }
            Ok(accepted)
        }

        fn connect(&self, address: &str) -> Result<MemoryConnection, TransportError> {
            let conn = self.inner.connect(address)?;
            self.opened.fetch_add(1, Ordering::SeqCst);
            Ok(conn)
        }

        fn read(&self, conn: &MemoryConnection, buf: &mut [u8]) -> Result<ReadOutcome, TransportError> {
            self.inner.read(conn, buf)
        }

        fn send(&self, conn: &MemoryConnection, data: &[u8]) -> Result<usize, TransportError> {
            self.inner.send(conn, data)
        }

        fn probe(&self, conn: &MemoryConnection) -> Result<ReadOutcome, TransportError> {
            self.inner.probe(conn)
        }

        fn close_connection(&self, conn: MemoryConnection) {
            self.closed.fetch_add(1, Ordering::SeqCst);
            self.inner.close_connection(conn);
        }

        fn close_service(&self, service: MemoryService) {
            self.inner.close_service(service);
        }
    }

    fn counting_manager(
        config: ConetConfig,
    ) -> (Arc<CountingTransport>, Arc<LinkLifecycleManager<CountingTransport>>) {
        let transport = Arc::new(CountingTransport::default());
        let manager = LinkLifecycleManager::with_shared_transport(Arc::clone(&transport), config);
        (transport, Arc::new(manager))
    }

    fn assert_gone(result: Result<LinkResponse, IocError>) {
        match result {
            Err(IocError::NotExistLink(_)) | Err(IocError::LinkBroken(_)) => {}
            other => panic!("expected not-found or broken, got {other:?}"),
        }
    }

    // =============================================================================
    // TEARDOWN
    // =============================================================================

    #[test]
    fn test_close_all_then_relisten() {
        let (transport, manager) = counting_manager(ConetConfig::default());
        let service = manager.online_service("fifo://teardown").expect("online");

        let mut clients = Vec::new();
        let mut links = Vec::new();
        for _ in 0..5 {
            clients.push(transport.inner.connect("fifo://teardown").expect("connect"));
            links.push(
                manager
                    .accept_with_timeout(service, Duration::from_secs(1))
                    .expect("accept"),
            );
        }

        assert_eq!(manager.offline_service(service), Ok(5));
        for &link in &links {
            assert_gone(manager.execute_on_link(link, LinkRequest::SendData(vec![1])));
            assert_gone(manager.execute_on_link(link, LinkRequest::ExecCommand(vec![2])));
        }
        let mut buf = [0u8; 1];
        for client in &clients {
            assert_eq!(client.read(&mut buf), Ok(ReadOutcome::EndOfStream));
        }

        let again = manager
            .online_service("fifo://teardown")
            .expect("immediate re-listen");
        assert_ne!(again, service);
        assert_eq!(transport.opened(), transport.closed());
    }

    #[test]
    fn test_link_ids_are_not_reused() {
        let (transport, manager) = counting_manager(ConetConfig::default());
        let service = manager.online_service("fifo://ids").expect("online");

        let _c1 = transport.inner.connect("fifo://ids").expect("connect");
        let first = manager
            .accept_with_timeout(service, Duration::from_secs(1))
            .expect("accept");
        manager.close_link(first).expect("close");

        let _c2 = transport.inner.connect("fifo://ids").expect("connect");
        let second = manager
            .accept_with_timeout(service, Duration::from_secs(1))
            .expect("accept");
        assert!(second > first);
        assert_gone(manager.execute_on_link(first, LinkRequest::SendData(vec![0])));
        assert!(manager
            .execute_on_link(second, LinkRequest::SendData(vec![0]))
            .is_ok());
    }

    // =============================================================================
    // PEER DISCONNECT
    // =============================================================================

    #[test]
    fn test_peer_disconnect_detected_within_window() {
        let (transport, manager) = counting_manager(ConetConfig::default());
        let service = manager.online_service("fifo://peer").expect("online");
        let client = transport.inner.connect("fifo://peer").expect("connect");
        let link = manager
            .accept_with_timeout(service, Duration::from_secs(1))
            .expect("accept");

        drop(client);

        let deadline = Instant::now() + Duration::from_secs(2);
        while !manager.sweep_peer_closed().contains(&link) {
            assert!(Instant::now() < deadline, "peer close not detected");
            thread::sleep(Duration::from_millis(5));
        }
        assert_gone(manager.execute_on_link(link, LinkRequest::RecvData { max_len: 4 }));
        assert_eq!(
            manager.get_link_state(link),
            Ok(LinkState::new(MainState::Closed, SubState::Idle))
        );
        assert_eq!(transport.closed(), 1);
    }

    #[test]
    fn test_peer_reset_breaks_link() {
        let (transport, manager) = counting_manager(ConetConfig::default());
        let service = manager.online_service("fifo://reset").expect("online");
        let client = transport.inner.connect("fifo://reset").expect("connect");
        let link = manager
            .accept_with_timeout(service, Duration::from_secs(1))
            .expect("accept");

        client.abort();
        assert_eq!(manager.detect_peer_close(link), Ok(true));
        assert_eq!(
            manager.get_link_state(link).map(|s| s.main),
            Ok(MainState::Broken)
        );
        assert_gone(manager.execute_on_link(link, LinkRequest::SendData(vec![9])));
    }

    // =============================================================================
    // CONCURRENCY
    // =============================================================================

    #[test]
    fn test_concurrent_accept_close_and_sweep_release_once() {
        let config = ConetConfig {
            max_links: 32,
            ..ConetConfig::default()
        };
        let (transport, manager) = counting_manager(config);
        let service = manager.online_service("fifo://churn").expect("online");
        let accepted: Arc<Mutex<Vec<LinkId>>> = Arc::new(Mutex::new(Vec::new()));
        let stop = Arc::new(AtomicBool::new(false));

        let dialer = {
            let transport = Arc::clone(&transport);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let mut held = Vec::new();
                while !stop.load(Ordering::Relaxed) {
                    if let Ok(client) = transport.inner.connect("fifo://churn") {
                        held.push(client);
                    }
                    // Hang up on a random earlier client now and then.
                    if !held.is_empty() && rng.gen_bool(0.3) {
                        let idx = rng.gen_range(0..held.len());
                        drop(held.swap_remove(idx));
                    }
                    thread::sleep(Duration::from_micros(200));
                }
                held
            })
        };

        let acceptor = {
            let manager = Arc::clone(&manager);
            let accepted = Arc::clone(&accepted);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    match manager.accept_incoming(service) {
                        Ok(Some(link)) => accepted.lock().push(link),
                        Ok(None) | Err(IocError::TooManyLinks { .. }) => thread::yield_now(),
                        Err(IocError::NotExistService(_)) => break,
                        Err(e) => panic!("unexpected accept error: {e}"),
                    }
                }
            })
        };

        let closers: Vec<_> = (0..4)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let accepted = Arc::clone(&accepted);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    let mut rng = rand::thread_rng();
                    while !stop.load(Ordering::Relaxed) {
                        let pick = {
                            let links = accepted.lock();
                            (!links.is_empty()).then(|| links[rng.gen_range(0..links.len())])
                        };
                        if let Some(link) = pick {
                            let outcome = if rng.gen_bool(0.5) {
                                manager.close_link(link).map(|_| ())
                            } else {
                                manager
                                    .execute_on_link(link, LinkRequest::SendData(vec![1]))
                                    .map(|_| ())
                            };
                            if let Err(e) = outcome {
                                assert!(e.is_link_gone(), "unexpected error {e}");
                            }
                        }
                        thread::yield_now();
                    }
                })
            })
            .collect();

        let sweeper = {
            let manager = Arc::clone(&manager);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    manager.sweep_peer_closed();
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };

        thread::sleep(Duration::from_millis(300));
        manager.offline_service(service).expect("offline");
        stop.store(true, Ordering::Relaxed);

        acceptor.join().expect("acceptor");
        for closer in closers {
            closer.join().expect("closer");
        }
        sweeper.join().expect("sweeper");
        let _clients = dialer.join().expect("dialer");

        assert_eq!(manager.live_link_count(), 0);
        assert_eq!(transport.opened(), transport.closed());
        for &link in accepted.lock().iter() {
            assert_gone(manager.execute_on_link(link, LinkRequest::SendData(vec![0])));
        }
    }

    #[test]
    fn test_link_substates_under_contention() {
        let (transport, manager) = counting_manager(ConetConfig::default());
        let service = manager.online_service("fifo://busy").expect("online");
        let client = transport.inner.connect("fifo://busy").expect("connect");
        let link = manager
            .accept_with_timeout(service, Duration::from_secs(1))
            .expect("accept");
        let stop = Arc::new(AtomicBool::new(false));

        let senders: Vec<_> = (0..10)
            .map(|_| {
                let manager = Arc::clone(&manager);
                let stop = Arc::clone(&stop);
                thread::spawn(move || {
                    while !stop.load(Ordering::Relaxed) {
                        manager
                            .execute_on_link(link, LinkRequest::SendData(vec![0; 16]))
                            .expect("send");
                    }
                })
            })
            .collect();

        let allowed = [
            LinkState::new(MainState::Connected, SubState::Idle),
            LinkState::new(MainState::Connected, SubState::Locked),
        ];
        let deadline = Instant::now() + Duration::from_millis(200);
        while Instant::now() < deadline {
            let state = manager.get_link_state(link).expect("state");
            assert!(allowed.contains(&state), "undefined state {state}");
            // Keep the pipe from growing without bound.
            let _ = client.read_available();
        }

        stop.store(true, Ordering::Relaxed);
        for s in senders {
            s.join().expect("sender");
        }
    }

    // =============================================================================
    // CONFIGURATION
    // =============================================================================

    #[test]
    fn test_runtime_from_config_file() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(
            file,
            "[conles]\nmax_subscribers = 3\nqueue_depth = 5\n\n[conet]\nmax_links = 2\n"
        )
        .expect("write");
        let config = IocConfig::load(file.path()).expect("load");
        let runtime = IocRuntime::in_memory(config).expect("runtime");

        let conles = runtime.capability(CapabilityId::ConlesModeEvent);
        assert_eq!((conles.max_subscribers, conles.queue_depth), (3, 5));
        assert_eq!(runtime.capability(CapabilityId::ConetModeData).max_links, 2);

        let service = runtime.links().online_service("fifo://cfg").expect("online");
        let _a = runtime.links().connect("fifo://cfg").expect("first");
        let _b = runtime.links().connect("fifo://cfg").expect("second");
        assert_eq!(
            runtime.links().connect("fifo://cfg"),
            Err(IocError::TooManyLinks { max: 2 })
        );
        assert_eq!(
            runtime.links().accept_incoming(service),
            Err(IocError::TooManyLinks { max: 2 })
        );
    }
}

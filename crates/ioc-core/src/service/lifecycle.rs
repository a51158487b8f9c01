//! # Link Lifecycle Manager
//!
//! Owns every connection-oriented link and every listening service.
//!
//! ## Link Table
//!
//! | Situation | Lookup result |
//! |-----------|---------------|
//! | id never allocated | `NotExistLink` |
//! | link `Connected` | operation runs |
//! | link `Closed` / `Broken` (record kept) | `LinkBroken` |
//! | record evicted from the tombstone FIFO | `NotExistLink` |
//!
//! Ids are allocated from a counter starting at `LinkId::FIRST_DYNAMIC` and
//! are never reused.
//!
//! ## Handle Release
//!
//! A link's connection sits in an `Option` behind the link's mutex. Whoever
//! takes it out (explicit close, peer close, service offline, shutdown)
//! performs the single release; everyone else finds `None`.
//!
//! ## Lock Order
//!
//! service slot → link slot. Map guards are never held while waiting on
//! either.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use ioc_telemetry::{LINKS_ACCEPTED, LINKS_ACTIVE, LINKS_TORN_DOWN, SERVICES_ONLINE};
use parking_lot::Mutex;
use tracing::{debug, info, trace, warn};

use crate::config::ConetConfig;
use crate::domain::{
    IocError, IocResult, LinkId, LinkRequest, LinkResponse, LinkState, LinkStateCell, MainState,
    ServiceId, SubState, SubStateGuard, TransportError,
};
use crate::ports::{LinkApi, ReadOutcome, TransportAdapter};

/// Largest reply chunk returned by `ExecCommand`.
const COMMAND_REPLY_MAX: usize = 64 * 1024;

/// How a link came to exist.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOrigin {
    /// Accepted by a listening service
    Accepted(ServiceId),
    /// Initiated by `connect`
    Connected,
}

impl LinkOrigin {
    fn label(self) -> &'static str {
        match self {
            Self::Accepted(_) => "accepted",
            Self::Connected => "connected",
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Teardown {
    Explicit,
    ServiceOffline,
    PeerClosed,
    Reset,
    Shutdown,
}

impl Teardown {
    fn terminal(self) -> MainState {
        match self {
            Self::Reset => MainState::Broken,
            _ => MainState::Closed,
        }
    }

    fn via_closing(self) -> bool {
        matches!(self, Self::Explicit | Self::ServiceOffline | Self::Shutdown)
    }

    fn label(self) -> &'static str {
        match self {
            Self::Explicit => "closed",
            Self::ServiceOffline => "service_offline",
            Self::PeerClosed => "peer_closed",
            Self::Reset => "reset",
            Self::Shutdown => "shutdown",
        }
    }
}

enum OpFailure {
    PeerClosed,
    Transport(TransportError),
    Timeout,
}

struct LinkEntry<C> {
    id: LinkId,
    origin: LinkOrigin,
    state: LinkStateCell,
    conn: Mutex<Option<C>>,
}

struct ServiceSlot<S> {
    handle: Option<S>,
    links: Vec<LinkId>,
}

struct ServiceEntry<S> {
    address: String,
    slot: Mutex<ServiceSlot<S>>,
}

/// Connection-oriented link manager over a transport adapter.
pub struct LinkLifecycleManager<T: TransportAdapter> {
    transport: Arc<T>,
    config: ConetConfig,
    links: DashMap<LinkId, Arc<LinkEntry<T::Connection>>>,
    services: DashMap<ServiceId, Arc<ServiceEntry<T::Service>>>,
    tombstones: Mutex<VecDeque<LinkId>>,
    next_link: AtomicU64,
    next_service: AtomicU64,
    live: AtomicUsize,
}

impl<T: TransportAdapter> LinkLifecycleManager<T> {
    pub fn new(transport: T, config: ConetConfig) -> Self {
        Self::with_shared_transport(Arc::new(transport), config)
    }

    pub fn with_shared_transport(transport: Arc<T>, config: ConetConfig) -> Self {
        Self {
            transport,
            config,
            links: DashMap::new(),
            services: DashMap::new(),
            tombstones: Mutex::new(VecDeque::new()),
            next_link: AtomicU64::new(LinkId::FIRST_DYNAMIC),
            next_service: AtomicU64::new(1),
            live: AtomicUsize::new(0),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn config(&self) -> &ConetConfig {
        &self.config
    }

    // =========================================================================
    // SERVICES
    // =========================================================================

    /// Start listening on `address`.
    pub fn online_service(&self, address: &str) -> IocResult<ServiceId> {
        if address.is_empty() {
            return Err(IocError::InvalidArgument("empty service address".to_string()));
        }
        let handle = self.transport.listen(address)?;
        let bound = self.transport.local_address(&handle);
        let id = ServiceId(self.next_service.fetch_add(1, Ordering::Relaxed));

        self.services.insert(
            id,
            Arc::new(ServiceEntry {
                address: bound.clone(),
                slot: Mutex::new(ServiceSlot {
                    handle: Some(handle),
                    links: Vec::new(),
                }),
            }),
        );
        SERVICES_ONLINE.inc();
        info!(service_id = %id, address = %bound, "Service online");
        Ok(id)
    }

    /// Address the service is bound to.
    pub fn service_address(&self, service: ServiceId) -> IocResult<String> {
        Ok(self.service(service)?.address.clone())
    }

    /// Close every link the service accepted, then release the listener.
    ///
    /// After this returns, no accepted link of the service is usable and the
    /// address can be listened on again.
    pub fn offline_service(&self, service: ServiceId) -> IocResult<usize> {
        let (_, entry) = self
            .services
            .remove(&service)
            .ok_or(IocError::NotExistService(service))?;

        let mut slot = entry.slot.lock();
        let mut closed = 0;
        for link in std::mem::take(&mut slot.links) {
            let Ok(link_entry) = self.lookup(link) else {
                continue;
            };
            let mut conn = link_entry.conn.lock();
            if self.teardown_locked(&link_entry, &mut conn, Teardown::ServiceOffline) {
                closed += 1;
            }
        }
        if let Some(handle) = slot.handle.take() {
            self.transport.close_service(handle);
            SERVICES_ONLINE.dec();
        }
        info!(service_id = %service, address = %entry.address, closed, "Service offline");
        Ok(closed)
    }

    /// Live links accepted by `service`.
    pub fn links_of(&self, service: ServiceId) -> IocResult<Vec<LinkId>> {
        let entry = self.service(service)?;
        let slot = entry.slot.lock();
        Ok(slot
            .links
            .iter()
            .copied()
            .filter(|id| self.is_live(*id))
            .collect())
    }

    pub fn service_count(&self) -> usize {
        self.services.len()
    }

    // =========================================================================
    // LINK CREATION
    // =========================================================================

    /// Accept one pending connection on `service`.
    pub fn accept_incoming(&self, service: ServiceId) -> IocResult<Option<LinkId>> {
        let entry = self.service(service)?;
        let mut slot = entry.slot.lock();
        let accepted = match slot.handle.as_ref() {
            Some(handle) => self.transport.accept(handle)?,
            None => return Err(IocError::NotExistService(service)),
        };
        let Some(conn) = accepted else {
            return Ok(None);
        };

        let id = self.register_link(conn, LinkOrigin::Accepted(service))?;
        slot.links.retain(|l| self.is_live(*l));
        slot.links.push(id);
        info!(link_id = %id, service_id = %service, "Link accepted");
        Ok(Some(id))
    }

    /// Accept, polling every `accept_poll_interval_ms` until `timeout`.
    pub fn accept_with_timeout(&self, service: ServiceId, timeout: Duration) -> IocResult<LinkId> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(id) = self.accept_incoming(service)? {
                return Ok(id);
            }
            if Instant::now() >= deadline {
                return Err(IocError::Timeout);
            }
            thread::sleep(self.config.accept_poll_interval());
        }
    }

    /// Open an outgoing link.
    pub fn connect(&self, address: &str) -> IocResult<LinkId> {
        if address.is_empty() {
            return Err(IocError::InvalidArgument("empty peer address".to_string()));
        }
        let conn = self.transport.connect(address)?;
        let id = self.register_link(conn, LinkOrigin::Connected)?;
        info!(link_id = %id, address, "Link connected");
        Ok(id)
    }

    fn register_link(&self, conn: T::Connection, origin: LinkOrigin) -> IocResult<LinkId> {
        let max = self.config.max_links;
        let reserved = self
            .live
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .is_ok();
        if !reserved {
            self.transport.close_connection(conn);
            warn!(max, origin = origin.label(), "Link table full, connection dropped");
            return Err(IocError::TooManyLinks { max });
        }

        let id = LinkId::new(self.next_link.fetch_add(1, Ordering::Relaxed));
        let entry = Arc::new(LinkEntry {
            id,
            origin,
            state: LinkStateCell::new(LinkState::new(MainState::Connecting, SubState::Idle)),
            conn: Mutex::new(Some(conn)),
        });
        self.links.insert(id, Arc::clone(&entry));
        if let Err(e) = entry.state.transition(MainState::Connected) {
            warn!(link_id = %id, from = ?e.from, "Unexpected state on registration");
        }
        LINKS_ACCEPTED.with_label_values(&[origin.label()]).inc();
        LINKS_ACTIVE.inc();
        Ok(id)
    }

    // =========================================================================
    // LINK OPERATIONS
    // =========================================================================

    /// Run one request on a link.
    ///
    /// `SendData` and `ExecCommand` probe the peer before writing. End-of-stream
    /// or a reset observed at any point tears the link down and reports
    /// `LinkBroken`, so an operation on a link whose peer is gone never
    /// succeeds.
    pub fn execute_on_link(&self, link: LinkId, request: LinkRequest) -> IocResult<LinkResponse> {
        let entry = self.lookup(link)?;
        let mut conn = entry.conn.lock();
        let outcome = {
            let Some(handle) = conn.as_ref() else {
                return Err(IocError::LinkBroken(link));
            };
            let _locked = SubStateGuard::lock(&entry.state);
            self.run_request(handle, request)
        };

        match outcome {
            Ok(response) => Ok(response),
            Err(OpFailure::PeerClosed) => {
                self.teardown_locked(&entry, &mut conn, Teardown::PeerClosed);
                Err(IocError::LinkBroken(link))
            }
            Err(OpFailure::Transport(e)) if e.is_disconnect() => {
                self.teardown_locked(&entry, &mut conn, Teardown::Reset);
                Err(IocError::LinkBroken(link))
            }
            Err(OpFailure::Transport(e)) => Err(e.into()),
            Err(OpFailure::Timeout) => Err(IocError::Timeout),
        }
    }

    fn run_request(
        &self,
        handle: &T::Connection,
        request: LinkRequest,
    ) -> Result<LinkResponse, OpFailure> {
        match request {
            LinkRequest::SendData(data) => {
                self.check_peer(handle)?;
                self.transport
                    .send(handle, &data)
                    .map(LinkResponse::Sent)
                    .map_err(OpFailure::Transport)
            }
            LinkRequest::RecvData { max_len } => {
                if max_len == 0 {
                    return Ok(LinkResponse::Data(Vec::new()));
                }
                let mut buf = vec![0u8; max_len];
                match self.read(handle, &mut buf)? {
                    ReadOutcome::Data(n) => {
                        buf.truncate(n);
                        Ok(LinkResponse::Data(buf))
                    }
                    ReadOutcome::WouldBlock => Ok(LinkResponse::Data(Vec::new())),
                    ReadOutcome::EndOfStream => Err(OpFailure::PeerClosed),
                }
            }
            LinkRequest::ExecCommand(command) => {
                self.check_peer(handle)?;
                self.transport
                    .send(handle, &command)
                    .map_err(OpFailure::Transport)?;
                let deadline = Instant::now() + self.config.command_timeout();
                let mut buf = vec![0u8; COMMAND_REPLY_MAX];
                loop {
                    match self.read(handle, &mut buf)? {
                        ReadOutcome::Data(n) => {
                            buf.truncate(n);
                            return Ok(LinkResponse::CommandReply(buf));
                        }
                        ReadOutcome::EndOfStream => return Err(OpFailure::PeerClosed),
                        ReadOutcome::WouldBlock if Instant::now() >= deadline => {
                            return Err(OpFailure::Timeout);
                        }
                        ReadOutcome::WouldBlock => {
                            thread::sleep(self.config.accept_poll_interval());
                        }
                    }
                }
            }
        }
    }

    /// Writes to a half-closed stream can still succeed, so outgoing
    /// requests look for end-of-stream or reset first.
    fn check_peer(&self, handle: &T::Connection) -> Result<(), OpFailure> {
        match self.transport.probe(handle) {
            Ok(ReadOutcome::EndOfStream) => Err(OpFailure::PeerClosed),
            Ok(_) => Ok(()),
            Err(e) => Err(OpFailure::Transport(e)),
        }
    }

    fn read(&self, handle: &T::Connection, buf: &mut [u8]) -> Result<ReadOutcome, OpFailure> {
        self.transport.read(handle, buf).map_err(OpFailure::Transport)
    }

    /// Close a link from this side.
    pub fn close_link(&self, link: LinkId) -> IocResult<()> {
        let entry = self.lookup(link)?;
        let mut conn = entry.conn.lock();
        if self.teardown_locked(&entry, &mut conn, Teardown::Explicit) {
            Ok(())
        } else {
            Err(IocError::LinkBroken(link))
        }
    }

    /// Probe the peer and tear the link down if it closed or reset.
    ///
    /// Returns `true` if this call tore the link down.
    pub fn detect_peer_close(&self, link: LinkId) -> IocResult<bool> {
        let entry = self.lookup(link)?;
        let mut conn = entry.conn.lock();
        let probed = match conn.as_ref() {
            Some(handle) => self.transport.probe(handle),
            None => return Err(IocError::LinkBroken(link)),
        };
        match probed {
            Ok(ReadOutcome::EndOfStream) => {
                Ok(self.teardown_locked(&entry, &mut conn, Teardown::PeerClosed))
            }
            Err(e) if e.is_disconnect() => {
                Ok(self.teardown_locked(&entry, &mut conn, Teardown::Reset))
            }
            Err(e) => Err(e.into()),
            Ok(_) => Ok(false),
        }
    }

    /// Probe every live link. Returns the links torn down by this pass.
    pub fn sweep_peer_closed(&self) -> Vec<LinkId> {
        let candidates: Vec<LinkId> = self
            .links
            .iter()
            .filter(|e| !e.value().state.main().is_terminal())
            .map(|e| *e.key())
            .collect();
        let torn: Vec<LinkId> = candidates
            .into_iter()
            .filter(|&id| matches!(self.detect_peer_close(id), Ok(true)))
            .collect();
        if !torn.is_empty() {
            debug!(count = torn.len(), "Peer-closed links swept");
        }
        torn
    }

    /// Diagnostic state read.
    ///
    /// Terminal links report `Closed` or `Broken` until their record is
    /// evicted.
    pub fn get_link_state(&self, link: LinkId) -> IocResult<LinkState> {
        self.lookup(link).map(|e| e.state.load())
    }

    /// How the link was created.
    pub fn link_origin(&self, link: LinkId) -> IocResult<LinkOrigin> {
        self.lookup(link).map(|e| e.origin)
    }

    /// Links holding a transport handle.
    pub fn live_link_count(&self) -> usize {
        self.live.load(Ordering::Acquire)
    }

    /// Offline every service and close every remaining link.
    /// Returns the number of links closed.
    pub fn shutdown(&self) -> usize {
        let services: Vec<ServiceId> = self.services.iter().map(|s| *s.key()).collect();
        let mut closed: usize = services
            .into_iter()
            .filter_map(|id| self.offline_service(id).ok())
            .sum();

        let links: Vec<LinkId> = self.links.iter().map(|e| *e.key()).collect();
        for link in links {
            let Ok(entry) = self.lookup(link) else {
                continue;
            };
            let mut conn = entry.conn.lock();
            if self.teardown_locked(&entry, &mut conn, Teardown::Shutdown) {
                closed += 1;
            }
        }
        closed
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn service(&self, service: ServiceId) -> IocResult<Arc<ServiceEntry<T::Service>>> {
        self.services
            .get(&service)
            .map(|s| Arc::clone(s.value()))
            .ok_or(IocError::NotExistService(service))
    }

    fn lookup(&self, link: LinkId) -> IocResult<Arc<LinkEntry<T::Connection>>> {
        self.links
            .get(&link)
            .map(|e| Arc::clone(e.value()))
            .ok_or(IocError::NotExistLink(link))
    }

    fn is_live(&self, link: LinkId) -> bool {
        self.links
            .get(&link)
            .is_some_and(|e| !e.value().state.main().is_terminal())
    }

    /// Release the handle in `conn` if still present. Caller holds the link mutex.
    fn teardown_locked(
        &self,
        entry: &LinkEntry<T::Connection>,
        conn: &mut Option<T::Connection>,
        why: Teardown,
    ) -> bool {
        let Some(handle) = conn.take() else {
            return false;
        };
        if why.via_closing() {
            if let Err(e) = entry.state.transition(MainState::Closing) {
                warn!(link_id = %entry.id, from = ?e.from, "Link not closable in its current state");
            }
        }
        let terminal = why.terminal();
        if let Err(e) = entry.state.transition(terminal) {
            warn!(link_id = %entry.id, from = ?e.from, to = ?e.to, "Unexpected teardown transition");
        }
        self.transport.close_connection(handle);
        self.live.fetch_sub(1, Ordering::AcqRel);
        LINKS_ACTIVE.dec();
        LINKS_TORN_DOWN.with_label_values(&[why.label()]).inc();
        info!(link_id = %entry.id, reason = why.label(), state = ?terminal, "Link torn down");
        self.bury(entry.id);
        true
    }

    fn bury(&self, link: LinkId) {
        let evicted = {
            let mut tombstones = self.tombstones.lock();
            tombstones.push_back(link);
            if tombstones.len() > self.config.max_tombstones {
                tombstones.pop_front()
            } else {
                None
            }
        };
        if let Some(old) = evicted {
            self.links.remove(&old);
            trace!(link_id = %old, "Link record evicted");
        }
    }
}

impl<T: TransportAdapter> Drop for LinkLifecycleManager<T> {
    fn drop(&mut self) {
        let closed = self.shutdown();
        if closed > 0 {
            debug!(closed, "Link manager dropped with open links");
        }
    }
}

impl<T: TransportAdapter> LinkApi for LinkLifecycleManager<T> {
    fn online_service(&self, address: &str) -> IocResult<ServiceId> {
        LinkLifecycleManager::online_service(self, address)
    }

    fn offline_service(&self, service: ServiceId) -> IocResult<usize> {
        LinkLifecycleManager::offline_service(self, service)
    }

    fn accept_incoming(&self, service: ServiceId) -> IocResult<Option<LinkId>> {
        LinkLifecycleManager::accept_incoming(self, service)
    }

    fn accept_with_timeout(&self, service: ServiceId, timeout: Duration) -> IocResult<LinkId> {
        LinkLifecycleManager::accept_with_timeout(self, service, timeout)
    }

    fn connect(&self, address: &str) -> IocResult<LinkId> {
        LinkLifecycleManager::connect(self, address)
    }

    fn close_link(&self, link: LinkId) -> IocResult<()> {
        LinkLifecycleManager::close_link(self, link)
    }

    fn detect_peer_close(&self, link: LinkId) -> IocResult<bool> {
        LinkLifecycleManager::detect_peer_close(self, link)
    }

    fn execute_on_link(&self, link: LinkId, request: LinkRequest) -> IocResult<LinkResponse> {
        LinkLifecycleManager::execute_on_link(self, link, request)
    }

    fn get_link_state(&self, link: LinkId) -> IocResult<LinkState> {
        LinkLifecycleManager::get_link_state(self, link)
    }
}

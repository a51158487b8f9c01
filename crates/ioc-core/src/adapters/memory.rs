//! In-process transport.
//!
//! Services live in a string namespace shared by clones of one
//! [`MemoryTransport`]. Each connection is a pair of byte pipes.
//!
//! | Action | Peer observes |
//! |--------|---------------|
//! | `close_connection` / drop | `EndOfStream` after draining, `BrokenPipe` on send |
//! | [`MemoryConnection::abort`] | `Reset` on read, probe and send |
//! | `close_service` / drop | address free, unaccepted clients see `EndOfStream` |

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::domain::TransportError;
use crate::ports::outbound::{ReadOutcome, TransportAdapter};

type Namespace = Arc<Mutex<HashMap<String, Arc<Listener>>>>;

#[derive(Debug, Default)]
struct PipeState {
    buf: VecDeque<u8>,
    writer_closed: bool,
    reader_closed: bool,
    reset: bool,
}

#[derive(Debug, Default)]
struct Pipe {
    state: Mutex<PipeState>,
}

#[derive(Debug)]
struct Listener {
    address: String,
    pending: Mutex<VecDeque<MemoryConnection>>,
}

/// In-process transport adapter.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    namespace: Namespace,
}

/// Listening handle. Dropping it frees the address.
#[derive(Debug)]
pub struct MemoryService {
    listener: Arc<Listener>,
    namespace: Namespace,
}

/// One end of an in-process connection. Dropping it closes that end.
#[derive(Debug)]
pub struct MemoryConnection {
    inbound: Arc<Pipe>,
    outbound: Arc<Pipe>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a live service holds `address`.
    pub fn is_bound(&self, address: &str) -> bool {
        self.namespace.lock().contains_key(address)
    }
}

impl MemoryConnection {
    fn pair() -> (Self, Self) {
        let a_to_b = Arc::new(Pipe::default());
        let b_to_a = Arc::new(Pipe::default());
        let a = Self {
            inbound: Arc::clone(&b_to_a),
            outbound: Arc::clone(&a_to_b),
        };
        let b = Self {
            inbound: a_to_b,
            outbound: b_to_a,
        };
        (a, b)
    }

    /// Tear the connection down abruptly. Both ends see `Reset`.
    pub fn abort(self) {
        self.inbound.state.lock().reset = true;
        self.outbound.state.lock().reset = true;
    }

    /// Write bytes to the peer.
    pub fn write(&self, data: &[u8]) -> Result<usize, TransportError> {
        let mut out = self.outbound.state.lock();
        if out.reset {
            return Err(TransportError::Reset);
        }
        if out.reader_closed {
            return Err(TransportError::BrokenPipe);
        }
        out.buf.extend(data.iter().copied());
        Ok(data.len())
    }

    /// Read pending bytes without blocking.
    pub fn read(&self, buf: &mut [u8]) -> Result<ReadOutcome, TransportError> {
        let mut inp = self.inbound.state.lock();
        if inp.reset {
            return Err(TransportError::Reset);
        }
        if !inp.buf.is_empty() {
            let n = buf.len().min(inp.buf.len());
            for (slot, byte) in buf.iter_mut().zip(inp.buf.drain(..n)) {
                *slot = byte;
            }
            return Ok(ReadOutcome::Data(n));
        }
        if inp.writer_closed {
            return Ok(ReadOutcome::EndOfStream);
        }
        Ok(ReadOutcome::WouldBlock)
    }

    /// Read everything pending into a vector.
    pub fn read_available(&self) -> Result<Vec<u8>, TransportError> {
        let mut inp = self.inbound.state.lock();
        if inp.reset {
            return Err(TransportError::Reset);
        }
        Ok(inp.buf.drain(..).collect())
    }

    fn probe(&self) -> Result<ReadOutcome, TransportError> {
        let inp = self.inbound.state.lock();
        if inp.reset {
            Err(TransportError::Reset)
        } else if !inp.buf.is_empty() {
            Ok(ReadOutcome::Data(inp.buf.len()))
        } else if inp.writer_closed {
            Ok(ReadOutcome::EndOfStream)
        } else {
            Ok(ReadOutcome::WouldBlock)
        }
    }
}

impl Drop for MemoryConnection {
    fn drop(&mut self) {
        self.outbound.state.lock().writer_closed = true;
        self.inbound.state.lock().reader_closed = true;
    }
}

impl MemoryService {
    pub fn address(&self) -> &str {
        &self.listener.address
    }
}

impl Drop for MemoryService {
    fn drop(&mut self) {
        let mut ns = self.namespace.lock();
        if ns
            .get(&self.listener.address)
            .is_some_and(|l| Arc::ptr_eq(l, &self.listener))
        {
            ns.remove(&self.listener.address);
        }
        drop(ns);
        // Unaccepted server ends close here, so their clients see end-of-stream.
        self.listener.pending.lock().clear();
    }
}

impl TransportAdapter for MemoryTransport {
    type Service = MemoryService;
    type Connection = MemoryConnection;

    fn listen(&self, address: &str) -> Result<MemoryService, TransportError> {
        if address.is_empty() {
            return Err(TransportError::InvalidAddress(address.to_string()));
        }
        let mut ns = self.namespace.lock();
        if ns.contains_key(address) {
            return Err(TransportError::AddressInUse(address.to_string()));
        }
        let listener = Arc::new(Listener {
            address: address.to_string(),
            pending: Mutex::new(VecDeque::new()),
        });
        ns.insert(address.to_string(), Arc::clone(&listener));
        debug!(address, "Memory service listening");
        Ok(MemoryService {
            listener,
            namespace: Arc::clone(&self.namespace),
        })
    }

    fn local_address(&self, service: &MemoryService) -> String {
        service.listener.address.clone()
    }

    fn accept(&self, service: &MemoryService) -> Result<Option<MemoryConnection>, TransportError> {
        Ok(service.listener.pending.lock().pop_front())
    }

    fn connect(&self, address: &str) -> Result<MemoryConnection, TransportError> {
        let listener = self
            .namespace
            .lock()
            .get(address)
            .cloned()
            .ok_or_else(|| TransportError::ConnectionRefused(address.to_string()))?;
        let (client, server) = MemoryConnection::pair();
        listener.pending.lock().push_back(server);
        Ok(client)
    }

    fn read(&self, conn: &MemoryConnection, buf: &mut [u8]) -> Result<ReadOutcome, TransportError> {
        conn.read(buf)
    }

    fn send(&self, conn: &MemoryConnection, data: &[u8]) -> Result<usize, TransportError> {
        conn.write(data)
    }

    fn probe(&self, conn: &MemoryConnection) -> Result<ReadOutcome, TransportError> {
        conn.probe()
    }

    fn close_connection(&self, conn: MemoryConnection) {
        drop(conn);
    }

    fn close_service(&self, service: MemoryService) {
        debug!(address = service.address(), "Memory service closed");
        drop(service);
    }
}

//! `TransportAdapter` over `std::net`.
//!
//! Listeners and streams are non-blocking. On Unix, `TcpListener::bind`
//! sets `SO_REUSEADDR`, so an address can be listened on again right after
//! `close_service` even while old connections sit in `TIME_WAIT`.

use std::io::{self, ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use ioc_core::{ReadOutcome, TransportAdapter, TransportError};
use tracing::{debug, trace};

/// Scheme prefix accepted (and stripped) in addresses.
pub const TCP_SCHEME: &str = "tcp://";

/// Back-off while a non-blocking write is refused.
const WRITE_RETRY: Duration = Duration::from_millis(1);

/// TCP transport adapter.
#[derive(Debug, Clone, Copy)]
pub struct TcpTransport {
    nodelay: bool,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self { nodelay: true }
    }
}

impl TcpTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Toggle `TCP_NODELAY` on new streams.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    fn prepare(&self, stream: &TcpStream) -> Result<(), TransportError> {
        stream.set_nonblocking(true).map_err(io_error)?;
        stream.set_nodelay(self.nodelay).map_err(io_error)
    }
}

/// Listening socket.
#[derive(Debug)]
pub struct TcpService {
    listener: TcpListener,
    local: SocketAddr,
}

impl TcpService {
    pub fn local_addr(&self) -> SocketAddr {
        self.local
    }
}

/// One established stream.
#[derive(Debug)]
pub struct TcpConnection {
    stream: TcpStream,
    peer: Option<SocketAddr>,
}

impl TcpConnection {
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }
}

/// Strip an optional `tcp://` prefix.
pub fn strip_scheme(address: &str) -> &str {
    address.strip_prefix(TCP_SCHEME).unwrap_or(address)
}

fn io_error(e: io::Error) -> TransportError {
    TransportError::Io(e.to_string())
}

fn stream_error(e: io::Error) -> TransportError {
    match e.kind() {
        ErrorKind::ConnectionReset | ErrorKind::ConnectionAborted => TransportError::Reset,
        ErrorKind::BrokenPipe | ErrorKind::NotConnected => TransportError::BrokenPipe,
        _ => io_error(e),
    }
}

fn read_result(result: io::Result<usize>) -> Result<ReadOutcome, TransportError> {
    match result {
        Ok(0) => Ok(ReadOutcome::EndOfStream),
        Ok(n) => Ok(ReadOutcome::Data(n)),
        Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(ReadOutcome::WouldBlock),
        Err(e) if e.kind() == ErrorKind::Interrupted => Ok(ReadOutcome::WouldBlock),
        Err(e) => Err(stream_error(e)),
    }
}

impl TransportAdapter for TcpTransport {
    type Service = TcpService;
    type Connection = TcpConnection;

    fn listen(&self, address: &str) -> Result<TcpService, TransportError> {
        let target = strip_scheme(address);
        let listener = TcpListener::bind(target).map_err(|e| match e.kind() {
            ErrorKind::AddrInUse => TransportError::AddressInUse(address.to_string()),
            ErrorKind::InvalidInput | ErrorKind::AddrNotAvailable => {
                TransportError::InvalidAddress(address.to_string())
            }
            _ => io_error(e),
        })?;
        listener.set_nonblocking(true).map_err(io_error)?;
        let local = listener.local_addr().map_err(io_error)?;
        debug!(%local, "TCP service listening");
        Ok(TcpService { listener, local })
    }

    fn local_address(&self, service: &TcpService) -> String {
        format!("{TCP_SCHEME}{}", service.local)
    }

    fn accept(&self, service: &TcpService) -> Result<Option<TcpConnection>, TransportError> {
        match service.listener.accept() {
            Ok((stream, peer)) => {
                self.prepare(&stream)?;
                trace!(%peer, "TCP connection accepted");
                Ok(Some(TcpConnection {
                    stream,
                    peer: Some(peer),
                }))
            }
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(io_error(e)),
        }
    }

    fn connect(&self, address: &str) -> Result<TcpConnection, TransportError> {
        let stream = TcpStream::connect(strip_scheme(address)).map_err(|e| match e.kind() {
            ErrorKind::ConnectionRefused => TransportError::ConnectionRefused(address.to_string()),
            ErrorKind::InvalidInput => TransportError::InvalidAddress(address.to_string()),
            _ => io_error(e),
        })?;
        self.prepare(&stream)?;
        let peer = stream.peer_addr().ok();
        Ok(TcpConnection { stream, peer })
    }

    fn read(&self, conn: &TcpConnection, buf: &mut [u8]) -> Result<ReadOutcome, TransportError> {
        read_result((&conn.stream).read(buf))
    }

    fn send(&self, conn: &TcpConnection, data: &[u8]) -> Result<usize, TransportError> {
        let mut written = 0;
        while written < data.len() {
            match (&conn.stream).write(&data[written..]) {
                Ok(0) => return Err(TransportError::BrokenPipe),
                Ok(n) => written += n,
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(WRITE_RETRY),
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(stream_error(e)),
            }
        }
        Ok(written)
    }

    fn probe(&self, conn: &TcpConnection) -> Result<ReadOutcome, TransportError> {
        let mut byte = [0u8; 1];
        read_result(conn.stream.peek(&mut byte))
    }

    fn close_connection(&self, conn: TcpConnection) {
        // The peer may already be gone; shutdown errors carry no information.
        let _ = conn.stream.shutdown(Shutdown::Both);
        trace!(peer = ?conn.peer, "TCP connection closed");
    }

    fn close_service(&self, service: TcpService) {
        debug!(local = %service.local, "TCP service closed");
        drop(service);
    }
}

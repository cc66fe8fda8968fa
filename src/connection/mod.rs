//! The connection object.
//!
//! A [`Connection`] wraps one socket, plaintext or TLS, and gives the
//! surrounding event loop non-blocking read/write primitives with internal
//! buffering. The object is reusable: [`Connection::reset`] returns it to a
//! clean baseline so it can sit in a pool between uses.
//!
//! The implementation is spread over several files, each adding an
//! `impl Connection` block:
//!
//! - this file: state, lifecycle (reset, connect, listen, accept, wait)
//! - `handshake.rs`: the TLS handshake driver
//! - `read.rs`: the read path
//! - `write.rs`: raw writes, flushing and buffered writes
//! - `report.rs`: bandwidth reporting

mod buffer;
#[cfg(feature = "tls")]
mod handshake;
mod read;
mod report;
mod status;
mod write;

use buffer::IoBuffer;
pub use read::ReadOutcome;
pub use report::format_progress;
pub use status::{Status, TransportState};
pub use write::FlushMode;

use crate::config::ConnectionConfig;
use crate::error::Error;
use crate::socket::Socket;
#[cfg(feature = "tls")]
use crate::tls::TlsSession;

use mio::Interest;
use socket2::{Domain, Protocol, SockAddr, Type};
use std::fmt;
use std::io::{self, ErrorKind};
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

// Internal transport, carrying the TLS session where there is one
enum Transport {
    Plain,
    #[cfg(feature = "tls")]
    Handshake(Box<dyn TlsSession>),
    #[cfg(feature = "tls")]
    Data(Box<dyn TlsSession>),
}

impl Transport {
    fn state(&self) -> TransportState {
        match self {
            Transport::Plain => TransportState::PlainData,
            #[cfg(feature = "tls")]
            Transport::Handshake(_) => TransportState::TlsHandshake,
            #[cfg(feature = "tls")]
            Transport::Data(_) => TransportState::TlsData,
        }
    }
}

/// What [`Connection::listen`] bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenPort {
    /// Port 0 was requested; this is the port the OS picked.
    Assigned(u16),
    /// The requested port was used as is.
    Requested,
}

/// A socket with buffering, a TLS state machine and traffic counters.
///
/// Not thread-safe: exactly one owner (normally the event loop) may call
/// into a connection at a time. No method blocks except [`Self::wait`] and
/// a [`FlushMode::Blocking`] flush, both bounded.
pub struct Connection {
    config: Arc<ConnectionConfig>,
    socket: Option<Box<dyn Socket>>,
    status: Status,
    transport: Transport,
    input: IoBuffer,
    output: IoBuffer,
    send_window_kb: u64,
    read_bytes: u64,
    read_kb: u64,
    wrote_bytes: u64,
    reported_kb: u64,
    activity: Instant,
    // Length a throttled TLS write must be retried with
    want_write_len: usize,
}

// ============================================================================
// Constructors
// ============================================================================

impl Connection {
    /// Creates an unallocated connection with buffers sized by `config`.
    pub fn new(config: impl Into<Arc<ConnectionConfig>>) -> Self {
        let config = config.into();
        let mut conn = Self {
            input: IoBuffer::new(config.in_buffer_size),
            output: IoBuffer::new(config.out_buffer_size),
            socket: None,
            status: Status::empty(),
            transport: Transport::Plain,
            send_window_kb: 0,
            read_bytes: 0,
            read_kb: 0,
            wrote_bytes: 0,
            reported_kb: 0,
            activity: Instant::now(),
            want_write_len: 0,
            config,
        };
        conn.reset(Status::empty());
        conn
    }
}

// ============================================================================
// Lifecycle
// ============================================================================

impl Connection {
    /// Tears the connection down and leaves exactly `status` set.
    ///
    /// Closes the socket, drops the TLS session, empties both buffers, zeroes
    /// the counters and restores the initial send window. Safe to call on an
    /// already reset connection.
    ///
    /// Resetting a connection that is `CHANGING` without passing `CHANGING`
    /// again is a bug in the caller. It is logged, and the reset still
    /// happens.
    pub fn reset(&mut self, status: Status) {
        if self.status.contains(Status::CHANGING) && !status.contains(Status::CHANGING) {
            error!(sockfd = self.sockfd(), "BUG! Attempt to reset connection mid-change");
        }

        if let Some(socket) = self.socket.take() {
            debug!(sockfd = socket.raw_id(), "Closing socket");
        }
        self.transport = Transport::Plain;
        self.status = status;
        self.activity = Instant::now();
        self.input.clear();
        self.output.clear();
        self.send_window_kb = self.config.initial_window_kb;
        self.read_bytes = 0;
        self.read_kb = 0;
        self.wrote_bytes = 0;
        self.reported_kb = 0;
        self.want_write_len = 0;
    }

    /// Resets to `status | ALLOCATED` and takes ownership of `socket`.
    ///
    /// Used for accepted sockets. The socket should already be non-blocking.
    pub fn adopt(&mut self, socket: Box<dyn Socket>, status: Status) {
        self.reset(status | Status::ALLOCATED);
        self.socket = Some(socket);
    }

    /// Opens a TCP connection to `addr`.
    ///
    /// The connect call itself blocks for at most the configured socket
    /// timeout; afterwards the socket is non-blocking. The connection is
    /// reset first, so on any failure (including an address that does not
    /// resolve) it is left unallocated and can be retried.
    #[instrument(skip(self, addr))]
    pub fn connect<A: ToSocketAddrs>(&mut self, addr: A) -> Result<(), Error> {
        self.reset(Status::CHANGING | Status::ALLOCATED);
        let addr = match resolve(addr) {
            Ok(addr) => addr,
            Err(err) => {
                self.status.remove(Status::CHANGING | Status::ALLOCATED);
                return Err(err);
            }
        };

        match open_stream(addr, self.config.socket_timeout) {
            Ok(socket) => {
                info!(sockfd = Socket::raw_id(&socket), %addr, "Connected");
                self.socket = Some(Box::new(socket));
                self.status.remove(Status::CHANGING);
                Ok(())
            }
            Err(source) => {
                debug!(%addr, ?source, "Connect failed");
                self.status.remove(Status::CHANGING | Status::ALLOCATED);
                Err(Error::ConnectFailed { addr, source })
            }
        }
    }

    /// Binds to `addr` and starts listening.
    ///
    /// Returns [`ListenPort::Assigned`] with the OS-chosen port when port 0
    /// was requested, [`ListenPort::Requested`] otherwise. Like
    /// [`Self::connect`], a failure leaves the connection reset and
    /// unallocated.
    #[instrument(skip(self, addr))]
    pub fn listen<A: ToSocketAddrs>(
        &mut self,
        addr: A,
        backlog: i32,
    ) -> Result<ListenPort, Error> {
        let changing = Status::CHANGING | Status::ALLOCATED | Status::LISTENING;
        self.reset(changing);
        let addr = match resolve(addr) {
            Ok(addr) => addr,
            Err(err) => {
                self.status.remove(changing);
                return Err(err);
            }
        };

        let socket = match open_listener(addr, backlog, self.config.socket_timeout) {
            Ok(socket) => socket,
            Err(source) => {
                debug!(%addr, ?source, "Listen failed");
                self.status.remove(changing);
                return Err(Error::ListenFailed { addr, source });
            }
        };

        let bound = if addr.port() == 0 {
            match Socket::local_addr(&socket) {
                Ok(local_addr) => ListenPort::Assigned(local_addr.port()),
                Err(err) => {
                    warn!(sockfd = Socket::raw_id(&socket), ?err, "Could not query bound port");
                    ListenPort::Requested
                }
            }
        } else {
            ListenPort::Requested
        };
        info!(sockfd = Socket::raw_id(&socket), %addr, ?bound, "Listening for connections");

        self.socket = Some(Box::new(socket));
        self.status.remove(Status::CHANGING);
        Ok(bound)
    }

    /// Accepts one pending peer on a listening connection.
    ///
    /// Returns `Ok(None)` when nobody is waiting. The new connection shares
    /// this connection's configuration.
    pub fn accept(&mut self) -> Result<Option<(Connection, SocketAddr)>, Error> {
        if !self.status.contains(Status::LISTENING) {
            return Err(Error::Io(io::Error::new(
                ErrorKind::InvalidInput,
                "connection is not listening",
            )));
        }
        let sockfd = self.sockfd();
        let socket = self.socket.as_deref_mut().ok_or(Error::NotAllocated)?;

        loop {
            match socket.accept() {
                Ok((mut peer, peer_addr)) => {
                    peer.set_nonblocking(true)?;
                    let mut conn = Connection::new(self.config.clone());
                    conn.adopt(peer, Status::empty());
                    info!(sockfd, peer_sockfd = conn.sockfd(), %peer_addr, "Accepted connection");
                    return Ok(Some((conn, peer_addr)));
                }
                Err(err) => match err.kind() {
                    ErrorKind::WouldBlock => return Ok(None),
                    ErrorKind::Interrupted => continue,
                    ErrorKind::ConnectionAborted | ErrorKind::ConnectionReset => {
                        warn!(sockfd, ?err, "Transient accept error");
                        continue;
                    }
                    _ => {
                        error!(sockfd, ?err, "Error accepting connection");
                        return Err(err.into());
                    }
                },
            }
        }
    }

    /// Waits up to `timeout_ms` for the socket to become ready.
    ///
    /// Waits for writability while `WANT_WRITE` is set (and readability too
    /// if `WANT_READ` is also set), for readability otherwise. Returns
    /// whether the socket became ready before the timeout.
    pub fn wait(&mut self, timeout_ms: u64) -> Result<bool, Error> {
        let interest = match (
            self.status.contains(Status::WANT_READ),
            self.status.contains(Status::WANT_WRITE),
        ) {
            (true, true) => Interest::READABLE | Interest::WRITABLE,
            (false, true) => Interest::WRITABLE,
            _ => Interest::READABLE,
        };
        let sockfd = self.sockfd();
        let socket = self.socket.as_deref_mut().ok_or(Error::NotAllocated)?;

        trace!(sockfd, ?interest, timeout_ms, "Waiting for socket");
        Ok(socket.wait(interest, Duration::from_millis(timeout_ms))?)
    }
}

// ============================================================================
// Accessors
// ============================================================================

impl Connection {
    /// Platform handle of the socket, -1 when there is none.
    pub fn sockfd(&self) -> i64 {
        self.socket.as_ref().map_or(-1, |socket| socket.raw_id())
    }

    pub fn status(&self) -> Status {
        self.status
    }

    pub fn state(&self) -> TransportState {
        self.transport.state()
    }

    pub fn config(&self) -> &Arc<ConnectionConfig> {
        &self.config
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref()?.local_addr().ok()
    }

    /// When data was last received (or the connection last reset).
    pub fn activity(&self) -> Instant {
        self.activity
    }

    /// Received bytes not yet consumed.
    pub fn input(&self) -> &[u8] {
        self.input.filled()
    }

    /// Discards the first `count` received bytes.
    pub fn consume_input(&mut self, count: usize) {
        self.input.consume(count);
    }

    /// Bytes queued in the output buffer.
    pub fn output_len(&self) -> usize {
        self.output.len()
    }

    pub fn output_capacity(&self) -> usize {
        self.output.capacity()
    }

    /// Whole KB received since the last reset.
    pub fn read_kb(&self) -> u64 {
        self.read_kb
    }

    /// Received bytes not yet rolled into [`Self::read_kb`].
    pub fn read_bytes(&self) -> u64 {
        self.read_bytes
    }

    /// Bytes sent since the last bandwidth report.
    pub fn wrote_bytes(&self) -> u64 {
        self.wrote_bytes
    }

    /// KB already announced by [`Self::report_progress`].
    pub fn reported_kb(&self) -> u64 {
        self.reported_kb
    }

    pub fn send_window_kb(&self) -> u64 {
        self.send_window_kb
    }

    pub fn set_send_window_kb(&mut self, kb: u64) {
        self.send_window_kb = kb;
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("sockfd", &self.sockfd())
            .field("status", &self.status)
            .field("state", &self.state())
            .field("input", &self.input.len())
            .field("output", &self.output.len())
            .field("send_window_kb", &self.send_window_kb)
            .field("wrote_bytes", &self.wrote_bytes)
            .field("reported_kb", &self.reported_kb)
            .finish()
    }
}

// ============================================================================
// Socket Setup
// ============================================================================

fn resolve<A: ToSocketAddrs>(addr: A) -> Result<SocketAddr, Error> {
    addr.to_socket_addrs()
        .map_err(|_| Error::InvalidAddress)?
        .next()
        .ok_or(Error::InvalidAddress)
}

fn open_stream(addr: SocketAddr, timeout: Duration) -> io::Result<socket2::Socket> {
    let timeout = (!timeout.is_zero()).then_some(timeout);
    let socket =
        socket2::Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_read_timeout(timeout)?;
    socket.set_write_timeout(timeout)?;
    match timeout {
        Some(timeout) => socket.connect_timeout(&SockAddr::from(addr), timeout)?,
        None => socket.connect(&SockAddr::from(addr))?,
    }
    socket.set_nodelay(true)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

fn open_listener(addr: SocketAddr, backlog: i32, timeout: Duration) -> io::Result<socket2::Socket> {
    let timeout = (!timeout.is_zero()).then_some(timeout);
    let socket =
        socket2::Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_read_timeout(timeout)?;
    socket.set_write_timeout(timeout)?;
    socket.bind(&SockAddr::from(addr))?;
    socket.listen(backlog)?;
    socket.set_nonblocking(true)?;
    Ok(socket)
}

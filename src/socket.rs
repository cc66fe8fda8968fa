//! Socket capability and platform error classification.
//!
//! A [`Connection`](crate::Connection) never talks to the operating system
//! directly. It drives a [`Socket`], which is implemented here for
//! [`socket2::Socket`] and can be implemented by tests or alternative
//! platforms.

use mio::Interest;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::time::Duration;

/// Coarse classes of platform I/O errors.
///
/// This is the only place where error kinds are interpreted. Everything else
/// asks [`classify`] and acts on the class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// The call was interrupted before doing anything. Retry immediately.
    Retryable,
    /// The transport is not ready. Retry once it signals readiness.
    WouldBlock,
    /// The transport is gone (reset, broken pipe, ...).
    Fatal,
    /// Anything we do not recognise. Treated as fatal by the read path.
    Other,
}

impl ErrorClass {
    /// Whether the caller should simply try again later.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorClass::Retryable | ErrorClass::WouldBlock)
    }
}

/// Classifies a platform error.
pub fn classify(err: &io::Error) -> ErrorClass {
    match err.kind() {
        ErrorKind::Interrupted => ErrorClass::Retryable,
        // SO_RCVTIMEO/SO_SNDTIMEO expiry surfaces as either of these
        ErrorKind::WouldBlock | ErrorKind::TimedOut => ErrorClass::WouldBlock,
        ErrorKind::ConnectionReset
        | ErrorKind::ConnectionAborted
        | ErrorKind::BrokenPipe
        | ErrorKind::NotConnected
        | ErrorKind::UnexpectedEof => ErrorClass::Fatal,
        _ => ErrorClass::Other,
    }
}

/// The platform socket operations a connection relies on.
///
/// Implementations must report errors with the usual [`io::ErrorKind`]s so
/// that [`classify`] can interpret them.
pub trait Socket: Send {
    /// Reads into `buf`. `Ok(0)` means the peer closed its side.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Writes from `data`, returning how much was accepted.
    fn write(&mut self, data: &[u8]) -> io::Result<usize>;

    /// Switches between non-blocking and blocking mode.
    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()>;

    /// Waits up to `timeout` for the socket to become ready for `interest`.
    ///
    /// Returns `Ok(false)` on timeout. Interrupted waits are retried.
    fn wait(&mut self, interest: Interest, timeout: Duration) -> io::Result<bool>;

    fn local_addr(&self) -> io::Result<SocketAddr>;

    fn peer_addr(&self) -> io::Result<SocketAddr>;

    /// Accepts one pending connection on a listening socket.
    fn accept(&mut self) -> io::Result<(Box<dyn Socket>, SocketAddr)> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            "socket cannot accept connections",
        ))
    }

    /// Platform handle, used to identify the socket in logs.
    fn raw_id(&self) -> i64;
}

impl Socket for socket2::Socket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        io::Read::read(self, buf)
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        io::Write::write(self, data)
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        socket2::Socket::set_nonblocking(self, nonblocking)
    }

    #[cfg(unix)]
    fn wait(&mut self, interest: Interest, timeout: Duration) -> io::Result<bool> {
        use mio::unix::SourceFd;
        use mio::{Events, Poll, Token};
        use std::os::fd::AsRawFd;

        let mut poll = Poll::new()?;
        let fd = self.as_raw_fd();
        poll.registry()
            .register(&mut SourceFd(&fd), Token(0), interest)?;

        let mut events = Events::with_capacity(1);
        loop {
            match poll.poll(&mut events, Some(timeout)) {
                Ok(()) => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }
        Ok(!events.is_empty())
    }

    #[cfg(not(unix))]
    fn wait(&mut self, _interest: Interest, _timeout: Duration) -> io::Result<bool> {
        Err(io::Error::new(
            ErrorKind::Unsupported,
            "readiness wait is only available on unix",
        ))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        socket2::Socket::local_addr(self)?
            .as_socket()
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidData, "not an inet socket"))
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        socket2::Socket::peer_addr(self)?
            .as_socket()
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidData, "not an inet socket"))
    }

    fn accept(&mut self) -> io::Result<(Box<dyn Socket>, SocketAddr)> {
        let (socket, addr) = socket2::Socket::accept(self)?;
        let addr = addr
            .as_socket()
            .ok_or_else(|| io::Error::new(ErrorKind::InvalidData, "not an inet socket"))?;
        Ok((Box::new(socket), addr))
    }

    fn raw_id(&self) -> i64 {
        #[cfg(unix)]
        {
            use std::os::fd::AsRawFd;
            self.as_raw_fd() as i64
        }
        #[cfg(windows)]
        {
            use std::os::windows::io::AsRawSocket;
            self.as_raw_socket() as i64
        }
        #[cfg(not(any(unix, windows)))]
        {
            0
        }
    }
}

//! TLS capability used by the connection.
//!
//! The connection only needs a narrow slice of a TLS library: create a
//! session, drive the handshake one step at a time, move application data
//! and ask how much decrypted data is buffered. That slice is described by
//! [`TlsContext`] and [`TlsSession`]; [`RustlsContext`] implements it with
//! rustls.

mod session;
mod tls_config;

pub use session::{RustlsContext, RustlsSession};
pub use tls_config::load_root_store;

use crate::error::Error;
use crate::socket::Socket;
use std::fmt;
use std::io;

/// Why a TLS operation did not complete.
#[derive(Debug)]
pub enum TlsError {
    /// The session needs more bytes from the peer.
    WantRead,
    /// The session has records queued that the socket would not take.
    WantWrite,
    /// The underlying socket failed.
    Syscall(io::Error),
    /// The peer violated the protocol or a certificate check failed.
    Protocol(rustls::Error),
}

impl TlsError {
    /// Short name of the TLS-layer condition, for logs.
    pub fn name(&self) -> &'static str {
        match self {
            TlsError::WantRead => "want_read",
            TlsError::WantWrite => "want_write",
            TlsError::Syscall(_) => "syscall",
            TlsError::Protocol(_) => "protocol",
        }
    }

    /// The platform error behind this condition, if any.
    pub fn platform_error(&self) -> Option<&io::Error> {
        match self {
            TlsError::Syscall(err) => Some(err),
            _ => None,
        }
    }
}

impl fmt::Display for TlsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TlsError::Syscall(err) => write!(f, "syscall: {err}"),
            TlsError::Protocol(err) => write!(f, "protocol: {err}"),
            other => f.write_str(other.name()),
        }
    }
}

/// One client-side TLS session bound to a connection's socket.
///
/// Every I/O method gets the socket passed in; the session never owns it.
pub trait TlsSession: Send {
    /// Advances the handshake as far as the socket allows.
    ///
    /// `Ok(())` once the handshake is complete.
    fn handshake(&mut self, socket: &mut dyn Socket) -> Result<(), TlsError>;

    /// Reads decrypted application data. `Ok(0)` means the peer closed.
    fn read(&mut self, socket: &mut dyn Socket, buf: &mut [u8]) -> Result<usize, TlsError>;

    /// Encrypts and sends application data, returning how much was taken.
    ///
    /// After [`TlsError::WantWrite`] the caller must retry with the same
    /// length. An empty `data` only pushes out queued records.
    fn write(&mut self, socket: &mut dyn Socket, data: &[u8]) -> Result<usize, TlsError>;

    /// Decrypted bytes held by the session and not yet read.
    fn pending(&self) -> usize;

    /// Whether encrypted records are queued that the socket has not taken
    /// yet. A write of empty `data` pushes them out.
    fn wants_write(&self) -> bool {
        false
    }

    /// Forgets error state left over from a previous call.
    fn clear_errors(&mut self) {}

    /// Negotiated protocol version, once known.
    fn protocol_version(&self) -> Option<String>;

    /// Negotiated cipher suite, once known.
    fn cipher_suite(&self) -> Option<String>;
}

/// Options applied to a new session.
#[derive(Debug, Clone)]
pub struct SessionOptions<'a> {
    /// Name sent as SNI. `None` disables SNI.
    pub sni: Option<&'a str>,
    /// Name (or IP address) the peer certificate is checked against.
    pub verify_name: &'a str,
    /// Cipher suite names in preference order. Empty keeps the defaults.
    pub ciphers: &'a [String],
    /// Plaintext bytes the session may queue before writes come up short.
    pub buffer_limit: Option<usize>,
    /// Socket the session belongs to, for logs.
    pub socket_id: i64,
}

/// Factory for client sessions.
pub trait TlsContext {
    fn new_session(&self, options: &SessionOptions<'_>) -> Result<Box<dyn TlsSession>, Error>;
}

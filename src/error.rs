use std::net::SocketAddr;
use thiserror::Error;

/// The error type for kiteconn operations.
///
/// Only structural failures are reported through this type. Transient
/// conditions (interrupted or would-block I/O, TLS want-read/want-write) are
/// absorbed by the connection and show up as status flags or as a
/// [`ReadOutcome`](crate::ReadOutcome) instead.
///
/// Fatal transport errors are also recorded on the connection itself
/// (`BROKEN`, `CLOSED_WRITE`), so a caller that ignores a returned error can
/// still detect the failure by polling [`Connection::status`](crate::Connection::status).
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // I/O and Networking Errors
    // ============================================================================
    /// Low-level I/O error from the operating system.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The provided socket address could not be parsed or resolved.
    #[error("Invalid socket address")]
    InvalidAddress,

    /// Socket creation, option setting or the connect call failed.
    #[error("Failed to connect to {addr}: {source}")]
    ConnectFailed {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// Socket creation, bind or listen failed.
    #[error("Failed to listen on {addr}: {source}")]
    ListenFailed {
        addr: SocketAddr,
        source: std::io::Error,
    },

    /// The operation needs a live socket but the connection has none.
    #[error("Connection has no socket")]
    NotAllocated,

    /// A blocking flush hit its iteration ceiling without draining.
    ///
    /// This is an internal fault, not backpressure. The connection is marked
    /// broken when this is returned.
    #[error("Flush made no progress after {iterations} iterations")]
    FlushStalled {
        /// The iteration ceiling that was exceeded.
        iterations: usize,
    },

    // ============================================================================
    // TLS Errors
    // ============================================================================
    /// The TLS session could not be created or configured.
    ///
    /// The connection is left exactly as it was before `start_tls()`.
    #[error("TLS setup failed: {0}")]
    TlsSetupFailed(String),

    /// The TLS handshake failed. The connection is broken and must be reset.
    #[error("TLS handshake failed")]
    TlsHandshake,

    /// Failed to load a certificate file from disk.
    #[error("Failed to load certificate from {path}: {source}")]
    TlsCertificateLoad {
        path: String,
        source: std::io::Error,
    },

    /// Certificate file format is invalid or unsupported.
    #[error("Invalid certificate format: {0}")]
    TlsInvalidCertificate(String),

    // ============================================================================
    // Configuration Errors
    // ============================================================================
    /// Configuration key lookup failed or had the wrong type.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

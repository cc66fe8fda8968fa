//! kiteconn - non-blocking, buffered, optionally TLS-wrapped connections
//!
//! kiteconn provides the connection object at the core of a tunneling proxy.
//! A [`Connection`] owns one TCP socket and offers the surrounding event loop
//! non-blocking read/write primitives with internal buffering, a client-side
//! TLS handshake state machine, flow-control counters and bandwidth reports
//! written to a companion connection.
//!
//! Transient conditions never surface as errors. They show up as [`Status`]
//! flags (`WANT_READ`, `WANT_WRITE`) or [`ReadOutcome`]s, and the event loop
//! polls the socket accordingly before calling in again.

// Internal-only modules
pub(crate) mod connection;
pub(crate) mod error;

pub mod config;
pub mod socket;
#[cfg(feature = "tls")]
pub mod tls;

// These are the intended public API
pub use config::ConnectionConfig;
pub use connection::{
    format_progress, Connection, FlushMode, ListenPort, ReadOutcome, Status, TransportState,
};
pub use error::Error;
pub use socket::{classify, ErrorClass, Socket};

// TLS support (optional feature, enabled by default)
#[cfg(feature = "tls")]
pub use tls::{RustlsContext, SessionOptions, TlsContext, TlsError, TlsSession};

/// Convenient re-exports of commonly used types.
pub mod prelude {
    pub use crate::config::ConnectionConfig;
    pub use crate::connection::{Connection, FlushMode, ListenPort, ReadOutcome, Status};
    pub use crate::error::Error;

    // TLS support (optional feature, enabled by default)
    #[cfg(feature = "tls")]
    pub use crate::tls::{RustlsContext, TlsContext};
}

bitflags::bitflags! {
    /// Independent conditions of a connection.
    ///
    /// Any combination is valid. `WANT_READ` and `WANT_WRITE` are hints for
    /// the event loop; `BROKEN` and `CLOSED_WRITE` are terminal until the
    /// next reset.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Status: u32 {
        /// A multi-step reset/reconfigure is in progress.
        const CHANGING = 1 << 0;
        /// The connection owns a socket.
        const ALLOCATED = 1 << 1;
        /// The socket is a listener.
        const LISTENING = 1 << 2;
        /// Retry once the socket is readable.
        const WANT_READ = 1 << 3;
        /// Retry once the socket is writable.
        const WANT_WRITE = 1 << 4;
        /// The transport is unusable.
        const BROKEN = 1 << 5;
        /// The peer sent end-of-stream.
        const CLOSED_READ = 1 << 6;
        /// Writing failed for good; tear the socket down.
        const CLOSED_WRITE = 1 << 7;
    }
}

/// Which layer carries application data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportState {
    /// Bytes go straight to the socket.
    PlainData,
    /// A TLS session exists but the handshake is not finished.
    TlsHandshake,
    /// Bytes go through the TLS session.
    TlsData,
}

//! TLS handshake driver.
//!
//! `PlainData --start_tls--> TlsHandshake --success--> TlsData`. A failed
//! step marks the connection `BROKEN`, which is terminal until reset.

use super::{Connection, Status, Transport};
use crate::error::Error;
use crate::tls::{SessionOptions, TlsContext, TlsError};

use std::io;
use tracing::{debug, error, info, instrument};

impl Connection {
    /// Wraps the socket in a client TLS session and starts the handshake.
    ///
    /// SNI follows the pinned certificate names: exactly one pinned name
    /// replaces `hostname`, several pinned names disable SNI.
    ///
    /// Returns `Ok(())` when the handshake completed or is waiting for the
    /// socket (`WANT_READ`/`WANT_WRITE`), [`Error::TlsSetupFailed`] when the
    /// session could not be created (the connection is left untouched), and
    /// [`Error::TlsHandshake`] when the first handshake step failed.
    #[instrument(skip(self, context))]
    pub fn start_tls(
        &mut self,
        context: &dyn TlsContext,
        hostname: Option<&str>,
    ) -> Result<(), Error> {
        let sockfd = self.sockfd();
        let Some(socket) = self.socket.as_deref() else {
            error!(sockfd, "Cannot start TLS without a socket");
            return Err(Error::TlsSetupFailed("connection has no socket".to_string()));
        };
        if !matches!(self.transport, Transport::Plain) {
            return Err(Error::TlsSetupFailed("TLS already started".to_string()));
        }

        let sni = resolve_sni(&self.config.tls_cert_names, hostname);
        let peer_ip = socket.peer_addr().ok().map(|addr| addr.ip().to_string());
        let Some(verify_name) = sni.or(hostname).or(peer_ip.as_deref()) else {
            error!(sockfd, "No name to verify the peer certificate against");
            return Err(Error::TlsSetupFailed("no server name".to_string()));
        };

        let options = SessionOptions {
            sni,
            verify_name,
            ciphers: &self.config.tls_ciphers,
            buffer_limit: self.config.tls_buffer_limit,
            socket_id: sockfd,
        };
        let session = context.new_session(&options).map_err(|err| {
            error!(sockfd, ?sni, %err, "Failed to prepare TLS session");
            err
        })?;

        debug!(sockfd, sni = sni.unwrap_or("default"), "Starting TLS connection");
        self.transport = Transport::Handshake(session);
        self.status.insert(Status::WANT_WRITE);
        match self.drive_handshake() {
            Ok(()) => Ok(()),
            Err(_) => Err(Error::TlsHandshake),
        }
    }

    /// Drives one handshake step, for the event loop to call once the socket
    /// is ready again. Does nothing outside the handshake state.
    pub fn continue_handshake(&mut self) -> Result<(), Error> {
        if self.status.contains(Status::BROKEN) {
            return Err(Error::TlsHandshake);
        }
        self.drive_handshake().map_err(|_| Error::TlsHandshake)
    }

    /// One handshake step.
    ///
    /// Want-read/want-write set the matching flag and leave the state alone.
    /// Any other failure marks the connection broken and surfaces as a
    /// connection reset.
    pub(crate) fn drive_handshake(&mut self) -> io::Result<()> {
        let sockfd = self.sockfd();
        let (Transport::Handshake(session), Some(socket)) =
            (&mut self.transport, self.socket.as_deref_mut())
        else {
            return Ok(());
        };

        session.clear_errors();
        match session.handshake(socket) {
            Ok(()) => {
                info!(
                    sockfd,
                    version = session.protocol_version().as_deref().unwrap_or("unknown"),
                    cipher = session.cipher_suite().as_deref().unwrap_or("unknown"),
                    "TLS connection established"
                );
                self.status.remove(Status::WANT_READ | Status::WANT_WRITE);
                if let Transport::Handshake(session) =
                    std::mem::replace(&mut self.transport, Transport::Plain)
                {
                    self.transport = Transport::Data(session);
                }
                Ok(())
            }
            Err(TlsError::WantRead) => {
                debug!(sockfd, "TLS handshake wants read");
                self.status.insert(Status::WANT_READ);
                Ok(())
            }
            Err(TlsError::WantWrite) => {
                debug!(sockfd, "TLS handshake wants write");
                self.status.insert(Status::WANT_WRITE);
                Ok(())
            }
            Err(err) => {
                info!(sockfd, tls_error = err.name(), %err, "TLS handshake failed");
                self.status.insert(Status::BROKEN);
                Err(io::Error::from(io::ErrorKind::ConnectionReset))
            }
        }
    }

    // Falls back from TlsData to handshaking, e.g. when a read turned out to
    // need a write first.
    pub(crate) fn restart_handshake(&mut self, err: &TlsError) {
        debug!(sockfd = self.sockfd(), tls_error = err.name(), "Restarting TLS handshake");
        if let Transport::Data(session) = std::mem::replace(&mut self.transport, Transport::Plain) {
            self.transport = Transport::Handshake(session);
        }
        match err {
            TlsError::WantRead => self.status.insert(Status::WANT_READ),
            TlsError::WantWrite => self.status.insert(Status::WANT_WRITE),
            _ => {}
        }
    }
}

/// Picks the SNI name: the single pinned name if there is exactly one, none
/// if several are pinned, the caller's hint otherwise.
pub(crate) fn resolve_sni<'a>(
    pinned: &'a [String],
    hostname: Option<&'a str>,
) -> Option<&'a str> {
    match pinned {
        [] => hostname,
        [only] => Some(only.as_str()),
        _ => None,
    }
}

use super::{Connection, Status, Transport};
use crate::socket::classify;
#[cfg(feature = "tls")]
use crate::tls::TlsError;

use std::io;
use std::time::Instant;
use tracing::{debug, trace};

/// What a call to [`Connection::read`] achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// This many bytes were appended to the input buffer.
    Data(usize),
    /// The peer closed its side. `CLOSED_READ` is set.
    Closed,
    /// Nothing to read right now. Retry once the socket is readable.
    Retry,
    /// A handshake step ran instead of a read. Check `WANT_READ`/`WANT_WRITE`.
    Handshake,
    /// The input buffer has no room. Consume some input first.
    Full,
    /// The transport failed for good. `BROKEN` is set.
    Broken,
}

// Raw result of one transport read, before classification
enum Attempt {
    Read(usize),
    Failed(io::Error),
    #[cfg(feature = "tls")]
    TlsFailed(TlsError),
}

impl Connection {
    /// Reads whatever the transport has into the input buffer.
    ///
    /// While the TLS handshake is in progress this drives one handshake step
    /// instead and reports [`ReadOutcome::Handshake`].
    pub fn read(&mut self) -> ReadOutcome {
        let sockfd = self.sockfd();
        if self.input.free() == 0 {
            debug!(sockfd, "Input buffer full");
            return ReadOutcome::Full;
        }

        #[cfg(feature = "tls")]
        if matches!(self.transport, Transport::Handshake(_)) {
            if self.status.contains(Status::BROKEN) {
                return ReadOutcome::Broken;
            }
            // A failed step is recorded as BROKEN by the driver
            let _ = self.drive_handshake();
            return ReadOutcome::Handshake;
        }

        let attempt = match (&mut self.transport, self.socket.as_deref_mut()) {
            (_, None) => Attempt::Failed(io::Error::from(io::ErrorKind::NotConnected)),
            #[cfg(feature = "tls")]
            (Transport::Data(session), Some(socket)) => {
                session.clear_errors();
                match session.read(socket, self.input.spare_mut()) {
                    Ok(count) => Attempt::Read(count),
                    Err(err) => Attempt::TlsFailed(err),
                }
            }
            // Handled above
            #[cfg(feature = "tls")]
            (Transport::Handshake(_), Some(_)) => return ReadOutcome::Handshake,
            (Transport::Plain, Some(socket)) => match socket.read(self.input.spare_mut()) {
                Ok(count) => Attempt::Read(count),
                Err(err) => Attempt::Failed(err),
            },
        };

        match attempt {
            Attempt::Read(0) => {
                debug!(sockfd, "read() hit EOF");
                self.status.insert(Status::CLOSED_READ);
                ReadOutcome::Closed
            }
            Attempt::Read(count) => {
                self.received(count);
                ReadOutcome::Data(count)
            }
            Attempt::Failed(err) => self.read_failed(&err, "none"),
            #[cfg(feature = "tls")]
            Attempt::TlsFailed(err) => match err {
                TlsError::WantWrite => {
                    self.restart_handshake(&err);
                    ReadOutcome::Handshake
                }
                TlsError::WantRead => {
                    let would_block = io::Error::from(io::ErrorKind::WouldBlock);
                    self.read_failed(&would_block, err.name())
                }
                TlsError::Syscall(ref platform) => self.read_failed(platform, err.name()),
                TlsError::Protocol(_) => {
                    debug!(sockfd, tls_error = err.name(), %err, "read() broken");
                    self.status.insert(Status::BROKEN);
                    ReadOutcome::Broken
                }
            },
        }
    }

    /// Decrypted bytes the TLS session holds beyond the input buffer.
    ///
    /// Always 0 for plaintext connections.
    pub fn pending(&self) -> usize {
        match &self.transport {
            #[cfg(feature = "tls")]
            Transport::Data(session) | Transport::Handshake(session) => session.pending(),
            _ => 0,
        }
    }

    fn received(&mut self, count: usize) {
        self.input.advance(count);
        let filled = self.input.filled();
        trace!(
            sockfd = self.sockfd(),
            len = count,
            data = %filled[filled.len() - count..].escape_ascii(),
            "R"
        );
        self.activity = Instant::now();
        self.status.remove(Status::WANT_READ);

        self.read_bytes += count as u64;
        self.read_kb += self.read_bytes / 1024;
        self.read_bytes %= 1024;
    }

    fn read_failed(&mut self, err: &io::Error, tls_error: &str) -> ReadOutcome {
        let sockfd = self.sockfd();
        if classify(err).is_retryable() {
            debug!(sockfd, ?err, tls_error, "read() should retry");
            ReadOutcome::Retry
        } else {
            debug!(sockfd, ?err, tls_error, "read() broken");
            self.status.insert(Status::BROKEN);
            ReadOutcome::Broken
        }
    }
}

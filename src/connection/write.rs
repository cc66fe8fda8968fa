use super::{Connection, Status, Transport};
use crate::error::Error;
use crate::socket::{classify, ErrorClass};
#[cfg(feature = "tls")]
use crate::tls::TlsError;

use std::io::{self, ErrorKind};
use tracing::{debug, error, instrument, trace};
#[cfg(feature = "tls")]
use tracing::warn;

/// How hard [`Connection::flush`] tries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushMode {
    /// One write attempt, no waiting.
    NonBlocking,
    /// Switch the socket to blocking mode and keep writing until the buffer
    /// is drained, an error occurs or the iteration ceiling is hit.
    Blocking,
}

impl Connection {
    /// Hands `data` straight to the transport, returning how much it took.
    ///
    /// No buffering. Over TLS a throttled write is remembered and the next
    /// call retries with the same length. During the handshake this drives a
    /// handshake step and writes nothing.
    pub(crate) fn raw_write(&mut self, data: &[u8]) -> io::Result<usize> {
        let sockfd = self.sockfd();

        #[cfg(feature = "tls")]
        if matches!(self.transport, Transport::Handshake(_)) {
            if self.status.contains(Status::BROKEN) {
                return Err(io::Error::from(ErrorKind::ConnectionReset));
            }
            self.drive_handshake()?;
            return Ok(0);
        }

        let written = match (&mut self.transport, self.socket.as_deref_mut()) {
            (_, None) => return Err(io::Error::from(ErrorKind::NotConnected)),
            #[cfg(feature = "tls")]
            (Transport::Data(session), Some(socket)) => {
                let mut len = data.len();
                if self.want_write_len > 0 && len > 0 {
                    if self.want_write_len > len {
                        warn!(
                            sockfd,
                            want_write = self.want_write_len,
                            len,
                            "Retrying throttled TLS write with less data"
                        );
                    } else {
                        len = self.want_write_len;
                    }
                    self.want_write_len = 0;
                }

                session.clear_errors();
                match session.write(socket, &data[..len]) {
                    Ok(count) => {
                        // Taken by the session, but maybe not on the wire yet
                        self.status.set(Status::WANT_WRITE, session.wants_write());
                        count
                    }
                    Err(TlsError::WantWrite) => {
                        trace!(sockfd, len, "TLS write throttled");
                        self.status.insert(Status::WANT_WRITE);
                        if len > 0 {
                            self.want_write_len = len;
                        }
                        return Err(io::Error::from(ErrorKind::WouldBlock));
                    }
                    Err(TlsError::WantRead) => {
                        self.status.insert(Status::WANT_READ);
                        return Err(io::Error::from(ErrorKind::WouldBlock));
                    }
                    Err(TlsError::Syscall(err)) => {
                        debug!(sockfd, len, ?err, "TLS write failed");
                        return Err(err);
                    }
                    Err(TlsError::Protocol(err)) => {
                        debug!(sockfd, len, %err, "TLS write failed");
                        self.status.insert(Status::BROKEN);
                        return Err(io::Error::new(ErrorKind::InvalidData, err));
                    }
                }
            }
            #[cfg(feature = "tls")]
            (Transport::Handshake(_), Some(_)) => return Ok(0),
            (Transport::Plain, Some(socket)) => {
                if data.is_empty() {
                    return Ok(0);
                }
                let count = socket.write(data)?;
                if count > 0 {
                    self.status.remove(Status::WANT_WRITE);
                }
                count
            }
        };

        if written > 0 {
            trace!(sockfd, len = written, data = %data[..written].escape_ascii(), "W");
            self.wrote_bytes += written as u64;
        }
        Ok(written)
    }

    /// Drains the output buffer, then (blocking mode only) writes `data`.
    ///
    /// TLS records the session accepted but could not send yet are pushed
    /// out too, even when the output buffer is empty. Returns the number of
    /// bytes written from the buffer, or from `data` alone when that was
    /// written too. A non-blocking flush that would block
    /// returns what it managed so far. Fatal write errors set `CLOSED_WRITE`.
    ///
    /// A blocking flush puts the socket back into non-blocking mode before
    /// returning, whatever the outcome. If it cannot finish within the
    /// configured number of iterations the connection is marked `BROKEN`
    /// and `CLOSED_WRITE` and [`Error::FlushStalled`] is returned.
    #[instrument(level = "debug", skip(self, data))]
    pub fn flush(&mut self, data: Option<&[u8]>, mode: FlushMode) -> Result<usize, Error> {
        let sockfd = self.sockfd();
        if self.socket.is_none() {
            error!(sockfd, "Bogus flush?");
            return Err(Error::NotAllocated);
        }

        if mode == FlushMode::NonBlocking {
            return self.drain_output(false);
        }

        debug!(sockfd, "Attempting blocking flush");
        self.set_blocking(true);
        let result = match (self.drain_output(true), data) {
            (Ok(_), Some(data)) if self.output.is_empty() => self.write_all_blocking(data),
            (result, _) => result,
        };
        self.set_blocking(false);
        debug!(sockfd, ok = result.is_ok(), "Blocking flush complete");
        result
    }

    /// Queues `data` for sending, writing directly when nothing is queued.
    ///
    /// Always accepts all of `data` unless the connection breaks. When the
    /// remainder does not fit in the output buffer a blocking flush makes
    /// room first.
    pub fn write(&mut self, data: &[u8]) -> Result<usize, Error> {
        let sockfd = self.sockfd();
        if self.socket.is_none() {
            error!(sockfd, "Write on unallocated connection");
            return Err(Error::NotAllocated);
        }

        if !self.output.is_empty() {
            // Errors are picked up by the blocking flush below if it matters
            let _ = self.flush(None, FlushMode::NonBlocking);
        }

        let mut wrote = 0;
        if self.output.is_empty() {
            let mut attempts = 0;
            wrote = loop {
                match self.raw_write(data) {
                    Ok(count) => break count,
                    Err(err) if classify(&err) == ErrorClass::Retryable => {
                        attempts += 1;
                        if attempts >= self.config.flush_max_iterations {
                            break 0;
                        }
                    }
                    Err(err) => {
                        trace!(sockfd, ?err, "Direct write failed, buffering");
                        break 0;
                    }
                }
            };
        }

        let rest = &data[wrote..];
        if rest.is_empty() || self.output.append(rest) {
            return Ok(data.len());
        }

        debug!(
            sockfd,
            queued = self.output.len(),
            len = rest.len(),
            "Output buffer full, flushing"
        );
        self.flush(Some(rest), FlushMode::Blocking)?;
        Ok(data.len())
    }

    // Writes as much of the output buffer as the transport takes. In
    // blocking mode this keeps going until the buffer is empty.
    fn drain_output(&mut self, blocking: bool) -> Result<usize, Error> {
        let ceiling = self.config.flush_max_iterations;
        let mut output = std::mem::take(&mut self.output);
        let mut flushed = 0;
        let mut iterations = 0;

        let result = loop {
            if output.is_empty() && !self.records_queued() {
                break Ok(flushed);
            }
            if iterations >= ceiling {
                break Err(self.stalled(ceiling));
            }
            iterations += 1;

            match self.raw_write(output.filled()) {
                Ok(count) => {
                    output.consume(count);
                    flushed += count;
                }
                Err(err) if blocking && classify(&err) == ErrorClass::Retryable => {}
                Err(err) => break self.write_failed(err, flushed, blocking),
            }
            if !blocking {
                break Ok(flushed);
            }
        };

        self.output = output;
        result
    }

    // Writes all of `data` on a blocking socket, then whatever records the
    // TLS session still holds.
    fn write_all_blocking(&mut self, data: &[u8]) -> Result<usize, Error> {
        let ceiling = self.config.flush_max_iterations;
        let mut wrote = 0;
        let mut idle = 0;

        while wrote < data.len() || self.records_queued() {
            match self.raw_write(&data[wrote..]) {
                Ok(count) if count > 0 => wrote += count,
                Ok(_) => idle += 1,
                Err(err) if classify(&err) == ErrorClass::Retryable => idle += 1,
                Err(err) => return self.write_failed(err, wrote, true),
            }
            if idle >= ceiling {
                return Err(self.stalled(ceiling));
            }
        }
        Ok(wrote)
    }

    // Encrypted records accepted earlier but not yet taken by the socket
    fn records_queued(&self) -> bool {
        match &self.transport {
            #[cfg(feature = "tls")]
            Transport::Data(session) => session.wants_write(),
            _ => false,
        }
    }

    fn write_failed(
        &mut self,
        err: io::Error,
        written: usize,
        blocking: bool,
    ) -> Result<usize, Error> {
        let class = classify(&err);
        if class.is_retryable() && !blocking {
            return Ok(written);
        }
        if !class.is_retryable() {
            debug!(sockfd = self.sockfd(), ?err, "Write failed, closing");
            self.status.insert(Status::CLOSED_WRITE);
        }
        Err(Error::Io(err))
    }

    fn stalled(&mut self, iterations: usize) -> Error {
        error!(
            sockfd = self.sockfd(),
            iterations,
            "BUG! Flush failed after {iterations} iterations"
        );
        self.status.insert(Status::BROKEN | Status::CLOSED_WRITE);
        Error::FlushStalled { iterations }
    }

    fn set_blocking(&mut self, blocking: bool) {
        let sockfd = self.sockfd();
        if let Some(socket) = self.socket.as_deref_mut() {
            if let Err(err) = socket.set_nonblocking(!blocking) {
                error!(sockfd, blocking, ?err, "Failed to switch socket mode");
            }
        }
    }
}

//! rustls-backed sessions.
//!
//! rustls never touches the socket on its own, so each call below pumps
//! records between the socket and the `ClientConnection` until it either has
//! an answer or the socket would block. A blocked socket turns into
//! [`TlsError::WantRead`] or [`TlsError::WantWrite`].

use super::tls_config::load_root_store;
use super::{SessionOptions, TlsContext, TlsError, TlsSession};
use crate::config::get_namespaced_string;
use crate::error::Error;
use crate::socket::Socket;
use ::config::Config;

use rustls::pki_types::ServerName;
use rustls::{ClientConfig, ClientConnection, RootCertStore, SupportedCipherSuite};
use std::io::{self, ErrorKind, Read, Write};
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Creates client sessions that verify peers against a fixed root store.
#[derive(Debug, Clone)]
pub struct RustlsContext {
    roots: Arc<RootCertStore>,
}

impl RustlsContext {
    pub fn new(roots: RootCertStore) -> Self {
        Self {
            roots: Arc::new(roots),
        }
    }

    /// Trusts the PEM certificates found in `ca_cert_path`.
    pub fn from_ca_file(ca_cert_path: &str) -> Result<Self, Error> {
        Ok(Self::new(load_root_store(ca_cert_path)?))
    }

    /// Loads the root store named by the `tls_ca_cert` key.
    pub fn from_config(config: &Config, name: &str) -> Result<Self, Error> {
        let ca_cert_path = get_namespaced_string(config, name, "tls_ca_cert")?;
        Self::from_ca_file(&ca_cert_path)
    }

    fn client_config(&self, options: &SessionOptions<'_>) -> Result<ClientConfig, Error> {
        let mut provider = rustls::crypto::ring::default_provider();
        if !options.ciphers.is_empty() {
            let preferred: Vec<SupportedCipherSuite> = options
                .ciphers
                .iter()
                .filter_map(|name| {
                    provider
                        .cipher_suites
                        .iter()
                        .find(|suite| suite_name(suite) == *name)
                        .copied()
                })
                .collect();
            if preferred.is_empty() {
                return Err(Error::TlsSetupFailed(format!(
                    "none of the configured cipher suites are supported: {}",
                    options.ciphers.join(", ")
                )));
            }
            provider.cipher_suites = preferred;
        }

        let mut config = ClientConfig::builder_with_provider(Arc::new(provider))
            .with_safe_default_protocol_versions()
            .map_err(|e| Error::TlsSetupFailed(e.to_string()))?
            .with_root_certificates(self.roots.clone())
            .with_no_client_auth();
        config.enable_sni = options.sni.is_some();
        Ok(config)
    }
}

impl TlsContext for RustlsContext {
    fn new_session(&self, options: &SessionOptions<'_>) -> Result<Box<dyn TlsSession>, Error> {
        let config = self.client_config(options)?;

        let name = options.sni.unwrap_or(options.verify_name);
        let server_name = ServerName::try_from(name.to_string())
            .map_err(|_| Error::TlsSetupFailed(format!("invalid server name '{name}'")))?;
        let mut conn = ClientConnection::new(Arc::new(config), server_name)
            .map_err(|e| Error::TlsSetupFailed(e.to_string()))?;
        conn.set_buffer_limit(options.buffer_limit);

        Ok(Box::new(RustlsSession {
            conn,
            socket_id: options.socket_id,
            plaintext: 0,
            last_error: None,
        }))
    }
}

fn suite_name(suite: &SupportedCipherSuite) -> String {
    format!("{:?}", suite.suite())
}

// Lets rustls read and write records through a borrowed socket.
struct SocketIo<'a>(&'a mut dyn Socket);

impl Read for SocketIo<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for SocketIo<'_> {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        self.0.write(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// A client session driven over a non-blocking socket.
pub struct RustlsSession {
    conn: ClientConnection,
    socket_id: i64,
    plaintext: usize,
    last_error: Option<String>,
}

impl RustlsSession {
    // Pushes queued records to the socket.
    fn send_records(&mut self, socket: &mut dyn Socket) -> Result<(), TlsError> {
        while self.conn.wants_write() {
            match self.conn.write_tls(&mut SocketIo(&mut *socket)) {
                Ok(0) => {
                    return Err(TlsError::Syscall(io::Error::from(ErrorKind::WriteZero)));
                }
                Ok(len) => {
                    trace!(sockfd = self.socket_id, len, "Wrote TLS records");
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    return Err(TlsError::WantWrite);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TlsError::Syscall(err)),
            }
        }
        Ok(())
    }

    // Pulls records from the socket and decrypts them. Returns the number of
    // bytes taken from the socket, 0 at end of stream.
    fn receive_records(&mut self, socket: &mut dyn Socket) -> Result<usize, TlsError> {
        loop {
            match self.conn.read_tls(&mut SocketIo(&mut *socket)) {
                Ok(0) => return Ok(0),
                Ok(len) => {
                    trace!(sockfd = self.socket_id, len, "Read TLS records");
                    match self.conn.process_new_packets() {
                        Ok(state) => {
                            self.plaintext = state.plaintext_bytes_to_read();
                            return Ok(len);
                        }
                        Err(err) => {
                            // Get the alert out if the socket lets us
                            let _ = self.send_records(socket);
                            return Err(TlsError::Protocol(err));
                        }
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => {
                    return Err(TlsError::WantRead);
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TlsError::Syscall(err)),
            }
        }
    }

    fn drive_handshake(&mut self, socket: &mut dyn Socket) -> Result<(), TlsError> {
        loop {
            self.send_records(socket)?;
            if !self.conn.is_handshaking() {
                return Ok(());
            }
            if self.receive_records(socket)? == 0 {
                return Err(TlsError::Syscall(io::Error::new(
                    ErrorKind::UnexpectedEof,
                    "peer closed during TLS handshake",
                )));
            }
        }
    }

    fn read_plaintext(
        &mut self,
        socket: &mut dyn Socket,
        buf: &mut [u8],
    ) -> Result<usize, TlsError> {
        let mut eof = false;
        loop {
            match self.conn.reader().read(buf) {
                Ok(len) => {
                    self.plaintext = self.plaintext.saturating_sub(len);
                    return Ok(len);
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock && eof => return Ok(0),
                Err(err) if err.kind() == ErrorKind::WouldBlock => {}
                // Transport closed without close_notify
                Err(err) if err.kind() == ErrorKind::UnexpectedEof => return Ok(0),
                Err(err) => return Err(TlsError::Syscall(err)),
            }
            eof = self.receive_records(socket)? == 0;
        }
    }

    // Data taken by rustls counts as written even if its records are still
    // queued afterwards. `wants_write` reports those until they are sent.
    fn write_plaintext(
        &mut self,
        socket: &mut dyn Socket,
        data: &[u8],
    ) -> Result<usize, TlsError> {
        self.send_records(socket)?;
        if data.is_empty() {
            return Ok(0);
        }

        let len = self.conn.writer().write(data).map_err(TlsError::Syscall)?;
        match self.send_records(socket) {
            Ok(()) => {}
            Err(TlsError::WantWrite) => {
                trace!(sockfd = self.socket_id, len, "TLS records left queued");
            }
            Err(err) => return Err(err),
        }
        if len == 0 {
            // Buffer limit reached
            return Err(TlsError::WantWrite);
        }
        Ok(len)
    }

    fn note<T>(&mut self, result: Result<T, TlsError>) -> Result<T, TlsError> {
        if let Err(err) = &result {
            if matches!(err, TlsError::Syscall(_) | TlsError::Protocol(_)) {
                warn!(sockfd = self.socket_id, error = %err, "TLS session error");
                self.last_error = Some(err.to_string());
            }
        }
        result
    }
}

impl TlsSession for RustlsSession {
    fn handshake(&mut self, socket: &mut dyn Socket) -> Result<(), TlsError> {
        let result = self.drive_handshake(socket);
        self.note(result)
    }

    fn read(&mut self, socket: &mut dyn Socket, buf: &mut [u8]) -> Result<usize, TlsError> {
        let result = self.read_plaintext(socket, buf);
        self.note(result)
    }

    fn write(&mut self, socket: &mut dyn Socket, data: &[u8]) -> Result<usize, TlsError> {
        let result = self.write_plaintext(socket, data);
        self.note(result)
    }

    fn pending(&self) -> usize {
        self.plaintext
    }

    fn wants_write(&self) -> bool {
        self.conn.wants_write()
    }

    fn clear_errors(&mut self) {
        if let Some(err) = self.last_error.take() {
            debug!(sockfd = self.socket_id, error = %err, "Cleared stale TLS error");
        }
    }

    fn protocol_version(&self) -> Option<String> {
        self.conn.protocol_version().map(|version| format!("{version:?}"))
    }

    fn cipher_suite(&self) -> Option<String> {
        self.conn.negotiated_cipher_suite().map(|suite| suite_name(&suite))
    }
}

//! Shared helpers for the integration tests: a scripted in-memory socket and
//! tracing setup.
//!
//! Use the TEST_LOG environment variable to control tracing verbosity:
//!
//! ```bash
//! TEST_LOG=1 cargo test -- --nocapture   # info
//! TEST_LOG=2 cargo test -- --nocapture   # debug
//! TEST_LOG=3 cargo test -- --nocapture   # trace, including raw data
//! ```

#![allow(dead_code)]

use kiteconn::{Connection, ConnectionConfig, Socket, Status};
use mio::Interest;
use std::collections::VecDeque;
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard, Once};
use std::time::Duration;

static INIT: Once = Once::new();

// ============================================================================
// Tracing Initialization
// ============================================================================

/// Initialize tracing based on TEST_LOG environment variable
pub fn init_tracing() {
    INIT.call_once(|| {
        if let Ok(level_str) = std::env::var("TEST_LOG") {
            let verbosity = level_str.parse::<u8>().unwrap_or(0);

            if verbosity > 0 {
                let level = match verbosity {
                    1 => "info",
                    2 => "debug",
                    _ => "trace",
                };

                let filter = format!("kiteconn={}", level);
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                    .with_target(true)
                    .with_test_writer()
                    .try_init();
            }
        }
    });
}

// ============================================================================
// Scripted Socket
// ============================================================================

/// How the mock socket answers writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Take everything.
    Accept,
    /// Take at most this many bytes per call.
    AcceptUpTo(usize),
    /// Fail every call with this error kind.
    Fail(ErrorKind),
    /// Would block while non-blocking, take everything once blocking.
    BlockedUntilBlocking,
}

/// State shared between a [`MockSocket`] and the test driving it.
#[derive(Debug)]
pub struct Script {
    /// Chunks (or errors) returned by successive reads.
    pub inbound: VecDeque<Result<Vec<u8>, ErrorKind>>,
    /// Whether an empty inbound queue means end-of-stream.
    pub eof: bool,
    pub write_mode: WriteMode,
    /// Everything accepted by writes, in order.
    pub written: Vec<u8>,
    pub write_attempts: usize,
    pub nonblocking: bool,
    /// Every call to `set_nonblocking`, in order.
    pub mode_changes: Vec<bool>,
    pub ready: bool,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            inbound: VecDeque::new(),
            eof: false,
            write_mode: WriteMode::Accept,
            written: Vec::new(),
            write_attempts: 0,
            nonblocking: true,
            mode_changes: Vec::new(),
            ready: true,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ScriptHandle(Arc<Mutex<Script>>);

impl ScriptHandle {
    pub fn lock(&self) -> MutexGuard<'_, Script> {
        self.0.lock().unwrap()
    }

    pub fn push_inbound(&self, data: &[u8]) {
        self.lock().inbound.push_back(Ok(data.to_vec()));
    }

    pub fn push_error(&self, kind: ErrorKind) {
        self.lock().inbound.push_back(Err(kind));
    }

    pub fn set_write_mode(&self, mode: WriteMode) {
        self.lock().write_mode = mode;
    }

    pub fn written(&self) -> Vec<u8> {
        self.lock().written.clone()
    }

    pub fn write_attempts(&self) -> usize {
        self.lock().write_attempts
    }
}

pub struct MockSocket {
    script: ScriptHandle,
}

impl MockSocket {
    pub fn new() -> (Self, ScriptHandle) {
        let script = ScriptHandle::default();
        (
            Self {
                script: script.clone(),
            },
            script,
        )
    }
}

impl Socket for MockSocket {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut script = self.script.lock();
        match script.inbound.pop_front() {
            Some(Ok(mut chunk)) => {
                let len = chunk.len().min(buf.len());
                buf[..len].copy_from_slice(&chunk[..len]);
                if len < chunk.len() {
                    script.inbound.push_front(Ok(chunk.split_off(len)));
                }
                Ok(len)
            }
            Some(Err(kind)) => Err(io::Error::from(kind)),
            None if script.eof => Ok(0),
            None => Err(io::Error::from(ErrorKind::WouldBlock)),
        }
    }

    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut script = self.script.lock();
        script.write_attempts += 1;
        let len = match script.write_mode {
            WriteMode::Accept => data.len(),
            WriteMode::AcceptUpTo(max) => data.len().min(max),
            WriteMode::Fail(kind) => return Err(io::Error::from(kind)),
            WriteMode::BlockedUntilBlocking if script.nonblocking => {
                return Err(io::Error::from(ErrorKind::WouldBlock));
            }
            WriteMode::BlockedUntilBlocking => data.len(),
        };
        script.written.extend_from_slice(&data[..len]);
        Ok(len)
    }

    fn set_nonblocking(&mut self, nonblocking: bool) -> io::Result<()> {
        let mut script = self.script.lock();
        script.nonblocking = nonblocking;
        script.mode_changes.push(nonblocking);
        Ok(())
    }

    fn wait(&mut self, _interest: Interest, _timeout: Duration) -> io::Result<bool> {
        Ok(self.script.lock().ready)
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 40000)))
    }

    fn peer_addr(&self) -> io::Result<SocketAddr> {
        Ok(SocketAddr::from(([127, 0, 0, 1], 4443)))
    }

    fn raw_id(&self) -> i64 {
        42
    }
}

/// A connection that owns a fresh mock socket.
pub fn mock_connection(config: ConnectionConfig) -> (Connection, ScriptHandle) {
    let (socket, script) = MockSocket::new();
    let mut conn = Connection::new(config);
    conn.adopt(Box::new(socket), Status::empty());
    (conn, script)
}

//! Connection configuration.
//!
//! Everything a [`Connection`](crate::Connection) needs from its
//! surroundings (socket timeout, TLS cipher preferences, pinned certificate
//! names, buffer sizes and flow-control constants) is carried by
//! [`ConnectionConfig`]. It is a plain value injected at construction time
//! and usually shared between many connections through an `Arc`.

use ::config::Config;
use std::time::Duration;

/// Default send/receive timeout applied to new sockets.
pub const DEFAULT_SOCKET_TIMEOUT: Duration = Duration::from_secs(30);
/// Default capacity of the input and output buffers.
pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;
/// Default initial send window, restored on every reset.
pub const DEFAULT_WINDOW_KB: u64 = 256;
/// Default bandwidth reporting increment.
pub const DEFAULT_REPORT_INCREMENT_KB: u64 = 16;
/// Default iteration ceiling of a blocking flush.
pub const DEFAULT_FLUSH_MAX_ITERATIONS: usize = 1000;

/// Settings shared by connections.
///
/// # Configuration Keys
///
/// | key | meaning |
/// |---|---|
/// | `socket_timeout_secs` | send/receive timeout of new sockets |
/// | `tls_ciphers` | array of cipher suite names, in preference order |
/// | `tls_cert_names` | array of pinned certificate names |
/// | `in_buffer_size` | input buffer capacity in bytes |
/// | `out_buffer_size` | output buffer capacity in bytes |
/// | `initial_window_kb` | send window restored on reset |
/// | `report_increment_kb` | bytes (in KB) between bandwidth reports |
/// | `flush_max_iterations` | iteration ceiling of a blocking flush |
/// | `tls_buffer_limit` | plaintext bytes a TLS session may queue, 0 for unlimited |
///
/// # Example
///
/// ```toml
/// socket_timeout_secs = 10
/// tls_cert_names = ["frontend.example.com"]
///
/// [tunnel]
/// out_buffer_size = 16384
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    pub socket_timeout: Duration,
    /// Cipher suite names (e.g. `TLS13_AES_256_GCM_SHA384`). Empty keeps the
    /// provider defaults.
    pub tls_ciphers: Vec<String>,
    /// Certificate names we insist on. One name replaces the caller's SNI
    /// hint, more than one disables SNI.
    pub tls_cert_names: Vec<String>,
    pub in_buffer_size: usize,
    pub out_buffer_size: usize,
    pub initial_window_kb: u64,
    pub report_increment_kb: u64,
    pub flush_max_iterations: usize,
    pub tls_buffer_limit: Option<usize>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            socket_timeout: DEFAULT_SOCKET_TIMEOUT,
            tls_ciphers: Vec::new(),
            tls_cert_names: Vec::new(),
            in_buffer_size: DEFAULT_BUFFER_SIZE,
            out_buffer_size: DEFAULT_BUFFER_SIZE,
            initial_window_kb: DEFAULT_WINDOW_KB,
            report_increment_kb: DEFAULT_REPORT_INCREMENT_KB,
            flush_max_iterations: DEFAULT_FLUSH_MAX_ITERATIONS,
            tls_buffer_limit: Some(DEFAULT_BUFFER_SIZE),
        }
    }
}

impl ConnectionConfig {
    /// Loads settings from `config`, falling back to defaults for missing
    /// keys.
    ///
    /// Lookup follows this priority:
    /// 1. `{name}.{key}`
    /// 2. `{key}`
    /// 3. The hard-coded default
    pub fn from_config(config: &Config, name: &str) -> Result<Self, config::ConfigError> {
        let defaults = Self::default();

        let socket_timeout = optional(get_namespaced_u64(config, name, "socket_timeout_secs"))?
            .map(Duration::from_secs)
            .unwrap_or(defaults.socket_timeout);
        let tls_ciphers = optional(get_namespaced_strings(config, name, "tls_ciphers"))?
            .unwrap_or(defaults.tls_ciphers);
        let tls_cert_names = optional(get_namespaced_strings(config, name, "tls_cert_names"))?
            .unwrap_or(defaults.tls_cert_names);
        let in_buffer_size = optional(get_namespaced_usize(config, name, "in_buffer_size"))?
            .unwrap_or(defaults.in_buffer_size);
        let out_buffer_size = optional(get_namespaced_usize(config, name, "out_buffer_size"))?
            .unwrap_or(defaults.out_buffer_size);
        let initial_window_kb = optional(get_namespaced_u64(config, name, "initial_window_kb"))?
            .unwrap_or(defaults.initial_window_kb);
        let report_increment_kb =
            optional(get_namespaced_u64(config, name, "report_increment_kb"))?
                .unwrap_or(defaults.report_increment_kb);
        let flush_max_iterations =
            optional(get_namespaced_usize(config, name, "flush_max_iterations"))?
                .unwrap_or(defaults.flush_max_iterations);
        let tls_buffer_limit =
            optional(get_namespaced_usize(config, name, "tls_buffer_limit"))?;
        let tls_buffer_limit = match tls_buffer_limit {
            Some(0) => None,
            Some(limit) => Some(limit),
            None => defaults.tls_buffer_limit,
        };

        Ok(Self {
            socket_timeout,
            tls_ciphers,
            tls_cert_names,
            in_buffer_size,
            out_buffer_size,
            initial_window_kb,
            report_increment_kb,
            flush_max_iterations,
            tls_buffer_limit,
        })
    }
}

// Missing keys are not errors, wrongly typed ones are.
fn optional<T>(result: Result<T, config::ConfigError>) -> Result<Option<T>, config::ConfigError> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(config::ConfigError::NotFound(_)) => Ok(None),
        Err(err) => Err(err),
    }
}

pub(crate) fn get_namespaced_value<T, F>(
    config: &Config,
    name: &str,
    key: &str,
    getter: F,
) -> Result<T, config::ConfigError>
where
    F: Fn(&Config, &str) -> Result<T, config::ConfigError>,
{
    if name.is_empty() {
        getter(config, key)
    } else {
        getter(config, &format!("{name}.{key}")).or_else(|_| getter(config, key))
    }
}

pub(crate) fn get_namespaced_usize(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<usize, config::ConfigError> {
    get_namespaced_value(config, name, key, |cfg, key| cfg.get::<usize>(key))
}

pub(crate) fn get_namespaced_u64(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<u64, config::ConfigError> {
    get_namespaced_value(config, name, key, |cfg, key| cfg.get::<u64>(key))
}

#[cfg_attr(not(feature = "tls"), allow(dead_code))]
pub(crate) fn get_namespaced_string(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<String, config::ConfigError> {
    get_namespaced_value(config, name, key, Config::get_string)
}

pub(crate) fn get_namespaced_strings(
    config: &Config,
    name: &str,
    key: &str,
) -> Result<Vec<String>, config::ConfigError> {
    get_namespaced_value(config, name, key, |cfg, key| {
        cfg.get_array(key)?
            .into_iter()
            .map(|value| value.into_string())
            .collect()
    })
}

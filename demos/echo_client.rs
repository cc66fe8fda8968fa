//! Echo client
//!
//! Connects to an echo server (plaintext or TLS), sends every line read from
//! stdin and prints what comes back. With `--control`, bandwidth reports for
//! the session are sent to a second connection.
//!
//! # Usage
//!
//! ```bash
//! # Plaintext, e.g. against `ncat -l -k -e /bin/cat 7000`
//! cargo run --example echo_client -- --server 127.0.0.1:7000
//!
//! # TLS with a private CA, debug logging
//! cargo run --example echo_client -- --server example.com:7443 --tls \
//!     --hostname example.com --config client.toml -vv
//! ```
//!
//! The config file takes the keys documented on `ConnectionConfig`, plus
//! `tls_ca_cert` for TLS.

use clap::Parser;
use config::Config;
use kiteconn::prelude::*;
use kiteconn::TransportState;
use std::io::{self, BufRead};
use std::process::ExitCode;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

const TIMEOUT: Duration = Duration::from_secs(10);

// ============================================================================
// Tracing Initialization
// ============================================================================

/// Initialize tracing for the kiteconn crate based on verbosity level
fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => return,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = format!("kiteconn={}", level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(author, version, about = "Echo client", long_about = None)]
struct Args {
    /// Server address to connect to
    #[arg(short, long, default_value = "127.0.0.1:7000")]
    server: String,

    /// Wrap the connection in TLS
    #[arg(long)]
    tls: bool,

    /// Name to send as SNI and verify the certificate against
    #[arg(long)]
    hostname: Option<String>,

    /// Address that receives bandwidth reports
    #[arg(long)]
    control: Option<String>,

    /// Session id used in bandwidth reports
    #[arg(long, default_value = "demo")]
    sid: String,

    /// Increase logging verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file path (TOML format)
    #[arg(long)]
    config: Option<String>,
}

// ============================================================================
// Connection Driving
// ============================================================================

fn start_tls(conn: &mut Connection, config: &Config, hostname: Option<&str>) -> Result<(), Error> {
    let context = RustlsContext::from_config(config, "")?;
    conn.start_tls(&context, hostname)?;

    let started = Instant::now();
    while conn.state() != TransportState::TlsData {
        if started.elapsed() > TIMEOUT {
            return Err(Error::TlsHandshake);
        }
        conn.wait(100)?;
        conn.continue_handshake()?;
    }
    Ok(())
}

/// Reads until `len` bytes are buffered or the peer goes away.
fn read_echo(conn: &mut Connection, len: usize) -> Result<Vec<u8>, String> {
    let started = Instant::now();
    while conn.input().len() < len {
        if started.elapsed() > TIMEOUT {
            return Err("timed out waiting for echo".to_string());
        }
        conn.wait(100).map_err(|err| err.to_string())?;
        match conn.read() {
            ReadOutcome::Data(_) | ReadOutcome::Retry | ReadOutcome::Handshake => {}
            ReadOutcome::Full => break,
            ReadOutcome::Closed => return Err("server closed the connection".to_string()),
            ReadOutcome::Broken => return Err("connection broken".to_string()),
        }
    }

    let echo = conn.input().to_vec();
    conn.consume_input(echo.len());
    Ok(echo)
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = match &args.config {
        Some(config_path) => match Config::builder()
            .add_source(config::File::with_name(config_path))
            .build()
        {
            Ok(c) => c,
            Err(err) => {
                eprintln!("Failed to load config file '{}': {}", config_path, err);
                return ExitCode::FAILURE;
            }
        },
        None => Config::default(),
    };
    let conn_config = match ConnectionConfig::from_config(&config, "echo") {
        Ok(c) => c,
        Err(err) => {
            eprintln!("Invalid configuration: {err}");
            return ExitCode::FAILURE;
        }
    };

    let mut conn = Connection::new(conn_config);
    if let Err(err) = conn.connect(args.server.as_str()) {
        eprintln!("{err}");
        return ExitCode::FAILURE;
    }
    if args.tls {
        if let Err(err) = start_tls(&mut conn, &config, args.hostname.as_deref()) {
            eprintln!("TLS failed: {err}");
            return ExitCode::FAILURE;
        }
    }
    println!("Connected to {} ({:?})", args.server, conn.state());

    let mut control = None;
    if let Some(addr) = &args.control {
        let mut companion = Connection::new(conn.config().clone());
        if let Err(err) = companion.connect(addr.as_str()) {
            eprintln!("Control channel: {err}");
            return ExitCode::FAILURE;
        }
        control = Some(companion);
    }
    let mut reports = 0;

    for line in io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        let data = format!("{line}\n");

        if let Err(err) = conn.write(data.as_bytes()) {
            eprintln!("Write failed: {err}");
            return ExitCode::FAILURE;
        }
        if conn.output_len() > 0 {
            if let Err(err) = conn.flush(None, FlushMode::Blocking) {
                eprintln!("Flush failed: {err}");
                return ExitCode::FAILURE;
            }
        }

        match read_echo(&mut conn, data.len()) {
            Ok(echo) => print!("{}", String::from_utf8_lossy(&echo)),
            Err(err) => {
                eprintln!("{err}");
                return ExitCode::FAILURE;
            }
        }

        if let Some(companion) = control.as_mut() {
            match conn.report_progress(&args.sid, companion) {
                Ok(true) => reports += 1,
                Ok(false) => {}
                Err(err) => eprintln!("Report failed: {err}"),
            }
        }
    }

    println!("Done after {} KB sent, {} reports", conn.reported_kb(), reports);
    conn.reset(Status::empty());
    ExitCode::SUCCESS
}

//! tcp-multiplex — entry point.
//!
//! Multiplexes a single device-facing TCP connection to an arbitrary number
//! of client connections. Everything the device sends is replicated to all
//! connected clients; everything any client sends is merged into the single
//! device-bound stream. Clients can interleave `?`-prefixed administrative
//! queries (`?ping`, `?count west`, `?count east`) with data on the same
//! connection.
//!
//! # Usage
//!
//! ```text
//! tcp-multiplex [OPTIONS]
//!
//! Options:
//!   --west-port <PORT>        device-facing listener port [default: 2201]
//!   --west-if <ADDR>          device-facing listener interface [default: 0.0.0.0]
//!   --east-port <PORT>        client-facing listener port [default: 2101]
//!   --east-if <ADDR>          client-facing listener interface [default: 127.0.0.1]
//!   --poll-interval-ms <MS>   accept-loop poll interval [default: 200]
//! ```
//!
//! Each flag can also be set through a `MUX_*` environment variable; CLI
//! args take precedence when both are present. The west side listens on all
//! interfaces by default (the instrument connects in over the network), the
//! east side on loopback only.
//!
//! SIGINT/SIGTERM trigger a graceful stop: both listeners shut down, every
//! connection is unblocked and closed, then the process exits.

use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use tcp_multiplex::domain::MultiplexConfig;
use tcp_multiplex::infrastructure::Multiplexer;

/// Multiplex a TCP connection to multiple clients.
#[derive(Debug, Parser)]
#[command(
    name = "tcp-multiplex",
    about = "Multiplex a single device TCP connection to many clients",
    version
)]
struct Cli {
    /// Port to listen on for the connection from a device.
    #[arg(long, default_value_t = 2201, env = "MUX_WEST_PORT")]
    west_port: u16,

    /// Interface to listen on for the connection from a device.
    #[arg(long = "west-if", default_value = "0.0.0.0", env = "MUX_WEST_IF")]
    west_if: String,

    /// Port to listen on for connections from clients.
    #[arg(long, default_value_t = 2101, env = "MUX_EAST_PORT")]
    east_port: u16,

    /// Interface to listen on for connections from clients.
    ///
    /// Defaults to loopback: the administrative side should not be
    /// network-exposed unless explicitly configured.
    #[arg(long = "east-if", default_value = "127.0.0.1", env = "MUX_EAST_IF")]
    east_if: String,

    /// Accept-loop poll interval in milliseconds. Bounds how long a stop
    /// request can go unnoticed.
    #[arg(long, default_value_t = 200, env = "MUX_POLL_INTERVAL_MS")]
    poll_interval_ms: u64,
}

impl Cli {
    /// Converts the parsed CLI arguments into a [`MultiplexConfig`].
    ///
    /// # Errors
    ///
    /// Returns an error if `--west-if` or `--east-if` is not a valid IP
    /// address.
    fn into_config(self) -> anyhow::Result<MultiplexConfig> {
        let west_addr: SocketAddr = format!("{}:{}", self.west_if, self.west_port)
            .parse()
            .with_context(|| {
                format!("invalid west address: '{}:{}'", self.west_if, self.west_port)
            })?;

        let east_addr: SocketAddr = format!("{}:{}", self.east_if, self.east_port)
            .parse()
            .with_context(|| {
                format!("invalid east address: '{}:{}'", self.east_if, self.east_port)
            })?;

        Ok(MultiplexConfig {
            west_addr,
            east_addr,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging. Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Cli::parse().into_config()?;
    info!(
        "tcp-multiplex starting — west={} east={}",
        config.west_addr, config.east_addr
    );

    let multiplexer = Multiplexer::new(config);
    let handle = multiplexer.handle();

    // Map termination signals to a stop request; run() handles the rest.
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            warn!("failed to listen for shutdown signals: {e}");
            return;
        }
        info!("shutdown signal received — stopping");
        handle.stop();
    });

    multiplexer.run().await?;

    info!("tcp-multiplex stopped");
    Ok(())
}

/// Resolves when SIGINT (Ctrl+C) or, on Unix, SIGTERM arrives.
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

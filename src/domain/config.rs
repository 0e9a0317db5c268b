//! Multiplexer configuration.
//!
//! [`MultiplexConfig`] is the single source of truth for all runtime
//! settings. It can be constructed from CLI arguments (preferred for
//! production) or from defaults (useful for local development and tests).
//!
//! Keeping configuration as a plain struct — no global state, no environment
//! variable reads in here — makes the multiplexer easy to embed in tests.
//! The binary entry point is responsible for populating the struct from CLI
//! args or environment variables.

use std::net::SocketAddr;
use std::time::Duration;

/// All runtime configuration for the multiplexer.
///
/// Build this struct once at startup and hand it to
/// [`Multiplexer::new`](crate::infrastructure::server::Multiplexer::new).
#[derive(Debug, Clone)]
pub struct MultiplexConfig {
    /// Address the device-facing (west) listener binds to.
    ///
    /// Defaults to all interfaces: the instrument typically connects in
    /// over the network.
    pub west_addr: SocketAddr,

    /// Address the client-facing (east) listener binds to.
    ///
    /// Defaults to loopback only: the administrative side is not meant to
    /// be network-exposed unless explicitly configured.
    pub east_addr: SocketAddr,

    /// How long each accept loop waits on `accept()` before re-checking
    /// the running flag. Bounds the latency of `stop()`.
    pub poll_interval: Duration,
}

impl Default for MultiplexConfig {
    fn default() -> Self {
        Self {
            // Compile-time-known valid socket address strings.
            west_addr: "0.0.0.0:2201".parse().unwrap(),
            east_addr: "127.0.0.1:2101".parse().unwrap(),
            poll_interval: Duration::from_millis(200),
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! The multiplexer server: listener ownership, startup readiness, and the
//! multi-phase shutdown sequence.
//!
//! [`Multiplexer::run`] binds both listeners, publishes readiness (with the
//! actually-bound addresses, so tests can use port 0), and runs one accept
//! loop per listener until [`MultiplexHandle::stop`] is called. Each accept
//! loop polls `accept()` with a bounded timeout and re-checks the shared
//! running flag between polls, so `stop()` is observed within one poll
//! interval without any asynchronous interruption of the loop itself.
//!
//! # Shutdown sequence
//!
//! 1. Both accept loops observe the cleared running flag and return,
//!    handing their listener sockets back so they stay open a little
//!    longer.
//! 2. The cancel signal is sent to every handler task, releasing reads
//!    blocked on silent peers.
//! 3. `shutdown_all` half-closes every member socket so peers see EOF.
//! 4. The listener sockets are dropped (closed).
//! 5. Every handler task is awaited; each performs its exactly-once
//!    registry removal on the way out.
//! 6. `close_all` drops whatever write halves remain.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::net::TcpListener;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{error, info};

use crate::domain::config::MultiplexConfig;
use crate::infrastructure::handler;
use crate::infrastructure::registry::Registry;

/// Error type for multiplexer startup.
#[derive(Debug, Error)]
pub enum MultiplexError {
    /// A listener could not be bound (port in use, no permission). Fatal:
    /// startup aborts, there is no retry.
    #[error("{role} listener bind failed on {addr}: {source}")]
    BindFailed {
        role: Role,
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("could not read {role} listener local address: {source}")]
    ListenerAddr {
        role: Role,
        #[source]
        source: std::io::Error,
    },
}

/// Which side of the multiplexer a listener or connection belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Device-facing side, conventionally a single instrument connection.
    West,
    /// Client-facing side, conventionally many connections.
    East,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::West => f.write_str("west"),
            Role::East => f.write_str("east"),
        }
    }
}

/// The addresses both listeners are actually bound to.
#[derive(Debug, Clone, Copy)]
pub struct Endpoints {
    pub west: SocketAddr,
    pub east: SocketAddr,
}

/// Handle for controlling a running [`Multiplexer`] from the outside
/// (signal handler, supervisor, test harness).
#[derive(Clone)]
pub struct MultiplexHandle {
    running: Arc<AtomicBool>,
    ready: watch::Receiver<Option<Endpoints>>,
}

impl MultiplexHandle {
    /// Requests both accept loops to stop; `run()` then executes the full
    /// shutdown sequence and returns. Calling `stop` twice without an
    /// intervening `run` is unsupported.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Waits until both listeners are bound and accepting, and returns their
    /// addresses. Returns `None` if the multiplexer terminated before ever
    /// becoming ready (startup failure).
    pub async fn ready(&mut self) -> Option<Endpoints> {
        loop {
            if let Some(endpoints) = *self.ready.borrow() {
                return Some(endpoints);
            }
            if self.ready.changed().await.is_err() {
                return None;
            }
        }
    }
}

/// The top-level multiplexer: owns both registries and both listeners.
pub struct Multiplexer {
    config: MultiplexConfig,
    west: Arc<Registry>,
    east: Arc<Registry>,
    running: Arc<AtomicBool>,
    ready_tx: watch::Sender<Option<Endpoints>>,
}

impl Multiplexer {
    pub fn new(config: MultiplexConfig) -> Self {
        let (ready_tx, _) = watch::channel(None);
        Self {
            config,
            west: Arc::new(Registry::new("west")),
            east: Arc::new(Registry::new("east")),
            running: Arc::new(AtomicBool::new(true)),
            ready_tx,
        }
    }

    /// Returns a control handle. May be cloned freely; take one before
    /// calling [`run`](Self::run).
    pub fn handle(&self) -> MultiplexHandle {
        MultiplexHandle {
            running: Arc::clone(&self.running),
            ready: self.ready_tx.subscribe(),
        }
    }

    /// Runs the multiplexer until [`MultiplexHandle::stop`] is called, then
    /// tears everything down and returns.
    ///
    /// # Errors
    ///
    /// Returns [`MultiplexError`] if either listener cannot be bound.
    pub async fn run(self) -> Result<(), MultiplexError> {
        let west_listener = bind(Role::West, self.config.west_addr).await?;
        let east_listener = bind(Role::East, self.config.east_addr).await?;

        let endpoints = Endpoints {
            west: local_addr(Role::West, &west_listener)?,
            east: local_addr(Role::East, &east_listener)?,
        };
        info!("listening on west={} east={}", endpoints.west, endpoints.east);

        let (cancel_tx, cancel_rx) = watch::channel(false);
        let handlers = Arc::new(HandlerTasks::new());

        let west_loop = tokio::spawn(
            AcceptLoop {
                role: Role::West,
                listener: west_listener,
                west: Arc::clone(&self.west),
                east: Arc::clone(&self.east),
                running: Arc::clone(&self.running),
                cancel: cancel_rx.clone(),
                handlers: Arc::clone(&handlers),
                poll_interval: self.config.poll_interval,
            }
            .run(),
        );
        let east_loop = tokio::spawn(
            AcceptLoop {
                role: Role::East,
                listener: east_listener,
                west: Arc::clone(&self.west),
                east: Arc::clone(&self.east),
                running: Arc::clone(&self.running),
                cancel: cancel_rx,
                handlers: Arc::clone(&handlers),
                poll_interval: self.config.poll_interval,
            }
            .run(),
        );

        // Readiness gate: external callers may connect from here on.
        let _ = self.ready_tx.send(Some(endpoints));

        // Block until both accept loops have serviced the stop request.
        // Each returns its listener so the socket stays open until after
        // the members have been shut down.
        let west_listener = west_loop.await.ok();
        let east_listener = east_loop.await.ok();

        info!("closing sockets");

        // Force-unblock every still-running handler, then wait for each to
        // unregister itself before releasing the remaining write halves.
        let _ = cancel_tx.send(true);
        self.west.shutdown_all().await;
        self.east.shutdown_all().await;

        drop(west_listener);
        drop(east_listener);

        handlers.join_all().await;

        self.west.close_all().await;
        self.east.close_all().await;

        info!("stopped");
        Ok(())
    }
}

async fn bind(role: Role, addr: SocketAddr) -> Result<TcpListener, MultiplexError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| MultiplexError::BindFailed { role, addr, source })
}

fn local_addr(role: Role, listener: &TcpListener) -> Result<SocketAddr, MultiplexError> {
    listener
        .local_addr()
        .map_err(|source| MultiplexError::ListenerAddr { role, source })
}

/// Tracks spawned handler tasks so shutdown can await every live one.
///
/// Finished handles are pruned on each insert, keeping the set
/// proportional to the number of live connections rather than the number
/// ever accepted.
struct HandlerTasks {
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl HandlerTasks {
    fn new() -> Self {
        Self {
            tasks: Mutex::new(Vec::new()),
        }
    }

    async fn insert(&self, task: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().await;
        tasks.retain(|t| !t.is_finished());
        tasks.push(task);
    }

    /// Awaits every remaining task, draining the set.
    async fn join_all(&self) {
        let joins: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for join in joins {
            let _ = join.await;
        }
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.tasks.lock().await.len()
    }
}

/// One listener's accept loop. Spawns a handler task per accepted
/// connection and hands its listener back once the running flag is
/// cleared, so the orchestrator controls when the socket closes.
struct AcceptLoop {
    role: Role,
    listener: TcpListener,
    west: Arc<Registry>,
    east: Arc<Registry>,
    running: Arc<AtomicBool>,
    cancel: watch::Receiver<bool>,
    handlers: Arc<HandlerTasks>,
    poll_interval: Duration,
}

impl AcceptLoop {
    async fn run(self) -> TcpListener {
        loop {
            if !self.running.load(Ordering::Relaxed) {
                info!("{} accept loop stopping", self.role);
                break;
            }

            // Bounded wait on accept() so the loop stays responsive to
            // stop() even when nothing is connecting.
            match timeout(self.poll_interval, self.listener.accept()).await {
                Ok(Ok((stream, peer))) => {
                    info!("new {} connection from {peer}", self.role);
                    let west = Arc::clone(&self.west);
                    let east = Arc::clone(&self.east);
                    let cancel = self.cancel.clone();
                    let task = match self.role {
                        Role::West => {
                            tokio::spawn(handler::handle_west(stream, peer, west, east, cancel))
                        }
                        Role::East => {
                            tokio::spawn(handler::handle_east(stream, peer, west, east, cancel))
                        }
                    };
                    self.handlers.insert(task).await;
                }
                Ok(Err(e)) => {
                    // Transient accept failure (e.g. fd exhaustion). One bad
                    // accept must not take the listener down.
                    error!("{} accept error: {e}", self.role);
                }
                Err(_) => {
                    // Poll timeout — loop back and re-check the running flag.
                }
            }
        }
        self.listener
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

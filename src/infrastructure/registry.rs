//! Connection registry: the thread-safe set of live connections for one
//! role (west or east).
//!
//! Each accepted connection is split into halves: the handler task keeps the
//! read half for its blocking read loop, the registry keeps the write half
//! so broadcasts and shutdown can reach the connection from other tasks.
//! The underlying socket is only fully closed once both halves are dropped,
//! so a server-wide `close_all` never races a handler's in-flight read into
//! a double-close.
//!
//! All operations hold the single per-registry lock for their full duration.
//! In particular `broadcast` holds it across the whole membership traversal:
//! coarse, but it makes broadcasts from one producer totally ordered
//! relative to each other and to concurrent add/remove.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::Mutex;
use tracing::{debug, trace};

/// Process-unique identity of one accepted connection.
///
/// Stands in for the OS socket handle as the registry key; ids are never
/// reused within a process, so a stale id can never alias a new connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(u64);

impl ConnId {
    /// Allocates the next connection id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The set of live connections for one side of the multiplexer.
pub struct Registry {
    /// Role name used in log messages ("west" or "east").
    role: &'static str,
    members: Mutex<HashMap<ConnId, OwnedWriteHalf>>,
}

impl Registry {
    pub fn new(role: &'static str) -> Self {
        Self {
            role,
            members: Mutex::new(HashMap::new()),
        }
    }

    /// Registers a connection's write half.
    ///
    /// # Panics
    ///
    /// Panics if `id` is already registered — that is a caller bug, not a
    /// runtime condition to recover from.
    pub async fn add(&self, id: ConnId, writer: OwnedWriteHalf) {
        let mut members = self.members.lock().await;
        let previous = members.insert(id, writer);
        assert!(
            previous.is_none(),
            "connection {id} registered twice in {} registry",
            self.role
        );
    }

    /// Unregisters a connection, dropping the retained write half.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not registered — removal must happen exactly once,
    /// by the handler that added the connection.
    pub async fn remove(&self, id: ConnId) {
        let mut members = self.members.lock().await;
        let removed = members.remove(&id);
        assert!(
            removed.is_some(),
            "connection {id} removed from {} registry without being registered",
            self.role
        );
    }

    /// Current membership size. Safe to call concurrently with mutation.
    pub async fn count(&self) -> usize {
        self.members.lock().await.len()
    }

    /// Sends `bytes` to exactly one member, exclusive of any concurrent
    /// broadcast targeting the same member.
    ///
    /// # Errors
    ///
    /// Returns the transport error if the write fails.
    ///
    /// # Panics
    ///
    /// Panics if `id` is not registered.
    pub async fn send_one(&self, id: ConnId, bytes: &[u8]) -> std::io::Result<()> {
        let mut members = self.members.lock().await;
        let writer = members
            .get_mut(&id)
            .unwrap_or_else(|| panic!("send_one to unregistered connection {id}"));
        writer.write_all(bytes).await
    }

    /// Sends `bytes` to every current member, best-effort.
    ///
    /// A failed send to one member (peer gone, pipe broken) is logged and
    /// skipped; delivery to the remaining members proceeds. Not atomic, not
    /// transactional.
    pub async fn broadcast(&self, bytes: &[u8]) {
        let mut members = self.members.lock().await;
        trace!("{} broadcast of {} bytes to {} member(s)", self.role, bytes.len(), members.len());
        for (id, writer) in members.iter_mut() {
            if let Err(e) = writer.write_all(bytes).await {
                debug!("{} broadcast skipped {id}: {e}", self.role);
            }
        }
    }

    /// Issues a transport-level write shutdown on every member.
    ///
    /// Peers observe EOF on their next read; blocked readers on the other
    /// end of each connection are thereby released. Errors are swallowed —
    /// a member that is already gone needs no shutdown.
    pub async fn shutdown_all(&self) {
        let mut members = self.members.lock().await;
        for (id, writer) in members.iter_mut() {
            if let Err(e) = writer.shutdown().await {
                debug!("{} shutdown skipped {id}: {e}", self.role);
            }
        }
    }

    /// Drops every retained write half, releasing the registry's share of
    /// each socket. Membership is cleared.
    pub async fn close_all(&self) {
        let mut members = self.members.lock().await;
        let n = members.len();
        members.clear();
        debug!("{} registry closed {n} connection(s)", self.role);
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;
    use tokio::net::{TcpListener, TcpStream};

    /// Returns a connected (client, server) TCP socket pair over loopback.
    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn test_add_and_count() {
        let registry = Registry::new("east");
        assert_eq!(registry.count().await, 0);

        let (_client, server) = socket_pair().await;
        let (_read, write) = server.into_split();
        registry.add(ConnId::next(), write).await;
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_remove_clears_membership() {
        let registry = Registry::new("east");
        let (_client, server) = socket_pair().await;
        let (_read, write) = server.into_split();
        let id = ConnId::next();
        registry.add(id, write).await;
        registry.remove(id).await;
        assert_eq!(registry.count().await, 0);
    }

    #[tokio::test]
    #[should_panic(expected = "registered twice")]
    async fn test_double_add_panics() {
        let registry = Registry::new("east");
        let (_c1, s1) = socket_pair().await;
        let (_c2, s2) = socket_pair().await;
        let id = ConnId::next();
        registry.add(id, s1.into_split().1).await;
        registry.add(id, s2.into_split().1).await;
    }

    #[tokio::test]
    #[should_panic(expected = "without being registered")]
    async fn test_remove_of_absent_panics() {
        let registry = Registry::new("west");
        registry.remove(ConnId::next()).await;
    }

    #[tokio::test]
    async fn test_conn_ids_are_unique() {
        let a = ConnId::next();
        let b = ConnId::next();
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn test_broadcast_reaches_every_member() {
        let registry = Registry::new("east");
        let (mut client1, server1) = socket_pair().await;
        let (mut client2, server2) = socket_pair().await;
        registry.add(ConnId::next(), server1.into_split().1).await;
        registry.add(ConnId::next(), server2.into_split().1).await;

        registry.broadcast(b"DS\n").await;

        let mut buf = [0u8; 3];
        client1.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"DS\n");
        client2.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"DS\n");
    }

    #[tokio::test]
    async fn test_broadcast_skips_failed_member() {
        let registry = Registry::new("east");

        // First member's write half is already shut down, so its send fails.
        let (_dead_client, dead_server) = socket_pair().await;
        registry.add(ConnId::next(), dead_server.into_split().1).await;
        registry.shutdown_all().await;

        let (mut live_client, live_server) = socket_pair().await;
        registry.add(ConnId::next(), live_server.into_split().1).await;

        registry.broadcast(b"hi").await;

        let mut buf = [0u8; 2];
        live_client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"hi");
    }

    #[tokio::test]
    async fn test_send_one_targets_only_that_member() {
        let registry = Registry::new("east");
        let (mut client1, server1) = socket_pair().await;
        let (mut client2, server2) = socket_pair().await;
        let id1 = ConnId::next();
        registry.add(id1, server1.into_split().1).await;
        registry.add(ConnId::next(), server2.into_split().1).await;

        registry.send_one(id1, b"ok\n").await.unwrap();
        // A follow-up broadcast lands behind the send on client1, and is the
        // first thing client2 sees.
        registry.broadcast(b"X\n").await;

        let mut buf1 = [0u8; 5];
        client1.read_exact(&mut buf1).await.unwrap();
        assert_eq!(&buf1, b"ok\nX\n");
        let mut buf2 = [0u8; 2];
        client2.read_exact(&mut buf2).await.unwrap();
        assert_eq!(&buf2, b"X\n");
    }

    #[tokio::test]
    async fn test_shutdown_all_delivers_eof_to_peers() {
        let registry = Registry::new("west");
        let (mut client, server) = socket_pair().await;
        registry.add(ConnId::next(), server.into_split().1).await;

        registry.shutdown_all().await;

        let mut buf = [0u8; 8];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(n, 0, "peer must observe EOF after shutdown_all");
        // Members stay registered; shutdown is not removal.
        assert_eq!(registry.count().await, 1);
    }

    #[tokio::test]
    async fn test_close_all_empties_registry() {
        let registry = Registry::new("west");
        let (_client, server) = socket_pair().await;
        registry.add(ConnId::next(), server.into_split().1).await;

        registry.close_all().await;
        assert_eq!(registry.count().await, 0);
    }
}

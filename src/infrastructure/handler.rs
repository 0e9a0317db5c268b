//! Per-connection handler loops for the two roles.
//!
//! One handler task per accepted connection. Each loop awaits the next
//! chunk from its socket and exits on EOF, on a transport error (treated as
//! a clean disconnect for everyone else), or when the server-wide cancel
//! signal fires during shutdown. The cancel signal is what releases reads
//! that would otherwise stay blocked forever on a silent peer.
//!
//! Registration bookkeeping is strict: a handler adds its connection to its
//! role registry the moment it starts servicing it and removes it exactly
//! once when the loop exits.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::application::commands;
use crate::domain::frame::FrameDecoder;
use crate::infrastructure::registry::{ConnId, Registry};

/// Read buffer size for both handler loops.
const READ_CHUNK: usize = 1024;

/// Services one device-facing (west) connection until it disconnects.
///
/// Every received chunk is broadcast verbatim to the east registry — the
/// device stream is passed through byte-for-byte, unparsed. There is no
/// administrative command handling on this side.
pub async fn handle_west(
    stream: TcpStream,
    peer: SocketAddr,
    west: Arc<Registry>,
    east: Arc<Registry>,
    mut cancel: watch::Receiver<bool>,
) {
    let id = ConnId::next();
    let (mut reader, writer) = stream.into_split();
    west.add(id, writer).await;
    info!("west {id} connect {peer}");

    let mut buf = [0u8; READ_CHUNK];
    loop {
        tokio::select! {
            result = reader.read(&mut buf) => match result {
                Ok(0) => break,
                Ok(n) => {
                    debug!("west {id} recv {n} bytes");
                    east.broadcast(&buf[..n]).await;
                }
                Err(e) => {
                    warn!("west {id} read error from {peer}: {e}");
                    break;
                }
            },
            _ = cancel.changed() => break,
        }
    }

    info!("west {id} disconnect {peer}");
    west.remove(id).await;
}

/// Services one client-facing (east) connection until it disconnects.
///
/// The byte stream is cut into frames by [`FrameDecoder`]. Frames starting
/// with `?` are administrative commands, answered on this connection only;
/// every other frame is broadcast verbatim to the west registry (fan-in).
pub async fn handle_east(
    stream: TcpStream,
    peer: SocketAddr,
    west: Arc<Registry>,
    east: Arc<Registry>,
    mut cancel: watch::Receiver<bool>,
) {
    let id = ConnId::next();
    let (mut reader, writer) = stream.into_split();
    east.add(id, writer).await;
    info!("east {id} connect {peer}");

    let mut decoder = FrameDecoder::new();
    let mut buf = [0u8; READ_CHUNK];
    'recv: loop {
        let chunk = tokio::select! {
            result = reader.read(&mut buf) => match result {
                Ok(0) => break,
                Ok(n) => &buf[..n],
                Err(e) => {
                    warn!("east {id} read error from {peer}: {e}");
                    break;
                }
            },
            _ = cancel.changed() => break,
        };

        for frame in decoder.feed(chunk) {
            if frame.as_bytes().starts_with(b"?") {
                let cmd = commands::trim_trailing_whitespace(frame.as_bytes());
                debug!("east {id} cmd={:?}", String::from_utf8_lossy(cmd));
                let resp = commands::respond(cmd, west.count().await, east.count().await);
                debug!("east {id} resp={:?}", String::from_utf8_lossy(&resp));
                if let Err(e) = east.send_one(id, &resp).await {
                    warn!("east {id} response write failed: {e}");
                    break 'recv;
                }
            } else {
                debug!("east {id} frame of {} bytes", frame.as_bytes().len());
                west.broadcast(frame.as_bytes()).await;
            }
        }
    }

    info!("east {id} disconnect {peer}");
    east.remove(id).await;
}

// ── Tests ─────────────────────────────────────────────────────────────────────

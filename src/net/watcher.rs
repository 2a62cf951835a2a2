//! Per-client disconnection watcher.
//!
//! A passive socket gives no notification when the peer goes away. Each
//! client therefore gets a task that issues a single one-byte read on the
//! read half of its transport. The channel is output-only, so that read
//! can only end in one of three ways, and every one of them means the
//! client is gone:
//!
//! - zero bytes: the peer closed cleanly;
//! - a transport error: the peer reset or vanished;
//! - actual data: a protocol violation, handled as a disconnect.
//!
//! The watcher also stops when the registry evicts the client on its own
//! (a failed broadcast), so the read half is released even if the peer
//! hangs without closing.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use crate::boundary::{Contained, ErrorBoundary, is_transport_fault};
use crate::domain::{ClientId, ClientRegistry};

/// Boundary around the probe read; contains transport-level faults.
pub const PROBE_BOUNDARY: ErrorBoundary<io::Error> =
    ErrorBoundary::new("disconnection probe", is_transport_fault);

/// How a watched client went away.
#[derive(Debug)]
pub enum Disconnect {
    /// The read returned zero bytes.
    Closed,
    /// The read failed with a transport fault.
    Fault(io::Error),
    /// The client sent data on the output-only channel.
    ProtocolViolation,
    /// The read failed with an error outside the transport set.
    Unexpected(io::Error),
    /// The registry evicted the client before the peer went away.
    Evicted,
}

/// Blocks until the peer behind `reader` is observed to be gone.
pub async fn probe<R>(reader: &mut R) -> Disconnect
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut byte = [0_u8; 1];
    match PROBE_BOUNDARY.run(reader.read(&mut byte)).await {
        Ok(Contained::Completed(0)) => Disconnect::Closed,
        Ok(Contained::Completed(_)) => Disconnect::ProtocolViolation,
        Ok(Contained::Fault(error)) => Disconnect::Fault(error),
        Err(error) => Disconnect::Unexpected(error),
    }
}

/// Spawns the watcher for one client.
///
/// The task ends once the client is gone from `registry`, either because
/// the watcher saw the peer leave or because `evicted` fired. It returns
/// the reason for inspection in tests.
pub fn spawn_watcher<R>(
    client_id: ClientId,
    peer: SocketAddr,
    mut reader: R,
    registry: Arc<ClientRegistry>,
    evicted: Arc<Notify>,
) -> JoinHandle<Disconnect>
where
    R: AsyncRead + Send + Unpin + 'static,
{
    tokio::spawn(async move {
        let reason = tokio::select! {
            reason = probe(&mut reader) => reason,
            () = evicted.notified() => Disconnect::Evicted,
        };
        match &reason {
            Disconnect::Evicted => {
                tracing::debug!(%client_id, %peer, "watcher released after eviction");
            }
            Disconnect::Closed => {
                tracing::debug!(%client_id, %peer, "peer closed connection");
            }
            Disconnect::Fault(error) => {
                tracing::debug!(%client_id, %peer, %error, "peer connection lost");
            }
            Disconnect::ProtocolViolation => {
                tracing::warn!(%client_id, %peer, "inspector sent data on output-only channel");
            }
            Disconnect::Unexpected(error) => {
                tracing::warn!(%client_id, %peer, %error, "unexpected error while watching inspector");
            }
        }
        // No-op when the registry already evicted the client.
        registry.remove(client_id).await;
        reason
    })
}

//! Concurrent registry of connected inspector clients.
//!
//! [`ClientRegistry`] stores every attached client in a `HashMap` behind a
//! single [`tokio::sync::Mutex`]. Membership changes are atomic with the
//! emptiness check that accompanies them, so callers never have to do a
//! separate read-then-act step to detect the 0→1 and 1→0 transitions.
//!
//! Each client's write half lives behind its own `Arc<Mutex<..>>`. A
//! broadcast takes a snapshot of the current members under the map lock,
//! releases it, and then writes to every member concurrently. A slow or
//! broken client therefore never holds up registration, eviction, or the
//! delivery to its peers.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::{Mutex, Notify};

use super::ClientId;

/// Type-erased write half of a client transport.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// A connected inspector, owned by the registry until eviction.
pub struct Client {
    /// Registry key.
    pub id: ClientId,
    /// Remote address of the inspector.
    pub peer: SocketAddr,
    /// When the client was accepted.
    pub connected_at: DateTime<Utc>,
    writer: Arc<Mutex<BoxedWriter>>,
    evicted: Arc<Notify>,
}

impl Client {
    /// Wraps the write half of an accepted transport.
    #[must_use]
    pub fn new<W>(id: ClientId, peer: SocketAddr, writer: W) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            id,
            peer,
            connected_at: Utc::now(),
            writer: Arc::new(Mutex::new(Box::new(writer))),
            evicted: Arc::new(Notify::new()),
        }
    }

    /// Signal fired once when the registry evicts this client.
    ///
    /// A permit is stored if nobody is waiting yet, so a watcher that
    /// subscribes late still observes an eviction that already happened.
    #[must_use]
    pub fn eviction_signal(&self) -> Arc<Notify> {
        Arc::clone(&self.evicted)
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("connected_at", &self.connected_at)
            .finish_non_exhaustive()
    }
}

/// A delivery that did not reach its client during a broadcast.
///
/// The client named here has already been evicted by the time the failure
/// is returned.
#[derive(Debug)]
pub struct DeliveryFailure {
    /// Client that failed.
    pub client_id: ClientId,
    /// Its remote address.
    pub peer: SocketAddr,
    /// The transport fault.
    pub error: io::Error,
}

/// Set of currently attached clients.
///
/// # Concurrency
///
/// - `add`, `remove` and `is_empty` serialize on one mutex.
/// - `broadcast` holds that mutex only long enough to copy the member list.
/// - Writes to different clients proceed concurrently; writes to the same
///   client are serialized by its own writer lock.
pub struct ClientRegistry {
    clients: Mutex<HashMap<ClientId, Client>>,
    send_timeout: Duration,
}

impl ClientRegistry {
    /// Creates an empty registry whose deliveries give up after
    /// `send_timeout`.
    #[must_use]
    pub fn new(send_timeout: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            send_timeout,
        }
    }

    /// Registers a client.
    ///
    /// Returns `true` if this registration moved the registry from zero to
    /// one client. Adding an id that is already present leaves the existing
    /// entry in place and returns `false`.
    pub async fn add(&self, client: Client) -> bool {
        let mut map = self.clients.lock().await;
        if map.contains_key(&client.id) {
            tracing::debug!(client_id = %client.id, "duplicate registration ignored");
            return false;
        }
        let first = map.is_empty();
        map.insert(client.id, client);
        first
    }

    /// Deregisters a client and closes its write half.
    ///
    /// Returns `true` if the registry is empty afterwards. Removing an id
    /// that is not present is a no-op.
    pub async fn remove(&self, client_id: ClientId) -> bool {
        let (removed, now_empty) = {
            let mut map = self.clients.lock().await;
            let removed = map.remove(&client_id);
            (removed, map.is_empty())
        };

        if let Some(client) = removed {
            tracing::info!(%client_id, peer = %client.peer, "inspector disconnected");
            self.close(&client).await;
        }
        now_empty
    }

    /// Evicts and closes every registered client.
    ///
    /// Used when no session can serve the attached inspectors; they have
    /// to reconnect, which gives the next registration a fresh 0→1
    /// transition. Returns how many clients were evicted.
    pub async fn evict_all(&self) -> usize {
        let drained: Vec<Client> = {
            let mut map = self.clients.lock().await;
            map.drain().map(|(_, client)| client).collect()
        };

        for client in &drained {
            tracing::info!(client_id = %client.id, peer = %client.peer, "inspector evicted");
            self.close(client).await;
        }
        drained.len()
    }

    /// Delivers `payload` to every registered client.
    ///
    /// Clients whose delivery fails or times out are evicted and reported
    /// back; the others are unaffected.
    pub async fn broadcast(&self, payload: &Bytes) -> Vec<DeliveryFailure> {
        let targets: Vec<(ClientId, SocketAddr, Arc<Mutex<BoxedWriter>>)> = {
            let map = self.clients.lock().await;
            map.values()
                .map(|c| (c.id, c.peer, Arc::clone(&c.writer)))
                .collect()
        };

        let timeout = self.send_timeout;
        let outcomes = join_all(targets.into_iter().map(|(client_id, peer, writer)| {
            let payload = payload.clone();
            async move {
                let mut guard = writer.lock().await;
                let result = deliver(&mut *guard, &payload, timeout).await;
                (client_id, peer, result)
            }
        }))
        .await;

        let mut failures = Vec::new();
        for (client_id, peer, result) in outcomes {
            if let Err(error) = result {
                tracing::debug!(%client_id, %peer, %error, "delivery failed");
                failures.push(DeliveryFailure {
                    client_id,
                    peer,
                    error,
                });
            }
        }

        for failure in &failures {
            self.remove(failure.client_id).await;
        }
        failures
    }

    /// Returns `true` if the given client is registered.
    pub async fn contains(&self, client_id: ClientId) -> bool {
        self.clients.lock().await.contains_key(&client_id)
    }

    /// Returns the number of registered clients.
    pub async fn len(&self) -> usize {
        self.clients.lock().await.len()
    }

    /// Returns `true` if no client is registered.
    pub async fn is_empty(&self) -> bool {
        self.clients.lock().await.is_empty()
    }

    async fn close(&self, client: &Client) {
        client.evicted.notify_one();
        let shutdown = async {
            let mut writer = client.writer.lock().await;
            writer.shutdown().await
        };
        match tokio::time::timeout(self.send_timeout, shutdown).await {
            Ok(Ok(())) => {}
            Ok(Err(error)) => {
                tracing::debug!(client_id = %client.id, %error, "close failed");
            }
            Err(_) => {
                tracing::debug!(client_id = %client.id, "close timed out");
            }
        }
    }
}

impl fmt::Debug for ClientRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientRegistry")
            .field("send_timeout", &self.send_timeout)
            .finish_non_exhaustive()
    }
}

/// Writes and flushes one frame, bounded by `timeout`.
///
/// # Errors
///
/// Returns the transport error, or [`io::ErrorKind::TimedOut`] when the
/// write does not complete in time.
pub async fn deliver<W>(writer: &mut W, payload: &[u8], timeout: Duration) -> io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let write = async {
        writer.write_all(payload).await?;
        writer.flush().await
    };
    tokio::time::timeout(timeout, write)
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "delivery timed out"))?
}

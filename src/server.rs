//! Accept loop and per-connection setup.
//!
//! The accept loop never waits on per-client work: each accepted
//! connection is handed to its own task, which wraps the transport,
//! greets the inspector, registers it, starts a session on the 0→1
//! transition, and finally starts its disconnection watcher.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWrite;
use tokio::net::{TcpListener, TcpStream};

use crate::app_state::AppState;
use crate::config::ServerConfig;
use crate::domain::client_registry::deliver;
use crate::domain::{Client, ClientId};
use crate::error::ServerError;
use crate::net::{self, PlainTransport, StreamWrapper};
use crate::profiler::Profiler;
use crate::wire::{self, ProfilerInfo, WireMessage};

/// Pause after a failed `accept` so a persistent error (e.g. EMFILE) does
/// not spin the loop.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// A bound profiling server.
#[derive(Debug)]
pub struct ProfilingServer {
    state: AppState,
    listener: TcpListener,
}

impl ProfilingServer {
    /// Binds a plain-TCP server.
    ///
    /// # Errors
    ///
    /// Invalid configuration, unresolvable host, or bind failure.
    pub async fn bind(
        config: ServerConfig,
        profiler: Arc<dyn Profiler>,
    ) -> Result<Self, ServerError> {
        Self::bind_with(config, profiler, Arc::new(PlainTransport)).await
    }

    /// Binds a server whose connections pass through `wrapper` first.
    ///
    /// # Errors
    ///
    /// Invalid configuration, unresolvable host, or bind failure.
    pub async fn bind_with(
        config: ServerConfig,
        profiler: Arc<dyn Profiler>,
        wrapper: Arc<dyn StreamWrapper>,
    ) -> Result<Self, ServerError> {
        config.validate()?;
        let listener = net::bind_listener(&config.listen_host, config.listen_port).await?;
        Ok(Self {
            state: AppState::new(config, profiler, wrapper),
            listener,
        })
    }

    /// Address the server is listening on.
    ///
    /// # Errors
    ///
    /// Propagates the OS error if the socket address cannot be read.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Shared state, for inspection.
    #[must_use]
    pub const fn state(&self) -> &AppState {
        &self.state
    }

    /// Accepts connections forever.
    ///
    /// Accept errors are logged and retried; no single client can stop
    /// the loop.
    pub async fn serve(self) {
        tracing::info!(
            addr = ?self.listener.local_addr().ok(),
            interval_ms = self.state.config.interval_ms(),
            "profiling server ready"
        );
        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => {
                    tokio::spawn(handle_connection(self.state.clone(), stream, peer));
                }
                Err(error) => {
                    tracing::error!(%error, "accept failed");
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            }
        }
    }
}

/// Sets up one accepted connection.
///
/// Every failure here is confined to this connection.
pub async fn handle_connection(state: AppState, stream: TcpStream, peer: SocketAddr) {
    let local = stream.local_addr().ok();
    let transport = match state.wrapper.wrap(stream, peer).await {
        Ok(transport) => transport,
        Err(error) => {
            tracing::warn!(%peer, %error, "transport setup failed");
            return;
        }
    };
    let (reader, mut writer) = tokio::io::split(transport);

    if let Err(error) = greet(&state, &mut writer).await {
        tracing::debug!(%peer, %error, "inspector left before greeting completed");
        return;
    }

    let client_id = ClientId::new();
    let client = Client::new(client_id, peer, writer);
    let evicted = client.eviction_signal();
    let first = state.registry.add(client).await;
    tracing::info!(%client_id, %peer, local = ?local, "inspector connected");

    if first {
        drop(state.sampling.trigger());
    }
    drop(net::spawn_watcher(
        client_id,
        peer,
        reader,
        Arc::clone(&state.registry),
        evicted,
    ));
}

/// Sends the server description and, if one exists, the latest snapshot.
async fn greet<W>(state: &AppState, writer: &mut W) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let info = WireMessage::Profiler(ProfilerInfo::current(state.config.interval_ms()));
    let hello = wire::encode(&info, state.config.wire_format).map_err(io::Error::other)?;
    deliver(writer, &hello, state.config.send_timeout).await?;

    if let Some(latest) = state.sampling.latest_frame().await {
        deliver(writer, &latest, state.config.send_timeout).await?;
    }
    Ok(())
}

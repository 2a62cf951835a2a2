//! Shared server state handed to every connection handler.

use std::sync::Arc;

use crate::config::ServerConfig;
use crate::domain::ClientRegistry;
use crate::net::StreamWrapper;
use crate::profiler::Profiler;
use crate::service::SamplingLoop;

/// State shared by the acceptor, connection handlers and watchers.
///
/// Cloning is cheap; every field is reference counted. The registry is the
/// only piece that changes after construction.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Immutable configuration.
    pub config: Arc<ServerConfig>,
    /// Currently attached inspectors.
    pub registry: Arc<ClientRegistry>,
    /// The one sampling loop.
    pub sampling: Arc<SamplingLoop>,
    /// Wrapping applied to each accepted connection.
    pub wrapper: Arc<dyn StreamWrapper>,
}

impl AppState {
    /// Wires the registry and sampling loop together for `config`.
    #[must_use]
    pub fn new(
        config: ServerConfig,
        profiler: Arc<dyn Profiler>,
        wrapper: Arc<dyn StreamWrapper>,
    ) -> Self {
        let registry = Arc::new(ClientRegistry::new(config.send_timeout));
        let sampling = Arc::new(SamplingLoop::new(
            Arc::clone(&registry),
            profiler,
            config.interval,
            config.wire_format,
        ));
        Self {
            config: Arc::new(config),
            registry,
            sampling,
            wrapper,
        }
    }
}

//! # remote-profiler
//!
//! Transport core of a remote profiling server.
//!
//! Inspector clients connect over TCP and receive a one-way stream of
//! framed profiling snapshots. A single sampling loop runs exactly while at
//! least one inspector is attached; the server starts it on the first
//! connection and it stops itself once the last one has gone.
//!
//! ## Architecture
//!
//! ```text
//! Inspectors (TCP, optional wrapping)
//!     │
//!     ├── ProfilingServer accept loop (server)
//!     │       └── per connection: greet → register → trigger → watch
//!     │
//!     ├── DisconnectionWatcher per client (net::watcher)
//!     │       └── ErrorBoundary around a one-byte probe read (boundary)
//!     │
//!     ├── ClientRegistry (domain)
//!     │
//!     └── SamplingLoop, gated to one session (service)
//!             ├── Profiler collaborator (profiler)
//!             └── frame codec (wire)
//! ```

pub mod app_state;
pub mod boundary;
pub mod config;
pub mod domain;
pub mod error;
pub mod net;
pub mod profiler;
pub mod server;
pub mod service;
pub mod wire;

pub use app_state::AppState;
pub use config::ServerConfig;
pub use error::{CodecError, ProfilerError, ServerError};
pub use profiler::{Profiler, WallClockProfiler};
pub use server::ProfilingServer;

//! Network layer: listening socket, transport wrapping, and per-client
//! disconnection watchers.

pub mod listener;
pub mod transport;
pub mod watcher;

pub use listener::{bind_listener, resolve_listen_addr};
pub use transport::{BoxedTransport, PlainTransport, StreamWrapper, Transport};
pub use watcher::{Disconnect, spawn_watcher};

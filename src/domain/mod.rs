//! Domain layer: client identity, the client registry, and snapshots.
//!
//! This module contains the server-side model shared by the acceptor, the
//! disconnection watchers, and the sampling loop. The registry is the only
//! mutable state those tasks share.

pub mod client_id;
pub mod client_registry;
pub mod snapshot;

pub use client_id::ClientId;
pub use client_registry::{Client, ClientRegistry, DeliveryFailure};
pub use snapshot::{FrameStat, Snapshot};

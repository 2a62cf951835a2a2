//! Type-safe client identifier.
//!
//! [`ClientId`] is a newtype wrapper around [`uuid::Uuid`] (v4) so that a
//! connected inspector cannot be confused with any other UUID.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a connected inspector client.
///
/// Generated once when the connection is accepted and used as the key in
/// [`super::ClientRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClientId(uuid::Uuid);

impl ClientId {
    /// Creates a new random `ClientId` (UUID v4).
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ClientId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

//! Wire message types and serialization format tags.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::Snapshot;

/// Serialization format used for frame payloads.
///
/// The tag travels in every frame header, so an inspector can decode a
/// stream without out-of-band negotiation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WireFormat {
    /// JSON, version 1. The stable baseline.
    #[default]
    Json,
    /// Bincode 1.x, version 1. Compact; for native inspectors.
    Bincode,
}

impl WireFormat {
    /// Header byte for this format.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Json => 0x01,
            Self::Bincode => 0x02,
        }
    }

    /// Maps a header byte back to a format.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::Json),
            0x02 => Some(Self::Bincode),
            _ => None,
        }
    }
}

impl fmt::Display for WireFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Json => f.write_str("json"),
            Self::Bincode => f.write_str("bincode"),
        }
    }
}

impl FromStr for WireFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" | "json1" => Ok(Self::Json),
            "bincode" | "bincode1" => Ok(Self::Bincode),
            other => Err(format!("unknown wire format: {other}")),
        }
    }
}

/// Frame method discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Server and session description.
    Profiler,
    /// One profiling snapshot.
    Result,
}

impl Method {
    /// Header byte for this method.
    #[must_use]
    pub const fn tag(self) -> u8 {
        match self {
            Self::Profiler => 0x01,
            Self::Result => 0x02,
        }
    }

    /// Maps a header byte back to a method.
    #[must_use]
    pub const fn from_tag(tag: u8) -> Option<Self> {
        match tag {
            0x01 => Some(Self::Profiler),
            0x02 => Some(Self::Result),
            _ => None,
        }
    }
}

/// Greeting sent to every inspector right after it connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfilerInfo {
    /// Server implementation name.
    pub server: String,
    /// Server version.
    pub version: String,
    /// Sampling period in milliseconds.
    pub interval_ms: u64,
}

impl ProfilerInfo {
    /// Describes this build of the server for the given interval.
    #[must_use]
    pub fn current(interval_ms: u64) -> Self {
        Self {
            server: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            interval_ms,
        }
    }
}

/// A message on the output-only inspector channel.
#[derive(Debug, Clone, PartialEq)]
pub enum WireMessage {
    /// Server description.
    Profiler(ProfilerInfo),
    /// Profiling snapshot.
    Result(Snapshot),
}

impl WireMessage {
    /// The frame method carrying this message.
    #[must_use]
    pub const fn method(&self) -> Method {
        match self {
            Self::Profiler(_) => Method::Profiler,
            Self::Result(_) => Method::Result,
        }
    }
}

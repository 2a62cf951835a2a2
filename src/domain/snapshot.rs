//! Profiling snapshots produced once per sampling interval.
//!
//! A [`Snapshot`] is immutable once the profiler hands it over. The server
//! never looks inside it beyond serializing it for the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Aggregated statistics for one call-site, with its callees nested below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameStat {
    /// Function or frame name.
    pub name: String,
    /// Module or file the frame belongs to.
    pub module: String,
    /// Line number of the frame's definition, if known.
    pub line: Option<u32>,
    /// Number of times the frame was observed or called.
    pub calls: u64,
    /// Seconds spent in the frame itself.
    pub own_time: f64,
    /// Seconds spent in the frame and everything below it.
    pub total_time: f64,
    /// Callees.
    pub children: Vec<FrameStat>,
}

impl FrameStat {
    /// Creates a leaf frame with no calls recorded.
    #[must_use]
    pub fn new(name: impl Into<String>, module: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            module: module.into(),
            line: None,
            calls: 0,
            own_time: 0.0,
            total_time: 0.0,
            children: Vec::new(),
        }
    }

    /// Total number of frames in this subtree, including `self`.
    #[must_use]
    pub fn deep_len(&self) -> usize {
        1 + self.children.iter().map(Self::deep_len).sum::<usize>()
    }
}

/// One unit of profiling output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    /// Position of this snapshot within the profiler's lifetime.
    pub sequence: u64,
    /// When the profiler produced the snapshot.
    pub taken_at: DateTime<Utc>,
    /// CPU seconds covered by the snapshot.
    pub cpu_time: f64,
    /// Wall-clock seconds covered by the snapshot.
    pub wall_time: f64,
    /// Root frames of the collected call tree.
    pub stats: Vec<FrameStat>,
}

impl Snapshot {
    /// Creates an empty snapshot stamped with the current time.
    #[must_use]
    pub fn empty(sequence: u64) -> Self {
        Self {
            sequence,
            taken_at: Utc::now(),
            cpu_time: 0.0,
            wall_time: 0.0,
            stats: Vec::new(),
        }
    }

    /// Total number of frames across every root.
    #[must_use]
    pub fn frame_count(&self) -> usize {
        self.stats.iter().map(FrameStat::deep_len).sum()
    }
}

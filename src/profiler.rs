//! Profiler collaborator interface.
//!
//! The server does not know how samples are taken. It drives any
//! [`Profiler`] through a start / snapshot* / stop cycle, once per session.

use std::sync::{Mutex, MutexGuard};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::Utc;

use crate::domain::Snapshot;
use crate::error::ProfilerError;

/// Source of profiling snapshots.
///
/// Implementations are shared between sessions, so they take `&self` and
/// keep any mutable state behind their own synchronization.
pub trait Profiler: Send + Sync {
    /// Called when a session begins.
    ///
    /// # Errors
    ///
    /// [`ProfilerError::Unavailable`] aborts the session before any
    /// snapshot is taken. [`ProfilerError::Sampling`] is logged and ignored.
    fn start(&self) -> Result<(), ProfilerError> {
        Ok(())
    }

    /// Called when a session ends.
    ///
    /// # Errors
    ///
    /// Errors are logged; the session is over either way.
    fn stop(&self) -> Result<(), ProfilerError> {
        Ok(())
    }

    /// Produces the snapshot for the interval that just elapsed.
    ///
    /// # Errors
    ///
    /// [`ProfilerError::Sampling`] skips this interval;
    /// [`ProfilerError::Unavailable`] ends the session.
    fn take_snapshot(&self) -> Result<Snapshot, ProfilerError>;
}

/// Profiler that records only wall-clock coverage.
///
/// Every snapshot covers the time since the previous snapshot (or since
/// `start`) and carries no call tree. Useful for exercising a deployment
/// end to end before a real sampler is plugged in.
#[derive(Debug, Default)]
pub struct WallClockProfiler {
    sequence: AtomicU64,
    last_mark: Mutex<Option<Instant>>,
}

impl WallClockProfiler {
    /// Creates a profiler that has not started yet.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn clock(&self) -> Result<MutexGuard<'_, Option<Instant>>, ProfilerError> {
        self.last_mark
            .lock()
            .map_err(|_| ProfilerError::Unavailable("clock state poisoned".to_string()))
    }
}

impl Profiler for WallClockProfiler {
    fn start(&self) -> Result<(), ProfilerError> {
        *self.clock()? = Some(Instant::now());
        Ok(())
    }

    fn stop(&self) -> Result<(), ProfilerError> {
        *self.clock()? = None;
        Ok(())
    }

    fn take_snapshot(&self) -> Result<Snapshot, ProfilerError> {
        let mut clock = self.clock()?;
        let Some(previous) = *clock else {
            return Err(ProfilerError::Sampling("profiler not started".to_string()));
        };
        let now = Instant::now();
        *clock = Some(now);
        drop(clock);

        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed);
        Ok(Snapshot {
            sequence,
            taken_at: Utc::now(),
            cpu_time: 0.0,
            wall_time: now.duration_since(previous).as_secs_f64(),
            stats: Vec::new(),
        })
    }
}

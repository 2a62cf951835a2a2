//! The periodic sampling loop.
//!
//! A session runs while at least one inspector is registered: sleep one
//! interval, take a snapshot, frame it, broadcast it, repeat. Sessions are
//! started by the 0→1 registry transition and end on their own when they
//! observe an empty registry.
//!
//! At most one session runs at a time. Each session holds the gate (a
//! FIFO-fair [`tokio::sync::Mutex`]) for its whole lifetime. A session
//! triggered while the previous one is still winding down waits for the
//! gate, then re-checks the registry before doing any work.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

use crate::config::saturating_millis;
use crate::domain::ClientRegistry;
use crate::error::ProfilerError;
use crate::profiler::Profiler;
use crate::wire::{self, WireFormat, WireMessage};

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The registry was empty; no snapshot is taken after this is seen.
    Drained,
    /// The profiler reported itself unusable.
    ProfilerUnavailable,
}

/// Point-in-time view of session bookkeeping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionCounters {
    /// Sessions that got past the gate with inspectors attached.
    pub started: u64,
    /// Sessions that have finished.
    pub completed: u64,
    /// Sessions running right now (0 or 1).
    pub active: usize,
    /// Highest value `active` has ever reached.
    pub max_concurrent: usize,
    /// Snapshots broadcast across all sessions.
    pub snapshots: u64,
}

#[derive(Debug, Default)]
struct SessionStats {
    started: AtomicU64,
    completed: AtomicU64,
    active: AtomicUsize,
    max_concurrent: AtomicUsize,
    snapshots: AtomicU64,
}

/// Marks a session as active for as long as it lives.
struct ActiveSession<'a> {
    stats: &'a SessionStats,
}

impl<'a> ActiveSession<'a> {
    fn enter(stats: &'a SessionStats) -> Self {
        stats.started.fetch_add(1, Ordering::SeqCst);
        let now = stats.active.fetch_add(1, Ordering::SeqCst) + 1;
        stats.max_concurrent.fetch_max(now, Ordering::SeqCst);
        Self { stats }
    }
}

impl Drop for ActiveSession<'_> {
    fn drop(&mut self) {
        self.stats.active.fetch_sub(1, Ordering::SeqCst);
        self.stats.completed.fetch_add(1, Ordering::SeqCst);
    }
}

/// Mutually exclusive snapshot loop shared by every connection.
pub struct SamplingLoop {
    registry: Arc<ClientRegistry>,
    profiler: Arc<dyn Profiler>,
    interval: Duration,
    format: WireFormat,
    gate: Arc<Mutex<()>>,
    latest: RwLock<Option<Bytes>>,
    stats: SessionStats,
}

impl SamplingLoop {
    /// Creates an idle loop over `registry`.
    #[must_use]
    pub fn new(
        registry: Arc<ClientRegistry>,
        profiler: Arc<dyn Profiler>,
        interval: Duration,
        format: WireFormat,
    ) -> Self {
        Self {
            registry,
            profiler,
            interval,
            format,
            gate: Arc::new(Mutex::new(())),
            latest: RwLock::new(None),
            stats: SessionStats::default(),
        }
    }

    /// Spawns a session task.
    ///
    /// Call this on every 0→1 registry transition. If a session is still
    /// running, the new task queues on the gate.
    pub fn trigger(self: &Arc<Self>) -> JoinHandle<SessionEnd> {
        let this = Arc::clone(self);
        tokio::spawn(async move { this.run_session().await })
    }

    /// Runs one session to completion on the current task.
    ///
    /// When the profiler turns out to be unavailable, every attached
    /// inspector is evicted before the gate is released. Nothing would
    /// serve them otherwise, and their reconnects produce the 0→1
    /// transition that starts the next attempt.
    pub async fn run_session(&self) -> SessionEnd {
        let _gate = Arc::clone(&self.gate).lock_owned().await;

        if self.registry.is_empty().await {
            tracing::debug!("no inspectors attached; session skipped");
            return SessionEnd::Drained;
        }

        let _active = ActiveSession::enter(&self.stats);
        tracing::info!(
            interval_ms = saturating_millis(self.interval),
            format = %self.format,
            "profiling session started"
        );

        let end = match self.profiler.start() {
            Err(error) if error.is_fatal() => {
                tracing::error!(%error, "profiler failed to start");
                SessionEnd::ProfilerUnavailable
            }
            started => {
                if let Err(error) = started {
                    tracing::warn!(%error, "profiler start reported an error");
                }
                let end = self.sample_until_drained().await;
                if let Err(error) = self.profiler.stop() {
                    tracing::warn!(%error, "profiler stop reported an error");
                }
                end
            }
        };

        if end == SessionEnd::ProfilerUnavailable {
            let evicted = self.registry.evict_all().await;
            tracing::warn!(evicted, "evicted inspectors left without a profiler");
        }
        tracing::info!(?end, "profiling session stopped");
        end
    }

    async fn sample_until_drained(&self) -> SessionEnd {
        loop {
            tokio::time::sleep(self.interval).await;
            if self.registry.is_empty().await {
                return SessionEnd::Drained;
            }

            match self.sample_once() {
                Ok(frame) => {
                    *self.latest.write().await = Some(frame.clone());
                    let failures = self.registry.broadcast(&frame).await;
                    self.stats.snapshots.fetch_add(1, Ordering::SeqCst);
                    if !failures.is_empty() {
                        tracing::debug!(evicted = failures.len(), "broadcast evicted clients");
                    }
                }
                Err(error) if error.is_fatal() => {
                    tracing::error!(%error, "profiler unavailable; ending session");
                    return SessionEnd::ProfilerUnavailable;
                }
                Err(error) => {
                    tracing::warn!(%error, "skipping sample");
                }
            }

            if self.registry.is_empty().await {
                return SessionEnd::Drained;
            }
        }
    }

    fn sample_once(&self) -> Result<Bytes, ProfilerError> {
        let snapshot = self.profiler.take_snapshot()?;
        wire::encode(&WireMessage::Result(snapshot), self.format)
            .map_err(|e| ProfilerError::Sampling(format!("serialization failed: {e}")))
    }

    /// Most recently broadcast snapshot frame, if any.
    pub async fn latest_frame(&self) -> Option<Bytes> {
        self.latest.read().await.clone()
    }

    /// Returns `true` while a session holds the gate.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.gate.try_lock().is_err()
    }

    /// Sampling period.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Session bookkeeping.
    #[must_use]
    pub fn counters(&self) -> SessionCounters {
        SessionCounters {
            started: self.stats.started.load(Ordering::SeqCst),
            completed: self.stats.completed.load(Ordering::SeqCst),
            active: self.stats.active.load(Ordering::SeqCst),
            max_concurrent: self.stats.max_concurrent.load(Ordering::SeqCst),
            snapshots: self.stats.snapshots.load(Ordering::SeqCst),
        }
    }
}

impl fmt::Debug for SamplingLoop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SamplingLoop")
            .field("interval", &self.interval)
            .field("format", &self.format)
            .field("counters", &self.counters())
            .finish_non_exhaustive()
    }
}

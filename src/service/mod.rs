//! Service layer: the shared sampling loop.
//!
//! [`SamplingLoop`] turns registry transitions into profiling sessions and
//! fans snapshots out through the [`super::domain::ClientRegistry`].

pub mod sampling;

pub use sampling::{SamplingLoop, SessionCounters, SessionEnd};

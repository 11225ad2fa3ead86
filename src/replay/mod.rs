//! Replay of recorded energy environments
//!
//! The driver pulls [`SampleBuffer`]s from a [`SampleSource`], runs every
//! sample through a [`crate::model::VirtualSource`] and optionally writes the
//! simulated output to a [`SampleSink`]. Sources can be read ahead on a
//! background thread with [`prefetch`]; independent runs parallelize through
//! [`run_batch`].

pub mod driver;
pub mod stream;

pub use driver::{run_batch, simulate_harvester, OutputLoad, ReplayDriver, ReplayJob, ReplayReport};
pub use stream::{prefetch, MemorySink, MemorySource, PrefetchSource, SampleBuffer, SampleSink, SampleSource};

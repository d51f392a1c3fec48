//! Composition primitives for channel-connected pipelines.
//!
//! Stages are joined by channels from [`crate::concurrency::channel`]. Each stage owns the
//! sender of its output channel and closes it once its input is exhausted, so closing the
//! source of a pipeline cascades through every downstream stage until the final consumer sees
//! the end of the stream.
//!
//! - [`stage`] builds linear chains: a source, transforms and a collecting sink.
//! - [`fan`] reshapes the topology by distributing one stream across many consumers or merging
//!   many streams into one.

pub mod fan;
pub mod stage;

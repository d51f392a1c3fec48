//! Bounded pools of worker tasks.
//!
//! A [`pool::WorkerPool`] runs a fixed number of workers that compete for jobs on a shared
//! queue and publish exactly one result per job on a shared result queue. A completion barrier
//! tells the pool when every worker has exited, at which point the result queue is closed.

pub mod pool;

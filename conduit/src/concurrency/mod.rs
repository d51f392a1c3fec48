//! Concurrency primitives the rest of the crate is built from.
//!
//! # Coordination Patterns
//!
//! ## Message Passing
//!
//! The [`channel`] module provides bounded, multi-producer multi-consumer channels with an
//! explicit one-time close. A closed channel can still be drained, and receiving from a closed
//! drained channel returns `None` rather than blocking. A capacity of zero gives a rendezvous
//! channel where every send waits for a receiver, which is the basic backpressure mechanism of
//! pipelines.
//!
//! ## Completion
//!
//! The [`barrier`] module lets a coordinator wait until a known number of tasks have each
//! signaled completion. Guards make sure the signal is delivered on every exit path.
//!
//! ## State Signals
//!
//! The [`signal`] module publishes the latest state of a component so that observers can wait
//! for a transition, for example a service acknowledging that it stopped.
//!
//! ## Fault Boundaries
//!
//! The [`future`] module converts panics raised while polling a unit of work into values so a
//! supervising loop can report them and keep going.
//!
//! # Multi-way Waits
//!
//! Waiting on several channel operations at once is done with `tokio::select!` for a fixed set
//! of branches and with `futures` combinators for a dynamic set. Among branches that are ready
//! at the same time the choice is random, no ordering is guaranteed.

pub mod barrier;
pub mod channel;
pub mod future;
pub mod signal;

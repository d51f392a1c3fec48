//! Disciplines for protecting shared mutable state.
//!
//! Each piece of shared state is protected by exactly one of the two disciplines:
//!
//! - [`counter::MutexCounter`] guards the value with an exclusive lock held only for the
//!   duration of a mutation.
//! - [`service`] moves the value into a single serializing task that is reachable only through
//!   requests sent over a channel. [`counter_service::CounterService`] and
//!   [`keyed::KeyedStateService`] are built on it.
//!
//! Both counters implement [`counter::Counter`], so callers can swap one discipline for the
//! other without changing their code.

pub mod counter;
pub mod counter_service;
pub mod echo;
pub mod keyed;
pub mod service;

//! In-process concurrency coordination primitives.
//!
//! Conduit provides two interchangeable disciplines for protecting shared state, lock-based
//! mutual exclusion ([`state::counter`]) and message-passing serialization ([`state::service`]),
//! together with the building blocks for composing concurrent work: staged pipelines
//! ([`pipeline::stage`]), fan-out and fan-in ([`pipeline::fan`]) and a bounded worker pool
//! ([`workers::pool`]).
//!
//! Everything is assembled from a small set of primitives in [`concurrency`]: bounded channels
//! with explicit close, a counting completion barrier and a state signal.
//!
//! # Example
//!
//! ```no_run
//! use conduit::pipeline::stage::{collect, generate, stage};
//!
//! # async fn run() {
//! let numbers = generate(vec![2, 3, 4, 5], 0);
//! let squares = stage(numbers, 0, |n: i64| n * n);
//! let doubled = stage(squares, 0, |n: i64| n * 2);
//!
//! assert_eq!(collect(doubled).await, vec![8, 18, 32, 50]);
//! # }
//! ```

pub mod concurrency;
pub mod error;
mod macros;
pub mod metrics;
pub mod pipeline;
pub mod state;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod workers;

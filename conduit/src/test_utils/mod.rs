//! Helpers for tests that exercise concurrent code.
//!
//! Coordination bugs usually show up as a test that never finishes. Everything here bounds the
//! time a test may wait and fails loudly once that bound is exceeded.
//!
//! - [`timeout`] wraps arbitrary futures with a deadline.
//! - [`notify`] provides a [`tokio::sync::Notify`] wrapper whose waits time out.

pub mod notify;
pub mod timeout;

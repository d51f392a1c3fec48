//! Lock-protected counter and the interface shared by every counter implementation.

use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::bail;
use crate::error::{ConduitResult, ErrorKind};

/// Shared integer counter.
///
/// Implementations guarantee that concurrent updates are never lost: after N tasks each
/// performed M increments, [`Counter::value`] reports exactly N×M. An update that would leave
/// the `i64` range fails with [`ErrorKind::CounterOverflow`] and leaves the value unchanged.
pub trait Counter: Send + Sync {
    /// Adds one and returns the new value.
    fn increment(&self) -> impl Future<Output = ConduitResult<i64>> + Send;

    /// Adds `n` and returns the new value.
    fn add(&self, n: i64) -> impl Future<Output = ConduitResult<i64>> + Send;

    /// Returns the current value.
    fn value(&self) -> impl Future<Output = ConduitResult<i64>> + Send;
}

/// Counter guarded by an exclusive lock.
///
/// The lock is only reachable through a scoped guard, so it is released on every exit path
/// including unwinding.
#[derive(Debug, Default)]
pub struct MutexCounter {
    value: Mutex<i64>,
}

impl MutexCounter {
    /// Creates a counter starting at `initial`.
    pub fn new(initial: i64) -> Self {
        Self {
            value: Mutex::new(initial),
        }
    }

    /// Adds one and returns the new value.
    pub fn increment(&self) -> ConduitResult<i64> {
        self.add(1)
    }

    /// Adds `n` and returns the new value.
    pub fn add(&self, n: i64) -> ConduitResult<i64> {
        let mut value = self.lock();
        *value = checked_add(*value, n)?;

        Ok(*value)
    }

    /// Returns the current value.
    pub fn value(&self) -> i64 {
        *self.lock()
    }

    fn lock(&self) -> MutexGuard<'_, i64> {
        // An integer store cannot be torn by a panic, so a poisoned lock still holds a
        // committed value.
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Adds `n` to `value`, failing instead of wrapping or panicking on overflow.
pub(crate) fn checked_add(value: i64, n: i64) -> ConduitResult<i64> {
    match value.checked_add(n) {
        Some(sum) => Ok(sum),
        None => bail!(
            ErrorKind::CounterOverflow,
            "Counter update overflows i64",
            format!("{value} + {n}")
        ),
    }
}

impl Counter for MutexCounter {
    async fn increment(&self) -> ConduitResult<i64> {
        MutexCounter::increment(self)
    }

    async fn add(&self, n: i64) -> ConduitResult<i64> {
        MutexCounter::add(self, n)
    }

    async fn value(&self) -> ConduitResult<i64> {
        Ok(MutexCounter::value(self))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn add_returns_the_new_value() {
        let counter = MutexCounter::new(5);

        assert_eq!(counter.increment().unwrap(), 6);
        assert_eq!(counter.add(-10).unwrap(), -4);
        assert_eq!(counter.value(), -4);
    }

    #[test]
    fn overflow_is_an_error_and_keeps_the_value() {
        let counter = MutexCounter::new(i64::MAX - 1);

        assert_eq!(counter.increment().unwrap(), i64::MAX);

        let err = counter.increment().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::CounterOverflow);
        assert_eq!(counter.add(i64::MIN).unwrap(), -1);
    }

    #[test]
    fn threads_never_lose_updates() {
        let counter = Arc::new(MutexCounter::default());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let counter = counter.clone();
                std::thread::spawn(move || {
                    for _ in 0..1000 {
                        counter.increment().unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(counter.value(), 8000);
    }

    #[test]
    fn survives_a_panic_while_locked() {
        let counter = Arc::new(MutexCounter::new(1));

        let poisoner = counter.clone();
        let result = std::thread::spawn(move || {
            let _guard = poisoner.lock();
            panic!("fault while holding the lock");
        })
        .join();
        assert!(result.is_err());

        assert_eq!(counter.increment().unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn trait_calls_are_serialized_across_tasks() {
        let counter = Arc::new(MutexCounter::default());

        let mut tasks = Vec::new();
        for _ in 0..10 {
            let counter = counter.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..100 {
                    Counter::increment(counter.as_ref()).await.unwrap();
                }
            }));
        }

        for task in tasks {
            task.await.unwrap();
        }

        assert_eq!(Counter::value(counter.as_ref()).await.unwrap(), 1000);
    }
}

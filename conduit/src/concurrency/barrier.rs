//! Counting completion barrier.
//!
//! A [`CompletionBarrier`] is created with the number of tasks a coordinator is going to wait
//! for. Each task signals its completion exactly once, usually through a [`CompletionGuard`] so
//! that the signal is also delivered when the task unwinds. [`CompletionBarrier::wait`] resolves
//! once every task has signaled. After that the barrier is inert.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{debug, error};

/// Synchronization point released after a known number of completions.
#[derive(Clone)]
pub struct CompletionBarrier {
    remaining: Arc<watch::Sender<usize>>,
}

impl CompletionBarrier {
    /// Creates a barrier waiting for `count` completions.
    ///
    /// A barrier created with a count of zero is released immediately.
    pub fn new(count: usize) -> Self {
        let (tx, _) = watch::channel(count);

        Self {
            remaining: Arc::new(tx),
        }
    }

    /// Signals one completion.
    ///
    /// # Panics
    ///
    /// Panics if more completions are signaled than the barrier was created with.
    pub fn done(&self) {
        if !self.decrement() {
            panic!("completion barrier signaled more times than its count");
        }
    }

    /// Returns a guard that signals one completion when dropped.
    pub fn guard(&self) -> CompletionGuard {
        CompletionGuard {
            barrier: self.clone(),
        }
    }

    /// Returns the number of completions still outstanding.
    pub fn remaining(&self) -> usize {
        *self.remaining.borrow()
    }

    /// Waits until every completion has been signaled.
    pub async fn wait(&self) {
        let mut rx = self.remaining.subscribe();

        // The sender lives in `self`, so the channel cannot close while we wait on it.
        let _ = rx.wait_for(|remaining| *remaining == 0).await;

        debug!("completion barrier released");
    }

    /// Decrements the count, returning `false` if it was already zero.
    fn decrement(&self) -> bool {
        let mut underflow = false;

        self.remaining.send_if_modified(|remaining| {
            if *remaining == 0 {
                underflow = true;
                return false;
            }

            *remaining -= 1;
            true
        });

        !underflow
    }
}

impl fmt::Debug for CompletionBarrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompletionBarrier")
            .field("remaining", &self.remaining())
            .finish()
    }
}

/// Signals one completion on its [`CompletionBarrier`] when dropped.
#[derive(Debug)]
#[must_use = "dropping the guard immediately signals completion"]
pub struct CompletionGuard {
    barrier: CompletionBarrier,
}

impl Drop for CompletionGuard {
    fn drop(&mut self) {
        if self.barrier.decrement() {
            return;
        }

        if std::thread::panicking() {
            error!("completion barrier signaled more times than its count during unwinding");
        } else {
            panic!("completion barrier signaled more times than its count");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn zero_count_is_released_immediately() {
        let barrier = CompletionBarrier::new(0);

        barrier.wait().await;
        assert_eq!(barrier.remaining(), 0);
    }

    #[tokio::test]
    async fn wait_blocks_until_every_task_completes() {
        let barrier = CompletionBarrier::new(3);

        let waiter = {
            let barrier = barrier.clone();
            tokio::spawn(async move { barrier.wait().await })
        };

        barrier.done();
        barrier.done();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        assert_eq!(barrier.remaining(), 1);

        barrier.done();
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn guards_signal_on_drop_even_when_tasks_panic() {
        let barrier = CompletionBarrier::new(2);

        let ok = {
            let guard = barrier.guard();
            tokio::spawn(async move {
                let _guard = guard;
            })
        };
        let panicking = {
            let guard = barrier.guard();
            tokio::spawn(async move {
                let _guard = guard;
                panic!("task failed");
            })
        };

        ok.await.unwrap();
        assert!(panicking.await.unwrap_err().is_panic());

        barrier.wait().await;
    }

    #[tokio::test]
    async fn waiting_after_release_returns_immediately() {
        let barrier = CompletionBarrier::new(1);
        barrier.done();

        barrier.wait().await;
        barrier.wait().await;
    }

    #[test]
    #[should_panic(expected = "more times than its count")]
    fn signaling_past_zero_panics() {
        let barrier = CompletionBarrier::new(1);

        barrier.done();
        barrier.done();
    }
}

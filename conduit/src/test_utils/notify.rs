use std::time::Duration;
use std::{fmt, sync::Arc};

use tokio::sync::Notify;

use crate::test_utils::timeout::{DEFAULT_TEST_TIMEOUT, with_timeout};

/// A wrapper around [`Arc<Notify>`] whose waits time out.
///
/// Useful to let a test observe that a task reached a given point, for example that a worker
/// started processing a job, without risking a hang if it never does.
#[derive(Clone)]
pub struct TimedNotify {
    notify: Arc<Notify>,
    timeout_duration: Duration,
}

impl TimedNotify {
    /// Creates a new [`TimedNotify`] with the default timeout.
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_TEST_TIMEOUT)
    }

    /// Creates a new [`TimedNotify`] with a custom timeout duration.
    pub fn with_timeout(timeout_duration: Duration) -> Self {
        Self {
            notify: Arc::new(Notify::new()),
            timeout_duration,
        }
    }

    /// Wakes the current waiter, or the next one to arrive.
    pub fn notify(&self) {
        self.notify.notify_one();
    }

    /// Waits for a notification.
    ///
    /// # Panics
    ///
    /// Panics if the timeout duration elapses before the notification is received.
    pub async fn notified(&self) {
        with_timeout(self.timeout_duration, self.notify.notified()).await
    }
}

impl Default for TimedNotify {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TimedNotify {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimedNotify")
            .field("timeout_duration", &self.timeout_duration)
            .finish()
    }
}

use std::future::Future;
use std::time::Duration;

/// Default deadline for a single awaited step in tests.
///
/// Coordination steps in tests finish in milliseconds. Anything slower is a hang.
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Awaits `future`, panicking if it does not complete within [`DEFAULT_TEST_TIMEOUT`].
pub async fn with_test_timeout<F>(future: F) -> F::Output
where
    F: Future,
{
    with_timeout(DEFAULT_TEST_TIMEOUT, future).await
}

/// Awaits `future`, panicking if it does not complete within `duration`.
///
/// # Panics
///
/// Panics when the deadline elapses. This is intentional so that tests fail fast instead of
/// hanging.
pub async fn with_timeout<F>(duration: Duration, future: F) -> F::Output
where
    F: Future,
{
    match tokio::time::timeout(duration, future).await {
        Ok(output) => output,
        Err(_) => panic!(
            "Test step timed out after {duration:?}. \
             This likely indicates a producer that never closed its channel or a task that \
             never signaled completion."
        ),
    }
}

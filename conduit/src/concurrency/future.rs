use core::future::Future;
use core::pin::Pin;
use core::task::{Context, Poll};
use std::any::Any;
use std::panic::{AssertUnwindSafe, catch_unwind};

use pin_project_lite::pin_project;

pin_project! {
    /// Future adapter that turns a panic raised while polling `inner` into an error.
    ///
    /// The panic payload is rendered into a message so it can be logged and reported as data
    /// by the unit of work that owns the future (a job, a service request), while the task that
    /// polls it keeps running.
    #[derive(Debug)]
    #[must_use = "futures do nothing unless polled"]
    pub struct CatchPanic<F> {
        #[pin]
        inner: F,
    }
}

impl<F> CatchPanic<F> {
    /// Creates a new [`CatchPanic`] wrapping the given `inner` future.
    pub const fn new(inner: F) -> Self {
        Self { inner }
    }
}

impl<F> Future for CatchPanic<F>
where
    F: Future,
{
    type Output = Result<F::Output, String>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.project();

        // The inner future is never polled again after a panic, so observing broken
        // invariants inside it is impossible.
        match catch_unwind(AssertUnwindSafe(|| this.inner.poll(cx))) {
            Ok(Poll::Ready(output)) => Poll::Ready(Ok(output)),
            Ok(Poll::Pending) => Poll::Pending,
            Err(payload) => Poll::Ready(Err(panic_message(payload.as_ref()))),
        }
    }
}

/// Helper for constructing a [`CatchPanic`] without naming the type.
#[inline]
pub fn catch_panic<F>(inner: F) -> CatchPanic<F> {
    CatchPanic::new(inner)
}

/// Extracts a human readable message from a panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        return (*message).to_string();
    }

    if let Some(message) = payload.downcast_ref::<String>() {
        return message.clone();
    }

    "unknown panic payload".to_string()
}

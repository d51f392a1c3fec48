//! Serializing state service.
//!
//! A service is a single task that exclusively owns some state, held inside a
//! [`RequestHandler`]. Callers reach the state only through a [`ServiceHandle`]: every call
//! sends a request carrying a fresh one-shot reply channel over the service inbox and waits for
//! the reply. Requests are handled strictly one at a time in the order they were accepted, which
//! is what replaces locking.
//!
//! # Lifecycle
//!
//! ```text
//! Running ──stop()──> Stopping ──inbox drained──> Stopped
//! ```
//!
//! [`ServiceHandle::stop`] closes the inbox, waits for the loop to finish the requests it had
//! already accepted and returns once the service published [`ServiceState::Stopped`]. Requests
//! issued after `stop` fail fast with [`ErrorKind::ServiceStopped`].
//!
//! A panic raised by the handler while processing one request is reported to that caller as
//! [`ErrorKind::ServiceHandlerPanic`]. The loop keeps serving later requests.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::Instant;

use conduit_config::shared::ServiceConfig;
use metrics::{counter, histogram};
use tokio::sync::{RwLock, oneshot};
use tracing::{Instrument, debug, error, info_span};

use crate::bail;
use crate::concurrency::channel::{self, Receiver, Sender};
use crate::concurrency::future::panic_message;
use crate::concurrency::signal::{StateRx, StateTx, create_state_signal};
use crate::conduit_error;
use crate::error::{ConduitResult, ErrorKind};
use crate::metrics::{
    COMPONENT_LABEL, CONDUIT_SERVICE_REQUEST_DURATION_SECONDS, CONDUIT_SERVICE_REQUESTS_TOTAL,
    OUTCOME_LABEL,
};

/// Owner of the private state of a service.
///
/// The handler is moved into the service task, so `handle` runs with exclusive access to it.
pub trait RequestHandler: Send + 'static {
    /// Operation sent by callers.
    type Request: Send + 'static;
    /// Value returned to the caller of a request.
    type Reply: Send + 'static;

    /// Applies `request` to the state and computes the reply.
    fn handle(&mut self, request: Self::Request) -> Self::Reply;
}

/// Lifecycle of a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceState {
    /// Accepting and processing requests.
    Running,
    /// Inbox closed, finishing the requests accepted before the close.
    Stopping,
    /// The service task exited.
    Stopped,
}

/// A request together with the channel its reply goes back on.
struct Envelope<Req, Rep> {
    request: Req,
    reply: oneshot::Sender<ConduitResult<Rep>>,
}

/// Cloneable handle used to talk to a running service.
pub struct ServiceHandle<Req, Rep> {
    name: &'static str,
    /// Taken on stop. Requests hold a read lock while sending so a concurrent stop never
    /// closes the inbox under them.
    inbox: Arc<RwLock<Option<Sender<Envelope<Req, Rep>>>>>,
    state_tx: Arc<StateTx<ServiceState>>,
    state_rx: StateRx<ServiceState>,
}

/// Spawns a service task owning `handler` and returns a handle to it.
///
/// Must be called from within a tokio runtime.
pub fn spawn<H>(
    name: &'static str,
    handler: H,
    config: ServiceConfig,
) -> ServiceHandle<H::Request, H::Reply>
where
    H: RequestHandler,
{
    let (tx, rx) = channel::channel(config.request_capacity);
    let (state_tx, state_rx) = create_state_signal(ServiceState::Running);
    let state_tx = Arc::new(state_tx);

    let span = info_span!("service", service = name);
    tokio::spawn(run_service(name, handler, rx, state_tx.clone()).instrument(span));

    ServiceHandle {
        name,
        inbox: Arc::new(RwLock::new(Some(tx))),
        state_tx,
        state_rx,
    }
}

impl<Req, Rep> ServiceHandle<Req, Rep> {
    /// Sends `request` to the service and waits for its reply.
    ///
    /// Fails with [`ErrorKind::ServiceStopped`] once the service has been stopped and with
    /// [`ErrorKind::ServiceHandlerPanic`] if the handler panicked on this request.
    pub async fn request(&self, request: Req) -> ConduitResult<Rep> {
        let (reply_tx, reply_rx) = oneshot::channel();

        {
            let inbox = self.inbox.read().await;
            let Some(inbox) = inbox.as_ref() else {
                bail!(
                    ErrorKind::ServiceStopped,
                    "Service no longer accepts requests",
                    self.name
                );
            };

            let envelope = Envelope {
                request,
                reply: reply_tx,
            };
            if let Err(err) = inbox.send(envelope).await {
                bail!(
                    ErrorKind::ServiceStopped,
                    "Service exited before accepting the request",
                    self.name,
                    source: err
                );
            }
        }

        match reply_rx.await {
            Ok(reply) => reply,
            Err(_) => bail!(
                ErrorKind::ServiceStopped,
                "Service exited before replying",
                self.name
            ),
        }
    }

    /// Stops the service and waits until it acknowledged the stop.
    ///
    /// Requests accepted before the call are still processed. Calling `stop` again, from this
    /// or any other handle, only waits for the acknowledgment.
    pub async fn stop(&self) {
        {
            let mut inbox = self.inbox.write().await;
            if let Some(inbox) = inbox.take() {
                self.state_tx.set(ServiceState::Stopping);
                inbox.close();

                debug!(service = self.name, "service stop requested");
            }
        }

        let mut state_rx = self.state_rx.clone();
        state_rx
            .wait_until(|state| *state == ServiceState::Stopped)
            .await;
    }

    /// Returns the current lifecycle state of the service.
    pub fn state(&self) -> ServiceState {
        self.state_rx.current()
    }

    /// Returns the name the service was spawned with.
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl<Req, Rep> Clone for ServiceHandle<Req, Rep> {
    fn clone(&self) -> Self {
        Self {
            name: self.name,
            inbox: self.inbox.clone(),
            state_tx: self.state_tx.clone(),
            state_rx: self.state_rx.clone(),
        }
    }
}

impl<Req, Rep> fmt::Debug for ServiceHandle<Req, Rep> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceHandle")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

async fn run_service<H>(
    name: &'static str,
    mut handler: H,
    inbox: Receiver<Envelope<H::Request, H::Reply>>,
    state_tx: Arc<StateTx<ServiceState>>,
) where
    H: RequestHandler,
{
    debug!("service started");

    let mut handled = 0u64;
    while let Some(Envelope { request, reply }) = inbox.recv().await {
        let started = Instant::now();

        let (outcome, label) = match catch_unwind(AssertUnwindSafe(|| handler.handle(request))) {
            Ok(value) => (Ok(value), "ok"),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                error!(panic = %message, "service handler panicked, continuing with next request");

                let err = conduit_error!(
                    ErrorKind::ServiceHandlerPanic,
                    "Service handler panicked",
                    message
                );
                (Err(err), "panic")
            }
        };

        counter!(
            CONDUIT_SERVICE_REQUESTS_TOTAL,
            COMPONENT_LABEL => name,
            OUTCOME_LABEL => label,
        )
        .increment(1);
        histogram!(
            CONDUIT_SERVICE_REQUEST_DURATION_SECONDS,
            COMPONENT_LABEL => name,
        )
        .record(started.elapsed().as_secs_f64());

        // The caller may have stopped waiting, the request was processed regardless.
        let _ = reply.send(outcome);
        handled += 1;
    }

    // The inbox is also exhausted when every handle is dropped without calling stop.
    state_tx.set(ServiceState::Stopped);

    debug!(handled, "service stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Appends every request to a log and replies with the log length.
    struct Journal {
        entries: Vec<String>,
    }

    impl RequestHandler for Journal {
        type Request = String;
        type Reply = usize;

        fn handle(&mut self, request: String) -> usize {
            if request == "boom" {
                panic!("journal cannot record a boom");
            }

            self.entries.push(request);
            self.entries.len()
        }
    }

    fn journal() -> ServiceHandle<String, usize> {
        spawn(
            "journal",
            Journal {
                entries: Vec::new(),
            },
            ServiceConfig::default(),
        )
    }

    #[tokio::test]
    async fn requests_are_applied_in_order() {
        let service = journal();

        assert_eq!(service.request("a".into()).await.unwrap(), 1);
        assert_eq!(service.request("b".into()).await.unwrap(), 2);
        assert_eq!(service.state(), ServiceState::Running);

        service.stop().await;
    }

    #[tokio::test]
    async fn handler_panic_is_reported_and_loop_continues() {
        let service = journal();

        service.request("a".into()).await.unwrap();

        let err = service.request("boom".into()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceHandlerPanic);
        assert!(err.detail().unwrap().contains("cannot record a boom"));

        assert_eq!(service.request("b".into()).await.unwrap(), 2);

        service.stop().await;
    }

    #[tokio::test]
    async fn requests_after_stop_fail_fast() {
        let service = journal();
        let other = service.clone();

        service.stop().await;
        assert_eq!(service.state(), ServiceState::Stopped);

        let err = other.request("late".into()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ServiceStopped);
    }

    #[tokio::test]
    async fn stop_is_idempotent_across_handles() {
        let service = journal();
        let other = service.clone();

        tokio::join!(service.stop(), other.stop());
        service.stop().await;

        assert_eq!(other.state(), ServiceState::Stopped);
    }

    #[tokio::test]
    async fn concurrent_requests_on_a_buffered_inbox_all_succeed() {
        let service = spawn(
            "journal",
            Journal {
                entries: Vec::new(),
            },
            ServiceConfig {
                request_capacity: 8,
            },
        );

        let mut pending = Vec::new();
        for i in 0..5 {
            let service = service.clone();
            pending.push(tokio::spawn(
                async move { service.request(i.to_string()).await },
            ));
        }

        let mut replies = Vec::new();
        for request in pending {
            replies.push(request.await.unwrap().unwrap());
        }
        service.stop().await;

        replies.sort_unstable();
        assert_eq!(replies, vec![1, 2, 3, 4, 5]);
    }
}

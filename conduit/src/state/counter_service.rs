//! Counter owned by a serializing service.

use conduit_config::shared::ServiceConfig;

use crate::error::ConduitResult;
use crate::state::counter::{Counter, checked_add};
use crate::state::service::{self, RequestHandler, ServiceHandle};

/// Operations understood by the counter service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CounterOp {
    Increment,
    Add(i64),
    Get,
}

struct CounterState {
    value: i64,
}

impl RequestHandler for CounterState {
    type Request = CounterOp;
    type Reply = ConduitResult<i64>;

    fn handle(&mut self, op: CounterOp) -> ConduitResult<i64> {
        match op {
            CounterOp::Increment => self.value = checked_add(self.value, 1)?,
            CounterOp::Add(n) => self.value = checked_add(self.value, n)?,
            CounterOp::Get => {}
        }

        Ok(self.value)
    }
}

/// Counter whose value lives inside a dedicated service task.
///
/// Every operation is a request/reply exchange with that task, so no lock is involved. Clones
/// talk to the same service.
#[derive(Debug, Clone)]
pub struct CounterService {
    handle: ServiceHandle<CounterOp, ConduitResult<i64>>,
}

impl CounterService {
    /// Spawns the counter service starting at `initial`.
    pub fn spawn(initial: i64, config: ServiceConfig) -> Self {
        let handle = service::spawn("counter", CounterState { value: initial }, config);

        Self { handle }
    }

    /// Adds one and returns the new value.
    pub async fn increment(&self) -> ConduitResult<i64> {
        self.handle.request(CounterOp::Increment).await?
    }

    /// Adds `n` and returns the new value.
    pub async fn add(&self, n: i64) -> ConduitResult<i64> {
        self.handle.request(CounterOp::Add(n)).await?
    }

    /// Returns the current value.
    pub async fn get(&self) -> ConduitResult<i64> {
        self.handle.request(CounterOp::Get).await?
    }

    /// Stops the underlying service. See [`ServiceHandle::stop`].
    pub async fn stop(&self) {
        self.handle.stop().await
    }

    /// Returns the handle of the underlying service.
    pub fn handle(&self) -> &ServiceHandle<CounterOp, ConduitResult<i64>> {
        &self.handle
    }
}

impl Counter for CounterService {
    async fn increment(&self) -> ConduitResult<i64> {
        CounterService::increment(self).await
    }

    async fn add(&self, n: i64) -> ConduitResult<i64> {
        CounterService::add(self, n).await
    }

    async fn value(&self) -> ConduitResult<i64> {
        self.get().await
    }
}

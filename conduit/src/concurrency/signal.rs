//! State signaling primitives for task coordination.
//!
//! This module wraps tokio's watch channels into a small publish/observe pair. A single owner
//! publishes the latest state of something (for example a service moving from running to
//! stopped) and any number of observers can read it or wait until it reaches a given value.
//! Observers that subscribe late still see the latest state, which is what makes the signal
//! usable as a happens-before edge for shutdown.

use tokio::sync::watch;

/// Publishing side of a state signal.
#[derive(Debug)]
pub struct StateTx<S>(watch::Sender<S>);

impl<S> StateTx<S> {
    /// Publishes `state`, replacing the previous one.
    pub fn set(&self, state: S) {
        // Use infallible send so that publishing works even with no observers around.
        self.0.send_replace(state);
    }

    /// Creates a new observer of this signal.
    pub fn subscribe(&self) -> StateRx<S> {
        StateRx(self.0.subscribe())
    }
}

/// Observing side of a state signal.
#[derive(Debug, Clone)]
pub struct StateRx<S>(watch::Receiver<S>);

impl<S> StateRx<S>
where
    S: Clone,
{
    /// Returns the most recently published state.
    pub fn current(&self) -> S {
        self.0.borrow().clone()
    }

    /// Waits until the published state satisfies `predicate` and returns it.
    ///
    /// If the publisher is dropped first, the last published state is returned.
    pub async fn wait_until(&mut self, mut predicate: impl FnMut(&S) -> bool) -> S {
        let reached = self
            .0
            .wait_for(|state| predicate(state))
            .await
            .map(|state| state.clone());

        match reached {
            Ok(state) => state,
            Err(_) => self.0.borrow().clone(),
        }
    }
}

/// Creates a new state signal starting at `initial`.
pub fn create_state_signal<S>(initial: S) -> (StateTx<S>, StateRx<S>) {
    let (tx, rx) = watch::channel(initial);
    (StateTx(tx), StateRx(rx))
}

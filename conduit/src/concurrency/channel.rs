//! Bounded multi-producer, multi-consumer channels with an explicit, one-time close.
//!
//! The channel is layered on top of [`tokio::sync::mpsc`]:
//!
//! - Producers share the underlying sender behind a lock so that any [`Sender`] clone can close
//!   the channel for every other clone. Closing is irreversible. Closing twice or sending after
//!   close are programmer defects and panic, the same way a double release of a lock would.
//! - Consumers share the underlying receiver behind an async lock so that clones compete for
//!   values. Each value is delivered to exactly one [`Receiver`].
//! - A capacity of zero creates a rendezvous channel: a send only completes once a receiver has
//!   taken the value. The value travels in a slot shared with the sender together with a
//!   one-shot acknowledgement. A sender that stops waiting withdraws the value from the slot, so
//!   a cancelled rendezvous send is never delivered. Receivers skip withdrawn slots.
//!   Reserving a slot on a rendezvous channel additionally waits for a receiver to be parked, so
//!   a reservation means someone is ready to take the value right away.
//!
//! Receiving from a closed channel keeps yielding buffered values until it is drained, after
//! which [`Receiver::recv`] returns `None` instead of blocking.

use std::error;
use std::fmt;
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::Stream;
use thiserror::Error;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::time::timeout;
use tracing::trace;

use crate::bail;
use crate::error::{ConduitResult, ErrorKind};

/// Value slot shared by a rendezvous sender and whichever receiver takes the value first.
type Slot<T> = Arc<Mutex<Option<T>>>;

fn lock_slot<T>(slot: &Mutex<Option<T>>) -> MutexGuard<'_, Option<T>> {
    // Only ever swapped with `take`, a panic cannot leave it half-written.
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A value travelling through the channel.
enum Envelope<T> {
    /// Buffered value, delivered as soon as it is queued.
    Buffered(T),
    /// Rendezvous value, delivered only if the sender has not withdrawn it.
    Handoff {
        slot: Slot<T>,
        ack: oneshot::Sender<()>,
    },
}

impl<T> Envelope<T> {
    /// Unwraps the value, completing the handshake with the sender if one is waiting.
    ///
    /// Returns `None` when the sender withdrew the value before it was taken.
    fn open(self) -> Option<T> {
        match self {
            Envelope::Buffered(value) => Some(value),
            Envelope::Handoff { slot, ack } => {
                let value = lock_slot(&slot).take()?;
                let _ = ack.send(());

                Some(value)
            }
        }
    }
}

/// Sender side of a rendezvous handshake.
///
/// Dropping it withdraws the value if no receiver has taken it yet.
struct Handoff<T> {
    slot: Slot<T>,
    ack: oneshot::Receiver<()>,
}

impl<T> Handoff<T> {
    /// Waits until a receiver took the value.
    ///
    /// Hands the value back if every receiver went away without taking it.
    async fn completed(mut self, tx: &mpsc::Sender<Envelope<T>>) -> Result<(), T> {
        tokio::select! {
            ack = &mut self.ack => {
                if ack.is_ok() {
                    return Ok(());
                }
            }
            // Values queued after the last receiver dropped are never released, so watch
            // for the disconnect directly.
            _ = tx.closed() => {}
        }

        match self.withdraw() {
            Some(value) => Err(value),
            None => Ok(()),
        }
    }

    fn withdraw(&self) -> Option<T> {
        lock_slot(&self.slot).take()
    }
}

impl<T> Drop for Handoff<T> {
    fn drop(&mut self) {
        let _ = self.withdraw();
    }
}

/// State visible to both halves of a channel.
#[derive(Debug)]
struct Shared {
    capacity: usize,
    /// Number of receivers currently parked on the underlying queue.
    waiting_receivers: AtomicUsize,
    /// Woken every time a receiver parks.
    receiver_parked: Notify,
}

impl Shared {
    fn is_rendezvous(&self) -> bool {
        self.capacity == 0
    }
}

/// Counts a receiver as parked until the receive completes or is cancelled.
struct WaitingGuard<'a>(&'a Shared);

impl<'a> WaitingGuard<'a> {
    fn new(shared: &'a Shared) -> Self {
        shared.waiting_receivers.fetch_add(1, Ordering::AcqRel);
        shared.receiver_parked.notify_waiters();
        Self(shared)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.waiting_receivers.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Error returned by [`Sender::try_send`], handing the value back to the caller.
#[derive(PartialEq, Eq)]
pub enum TrySendError<T> {
    /// The channel cannot accept the value without blocking.
    Full(T),
    /// Every receiver has been dropped.
    Disconnected(T),
}

impl<T> TrySendError<T> {
    /// Returns the value that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(value) | TrySendError::Disconnected(value) => value,
        }
    }
}

impl<T> fmt::Debug for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => f.write_str("Full(..)"),
            TrySendError::Disconnected(_) => f.write_str("Disconnected(..)"),
        }
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => f.write_str("channel is full"),
            TrySendError::Disconnected(_) => f.write_str("channel has no remaining receivers"),
        }
    }
}

impl<T> error::Error for TrySendError<T> {}

/// Error returned by [`Receiver::try_recv`].
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// No value is available right now.
    #[error("channel is empty")]
    Empty,
    /// The channel is closed and every buffered value has been received.
    #[error("channel is closed and drained")]
    Closed,
}

/// Producer half of a channel.
///
/// Clones share a single close right: closing through one clone closes the channel for all of
/// them. Dropping the last clone also closes the channel.
pub struct Sender<T> {
    tx: Arc<Mutex<Option<mpsc::Sender<Envelope<T>>>>>,
    shared: Arc<Shared>,
}

/// Consumer half of a channel.
///
/// Clones compete for values, so each value is received by exactly one of them.
pub struct Receiver<T> {
    rx: Arc<tokio::sync::Mutex<mpsc::Receiver<Envelope<T>>>>,
    shared: Arc<Shared>,
}

/// Creates a channel that buffers up to `capacity` values.
///
/// A `capacity` of zero creates a rendezvous channel where every send waits for a receiver.
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    // The underlying queue needs room for at least the value being handed over.
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let shared = Arc::new(Shared {
        capacity,
        waiting_receivers: AtomicUsize::new(0),
        receiver_parked: Notify::new(),
    });

    let sender = Sender {
        tx: Arc::new(Mutex::new(Some(tx))),
        shared: shared.clone(),
    };
    let receiver = Receiver {
        rx: Arc::new(tokio::sync::Mutex::new(rx)),
        shared,
    };

    (sender, receiver)
}

impl<T> Sender<T> {
    /// Sends `value`, waiting while the channel is full.
    ///
    /// On a rendezvous channel the call completes only after a receiver has taken the value.
    /// Returns [`ErrorKind::ChannelDisconnected`] when every receiver is gone.
    ///
    /// # Cancellation
    ///
    /// Dropping the returned future before it completes, for example when it loses a race
    /// against a timer, means the value is not delivered: a buffered channel never queued it
    /// and a rendezvous channel withdraws it. The only exception is a rendezvous receiver
    /// taking the value at the very moment the future is dropped.
    ///
    /// # Panics
    ///
    /// Panics if the channel was closed.
    pub async fn send(&self, value: T) -> ConduitResult<()> {
        let tx = self.open_sender();
        let (envelope, handoff) = seal(value, self.shared.is_rendezvous());

        if tx.send(envelope).await.is_err() {
            bail!(
                ErrorKind::ChannelDisconnected,
                "Channel has no remaining receivers"
            );
        }

        finish_handoff(handoff, &tx).await
    }

    /// Attempts to send `value` without waiting.
    ///
    /// On a rendezvous channel this only succeeds when a receiver is already waiting.
    ///
    /// # Panics
    ///
    /// Panics if the channel was closed.
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let tx = self.open_sender();

        if self.shared.is_rendezvous() && self.shared.waiting_receivers.load(Ordering::Acquire) == 0
        {
            return Err(TrySendError::Full(value));
        }

        match tx.try_reserve() {
            Ok(permit) => {
                permit.send(Envelope::Buffered(value));
                Ok(())
            }
            Err(mpsc::error::TrySendError::Full(())) => Err(TrySendError::Full(value)),
            Err(mpsc::error::TrySendError::Closed(())) => Err(TrySendError::Disconnected(value)),
        }
    }

    /// Waits for room in the channel and returns a [`Permit`] to send exactly one value.
    ///
    /// Unlike [`Sender::send`], dropping the returned future never delivers anything, which
    /// makes it suitable as a branch of a multi-way wait over several outputs. On a rendezvous
    /// channel the permit is only handed out once a receiver is waiting.
    ///
    /// # Panics
    ///
    /// Panics if the channel was closed.
    pub async fn reserve(&self) -> ConduitResult<Permit<T>> {
        let tx = self.open_sender();

        if self.shared.is_rendezvous() {
            self.wait_for_receiver(&tx).await?;
        }

        match tx.reserve_owned().await {
            Ok(permit) => Ok(Permit {
                permit,
                rendezvous: self.shared.is_rendezvous(),
            }),
            Err(_) => bail!(
                ErrorKind::ChannelDisconnected,
                "Channel has no remaining receivers"
            ),
        }
    }

    /// Closes the channel.
    ///
    /// Values already buffered remain available to receivers.
    ///
    /// # Panics
    ///
    /// Panics if the channel was already closed.
    pub fn close(&self) {
        if self.lock_tx().take().is_none() {
            panic!("close of closed channel");
        }

        trace!("channel closed by producer");
    }

    /// Returns `true` once [`Sender::close`] has been called.
    pub fn is_closed(&self) -> bool {
        self.lock_tx().is_none()
    }

    /// Returns the configured capacity, zero for rendezvous channels.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    fn lock_tx(&self) -> MutexGuard<'_, Option<mpsc::Sender<Envelope<T>>>> {
        // The guarded value is a plain handle swap, a panic cannot leave it half-written.
        self.tx.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_sender(&self) -> mpsc::Sender<Envelope<T>> {
        match self.lock_tx().as_ref() {
            Some(tx) => tx.clone(),
            None => panic!("send on closed channel"),
        }
    }

    async fn wait_for_receiver(&self, tx: &mpsc::Sender<Envelope<T>>) -> ConduitResult<()> {
        loop {
            // Register interest before checking the count so a receiver parking in between
            // still wakes us.
            let mut parked = pin!(self.shared.receiver_parked.notified());
            parked.as_mut().enable();

            if self.shared.waiting_receivers.load(Ordering::Acquire) > 0 {
                return Ok(());
            }

            tokio::select! {
                _ = parked => {}
                _ = tx.closed() => bail!(
                    ErrorKind::ChannelDisconnected,
                    "Channel has no remaining receivers"
                ),
            }
        }
    }
}

fn seal<T>(value: T, rendezvous: bool) -> (Envelope<T>, Option<Handoff<T>>) {
    if !rendezvous {
        return (Envelope::Buffered(value), None);
    }

    let slot = Arc::new(Mutex::new(Some(value)));
    let (ack_tx, ack_rx) = oneshot::channel();
    let envelope = Envelope::Handoff {
        slot: slot.clone(),
        ack: ack_tx,
    };

    (envelope, Some(Handoff { slot, ack: ack_rx }))
}

async fn finish_handoff<T>(
    handoff: Option<Handoff<T>>,
    tx: &mpsc::Sender<Envelope<T>>,
) -> ConduitResult<()> {
    let Some(handoff) = handoff else {
        return Ok(());
    };

    if handoff.completed(tx).await.is_err() {
        bail!(
            ErrorKind::ChannelDisconnected,
            "Channel receivers were dropped before taking the value"
        );
    }

    Ok(())
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for Sender<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sender")
            .field("capacity", &self.shared.capacity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Reserved slot obtained from [`Sender::reserve`].
pub struct Permit<T> {
    permit: mpsc::OwnedPermit<Envelope<T>>,
    rendezvous: bool,
}

impl<T> Permit<T> {
    /// Sends `value` into the reserved slot.
    ///
    /// On a rendezvous channel this waits until a receiver has taken the value. Dropping the
    /// returned future before that withdraws the value, like [`Sender::send`].
    pub async fn send(self, value: T) -> ConduitResult<()> {
        if self.send_or_return(value).await.is_err() {
            bail!(
                ErrorKind::ChannelDisconnected,
                "Channel receivers were dropped before taking the value"
            );
        }

        Ok(())
    }

    /// Like [`Permit::send`], but hands `value` back if every receiver of a rendezvous channel
    /// went away before taking it.
    ///
    /// On a buffered channel the value is queued and this always succeeds.
    pub async fn send_or_return(self, value: T) -> Result<(), T> {
        let (envelope, handoff) = seal(value, self.rendezvous);
        let tx = self.permit.send(envelope);

        match handoff {
            Some(handoff) => handoff.completed(&tx).await,
            None => Ok(()),
        }
    }
}

impl<T> fmt::Debug for Permit<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Permit")
            .field("rendezvous", &self.rendezvous)
            .finish()
    }
}

impl<T> Receiver<T> {
    /// Receives the next value, waiting until one is available.
    ///
    /// Returns `None` once the channel is closed and drained. Cancelling the returned future
    /// never loses a value. Rendezvous values withdrawn by their sender are skipped.
    pub async fn recv(&self) -> Option<T> {
        let mut rx = self.rx.lock().await;
        let _waiting = WaitingGuard::new(&self.shared);

        loop {
            if let Some(value) = rx.recv().await?.open() {
                return Some(value);
            }
        }
    }

    /// Attempts to receive a value without waiting.
    ///
    /// Reports [`TryRecvError::Empty`] when another receiver clone is currently waiting.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let Ok(mut rx) = self.rx.try_lock() else {
            return Err(TryRecvError::Empty);
        };

        loop {
            match rx.try_recv() {
                Ok(envelope) => {
                    if let Some(value) = envelope.open() {
                        return Ok(value);
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => return Err(TryRecvError::Empty),
                Err(mpsc::error::TryRecvError::Disconnected) => return Err(TryRecvError::Closed),
            }
        }
    }

    /// Receives the next value or fails with [`ErrorKind::Timeout`] after `duration`.
    pub async fn recv_timeout(&self, duration: Duration) -> ConduitResult<Option<T>> {
        Ok(timeout(duration, self.recv()).await?)
    }

    /// Returns `true` when the channel is closed and has no buffered values left.
    ///
    /// This never blocks. While another receiver clone is waiting it conservatively returns
    /// `false`.
    pub fn is_drained(&self) -> bool {
        self.rx
            .try_lock()
            .map(|rx| rx.is_closed() && rx.is_empty())
            .unwrap_or(false)
    }

    /// Returns the configured capacity, zero for rendezvous channels.
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Converts this receiver into a [`Stream`] that ends when the channel is drained.
    pub fn into_stream(self) -> impl Stream<Item = T> + Send + 'static
    where
        T: Send + 'static,
    {
        futures::stream::unfold(self, |rx| async move {
            let value = rx.recv().await?;
            Some((value, rx))
        })
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Self {
            rx: self.rx.clone(),
            shared: self.shared.clone(),
        }
    }
}

impl<T> fmt::Debug for Receiver<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Receiver")
            .field("capacity", &self.shared.capacity)
            .finish()
    }
}

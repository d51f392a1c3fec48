//! Linear pipeline stages.
//!
//! Every constructor spawns one task and returns the receiving end of the channel that task
//! produces into. A stage stops when its input is closed and drained, or when nobody is left to
//! receive its output, and always closes its output on the way out.

use metrics::counter;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span, warn};

use crate::concurrency::channel::{Receiver, Sender, channel};
use crate::conduit_error;
use crate::error::{ConduitResult, ErrorKind};
use crate::metrics::{COMPONENT_LABEL, CONDUIT_PIPELINE_ITEMS_TOTAL};

/// Emits every element of `values` on a new channel, then closes it.
pub fn generate<T, I>(values: I, capacity: usize) -> Receiver<T>
where
    T: Send + 'static,
    I: IntoIterator<Item = T>,
    I::IntoIter: Send + 'static,
{
    let (tx, rx) = channel(capacity);
    let values = values.into_iter();

    let span = info_span!("pipeline_stage", stage = "generate");
    tokio::spawn(
        async move {
            let mut produced = 0u64;
            for value in values {
                if !forward(&tx, value).await {
                    break;
                }
                produced += 1;
            }

            finish(&tx, "generate", produced);
        }
        .instrument(span),
    );

    rx
}

/// Applies `transform` to every value of `input` and emits the results in input order.
///
/// The returned channel is closed once `input` is closed and drained, which is how closing
/// the source of a pipeline cascades to its end. A `capacity` of zero makes the stage wait for
/// its consumer on every value.
pub fn stage<T, U, F>(input: Receiver<T>, capacity: usize, mut transform: F) -> Receiver<U>
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> U + Send + 'static,
{
    let (tx, rx) = channel(capacity);

    let span = info_span!("pipeline_stage", stage = "transform");
    tokio::spawn(
        async move {
            let mut produced = 0u64;
            while let Some(value) = input.recv().await {
                if !forward(&tx, transform(value)).await {
                    break;
                }
                produced += 1;
            }

            finish(&tx, "transform", produced);
        }
        .instrument(span),
    );

    rx
}

/// Like [`stage`], but with a fallible transform.
///
/// The first error stops the stage and closes its output, so downstream stages drain what was
/// produced before the failure and then terminate normally. The error is reported through the
/// returned join handle as [`ErrorKind::StageFailed`].
pub fn try_stage<T, U, F>(
    input: Receiver<T>,
    capacity: usize,
    mut transform: F,
) -> (Receiver<U>, JoinHandle<ConduitResult<()>>)
where
    T: Send + 'static,
    U: Send + 'static,
    F: FnMut(T) -> ConduitResult<U> + Send + 'static,
{
    let (tx, rx) = channel(capacity);

    let span = info_span!("pipeline_stage", stage = "try_transform");
    let handle = tokio::spawn(
        async move {
            let mut produced = 0u64;
            while let Some(value) = input.recv().await {
                let output = match transform(value) {
                    Ok(output) => output,
                    Err(err) => {
                        warn!(error = %err, produced, "stage transform failed, closing output");
                        finish(&tx, "try_transform", produced);

                        return Err(conduit_error!(
                            ErrorKind::StageFailed,
                            "Pipeline stage transform failed",
                            source: err
                        ));
                    }
                };

                if !forward(&tx, output).await {
                    break;
                }
                produced += 1;
            }

            finish(&tx, "try_transform", produced);

            Ok(())
        }
        .instrument(span),
    );

    (rx, handle)
}

/// Receives every value of `input` until it is closed and drained.
pub async fn collect<T>(input: Receiver<T>) -> Vec<T> {
    let mut values = Vec::new();
    while let Some(value) = input.recv().await {
        values.push(value);
    }

    values
}

/// Sends `value` downstream, returning `false` once there is nobody left to receive it.
async fn forward<T>(tx: &Sender<T>, value: T) -> bool {
    match tx.send(value).await {
        Ok(()) => true,
        Err(err) => {
            warn!(error = %err, "stage output has no consumers, stopping");
            false
        }
    }
}

fn finish<T>(tx: &Sender<T>, stage: &'static str, produced: u64) {
    tx.close();

    counter!(CONDUIT_PIPELINE_ITEMS_TOTAL, COMPONENT_LABEL => stage).increment(produced);
    debug!(produced, "stage finished");
}

//! Fan-out distribution and fan-in merging.
//!
//! [`fan_out`] hands every input value to exactly one of several outputs, whichever is ready to
//! accept first. [`fan_in`] forwards the values of several inputs onto one output as they
//! arrive. Neither balances load beyond "whoever is ready", and neither gives an ordering across
//! different channels. The order of values coming from the same channel is preserved.

use futures::StreamExt;
use futures::future::select_all;
use metrics::counter;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, info_span, warn};

use crate::concurrency::channel::{Permit, Receiver, Sender, channel};
use crate::error::ConduitResult;
use crate::metrics::{COMPONENT_LABEL, CONDUIT_PIPELINE_ITEMS_TOTAL};

/// Distributes the values of `input` across `outputs`.
///
/// Each value goes to exactly one output: the first one with room for it, which for rendezvous
/// outputs means the first one with a receiver waiting. When several outputs are ready at once
/// the choice is uniformly random. Outputs whose receivers are all gone are skipped from then
/// on. A rendezvous output whose receivers disappear after it was chosen hands the value back
/// and it goes to another output instead. Values already queued in a buffered output are lost
/// together with that output's receivers. Every output is closed once `input` is closed and
/// drained.
///
/// # Panics
///
/// Panics if `outputs` is empty, since values would have nowhere to go.
pub fn fan_out<T>(input: Receiver<T>, outputs: Vec<Sender<T>>) -> JoinHandle<()>
where
    T: Send + 'static,
{
    assert!(!outputs.is_empty(), "fan-out needs at least one output");

    let span = info_span!("fan_out", outputs = outputs.len());
    tokio::spawn(distribute(input, outputs).instrument(span))
}

/// Creates `count` output channels of the given `capacity` and fans `input` out across them.
///
/// # Panics
///
/// Panics if `count` is zero.
pub fn fan_out_channels<T>(input: Receiver<T>, count: usize, capacity: usize) -> Vec<Receiver<T>>
where
    T: Send + 'static,
{
    let (senders, receivers): (Vec<_>, Vec<_>) = (0..count).map(|_| channel(capacity)).unzip();
    fan_out(input, senders);

    receivers
}

async fn distribute<T>(input: Receiver<T>, outputs: Vec<Sender<T>>) {
    let mut rng = StdRng::from_entropy();
    let mut connected: Vec<usize> = (0..outputs.len()).collect();
    let mut distributed = 0u64;

    'values: while let Some(mut value) = input.recv().await {
        loop {
            if connected.is_empty() {
                warn!("every fan-out consumer is gone, stopping");
                break 'values;
            }

            let (position, reservation) = reserve_any(&outputs, &connected, &mut rng).await;
            let permit = match reservation {
                Ok(permit) => permit,
                Err(_) => {
                    debug!(output = connected[position], "fan-out consumer is gone");
                    connected.remove(position);
                    continue;
                }
            };

            match permit.send_or_return(value).await {
                Ok(()) => {
                    distributed += 1;
                    break;
                }
                Err(returned) => {
                    debug!(
                        output = connected[position],
                        "fan-out consumer left before taking the value, redirecting"
                    );
                    connected.remove(position);
                    value = returned;
                }
            }
        }
    }

    for output in &outputs {
        output.close();
    }

    counter!(CONDUIT_PIPELINE_ITEMS_TOTAL, COMPONENT_LABEL => "fan_out").increment(distributed);
    debug!(distributed, "fan-out finished");
}

/// Waits until one of the `connected` outputs has room and returns its position in `connected`.
///
/// The outputs are raced in an order rotated by a random offset, so that among outputs ready at
/// the same time none is systematically preferred.
async fn reserve_any<T>(
    outputs: &[Sender<T>],
    connected: &[usize],
    rng: &mut StdRng,
) -> (usize, ConduitResult<Permit<T>>) {
    let offset = rng.gen_range(0..connected.len());

    let reservations = (0..connected.len()).map(|i| {
        let position = (offset + i) % connected.len();
        let output = &outputs[connected[position]];

        Box::pin(async move { (position, output.reserve().await) })
    });

    // Reservations that lost the race are dropped without sending anything.
    let (reserved, _, _) = select_all(reservations).await;

    reserved
}

/// Merges `inputs` into a single channel of the given `capacity`.
///
/// Inputs that close are no longer waited on. The returned channel is closed once every input
/// is closed and drained, so it yields exactly as many values as all inputs together.
pub fn fan_in<T>(inputs: Vec<Receiver<T>>, capacity: usize) -> Receiver<T>
where
    T: Send + 'static,
{
    let (tx, rx) = channel(capacity);

    let span = info_span!("fan_in", inputs = inputs.len());
    tokio::spawn(
        async move {
            let mut merged = futures::stream::select_all(
                inputs.into_iter().map(|input| input.into_stream().boxed()),
            );

            let mut merged_count = 0u64;
            while let Some(value) = merged.next().await {
                if let Err(err) = tx.send(value).await {
                    warn!(error = %err, "fan-in output has no consumers, stopping");
                    break;
                }
                merged_count += 1;
            }

            tx.close();

            counter!(CONDUIT_PIPELINE_ITEMS_TOTAL, COMPONENT_LABEL => "fan_in")
                .increment(merged_count);
            debug!(merged = merged_count, "fan-in finished");
        }
        .instrument(span),
    );

    rx
}

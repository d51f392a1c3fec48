//! Minimal request/response loop over a pair of channels.

use tracing::debug;

use crate::concurrency::channel::{Receiver, Sender};
use crate::error::ConduitResult;

/// Answers every value from `requests` with `respond(value)` on `responses`.
///
/// Runs until `requests` is closed and drained, then closes `responses`. Unlike a full
/// [`crate::state::service`], there is no per-request reply channel, so responses come back in
/// request order on a single shared channel.
pub async fn serve<Req, Rep, F>(
    requests: Receiver<Req>,
    responses: Sender<Rep>,
    mut respond: F,
) -> ConduitResult<()>
where
    F: FnMut(Req) -> Rep,
{
    let mut served = 0usize;

    while let Some(request) = requests.recv().await {
        if let Err(err) = responses.send(respond(request)).await {
            responses.close();
            return Err(err);
        }
        served += 1;
    }

    responses.close();
    debug!(served, "service loop finished");

    Ok(())
}

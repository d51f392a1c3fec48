//! Runs in its own test binary because `init_tracing` installs process-wide globals.

use conduit_telemetry::tracing::{TracingError, init_tracing};

#[test]
fn init_tracing_installs_the_subscriber_once() {
    let flusher = init_tracing("conduit_telemetry_test");
    assert!(flusher.is_ok(), "init_tracing failed: {:?}", flusher.err());

    tracing::info!("subscriber is live");

    // The log bridge and the subscriber are both taken now.
    let second = init_tracing("conduit_telemetry_test");
    assert!(matches!(second, Err(TracingError::LogTracer(_))));
}

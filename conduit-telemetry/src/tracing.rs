//! Tracing subscriber initialization.
//!
//! Binaries call [`init_tracing`] once at startup and keep the returned [`LogFlusher`] alive
//! until exit so buffered log lines are written out. Tests call [`init_test_tracing`], which is
//! idempotent and routes output through the test harness capture.

use std::io;
use std::sync::Once;

use conduit_config::Environment;
use thiserror::Error;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::log::SetLoggerError;
use tracing_subscriber::util::TryInitError;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Env variable consulted for the log filter, falling back to `{app_name}=info,conduit=info`.
const RUST_LOG_ENV_NAME: &str = "RUST_LOG";

static INIT_TEST_TRACING: Once = Once::new();

/// Errors that can occur while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TracingError {
    /// The `log` crate bridge could not be installed.
    #[error("failed to install the log bridge: {0}")]
    LogTracer(#[from] SetLoggerError),

    /// A global subscriber was already installed.
    #[error("failed to install the tracing subscriber: {0}")]
    Subscriber(#[from] TryInitError),

    /// Failed to determine the runtime environment.
    #[error("failed to determine runtime environment: {0}")]
    Environment(#[from] io::Error),
}

/// Keeps the non-blocking log writer alive.
///
/// Dropping the flusher flushes every buffered log line, so hold it for the lifetime of `main`.
#[derive(Debug)]
#[must_use = "dropping the flusher stops log output"]
pub struct LogFlusher {
    _guard: WorkerGuard,
}

/// Installs the global tracing subscriber for a binary named `app_name`.
///
/// Development environments get human readable output, production gets JSON lines. The filter
/// comes from `RUST_LOG` when set.
pub fn init_tracing(app_name: &str) -> Result<LogFlusher, TracingError> {
    let environment = Environment::load()?;

    tracing_log::LogTracer::init()?;

    let filter = EnvFilter::try_from_env(RUST_LOG_ENV_NAME)
        .unwrap_or_else(|_| EnvFilter::new(format!("{app_name}=info,conduit=info")));

    let (writer, guard) = tracing_appender::non_blocking(io::stdout());

    match environment {
        Environment::Dev => tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_writer(writer))
            .try_init()?,
        Environment::Prod => tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_writer(writer),
            )
            .try_init()?,
    }

    ::tracing::debug!(app_name, %environment, "tracing initialized");

    Ok(LogFlusher { _guard: guard })
}

/// Installs a subscriber that writes through the test harness, at most once per process.
///
/// The filter defaults to `debug` so failing tests show the coordination steps that led there.
pub fn init_test_tracing() {
    INIT_TEST_TRACING.call_once(|| {
        let filter =
            EnvFilter::try_from_env(RUST_LOG_ENV_NAME).unwrap_or_else(|_| EnvFilter::new("debug"));

        // Another test binary helper may have installed a subscriber already.
        let _ = tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_test_writer())
            .try_init();
    });
}

//! Conduit demo
//!
//! Runs each coordination scenario end to end and logs what happened. Settings are read from
//! `configuration/` when present and fall back to defaults otherwise.
//!
//! ```text
//! conduit-demo counters --tasks 10 --increments 1000
//! conduit-demo pipeline 2 3 4 5
//! conduit-demo fan --outputs 3 --count 20
//! conduit-demo pool --jobs 9
//! conduit-demo services
//! conduit-demo select
//! ```

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};
use conduit::concurrency::barrier::CompletionBarrier;
use conduit::concurrency::channel::{TrySendError, channel};
use conduit::error::ErrorKind;
use conduit::pipeline::fan::{fan_in, fan_out_channels};
use conduit::pipeline::stage::{collect, generate, stage};
use conduit::state::counter::{Counter, MutexCounter};
use conduit::state::counter_service::CounterService;
use conduit::state::echo::serve;
use conduit::state::keyed::KeyedStateService;
use conduit::workers::pool::run_jobs;
use conduit_config::load::{LoadConfigError, load_config};
use conduit_config::shared::ConduitConfig;
use conduit_telemetry::tracing::init_tracing;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Overrides the number of pool workers from the configuration.
    #[arg(long, global = true)]
    workers: Option<usize>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Increments a lock-based and a service-based counter from many tasks.
    Counters {
        #[arg(long, default_value_t = 10)]
        tasks: usize,
        #[arg(long, default_value_t = 1000)]
        increments: usize,
    },
    /// Squares then doubles the given numbers through a three stage pipeline.
    Pipeline {
        #[arg(default_values_t = [2, 3, 4, 5])]
        values: Vec<i64>,
    },
    /// Distributes numbers across several branches and merges them back.
    Fan {
        #[arg(long, default_value_t = 3)]
        outputs: usize,
        #[arg(long, default_value_t = 20)]
        count: u64,
    },
    /// Squares the numbers 1..=jobs on a worker pool.
    Pool {
        #[arg(long, default_value_t = 9)]
        jobs: i64,
    },
    /// Exercises the keyed state service and a plain request/response loop.
    Services,
    /// Shows timeouts, non-blocking sends and multi-way waits.
    Select,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _log_flusher = init_tracing("conduit_demo")?;

    main_impl().await
}

async fn main_impl() -> Result<(), Box<dyn Error>> {
    let args = Args::parse();

    let mut config = load_demo_config()?;
    if let Some(workers) = args.workers {
        config.pool.workers = workers;
    }
    config.validate()?;

    match args.command {
        Command::Counters { tasks, increments } => counters(&config, tasks, increments).await?,
        Command::Pipeline { values } => pipeline(&config, values).await,
        Command::Fan { outputs, count } => fan(&config, outputs, count).await,
        Command::Pool { jobs } => pool(&config, jobs).await?,
        Command::Services => services(&config).await?,
        Command::Select => select().await?,
    }

    Ok(())
}

fn load_demo_config() -> Result<ConduitConfig, LoadConfigError> {
    match load_config::<ConduitConfig>() {
        Ok(config) => Ok(config),
        Err(LoadConfigError::MissingConfigurationDirectory(path)) => {
            warn!(path = %path.display(), "no configuration directory, using defaults");
            Ok(ConduitConfig::default())
        }
        Err(err) => Err(err),
    }
}

async fn counters(
    config: &ConduitConfig,
    tasks: usize,
    increments: usize,
) -> Result<(), Box<dyn Error>> {
    let mutex = Arc::new(MutexCounter::default());
    let elapsed = hammer(mutex.clone(), tasks, increments).await;
    info!(value = mutex.value(), ?elapsed, "mutex counter finished");

    let service = Arc::new(CounterService::spawn(0, config.service));
    let elapsed = hammer(service.clone(), tasks, increments).await;
    let value = service.get().await?;
    info!(value, ?elapsed, "counter service finished");
    service.stop().await;

    Ok(())
}

async fn hammer<C>(counter: Arc<C>, tasks: usize, increments: usize) -> Duration
where
    C: Counter + 'static,
{
    let started = Instant::now();
    let barrier = CompletionBarrier::new(tasks);

    for _ in 0..tasks {
        let counter = counter.clone();
        let guard = barrier.guard();
        tokio::spawn(async move {
            let _guard = guard;
            for _ in 0..increments {
                if let Err(err) = counter.increment().await {
                    warn!(error = %err, "increment failed");
                    return;
                }
            }
        });
    }

    barrier.wait().await;

    started.elapsed()
}

async fn pipeline(config: &ConduitConfig, values: Vec<i64>) {
    let capacity = config.stage.capacity;

    let source = generate(values.clone(), capacity);
    let squares = stage(source, capacity, |n| n * n);
    let doubled = stage(squares, capacity, |n| n * 2);

    let output = collect(doubled).await;
    info!(?values, ?output, "pipeline finished");
}

async fn fan(config: &ConduitConfig, outputs: usize, count: u64) {
    let capacity = config.stage.capacity;

    let source = generate(1..=count, capacity);
    let branches = fan_out_channels(source, outputs.max(1), capacity)
        .into_iter()
        .enumerate()
        .map(|(branch, input)| {
            stage(input, capacity, move |n| {
                info!(branch, value = n, "branch received value");
                n
            })
        })
        .collect();

    let merged = collect(fan_in(branches, capacity)).await;
    let sum: u64 = merged.iter().sum();
    info!(received = merged.len(), sum, "fan-out and fan-in finished");
}

async fn pool(config: &ConduitConfig, jobs: i64) -> Result<(), Box<dyn Error>> {
    let results = run_jobs(&config.pool, 1..=jobs, |n: i64| async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        Ok(n * n)
    })
    .await?;

    for result in &results {
        match &result.outcome {
            Ok(value) => info!(job_id = result.job_id, value, "job finished"),
            Err(err) => warn!(job_id = result.job_id, error = %err, "job failed"),
        }
    }
    info!(
        workers = config.pool.workers,
        results = results.len(),
        "worker pool finished"
    );

    Ok(())
}

async fn services(config: &ConduitConfig) -> Result<(), Box<dyn Error>> {
    let state = KeyedStateService::<String, i64>::spawn(config.service);
    state.set("apples".to_string(), 3).await?;
    state.set("pears".to_string(), 5).await?;
    let apples = state.get("apples".to_string()).await?;
    let plums = state.get("plums".to_string()).await?;
    let entries = state.len().await?;
    info!(?apples, ?plums, entries, "keyed state service answered");
    state.stop().await;

    let (request_tx, request_rx) = channel(0);
    let (response_tx, response_rx) = channel(0);
    let server = tokio::spawn(serve(request_rx, response_tx, |name: String| {
        format!("hello, {name}")
    }));

    for name in ["ada", "grace"] {
        request_tx.send(name.to_string()).await?;
        if let Some(response) = response_rx.recv().await {
            info!(%response, "request loop answered");
        }
    }
    request_tx.close();
    server.await??;

    Ok(())
}

async fn select() -> Result<(), Box<dyn Error>> {
    // A receive raced against a timer.
    let (slow_tx, slow_rx) = channel::<&str>(0);
    let slow = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(200)).await;
        slow_tx.send("late value").await
    });
    match slow_rx.recv_timeout(Duration::from_millis(50)).await {
        Err(err) if err.kind() == ErrorKind::Timeout => info!("receive timed out"),
        other => info!(?other, "receive finished before the timeout"),
    }
    let value = slow_rx.recv().await;
    info!(?value, "received after waiting longer");
    slow.await??;

    // A send that falls through to a default case when nobody is ready.
    let (tx, rx) = channel(1);
    for value in 0..3 {
        match tx.try_send(value) {
            Ok(()) => info!(value, "sent without waiting"),
            Err(TrySendError::Full(value)) => info!(value, "channel full, skipped"),
            Err(TrySendError::Disconnected(value)) => warn!(value, "nobody is listening"),
        }
    }
    info!(value = ?rx.try_recv().ok(), "drained buffered value");

    // Whichever of two channels is ready first wins.
    let (fast_tx, fast_rx) = channel(1);
    let (other_tx, other_rx) = channel::<&str>(1);
    fast_tx.send("fast").await?;
    tokio::select! {
        Some(value) = fast_rx.recv() => info!(value, "first channel won"),
        Some(value) = other_rx.recv() => info!(value, "second channel won"),
        else => warn!("both channels closed"),
    }
    other_tx.close();
    fast_tx.close();

    Ok(())
}

//! Fixed-size worker pool.
//!
//! Workers compete for [`Job`]s on one shared queue and publish one [`JobResult`] per job on a
//! shared result queue. Completion is tracked with a [`CompletionBarrier`]: a supervisor task
//! waits for every worker to signal it, closes the result queue and then joins the workers.
//!
//! The supervisor owns the workers, so dropping the [`WorkerPool`] handle never cancels jobs
//! that were already submitted. Their results are still delivered to every [`Receiver`]
//! obtained from [`WorkerPool::results`].

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use conduit_config::shared::PoolConfig;
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, error, info_span, warn};

use crate::concurrency::barrier::{CompletionBarrier, CompletionGuard};
use crate::concurrency::channel::{Receiver, Sender, channel};
use crate::concurrency::future::catch_panic;
use crate::error::{ConduitError, ConduitResult};
use crate::metrics::{CONDUIT_JOB_DURATION_SECONDS, CONDUIT_JOBS_PROCESSED_TOTAL, OUTCOME_LABEL};
use crate::pipeline::stage::collect;

/// Unit of work submitted to a [`WorkerPool`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job<P> {
    /// Caller chosen identifier, echoed in the [`JobResult`].
    pub id: u64,
    /// Input handed to the [`JobProcessor`].
    pub payload: P,
}

impl<P> Job<P> {
    /// Creates a job with the given id and payload.
    pub fn new(id: u64, payload: P) -> Self {
        Self { id, payload }
    }
}

/// Outcome of one [`Job`], tagged with the id of the job it belongs to.
#[derive(Debug, Clone)]
pub struct JobResult<U> {
    /// Id of the job this result belongs to.
    pub job_id: u64,
    /// Value computed by the processor, or why there is none.
    pub outcome: Result<U, JobError>,
}

impl<U> JobResult<U> {
    /// Returns `true` if the job produced a value.
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Reason a job did not produce a value.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// The processor returned an error.
    #[error("job failed: {0}")]
    Failed(#[source] ConduitError),

    /// The processor panicked. Holds the panic message.
    #[error("job panicked: {0}")]
    Panicked(String),
}

/// Computes the value of a job from its payload.
///
/// Implemented for every `Fn(P) -> impl Future<Output = ConduitResult<U>>` closure, so most
/// callers never implement it by hand.
pub trait JobProcessor<P, U>: Send + Sync + 'static {
    fn process(&self, payload: P) -> impl Future<Output = ConduitResult<U>> + Send;
}

impl<P, U, F, Fut> JobProcessor<P, U> for F
where
    F: Fn(P) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ConduitResult<U>> + Send,
{
    fn process(&self, payload: P) -> impl Future<Output = ConduitResult<U>> + Send {
        self(payload)
    }
}

/// Handle to a fixed-size pool of workers competing for jobs on a shared queue.
///
/// The coordinator protocol is:
///
/// 1. [`WorkerPool::submit`] every job, then [`WorkerPool::close_jobs`].
/// 2. Drain [`WorkerPool::results`] until it returns `None`. Workers exit once the job queue is
///    drained; after the last one signaled the completion barrier the result queue is closed.
/// 3. Optionally [`WorkerPool::wait`] to surface worker level failures.
///
/// Results must be drained while jobs are being submitted whenever more jobs than the queue
/// capacities can hold are in flight, otherwise the workers stall on a full result queue.
pub struct WorkerPool<P, U> {
    jobs: Sender<Job<P>>,
    results: Receiver<JobResult<U>>,
    workers: usize,
    supervisor: JoinHandle<ConduitResult<()>>,
}

impl<P, U> WorkerPool<P, U>
where
    P: Send + 'static,
    U: Send + 'static,
{
    /// Spawns `config.workers` workers running `processor` and returns the pool.
    ///
    /// Fails with [`crate::error::ErrorKind::ConfigError`] if the configuration is invalid.
    pub fn start<Pr>(config: &PoolConfig, processor: Pr) -> ConduitResult<Self>
    where
        Pr: JobProcessor<P, U>,
    {
        config.validate()?;

        let (jobs_tx, jobs_rx) = channel(config.job_capacity);
        let (results_tx, results_rx) = channel(config.result_capacity);
        let barrier = CompletionBarrier::new(config.workers);
        let processor = Arc::new(processor);

        let mut workers = JoinSet::new();
        for worker_id in 0..config.workers {
            let worker = run_worker(
                worker_id,
                jobs_rx.clone(),
                results_tx.clone(),
                processor.clone(),
                barrier.guard(),
            );
            let span = info_span!("worker", worker_id);
            workers.spawn(worker.instrument(span));
        }

        let span = info_span!("worker_pool", workers = config.workers);
        let supervisor = tokio::spawn(supervise(workers, barrier, results_tx).instrument(span));

        debug!(workers = config.workers, "worker pool started");

        Ok(Self {
            jobs: jobs_tx,
            results: results_rx,
            workers: config.workers,
            supervisor,
        })
    }

    /// Queues `job`, waiting while the job queue is full.
    ///
    /// # Panics
    ///
    /// Panics if [`WorkerPool::close_jobs`] was already called.
    pub async fn submit(&self, job: Job<P>) -> ConduitResult<()> {
        self.jobs.send(job).await
    }

    /// Returns a sender for submitting jobs from other tasks.
    pub fn jobs(&self) -> Sender<Job<P>> {
        self.jobs.clone()
    }

    /// Signals that no more jobs will be submitted.
    ///
    /// # Panics
    ///
    /// Panics if called more than once.
    pub fn close_jobs(&self) {
        self.jobs.close();
    }

    /// Returns the result queue. It ends once every worker has exited.
    pub fn results(&self) -> Receiver<JobResult<U>> {
        self.results.clone()
    }

    /// Returns the number of workers in the pool.
    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Waits for every worker to exit.
    ///
    /// Errors of individual workers, such as the result queue losing its consumers, are
    /// collected and returned together. Dropping the pool instead of waiting leaves the workers
    /// running until the job queue is drained.
    pub async fn wait(self) -> ConduitResult<()> {
        self.supervisor.await?
    }
}

impl<P, U> fmt::Debug for WorkerPool<P, U> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.workers)
            .field("jobs", &self.jobs)
            .finish()
    }
}

/// Closes the result queue once every worker signaled completion, then joins the workers.
async fn supervise<U>(
    mut workers: JoinSet<ConduitResult<()>>,
    barrier: CompletionBarrier,
    results: Sender<JobResult<U>>,
) -> ConduitResult<()> {
    barrier.wait().await;
    results.close();

    debug!("all workers finished, result queue closed");

    let mut errors = Vec::new();
    while let Some(result) = workers.join_next().await {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(err)) => {
                error!(error = %err, "worker exited with error");
                errors.push(err);
            }
            Err(join_err) => {
                error!(error = %join_err, "worker task failed");
                errors.push(join_err.into());
            }
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.into())
    }
}

/// Runs every payload of `payloads` through a fresh pool and returns all results.
///
/// Jobs are numbered from zero in iteration order. Results arrive in completion order.
pub async fn run_jobs<P, U, I, Pr>(
    config: &PoolConfig,
    payloads: I,
    processor: Pr,
) -> ConduitResult<Vec<JobResult<U>>>
where
    P: Send + 'static,
    U: Send + 'static,
    I: IntoIterator<Item = P>,
    Pr: JobProcessor<P, U>,
{
    let pool = WorkerPool::start(config, processor)?;
    let collector = tokio::spawn(collect(pool.results()));

    for (id, payload) in (0u64..).zip(payloads) {
        pool.submit(Job::new(id, payload)).await?;
    }
    pool.close_jobs();

    pool.wait().await?;
    let results = collector.await?;

    Ok(results)
}

async fn run_worker<P, U, Pr>(
    worker_id: usize,
    jobs: Receiver<Job<P>>,
    results: Sender<JobResult<U>>,
    processor: Arc<Pr>,
    completion: CompletionGuard,
) -> ConduitResult<()>
where
    Pr: JobProcessor<P, U>,
{
    // Dropped on every exit path, including unwinding.
    let _completion = completion;
    let mut processed = 0u64;

    debug!("worker started");

    while let Some(Job { id: job_id, payload }) = jobs.recv().await {
        let started = Instant::now();

        // The call happens inside the wrapped future so a panic while building the future is
        // caught as well.
        let outcome = catch_panic(async { processor.process(payload).await }).await;
        let (outcome, label) = match outcome {
            Ok(Ok(value)) => (Ok(value), "ok"),
            Ok(Err(err)) => {
                warn!(job_id, error = %err, "job failed");
                (Err(JobError::Failed(err)), "failed")
            }
            Err(message) => {
                error!(job_id, panic = %message, "job panicked, worker continues");
                (Err(JobError::Panicked(message)), "panicked")
            }
        };

        counter!(CONDUIT_JOBS_PROCESSED_TOTAL, OUTCOME_LABEL => label).increment(1);
        histogram!(CONDUIT_JOB_DURATION_SECONDS).record(started.elapsed().as_secs_f64());

        if let Err(err) = results.send(JobResult { job_id, outcome }).await {
            error!(worker_id, job_id, "result queue has no consumers, worker exits");
            return Err(err);
        }

        processed += 1;
    }

    debug!(processed, "worker finished");

    Ok(())
}

use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use conduit::error::{ConduitError, ConduitResult, ErrorKind};
use conduit::test_utils::notify::TimedNotify;
use conduit::test_utils::timeout::with_test_timeout;
use conduit::workers::pool::{Job, JobError, WorkerPool, run_jobs};
use conduit::{bail, conduit_error};
use conduit_config::shared::PoolConfig;
use conduit_telemetry::tracing::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn three_workers_square_one_through_nine() {
    init_test_tracing();

    let config = PoolConfig::with_workers(3);
    let results = with_test_timeout(run_jobs(&config, 1..=9i64, |n: i64| async move {
        Ok(n * n)
    }))
    .await
    .unwrap();

    let mut squares: Vec<_> = results
        .into_iter()
        .map(|result| result.outcome.unwrap())
        .collect();
    squares.sort_unstable();

    assert_eq!(squares, vec![1, 4, 9, 16, 25, 36, 49, 64, 81]);
}

#[tokio::test(flavor = "multi_thread")]
async fn job_count_matches_result_count_for_any_pool_size() {
    init_test_tracing();

    for workers in [1, 2, 7] {
        for jobs in [0u64, 1, 50] {
            let config = PoolConfig {
                workers,
                job_capacity: 0,
                result_capacity: 0,
            };
            let processed = Arc::new(AtomicUsize::new(0));

            let counter = processed.clone();
            let results = with_test_timeout(run_jobs(&config, 0..jobs, move |n: u64| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok(n)
                }
            }))
            .await
            .unwrap();

            assert_eq!(results.len() as u64, jobs);
            assert_eq!(processed.load(Ordering::SeqCst) as u64, jobs);
            let ids: HashSet<_> = results.iter().map(|result| result.job_id).collect();
            assert_eq!(ids, (0..jobs).collect::<HashSet<_>>());
        }
    }
}

async fn fragile(n: u32) -> ConduitResult<u32> {
    if n % 5 == 0 {
        bail!(ErrorKind::JobFailed, "Multiples of five are rejected", n);
    }
    if n == 7 {
        panic!("seven is unlucky");
    }

    Ok(n)
}

#[tokio::test(flavor = "multi_thread")]
async fn faulty_jobs_do_not_take_the_pool_down() {
    init_test_tracing();

    let results = with_test_timeout(run_jobs(&PoolConfig::with_workers(2), 1..=20u32, fragile))
        .await
        .unwrap();

    assert_eq!(results.len(), 20);

    let failed = results
        .iter()
        .filter(|result| matches!(result.outcome, Err(JobError::Failed(_))))
        .count();
    let panicked = results
        .iter()
        .filter(|result| matches!(result.outcome, Err(JobError::Panicked(_))))
        .count();
    let succeeded = results.iter().filter(|result| result.is_ok()).count();

    assert_eq!(failed, 4);
    assert_eq!(panicked, 1);
    assert_eq!(succeeded, 15);
}

#[tokio::test(flavor = "multi_thread")]
async fn results_stay_open_until_every_worker_finished() {
    init_test_tracing();

    let started = TimedNotify::new();
    let release = TimedNotify::new();

    let processor = {
        let started = started.clone();
        let release = release.clone();
        move |n: u8| {
            let started = started.clone();
            let release = release.clone();
            async move {
                if n == 1 {
                    started.notify();
                    release.notified().await;
                }
                Ok::<_, ConduitError>(n)
            }
        }
    };

    let pool = WorkerPool::start(&PoolConfig::with_workers(2), processor).unwrap();
    let results = pool.results();

    pool.submit(Job::new(0, 0)).await.unwrap();
    pool.submit(Job::new(1, 1)).await.unwrap();
    pool.close_jobs();

    started.notified().await;
    let first = with_test_timeout(results.recv()).await.unwrap();
    assert_eq!(first.job_id, 0);

    // One worker is still busy, so the result queue must not be closed yet.
    assert!(
        results
            .recv_timeout(std::time::Duration::from_millis(50))
            .await
            .is_err()
    );

    release.notify();
    let second = with_test_timeout(results.recv()).await.unwrap();
    assert_eq!(second.job_id, 1);
    assert!(with_test_timeout(results.recv()).await.is_none());

    with_test_timeout(pool.wait()).await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn zero_workers_is_a_config_error() {
    init_test_tracing();

    let err = WorkerPool::<u8, u8>::start(&PoolConfig::with_workers(0), |n: u8| async move {
        Err(conduit_error!(ErrorKind::JobFailed, "Never runs", n))
    })
    .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ConfigError);
}

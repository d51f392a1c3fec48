use std::sync::Arc;

use conduit::concurrency::barrier::CompletionBarrier;
use conduit::state::counter::{Counter, MutexCounter};
use conduit::state::counter_service::CounterService;
use conduit::test_utils::timeout::with_test_timeout;
use conduit_config::shared::ServiceConfig;
use conduit_telemetry::tracing::init_test_tracing;

const TASKS: usize = 10;
const INCREMENTS: usize = 1000;

/// Runs `TASKS` tasks doing `INCREMENTS` increments each and returns the final value.
async fn hammer<C>(counter: Arc<C>) -> i64
where
    C: Counter + 'static,
{
    let barrier = CompletionBarrier::new(TASKS);

    for _ in 0..TASKS {
        let counter = counter.clone();
        let guard = barrier.guard();
        tokio::spawn(async move {
            let _guard = guard;
            for _ in 0..INCREMENTS {
                counter.increment().await.unwrap();
            }
        });
    }

    with_test_timeout(barrier.wait()).await;

    counter.value().await.unwrap()
}

#[tokio::test(flavor = "multi_thread")]
async fn mutex_counter_never_loses_updates() {
    init_test_tracing();

    let value = hammer(Arc::new(MutexCounter::default())).await;

    assert_eq!(value, (TASKS * INCREMENTS) as i64);
}

#[tokio::test(flavor = "multi_thread")]
async fn counter_service_never_loses_updates() {
    init_test_tracing();

    let counter = Arc::new(CounterService::spawn(0, ServiceConfig::default()));
    let value = hammer(counter.clone()).await;

    assert_eq!(value, (TASKS * INCREMENTS) as i64);
    with_test_timeout(counter.stop()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn both_disciplines_agree_on_mixed_additions() {
    init_test_tracing();

    let mutex = Arc::new(MutexCounter::new(100));
    let service = Arc::new(CounterService::spawn(100, ServiceConfig { request_capacity: 16 }));

    let mut tasks = Vec::new();
    for n in -5..5i64 {
        let mutex = mutex.clone();
        let service = service.clone();
        tasks.push(tokio::spawn(async move {
            Counter::add(mutex.as_ref(), n).await.unwrap();
            Counter::add(service.as_ref(), n).await.unwrap();
        }));
    }

    for task in tasks {
        task.await.unwrap();
    }

    assert_eq!(mutex.value(), 95);
    assert_eq!(service.get().await.unwrap(), 95);
    with_test_timeout(service.stop()).await;
}

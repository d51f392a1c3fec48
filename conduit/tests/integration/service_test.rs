use std::sync::mpsc as std_mpsc;
use std::time::Duration;

use conduit::concurrency::channel::channel;
use conduit::error::ErrorKind;
use conduit::state::echo::serve;
use conduit::state::keyed::KeyedStateService;
use conduit::state::service::{self, RequestHandler, ServiceState};
use conduit::test_utils::notify::TimedNotify;
use conduit::test_utils::timeout::with_test_timeout;
use conduit_config::shared::ServiceConfig;
use conduit_telemetry::tracing::init_test_tracing;

/// Bank account whose balance may never go negative.
struct Account {
    balance: u64,
}

enum AccountOp {
    Deposit(u64),
    Withdraw(u64),
    Balance,
}

impl RequestHandler for Account {
    type Request = AccountOp;
    type Reply = Result<u64, u64>;

    fn handle(&mut self, op: AccountOp) -> Result<u64, u64> {
        match op {
            AccountOp::Deposit(amount) => self.balance += amount,
            AccountOp::Withdraw(amount) if amount > self.balance => return Err(self.balance),
            AccountOp::Withdraw(amount) => self.balance -= amount,
            AccountOp::Balance => {}
        }

        Ok(self.balance)
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn concurrent_withdrawals_never_overdraw() {
    init_test_tracing();

    let account = service::spawn("account", Account { balance: 100 }, ServiceConfig::default());

    let mut tasks = Vec::new();
    for _ in 0..50 {
        let account = account.clone();
        tasks.push(tokio::spawn(async move {
            account.request(AccountOp::Withdraw(3)).await.unwrap().is_ok()
        }));
    }

    let mut granted = 0;
    for task in tasks {
        if with_test_timeout(task).await.unwrap() {
            granted += 1;
        }
    }

    assert_eq!(granted, 33);
    assert_eq!(account.request(AccountOp::Balance).await.unwrap(), Ok(1));

    account.request(AccountOp::Deposit(9)).await.unwrap().unwrap();
    assert_eq!(account.request(AccountOp::Balance).await.unwrap(), Ok(10));

    with_test_timeout(account.stop()).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn stopped_keyed_service_rejects_new_requests() {
    init_test_tracing();

    let state = KeyedStateService::<String, u32>::spawn(ServiceConfig { request_capacity: 4 });
    for (i, key) in ["a", "b", "c"].into_iter().enumerate() {
        state.set(key.to_string(), i as u32).await.unwrap();
    }

    with_test_timeout(state.stop()).await;

    let err = state.get("a".to_string()).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceStopped);
}

/// Blocks on the first request until released, then echoes every request.
struct Gated {
    entered: TimedNotify,
    gate: std_mpsc::Receiver<()>,
    blocked: bool,
}

impl RequestHandler for Gated {
    type Request = u32;
    type Reply = u32;

    fn handle(&mut self, n: u32) -> u32 {
        if !self.blocked {
            self.blocked = true;
            self.entered.notify();
            self.gate
                .recv_timeout(Duration::from_secs(5))
                .expect("gate was never opened");
        }

        n
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_drains_requests_accepted_before_it() {
    init_test_tracing();

    let entered = TimedNotify::new();
    let (open_gate, gate) = std_mpsc::channel();
    let gated = service::spawn(
        "gated",
        Gated {
            entered: entered.clone(),
            gate,
            blocked: false,
        },
        ServiceConfig { request_capacity: 8 },
    );

    let mut pending = Vec::new();
    let first = gated.clone();
    pending.push(tokio::spawn(async move { first.request(0).await }));
    entered.notified().await;

    // The handler is stuck on request 0, so these wait in the buffered inbox.
    for n in 1..=4 {
        let gated = gated.clone();
        pending.push(tokio::spawn(async move { gated.request(n).await }));
    }
    tokio::time::sleep(Duration::from_millis(50)).await;

    let stopping = tokio::spawn({
        let gated = gated.clone();
        async move { gated.stop().await }
    });
    with_test_timeout(async {
        while gated.state() != ServiceState::Stopping {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await;

    let err = gated.request(99).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceStopped);

    open_gate.send(()).unwrap();

    let mut replies = Vec::new();
    for request in pending {
        replies.push(with_test_timeout(request).await.unwrap().unwrap());
    }
    replies.sort_unstable();
    assert_eq!(replies, vec![0, 1, 2, 3, 4]);

    with_test_timeout(stopping).await.unwrap();
    assert_eq!(gated.state(), ServiceState::Stopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn stop_through_one_handle_is_seen_by_every_clone() {
    init_test_tracing();

    let account = service::spawn("account", Account { balance: 0 }, ServiceConfig::default());
    let observer = account.clone();
    assert_eq!(observer.state(), ServiceState::Running);

    with_test_timeout(account.stop()).await;

    assert_eq!(observer.state(), ServiceState::Stopped);
    let err = observer.request(AccountOp::Balance).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ServiceStopped);
}

#[tokio::test(flavor = "multi_thread")]
async fn echo_loop_answers_in_order_and_closes() {
    init_test_tracing();

    let (request_tx, request_rx) = channel(2);
    let (response_tx, response_rx) = channel(2);
    let server = tokio::spawn(serve(request_rx, response_tx, |n: u32| n * n));

    for n in 1..=4 {
        request_tx.send(n).await.unwrap();
        assert_eq!(with_test_timeout(response_rx.recv()).await, Some(n * n));
    }
    request_tx.close();

    assert_eq!(with_test_timeout(response_rx.recv()).await, None);
    with_test_timeout(server).await.unwrap().unwrap();
}

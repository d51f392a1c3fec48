use conduit::concurrency::channel::channel;
use conduit::pipeline::stage::{collect, generate, stage};
use conduit::test_utils::timeout::with_test_timeout;
use conduit_telemetry::tracing::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn square_then_double_preserves_order() {
    init_test_tracing();

    let numbers = generate(vec![2i64, 3, 4, 5], 0);
    let squares = stage(numbers, 0, |n| n * n);
    let doubled = stage(squares, 0, |n| n * 2);

    let output = with_test_timeout(collect(doubled)).await;

    assert_eq!(output, vec![8, 18, 32, 50]);
}

#[tokio::test(flavor = "multi_thread")]
async fn long_chain_preserves_order_for_any_capacity() {
    init_test_tracing();

    for capacity in [0, 1, 16] {
        let mut current = generate(0..500u64, capacity);
        for _ in 0..5 {
            current = stage(current, capacity, |n| n + 1);
        }

        let output = with_test_timeout(collect(current)).await;
        assert_eq!(output, (5..505).collect::<Vec<_>>());
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn closing_the_source_cascades_to_the_sink() {
    init_test_tracing();

    let (source_tx, source_rx) = channel(0);
    let first = stage(source_rx, 0, |s: String| s.to_uppercase());
    let second = stage(first, 0, |s: String| format!("<{s}>"));

    let producer = tokio::spawn(async move {
        for word in ["go", "rust"] {
            source_tx.send(word.to_string()).await.unwrap();
        }
        source_tx.close();
    });

    let output = with_test_timeout(collect(second)).await;
    producer.await.unwrap();

    assert_eq!(output, vec!["<GO>", "<RUST>"]);
}

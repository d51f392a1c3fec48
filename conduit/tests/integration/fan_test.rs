use std::collections::HashMap;

use conduit::concurrency::channel::channel;
use conduit::pipeline::fan::{fan_in, fan_out_channels};
use conduit::pipeline::stage::{collect, generate, stage};
use conduit::test_utils::timeout::with_test_timeout;
use conduit_telemetry::tracing::init_test_tracing;

#[tokio::test(flavor = "multi_thread")]
async fn fan_out_then_fan_in_delivers_every_value_once() {
    init_test_tracing();

    let source = generate(1..=1000u32, 0);
    let branches = fan_out_channels(source, 4, 0)
        .into_iter()
        .map(|branch| stage(branch, 0, |n| n * 3))
        .collect();
    let merged = fan_in(branches, 0);

    let output = with_test_timeout(collect(merged)).await;

    assert_eq!(output.len(), 1000);
    let mut counts: HashMap<u32, usize> = HashMap::new();
    for value in output {
        *counts.entry(value).or_default() += 1;
    }
    assert_eq!(counts.len(), 1000);
    assert!(counts.iter().all(|(value, count)| value % 3 == 0 && *count == 1));
}

#[tokio::test(flavor = "multi_thread")]
async fn fan_out_outputs_add_up_to_the_input() {
    init_test_tracing();

    let source = generate(0..600u32, 4);
    let outputs = fan_out_channels(source, 3, 2);

    let consumers: Vec<_> = outputs
        .into_iter()
        .map(|output| tokio::spawn(collect(output)))
        .collect();

    let mut total = 0;
    for consumer in consumers {
        let received = with_test_timeout(consumer).await.unwrap();
        // Each output sees its share in source order.
        assert!(received.windows(2).all(|pair| pair[0] < pair[1]));
        total += received.len();
    }

    assert_eq!(total, 600);
}

#[tokio::test(flavor = "multi_thread")]
async fn fan_in_of_two_sources_yields_a_plus_b() {
    init_test_tracing();

    let a = generate(vec!["a"; 7], 0);
    let b = generate(vec!["b"; 11], 3);

    let merged = with_test_timeout(collect(fan_in(vec![a, b], 0))).await;

    assert_eq!(merged.len(), 18);
    assert_eq!(merged.iter().filter(|s| **s == "a").count(), 7);
    assert_eq!(merged.iter().filter(|s| **s == "b").count(), 11);
}

#[tokio::test(flavor = "multi_thread")]
async fn fan_in_keeps_duplicates_across_sources() {
    init_test_tracing();

    let (a_tx, a_rx) = channel(1);
    let (b_tx, b_rx) = channel(1);
    let merged = fan_in(vec![a_rx, b_rx], 4);

    tokio::spawn(async move {
        a_tx.send(1).await.unwrap();
        a_tx.close();
    });
    tokio::spawn(async move {
        b_tx.send(1).await.unwrap();
        b_tx.close();
    });

    assert_eq!(with_test_timeout(collect(merged)).await, vec![1, 1]);
}

use std::time::Duration;

use barfeed::config::Settings;
use barfeed::error::OrderRequestError;
use barfeed::execution::PositionTracker;
use barfeed::feed::{BarOutcome, FeedAdapter};
use barfeed::stream::{ScriptedSource, SinglePartition};
use rust_decimal::Decimal;

fn quick_settings() -> Settings {
    Settings {
        poll_timeout_seconds: 0.01,
        ..Settings::default()
    }
}

fn bar(close: i64, minute: u32) -> String {
    format!(
        r#"{{"T":"b","S":"FAKEPACA","o":"{c}","h":"{c}","l":"{c}","c":"{c}","v":"10","t":"2024-01-01T00:{m:02}:00Z"}}"#,
        c = close,
        m = minute
    )
}

async fn drain(adapter: &mut FeedAdapter<ScriptedSource>, max_calls: usize) -> Vec<Decimal> {
    let mut closes = Vec::new();
    for _ in 0..max_calls {
        match adapter.next_bar().await {
            BarOutcome::Ready(bar) => closes.push(bar.close),
            BarOutcome::Pending => {}
            other => panic!("unexpected outcome {:?}", other),
        }
    }
    closes
}

#[tokio::test]
async fn test_order_preserved_across_batches() {
    let source = ScriptedSource::new();
    let producer = source.clone();
    let mut adapter = FeedAdapter::open(source, &quick_settings(), &SinglePartition)
        .await
        .unwrap();

    producer.push_batch(0, format!("[{},{}]", bar(1, 0), bar(2, 1)));
    producer.push_batch(0, format!("[{}]", bar(3, 2)));
    producer.push_batch(0, format!("[{},{},{}]", bar(4, 3), bar(5, 4), bar(6, 5)));

    let closes = drain(&mut adapter, 8).await;
    let expected: Vec<Decimal> = (1..=6).map(|c| Decimal::new(c, 0)).collect();
    assert_eq!(closes, expected);
}

#[tokio::test]
async fn test_malformed_record_dropped_not_failed() {
    let source = ScriptedSource::new();
    let producer = source.clone();
    let mut adapter = FeedAdapter::open(source, &quick_settings(), &SinglePartition)
        .await
        .unwrap();

    let no_close = r#"{"T":"b","o":"1","h":"1","l":"1","v":"1","t":"2024-01-01T00:00:00Z"}"#;
    producer.push_batch(0, format!("[{},{},{}]", bar(7, 0), no_close, bar(8, 1)));

    let mut ready = 0;
    let mut failed = 0;
    for _ in 0..4 {
        match adapter.next_bar().await {
            BarOutcome::Ready(_) => ready += 1,
            BarOutcome::Failed(_) => failed += 1,
            _ => {}
        }
    }
    assert_eq!(ready, 2);
    assert_eq!(failed, 0);
    assert_eq!(adapter.stats().records_dropped, 1);
}

#[tokio::test]
async fn test_quiet_topic_is_pending_and_bounded() {
    let source = ScriptedSource::new();
    let mut adapter = FeedAdapter::open(source, &quick_settings(), &SinglePartition)
        .await
        .unwrap();

    for _ in 0..10 {
        let started = std::time::Instant::now();
        assert!(matches!(adapter.next_bar().await, BarOutcome::Pending));
        assert!(started.elapsed() < Duration::from_secs(1));
    }
    // One poll per call, never more
    assert_eq!(adapter.stats().polls, 10);
}

#[test]
fn test_at_most_one_pending_order() {
    let mut tracker = PositionTracker::new();
    let first = tracker.request_buy(10).unwrap();

    for attempt in 0..5 {
        let result = if attempt % 2 == 0 {
            tracker.request_buy(10)
        } else {
            tracker.request_sell(10)
        };
        match result {
            Err(OrderRequestError::InFlight(e)) => assert_eq!(e.pending, first.id),
            other => panic!("expected OrderInFlight, got {:?}", other),
        }
    }
    assert_eq!(tracker.pending_order(), Some(first));
}

#[test]
fn test_open_with_blocking_runtime() {
    let source = ScriptedSource::new();
    let observer = source.clone();
    let adapter = tokio_test::block_on(FeedAdapter::open(source, &quick_settings(), &SinglePartition))
        .unwrap();
    drop(adapter);
    assert!(observer.is_closed());
}

//! Outbound portfolio snapshots.
//!
//! Snapshots go out as compact JSON
//! `{"portfolio_value","cash","position_size","position_price","datetime"}`.
//! `publish` returns only after the sink has acknowledged, so the order of
//! snapshots on the output topic is the order of the bars that produced them.

pub mod channel;
pub mod redis;

use std::future::Future;

use crate::error::PublishError;
use crate::models::PortfolioSnapshot;

pub use channel::ChannelSink;
pub use self::redis::RedisStreamSink;

/// One serialized snapshot with its position in the output sequence
#[derive(Debug, Clone, PartialEq)]
pub struct SnapshotEnvelope {
    pub sequence: u64,
    pub snapshot: PortfolioSnapshot,
    pub payload: String,
}

/// Destination for serialized snapshots
pub trait SnapshotSink: Send {
    /// Deliver one envelope, resolving once the destination has it
    fn send(
        &mut self,
        envelope: &SnapshotEnvelope,
    ) -> impl Future<Output = Result<(), PublishError>> + Send;

    /// Where the snapshots end up, for logging
    fn destination(&self) -> &str;
}

pub struct SnapshotPublisher<K: SnapshotSink> {
    sink: K,
    next_sequence: u64,
}

impl<K: SnapshotSink> SnapshotPublisher<K> {
    pub fn new(sink: K) -> Self {
        Self {
            sink,
            next_sequence: 1,
        }
    }

    /// Serialize and send a snapshot, waiting for the sink to acknowledge
    ///
    /// Returns the sequence number assigned to the snapshot. A failed send
    /// does not consume a sequence number.
    pub async fn publish(&mut self, snapshot: &PortfolioSnapshot) -> Result<u64, PublishError> {
        let envelope = SnapshotEnvelope {
            sequence: self.next_sequence,
            snapshot: snapshot.clone(),
            payload: serde_json::to_string(snapshot)?,
        };

        self.sink.send(&envelope).await?;
        self.next_sequence += 1;

        tracing::debug!(
            sequence = envelope.sequence,
            destination = self.sink.destination(),
            value = %snapshot.value,
            "Published snapshot"
        );
        Ok(envelope.sequence)
    }

    /// Snapshots published so far
    pub fn published(&self) -> u64 {
        self.next_sequence - 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use tokio::sync::mpsc;

    fn snapshot(cash: i64) -> PortfolioSnapshot {
        PortfolioSnapshot::initial(
            Decimal::new(cash, 0),
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        )
    }

    #[tokio::test]
    async fn test_publish_assigns_increasing_sequence() {
        let (tx, mut rx) = mpsc::channel(8);
        let mut publisher = SnapshotPublisher::new(ChannelSink::new(tx));

        assert_eq!(publisher.publish(&snapshot(1)).await.unwrap(), 1);
        assert_eq!(publisher.publish(&snapshot(2)).await.unwrap(), 2);
        assert_eq!(publisher.published(), 2);

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        assert_eq!(first.sequence, 1);
        assert_eq!(second.snapshot.cash, Decimal::new(2, 0));
    }

    #[tokio::test]
    async fn test_payload_is_compact_wire_json() {
        let (tx, mut rx) = mpsc::channel(1);
        let mut publisher = SnapshotPublisher::new(ChannelSink::new(tx));
        publisher.publish(&snapshot(100000)).await.unwrap();

        let envelope = rx.recv().await.unwrap();
        assert_eq!(
            envelope.payload,
            r#"{"portfolio_value":100000.0,"cash":100000.0,"position_size":0,"position_price":0.0,"datetime":"2024-01-01T00:00:00"}"#
        );
    }

    #[tokio::test]
    async fn test_closed_channel_is_an_error() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let mut publisher = SnapshotPublisher::new(ChannelSink::new(tx));

        assert!(matches!(
            publisher.publish(&snapshot(1)).await,
            Err(PublishError::ChannelClosed)
        ));
        assert_eq!(publisher.published(), 0);
    }
}

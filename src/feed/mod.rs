//! Pull-based bar feed over a push-based stream source.
//!
//! The adapter owns its `StreamSource` and turns each poll into at most one
//! `BarOutcome`: a batch that yields several bars is buffered and drained one
//! call at a time, strictly in arrival order.

pub mod buffer;
pub mod decode;

use std::collections::BTreeSet;
use std::time::Duration;

use crate::config::{EndOfPartitionPolicy, PartitionStrategyKind, Settings};
use crate::error::{ConnectionError, FeedError, TransientPollError};
use crate::models::BarRecord;
use crate::stream::{
    KeyHashPartitioner, Partition, PartitionStrategy, PollResult, SinglePartition, StreamSource,
};
use crate::telemetry::FeedStats;

pub use buffer::PendingBuffer;
pub use decode::{decode_batch, parse_record, RecordOutcome};

/// Result of one `next_bar` call
#[derive(Debug)]
pub enum BarOutcome {
    Ready(BarRecord),
    /// Nothing available right now; ask again later
    Pending,
    /// Stream finished for good
    Ended,
    Failed(FeedError),
}

/// Strategy object for the configured symbol to partition mapping
pub fn partition_strategy(kind: PartitionStrategyKind) -> Box<dyn PartitionStrategy> {
    match kind {
        PartitionStrategyKind::Single => Box::new(SinglePartition),
        PartitionStrategyKind::KeyHash => Box::new(KeyHashPartitioner),
    }
}

pub struct FeedAdapter<S: StreamSource> {
    source: S,
    buffer: PendingBuffer,
    poll_timeout: Duration,
    validate_ohlc: bool,
    eof_policy: EndOfPartitionPolicy,
    // Partitions that hit EOF with nothing delivered since
    at_eof: BTreeSet<Partition>,
    ended: bool,
    stats: FeedStats,
}

impl<S: StreamSource> FeedAdapter<S> {
    /// Assign the partitions covering the configured stocks and wrap the source
    ///
    /// # Arguments
    /// * `source` - connected stream source, owned by the adapter from now on
    /// * `settings` - stocks, partition count, timeouts and feed policies
    /// * `strategy` - symbol to partition mapping
    pub async fn open(
        mut source: S,
        settings: &Settings,
        strategy: &dyn PartitionStrategy,
    ) -> Result<Self, ConnectionError> {
        let partitions = strategy.partitions_for(&settings.stocks, settings.total_partitions);
        source.assign_partitions(&partitions).await?;

        tracing::info!(
            topic = %settings.topic,
            strategy = strategy.name(),
            partitions = ?partitions,
            "Feed opened"
        );

        Ok(Self {
            source,
            buffer: PendingBuffer::new(),
            poll_timeout: settings.poll_timeout(),
            validate_ohlc: settings.validate_ohlc,
            eof_policy: settings.end_of_partition,
            at_eof: BTreeSet::new(),
            ended: false,
            stats: FeedStats::default(),
        })
    }

    /// Next bar in arrival order, polling the source at most once
    pub async fn next_bar(&mut self) -> BarOutcome {
        if let Some(bar) = self.buffer.pop() {
            return self.deliver(bar);
        }
        if self.ended {
            return BarOutcome::Ended;
        }

        self.stats.polls += 1;
        match self.source.poll(self.poll_timeout).await {
            PollResult::NoMessage => BarOutcome::Pending,
            PollResult::EndOfPartition(partition) => self.on_end_of_partition(partition),
            PollResult::Error(cause) => {
                self.stats.poll_errors += 1;
                tracing::warn!(error = %cause, "Poll failed");
                BarOutcome::Failed(FeedError::Poll(TransientPollError {
                    message: cause.to_string(),
                }))
            }
            PollResult::Message { payload, partition } => {
                self.stats.messages += 1;
                self.at_eof.remove(&partition);
                self.ingest(&payload, partition)
            }
        }
    }

    fn ingest(&mut self, payload: &[u8], partition: Partition) -> BarOutcome {
        let records = match decode_batch(payload) {
            Ok(records) => records,
            Err(e) => {
                self.stats.decode_errors += 1;
                tracing::warn!(partition, error = %e, "Skipping undecodable batch");
                return BarOutcome::Failed(FeedError::Decode(e));
            }
        };

        for (index, record) in records.iter().enumerate() {
            match parse_record(record, self.validate_ohlc) {
                RecordOutcome::Bar(bar) => self.buffer.push(bar),
                RecordOutcome::Ignored { kind } => {
                    self.stats.records_ignored += 1;
                    tracing::debug!(partition, index, kind = ?kind, "Ignoring non-bar record");
                }
                RecordOutcome::Dropped(e) => {
                    self.stats.records_dropped += 1;
                    tracing::warn!(partition, index, error = %e, "Dropping malformed bar");
                }
            }
        }

        match self.buffer.pop() {
            Some(bar) => self.deliver(bar),
            None => BarOutcome::Pending,
        }
    }

    fn on_end_of_partition(&mut self, partition: Partition) -> BarOutcome {
        self.stats.end_of_partition += 1;
        tracing::debug!(partition, "Reached end of partition");

        if self.eof_policy == EndOfPartitionPolicy::Transient {
            return BarOutcome::Pending;
        }

        self.at_eof.insert(partition);
        let assigned = self.source.assignment();
        if !assigned.is_empty() && assigned.iter().all(|p| self.at_eof.contains(p)) {
            tracing::info!(partitions = ?assigned, "All partitions exhausted, feed ended");
            self.ended = true;
            return BarOutcome::Ended;
        }
        BarOutcome::Pending
    }

    fn deliver(&mut self, bar: BarRecord) -> BarOutcome {
        self.stats.bars_delivered += 1;
        BarOutcome::Ready(bar)
    }

    pub fn stats(&self) -> FeedStats {
        FeedStats {
            buffer_high_water: self.buffer.high_water(),
            ..self.stats
        }
    }

    /// Bars parsed but not yet handed out
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_ended(&self) -> bool {
        self.ended
    }

    /// Close the underlying source
    pub fn close(&mut self) {
        self.source.close();
    }
}

impl<S: StreamSource> Drop for FeedAdapter<S> {
    fn drop(&mut self) {
        self.source.close();
    }
}

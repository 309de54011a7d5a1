use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, SubsecRound, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use tokio::time::Instant;

use super::{Partition, PollResult, SourceError, StreamSource};
use crate::error::ConnectionError;

/// Generates a random-walk bar stream in the inbound wire format
///
/// Stands in for a vendor test stream: each poll yields one JSON batch with a
/// single bar per symbol, occasionally accompanied by a non-bar record.
pub struct SyntheticSource {
    rng: StdRng,
    symbols: Vec<String>,
    prices: Vec<f64>,
    next_timestamp: DateTime<Utc>,
    interval: ChronoDuration,
    emit_every: Duration,
    next_emit: Option<Instant>,
    remaining_batches: Option<usize>,
    assignment: Vec<Partition>,
    cursor: usize,
    closed: bool,
}

impl SyntheticSource {
    /// Create a generator with a seed for reproducibility
    ///
    /// # Arguments
    /// * `seed` - RNG seed
    /// * `symbols` - symbols emitted in every batch
    /// * `interval_minutes` - bar spacing in stream time
    pub fn new(seed: u64, symbols: Vec<String>, interval_minutes: i64) -> Self {
        let prices = vec![150.0; symbols.len()];
        Self {
            rng: StdRng::seed_from_u64(seed),
            symbols,
            prices,
            next_timestamp: Utc::now().trunc_subsecs(0),
            interval: ChronoDuration::minutes(interval_minutes.max(1)),
            emit_every: Duration::ZERO,
            next_emit: None,
            remaining_batches: None,
            assignment: Vec::new(),
            cursor: 0,
            closed: false,
        }
    }

    /// Wall-clock pause between batches
    ///
    /// The pace is kept across polls, so a poll timeout shorter than the
    /// pace yields `NoMessage` until the next batch is due.
    pub fn with_pace(mut self, emit_every: Duration) -> Self {
        self.emit_every = emit_every;
        self
    }

    /// Stop after `batches`; afterwards every poll reports end-of-partition
    pub fn with_limit(mut self, batches: usize) -> Self {
        self.remaining_batches = Some(batches);
        self
    }

    pub fn starting_at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.next_timestamp = timestamp.trunc_subsecs(0);
        self
    }

    fn next_batch(&mut self) -> Vec<u8> {
        let timestamp = self.next_timestamp;
        self.next_timestamp += self.interval;

        let mut records = Vec::with_capacity(self.symbols.len() + 1);
        for (symbol, price) in self.symbols.iter().zip(self.prices.iter_mut()) {
            let open = *price;
            // ±1% per bar, floored at half the start price
            let close = (open * (1.0 + self.rng.gen_range(-0.01..0.01))).max(75.0);
            let high = open.max(close) * (1.0 + self.rng.gen_range(0.0..0.003));
            let low = open.min(close) * (1.0 - self.rng.gen_range(0.0..0.003));
            let volume = self.rng.gen_range(100..5_000);
            *price = close;

            records.push(json!({
                "T": "b",
                "S": symbol,
                "o": format!("{:.2}", open),
                "h": format!("{:.2}", high),
                "l": format!("{:.2}", low),
                "c": format!("{:.2}", close),
                "v": volume,
                "t": timestamp.format("%Y-%m-%dT%H:%M:%SZ").to_string(),
            }));
        }

        if self.rng.gen_bool(0.2) {
            records.push(json!({ "T": "success", "msg": "heartbeat" }));
        }

        serde_json::to_vec(&records).unwrap_or_default()
    }
}

impl StreamSource for SyntheticSource {
    async fn assign_partitions(&mut self, partitions: &[Partition]) -> Result<(), ConnectionError> {
        if self.closed {
            return Err(ConnectionError::NotConnected);
        }
        self.assignment = partitions.to_vec();
        self.cursor = 0;
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> PollResult {
        if self.closed {
            return PollResult::Error(SourceError::Closed);
        }
        if self.assignment.is_empty() {
            return PollResult::Error(SourceError::NotAssigned);
        }

        let partition = self.assignment[self.cursor % self.assignment.len()];
        self.cursor += 1;

        if self.remaining_batches == Some(0) {
            return PollResult::EndOfPartition(partition);
        }

        if !self.emit_every.is_zero() {
            let now = Instant::now();
            let due = *self.next_emit.get_or_insert(now + self.emit_every);
            if due > now {
                tokio::time::sleep_until(due.min(now + timeout)).await;
                if Instant::now() < due {
                    return PollResult::NoMessage;
                }
            }
            // No bursts after falling behind
            self.next_emit = Some((due + self.emit_every).max(Instant::now()));
        }

        if let Some(remaining) = self.remaining_batches.as_mut() {
            *remaining -= 1;
        }

        PollResult::Message {
            payload: self.next_batch(),
            partition,
        }
    }

    fn close(&mut self) {
        self.closed = true;
    }

    fn assignment(&self) -> &[Partition] {
        &self.assignment
    }
}

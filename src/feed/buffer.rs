use std::collections::VecDeque;

use crate::models::BarRecord;

/// FIFO of parsed bars waiting for the consumer
///
/// Only fully parsed, validated bars ever enter the buffer.
#[derive(Debug, Default)]
pub struct PendingBuffer {
    bars: VecDeque<BarRecord>,
    high_water: usize,
}

impl PendingBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a bar behind everything already queued
    pub fn push(&mut self, bar: BarRecord) {
        self.bars.push_back(bar);
        self.high_water = self.high_water.max(self.bars.len());
    }

    /// Take the oldest bar
    pub fn pop(&mut self) -> Option<BarRecord> {
        self.bars.pop_front()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    /// Largest backlog seen since creation
    pub fn high_water(&self) -> usize {
        self.high_water
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use rust_decimal::Decimal;

    fn create_test_bar(minute: i64, close: i64) -> BarRecord {
        let price = Decimal::new(close, 0);
        BarRecord {
            symbol: Some("SOL".to_string()),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::minutes(minute),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: Decimal::new(1000, 0),
        }
    }

    #[test]
    fn test_new_buffer() {
        let buffer = PendingBuffer::new();
        assert!(buffer.is_empty());
        assert_eq!(buffer.high_water(), 0);
    }

    #[test]
    fn test_fifo_order() {
        let mut buffer = PendingBuffer::new();
        buffer.push(create_test_bar(0, 100));
        buffer.push(create_test_bar(1, 101));
        buffer.push(create_test_bar(2, 102));

        assert_eq!(buffer.pop().unwrap().close, Decimal::new(100, 0));
        assert_eq!(buffer.pop().unwrap().close, Decimal::new(101, 0));
        assert_eq!(buffer.pop().unwrap().close, Decimal::new(102, 0));
        assert!(buffer.pop().is_none());
    }

    #[test]
    fn test_high_water_mark() {
        let mut buffer = PendingBuffer::new();
        for i in 0..4 {
            buffer.push(create_test_bar(i, 100 + i));
        }
        buffer.pop();
        buffer.pop();
        buffer.push(create_test_bar(5, 105));

        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.high_water(), 4);
    }
}

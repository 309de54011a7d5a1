use std::collections::VecDeque;

use rust_decimal::Decimal;

use super::DecisionPolicy;
use crate::execution::Position;
use crate::indicators::calculate_sma;
use crate::models::{BarRecord, Side};

/// Close-versus-SMA policy
///
/// Flat and close above the average: buy. Holding and close below: sell.
/// Silent until `period` closes have been seen.
#[derive(Debug, Clone)]
pub struct SmaCrossover {
    period: usize,
    closes: VecDeque<Decimal>,
}

impl SmaCrossover {
    pub fn new(period: usize) -> Self {
        let period = period.max(1);
        Self {
            period,
            closes: VecDeque::with_capacity(period),
        }
    }

    pub fn period(&self) -> usize {
        self.period
    }
}

impl DecisionPolicy for SmaCrossover {
    fn on_bar(&mut self, bar: &BarRecord, position: &Position) -> Option<Side> {
        if self.closes.len() == self.period {
            self.closes.pop_front();
        }
        self.closes.push_back(bar.close);

        let sma = calculate_sma(self.closes.make_contiguous(), self.period)?;

        if position.size == 0 && bar.close > sma {
            tracing::debug!(close = %bar.close, sma = %sma, "Close crossed above SMA");
            Some(Side::Buy)
        } else if position.size != 0 && bar.close < sma {
            tracing::debug!(close = %bar.close, sma = %sma, "Close crossed below SMA");
            Some(Side::Sell)
        } else {
            None
        }
    }

    fn name(&self) -> &str {
        "sma_crossover"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn create_test_bar(close: i64) -> BarRecord {
        let price = Decimal::new(close, 0);
        BarRecord {
            symbol: None,
            timestamp: Utc::now(),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: Decimal::ONE,
        }
    }

    fn long() -> Position {
        Position {
            size: 10,
            average_price: Decimal::new(100, 0),
        }
    }

    #[test]
    fn test_silent_until_window_full() {
        let mut policy = SmaCrossover::new(3);
        let flat = Position::default();
        assert_eq!(policy.on_bar(&create_test_bar(100), &flat), None);
        assert_eq!(policy.on_bar(&create_test_bar(200), &flat), None);
        assert!(policy.on_bar(&create_test_bar(300), &flat).is_some());
    }

    #[test]
    fn test_buy_above_sma_when_flat() {
        let mut policy = SmaCrossover::new(3);
        let flat = Position::default();
        policy.on_bar(&create_test_bar(100), &flat);
        policy.on_bar(&create_test_bar(100), &flat);
        // SMA 110, close 130
        assert_eq!(policy.on_bar(&create_test_bar(130), &flat), Some(Side::Buy));
    }

    #[test]
    fn test_sell_below_sma_when_holding() {
        let mut policy = SmaCrossover::new(3);
        policy.on_bar(&create_test_bar(100), &long());
        policy.on_bar(&create_test_bar(100), &long());
        // SMA ~93.3, close 80
        assert_eq!(policy.on_bar(&create_test_bar(80), &long()), Some(Side::Sell));
    }

    #[test]
    fn test_hold_when_no_cross() {
        let mut policy = SmaCrossover::new(2);
        policy.on_bar(&create_test_bar(100), &long());
        // Holding, close above SMA
        assert_eq!(policy.on_bar(&create_test_bar(120), &long()), None);
    }

    #[test]
    fn test_window_slides() {
        let mut policy = SmaCrossover::new(2);
        let flat = Position::default();
        policy.on_bar(&create_test_bar(500), &flat);
        policy.on_bar(&create_test_bar(100), &flat);
        // Window is now [100, 90]; SMA 95, close 90 below
        assert_eq!(policy.on_bar(&create_test_bar(90), &flat), None);
        // [90, 120]; SMA 105, close 120 above
        assert_eq!(policy.on_bar(&create_test_bar(120), &flat), Some(Side::Buy));
    }
}

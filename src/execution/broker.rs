use rust_decimal::Decimal;

use crate::models::{BarRecord, OrderNotification, OrderStatus, PendingOrder, Side};

/// Simulated broker: market orders fill at the next bar's open
///
/// Holds cash only. Position accounting belongs to the tracker, which learns
/// about fills through the notifications returned here.
#[derive(Debug)]
pub struct PaperBroker {
    cash: Decimal,
    commission_rate: Decimal,
    resting: Option<PendingOrder>,
    commission_paid: Decimal,
}

impl PaperBroker {
    /// # Arguments
    /// * `initial_cash` - starting cash balance
    /// * `commission_rate` - fraction of notional charged per fill
    pub fn new(initial_cash: Decimal, commission_rate: Decimal) -> Self {
        Self {
            cash: initial_cash,
            commission_rate,
            resting: None,
            commission_paid: Decimal::ZERO,
        }
    }

    pub fn cash(&self) -> Decimal {
        self.cash
    }

    pub fn commission_paid(&self) -> Decimal {
        self.commission_paid
    }

    pub fn resting_order(&self) -> Option<PendingOrder> {
        self.resting
    }

    /// Accept a market order for execution on the next bar
    ///
    /// Returns the Submitted and Accepted notifications. A resting order is
    /// replaced (and reported Canceled) if one is still there.
    pub fn submit(&mut self, order: PendingOrder) -> Vec<OrderNotification> {
        let mut notifications = Vec::with_capacity(3);
        if let Some(previous) = self.resting.take() {
            tracing::warn!(order_id = %previous.id, "Replacing resting order");
            notifications.push(notice(&previous, OrderStatus::Canceled));
        }

        tracing::debug!(order_id = %order.id, side = ?order.side, size = order.requested_size, "Order submitted");
        notifications.push(notice(&order, OrderStatus::Submitted));
        notifications.push(notice(&order, OrderStatus::Accepted));
        self.resting = Some(order);
        notifications
    }

    /// Execute the resting order, if any, at `bar.open`
    pub fn on_bar(&mut self, bar: &BarRecord) -> Option<OrderNotification> {
        let order = self.resting.take()?;
        let price = bar.open;

        let Some((notional, commission, cash_after)) = self.settle(&order, price) else {
            tracing::warn!(order_id = %order.id, price = %price, "Order rejected: fill amount overflows");
            return Some(notice(&order, OrderStatus::Rejected));
        };

        if order.side == Side::Buy && cash_after < Decimal::ZERO {
            tracing::warn!(
                order_id = %order.id,
                notional = %notional,
                commission = %commission,
                cash = %self.cash,
                "Order rejected: insufficient cash"
            );
            return Some(notice(&order, OrderStatus::Rejected));
        }

        self.cash = cash_after;
        self.commission_paid = self.commission_paid.saturating_add(commission);

        Some(OrderNotification {
            order_id: order.id,
            status: OrderStatus::Completed,
            side: order.side,
            filled_size: order.requested_size,
            fill_price: price,
            commission,
        })
    }

    /// Notional, commission and resulting cash; None if any step overflows
    fn settle(&self, order: &PendingOrder, price: Decimal) -> Option<(Decimal, Decimal, Decimal)> {
        let notional = Decimal::from(order.requested_size).checked_mul(price)?;
        let commission = notional.checked_mul(self.commission_rate)?;
        let cash_after = match order.side {
            Side::Buy => self.cash.checked_sub(notional)?.checked_sub(commission)?,
            Side::Sell => self.cash.checked_add(notional)?.checked_sub(commission)?,
        };
        Some((notional, commission, cash_after))
    }

    /// Withdraw the resting order
    pub fn cancel(&mut self) -> Option<OrderNotification> {
        let order = self.resting.take()?;
        tracing::info!(order_id = %order.id, "Order canceled");
        Some(notice(&order, OrderStatus::Canceled))
    }
}

fn notice(order: &PendingOrder, status: OrderStatus) -> OrderNotification {
    OrderNotification {
        order_id: order.id,
        status,
        side: order.side,
        filled_size: 0,
        fill_price: Decimal::ZERO,
        commission: Decimal::ZERO,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::str::FromStr;
    use uuid::Uuid;

    fn d(raw: &str) -> Decimal {
        Decimal::from_str(raw).unwrap()
    }

    fn create_test_bar(open: &str) -> BarRecord {
        BarRecord {
            symbol: None,
            timestamp: Utc.with_ymd_and_hms(2024, 1, 1, 0, 1, 0).unwrap(),
            open: d(open),
            high: d(open),
            low: d(open),
            close: d(open),
            volume: d("100"),
        }
    }

    fn order(side: Side, size: i64) -> PendingOrder {
        PendingOrder {
            id: Uuid::new_v4(),
            side,
            requested_size: size,
        }
    }

    #[test]
    fn test_no_order_no_fill() {
        let mut broker = PaperBroker::new(d("1000"), Decimal::ZERO);
        assert!(broker.on_bar(&create_test_bar("10")).is_none());
        assert_eq!(broker.cash(), d("1000"));
    }

    #[test]
    fn test_buy_fills_at_open() {
        let mut broker = PaperBroker::new(d("100000"), Decimal::ZERO);
        let buy = order(Side::Buy, 10);
        let acks = broker.submit(buy);
        assert_eq!(acks.len(), 2);
        assert_eq!(acks[1].status, OrderStatus::Accepted);

        let fill = broker.on_bar(&create_test_bar("10.5")).unwrap();
        assert_eq!(fill.status, OrderStatus::Completed);
        assert_eq!(fill.order_id, buy.id);
        assert_eq!(fill.filled_size, 10);
        assert_eq!(fill.fill_price, d("10.5"));
        assert_eq!(broker.cash(), d("99895"));
        assert!(broker.resting_order().is_none());
    }

    #[test]
    fn test_sell_credits_cash_minus_commission() {
        let mut broker = PaperBroker::new(d("1000"), d("0.01"));
        broker.submit(order(Side::Sell, 10));

        let fill = broker.on_bar(&create_test_bar("20")).unwrap();
        assert_eq!(fill.commission, d("2"));
        assert_eq!(broker.cash(), d("1198"));
        assert_eq!(broker.commission_paid(), d("2"));
    }

    #[test]
    fn test_buy_beyond_cash_rejected() {
        let mut broker = PaperBroker::new(d("100"), d("0.01"));
        broker.submit(order(Side::Buy, 10));

        // 100 notional + 1 commission > 100 cash
        let result = broker.on_bar(&create_test_bar("10")).unwrap();
        assert_eq!(result.status, OrderStatus::Rejected);
        assert_eq!(broker.cash(), d("100"));
    }

    #[test]
    fn test_overflowing_fill_rejected() {
        let mut broker = PaperBroker::new(d("100000"), Decimal::ZERO);
        broker.submit(order(Side::Buy, 10));
        let result = broker.on_bar(&create_test_bar("79228162514264337593543950335")).unwrap();
        assert_eq!(result.status, OrderStatus::Rejected);

        broker.submit(order(Side::Sell, 10));
        let result = broker.on_bar(&create_test_bar("79228162514264337593543950335")).unwrap();
        assert_eq!(result.status, OrderStatus::Rejected);
        assert_eq!(broker.cash(), d("100000"));
    }

    #[test]
    fn test_cancel_resting_order() {
        let mut broker = PaperBroker::new(d("1000"), Decimal::ZERO);
        let buy = order(Side::Buy, 1);
        broker.submit(buy);

        let canceled = broker.cancel().unwrap();
        assert_eq!(canceled.status, OrderStatus::Canceled);
        assert_eq!(canceled.order_id, buy.id);
        assert!(broker.cancel().is_none());
        assert!(broker.on_bar(&create_test_bar("10")).is_none());
    }
}

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::error::{OrderInFlight, OrderRequestError};
use crate::models::{OrderNotification, OrderStatus, PendingOrder, Side};

/// Direction of the current holding, derived from the signed size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionState {
    Flat,
    Long,
    Short,
}

/// Signed size and weighted-average entry price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Position {
    pub size: i64,
    pub average_price: Decimal, // zero when flat
}

impl Position {
    pub fn state(&self) -> PositionState {
        match self.size.signum() {
            1 => PositionState::Long,
            -1 => PositionState::Short,
            _ => PositionState::Flat,
        }
    }
}

/// Tracks the position and the single order allowed in flight
///
/// The position only moves on a Completed notification for the pending order.
#[derive(Debug, Default)]
pub struct PositionTracker {
    position: Position,
    pending: Option<PendingOrder>,
    realized_pnl: Decimal,
    orders_completed: u64,
    orders_failed: u64,
}

impl PositionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn position(&self) -> Position {
        self.position
    }

    pub fn pending_order(&self) -> Option<PendingOrder> {
        self.pending
    }

    pub fn has_pending_order(&self) -> bool {
        self.pending.is_some()
    }

    /// Realized P&L booked on reductions, before commission
    pub fn realized_pnl(&self) -> Decimal {
        self.realized_pnl
    }

    pub fn orders_completed(&self) -> u64 {
        self.orders_completed
    }

    /// Canceled plus rejected orders
    pub fn orders_failed(&self) -> u64 {
        self.orders_failed
    }

    pub fn request_buy(&mut self, size: i64) -> Result<PendingOrder, OrderRequestError> {
        self.request(Side::Buy, size)
    }

    pub fn request_sell(&mut self, size: i64) -> Result<PendingOrder, OrderRequestError> {
        self.request(Side::Sell, size)
    }

    fn request(&mut self, side: Side, size: i64) -> Result<PendingOrder, OrderRequestError> {
        if let Some(pending) = self.pending {
            return Err(OrderInFlight { pending: pending.id }.into());
        }
        if size <= 0 {
            return Err(OrderRequestError::InvalidSize(size));
        }

        let order = PendingOrder {
            id: Uuid::new_v4(),
            side,
            requested_size: size,
        };
        self.pending = Some(order);
        Ok(order)
    }

    /// Apply a broker notification
    ///
    /// Ignores non-terminal statuses and notifications for any order other
    /// than the pending one.
    pub fn on_order_notification(&mut self, notification: &OrderNotification) {
        let Some(pending) = self.pending else {
            tracing::warn!(order_id = %notification.order_id, "Notification with no order pending, ignoring");
            return;
        };
        if pending.id != notification.order_id {
            tracing::warn!(
                order_id = %notification.order_id,
                pending = %pending.id,
                "Notification for unknown order, ignoring"
            );
            return;
        }
        if !notification.status.is_terminal() {
            tracing::debug!(order_id = %pending.id, status = ?notification.status, "Order status update");
            return;
        }

        match notification.status {
            OrderStatus::Completed => {
                let signed = notification.side.sign() * notification.filled_size;
                self.apply_fill(signed, notification.fill_price);
                self.orders_completed += 1;
                tracing::info!(
                    side = ?notification.side,
                    size = notification.filled_size,
                    price = %notification.fill_price,
                    position = self.position.size,
                    avg_price = %self.position.average_price,
                    "Order completed"
                );
            }
            status => {
                self.orders_failed += 1;
                tracing::warn!(order_id = %pending.id, status = ?status, "Order did not fill");
            }
        }

        self.pending = None;
    }

    fn apply_fill(&mut self, signed_qty: i64, price: Decimal) {
        let Position {
            size,
            average_price,
        } = self.position;

        if signed_qty == 0 {
            return;
        }

        if size == 0 || size.signum() == signed_qty.signum() {
            // Opening or adding: blend the entry price
            let held = Decimal::from(size.abs());
            let added = Decimal::from(signed_qty.abs());
            let blended = held
                .checked_mul(average_price)
                .zip(added.checked_mul(price))
                .and_then(|(held_cost, added_cost)| held_cost.checked_add(added_cost))
                .and_then(|cost| cost.checked_div(held + added));
            self.position.average_price = blended.unwrap_or_else(|| {
                tracing::warn!(price = %price, "Average price overflows, using fill price");
                price
            });
            self.position.size = size + signed_qty;
            return;
        }

        // Reducing, closing or flipping
        let closing = size.abs().min(signed_qty.abs());
        let pnl = Decimal::from(closing * size.signum()).saturating_mul(price - average_price);
        self.realized_pnl = self.realized_pnl.saturating_add(pnl);

        let new_size = size + signed_qty;
        self.position.size = new_size;
        self.position.average_price = if new_size == 0 {
            Decimal::ZERO
        } else if new_size.signum() == size.signum() {
            average_price
        } else {
            price
        };
    }
}

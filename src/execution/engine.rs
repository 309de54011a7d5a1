use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::watch;

use crate::config::{PollErrorPolicy, Settings};
use crate::error::{FeedError, OrderRequestError};
use crate::execution::{PaperBroker, Position, PositionTracker};
use crate::feed::{BarOutcome, FeedAdapter};
use crate::models::{BarRecord, PendingOrder, PortfolioSnapshot, Side};
use crate::publish::{SnapshotPublisher, SnapshotSink};
use crate::strategy::DecisionPolicy;
use crate::stream::StreamSource;
use crate::telemetry::FeedStats;

/// Lifecycle of the execution loop. Faulted is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Starting,
    Streaming,
    Stopped,
    Faulted,
}

/// Final metrics returned when the loop exits
#[derive(Debug, Clone, PartialEq)]
pub struct RunSummary {
    pub final_state: LoopState,
    pub bars_processed: u64,
    /// Bars whose portfolio valuation overflowed
    pub bars_dropped: u64,
    pub snapshots_published: u64,
    pub orders_completed: u64,
    /// Includes an order still resting at exit, which is canceled
    pub orders_failed: u64,
    pub unfilled_order: Option<PendingOrder>,
    pub cash: Decimal,
    pub position: Position,
    pub value: Decimal,
    pub realized_pnl: Decimal,
    pub commission_paid: Decimal,
    pub feed: FeedStats,
}

/// Single-threaded consumer: one bar is fully processed before the next
pub struct ExecutionLoop<S: StreamSource, K: SnapshotSink> {
    feed: FeedAdapter<S>,
    tracker: PositionTracker,
    broker: PaperBroker,
    policy: Box<dyn DecisionPolicy>,
    publisher: SnapshotPublisher<K>,
    stake: i64,
    poll_error_policy: PollErrorPolicy,
    idle_backoff: std::time::Duration,
    stop: watch::Receiver<bool>,
    snapshots: watch::Sender<PortfolioSnapshot>,
    state: LoopState,
    bars_processed: u64,
    bars_dropped: u64,
    last_snapshot: Option<PortfolioSnapshot>,
}

impl<S: StreamSource, K: SnapshotSink> ExecutionLoop<S, K> {
    /// # Arguments
    /// * `feed` - opened feed; partitions already assigned
    /// * `publisher` - snapshot publisher over a connected sink
    /// * `stop` - raised to `true` to stop between iterations
    /// * `snapshots` - receives every published snapshot
    pub fn new(
        settings: &Settings,
        feed: FeedAdapter<S>,
        policy: Box<dyn DecisionPolicy>,
        publisher: SnapshotPublisher<K>,
        stop: watch::Receiver<bool>,
        snapshots: watch::Sender<PortfolioSnapshot>,
    ) -> Self {
        Self {
            feed,
            tracker: PositionTracker::new(),
            broker: PaperBroker::new(settings.initial_cash, settings.commission_rate),
            policy,
            publisher,
            stake: settings.stake,
            poll_error_policy: settings.poll_error_policy,
            idle_backoff: settings.idle_backoff(),
            stop,
            snapshots,
            state: LoopState::Starting,
            bars_processed: 0,
            bars_dropped: 0,
            last_snapshot: None,
        }
    }

    pub fn state(&self) -> LoopState {
        self.state
    }

    /// Drive the feed until stopped, ended or faulted
    pub async fn run(mut self) -> RunSummary {
        self.transition(LoopState::Streaming);

        loop {
            if self.stop_requested() {
                tracing::info!("Stop requested");
                self.transition(LoopState::Stopped);
                break;
            }

            match self.feed.next_bar().await {
                BarOutcome::Ready(bar) => self.on_bar(bar).await,
                BarOutcome::Pending => {
                    if self.idle().await {
                        tracing::info!("Stop requested while idle");
                        self.transition(LoopState::Stopped);
                        break;
                    }
                }
                BarOutcome::Ended => {
                    self.transition(LoopState::Stopped);
                    self.publish_final().await;
                    break;
                }
                BarOutcome::Failed(FeedError::Decode(e)) => {
                    tracing::warn!(error = %e, "Batch skipped");
                }
                BarOutcome::Failed(FeedError::Poll(e)) => match self.poll_error_policy {
                    PollErrorPolicy::Continue => tracing::warn!(error = %e, "Poll failed, continuing"),
                    PollErrorPolicy::Escalate => {
                        tracing::error!(error = %e, "Poll failed, escalating");
                        self.transition(LoopState::Faulted);
                        break;
                    }
                },
            }
        }

        self.shutdown()
    }

    async fn on_bar(&mut self, bar: BarRecord) {
        // Order left from the previous bar executes at this bar's open
        if let Some(notification) = self.broker.on_bar(&bar) {
            self.tracker.on_order_notification(&notification);
        }

        let Some(snapshot) = self.snapshot(bar.close, bar.timestamp) else {
            self.bars_dropped += 1;
            tracing::warn!(
                close = %bar.close,
                position = self.tracker.position().size,
                "Bar dropped: portfolio valuation overflows"
            );
            return;
        };
        self.bars_processed += 1;
        self.last_snapshot = Some(snapshot.clone());

        tracing::info!(
            bar = self.bars_processed,
            symbol = bar.symbol.as_deref().unwrap_or("-"),
            close = %bar.close,
            value = %snapshot.value,
            cash = %snapshot.cash,
            position = snapshot.position_size,
            "Processed bar"
        );
        self.publish(snapshot).await;

        let position = self.tracker.position();
        let Some(side) = self.policy.on_bar(&bar, &position) else {
            return;
        };

        let request = match side {
            Side::Buy => self.tracker.request_buy(self.stake),
            Side::Sell => self.tracker.request_sell(self.stake),
        };
        match request {
            Ok(order) => {
                tracing::info!(order_id = %order.id, side = ?side, size = order.requested_size, "Order requested");
                for notification in self.broker.submit(order) {
                    self.tracker.on_order_notification(&notification);
                }
            }
            Err(OrderRequestError::InFlight(e)) => {
                tracing::debug!(side = ?side, error = %e, "Intent skipped");
            }
            Err(e) => tracing::warn!(side = ?side, error = %e, "Order request refused"),
        }
    }

    /// None when the holding's market value does not fit a Decimal
    fn snapshot(&self, close: Decimal, timestamp: DateTime<Utc>) -> Option<PortfolioSnapshot> {
        let position = self.tracker.position();
        let cash = self.broker.cash();
        let value = Decimal::from(position.size)
            .checked_mul(close)
            .and_then(|holding| cash.checked_add(holding))?;
        Some(PortfolioSnapshot {
            value,
            cash,
            position_size: position.size,
            position_price: position.average_price,
            timestamp,
        })
    }

    async fn publish(&mut self, snapshot: PortfolioSnapshot) {
        if let Err(e) = self.publisher.publish(&snapshot).await {
            tracing::warn!(error = %e, "Failed to publish snapshot");
        }
        self.snapshots.send_replace(snapshot);
    }

    async fn publish_final(&mut self) {
        let snapshot = match &self.last_snapshot {
            Some(last) => last.clone(),
            None => PortfolioSnapshot::initial(self.broker.cash(), Utc::now()),
        };
        self.publish(snapshot).await;
    }

    /// Back off while the topic is quiet; true if stop was raised meanwhile
    async fn idle(&mut self) -> bool {
        let changed = tokio::select! {
            _ = tokio::time::sleep(self.idle_backoff) => return false,
            changed = self.stop.changed() => changed,
        };
        changed.is_err() || *self.stop.borrow()
    }

    /// A dropped handle counts as a stop request
    fn stop_requested(&self) -> bool {
        *self.stop.borrow() || self.stop.has_changed().is_err()
    }

    fn transition(&mut self, next: LoopState) {
        if self.state == LoopState::Faulted || self.state == next {
            return;
        }
        tracing::info!(from = ?self.state, to = ?next, "Execution loop state change");
        self.state = next;
    }

    fn shutdown(mut self) -> RunSummary {
        self.feed.close();

        // No bar will come to fill it
        let unfilled_order = self.broker.resting_order();
        if let Some(notification) = self.broker.cancel() {
            self.tracker.on_order_notification(&notification);
        }

        let position = self.tracker.position();
        let value = self
            .last_snapshot
            .as_ref()
            .map_or(self.broker.cash(), |last| last.value);

        let summary = RunSummary {
            final_state: self.state,
            bars_processed: self.bars_processed,
            bars_dropped: self.bars_dropped,
            snapshots_published: self.publisher.published(),
            orders_completed: self.tracker.orders_completed(),
            orders_failed: self.tracker.orders_failed(),
            unfilled_order,
            cash: self.broker.cash(),
            position,
            value,
            realized_pnl: self.tracker.realized_pnl(),
            commission_paid: self.broker.commission_paid(),
            feed: self.feed.stats(),
        };

        tracing::info!(
            state = ?summary.final_state,
            value = %summary.value,
            cash = %summary.cash,
            position = summary.position.size,
            bars = summary.bars_processed,
            orders = summary.orders_completed,
            "Execution loop finished"
        );
        summary.feed.log_summary();
        summary
    }
}

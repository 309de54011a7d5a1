use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One normalized OHLCV price bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarRecord {
    pub symbol: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

/// Order direction
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn sign(&self) -> i64 {
        match self {
            Side::Buy => 1,
            Side::Sell => -1,
        }
    }
}

/// The single order allowed to be in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingOrder {
    pub id: Uuid,
    pub side: Side,
    pub requested_size: i64,
}

/// Broker-side order lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderStatus {
    Submitted,
    Accepted,
    Completed,
    Canceled,
    Rejected,
}

impl OrderStatus {
    /// Completed, Canceled and Rejected end the order's life
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Canceled | OrderStatus::Rejected
        )
    }
}

/// Status update for an order, as reported by the broker
#[derive(Debug, Clone, PartialEq)]
pub struct OrderNotification {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub side: Side,
    pub filled_size: i64,
    pub fill_price: Decimal,
    pub commission: Decimal,
}

/// Point-in-time view of the portfolio, built once per processed bar
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    #[serde(rename = "portfolio_value", with = "rust_decimal::serde::float")]
    pub value: Decimal,
    #[serde(with = "rust_decimal::serde::float")]
    pub cash: Decimal,
    pub position_size: i64,
    #[serde(with = "rust_decimal::serde::float")]
    pub position_price: Decimal,
    #[serde(rename = "datetime", with = "naive_seconds")]
    pub timestamp: DateTime<Utc>,
}

impl PortfolioSnapshot {
    /// Snapshot of an untouched portfolio
    pub fn initial(cash: Decimal, timestamp: DateTime<Utc>) -> Self {
        Self {
            value: cash,
            cash,
            position_size: 0,
            position_price: Decimal::ZERO,
            timestamp,
        }
    }
}

/// `YYYY-MM-DDTHH:MM:SS` without a zone suffix
mod naive_seconds {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

    pub fn serialize<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(&ts.naive_utc().format(FORMAT))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}

//! Layered settings for the feed and the execution loop.
//!
//! Sources, lowest precedence first: built-in defaults, an optional TOML file,
//! then `BARFEED__*` environment variables (`BARFEED__STAKE=20`,
//! `BARFEED__STOCKS=AAPL,MSFT`).

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;

use crate::error::ConfigError;

/// Which decision policy drives the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionPolicyKind {
    AlwaysFlipOnBar,
    SmaCrossover,
}

/// How symbols map onto topic partitions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartitionStrategyKind {
    /// Every symbol on partition 0
    Single,
    /// murmur2(symbol) modulo the partition count
    KeyHash,
}

/// What an end-of-partition event means to the feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndOfPartitionPolicy {
    /// More data may arrive later; keep polling
    Transient,
    /// Stream is finished once every assigned partition reports EOF
    Terminate,
}

/// What a non-EOF poll error does to the loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollErrorPolicy {
    Continue,
    Escalate,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub topic: String,
    pub consumer_group: String,
    pub consumer_name: String,
    pub servers: Vec<String>,
    pub poll_timeout_seconds: f64,
    pub connect_timeout_seconds: f64,
    pub stocks: Vec<String>,
    pub total_partitions: i32,
    pub partition_strategy: PartitionStrategyKind,
    pub partition_eof: bool,
    pub stake: i64,
    pub initial_cash: Decimal,
    pub commission_rate: Decimal,
    pub decision_policy: DecisionPolicyKind,
    pub sma_period: usize,
    pub output_topic: String,
    pub end_of_partition: EndOfPartitionPolicy,
    pub poll_error_policy: PollErrorPolicy,
    pub validate_ohlc: bool,
    pub idle_backoff_ms: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            topic: "stock_data".to_string(),
            consumer_group: "backtrader-group".to_string(),
            consumer_name: "barfeed-1".to_string(),
            servers: vec!["localhost:6379".to_string()],
            poll_timeout_seconds: 1.0,
            connect_timeout_seconds: 5.0,
            stocks: vec!["FAKEPACA".to_string()],
            total_partitions: 1,
            partition_strategy: PartitionStrategyKind::Single,
            partition_eof: true,
            stake: 10,
            initial_cash: Decimal::new(100_000, 0),
            commission_rate: Decimal::ZERO,
            decision_policy: DecisionPolicyKind::AlwaysFlipOnBar,
            sma_period: 5,
            output_topic: "portfolio_data".to_string(),
            end_of_partition: EndOfPartitionPolicy::Transient,
            poll_error_policy: PollErrorPolicy::Continue,
            validate_ohlc: true,
            idle_backoff_ms: 50,
        }
    }
}

impl Settings {
    /// Load settings from the optional file and the environment
    ///
    /// # Arguments
    /// * `path` - TOML file to layer over the defaults; must exist when given
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(File::from(path).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("BARFEED")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("servers")
                .with_list_parse_key("stocks")
                .try_parsing(true)
                .ignore_empty(true),
        );

        let settings: Settings = builder.build()?.try_deserialize()?;
        Ok(settings)
    }

    /// Reject settings the loop cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic);
        }
        if self.servers.iter().all(|s| s.trim().is_empty()) {
            return Err(ConfigError::NoServers);
        }
        if !(self.poll_timeout_seconds.is_finite() && self.poll_timeout_seconds > 0.0) {
            return Err(ConfigError::InvalidPollTimeout(self.poll_timeout_seconds));
        }
        if !(self.connect_timeout_seconds.is_finite() && self.connect_timeout_seconds > 0.0) {
            return Err(ConfigError::InvalidConnectTimeout(self.connect_timeout_seconds));
        }
        if self.stocks.is_empty() {
            return Err(ConfigError::NoStocks);
        }
        if self.total_partitions < 1 {
            return Err(ConfigError::InvalidPartitionCount(self.total_partitions));
        }
        if self.stake <= 0 {
            return Err(ConfigError::InvalidStake(self.stake));
        }
        if self.initial_cash.is_sign_negative() {
            return Err(ConfigError::NegativeCash);
        }
        if self.commission_rate.is_sign_negative() || self.commission_rate >= Decimal::ONE {
            return Err(ConfigError::InvalidCommission);
        }
        if self.sma_period == 0 {
            return Err(ConfigError::InvalidSmaPeriod);
        }
        Ok(())
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.poll_timeout_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.connect_timeout_seconds)
    }

    pub fn idle_backoff(&self) -> Duration {
        Duration::from_millis(self.idle_backoff_ms)
    }
}

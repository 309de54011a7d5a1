// Error taxonomy for the feed, the execution loop and the engine handle
use thiserror::Error;
use uuid::Uuid;

/// Invalid or unloadable settings. Fatal at startup, raised before any
/// connection attempt.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("topic must be specified")]
    EmptyTopic,

    #[error("at least one server must be configured")]
    NoServers,

    #[error("poll timeout must be a positive number of seconds, got {0}")]
    InvalidPollTimeout(f64),

    #[error("connect timeout must be a positive number of seconds, got {0}")]
    InvalidConnectTimeout(f64),

    #[error("stake must be positive, got {0}")]
    InvalidStake(i64),

    #[error("initial cash must not be negative")]
    NegativeCash,

    #[error("commission rate must be within [0, 1)")]
    InvalidCommission,

    #[error("SMA period must be at least 1")]
    InvalidSmaPeriod,

    #[error("total partitions must be at least 1, got {0}")]
    InvalidPartitionCount(i32),

    #[error("no stock symbols configured")]
    NoStocks,

    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Broker unreachable or rejecting the consumer setup. Fatal at startup.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("topic must be specified")]
    TopicUnspecified,

    #[error("no server reachable (tried {tried:?}): {last_error}")]
    Unreachable {
        tried: Vec<String>,
        last_error: String,
    },

    #[error("connection to {server} timed out after {secs:.1}s")]
    Timeout { server: String, secs: f64 },

    #[error("failed to join consumer group {group} on {stream}: {source}")]
    GroupSetup {
        group: String,
        stream: String,
        #[source]
        source: redis::RedisError,
    },

    #[error("stream source is not connected")]
    NotConnected,
}

/// A batch payload that could not be decoded at all.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("payload is not valid UTF-8: {0}")]
    Utf8(#[from] std::str::Utf8Error),

    #[error("payload is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("payload is not a JSON array of records")]
    NotABatch,
}

/// A single record that was dropped while the rest of its batch was kept.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FieldError {
    #[error("record is not a JSON object")]
    NotAnObject,

    #[error("missing required field `{0}`")]
    Missing(&'static str),

    #[error("field `{field}` is not a decimal number: {value}")]
    InvalidNumber { field: &'static str, value: String },

    #[error("timestamp `{0}` does not match YYYY-MM-DDTHH:MM:SSZ")]
    InvalidTimestamp(String),

    #[error("field `{0}` is out of range")]
    OutOfRange(&'static str),

    #[error("OHLC values are inconsistent (low must be <= open,close <= high)")]
    InconsistentRange,
}

/// Advisory signal: an order is already waiting for its terminal notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("order {pending} is still in flight")]
pub struct OrderInFlight {
    pub pending: Uuid,
}

/// Order request rejected by the tracker without touching its state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum OrderRequestError {
    #[error(transparent)]
    InFlight(#[from] OrderInFlight),

    #[error("order size must be positive, got {0}")]
    InvalidSize(i64),
}

/// Any non end-of-partition poll failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("transient poll error: {message}")]
pub struct TransientPollError {
    pub message: String,
}

/// Cause carried by `BarOutcome::Failed`.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Poll(#[from] TransientPollError),
}

/// Snapshot could not be delivered to the output channel.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("output channel closed")]
    ChannelClosed,

    #[error("failed to send snapshot to {topic}: {source}")]
    Redis {
        topic: String,
        #[source]
        source: redis::RedisError,
    },
}

/// Failures surfaced through the engine handle.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("execution loop task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

// Pub/sub client abstraction consumed by the feed adapter
pub mod memory;
pub mod partition;
pub mod redis;
pub mod synthetic;

use std::future::Future;
use std::time::Duration;

use thiserror::Error;

use crate::error::ConnectionError;

pub use memory::ScriptedSource;
pub use partition::{KeyHashPartitioner, PartitionStrategy, SinglePartition};
pub use self::redis::RedisStreamSource;
pub use synthetic::SyntheticSource;

/// Index of a partition within the subscribed topic
pub type Partition = i32;

/// Outcome of a single bounded poll
#[derive(Debug, Clone, PartialEq)]
pub enum PollResult {
    /// Nothing arrived within the timeout
    NoMessage,
    /// One raw payload delivered from a partition
    Message { payload: Vec<u8>, partition: Partition },
    /// The consumer caught up with the end of a partition
    EndOfPartition(Partition),
    /// Transport-level failure; the caller decides what to do with it
    Error(SourceError),
}

/// Failure reported by `poll`. Never fatal by itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("no partitions assigned")]
    NotAssigned,

    #[error("source is closed")]
    Closed,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("malformed entry {id} on partition {partition}: {reason}")]
    MalformedEntry {
        id: String,
        partition: Partition,
        reason: String,
    },
}

/// Contract every pub/sub client implements for the feed adapter
///
/// The adapter owns its source exclusively and never polls concurrently.
pub trait StreamSource: Send {
    /// Replace any prior assignment with exactly these partitions
    fn assign_partitions(
        &mut self,
        partitions: &[Partition],
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Wait at most `timeout` for the next event
    fn poll(&mut self, timeout: Duration) -> impl Future<Output = PollResult> + Send;

    /// Release the underlying connection. Calling it twice is harmless.
    fn close(&mut self);

    /// Partitions currently assigned
    fn assignment(&self) -> &[Partition];
}

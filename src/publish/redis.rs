use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client};
use tokio::time::timeout;

use super::{SnapshotEnvelope, SnapshotSink};
use crate::config::Settings;
use crate::error::{ConnectionError, PublishError};
use crate::stream::redis::redis_url;

/// Appends snapshots to the `output_topic` stream with XADD
///
/// Each entry carries the JSON in `value` and the sequence number in `seq`.
pub struct RedisStreamSink {
    conn: ConnectionManager,
    topic: String,
}

impl RedisStreamSink {
    /// Connect to the first reachable server
    pub async fn connect(settings: &Settings) -> Result<Self, ConnectionError> {
        let mut tried = Vec::new();
        let mut last_error = String::from("no servers configured");

        for server in settings.servers.iter().filter(|s| !s.trim().is_empty()) {
            let url = redis_url(server);
            tried.push(url.clone());

            let client = match Client::open(url.as_str()) {
                Ok(client) => client,
                Err(e) => {
                    last_error = e.to_string();
                    continue;
                }
            };

            match timeout(settings.connect_timeout(), ConnectionManager::new(client)).await {
                Ok(Ok(conn)) => {
                    tracing::info!(server = %url, topic = %settings.output_topic, "Snapshot sink connected");
                    return Ok(Self {
                        conn,
                        topic: settings.output_topic.clone(),
                    });
                }
                Ok(Err(e)) => last_error = e.to_string(),
                Err(_) => {
                    last_error = format!("timed out after {:.1}s", settings.connect_timeout_seconds)
                }
            }
        }

        Err(ConnectionError::Unreachable { tried, last_error })
    }
}

impl SnapshotSink for RedisStreamSink {
    async fn send(&mut self, envelope: &SnapshotEnvelope) -> Result<(), PublishError> {
        let sequence = envelope.sequence.to_string();
        let fields = [("value", envelope.payload.as_str()), ("seq", sequence.as_str())];

        let _: String = self
            .conn
            .xadd(&self.topic, "*", &fields)
            .await
            .map_err(|source| PublishError::Redis {
                topic: self.topic.clone(),
                source,
            })?;
        Ok(())
    }

    fn destination(&self) -> &str {
        &self.topic
    }
}

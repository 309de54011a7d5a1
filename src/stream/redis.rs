use std::collections::{BTreeSet, VecDeque};
use std::time::Duration;

use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::{AsyncCommands, Client};
use tokio::time::{error::Elapsed, timeout, Instant};

use super::{Partition, PollResult, SourceError, StreamSource};
use crate::config::Settings;
use crate::error::ConnectionError;

/// Entry field holding the raw batch payload
const PAYLOAD_FIELD: &str = "value";

/// Redis Streams consumer standing in for a partitioned topic
///
/// Partition `p` of topic `T` lives in the stream key `T:p`. Entries are read
/// through a consumer group and acknowledged as `poll` hands each one to the
/// caller. Entries still buffered stay pending in the group, so a crash or a
/// reassignment redelivers them (at-least-once). Every poll, acks included,
/// finishes within its timeout; an ack that does not make it is retried on
/// the next poll.
pub struct RedisStreamSource {
    conn: Option<ConnectionManager>,
    server: String,
    topic: String,
    group: String,
    consumer: String,
    partition_eof: bool,
    assignment: Vec<Partition>,
    keys: Vec<String>,
    // Re-read our own pending entries before asking for new ones
    replay_pending: bool,
    ready: VecDeque<Delivery>,
    // (stream key, entry id) whose XACK failed or ran out of time
    unacked: Vec<(String, String)>,
    unread_since_eof: BTreeSet<Partition>,
}

/// An entry read from the group but not yet returned by `poll`
struct Delivery {
    key: String,
    id: String,
    payload: Vec<u8>,
    partition: Partition,
}

impl RedisStreamSource {
    /// Connect to the first reachable server
    ///
    /// # Arguments
    /// * `settings` - supplies servers, topic, consumer group and timeouts
    pub async fn connect(settings: &Settings) -> Result<Self, ConnectionError> {
        if settings.topic.trim().is_empty() {
            return Err(ConnectionError::TopicUnspecified);
        }

        let mut tried = Vec::new();
        let mut last_error = String::from("no servers configured");

        for server in settings.servers.iter().filter(|s| !s.trim().is_empty()) {
            let url = redis_url(server);
            tried.push(url.clone());

            match timeout(settings.connect_timeout(), open_connection(&url)).await {
                Ok(Ok(conn)) => {
                    tracing::info!(server = %url, topic = %settings.topic, "Connected to stream server");
                    return Ok(Self {
                        conn: Some(conn),
                        server: url,
                        topic: settings.topic.clone(),
                        group: settings.consumer_group.clone(),
                        consumer: settings.consumer_name.clone(),
                        partition_eof: settings.partition_eof,
                        assignment: Vec::new(),
                        keys: Vec::new(),
                        replay_pending: true,
                        ready: VecDeque::new(),
                        unacked: Vec::new(),
                        unread_since_eof: BTreeSet::new(),
                    });
                }
                Ok(Err(e)) => {
                    tracing::warn!(server = %url, error = %e, "Stream server unreachable");
                    last_error = e.to_string();
                }
                Err(_) => {
                    tracing::warn!(server = %url, "Stream server connection timed out");
                    if settings.servers.len() == 1 {
                        return Err(ConnectionError::Timeout {
                            server: url,
                            secs: settings.connect_timeout_seconds,
                        });
                    }
                    last_error = format!(
                        "timed out after {:.1}s",
                        settings.connect_timeout_seconds
                    );
                }
            }
        }

        Err(ConnectionError::Unreachable { tried, last_error })
    }

    pub fn server(&self) -> &str {
        &self.server
    }

    fn stream_key(&self, partition: Partition) -> String {
        format!("{}:{}", self.topic, partition)
    }

    fn partition_of(&self, key: &str) -> Option<Partition> {
        self.keys
            .iter()
            .position(|k| k == key)
            .map(|idx| self.assignment[idx])
    }

    /// One XREADGROUP round trip; fills `ready` with whatever arrived
    async fn read_round(&mut self, deadline: Instant) -> Result<(), SourceError> {
        let wait = deadline.saturating_duration_since(Instant::now());
        if wait.is_zero() {
            return Ok(());
        }
        let conn = self.conn.as_mut().ok_or(SourceError::Closed)?;

        let start_id = if self.replay_pending { "0" } else { ">" };
        let ids = vec![start_id; self.keys.len()];
        let block_ms = wait.as_millis().clamp(1, usize::MAX as u128) as usize;
        let mut options = StreamReadOptions::default()
            .group(&self.group, &self.consumer)
            .count(1);
        if !self.replay_pending {
            options = options.block(block_ms);
        }

        let read = conn.xread_options::<_, _, Option<StreamReadReply>>(
            self.keys.as_slice(),
            ids.as_slice(),
            &options,
        );
        let reply = match timeout(wait, read).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => return Err(SourceError::Transport(e.to_string())),
            Err(_) => {
                // The reply may still land in our pending list; pick it up next time
                self.replay_pending = true;
                return Ok(());
            }
        };

        let mut delivered = 0usize;
        let mut malformed = Vec::new();

        for stream in reply.map(|r| r.keys).unwrap_or_default() {
            let Some(partition) = self.partition_of(&stream.key) else {
                continue;
            };
            for entry in stream.ids {
                match entry.get::<Vec<u8>>(PAYLOAD_FIELD) {
                    Some(payload) => {
                        self.ready.push_back(Delivery {
                            key: stream.key.clone(),
                            id: entry.id,
                            payload,
                            partition,
                        });
                        self.unread_since_eof.insert(partition);
                        delivered += 1;
                    }
                    None => malformed.push((stream.key.clone(), entry.id, partition)),
                }
            }
        }

        if self.replay_pending && delivered == 0 && malformed.is_empty() {
            // Pending list drained, switch to new entries
            self.replay_pending = false;
        }

        // Unusable entries are acknowledged right away so they are not redelivered
        let mut error = None;
        for (key, id, partition) in malformed {
            self.acknowledge(key, id.clone(), deadline).await;
            error = Some(SourceError::MalformedEntry {
                id,
                partition,
                reason: format!("missing `{}` field", PAYLOAD_FIELD),
            });
        }

        match error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// XACK one entry within what is left of the poll; remembered on failure
    async fn acknowledge(&mut self, key: String, id: String, deadline: Instant) {
        let Some(conn) = self.conn.as_mut() else {
            return;
        };
        let budget = deadline.saturating_duration_since(Instant::now());
        let ids = [id.as_str()];
        let acked: Result<redis::RedisResult<i64>, Elapsed> =
            timeout(budget, conn.xack(key.as_str(), self.group.as_str(), &ids)).await;

        match acked {
            Ok(Ok(_)) => return,
            Ok(Err(e)) => {
                tracing::warn!(stream = %key, id = %id, error = %e, "Failed to acknowledge entry");
            }
            Err(_) => {
                tracing::debug!(stream = %key, id = %id, "Acknowledgement deferred to next poll");
            }
        }
        self.unacked.push((key, id));
    }

    /// Retry earlier acknowledgements while the poll budget lasts
    async fn flush_acks(&mut self, deadline: Instant) {
        let retry = std::mem::take(&mut self.unacked);
        let mut remaining = retry.into_iter();
        while Instant::now() < deadline {
            let Some((key, id)) = remaining.next() else {
                return;
            };
            self.acknowledge(key, id, deadline).await;
        }
        self.unacked.extend(remaining);
    }
}

async fn open_connection(url: &str) -> redis::RedisResult<ConnectionManager> {
    let client = Client::open(url)?;
    ConnectionManager::new(client).await
}

pub(crate) fn redis_url(server: &str) -> String {
    let server = server.trim();
    if server.starts_with("redis://") || server.starts_with("rediss://") {
        server.to_string()
    } else {
        format!("redis://{}", server)
    }
}

impl StreamSource for RedisStreamSource {
    async fn assign_partitions(&mut self, partitions: &[Partition]) -> Result<(), ConnectionError> {
        let keys: Vec<String> = partitions.iter().map(|p| self.stream_key(*p)).collect();
        let conn = self.conn.as_mut().ok_or(ConnectionError::NotConnected)?;

        for key in &keys {
            let created: redis::RedisResult<()> =
                conn.xgroup_create_mkstream(key, &self.group, "0").await;
            match created {
                Ok(()) => tracing::info!(stream = %key, group = %self.group, "Created consumer group"),
                Err(e) if e.code() == Some("BUSYGROUP") => {}
                Err(source) => {
                    return Err(ConnectionError::GroupSetup {
                        group: self.group.clone(),
                        stream: key.clone(),
                        source,
                    })
                }
            }
        }

        tracing::info!(partitions = ?partitions, streams = ?keys, "Assigned partitions");

        self.assignment = partitions.to_vec();
        self.keys = keys;
        // Dropped entries are still pending and come back through the replay
        self.ready.clear();
        self.unread_since_eof.clear();
        self.replay_pending = true;
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> PollResult {
        if self.conn.is_none() {
            return PollResult::Error(SourceError::Closed);
        }
        if self.keys.is_empty() {
            return PollResult::Error(SourceError::NotAssigned);
        }

        let deadline = Instant::now() + timeout;
        if !self.unacked.is_empty() {
            self.flush_acks(deadline).await;
        }

        if self.ready.is_empty() {
            if let Err(e) = self.read_round(deadline).await {
                return PollResult::Error(e);
            }
        }

        if let Some(delivery) = self.ready.pop_front() {
            self.acknowledge(delivery.key, delivery.id, deadline).await;
            return PollResult::Message {
                payload: delivery.payload,
                partition: delivery.partition,
            };
        }

        if self.partition_eof {
            if let Some(partition) = self.unread_since_eof.pop_first() {
                return PollResult::EndOfPartition(partition);
            }
        }

        PollResult::NoMessage
    }

    fn close(&mut self) {
        if self.conn.take().is_some() {
            tracing::info!(server = %self.server, "Closed stream connection");
        }
    }

    fn assignment(&self) -> &[Partition] {
        &self.assignment
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_url_normalization() {
        assert_eq!(redis_url("localhost:6379"), "redis://localhost:6379");
        assert_eq!(redis_url(" redis://cache:6380 "), "redis://cache:6380");
        assert_eq!(redis_url("rediss://secure:6390"), "rediss://secure:6390");
    }

    #[tokio::test]
    async fn test_connect_rejects_empty_topic() {
        let settings = Settings {
            topic: String::new(),
            ..Settings::default()
        };
        let result = RedisStreamSource::connect(&settings).await;
        assert!(matches!(result, Err(ConnectionError::TopicUnspecified)));
    }

    #[tokio::test]
    async fn test_connect_unreachable_server_fails() {
        let settings = Settings {
            // port 1 is reserved and never serves redis
            servers: vec!["127.0.0.1:1".to_string()],
            connect_timeout_seconds: 0.5,
            ..Settings::default()
        };
        let result = RedisStreamSource::connect(&settings).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore] // Requires a local Redis
    async fn test_buffered_entries_stay_pending_live() {
        let settings = Settings {
            topic: format!("barfeed-test-{}", uuid::Uuid::new_v4()),
            ..Settings::default()
        };
        let mut source = RedisStreamSource::connect(&settings).await.unwrap();
        source.assign_partitions(&[0, 1]).await.unwrap();

        let client = Client::open("redis://localhost:6379").unwrap();
        let mut conn = ConnectionManager::new(client).await.unwrap();
        let keys = [format!("{}:0", settings.topic), format!("{}:1", settings.topic)];
        for key in &keys {
            let _: String = conn.xadd(key, "*", &[(PAYLOAD_FIELD, "[]")]).await.unwrap();
        }

        let mut delivered = 0;
        for _ in 0..5 {
            if let PollResult::Message { .. } = source.poll(Duration::from_millis(500)).await {
                delivered += 1;
                break;
            }
        }
        assert_eq!(delivered, 1);

        // One read fetched both entries; only the one returned is acknowledged
        let mut pending = 0;
        for key in &keys {
            let reply: redis::streams::StreamPendingReply =
                conn.xpending(key, &settings.consumer_group).await.unwrap();
            pending += reply.count();
        }
        assert_eq!(pending, 1);

        assert!(matches!(
            source.poll(Duration::from_millis(500)).await,
            PollResult::Message { .. }
        ));
        source.close();
    }

    #[tokio::test]
    #[ignore] // Requires a local Redis
    async fn test_roundtrip_live() {
        let settings = Settings {
            topic: format!("barfeed-test-{}", uuid::Uuid::new_v4()),
            ..Settings::default()
        };
        let mut source = RedisStreamSource::connect(&settings).await.unwrap();
        source.assign_partitions(&[0]).await.unwrap();

        let client = Client::open("redis://localhost:6379").unwrap();
        let mut conn = ConnectionManager::new(client).await.unwrap();
        let _: String = conn
            .xadd(format!("{}:0", settings.topic), "*", &[(PAYLOAD_FIELD, "[]")])
            .await
            .unwrap();

        let mut got_message = false;
        for _ in 0..5 {
            if let PollResult::Message { payload, partition } =
                source.poll(Duration::from_millis(500)).await
            {
                assert_eq!(payload, b"[]".to_vec());
                assert_eq!(partition, 0);
                got_message = true;
                break;
            }
        }
        assert!(got_message);

        assert_eq!(
            source.poll(Duration::from_millis(100)).await,
            PollResult::EndOfPartition(0)
        );

        source.close();
        source.close();
        assert_eq!(
            source.poll(Duration::from_millis(10)).await,
            PollResult::Error(SourceError::Closed)
        );
    }
}

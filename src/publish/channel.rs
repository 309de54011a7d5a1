use tokio::sync::mpsc;

use super::{SnapshotEnvelope, SnapshotSink};
use crate::error::PublishError;

/// In-process sink over a tokio mpsc channel
///
/// `send` waits for channel capacity, so a slow reader applies backpressure to
/// the execution loop.
pub struct ChannelSink {
    sender: mpsc::Sender<SnapshotEnvelope>,
}

impl ChannelSink {
    pub fn new(sender: mpsc::Sender<SnapshotEnvelope>) -> Self {
        Self { sender }
    }
}

impl SnapshotSink for ChannelSink {
    async fn send(&mut self, envelope: &SnapshotEnvelope) -> Result<(), PublishError> {
        self.sender
            .send(envelope.clone())
            .await
            .map_err(|_| PublishError::ChannelClosed)
    }

    fn destination(&self) -> &str {
        "channel"
    }
}

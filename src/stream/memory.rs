use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use super::{Partition, PollResult, SourceError, StreamSource};
use crate::error::ConnectionError;

#[derive(Default)]
struct Script {
    events: VecDeque<PollResult>,
    finished: bool,
}

/// In-process stream source fed by the test or replay harness
///
/// Clones share the same queue, so one clone can be handed to the feed
/// adapter while another keeps pushing events.
#[derive(Clone)]
pub struct ScriptedSource {
    script: Arc<Mutex<Script>>,
    notify: Arc<Notify>,
    closed: Arc<AtomicBool>,
    assignment: Vec<Partition>,
    eof_cursor: usize,
}

impl ScriptedSource {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(Script::default())),
            notify: Arc::new(Notify::new()),
            closed: Arc::new(AtomicBool::new(false)),
            assignment: Vec::new(),
            eof_cursor: 0,
        }
    }

    /// Queue a raw poll result
    pub fn push(&self, event: PollResult) {
        if let Ok(mut script) = self.script.lock() {
            script.events.push_back(event);
        }
        self.notify.notify_one();
    }

    /// Queue one JSON batch on a partition
    pub fn push_batch(&self, partition: Partition, payload: impl Into<Vec<u8>>) {
        self.push(PollResult::Message {
            payload: payload.into(),
            partition,
        });
    }

    /// Once the queue drains, report end-of-partition instead of silence
    pub fn finish(&self) {
        if let Ok(mut script) = self.script.lock() {
            script.finished = true;
        }
        self.notify.notify_one();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Events still waiting to be polled
    pub fn queued(&self) -> usize {
        self.script.lock().map(|s| s.events.len()).unwrap_or(0)
    }

    fn next_event(&mut self) -> Option<PollResult> {
        let mut script = self.script.lock().ok()?;

        while let Some(event) = script.events.pop_front() {
            match &event {
                PollResult::Message { partition, .. } | PollResult::EndOfPartition(partition)
                    if !self.assignment.contains(partition) =>
                {
                    tracing::trace!(partition, "skipping event for unassigned partition");
                    continue;
                }
                _ => return Some(event),
            }
        }

        if script.finished && !self.assignment.is_empty() {
            let partition = self.assignment[self.eof_cursor % self.assignment.len()];
            self.eof_cursor += 1;
            return Some(PollResult::EndOfPartition(partition));
        }

        None
    }
}

impl Default for ScriptedSource {
    fn default() -> Self {
        Self::new()
    }
}

impl StreamSource for ScriptedSource {
    async fn assign_partitions(&mut self, partitions: &[Partition]) -> Result<(), ConnectionError> {
        if self.is_closed() {
            return Err(ConnectionError::NotConnected);
        }
        self.assignment = partitions.to_vec();
        self.eof_cursor = 0;
        Ok(())
    }

    async fn poll(&mut self, timeout: Duration) -> PollResult {
        if self.is_closed() {
            return PollResult::Error(SourceError::Closed);
        }
        if self.assignment.is_empty() {
            return PollResult::Error(SourceError::NotAssigned);
        }

        if let Some(event) = self.next_event() {
            return event;
        }

        // Nothing queued: wait for a push, bounded by the timeout
        let notified = self.notify.clone();
        if tokio::time::timeout(timeout, notified.notified()).await.is_err() {
            return PollResult::NoMessage;
        }

        self.next_event().unwrap_or(PollResult::NoMessage)
    }

    fn close(&mut self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            tracing::debug!("scripted source closed");
        }
    }

    fn assignment(&self) -> &[Partition] {
        &self.assignment
    }
}

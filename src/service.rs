//! Engine handle: start the execution loop on its own task, observe it, stop it.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::Settings;
use crate::error::EngineError;
use crate::execution::{ExecutionLoop, RunSummary};
use crate::feed::{partition_strategy, FeedAdapter};
use crate::models::PortfolioSnapshot;
use crate::publish::{RedisStreamSink, SnapshotPublisher, SnapshotSink};
use crate::strategy;
use crate::stream::{RedisStreamSource, StreamSource};

/// Cloneable trigger for the loop's stop signal
#[derive(Clone)]
pub struct StopSignal(Arc<watch::Sender<bool>>);

impl StopSignal {
    /// Ask the loop to stop after the current iteration
    pub fn raise(&self) {
        self.0.send_replace(true);
    }
}

pub struct EngineHandle {
    stop: StopSignal,
    snapshots: watch::Receiver<PortfolioSnapshot>,
    task: JoinHandle<RunSummary>,
}

impl EngineHandle {
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Subscribe to snapshot updates
    pub fn snapshots(&self) -> watch::Receiver<PortfolioSnapshot> {
        self.snapshots.clone()
    }

    /// Wait for the loop to exit on its own (ended, faulted or stopped
    /// through a `StopSignal`)
    pub async fn join(self) -> Result<RunSummary, EngineError> {
        Ok(self.task.await?)
    }
}

/// Connect to the configured servers and start the loop
pub async fn start(settings: Settings) -> Result<EngineHandle, EngineError> {
    settings.validate()?;

    let source = RedisStreamSource::connect(&settings).await?;
    let sink = RedisStreamSink::connect(&settings).await?;

    start_with(settings, source, sink).await
}

/// Start the loop over an already connected source and sink
///
/// # Arguments
/// * `settings` - validated again here; invalid settings never reach the source
/// * `source` - stream source, handed to the feed adapter
/// * `sink` - snapshot destination
pub async fn start_with<S, K>(settings: Settings, source: S, sink: K) -> Result<EngineHandle, EngineError>
where
    S: StreamSource + 'static,
    K: SnapshotSink + 'static,
{
    settings.validate()?;

    let partitions = partition_strategy(settings.partition_strategy);
    let feed = FeedAdapter::open(source, &settings, partitions.as_ref()).await?;
    let policy = strategy::from_settings(&settings);

    tracing::info!(
        topic = %settings.topic,
        output = sink.destination(),
        policy = policy.name(),
        stake = settings.stake,
        cash = %settings.initial_cash,
        "Starting execution loop"
    );

    let (stop_tx, stop_rx) = watch::channel(false);
    let (snapshot_tx, snapshot_rx) =
        watch::channel(PortfolioSnapshot::initial(settings.initial_cash, Utc::now()));

    let exec = ExecutionLoop::new(
        &settings,
        feed,
        policy,
        SnapshotPublisher::new(sink),
        stop_rx,
        snapshot_tx,
    );
    let task = tokio::spawn(exec.run());

    Ok(EngineHandle {
        stop: StopSignal(Arc::new(stop_tx)),
        snapshots: snapshot_rx,
        task,
    })
}

/// Raise the stop signal and wait for the loop to finish
pub async fn stop(handle: EngineHandle) -> Result<RunSummary, EngineError> {
    handle.stop.raise();
    handle.join().await
}

/// Latest snapshot published by the loop (the initial portfolio before the
/// first bar)
pub fn current_snapshot(handle: &EngineHandle) -> PortfolioSnapshot {
    handle.snapshots.borrow().clone()
}

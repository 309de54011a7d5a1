use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use barfeed::config::{DecisionPolicyKind, EndOfPartitionPolicy, Settings};
use barfeed::publish::{ChannelSink, SnapshotEnvelope};
use barfeed::service::{self, EngineHandle};
use barfeed::stream::SyntheticSource;
use barfeed::telemetry::setup_logging;
use clap::{Parser, ValueEnum};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

#[derive(Parser)]
#[command(name = "barfeed", about = "Replay a live bar stream into a paper-trading loop")]
struct Cli {
    /// TOML settings file layered over the defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// Input topic (overrides settings)
    #[arg(long)]
    topic: Option<String>,

    /// Decision policy (overrides settings)
    #[arg(long, value_enum)]
    policy: Option<PolicyArg>,

    /// Order size (overrides settings)
    #[arg(long)]
    stake: Option<i64>,

    /// Generate bars locally instead of consuming the topic; snapshots are
    /// printed to stdout
    #[arg(long, default_value_t = false)]
    synthetic: bool,

    /// Synthetic batches to emit before the stream ends
    #[arg(long, requires = "synthetic")]
    batches: Option<usize>,

    /// Pause between synthetic batches in milliseconds
    #[arg(long, default_value_t = 200)]
    pace_ms: u64,

    /// Seed for the synthetic random walk
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum PolicyArg {
    AlwaysFlipOnBar,
    SmaCrossover,
}

impl From<PolicyArg> for DecisionPolicyKind {
    fn from(arg: PolicyArg) -> Self {
        match arg {
            PolicyArg::AlwaysFlipOnBar => DecisionPolicyKind::AlwaysFlipOnBar,
            PolicyArg::SmaCrossover => DecisionPolicyKind::SmaCrossover,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    setup_logging();

    let cli = Cli::parse();

    let mut settings = Settings::load(cli.config.as_deref()).context("failed to load settings")?;
    if let Some(topic) = cli.topic.clone() {
        settings.topic = topic;
    }
    if let Some(policy) = cli.policy {
        settings.decision_policy = policy.into();
    }
    if let Some(stake) = cli.stake {
        settings.stake = stake;
    }

    tracing::info!("barfeed starting");

    let (handle, printer) = if cli.synthetic {
        let (handle, printer) = start_synthetic(settings, &cli).await?;
        (handle, Some(printer))
    } else {
        let handle = service::start(settings)
            .await
            .context("failed to start execution loop")?;
        (handle, None)
    };

    let stop = handle.stop_signal();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, stopping");
            stop.raise();
        }
    });

    let summary = handle.join().await?;
    if let Some(printer) = printer {
        // Ends once the loop drops its sink
        printer.await.context("snapshot printer failed")?;
    }

    tracing::info!(
        state = ?summary.final_state,
        value = %summary.value,
        cash = %summary.cash,
        position = summary.position.size,
        realized_pnl = %summary.realized_pnl,
        bars = summary.bars_processed,
        snapshots = summary.snapshots_published,
        "Final portfolio"
    );

    Ok(())
}

/// Start a run over generated bars; the returned task prints every snapshot
async fn start_synthetic(mut settings: Settings, cli: &Cli) -> Result<(EngineHandle, JoinHandle<()>)> {
    let mut source = SyntheticSource::new(cli.seed, settings.stocks.clone(), 1)
        .with_pace(Duration::from_millis(cli.pace_ms));
    if let Some(batches) = cli.batches {
        source = source.with_limit(batches);
        settings.end_of_partition = EndOfPartitionPolicy::Terminate;
    }

    let (tx, mut rx) = mpsc::channel::<SnapshotEnvelope>(64);
    let printer = tokio::spawn(async move {
        while let Some(envelope) = rx.recv().await {
            println!("{}", envelope.payload);
        }
    });

    let handle = service::start_with(settings, source, ChannelSink::new(tx))
        .await
        .context("failed to start synthetic run")?;
    Ok((handle, printer))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_synthetic_run_drains_printer() {
        let cli = Cli::parse_from(["barfeed", "--synthetic", "--batches", "3", "--pace-ms", "0"]);
        let settings = Settings {
            poll_timeout_seconds: 0.01,
            idle_backoff_ms: 1,
            ..Settings::default()
        };

        let (handle, printer) = start_synthetic(settings, &cli).await.unwrap();
        let summary = handle.join().await.unwrap();

        // The printer sees the channel close once the loop has finished
        tokio::time::timeout(Duration::from_secs(5), printer)
            .await
            .expect("printer still running after the loop finished")
            .unwrap();
        assert_eq!(summary.bars_processed, 3);
        assert_eq!(summary.snapshots_published, 4);
    }
}

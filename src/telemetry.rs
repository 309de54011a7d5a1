use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "barfeed=info";

/// Install the global tracing subscriber
///
/// `RUST_LOG` overrides the default filter. Calling it twice is harmless
/// (the second install is ignored).
pub fn setup_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

/// Counters kept by the feed adapter
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FeedStats {
    pub polls: u64,
    pub messages: u64,
    pub bars_delivered: u64,
    pub records_dropped: u64,
    pub records_ignored: u64,
    pub decode_errors: u64,
    pub poll_errors: u64,
    pub end_of_partition: u64,
    /// Most bars ever waiting in the pending buffer at once
    pub buffer_high_water: usize,
}

impl FeedStats {
    pub fn log_summary(&self) {
        tracing::info!(
            polls = self.polls,
            messages = self.messages,
            bars = self.bars_delivered,
            dropped = self.records_dropped,
            ignored = self.records_ignored,
            decode_errors = self.decode_errors,
            poll_errors = self.poll_errors,
            eof = self.end_of_partition,
            buffer_high_water = self.buffer_high_water,
            "Feed statistics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_logging_twice() {
        setup_logging();
        setup_logging();
    }

    #[test]
    fn test_stats_start_at_zero() {
        let stats = FeedStats::default();
        assert_eq!(stats.polls, 0);
        assert_eq!(stats.bars_delivered, 0);
    }
}

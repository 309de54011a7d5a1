// Core modules
pub mod config;
pub mod error;
pub mod execution;
pub mod feed;
pub mod indicators;
pub mod models;
pub mod publish;
pub mod service;
pub mod strategy;
pub mod stream;
pub mod telemetry;

// Re-export commonly used types
pub use config::Settings;
pub use feed::{BarOutcome, FeedAdapter};
pub use models::*;
pub use service::{current_snapshot, start, start_with, stop, EngineHandle};

// Order tracking, simulated fills and the per-bar execution loop
pub mod broker;
pub mod engine;
pub mod position_tracker;

pub use broker::PaperBroker;
pub use engine::{ExecutionLoop, LoopState, RunSummary};
pub use position_tracker::{Position, PositionState, PositionTracker};

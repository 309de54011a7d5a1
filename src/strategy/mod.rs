// Decision policies evaluated once per processed bar
pub mod always_flip;
pub mod sma_crossover;

use crate::config::{DecisionPolicyKind, Settings};
use crate::execution::Position;
use crate::models::{BarRecord, Side};

pub use always_flip::AlwaysFlipOnBar;
pub use sma_crossover::SmaCrossover;

/// Turns the latest bar and current position into an order intent
pub trait DecisionPolicy: Send {
    /// Intent for this bar, if any
    fn on_bar(&mut self, bar: &BarRecord, position: &Position) -> Option<Side>;

    /// Get policy name
    fn name(&self) -> &str;
}

/// Build the configured policy
pub fn from_settings(settings: &Settings) -> Box<dyn DecisionPolicy> {
    match settings.decision_policy {
        DecisionPolicyKind::AlwaysFlipOnBar => Box::new(AlwaysFlipOnBar::new()),
        DecisionPolicyKind::SmaCrossover => Box::new(SmaCrossover::new(settings.sma_period)),
    }
}

use super::DecisionPolicy;
use crate::execution::Position;
use crate::models::{BarRecord, Side};

/// Buys when flat, sells whenever anything is held
///
/// Exercises the order plumbing rather than trading on any signal.
#[derive(Debug, Clone, Default)]
pub struct AlwaysFlipOnBar;

impl AlwaysFlipOnBar {
    pub fn new() -> Self {
        Self
    }
}

impl DecisionPolicy for AlwaysFlipOnBar {
    fn on_bar(&mut self, _bar: &BarRecord, position: &Position) -> Option<Side> {
        if position.size == 0 {
            Some(Side::Buy)
        } else {
            Some(Side::Sell)
        }
    }

    fn name(&self) -> &str {
        "always_flip_on_bar"
    }
}

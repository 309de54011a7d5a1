// Indicator math used by the decision policies
pub mod moving_average;

pub use moving_average::calculate_sma;

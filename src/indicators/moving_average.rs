use rust_decimal::Decimal;

/// Simple moving average of the last `period` prices
///
/// None when fewer than `period` prices are available or the sum overflows.
pub fn calculate_sma(prices: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || prices.len() < period {
        return None;
    }

    let sum = prices
        .iter()
        .rev()
        .take(period)
        .try_fold(Decimal::ZERO, |acc, price| acc.checked_add(*price))?;
    sum.checked_div(Decimal::from(period as u64))
}

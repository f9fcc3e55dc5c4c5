use super::moving_average::ewm_mean_series;

/// Calculate Relative Strength Index (RSI) at the last price
///
/// Average gain and loss are exponentially weighted with α = 1/length and
/// need at least `length` price changes. Result is rounded to 2 decimals.
///
/// Values:
/// - RSI > 70: Overbought
/// - RSI < 30: Oversold
///
pub fn calculate_rsi(prices: &[f64], length: usize) -> Option<f64> {
    if length == 0 || prices.len() < length + 1 {
        return None;
    }

    let mut gains = Vec::with_capacity(prices.len() - 1);
    let mut losses = Vec::with_capacity(prices.len() - 1);

    for pair in prices.windows(2) {
        let change = pair[1] - pair[0];
        gains.push(change.max(0.0));
        losses.push((-change).max(0.0));
    }

    let alpha = 1.0 / length as f64;
    let avg_gain = (*ewm_mean_series(&gains, alpha, length).last()?)?;
    let avg_loss = (*ewm_mean_series(&losses, alpha, length).last()?)?;

    if avg_loss == 0.0 {
        return Some(100.0);
    }

    let rs = avg_gain / avg_loss;
    let rsi = 100.0 - (100.0 / (1.0 + rs));

    Some((rsi * 100.0).round() / 100.0)
}

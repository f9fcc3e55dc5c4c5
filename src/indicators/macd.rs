use super::moving_average::ema_series;

/// MACD line and its signal line at the last price
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Macd {
    pub line: f64,
    pub signal: f64,
}

/// Moving Average Convergence Divergence
///
/// line = EMA(fast) - EMA(slow); signal = EMA(line, signal_span)
pub fn calculate_macd(prices: &[f64], fast: usize, slow: usize, signal_span: usize) -> Option<Macd> {
    if prices.is_empty() {
        return None;
    }

    let ema_fast = ema_series(prices, fast);
    let ema_slow = ema_series(prices, slow);

    let line: Vec<f64> = ema_fast
        .iter()
        .zip(ema_slow.iter())
        .map(|(f, s)| f - s)
        .collect();
    let signal = ema_series(&line, signal_span);

    Some(Macd {
        line: *line.last()?,
        signal: *signal.last()?,
    })
}

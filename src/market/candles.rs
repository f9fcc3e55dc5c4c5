use crate::models::{Candle, Timeframe};
use chrono::Utc;

/// Ticks older than this (ms) are reported as stale
const STALE_TICK_MS: i64 = 2_000;

/// What a tick did to the series
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Last candle updated in place
    SameCandle,
    /// A new candle was appended, preceded by `filled` synthetic flat candles
    NewCandle { filled: usize },
}

impl TickOutcome {
    pub fn is_new_candle(&self) -> bool {
        matches!(self, TickOutcome::NewCandle { .. })
    }
}

/// Candle sequence for one (contract, timeframe) built from trade ticks
///
/// Timestamps are strictly increasing by one timeframe; missed intervals
/// are filled with flat zero-volume candles. Only the last candle is ever
/// mutated. Keeps at most `max_candles` candles.
#[derive(Debug, Clone)]
pub struct CandleSeries {
    timeframe: Timeframe,
    candles: Vec<Candle>,
    max_candles: usize,
}

impl CandleSeries {
    pub fn new(timeframe: Timeframe, max_candles: usize) -> Self {
        Self {
            timeframe,
            candles: Vec::new(),
            max_candles: max_candles.max(2),
        }
    }

    /// Seed the series with historical candles (oldest first)
    pub fn with_history(timeframe: Timeframe, max_candles: usize, history: Vec<Candle>) -> Self {
        let mut series = Self::new(timeframe, max_candles);
        series.candles = history;
        series.trim();
        series
    }

    pub fn timeframe(&self) -> Timeframe {
        self.timeframe
    }

    pub fn candles(&self) -> &[Candle] {
        &self.candles
    }

    pub fn last(&self) -> Option<&Candle> {
        self.candles.last()
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    /// Closing prices, oldest first
    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    /// Apply one trade tick (timestamp in ms)
    pub fn apply_tick(&mut self, price: f64, size: f64, timestamp: i64) -> TickOutcome {
        let lag = Utc::now().timestamp_millis() - timestamp;
        if lag >= STALE_TICK_MS {
            tracing::warn!(
                timeframe = %self.timeframe,
                lag_ms = lag,
                "Stale trade tick"
            );
        }

        let tf = self.timeframe.as_millis();

        let Some(last) = self.candles.last_mut() else {
            let start = timestamp - timestamp.rem_euclid(tf);
            self.candles.push(Candle::from_tick(start, price, size));
            return TickOutcome::NewCandle { filled: 0 };
        };

        if timestamp < last.timestamp + tf {
            last.close = price;
            last.volume += size;
            last.high = last.high.max(price);
            last.low = last.low.min(price);
            return TickOutcome::SameCandle;
        }

        let last_ts = last.timestamp;
        let last_close = last.close;
        let missing = ((timestamp - last_ts) / tf - 1) as usize;

        for i in 1..=missing as i64 {
            self.candles.push(Candle::flat(last_ts + i * tf, last_close));
        }
        let start = last_ts + (missing as i64 + 1) * tf;
        self.candles.push(Candle::from_tick(start, price, size));

        if missing > 0 {
            tracing::debug!(
                timeframe = %self.timeframe,
                missing,
                "Filled missing candles"
            );
        }

        self.trim();
        TickOutcome::NewCandle { filled: missing }
    }

    fn trim(&mut self) {
        if self.candles.len() > self.max_candles {
            let excess = self.candles.len() - self.max_candles;
            self.candles.drain(..excess);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_candle(timestamp: i64, close: f64) -> Candle {
        Candle {
            timestamp,
            open: close,
            high: close,
            low: close,
            close,
            volume: 10.0,
        }
    }

    fn series_at(ts: i64, close: f64) -> CandleSeries {
        CandleSeries::with_history(Timeframe::M1, 1000, vec![create_test_candle(ts, close)])
    }

    #[test]
    fn test_first_tick_aligns_to_interval() {
        let mut series = CandleSeries::new(Timeframe::M1, 100);
        let outcome = series.apply_tick(50.0, 2.0, 125_000);

        assert_eq!(outcome, TickOutcome::NewCandle { filled: 0 });
        assert_eq!(series.len(), 1);
        assert_eq!(series.last().unwrap().timestamp, 120_000);
        assert_eq!(series.last().unwrap().volume, 2.0);
    }

    #[test]
    fn test_same_candle_update() {
        let mut series = series_at(1_000, 100.0);

        assert_eq!(series.apply_tick(105.0, 1.0, 20_000), TickOutcome::SameCandle);
        assert_eq!(series.apply_tick(97.0, 0.5, 40_000), TickOutcome::SameCandle);
        assert_eq!(series.apply_tick(99.0, 0.25, 60_999), TickOutcome::SameCandle);

        let last = series.last().unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(last.close, 99.0);
        assert_eq!(last.high, 105.0);
        assert_eq!(last.low, 97.0);
        assert_eq!(last.volume, 11.75);
    }

    #[test]
    fn test_new_candle_at_boundary() {
        let mut series = series_at(1_000, 100.0);
        let outcome = series.apply_tick(101.0, 3.0, 61_000);

        assert_eq!(outcome, TickOutcome::NewCandle { filled: 0 });
        assert_eq!(series.len(), 2);

        let last = series.last().unwrap();
        assert_eq!(last.timestamp, 61_000);
        assert_eq!(last.open, 101.0);
        assert_eq!(last.high, 101.0);
        assert_eq!(last.low, 101.0);
        assert_eq!(last.close, 101.0);
        assert_eq!(last.volume, 3.0);
    }

    #[test]
    fn test_gap_fill_three_missing() {
        let mut series = series_at(1_000, 100.0);
        let outcome = series.apply_tick(110.0, 4.0, 250_000);

        assert_eq!(outcome, TickOutcome::NewCandle { filled: 3 });
        let candles = series.candles();
        assert_eq!(candles.len(), 5);

        for (candle, ts) in candles[1..4].iter().zip([61_000, 121_000, 181_000]) {
            assert_eq!(candle.timestamp, ts);
            assert_eq!(candle.open, 100.0);
            assert_eq!(candle.high, 100.0);
            assert_eq!(candle.low, 100.0);
            assert_eq!(candle.close, 100.0);
            assert_eq!(candle.volume, 0.0);
        }

        let real = &candles[4];
        assert_eq!(real.timestamp, 241_000);
        assert_eq!(real.close, 110.0);
        assert_eq!(real.volume, 4.0);
    }

    #[test]
    fn test_gap_fill_long_gap() {
        let mut series = series_at(1_000, 100.0);
        let outcome = series.apply_tick(90.0, 1.0, 1_250_000);

        assert_eq!(outcome, TickOutcome::NewCandle { filled: 19 });
        assert_eq!(series.len(), 21);
        assert_eq!(series.last().unwrap().timestamp, 1_201_000);
        assert_eq!(series.last().unwrap().close, 90.0);
    }

    #[test]
    fn test_timestamps_strictly_spaced() {
        let mut series = series_at(0, 100.0);
        for (i, ts) in [30_000, 70_000, 200_000, 210_000, 500_000].iter().enumerate() {
            series.apply_tick(100.0 + i as f64, 1.0, *ts);
        }

        for pair in series.candles().windows(2) {
            assert_eq!(pair[1].timestamp - pair[0].timestamp, 60_000);
        }
        assert_eq!(series.last().unwrap().close, 104.0);
    }

    #[test]
    fn test_max_candles_limit() {
        let mut series = CandleSeries::new(Timeframe::M1, 5);
        for i in 0..10 {
            series.apply_tick(100.0 + i as f64, 1.0, i * 60_000);
        }

        assert_eq!(series.len(), 5);
        assert_eq!(series.candles()[0].close, 105.0);
        assert_eq!(series.candles()[4].close, 109.0);
    }

    #[test]
    fn test_closes() {
        let history = vec![
            create_test_candle(0, 1.0),
            create_test_candle(60_000, 2.0),
            create_test_candle(120_000, 3.0),
        ];
        let series = CandleSeries::with_history(Timeframe::M1, 100, history);
        assert_eq!(series.closes(), vec![1.0, 2.0, 3.0]);
    }
}

use super::{BreakoutParams, Signal, Strategy};
use crate::models::Candle;

/// Range breakout on the forming candle
///
/// Long when the latest close breaks above the previous candle's high,
/// short when it breaks below the previous low. Both need the latest
/// volume above `min_volume`.
#[derive(Debug, Clone)]
pub struct BreakoutStrategy {
    params: BreakoutParams,
}

impl BreakoutStrategy {
    pub fn new(params: BreakoutParams) -> Self {
        Self { params }
    }
}

impl Strategy for BreakoutStrategy {
    fn generate_signal(&self, candles: &[Candle]) -> Signal {
        let [.., previous, latest] = candles else {
            return Signal::None;
        };

        if latest.volume <= self.params.min_volume {
            return Signal::None;
        }

        if latest.close > previous.high {
            Signal::Long
        } else if latest.close < previous.low {
            Signal::Short
        } else {
            Signal::None
        }
    }

    fn name(&self) -> &str {
        "Breakout"
    }

    fn min_candles_required(&self) -> usize {
        2
    }

    fn evaluates_every_tick(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_candle(high: f64, low: f64, close: f64, volume: f64) -> Candle {
        Candle {
            timestamp: 0,
            open: close,
            high,
            low,
            close,
            volume,
        }
    }

    fn strategy() -> BreakoutStrategy {
        BreakoutStrategy::new(BreakoutParams { min_volume: 10.0 })
    }

    #[test]
    fn test_breakout_above_previous_high() {
        let candles = [
            create_test_candle(105.0, 95.0, 100.0, 50.0),
            create_test_candle(106.0, 104.0, 106.0, 11.0),
        ];
        assert_eq!(strategy().generate_signal(&candles), Signal::Long);
    }

    #[test]
    fn test_breakdown_below_previous_low() {
        let candles = [
            create_test_candle(105.0, 95.0, 100.0, 50.0),
            create_test_candle(96.0, 94.0, 94.0, 11.0),
        ];
        assert_eq!(strategy().generate_signal(&candles), Signal::Short);
    }

    #[test]
    fn test_requires_volume() {
        let candles = [
            create_test_candle(105.0, 95.0, 100.0, 50.0),
            create_test_candle(106.0, 104.0, 106.0, 10.0),
        ];
        assert_eq!(strategy().generate_signal(&candles), Signal::None);
    }

    #[test]
    fn test_inside_range_and_short_history() {
        let inside = [
            create_test_candle(105.0, 95.0, 100.0, 50.0),
            create_test_candle(104.0, 96.0, 105.0, 50.0),
        ];
        assert_eq!(strategy().generate_signal(&inside), Signal::None);
        assert_eq!(strategy().generate_signal(&inside[..1]), Signal::None);
    }
}

use super::{Signal, Strategy, TechnicalParams};
use crate::indicators::{calculate_macd, calculate_rsi};
use crate::models::Candle;

const RSI_OVERSOLD: f64 = 30.0;
const RSI_OVERBOUGHT: f64 = 70.0;

/// RSI + MACD crossover strategy
///
/// Evaluated once per new candle over the closed candles only:
/// - Long: RSI < 30 and MACD line above its signal line
/// - Short: RSI > 70 and MACD line below its signal line
#[derive(Debug, Clone)]
pub struct TechnicalStrategy {
    params: TechnicalParams,
}

impl TechnicalStrategy {
    pub fn new(params: TechnicalParams) -> Self {
        Self { params }
    }

    pub fn params(&self) -> &TechnicalParams {
        &self.params
    }
}

impl Default for TechnicalStrategy {
    fn default() -> Self {
        Self::new(TechnicalParams::default())
    }
}

impl Strategy for TechnicalStrategy {
    fn generate_signal(&self, candles: &[Candle]) -> Signal {
        if candles.len() < self.min_candles_required() {
            tracing::debug!(
                candles = candles.len(),
                required = self.min_candles_required(),
                "Not enough candles for technical signal"
            );
            return Signal::None;
        }

        // Drop the forming candle
        let closes: Vec<f64> = candles[..candles.len() - 1]
            .iter()
            .map(|c| c.close)
            .collect();

        let Some(rsi) = calculate_rsi(&closes, self.params.rsi_length) else {
            return Signal::None;
        };
        let Some(macd) = calculate_macd(
            &closes,
            self.params.ema_fast,
            self.params.ema_slow,
            self.params.ema_signal,
        ) else {
            return Signal::None;
        };

        tracing::debug!(rsi, macd_line = macd.line, macd_signal = macd.signal, "Technical indicators");

        if rsi < RSI_OVERSOLD && macd.line > macd.signal {
            Signal::Long
        } else if rsi > RSI_OVERBOUGHT && macd.line < macd.signal {
            Signal::Short
        } else {
            Signal::None
        }
    }

    fn name(&self) -> &str {
        "Technical"
    }

    fn min_candles_required(&self) -> usize {
        // rsi_length moves over closed candles, plus the forming one
        self.params.rsi_length + 2
    }
}

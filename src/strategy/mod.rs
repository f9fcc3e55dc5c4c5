// Trading strategy module
pub mod breakout;
pub mod engine;
pub mod technical;

pub use breakout::BreakoutStrategy;
pub use engine::StrategyInstance;
pub use technical::TechnicalStrategy;

use crate::error::{Error, Result};
use crate::models::{Candle, Timeframe};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Entry signal produced by a strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Long,
    Short,
    None,
}

/// Base trait for all trading strategies
pub trait Strategy: Send + Sync {
    /// Generate an entry signal from the candle history
    ///
    /// The last candle is the one still forming. Insufficient history is
    /// `Signal::None`, never an error.
    fn generate_signal(&self, candles: &[Candle]) -> Signal;

    /// Get strategy name
    fn name(&self) -> &str;

    /// Minimum candles required for this strategy
    fn min_candles_required(&self) -> usize;

    /// Whether entries are evaluated on every tick or only when a candle opens
    fn evaluates_every_tick(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StrategyKind {
    Technical,
    Breakout,
}

impl StrategyKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Technical => "Technical",
            StrategyKind::Breakout => "Breakout",
        }
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Technical" => Ok(StrategyKind::Technical),
            "Breakout" => Ok(StrategyKind::Breakout),
            other => Err(Error::UnknownStrategy(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TechnicalParams {
    pub ema_fast: usize,
    pub ema_slow: usize,
    pub ema_signal: usize,
    pub rsi_length: usize,
}

impl Default for TechnicalParams {
    fn default() -> Self {
        Self {
            ema_fast: 12,
            ema_slow: 26,
            ema_signal: 9,
            rsi_length: 14,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakoutParams {
    pub min_volume: f64,
}

/// Variant-specific parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum StrategyParams {
    Technical(TechnicalParams),
    Breakout(BreakoutParams),
}

impl StrategyParams {
    pub fn kind(&self) -> StrategyKind {
        match self {
            StrategyParams::Technical(_) => StrategyKind::Technical,
            StrategyParams::Breakout(_) => StrategyKind::Breakout,
        }
    }

    pub fn build(&self) -> Box<dyn Strategy> {
        match self {
            StrategyParams::Technical(params) => Box::new(TechnicalStrategy::new(*params)),
            StrategyParams::Breakout(params) => Box::new(BreakoutStrategy::new(*params)),
        }
    }
}

/// Position sizing and exit thresholds, in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RiskParams {
    pub balance_pct: f64,
    pub take_profit: Option<f64>,
    pub stop_loss: Option<f64>,
}

/// Everything needed to start a strategy instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyConfig {
    pub params: StrategyParams,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub risk: RiskParams,
}

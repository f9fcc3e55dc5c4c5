// Technical indicators module
// RSI and MACD over candle closes, built on adjusted exponential moving averages

pub mod macd;
pub mod moving_average;
pub mod rsi;

pub use macd::{calculate_macd, Macd};
pub use moving_average::{ema_series, ewm_mean_series};
pub use rsi::calculate_rsi;

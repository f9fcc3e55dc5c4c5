pub mod precision;
pub mod trade;

pub use trade::{ExitReason, PositionSide, Trade, TradeExit, TradeStatus};

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Exchange variants supported by the connector layer
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    BinanceFutures,
    BinanceSpot,
    Bitmex,
}

impl ExchangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExchangeKind::BinanceFutures => "binance_futures",
            ExchangeKind::BinanceSpot => "binance_spot",
            ExchangeKind::Bitmex => "bitmex",
        }
    }
}

impl fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExchangeKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "binance_futures" => Ok(ExchangeKind::BinanceFutures),
            "binance_spot" => Ok(ExchangeKind::BinanceSpot),
            "bitmex" => Ok(ExchangeKind::Bitmex),
            other => Err(format!("unknown exchange: {}", other)),
        }
    }
}

/// Extra terms carried by derivative contracts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DerivativeTerms {
    pub inverse: bool,
    pub quanto: bool,
    pub multiplier: f64,
    /// Asset the contract margins and settles in (e.g. `XBt`, `USDT`)
    pub settlement_asset: String,
}

impl DerivativeTerms {
    /// Settlement-asset PnL of a long `quantity` contracts from `entry` to `price`
    pub fn long_pnl(&self, entry: f64, price: f64, quantity: f64) -> f64 {
        if self.inverse {
            quantity * self.multiplier * (1.0 / entry - 1.0 / price)
        } else {
            quantity * self.multiplier * (price - entry)
        }
    }
}

/// Normalized tradable instrument
///
/// Immutable once fetched. Keyed by `symbol` in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Contract {
    pub symbol: String,
    pub base_asset: String,
    pub quote_asset: String,
    pub tick_size: f64,
    pub lot_size: f64,
    pub price_decimals: u32,
    pub quantity_decimals: u32,
    pub exchange: ExchangeKind,
    pub derivative: Option<DerivativeTerms>,
}

impl Contract {
    /// Price rounded to the nearest tick, rendered without exponent notation
    pub fn format_price(&self, price: f64) -> Option<String> {
        precision::format_to_step(price, self.tick_size)
    }

    /// Quantity rounded to the nearest lot, rendered without exponent notation
    pub fn format_quantity(&self, quantity: f64) -> Option<String> {
        precision::format_to_step(quantity, self.lot_size)
    }

    pub fn round_quantity(&self, quantity: f64) -> Option<f64> {
        precision::round_to_step_f64(quantity, self.lot_size)
    }

    /// Asset whose balance funds positions in this contract
    pub fn margin_asset(&self) -> &str {
        self.derivative
            .as_ref()
            .map(|d| d.settlement_asset.as_str())
            .unwrap_or(&self.quote_asset)
    }
}

/// OHLCV candle. `timestamp` is the interval start in epoch milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Candle {
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Candle {
    /// Candle opened by a single trade
    pub fn from_tick(timestamp: i64, price: f64, size: f64) -> Self {
        Self {
            timestamp,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: size,
        }
    }

    /// Synthetic candle for an interval with no trades
    pub fn flat(timestamp: i64, price: f64) -> Self {
        Self::from_tick(timestamp, price, 0.0)
    }
}

/// Candle interval
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Timeframe {
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1m",
            Timeframe::M5 => "5m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
        }
    }

    pub fn as_millis(&self) -> i64 {
        let secs = match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::M30 => 1800,
            Timeframe::H1 => 3600,
            Timeframe::H4 => 14400,
        };
        secs * 1000
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(Timeframe::M1),
            "5m" => Ok(Timeframe::M5),
            "15m" => Ok(Timeframe::M15),
            "30m" => Ok(Timeframe::M30),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            other => Err(format!("unsupported timeframe: {}", other)),
        }
    }
}

/// Margin account funds for one asset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MarginBalance {
    pub initial_margin: f64,
    pub maintenance_margin: f64,
    pub margin_balance: f64,
    pub wallet_balance: f64,
    pub unrealized_pnl: f64,
}

/// Spot account funds for one asset
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SpotBalance {
    pub free: f64,
    pub locked: f64,
}

/// Account funds snapshot, shaped by account type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum Balance {
    Margin(MarginBalance),
    Spot(SpotBalance),
}

impl Balance {
    /// Funds usable for sizing a new position
    pub fn available(&self) -> f64 {
        match self {
            Balance::Margin(m) => m.wallet_balance,
            Balance::Spot(s) => s.free,
        }
    }
}

/// Exchange-assigned order identifier
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct OrderId(pub String);

impl fmt::Display for OrderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for OrderId {
    fn from(s: &str) -> Self {
        OrderId(s.to_string())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderState {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

/// Point-in-time order snapshot
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct OrderStatus {
    pub order_id: OrderId,
    pub state: OrderState,
    pub avg_price: f64,
    pub executed_qty: f64,
}

impl OrderStatus {
    pub fn is_filled(&self) -> bool {
        self.state == OrderState::Filled
    }

    /// Filled with a known average price
    pub fn has_fill_price(&self) -> bool {
        self.is_filled() && self.avg_price > 0.0
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Side {
    Buy,
    Sell,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TimeInForce {
    GoodTillCancel,
    ImmediateOrCancel,
    FillOrKill,
}

/// Best bid/ask for a symbol
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct BidAsk {
    pub bid: f64,
    pub ask: f64,
}

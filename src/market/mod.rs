pub mod candles;
pub mod prices;

pub use candles::{CandleSeries, TickOutcome};
pub use prices::PriceCache;

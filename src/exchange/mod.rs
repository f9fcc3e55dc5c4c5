// Exchange connectors
//
// One `Connector` per exchange account. Venue-specific request signing,
// endpoint paths and payload mapping live in `binance` and `bitmex`; the
// connector exposes one interface over both.

pub mod binance;
pub mod bitmex;
pub mod connector;
pub mod rest;
pub mod signing;
pub mod stream;
pub mod subscriptions;

pub use connector::Connector;
pub use stream::run_stream;
pub use subscriptions::{Channel, SubscriptionSet};

use crate::models::{BidAsk, ExchangeKind};
use serde::Deserialize;
use std::fmt;

/// API key pair. The secret never appears in `Debug` output.
#[derive(Clone, Deserialize)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// REST base URL and streaming URL of one exchange environment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub rest: String,
    pub stream: String,
}

impl Endpoints {
    pub fn new(rest: impl Into<String>, stream: impl Into<String>) -> Self {
        Self {
            rest: rest.into(),
            stream: stream.into(),
        }
    }

    pub fn for_exchange(kind: ExchangeKind, testnet: bool) -> Self {
        let (rest, stream) = match (kind, testnet) {
            (ExchangeKind::BinanceFutures, false) => {
                ("https://fapi.binance.com", "wss://fstream.binance.com/ws")
            }
            (ExchangeKind::BinanceFutures, true) => (
                "https://testnet.binancefuture.com",
                "wss://stream.binancefuture.com/ws",
            ),
            (ExchangeKind::BinanceSpot, false) => {
                ("https://api.binance.com", "wss://stream.binance.com:9443/ws")
            }
            (ExchangeKind::BinanceSpot, true) => (
                "https://testnet.binance.vision",
                "wss://testnet.binance.vision/ws",
            ),
            (ExchangeKind::Bitmex, false) => {
                ("https://www.bitmex.com", "wss://www.bitmex.com/realtime")
            }
            (ExchangeKind::Bitmex, true) => (
                "https://testnet.bitmex.com",
                "wss://testnet.bitmex.com/realtime",
            ),
        };
        Self::new(rest, stream)
    }
}

/// Normalized inbound market data event
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    BookTicker {
        symbol: String,
        quote: BidAsk,
    },
    /// Trade tick; `timestamp` in epoch milliseconds
    Trade {
        symbol: String,
        price: f64,
        size: f64,
        timestamp: i64,
    },
}

impl StreamEvent {
    pub fn symbol(&self) -> &str {
        match self {
            StreamEvent::BookTicker { symbol, .. } => symbol,
            StreamEvent::Trade { symbol, .. } => symbol,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts() {
        let creds = Credentials::new("my-key", "my-secret");
        let printed = format!("{:?}", creds);
        assert!(!printed.contains("my-key"));
        assert!(!printed.contains("my-secret"));
    }

    #[test]
    fn test_endpoints() {
        let live = Endpoints::for_exchange(ExchangeKind::BinanceFutures, false);
        assert_eq!(live.rest, "https://fapi.binance.com");
        assert_eq!(live.stream, "wss://fstream.binance.com/ws");

        let testnet = Endpoints::for_exchange(ExchangeKind::Bitmex, true);
        assert_eq!(testnet.rest, "https://testnet.bitmex.com");
        assert_eq!(testnet.stream, "wss://testnet.bitmex.com/realtime");

        let spot = Endpoints::for_exchange(ExchangeKind::BinanceSpot, true);
        assert_eq!(spot.rest, "https://testnet.binance.vision");
    }
}

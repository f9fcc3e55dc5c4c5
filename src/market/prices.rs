use crate::models::BidAsk;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// Latest bid/ask per symbol
///
/// Written by the stream task and REST book-ticker calls, read by everyone else.
#[derive(Debug, Clone, Default)]
pub struct PriceCache {
    data: Arc<RwLock<HashMap<String, BidAsk>>>,
}

impl PriceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a quote and return the updated entry
    pub fn update(&self, symbol: &str, quote: BidAsk) -> BidAsk {
        self.data
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(symbol.to_string(), quote);
        quote
    }

    pub fn get(&self, symbol: &str) -> Option<BidAsk> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .copied()
    }

    pub fn snapshot(&self) -> HashMap<String, BidAsk> {
        self.data
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_and_get() {
        let cache = PriceCache::new();
        assert!(cache.get("BTCUSDT").is_none());

        let quote = cache.update("BTCUSDT", BidAsk { bid: 100.0, ask: 100.5 });
        assert_eq!(quote.bid, 100.0);
        assert_eq!(cache.get("BTCUSDT"), Some(BidAsk { bid: 100.0, ask: 100.5 }));

        cache.update("BTCUSDT", BidAsk { bid: 101.0, ask: 101.5 });
        assert_eq!(cache.get("BTCUSDT").unwrap().ask, 101.5);
    }

    #[test]
    fn test_clones_share_state() {
        let cache = PriceCache::new();
        let reader = cache.clone();

        cache.update("ETHUSDT", BidAsk { bid: 10.0, ask: 11.0 });
        assert_eq!(reader.snapshot().len(), 1);
    }
}
